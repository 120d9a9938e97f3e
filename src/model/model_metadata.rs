//! チェックポイントメタデータの定義
//!
//! 推論時にクラス名・入力サイズ・バックボーンを学習時と一致させるため、
//! モデルの重みと一緒に保存されます。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ml::resnet::Backbone;

/// チェックポイントメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// クラス名（インデックス順）
    /// 例: ["AI", "Human"]
    pub class_names: Vec<String>,

    /// バックボーンの種類
    pub backbone: Backbone,

    /// モデル入力サイズ（正方形）
    pub image_size: usize,

    /// 保存時のエポック（1始まり）
    pub epoch: usize,

    /// 学習エポック数
    pub num_epochs: usize,

    /// 保存時の検証精度
    pub val_accuracy: f64,

    /// 保存時の検証損失
    pub val_loss: f64,

    /// モデルの学習時刻（RFC3339形式）
    pub trained_at: String,
}

impl CheckpointMetadata {
    /// 新しいメタデータを作成
    pub fn new(
        class_names: Vec<String>,
        backbone: Backbone,
        image_size: usize,
        epoch: usize,
        num_epochs: usize,
        val_accuracy: f64,
        val_loss: f64,
    ) -> Self {
        let trained_at = chrono::Local::now().to_rfc3339();

        Self {
            class_names,
            backbone,
            image_size,
            epoch,
            num_epochs,
            val_accuracy,
            val_loss,
            trained_at,
        }
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize metadata from JSON")
    }
}
