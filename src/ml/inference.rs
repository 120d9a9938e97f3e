//! モデル推論機能
//!
//! [`ArtDetector`] はチェックポイントから一度だけ構築され、HTTP層からは
//! [`ImageClassifier`] トレイトとして共有されます。

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use burn::tensor::{activation, backend::Backend, Tensor};
use image::DynamicImage;
use serde::Serialize;

use crate::backend::DeviceLabel;
use crate::error::{DetectorError, Result};
use crate::ml::checkpoint::load_checkpoint;
use crate::ml::ml_model::{default_class_names, ArtClassifier, ModelConfig, NUM_CLASSES};
use crate::ml::preprocess::Preprocessor;

/// 推論結果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    pub predicted_class: String,
    /// 予測クラスのソフトマックス確率
    pub confidence: f32,
    /// クラス名 -> 確率
    pub probabilities: BTreeMap<String, f32>,
}

impl PredictionResult {
    /// クラスごとの確率から結果を組み立てる（同率の場合は小さいインデックスを優先）
    pub fn from_probabilities(class_names: &[String], probabilities: &[f32]) -> Result<Self> {
        if class_names.len() != probabilities.len() || probabilities.is_empty() {
            return Err(DetectorError::Model(format!(
                "expected {} probabilities, got {}",
                class_names.len(),
                probabilities.len()
            )));
        }

        let (best_idx, confidence) = probabilities
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |best, (i, p)| if p > best.1 { (i, p) } else { best });

        Ok(Self {
            predicted_class: class_names[best_idx].clone(),
            confidence,
            probabilities: class_names
                .iter()
                .cloned()
                .zip(probabilities.iter().copied())
                .collect(),
        })
    }
}

/// HTTP層が依存する画像分類器
pub trait ImageClassifier: Send + Sync {
    /// エンコード済み画像（JPEG/PNG等）を分類
    fn predict(&self, image_bytes: &[u8]) -> Result<PredictionResult>;

    fn class_names(&self) -> &[String];

    /// 計算デバイスの表示名
    fn device_name(&self) -> String;
}

/// 推論エンジン
///
/// burn のモジュールは `Sync` ではないため、順伝播は `Mutex` で直列化されます。
/// デコードと前処理はロックの外で行います。
pub struct ArtDetector<B: Backend> {
    model: Mutex<ArtClassifier<B>>,
    class_names: Vec<String>,
    preprocessor: Preprocessor,
    device: B::Device,
    checkpoint_loaded: bool,
}

impl<B: Backend> ArtDetector<B> {
    /// チェックポイントを読み込んで推論エンジンを初期化
    ///
    /// ファイルが存在しない場合は警告を出し、未学習のモデルで起動します。
    pub fn new(checkpoint_path: &Path, device: B::Device) -> Result<Self> {
        if !checkpoint_path.exists() {
            tracing::warn!(
                "Checkpoint {} not found, using an untrained model",
                checkpoint_path.display()
            );
            return Ok(Self::untrained(&ModelConfig::new(NUM_CLASSES), device));
        }

        let (metadata, model) = load_checkpoint::<B>(checkpoint_path, &device)?;

        tracing::info!(
            "Loaded checkpoint {} ({}, classes={:?}, epoch {}, val_acc={:.4})",
            checkpoint_path.display(),
            metadata.backbone,
            metadata.class_names,
            metadata.epoch,
            metadata.val_accuracy
        );

        Ok(Self {
            model: Mutex::new(model),
            class_names: metadata.class_names,
            preprocessor: Preprocessor::eval(metadata.image_size),
            device,
            checkpoint_loaded: true,
        })
    }

    /// ランダム初期化のモデルで推論エンジンを作成
    pub fn untrained(config: &ModelConfig, device: B::Device) -> Self {
        let model = config.init::<B>(&device);
        Self {
            model: Mutex::new(model),
            class_names: default_class_names(config.num_classes),
            preprocessor: Preprocessor::eval(config.image_size),
            device,
            checkpoint_loaded: false,
        }
    }

    pub fn checkpoint_loaded(&self) -> bool {
        self.checkpoint_loaded
    }

    pub fn image_size(&self) -> usize {
        self.preprocessor.image_size()
    }

    /// 画像ファイルを分類
    pub fn predict_file(&self, path: &Path) -> Result<PredictionResult> {
        let image = Preprocessor::open(path)?;
        self.predict_image(&image)
    }

    /// デコード済み画像を分類
    pub fn predict_image(&self, image: &DynamicImage) -> Result<PredictionResult> {
        let size = self.preprocessor.image_size();
        // 評価用の前処理は乱数を参照しない
        let image_data = self.preprocessor.process(image, &mut rand::thread_rng());
        let tensor = Tensor::<B, 1>::from_floats(image_data.as_slice(), &self.device)
            .reshape([1, 3, size, size]);

        let logits = {
            let model = self
                .model
                .lock()
                .map_err(|_| DetectorError::Model("model lock poisoned".to_string()))?;
            model.forward(tensor)
        };

        let probabilities = activation::softmax(logits, 1)
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| DetectorError::Model(format!("failed to read probabilities: {:?}", e)))?;

        PredictionResult::from_probabilities(&self.class_names, &probabilities)
    }
}

impl<B: Backend> ImageClassifier for ArtDetector<B>
where
    B::Device: DeviceLabel,
{
    fn predict(&self, image_bytes: &[u8]) -> Result<PredictionResult> {
        let image = Preprocessor::decode(image_bytes)?;
        self.predict_image(&image)
    }

    fn class_names(&self) -> &[String] {
        &self.class_names
    }

    fn device_name(&self) -> String {
        self.device.label()
    }
}
