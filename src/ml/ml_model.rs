//! 機械学習モデルの共通定義
//!
//! 学習済みバックボーンの最終全結合層を差し替えた画像分類モデルと、
//! 関連する設定を提供します。

use std::path::Path;

use burn::{
    config::Config,
    module::Module,
    nn::{loss::CrossEntropyLossConfig, Linear, LinearConfig},
    tensor::{backend::Backend, Int, Tensor},
    train::ClassificationOutput,
};

use crate::error::Result as DetectorResult;
use crate::ml::preprocess::IMAGE_SIZE;
use crate::ml::pretrained;
use crate::ml::resnet::{Backbone, ResNet};

/// 2クラス分類時のクラス名（学習時のフォルダ順と一致）
pub const DEFAULT_CLASS_NAMES: [&str; 2] = ["AI", "Human"];

/// デフォルトのクラス数
pub const NUM_CLASSES: usize = 2;

/// クラス数に対応するデフォルトのクラス名
///
/// 2クラスの場合は `["AI", "Human"]`、それ以外はインデックスの文字列。
pub fn default_class_names(num_classes: usize) -> Vec<String> {
    if num_classes == DEFAULT_CLASS_NAMES.len() {
        DEFAULT_CLASS_NAMES.iter().map(|s| s.to_string()).collect()
    } else {
        (0..num_classes).map(|i| i.to_string()).collect()
    }
}

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 分類クラス数
    pub num_classes: usize,
    /// バックボーンの種類
    #[config(default = "Backbone::ResNet50")]
    pub backbone: Backbone,
    /// 入力画像サイズ（正方形）
    #[config(default = "IMAGE_SIZE")]
    pub image_size: usize,
}

impl ModelConfig {
    /// モデルを初期化（重みはランダム）
    pub fn init<B: Backend>(&self, device: &B::Device) -> ArtClassifier<B> {
        tracing::debug!(
            backbone = %self.backbone,
            num_classes = self.num_classes,
            "fc: {} -> {}",
            self.backbone.feature_width(),
            self.num_classes
        );

        ArtClassifier {
            backbone: self.backbone.init(device),
            fc: LinearConfig::new(self.backbone.feature_width(), self.num_classes).init(device),
        }
    }

    /// ImageNet 学習済みバックボーンを読み込んで初期化
    ///
    /// 分類ヘッド `fc` は常に新規初期化されます。
    pub fn init_pretrained<B: Backend>(
        &self,
        weights_path: &Path,
        device: &B::Device,
    ) -> DetectorResult<ArtClassifier<B>> {
        let record = pretrained::load_backbone_record::<B>(self.backbone, weights_path, device)?;
        let model = self.init::<B>(device);

        tracing::info!("Loaded pretrained {} weights from {}", self.backbone, weights_path.display());

        Ok(ArtClassifier {
            backbone: model.backbone.load_record(record),
            fc: model.fc,
        })
    }
}

/// 画像分類モデル（バックボーン + 差し替えた分類ヘッド）
#[derive(Module, Debug)]
pub struct ArtClassifier<B: Backend> {
    backbone: ResNet<B>,
    fc: Linear<B>,
}

impl<B: Backend> ArtClassifier<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 3, size, size]
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let features = self.backbone.forward(images);
        self.fc.forward(features)
    }

    /// 予測を実行
    ///
    /// # 戻り値
    /// - (予測クラスID [batch_size, 1], ロジット)
    pub fn predict(&self, images: Tensor<B, 4>) -> (Tensor<B, 2, Int>, Tensor<B, 2>) {
        let output = self.forward(images);
        let predictions = output.clone().argmax(1);
        (predictions, output)
    }

    /// 順伝播と損失計算
    ///
    /// # 戻り値
    /// - ClassificationOutput（損失、出力、ターゲット）
    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }
}
