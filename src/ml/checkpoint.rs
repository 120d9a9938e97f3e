//! モデル重みのチェックポイント
//!
//! 重みは `BinBytesRecorder`（f32精度）でバイト列にし、メタデータと共に
//! [`crate::model::model_storage`] の tar.gz に格納します。

use std::path::Path;

use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::backend::Backend,
};

use crate::error::{DetectorError, Result};
use crate::ml::ml_model::{ArtClassifier, ModelConfig};
use crate::model::{load_model_with_metadata, save_model_with_metadata, CheckpointMetadata};

/// モデルとメタデータをチェックポイントとして保存（既存ファイルは上書き）
pub fn save_checkpoint<B: Backend>(
    path: &Path,
    metadata: &CheckpointMetadata,
    model: &ArtClassifier<B>,
) -> Result<()> {
    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    let model_binary = recorder
        .record(model.clone().into_record(), ())
        .map_err(|e| DetectorError::Checkpoint(format!("failed to serialize weights: {:?}", e)))?;

    save_model_with_metadata(path, metadata, &model_binary)
        .map_err(|e| DetectorError::Checkpoint(format!("{:#}", e)))?;

    tracing::debug!(
        path = %path.display(),
        bytes = model_binary.len(),
        "checkpoint written"
    );
    Ok(())
}

/// チェックポイントを読み込み、メタデータに従ってモデルを復元
pub fn load_checkpoint<B: Backend>(
    path: &Path,
    device: &B::Device,
) -> Result<(CheckpointMetadata, ArtClassifier<B>)> {
    let (metadata, model_binary) = load_model_with_metadata(path)
        .map_err(|e| DetectorError::Checkpoint(format!("{:#}", e)))?;

    if metadata.class_names.is_empty() {
        return Err(DetectorError::Checkpoint(format!(
            "{} has no class names",
            path.display()
        )));
    }

    let model = ModelConfig::new(metadata.num_classes())
        .with_backbone(metadata.backbone)
        .with_image_size(metadata.image_size)
        .init::<B>(device);

    let record = BinBytesRecorder::<FullPrecisionSettings>::default()
        .load(model_binary, device)
        .map_err(|e| DetectorError::Checkpoint(format!("failed to restore weights: {:?}", e)))?;

    Ok((metadata, model.load_record(record)))
}
