//! チェックポイントの永続化
//!
//! Tar.gz形式でモデルとメタデータを1ファイルに統合して保存・読み込みします。
//!
//! ファイル構成（tar.gz内部）:
//! - metadata.json   - メタデータ（クラス名、入力サイズなど）
//! - model.bin       - モデルの重み（バイナリ）

use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Archive, Builder};

use crate::model::model_metadata::CheckpointMetadata;

const METADATA_ENTRY: &str = "metadata.json";
const MODEL_ENTRY: &str = "model.bin";

/// メタデータと共にモデルをTar.gz形式で保存
///
/// 指定されたパスにそのまま書き込み、既存ファイルは上書きされます。
pub fn save_model_with_metadata(
    output_path: &Path,
    metadata: &CheckpointMetadata,
    model_binary: &[u8],
) -> Result<()> {
    // 親ディレクトリが存在しない場合は作成
    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create parent directory: {:?}", parent))?;
    }

    let tar_gz_file = File::create(output_path)
        .with_context(|| format!("Failed to create checkpoint file: {:?}", output_path))?;

    let encoder = GzEncoder::new(tar_gz_file, Compression::default());
    let mut tar_builder = Builder::new(encoder);

    let json_str = metadata.to_json_string()?;
    append_entry(&mut tar_builder, METADATA_ENTRY, json_str.as_bytes())?;
    append_entry(&mut tar_builder, MODEL_ENTRY, model_binary)?;

    // tarアーカイブとgzipストリームを完成させる
    let encoder = tar_builder
        .into_inner()
        .context("Failed to finalize tar archive")?;
    encoder.finish().context("Failed to finalize gzip stream")?;

    Ok(())
}

fn append_entry<W: std::io::Write>(builder: &mut Builder<W>, name: &str, data: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append(&header, data)
        .with_context(|| format!("Failed to add {} to tar", name))
}

/// メタデータとモデルバイナリを共に読み込む
pub fn load_model_with_metadata(tar_gz_path: &Path) -> Result<(CheckpointMetadata, Vec<u8>)> {
    let tar_gz_file = File::open(tar_gz_path)
        .with_context(|| format!("Failed to open checkpoint file: {:?}", tar_gz_path))?;

    let mut archive = Archive::new(GzDecoder::new(tar_gz_file));

    let mut metadata_opt = None;
    let mut model_binary_opt = None;

    for entry in archive.entries().context("Failed to read checkpoint archive")? {
        let mut entry = entry?;
        let path = entry.path()?.to_string_lossy().into_owned();

        match path.as_str() {
            METADATA_ENTRY => {
                let mut json_str = String::new();
                entry.read_to_string(&mut json_str)?;
                metadata_opt = Some(CheckpointMetadata::from_json_string(&json_str)?);
            }
            MODEL_ENTRY => {
                let mut buffer = Vec::new();
                entry.read_to_end(&mut buffer)?;
                model_binary_opt = Some(buffer);
            }
            _ => {}
        }
    }

    let metadata = metadata_opt
        .ok_or_else(|| anyhow::anyhow!("{} not found in checkpoint archive", METADATA_ENTRY))?;
    let model_binary = model_binary_opt
        .ok_or_else(|| anyhow::anyhow!("{} not found in checkpoint archive", MODEL_ENTRY))?;

    Ok((metadata, model_binary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::resnet::Backbone;
    use tempfile::TempDir;

    fn sample_metadata() -> CheckpointMetadata {
        CheckpointMetadata::new(
            vec!["AI".to_string(), "Human".to_string()],
            Backbone::ResNet18,
            64,
            3,
            10,
            0.75,
            0.5,
        )
    }

    #[test]
    fn test_save_creates_parent_and_loads_back() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested/models/detector.tar.gz");
        let metadata = sample_metadata();

        save_model_with_metadata(&path, &metadata, &[1, 2, 3, 4]).unwrap();

        let (loaded, binary) = load_model_with_metadata(&path).unwrap();
        assert_eq!(loaded, metadata);
        assert_eq!(binary, vec![1, 2, 3, 4]);
        assert_eq!(loaded.num_classes(), 2);
    }

    #[test]
    fn test_save_overwrites_previous_checkpoint() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("detector.tar.gz");

        save_model_with_metadata(&path, &sample_metadata(), &[0; 1024]).unwrap();
        save_model_with_metadata(&path, &sample_metadata(), &[9]).unwrap();

        let (_, binary) = load_model_with_metadata(&path).unwrap();
        assert_eq!(binary, vec![9]);
    }

    #[test]
    fn test_load_rejects_non_archive() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("detector.tar.gz");
        std::fs::write(&path, b"not a checkpoint").unwrap();

        assert!(load_model_with_metadata(&path).is_err());
    }
}
