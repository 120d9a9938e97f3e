//! torchvision 学習済み重みの読み込み
//!
//! `.pth` ファイルは PyTorch の state_dict そのままで、`burn-import` の
//! PyTorch レコーダーで [`ResNetRecord`] に変換します。
//! ローカルにファイルがない場合は torchvision の配布元からダウンロードして
//! 同じパスにキャッシュします。

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use burn::{
    record::{FullPrecisionSettings, Recorder},
    tensor::backend::Backend,
};
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};

use crate::error::{DetectorError, Result};
use crate::ml::resnet::{Backbone, ResNetRecord};

/// 重みのキャッシュ先ディレクトリ
pub const WEIGHTS_DIR: &str = "models";

/// state_dict のキーを burn 側のフィールド名に付け替える規則（上から順に適用）
///
/// - `*.downsample.0.*` -> `*.downsample.conv.*`
/// - `*.downsample.1.*` -> `*.downsample.bn.*`
/// - `layerN.i.*` -> `layerN.blocks.i.*`
///
/// `fc.*` は対応するフィールドがないため読み捨てられます。
pub const KEY_REMAP: [(&str, &str); 3] = [
    ("(.+)\\.downsample\\.0\\.(.+)", "$1.downsample.conv.$2"),
    ("(.+)\\.downsample\\.1\\.(.+)", "$1.downsample.bn.$2"),
    ("(layer[1-4])\\.([0-9]+)\\.(.+)", "$1.blocks.$2.$3"),
];

/// torchvision が公開している ImageNet 重みの URL
pub fn weights_url(backbone: Backbone) -> &'static str {
    match backbone {
        Backbone::ResNet18 => "https://download.pytorch.org/models/resnet18-f37072fd.pth",
        Backbone::ResNet34 => "https://download.pytorch.org/models/resnet34-b627a593.pth",
        Backbone::ResNet50 => "https://download.pytorch.org/models/resnet50-11ad3fa6.pth",
    }
}

/// バックボーンごとの既定のキャッシュパス（例: `models/resnet18-imagenet.pth`）
pub fn default_weights_path(backbone: Backbone) -> PathBuf {
    Path::new(WEIGHTS_DIR).join(format!("{}-imagenet.pth", backbone))
}

fn load_args(weights_path: &Path) -> LoadArgs {
    KEY_REMAP
        .iter()
        .fold(LoadArgs::new(weights_path.to_path_buf()), |args, (pattern, replacement)| {
            args.with_key_remap(pattern, replacement)
        })
}

/// 重みファイルを用意する
///
/// 既にファイルがあればそのまま使い、なければ `url` からダウンロードします。
/// 途中で失敗した場合は書きかけのファイルを残しません。
pub fn ensure_weights(url: &'static str, weights_path: &Path) -> Result<()> {
    if weights_path.is_file() {
        return Ok(());
    }

    tracing::info!("Downloading pretrained weights from {} ...", url);
    let download_err = |message: String| DetectorError::WeightsDownload { url, message };

    let response = reqwest::blocking::get(url).map_err(|e| download_err(e.to_string()))?;
    if !response.status().is_success() {
        return Err(download_err(format!("HTTP {}", response.status())));
    }
    let bytes = response.bytes().map_err(|e| download_err(e.to_string()))?;

    if let Some(parent) = weights_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    // 一時ファイルに書いてから置き換える
    let partial_path = weights_path.with_extension("part");
    let written = fs::File::create(&partial_path)
        .and_then(|mut file| file.write_all(&bytes))
        .and_then(|_| fs::rename(&partial_path, weights_path));
    if let Err(e) = written {
        let _ = fs::remove_file(&partial_path);
        return Err(e.into());
    }

    tracing::info!("Saved {} bytes to {}", bytes.len(), weights_path.display());
    Ok(())
}

/// 学習済みバックボーンのレコードを読み込む（必要ならダウンロード）
pub fn load_backbone_record<B: Backend>(
    backbone: Backbone,
    weights_path: &Path,
    device: &B::Device,
) -> Result<ResNetRecord<B>> {
    ensure_weights(weights_url(backbone), weights_path)?;

    PyTorchFileRecorder::<FullPrecisionSettings>::default()
        .load(load_args(weights_path), device)
        .map_err(|e| {
            DetectorError::Model(format!(
                "failed to load {} weights from {}: {:?}",
                backbone,
                weights_path.display(),
                e
            ))
        })
}
