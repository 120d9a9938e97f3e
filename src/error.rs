//! データセット・モデル・推論で共通のエラー型

use std::path::PathBuf;

use thiserror::Error;

/// ライブラリ全体のエラー
#[derive(Error, Debug)]
pub enum DetectorError {
    /// 必須のデータセット分割・クラスディレクトリが存在しない
    #[error("directory not found: {}", .0.display())]
    MissingDirectory(PathBuf),

    /// 学習済み重みをダウンロードできなかった
    #[error("failed to download pretrained weights from {url}: {message}")]
    WeightsDownload { url: &'static str, message: String },

    /// 画像のデコードに失敗
    #[error("failed to decode image: {0}")]
    Decode(String),

    /// 分割内に使える画像がない
    #[error("no images found in {}", .0.display())]
    EmptyDataset(PathBuf),

    /// チェックポイントの書き込み・読み込みに失敗
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// 順伝播・テンソル変換の失敗
    #[error("model error: {0}")]
    Model(String),

    /// 設定値の矛盾
    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DetectorError>;
