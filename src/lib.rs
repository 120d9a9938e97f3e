//! AI生成画像 / 人間の作品 を判別する画像分類器
//!
//! - [`ml`]: データセット・前処理・モデル・学習・推論・評価
//! - [`model`]: チェックポイントの保存形式と設定ファイル
//! - [`dataset`]: ダウンロードしたデータセットの整理
//! - [`server`]: HTTPエンドポイント

pub mod error;
pub mod logging;
pub mod backend;
pub mod model;
pub mod ml;
pub mod dataset;
pub mod server;

pub use error::{DetectorError, Result};
