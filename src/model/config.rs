//! アプリケーション設定管理モジュール
//!
//! 計算デバイス・モデル・学習・サーバー設定をJSON形式で保存・読み込みします。
//! コマンドライン引数で指定された値はファイルの値より優先されます。

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::ml::preprocess::IMAGE_SIZE;
use crate::ml::pretrained;
use crate::ml::resnet::Backbone;

/// 計算デバイスの種類
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
pub enum DeviceType {
    /// NdArray (CPU) バックエンド
    #[default]
    Cpu,
    /// WGPU (GPU) バックエンド
    Wgpu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// モデル設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// チェックポイント（tar.gz）のパス
    pub checkpoint_path: String,
    /// 分類クラス数
    pub num_classes: usize,
    /// バックボーンの種類
    pub backbone: Backbone,
    /// 入力画像サイズ
    pub image_size: usize,
    /// ImageNet 学習済み重み（.pth）のパス
    ///
    /// 省略時はバックボーンごとの `models/<backbone>-imagenet.pth`
    pub pretrained_weights: Option<String>,
}

impl ModelSettings {
    /// 使用する学習済み重みのパス
    ///
    /// 設定ファイルで指定されていなければ `backbone` に対応する既定のパス。
    pub fn pretrained_weights_path(&self, backbone: Backbone) -> PathBuf {
        self.pretrained_weights
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| pretrained::default_weights_path(backbone))
    }
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            checkpoint_path: "models/detector.tar.gz".to_string(),
            num_classes: 2,
            backbone: Backbone::ResNet50,
            image_size: IMAGE_SIZE,
            pretrained_weights: None,
        }
    }
}

/// トレーニング設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    /// データセットのルートディレクトリ
    pub data_dir: String,
    /// エポック数
    pub num_epochs: usize,
    /// バッチサイズ
    pub batch_size: usize,
    /// 学習率
    pub learning_rate: f64,
    /// AdamW の重み減衰
    pub weight_decay: f32,
    /// ランダムシード
    pub seed: u64,
    /// 学習済み重みを使うか
    pub pretrained: bool,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            num_epochs: 10,
            batch_size: 32,
            learning_rate: 1e-4,
            weight_decay: 1e-4,
            seed: 42,
            pretrained: true,
        }
    }
}

/// HTTPサーバー設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// tokio ワーカースレッド数
    pub workers: usize,
    /// アップロードサイズ上限（バイト）
    pub max_upload_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            workers: 1,
            max_upload_bytes: 16 * 1024 * 1024,
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 計算デバイスの種類
    pub device_type: DeviceType,
    /// モデル設定
    pub model: ModelSettings,
    /// トレーニング設定
    pub training: TrainingSettings,
    /// サーバー設定
    pub server: ServerSettings,
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok(config)
    }

    /// 設定を読み込む、存在しない・壊れている場合はデフォルト設定を返す
    ///
    /// `path` が `None` の場合は [`Self::default_path`] を使用します。
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);
        if path.exists() {
            match Self::load(&path) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("{:#}; using default settings", e);
                    Self::default()
                }
            }
        } else {
            tracing::debug!("No config file at {}, using defaults", path.display());
            Self::default()
        }
    }

    /// 設定情報をログ出力
    pub fn display(&self) {
        tracing::info!("device: {}", self.device_type);
        tracing::info!(
            "model: {} ({} classes, {}x{}) checkpoint={}",
            self.model.backbone,
            self.model.num_classes,
            self.model.image_size,
            self.model.image_size,
            self.model.checkpoint_path
        );
        tracing::info!(
            "training: epochs={} batch_size={} lr={} weight_decay={} seed={} pretrained={}",
            self.training.num_epochs,
            self.training.batch_size,
            self.training.learning_rate,
            self.training.weight_decay,
            self.training.seed,
            self.training.pretrained
        );
        tracing::info!(
            "server: {}:{} workers={} max_upload_bytes={}",
            self.server.host,
            self.server.port,
            self.server.workers,
            self.server.max_upload_bytes
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.device_type, DeviceType::Cpu);
        assert_eq!(config.model.num_classes, 2);
        assert_eq!(config.model.image_size, IMAGE_SIZE);
        assert_eq!(config.model.backbone, Backbone::ResNet50);
        assert_eq!(config.training.num_epochs, 10);
        assert_eq!(config.training.batch_size, 32);
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.server.max_upload_bytes, 16 * 1024 * 1024);
    }

    #[test]
    fn test_serialize_deserialize() {
        let mut config = AppConfig::default();
        config.device_type = DeviceType::Wgpu;
        config.model.backbone = Backbone::ResNet18;

        let json = serde_json::to_string(&config).unwrap();
        let deserialized: AppConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.device_type, DeviceType::Wgpu);
        assert_eq!(deserialized.model.backbone, Backbone::ResNet18);
        assert_eq!(config.model.num_classes, deserialized.model.num_classes);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: AppConfig = serde_json::from_str(r#"{"server": {"port": 8080}}"#).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.training.seed, 42);
    }

    #[test]
    fn test_load_or_default_falls_back_on_bad_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let config = AppConfig::load_or_default(Some(&path));
        assert_eq!(config.server.port, 5000);
    }

    #[test]
    fn test_load_reads_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        let mut config = AppConfig::default();
        config.training.num_epochs = 3;
        fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.training.num_epochs, 3);
    }

    #[test]
    fn test_pretrained_weights_path_follows_backbone() {
        let mut settings = ModelSettings::default();
        assert_eq!(
            settings.pretrained_weights_path(Backbone::ResNet18),
            PathBuf::from("models").join("resnet18-imagenet.pth")
        );
        assert_eq!(
            settings.pretrained_weights_path(Backbone::ResNet34),
            PathBuf::from("models").join("resnet34-imagenet.pth")
        );

        settings.pretrained_weights = Some("weights/custom.pth".to_string());
        assert_eq!(
            settings.pretrained_weights_path(Backbone::ResNet18),
            PathBuf::from("weights/custom.pth")
        );
    }

    #[test]
    fn test_device_type_display() {
        assert_eq!(format!("{}", DeviceType::Wgpu), "WGPU (GPU)");
        assert_eq!(format!("{}", DeviceType::Cpu), "CPU (NdArray)");
    }
}
