//! 推論用HTTPサーバー
//!
//! 起動時にチェックポイントを一度だけ読み込み、全リクエストで共有します。

#![recursion_limit = "256"]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use art_detector::backend::{self, CpuBackend, GpuBackend};
use art_detector::ml::{ArtDetector, ImageClassifier};
use art_detector::model::{AppConfig, DeviceType};
use art_detector::server::{self, AppState};

#[derive(Parser, Debug)]
#[command(name = "serve", about = "Serve the AI vs Human art detector over HTTP")]
struct Args {
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    /// DEBUG レベルのログを出力
    #[arg(long)]
    debug: bool,

    /// tokio ワーカースレッド数
    #[arg(long)]
    workers: Option<usize>,

    #[arg(long, value_enum)]
    device: Option<DeviceType>,

    #[arg(long)]
    config: Option<PathBuf>,
}

fn load_classifier(checkpoint: &Path, device_type: DeviceType) -> Option<Arc<dyn ImageClassifier>> {
    let detector: art_detector::Result<Arc<dyn ImageClassifier>> = match device_type {
        DeviceType::Cpu => ArtDetector::<CpuBackend>::new(checkpoint, backend::cpu_device())
            .map(|d| Arc::new(d) as Arc<dyn ImageClassifier>),
        DeviceType::Wgpu => ArtDetector::<GpuBackend>::new(checkpoint, backend::gpu_device())
            .map(|d| Arc::new(d) as Arc<dyn ImageClassifier>),
    };

    match detector {
        Ok(detector) => Some(detector),
        Err(e) => {
            tracing::error!("Failed to load {}: {}; /predict will answer 500", checkpoint.display(), e);
            None
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

async fn serve(addr: String, state: AppState) -> Result<()> {
    let app = server::router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    art_detector::logging::init(art_detector::logging::level_for(args.debug))?;

    let config = AppConfig::load_or_default(args.config.as_deref());
    config.display();
    let device_type = args.device.unwrap_or(config.device_type);
    let checkpoint = args
        .checkpoint
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.model.checkpoint_path));
    let host = args.host.clone().unwrap_or_else(|| config.server.host.clone());
    let port = args.port.unwrap_or(config.server.port);
    let workers = args.workers.unwrap_or(config.server.workers).max(1);

    tracing::info!("Backend: {}", backend::backend_name(device_type));
    let classifier = load_classifier(&checkpoint, device_type);
    if let Some(classifier) = &classifier {
        tracing::info!("Classes: {:?} on {}", classifier.class_names(), classifier.device_name());
    }

    let state = AppState::new(classifier, config.server.max_upload_bytes);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(workers)
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(serve(format!("{}:{}", host, port), state))
}
