//! 転移学習でモデルを学習し、最良のチェックポイントを保存する

#![recursion_limit = "256"]

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use burn::tensor::backend::AutodiffBackend;
use clap::Parser;

use art_detector::backend::{self, CpuTrainingBackend, GpuTrainingBackend};
use art_detector::ml::{train_model, Backbone, TrainOptions, TrainingSummary};
use art_detector::model::{AppConfig, DeviceType};

#[derive(Parser, Debug)]
#[command(name = "train", about = "Train the AI vs Human art detector")]
struct Args {
    /// データセットのルート（train/ と val/ を含む）
    #[arg(long = "data_dir")]
    data_dir: Option<PathBuf>,

    /// チェックポイントの保存先
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long = "batch_size")]
    batch_size: Option<usize>,

    #[arg(long)]
    lr: Option<f64>,

    #[arg(long = "image_size")]
    image_size: Option<usize>,

    #[arg(long = "num_classes")]
    num_classes: Option<usize>,

    /// ImageNet 学習済み重みを使わない
    #[arg(long = "no_pretrain")]
    no_pretrain: bool,

    #[arg(long, value_enum)]
    backbone: Option<Backbone>,

    /// torchvision の .pth ファイル（省略時は models/<backbone>-imagenet.pth、なければダウンロード）
    #[arg(long = "pretrained_weights")]
    pretrained_weights: Option<PathBuf>,

    #[arg(long = "weight_decay")]
    weight_decay: Option<f32>,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, value_enum)]
    device: Option<DeviceType>,

    /// 設定ファイル（JSON）
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    debug: bool,
}

fn build_options(args: &Args, config: &AppConfig) -> TrainOptions {
    let backbone = args.backbone.unwrap_or(config.model.backbone);
    let pretrained = config.training.pretrained && !args.no_pretrain;
    // 未指定ならバックボーンごとのキャッシュパス（なければダウンロード）
    let pretrained_weights = pretrained.then(|| {
        args.pretrained_weights
            .clone()
            .unwrap_or_else(|| config.model.pretrained_weights_path(backbone))
    });

    TrainOptions {
        data_dir: args.data_dir.clone().unwrap_or_else(|| PathBuf::from(&config.training.data_dir)),
        checkpoint_path: args
            .checkpoint
            .clone()
            .unwrap_or_else(|| PathBuf::from(&config.model.checkpoint_path)),
        num_epochs: args.epochs.unwrap_or(config.training.num_epochs),
        batch_size: args.batch_size.unwrap_or(config.training.batch_size),
        learning_rate: args.lr.unwrap_or(config.training.learning_rate),
        weight_decay: args.weight_decay.unwrap_or(config.training.weight_decay),
        image_size: args.image_size.unwrap_or(config.model.image_size),
        num_classes: args.num_classes.unwrap_or(config.model.num_classes),
        backbone,
        pretrained_weights,
        seed: args.seed.unwrap_or(config.training.seed),
    }
}

fn run<B: AutodiffBackend>(options: &TrainOptions, device: B::Device) -> Result<TrainingSummary> {
    let summary = train_model::<B, _>(options, &device, |_| {})
        .with_context(|| format!("Training on {} failed", options.data_dir.display()))?;
    Ok(summary)
}

fn main() -> Result<()> {
    let args = Args::parse();
    art_detector::logging::init(art_detector::logging::level_for(args.debug))?;

    let config = AppConfig::load_or_default(args.config.as_deref());
    config.display();
    let device_type = args.device.unwrap_or(config.device_type);
    let options = build_options(&args, &config);

    tracing::info!("Backend: {}", backend::backend_name(device_type));
    match &options.pretrained_weights {
        Some(path) => tracing::info!("Pretrained weights: {}", path.display()),
        None => tracing::info!("Training from scratch (no pretrained weights)"),
    }

    let summary = match device_type {
        DeviceType::Cpu => run::<CpuTrainingBackend>(&options, backend::cpu_device())?,
        DeviceType::Wgpu => run::<GpuTrainingBackend>(&options, backend::gpu_device())?,
    };

    report(&summary, &options.checkpoint_path);
    Ok(())
}

fn report(summary: &TrainingSummary, checkpoint: &Path) {
    tracing::info!("Best validation accuracy: {:.4}", summary.best_val_accuracy);
    if summary.checkpoint_saved {
        tracing::info!("Checkpoint: {}", checkpoint.display());
    } else {
        tracing::warn!("Validation accuracy never exceeded 0; no checkpoint was written");
    }
}
