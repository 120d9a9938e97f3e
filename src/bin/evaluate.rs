//! チェックポイントを検証データで評価し、分類レポートと混同行列を表示する

#![recursion_limit = "256"]

use std::path::PathBuf;

use anyhow::{Context, Result};
use burn::tensor::backend::Backend;
use clap::Parser;

use art_detector::backend::{self, CpuBackend, GpuBackend};
use art_detector::ml::{evaluate_model, load_checkpoint, ArtDataset, EvaluationReport};
use art_detector::model::{AppConfig, DeviceType};

#[derive(Parser, Debug)]
#[command(name = "evaluate", about = "Evaluate a trained checkpoint on the validation split")]
struct Args {
    #[arg(long = "data_dir")]
    data_dir: Option<PathBuf>,

    #[arg(long)]
    checkpoint: Option<PathBuf>,

    #[arg(long = "batch_size")]
    batch_size: Option<usize>,

    /// 省略時はチェックポイントの値
    #[arg(long = "image_size")]
    image_size: Option<usize>,

    /// チェックポイントのクラス数と一致する必要がある
    #[arg(long = "num_classes")]
    num_classes: Option<usize>,

    #[arg(long, value_enum)]
    device: Option<DeviceType>,

    #[arg(long)]
    config: Option<PathBuf>,

    /// 混同行列をCSVで保存
    #[arg(long = "confusion_csv")]
    confusion_csv: Option<PathBuf>,

    #[arg(long)]
    debug: bool,
}

fn run<B: Backend>(args: &Args, config: &AppConfig, device: B::Device) -> Result<EvaluationReport> {
    let checkpoint = args
        .checkpoint
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.model.checkpoint_path));
    let data_dir = args
        .data_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.training.data_dir));

    let (metadata, model) = load_checkpoint::<B>(&checkpoint, &device)
        .with_context(|| format!("Failed to load checkpoint {}", checkpoint.display()))?;

    if let Some(num_classes) = args.num_classes {
        if num_classes != metadata.num_classes() {
            anyhow::bail!(
                "--num_classes {} does not match the checkpoint ({} classes: {:?})",
                num_classes,
                metadata.num_classes(),
                metadata.class_names
            );
        }
    }

    let image_size = args.image_size.unwrap_or(metadata.image_size);
    let batch_size = args.batch_size.unwrap_or(config.training.batch_size);

    tracing::info!(
        "Checkpoint: {} ({}, epoch {}, val_acc={:.4})",
        checkpoint.display(),
        metadata.backbone,
        metadata.epoch,
        metadata.val_accuracy
    );

    let dataset = ArtDataset::new(&data_dir, "val", Some(metadata.class_names.as_slice()))?;
    tracing::info!("Evaluating {} images from {}", dataset.samples().len(), dataset.root().display());

    let report = evaluate_model(&model, &dataset, image_size, batch_size, &device)?;
    Ok(report)
}

fn main() -> Result<()> {
    let args = Args::parse();
    art_detector::logging::init(art_detector::logging::level_for(args.debug))?;

    let config = AppConfig::load_or_default(args.config.as_deref());
    config.display();
    let device_type = args.device.unwrap_or(config.device_type);
    tracing::info!("Backend: {}", backend::backend_name(device_type));

    let report = match device_type {
        DeviceType::Cpu => run::<CpuBackend>(&args, &config, backend::cpu_device())?,
        DeviceType::Wgpu => run::<GpuBackend>(&args, &config, backend::gpu_device())?,
    };

    println!("\nClassification Report:\n");
    println!("{}", report);
    println!("Confusion Matrix (rows: actual, columns: predicted):\n");
    println!("{}", report.confusion_table());

    if let Some(path) = &args.confusion_csv {
        report
            .write_confusion_csv(path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!("Confusion matrix saved to {}", path.display());
    }

    Ok(())
}
