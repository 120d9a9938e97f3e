//! ダウンロード済みのデータセットを data/{train,val}/{AI,Human} に整理する

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use art_detector::dataset::{organize_dataset, OrganizeOptions};

#[derive(Parser, Debug)]
#[command(name = "organize_dataset", about = "Organize a downloaded dataset into train/val folders")]
struct Args {
    /// ダウンロードしたデータセットのディレクトリ
    #[arg(long)]
    source: PathBuf,

    #[arg(long = "target_dir", default_value = "data")]
    target_dir: PathBuf,

    /// 検証用に回す割合（CSV構成のみ）
    #[arg(long = "val_split", default_value_t = 0.2)]
    val_split: f64,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// 既存の検証データを戻して分割し直す
    #[arg(long)]
    resplit: bool,

    #[arg(long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    art_detector::logging::init(art_detector::logging::level_for(args.debug))?;

    let options = OrganizeOptions {
        source: args.source,
        target_dir: args.target_dir,
        val_split: args.val_split,
        seed: args.seed,
        resplit: args.resplit,
    };
    organize_dataset(&options)?;
    Ok(())
}
