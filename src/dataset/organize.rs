//! ダウンロードしたデータセットを `<target>/{train,val}/{AI,Human}` に整理
//!
//! 2種類の構成に対応します。
//! - CSV構成: `train.csv`（`file_name,label`、1=AI / 0=Human）と `train_data/`
//! - フォルダ構成: `train/{AI,Human}` と `val/` または `test/`
//!
//! CSV構成の場合は学習データの一部を検証用に移動します。

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Deserialize;

use crate::ml::training::is_image_file;

const AI: &str = "AI";
const HUMAN: &str = "Human";
const CLASSES: [&str; 2] = [AI, HUMAN];

/// 整理オプション
#[derive(Debug, Clone)]
pub struct OrganizeOptions {
    pub source: PathBuf,
    pub target_dir: PathBuf,
    /// 検証用に回す割合（CSV構成のみ）
    pub val_split: f64,
    pub seed: u64,
    /// 既存の検証データを学習側に戻してから分割し直す
    pub resplit: bool,
}

impl Default for OrganizeOptions {
    fn default() -> Self {
        Self {
            source: PathBuf::from("."),
            target_dir: PathBuf::from("data"),
            val_split: 0.2,
            seed: 42,
            resplit: false,
        }
    }
}

/// 検出したデータセット構成
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceLayout {
    Csv,
    Folders,
}

/// 整理後の枚数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrganizeSummary {
    pub train_ai: usize,
    pub train_human: usize,
    pub val_ai: usize,
    pub val_human: usize,
}

#[derive(Debug, Deserialize)]
struct LabelRow {
    file_name: String,
    label: u8,
}

/// ソースディレクトリの構成を判定
pub fn detect_layout(source: &Path) -> Option<SourceLayout> {
    if source.join("train.csv").is_file() && source.join("train_data").is_dir() {
        Some(SourceLayout::Csv)
    } else if CLASSES.iter().all(|c| source.join("train").join(c).is_dir()) {
        Some(SourceLayout::Folders)
    } else {
        None
    }
}

/// データセットを整理
pub fn organize_dataset(options: &OrganizeOptions) -> Result<OrganizeSummary> {
    if !(0.0..1.0).contains(&options.val_split) {
        anyhow::bail!("val_split must be in [0, 1), got {}", options.val_split);
    }

    for split in ["train", "val"] {
        for class in CLASSES {
            let dir = options.target_dir.join(split).join(class);
            fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        }
    }

    match detect_layout(&options.source) {
        Some(SourceLayout::Csv) => {
            tracing::info!("Detected CSV-based dataset in {}", options.source.display());
            copy_from_csv(options)?;
            split_train_val(options)?;
        }
        Some(SourceLayout::Folders) => {
            tracing::info!("Detected folder-based dataset in {}", options.source.display());
            copy_from_folders(options)?;
        }
        None => anyhow::bail!(
            "{} contains neither train.csv + train_data/ nor train/{{AI,Human}}",
            options.source.display()
        ),
    }

    let summary = OrganizeSummary {
        train_ai: count_images(&options.target_dir.join("train").join(AI))?,
        train_human: count_images(&options.target_dir.join("train").join(HUMAN))?,
        val_ai: count_images(&options.target_dir.join("val").join(AI))?,
        val_human: count_images(&options.target_dir.join("val").join(HUMAN))?,
    };

    tracing::info!("Dataset organized in {}", options.target_dir.display());
    tracing::info!("  Train AI: {} | Train Human: {}", summary.train_ai, summary.train_human);
    tracing::info!("  Val AI: {} | Val Human: {}", summary.val_ai, summary.val_human);

    Ok(summary)
}

fn copy_from_csv(options: &OrganizeOptions) -> Result<()> {
    let csv_path = options.source.join("train.csv");
    let mut reader = csv::Reader::from_path(&csv_path)
        .with_context(|| format!("Failed to open {}", csv_path.display()))?;

    let (mut copied, mut missing, mut already_in_val) = (0usize, 0usize, 0usize);

    for row in reader.deserialize() {
        let row: LabelRow = row.with_context(|| format!("Invalid row in {}", csv_path.display()))?;
        let class = if row.label == 1 { AI } else { HUMAN };

        let source_path = options.source.join(&row.file_name);
        let Some(file_name) = source_path.file_name() else {
            continue;
        };
        if !source_path.is_file() {
            missing += 1;
            continue;
        }

        // 既に検証側にあるファイルは学習側に戻さない
        if options.target_dir.join("val").join(class).join(file_name).exists() && !options.resplit {
            already_in_val += 1;
            continue;
        }

        let dest = options.target_dir.join("train").join(class).join(file_name);
        fs::copy(&source_path, &dest)
            .with_context(|| format!("Failed to copy {}", source_path.display()))?;
        copied += 1;
    }

    tracing::info!(
        "Copied {} images to train/ ({} listed but missing, {} already in val/)",
        copied,
        missing,
        already_in_val
    );
    Ok(())
}

fn split_train_val(options: &OrganizeOptions) -> Result<()> {
    let val_dir = options.target_dir.join("val");
    let existing_val = count_images(&val_dir.join(AI))? + count_images(&val_dir.join(HUMAN))?;

    if existing_val > 0 {
        if !options.resplit {
            tracing::warn!(
                "{} already holds {} images; keeping the existing split (pass --resplit to redo it)",
                val_dir.display(),
                existing_val
            );
            return Ok(());
        }
        for class in CLASSES {
            move_images(&val_dir.join(class), &options.target_dir.join("train").join(class))?;
        }
    }

    let mut rng = StdRng::seed_from_u64(options.seed);
    for class in CLASSES {
        let train_class_dir = options.target_dir.join("train").join(class);
        let mut files = list_images(&train_class_dir)?;
        files.shuffle(&mut rng);

        let split_idx = (files.len() as f64 * (1.0 - options.val_split)) as usize;
        for file in &files[split_idx..] {
            if let Some(name) = file.file_name() {
                let dest = val_dir.join(class).join(name);
                fs::rename(file, &dest).with_context(|| format!("Failed to move {}", file.display()))?;
            }
        }
        tracing::info!("Moved {} {} images to val/", files.len() - split_idx, class);
    }
    Ok(())
}

fn copy_from_folders(options: &OrganizeOptions) -> Result<()> {
    let source_train = options.source.join("train");
    let source_val = if options.source.join("val").is_dir() {
        options.source.join("val")
    } else {
        options.source.join("test")
    };

    for class in CLASSES {
        copy_images(&source_train.join(class), &options.target_dir.join("train").join(class))?;
        if source_val.join(class).is_dir() {
            copy_images(&source_val.join(class), &options.target_dir.join("val").join(class))?;
        }
    }
    Ok(())
}

/// ディレクトリ直下の画像ファイル（名前順）
fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !dir.is_dir() {
        return Ok(files);
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && is_image_file(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn copy_images(from: &Path, to: &Path) -> Result<()> {
    for file in list_images(from)? {
        if let Some(name) = file.file_name() {
            fs::copy(&file, to.join(name)).with_context(|| format!("Failed to copy {}", file.display()))?;
        }
    }
    Ok(())
}

fn move_images(from: &Path, to: &Path) -> Result<()> {
    for file in list_images(from)? {
        if let Some(name) = file.file_name() {
            fs::rename(&file, to.join(name)).with_context(|| format!("Failed to move {}", file.display()))?;
        }
    }
    Ok(())
}

/// 画像ファイルの枚数（.gitkeep 等は数えない）
pub fn count_images(dir: &Path) -> Result<usize> {
    Ok(list_images(dir)?.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    /// AI 10枚, Human 5枚の CSV 構成を作成
    fn create_csv_source(root: &Path) {
        let data_dir = root.join("train_data");
        fs::create_dir_all(&data_dir).unwrap();

        let mut writer = csv::Writer::from_path(root.join("train.csv")).unwrap();
        writer.write_record(["file_name", "label"]).unwrap();
        for i in 0..15 {
            let name = format!("train_data/img_{:02}.jpg", i);
            fs::write(root.join(&name), b"jpeg bytes").unwrap();
            let label = if i < 10 { "1" } else { "0" };
            writer.write_record([name.as_str(), label]).unwrap();
        }
        // CSV に載っているが存在しないファイル
        writer.write_record(["train_data/missing.jpg", "1"]).unwrap();
        writer.flush().unwrap();
    }

    fn names(dir: &Path) -> HashSet<String> {
        list_images(dir)
            .unwrap()
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect()
    }

    #[test]
    fn test_csv_layout_split_counts() {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        create_csv_source(source.path());

        let options = OrganizeOptions {
            source: source.path().to_path_buf(),
            target_dir: target.path().join("data"),
            ..OrganizeOptions::default()
        };
        let summary = organize_dataset(&options).unwrap();

        assert_eq!(
            summary,
            OrganizeSummary { train_ai: 8, train_human: 4, val_ai: 2, val_human: 1 }
        );
    }

    #[test]
    fn test_rerun_keeps_existing_split_without_leakage() {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        create_csv_source(source.path());

        let options = OrganizeOptions {
            source: source.path().to_path_buf(),
            target_dir: target.path().join("data"),
            ..OrganizeOptions::default()
        };
        let first = organize_dataset(&options).unwrap();
        let val_before = names(&options.target_dir.join("val/AI"));

        let second = organize_dataset(&options).unwrap();
        assert_eq!(first, second);
        assert_eq!(names(&options.target_dir.join("val/AI")), val_before);

        let train_ai = names(&options.target_dir.join("train/AI"));
        assert!(train_ai.is_disjoint(&val_before));
    }

    #[test]
    fn test_resplit_is_deterministic_for_seed() {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        create_csv_source(source.path());

        let mut options = OrganizeOptions {
            source: source.path().to_path_buf(),
            target_dir: target.path().join("data"),
            ..OrganizeOptions::default()
        };
        organize_dataset(&options).unwrap();
        let val_before = names(&options.target_dir.join("val/AI"));

        options.resplit = true;
        let summary = organize_dataset(&options).unwrap();

        assert_eq!(summary.val_ai + summary.train_ai, 10);
        assert_eq!(names(&options.target_dir.join("val/AI")), val_before);
    }

    #[test]
    fn test_folder_layout_uses_test_when_val_missing() {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        for (split, count) in [("train", 3), ("test", 2)] {
            for class in CLASSES {
                let dir = source.path().join(split).join(class);
                fs::create_dir_all(&dir).unwrap();
                for i in 0..count {
                    fs::write(dir.join(format!("{}_{}.png", class, i)), b"png").unwrap();
                }
                fs::write(dir.join(".gitkeep"), b"").unwrap();
            }
        }

        let options = OrganizeOptions {
            source: source.path().to_path_buf(),
            target_dir: target.path().join("data"),
            ..OrganizeOptions::default()
        };
        let summary = organize_dataset(&options).unwrap();

        assert_eq!(
            summary,
            OrganizeSummary { train_ai: 3, train_human: 3, val_ai: 2, val_human: 2 }
        );
    }

    #[test]
    fn test_unknown_layout_is_an_error() {
        let source = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        let options = OrganizeOptions {
            source: source.path().to_path_buf(),
            target_dir: target.path().join("data"),
            ..OrganizeOptions::default()
        };
        assert!(organize_dataset(&options).is_err());
    }
}
