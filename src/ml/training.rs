//! データセットの読み込みとモデル学習
//!
//! データセットは `<root>/<split>/<class>/<image>` の構成を想定します。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use burn::{
    data::dataset::Dataset,
    module::AutodiffModule,
    optim::{AdamWConfig, GradientsParams, Optimizer},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion, Int, Tensor,
    },
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::error::{DetectorError, Result};
use crate::ml::checkpoint::save_checkpoint;
use crate::ml::ml_model::{default_class_names, ArtClassifier, ModelConfig};
use crate::ml::preprocess::{Preprocessor, IMAGE_SIZE};
use crate::ml::resnet::Backbone;
use crate::model::CheckpointMetadata;

/// 画像として扱う拡張子（小文字）
pub const IMAGE_EXTENSIONS: [&str; 8] = ["jpg", "jpeg", "png", "gif", "bmp", "tiff", "tif", "webp"];

/// 拡張子が許可リストに含まれるか（大文字小文字は区別しない）
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// 画像データセット（パスのリストのみ保持）
#[derive(Debug, Clone)]
pub struct ArtDataset {
    root: PathBuf,
    samples: Vec<ArtItem>,
    class_names: Vec<String>,
    class_to_idx: HashMap<String, usize>,
}

/// データセットアイテム（画像パスとクラスID）
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtItem {
    pub path: PathBuf,
    pub label: usize,
}

impl ArtDataset {
    /// `<root>/<split>` を走査してデータセットを構築
    ///
    /// `class_names` を指定した場合はその順序でクラスIDを割り当てます。
    /// 指定しない場合はサブディレクトリ名を辞書順に並べたものを使います。
    pub fn new(root: &Path, split: &str, class_names: Option<&[String]>) -> Result<Self> {
        let split_dir = root.join(split);
        if !split_dir.is_dir() {
            return Err(DetectorError::MissingDirectory(split_dir));
        }

        let class_names = match class_names {
            Some(names) => names.to_vec(),
            None => Self::discover_classes(&split_dir)?,
        };

        let class_to_idx: HashMap<String, usize> = class_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();

        let mut samples = Vec::new();
        for (label, class_name) in class_names.iter().enumerate() {
            let class_dir = split_dir.join(class_name);
            if !class_dir.is_dir() {
                tracing::warn!("class directory {} is missing, skipping", class_dir.display());
                continue;
            }

            let mut files = Vec::new();
            for entry in std::fs::read_dir(&class_dir)? {
                let path = entry?.path();
                if path.is_file() && is_image_file(&path) {
                    files.push(path);
                }
            }
            files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

            samples.extend(files.into_iter().map(|path| ArtItem { path, label }));
        }

        tracing::debug!(
            "indexed {} images in {} ({} classes)",
            samples.len(),
            split_dir.display(),
            class_names.len()
        );

        Ok(Self {
            root: split_dir,
            samples,
            class_names,
            class_to_idx,
        })
    }

    fn discover_classes(split_dir: &Path) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(split_dir)? {
            let path = entry?.path();
            if path.is_dir() {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// 走査したディレクトリ（`<root>/<split>`）
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    pub fn class_to_idx(&self) -> &HashMap<String, usize> {
        &self.class_to_idx
    }

    pub fn samples(&self) -> &[ArtItem] {
        &self.samples
    }

    /// クラスごとの画像枚数（クラスID順）
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.class_names.len()];
        for item in &self.samples {
            counts[item.label] += 1;
        }
        counts
    }
}

impl Dataset<ArtItem> for ArtDataset {
    fn get(&self, index: usize) -> Option<ArtItem> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// バッチデータ
#[derive(Clone, Debug)]
pub struct ArtBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

/// バッチャー
///
/// 画像の読み込みに失敗した場合はバッチ全体をエラーとします。
#[derive(Clone, Debug)]
pub struct ArtBatcher<B: Backend> {
    device: B::Device,
    preprocessor: Preprocessor,
}

impl<B: Backend> ArtBatcher<B> {
    pub fn new(device: B::Device, preprocessor: Preprocessor) -> Self {
        Self { device, preprocessor }
    }

    pub fn batch<R: Rng + ?Sized>(&self, items: &[ArtItem], rng: &mut R) -> Result<ArtBatch<B>> {
        let batch_size = items.len();
        let size = self.preprocessor.image_size();
        let mut all_pixels = Vec::with_capacity(batch_size * self.preprocessor.tensor_len());
        let mut targets_vec = Vec::with_capacity(batch_size);

        for item in items {
            let image_data = self.preprocessor.load(&item.path, rng)?;
            all_pixels.extend_from_slice(&image_data);
            targets_vec.push(item.label as i64);
        }

        // 1回の転送でバッチ全体をデバイスへ
        let images = Tensor::<B, 1>::from_floats(all_pixels.as_slice(), &self.device)
            .reshape([batch_size, 3, size, size]);
        let targets = Tensor::<B, 1, Int>::from_ints(targets_vec.as_slice(), &self.device);

        Ok(ArtBatch { images, targets })
    }
}

/// 学習オプション
#[derive(Debug, Clone)]
pub struct TrainOptions {
    pub data_dir: PathBuf,
    pub checkpoint_path: PathBuf,
    pub num_epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub weight_decay: f32,
    pub image_size: usize,
    pub num_classes: usize,
    pub backbone: Backbone,
    /// `None` の場合はランダム初期化
    pub pretrained_weights: Option<PathBuf>,
    pub seed: u64,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            checkpoint_path: PathBuf::from("models/detector.tar.gz"),
            num_epochs: 10,
            batch_size: 32,
            learning_rate: 1e-4,
            weight_decay: 1e-4,
            image_size: IMAGE_SIZE,
            num_classes: 2,
            backbone: Backbone::ResNet50,
            pretrained_weights: None,
            seed: 42,
        }
    }
}

/// 1エポック分の指標
#[derive(Debug, Clone, PartialEq)]
pub struct EpochStats {
    /// 1始まり
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    /// このエポックでチェックポイントを保存したか
    pub saved: bool,
}

/// 学習結果
#[derive(Debug, Clone)]
pub struct TrainingSummary {
    pub best_val_accuracy: f64,
    pub epochs: Vec<EpochStats>,
    pub checkpoint_saved: bool,
}

/// 損失と正解数の累積（バッチサイズで重み付け）
#[derive(Debug, Default)]
struct RunningMetrics {
    loss_sum: f64,
    correct: usize,
}

impl RunningMetrics {
    fn update<B: Backend>(&mut self, loss: Tensor<B, 1>, output: Tensor<B, 2>, targets: Tensor<B, 1, Int>) {
        let batch_size = targets.dims()[0];
        let loss_value: f64 = loss.into_scalar().elem();
        self.loss_sum += loss_value * batch_size as f64;

        let predictions = output.argmax(1).reshape([batch_size]);
        let batch_correct: i64 = predictions
            .equal(targets)
            .int()
            .sum()
            .into_scalar()
            .elem();
        self.correct += batch_correct as usize;
    }

    fn averages(&self, len: usize) -> (f64, f64) {
        if len == 0 {
            return (0.0, 0.0);
        }
        (self.loss_sum / len as f64, self.correct as f64 / len as f64)
    }
}

/// モデル学習を実行
///
/// 毎エポック後に検証を行い、検証精度がそれまでの最高値を上回った場合のみ
/// チェックポイントを上書き保存します。`progress` には各エポックの指標が渡されます。
pub fn train_model<B, F>(
    options: &TrainOptions,
    device: &B::Device,
    mut progress: F,
) -> Result<TrainingSummary>
where
    B: AutodiffBackend,
    F: FnMut(&EpochStats),
{
    if options.batch_size == 0 {
        return Err(DetectorError::Config("batch_size must be at least 1".to_string()));
    }

    if let Some(parent) = options.checkpoint_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    // 2クラスの場合は ["AI", "Human"] 固定、それ以外はフォルダ名の辞書順
    let class_names = if options.num_classes == 2 {
        Some(default_class_names(2))
    } else {
        None
    };
    let train_dataset = ArtDataset::new(&options.data_dir, "train", class_names.as_deref())?;
    let val_dataset = ArtDataset::new(
        &options.data_dir,
        "val",
        Some(train_dataset.class_names()),
    )?;

    if train_dataset.num_classes() != options.num_classes {
        return Err(DetectorError::Config(format!(
            "num_classes is {} but {} has {} class folders",
            options.num_classes,
            train_dataset.root().display(),
            train_dataset.num_classes()
        )));
    }
    if train_dataset.samples().is_empty() {
        return Err(DetectorError::EmptyDataset(train_dataset.root().to_path_buf()));
    }

    tracing::info!("Classes: {:?}", train_dataset.class_names());
    tracing::info!(
        "Train samples: {} {:?} | Val samples: {} {:?}",
        train_dataset.len(),
        train_dataset.class_counts(),
        val_dataset.len(),
        val_dataset.class_counts()
    );

    let model_config = ModelConfig::new(options.num_classes)
        .with_backbone(options.backbone)
        .with_image_size(options.image_size);
    let mut model: ArtClassifier<B> = match &options.pretrained_weights {
        Some(weights) => model_config.init_pretrained::<B>(weights, device)?,
        None => model_config.init::<B>(device),
    };

    let mut optimizer = AdamWConfig::new()
        .with_weight_decay(options.weight_decay)
        .init();

    let train_batcher = ArtBatcher::<B>::new(device.clone(), Preprocessor::train(options.image_size));
    let val_batcher =
        ArtBatcher::<B::InnerBackend>::new(device.clone(), Preprocessor::eval(options.image_size));

    let mut rng = StdRng::seed_from_u64(options.seed);
    let mut best_val_accuracy = 0.0f64;
    let mut epochs = Vec::with_capacity(options.num_epochs);

    tracing::info!(
        "Training {} for {} epochs (batch_size={}, lr={}, weight_decay={})",
        options.backbone,
        options.num_epochs,
        options.batch_size,
        options.learning_rate,
        options.weight_decay
    );

    for epoch in 1..=options.num_epochs {
        // 学習フェーズ
        let mut indices: Vec<usize> = (0..train_dataset.len()).collect();
        indices.shuffle(&mut rng);

        let mut train_metrics = RunningMetrics::default();
        for chunk in indices.chunks(options.batch_size) {
            let items: Vec<ArtItem> = chunk.iter().filter_map(|&i| train_dataset.get(i)).collect();
            let batch = train_batcher.batch(&items, &mut rng)?;

            let output = model.forward_classification(batch.images, batch.targets);
            train_metrics.update(output.loss.clone(), output.output, output.targets);

            let grads = output.loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optimizer.step(options.learning_rate, model, grads);
        }
        let (train_loss, train_accuracy) = train_metrics.averages(train_dataset.len());

        // 検証フェーズ
        let inner_model = model.clone().valid();
        let (val_loss, val_accuracy) = validate(&inner_model, &val_dataset, &val_batcher, options.batch_size)?;

        tracing::info!(
            "Epoch {}/{}: train_loss={:.4} acc={:.4} | val_loss={:.4} acc={:.4}",
            epoch,
            options.num_epochs,
            train_loss,
            train_accuracy,
            val_loss,
            val_accuracy
        );

        let saved = val_accuracy > best_val_accuracy;
        if saved {
            best_val_accuracy = val_accuracy;
            let metadata = CheckpointMetadata::new(
                train_dataset.class_names().to_vec(),
                options.backbone,
                options.image_size,
                epoch,
                options.num_epochs,
                val_accuracy,
                val_loss,
            );
            save_checkpoint(&options.checkpoint_path, &metadata, &inner_model)?;
            tracing::info!(
                "Saved best model to {} (val_acc={:.4})",
                options.checkpoint_path.display(),
                val_accuracy
            );
        }

        let stats = EpochStats {
            epoch,
            train_loss,
            train_accuracy,
            val_loss,
            val_accuracy,
            saved,
        };
        progress(&stats);
        epochs.push(stats);
    }

    let checkpoint_saved = epochs.iter().any(|e| e.saved);
    tracing::info!("Training complete. Best val_acc={:.4}", best_val_accuracy);

    Ok(TrainingSummary {
        best_val_accuracy,
        epochs,
        checkpoint_saved,
    })
}

/// 検証データで損失と精度を計算（順序固定・勾配なし）
fn validate<B: Backend>(
    model: &ArtClassifier<B>,
    dataset: &ArtDataset,
    batcher: &ArtBatcher<B>,
    batch_size: usize,
) -> Result<(f64, f64)> {
    let mut metrics = RunningMetrics::default();
    // 評価用の前処理は乱数を使わない
    let mut rng = StdRng::seed_from_u64(0);

    for chunk in dataset.samples().chunks(batch_size) {
        let batch = batcher.batch(chunk, &mut rng)?;
        let output = model.forward_classification(batch.images, batch.targets);
        metrics.update(output.loss, output.output, output.targets);
    }

    Ok(metrics.averages(dataset.len()))
}
