//! 検証データでの評価（混同行列・クラス別指標）

use std::fmt;
use std::path::Path;

use burn::tensor::backend::Backend;
use serde::Serialize;

use crate::error::{DetectorError, Result};
use crate::ml::ml_model::ArtClassifier;
use crate::ml::preprocess::Preprocessor;
use crate::ml::training::{ArtBatcher, ArtDataset};

/// クラス別の指標
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// 評価結果
///
/// `confusion_matrix[actual][predicted]` の件数を保持します。
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub class_names: Vec<String>,
    pub confusion_matrix: Vec<Vec<usize>>,
}

impl EvaluationReport {
    pub fn new(class_names: Vec<String>) -> Self {
        let n = class_names.len();
        Self {
            class_names,
            confusion_matrix: vec![vec![0; n]; n],
        }
    }

    pub fn record(&mut self, actual: usize, predicted: usize) {
        if let Some(cell) = self
            .confusion_matrix
            .get_mut(actual)
            .and_then(|row| row.get_mut(predicted))
        {
            *cell += 1;
        }
    }

    pub fn total(&self) -> usize {
        self.confusion_matrix.iter().flatten().sum()
    }

    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let correct: usize = (0..self.confusion_matrix.len())
            .map(|i| self.confusion_matrix[i][i])
            .sum();
        correct as f64 / total as f64
    }

    pub fn class_metrics(&self, class_id: usize) -> ClassMetrics {
        let n = self.confusion_matrix.len();
        let tp = self.confusion_matrix[class_id][class_id] as f64;
        let predicted: usize = (0..n).map(|i| self.confusion_matrix[i][class_id]).sum();
        let support: usize = self.confusion_matrix[class_id].iter().sum();

        let precision = if predicted > 0 { tp / predicted as f64 } else { 0.0 };
        let recall = if support > 0 { tp / support as f64 } else { 0.0 };
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        ClassMetrics { precision, recall, f1, support }
    }

    /// 単純平均
    pub fn macro_avg(&self) -> ClassMetrics {
        let per_class: Vec<ClassMetrics> = (0..self.class_names.len()).map(|i| self.class_metrics(i)).collect();
        let n = per_class.len().max(1) as f64;
        ClassMetrics {
            precision: per_class.iter().map(|m| m.precision).sum::<f64>() / n,
            recall: per_class.iter().map(|m| m.recall).sum::<f64>() / n,
            f1: per_class.iter().map(|m| m.f1).sum::<f64>() / n,
            support: self.total(),
        }
    }

    /// サポート数で重み付けした平均
    pub fn weighted_avg(&self) -> ClassMetrics {
        let total = self.total();
        let per_class: Vec<ClassMetrics> = (0..self.class_names.len()).map(|i| self.class_metrics(i)).collect();
        let weight = |m: &ClassMetrics| m.support as f64 / total.max(1) as f64;
        ClassMetrics {
            precision: per_class.iter().map(|m| m.precision * weight(m)).sum(),
            recall: per_class.iter().map(|m| m.recall * weight(m)).sum(),
            f1: per_class.iter().map(|m| m.f1 * weight(m)).sum(),
            support: total,
        }
    }

    /// 混同行列をテキストの表に整形（行: 正解, 列: 予測）
    pub fn confusion_table(&self) -> String {
        let width = self
            .class_names
            .iter()
            .map(|n| n.len())
            .chain(self.confusion_matrix.iter().flatten().map(|c| c.to_string().len()))
            .max()
            .unwrap_or(1)
            .max(8);

        let mut out = format!("{:>width$}", "actual\\pred", width = width + 4);
        for name in &self.class_names {
            out.push_str(&format!(" {:>width$}", name, width = width));
        }
        out.push('\n');
        for (name, row) in self.class_names.iter().zip(&self.confusion_matrix) {
            out.push_str(&format!("{:>width$}", name, width = width + 4));
            for count in row {
                out.push_str(&format!(" {:>width$}", count, width = width));
            }
            out.push('\n');
        }
        out
    }

    /// 混同行列をCSVで保存
    pub fn write_confusion_csv(&self, path: &Path) -> anyhow::Result<()> {
        let mut writer = csv::Writer::from_path(path)?;

        let mut header = vec!["actual".to_string()];
        header.extend(self.class_names.iter().cloned());
        writer.write_record(&header)?;

        for (name, row) in self.class_names.iter().zip(&self.confusion_matrix) {
            let mut record = vec![name.clone()];
            record.extend(row.iter().map(|c| c.to_string()));
            writer.write_record(&record)?;
        }

        writer.flush()?;
        Ok(())
    }
}

impl fmt::Display for EvaluationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self.class_names.iter().map(|n| n.len()).max().unwrap_or(0).max(12);

        writeln!(
            f,
            "{:>width$} {:>9} {:>9} {:>9} {:>9}",
            "", "precision", "recall", "f1-score", "support",
            width = width
        )?;
        writeln!(f)?;
        for (i, name) in self.class_names.iter().enumerate() {
            let m = self.class_metrics(i);
            writeln!(
                f,
                "{:>width$} {:>9.4} {:>9.4} {:>9.4} {:>9}",
                name, m.precision, m.recall, m.f1, m.support,
                width = width
            )?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>width$} {:>9} {:>9} {:>9.4} {:>9}",
            "accuracy", "", "", self.accuracy(), self.total(),
            width = width
        )?;
        for (label, m) in [("macro avg", self.macro_avg()), ("weighted avg", self.weighted_avg())] {
            writeln!(
                f,
                "{:>width$} {:>9.4} {:>9.4} {:>9.4} {:>9}",
                label, m.precision, m.recall, m.f1, m.support,
                width = width
            )?;
        }
        Ok(())
    }
}

/// データセット全体を推論して評価結果を作成
pub fn evaluate_model<B: Backend>(
    model: &ArtClassifier<B>,
    dataset: &ArtDataset,
    image_size: usize,
    batch_size: usize,
    device: &B::Device,
) -> Result<EvaluationReport> {
    if batch_size == 0 {
        return Err(DetectorError::Config("batch_size must be at least 1".to_string()));
    }

    let batcher = ArtBatcher::<B>::new(device.clone(), Preprocessor::eval(image_size));
    let mut report = EvaluationReport::new(dataset.class_names().to_vec());
    let mut rng = rand::thread_rng();

    for chunk in dataset.samples().chunks(batch_size) {
        let batch = batcher.batch(chunk, &mut rng)?;
        let (predictions, _) = model.predict(batch.images);

        let predictions = predictions
            .reshape([chunk.len()])
            .into_data()
            .convert::<i64>()
            .to_vec::<i64>()
            .map_err(|e| DetectorError::Model(format!("failed to read predictions: {:?}", e)))?;

        for (item, predicted) in chunk.iter().zip(predictions) {
            report.record(item.label, predicted as usize);
        }
    }

    tracing::debug!("evaluated {} images", report.total());
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::ml_model::ModelConfig;
    use crate::ml::resnet::Backbone;
    use crate::ml::training::tests::create_dataset;
    use burn_ndarray::{NdArray, NdArrayDevice};
    use tempfile::TempDir;

    fn hand_built_report() -> EvaluationReport {
        // 正解 AI: 8件中 6件正解, 正解 Human: 4件中 3件正解
        let mut report = EvaluationReport::new(vec!["AI".to_string(), "Human".to_string()]);
        report.confusion_matrix = vec![vec![6, 2], vec![1, 3]];
        report
    }

    #[test]
    fn test_metrics_from_confusion_matrix() {
        let report = hand_built_report();

        assert_eq!(report.total(), 12);
        assert!((report.accuracy() - 0.75).abs() < 1e-9);

        let ai = report.class_metrics(0);
        assert!((ai.precision - 6.0 / 7.0).abs() < 1e-9);
        assert!((ai.recall - 0.75).abs() < 1e-9);
        assert_eq!(ai.support, 8);

        let human = report.class_metrics(1);
        assert!((human.precision - 0.6).abs() < 1e-9);
        assert!((human.recall - 0.75).abs() < 1e-9);
        assert!((human.f1 - 2.0 * 0.6 * 0.75 / 1.35).abs() < 1e-9);
    }

    #[test]
    fn test_averages() {
        let report = hand_built_report();
        let macro_avg = report.macro_avg();
        let weighted = report.weighted_avg();

        assert!((macro_avg.recall - 0.75).abs() < 1e-9);
        let expected = (6.0 / 7.0) * (8.0 / 12.0) + 0.6 * (4.0 / 12.0);
        assert!((weighted.precision - expected).abs() < 1e-9);
        assert_eq!(weighted.support, 12);
    }

    #[test]
    fn test_empty_report_has_zero_metrics() {
        let report = EvaluationReport::new(vec!["AI".to_string(), "Human".to_string()]);
        assert_eq!(report.accuracy(), 0.0);
        assert_eq!(report.class_metrics(0).f1, 0.0);
    }

    #[test]
    fn test_report_rendering() {
        let report = hand_built_report();
        let text = report.to_string();
        assert!(text.contains("precision"));
        assert!(text.contains("weighted avg"));
        assert!(text.contains("0.7500"));

        let table = report.confusion_table();
        assert_eq!(table.lines().count(), 3);
    }

    #[test]
    fn test_confusion_csv() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("confusion.csv");
        hand_built_report().write_confusion_csv(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines, vec!["actual,AI,Human", "AI,6,2", "Human,1,3"]);
    }

    #[test]
    fn test_evaluate_model_counts_every_image() {
        let temp_dir = TempDir::new().unwrap();
        create_dataset(temp_dir.path(), "val", &[("AI", [255, 0, 0]), ("Human", [0, 0, 255])], 3);
        let dataset = ArtDataset::new(temp_dir.path(), "val", None).unwrap();

        let device = NdArrayDevice::Cpu;
        let model = ModelConfig::new(2)
            .with_backbone(Backbone::ResNet18)
            .init::<NdArray>(&device);

        let report = evaluate_model(&model, &dataset, 32, 4, &device).unwrap();
        assert_eq!(report.total(), 6);
        assert_eq!(report.class_metrics(0).support, 3);
    }
}
