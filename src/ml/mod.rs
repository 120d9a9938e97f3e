pub mod resnet;
pub mod pretrained;
pub mod preprocess;
pub mod ml_model;
pub mod checkpoint;
pub mod training;
pub mod inference;
pub mod evaluation;

pub use resnet::Backbone;
pub use preprocess::{Preprocessor, IMAGENET_MEAN, IMAGENET_STD, IMAGE_SIZE};
pub use ml_model::{ArtClassifier, ModelConfig, NUM_CLASSES, DEFAULT_CLASS_NAMES, default_class_names};
pub use checkpoint::{save_checkpoint, load_checkpoint};
pub use training::{ArtDataset, ArtItem, ArtBatcher, TrainOptions, EpochStats, TrainingSummary, train_model, IMAGE_EXTENSIONS, is_image_file};
pub use inference::{ArtDetector, ImageClassifier, PredictionResult};
pub use evaluation::{EvaluationReport, ClassMetrics, evaluate_model};
