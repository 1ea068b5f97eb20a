pub mod ml_model;
pub mod training;
pub mod inference;

pub use ml_model::{FlowerClassifier, ModelConfig, load_and_normalize_image_with_size};
pub use training::{EpochMetrics, ImageBatch, ImageBatcher, TrainingOutcome, train_model};
pub use inference::{InferenceEngine, Prediction};
