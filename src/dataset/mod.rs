//! データセットの取得・分割・読み込みパイプライン

pub mod downloader;
pub mod image_folder;
pub mod pipeline;

pub use downloader::{
    default_cache_dir, extract_archive, fetch_dataset, install_archive, DATASET_DIR_NAME, DATASET_URL,
};
pub use image_folder::{partition, ImageFolder, ImageItem, ImageSplit, Sample};
pub use pipeline::{build_loader, tune, CachedDataset, PipelinePolicy};
