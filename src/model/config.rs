//! アプリケーション設定
//!
//! 計算デバイス、学習ハイパーパラメータ、データセットとモデルの保存先を保持します。
//! 設定ファイルは持たず、コマンドライン引数から構築します。

use std::path::PathBuf;

use burn::config::Config;
use serde::{Deserialize, Serialize};

use crate::dataset::downloader::{default_cache_dir, DATASET_DIR_NAME, DATASET_URL};

/// 学習済みモデルの保存先
pub const MODEL_SAVE_PATH: &str = "./model_save/weights";

/// 計算デバイスの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    #[default]
    Wgpu,
    /// NdArray (CPU) バックエンド
    Cpu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// 学習設定
#[derive(Config, Debug)]
pub struct TrainingConfig {
    /// エポック数
    #[config(default = 2)]
    pub num_epochs: usize,
    /// バッチサイズ
    #[config(default = 32)]
    pub batch_size: usize,
    /// 学習率
    #[config(default = 1e-3)]
    pub learning_rate: f64,
    /// 分割とシャッフルのシード
    #[config(default = 123)]
    pub seed: u64,
    /// 検証データの割合
    #[config(default = 0.2)]
    pub validation_split: f64,
    /// 入力画像の高さ
    #[config(default = 180)]
    pub image_height: usize,
    /// 入力画像の幅
    #[config(default = 180)]
    pub image_width: usize,
}

/// アプリケーション設定
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// 計算デバイスの種類
    pub device_type: DeviceType,
    /// データセットのURL
    pub dataset_url: String,
    /// 展開後のデータセットディレクトリ名
    pub dataset_dir_name: String,
    /// データセットのキャッシュディレクトリ
    pub cache_dir: PathBuf,
    /// 学習済みモデルの保存先
    pub model_path: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            device_type: DeviceType::default(),
            dataset_url: DATASET_URL.to_string(),
            dataset_dir_name: DATASET_DIR_NAME.to_string(),
            cache_dir: default_cache_dir(),
            model_path: PathBuf::from(MODEL_SAVE_PATH),
        }
    }
}

impl AppConfig {
    /// 計算デバイスを設定
    pub fn with_device_type(mut self, device_type: DeviceType) -> Self {
        self.device_type = device_type;
        self
    }

    /// キャッシュディレクトリを設定
    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = cache_dir.into();
        self
    }

    /// モデルの保存先を設定
    pub fn with_model_path(mut self, model_path: impl Into<PathBuf>) -> Self {
        self.model_path = model_path.into();
        self
    }

    /// 設定情報をログに出力
    pub fn log_info(&self) {
        log::info!("計算デバイス: {}", self.device_type);
        log::info!("データセット: {}", self.dataset_url);
        log::info!("キャッシュ: {}", self.cache_dir.display());
        log::info!("モデル保存先: {}", self.model_path.display());
    }
}
