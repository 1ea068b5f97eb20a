//! 学習・推論コマンド
//!
//! データセット取得から重み保存までの学習処理と、保存済みモデルによる画像分類を
//! 計算デバイスごとのバックエンドに振り分けて実行します。

use std::path::{Path, PathBuf};

use anyhow::Result;
use burn::{
    backend::{Autodiff, NdArray},
    module::AutodiffModule,
    tensor::backend::{AutodiffBackend, Backend},
};
use burn_ndarray::NdArrayDevice;

use crate::dataset::{fetch_dataset, partition, tune, ImageFolder};
use crate::ml::{train_model, FlowerClassifier, InferenceEngine, ModelConfig, Prediction};
use crate::model::{
    load_model_with_metadata, log_metadata_info, save_model_with_metadata, AppConfig, DeviceType,
    ModelMetadata, TrainingConfig,
};

/// 学習済みモデルとそのメタデータ
#[derive(Debug)]
pub struct TrainedModel<B: Backend> {
    pub model: FlowerClassifier<B>,
    pub metadata: ModelMetadata,
}

/// データセットを取得して学習し、モデルを保存する
///
/// 保存したファイルのパスを返す。
pub fn train_command(app: &AppConfig, config: &TrainingConfig) -> Result<PathBuf> {
    log::info!("使用デバイス: {}", app.device_type);

    match app.device_type {
        DeviceType::Wgpu => train_on_wgpu(app, config),
        DeviceType::Cpu => run_training::<Autodiff<NdArray>>(app, config, &NdArrayDevice::Cpu),
    }
}

/// 保存済みモデルで1枚の画像を分類し、結果を標準出力に表示する
pub fn predict_command(app: &AppConfig, image_path: &Path) -> Result<Prediction> {
    log::info!("使用デバイス: {}", app.device_type);

    match app.device_type {
        DeviceType::Wgpu => predict_on_wgpu(app, image_path),
        DeviceType::Cpu => run_prediction::<NdArray>(app, image_path, NdArrayDevice::Cpu),
    }
}

#[cfg(feature = "wgpu")]
fn train_on_wgpu(app: &AppConfig, config: &TrainingConfig) -> Result<PathBuf> {
    use burn::backend::Wgpu;
    use burn_wgpu::WgpuDevice;

    run_training::<Autodiff<Wgpu>>(app, config, &WgpuDevice::default())
}

#[cfg(not(feature = "wgpu"))]
fn train_on_wgpu(_app: &AppConfig, _config: &TrainingConfig) -> Result<PathBuf> {
    anyhow::bail!("WGPU backend is not enabled in this build; use --device cpu")
}

#[cfg(feature = "wgpu")]
fn predict_on_wgpu(app: &AppConfig, image_path: &Path) -> Result<Prediction> {
    use burn::backend::Wgpu;
    use burn_wgpu::WgpuDevice;

    run_prediction::<Wgpu>(app, image_path, WgpuDevice::default())
}

#[cfg(not(feature = "wgpu"))]
fn predict_on_wgpu(_app: &AppConfig, _image_path: &Path) -> Result<Prediction> {
    anyhow::bail!("WGPU backend is not enabled in this build; use --device cpu")
}

fn run_training<B: AutodiffBackend>(
    app: &AppConfig,
    config: &TrainingConfig,
    device: &B::Device,
) -> Result<PathBuf> {
    log::info!("Starting training...");
    log::debug!("デバイス: {:?}", device);

    let data_dir = fetch_dataset(&app.dataset_url, &app.cache_dir, &app.dataset_dir_name)?;
    let trained = train_from_directory::<B>(&data_dir, config, device)?;

    let model_binary = trained.model.to_bytes()?;
    let saved_path = save_model_with_metadata(&app.model_path, &trained.metadata, &model_binary)?;

    log::info!("モデルを保存しました: {}", saved_path.display());
    log::info!("Finished training.");

    Ok(saved_path)
}

/// データセットディレクトリから学習する
///
/// 分割 → パイプライン調整 → モデル構築 → 学習 の順に実行し、
/// 推論用（勾配なし）のモデルと保存用メタデータを返す。
pub fn train_from_directory<B: AutodiffBackend>(
    data_dir: &Path,
    config: &TrainingConfig,
    device: &B::Device,
) -> Result<TrainedModel<B::InnerBackend>> {
    let (train, valid, class_names) = partition(
        data_dir,
        config.validation_split,
        config.seed,
        config.image_width,
        config.image_height,
    )?;

    let (dataloader_train, dataloader_valid) =
        tune::<B>(train, valid, config.batch_size, config.seed);

    let model = ModelConfig::new(class_names.len())
        .with_image_height(config.image_height)
        .with_image_width(config.image_width)
        .init::<B>(device);

    let outcome = train_model(model, dataloader_train, dataloader_valid, config);
    let metadata = ModelMetadata::new(class_names, config, outcome.history);

    Ok(TrainedModel {
        model: outcome.model.valid(),
        metadata,
    })
}

fn run_prediction<B: Backend>(
    app: &AppConfig,
    image_path: &Path,
    device: B::Device,
) -> Result<Prediction> {
    log::info!("Predicting images...");

    let (mut metadata, model_binary) = load_model_with_metadata(&app.model_path)?;
    log_metadata_info(&metadata);

    if metadata.class_names.is_empty() {
        log::warn!("モデルにクラス名が保存されていません。データセットから復元します");
        let data_dir = fetch_dataset(&app.dataset_url, &app.cache_dir, &app.dataset_dir_name)?;
        metadata.class_names = ImageFolder::scan(&data_dir)?.class_names().to_vec();
    }

    let engine = InferenceEngine::<B>::from_metadata(&metadata, model_binary, device)?;
    engine.config().log_info();

    let prediction = engine.classify_image(image_path)?;
    println!("{}", prediction);

    log::info!("Finished predictions.");

    Ok(prediction)
}
