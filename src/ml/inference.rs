//! モデル推論機能

use std::fmt;
use std::path::Path;

use anyhow::Result;
use burn::tensor::{activation::softmax, backend::Backend, Tensor};

use crate::ml::{load_and_normalize_image_with_size, FlowerClassifier, ModelConfig};
use crate::ml::ml_model::NUM_CHANNELS;
use crate::model::{load_model_with_metadata, InferenceConfig, ModelMetadata};

/// 1枚の画像に対する分類結果
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// 最も確率の高いクラスのインデックス
    pub class_index: usize,
    /// そのクラス名
    pub label: String,
    /// そのクラスの確率 [0, 1]
    pub confidence: f32,
    /// 全クラスの確率（合計 1）
    pub probabilities: Vec<f32>,
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PREDICT: This image most likely belongs to {} with a {:.2} percent confidence.",
            self.label,
            100.0 * self.confidence
        )
    }
}

/// 推論エンジン
pub struct InferenceEngine<B: Backend> {
    model: FlowerClassifier<B>,
    config: InferenceConfig,
    device: B::Device,
}

impl<B: Backend> InferenceEngine<B> {
    /// モデルを読み込んで推論エンジンを初期化
    pub fn load<P: AsRef<Path>>(model_path: P, device: B::Device) -> Result<Self> {
        let (metadata, model_binary) = load_model_with_metadata(model_path.as_ref())?;
        Self::from_metadata(&metadata, model_binary, device)
    }

    /// メタデータとモデルバイナリから推論エンジンを初期化
    ///
    /// モデル構造はメタデータのクラス数と入力サイズから再構築する。
    pub fn from_metadata(
        metadata: &ModelMetadata,
        model_binary: Vec<u8>,
        device: B::Device,
    ) -> Result<Self> {
        let config = InferenceConfig::from_metadata(metadata);

        if config.num_classes() == 0 {
            anyhow::bail!("Model metadata does not contain any class names");
        }

        let model_config = model_config(&config);
        model_config.validate_input_size()?;

        let model = model_config
            .init::<B>(&device)
            .load_bytes(model_binary, &device)?;

        Ok(Self {
            model,
            config,
            device,
        })
    }

    /// 学習済み（または初期化直後）のモデルから推論エンジンを作成
    pub fn from_model(model: FlowerClassifier<B>, config: InferenceConfig, device: B::Device) -> Self {
        Self {
            model,
            config,
            device,
        }
    }

    /// 単一画像の各クラスのスコア（ロジット）を計算
    pub fn infer(&self, image_path: &Path) -> Result<Vec<f32>> {
        self.forward_image(image_path, false)
    }

    /// 単一画像を分類
    pub fn classify_image<P: AsRef<Path>>(&self, image_path: P) -> Result<Prediction> {
        let probabilities = self.forward_image(image_path.as_ref(), true)?;

        let (class_index, confidence) = top_class(&probabilities)?;

        let label = self
            .config
            .class_index_to_label(class_index)
            .ok_or_else(|| anyhow::anyhow!("クラスインデックス {} は範囲外です", class_index))?
            .to_string();

        Ok(Prediction {
            class_index,
            label,
            confidence,
            probabilities,
        })
    }

    /// InferenceConfigへの参照を取得
    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    fn forward_image(&self, image_path: &Path, apply_softmax: bool) -> Result<Vec<f32>> {
        let width = self.config.image_width as usize;
        let height = self.config.image_height as usize;
        let image_data = load_and_normalize_image_with_size(image_path, width, height)?;

        // Tensorに変換 [1, 3, height, width]
        let tensor = Tensor::<B, 1>::from_floats(image_data.as_slice(), &self.device)
            .reshape([1, NUM_CHANNELS, height, width]);

        let mut output = self.model.forward(tensor);
        if apply_softmax {
            output = softmax(output, 1);
        }

        output
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| anyhow::anyhow!("推論結果の取得エラー: {:?}", e))
    }
}

/// 最も確率の高いクラスとその確率
///
/// 確率に NaN や無限大が含まれる場合はエラー。
fn top_class(probabilities: &[f32]) -> Result<(usize, f32)> {
    if let Some(bad) = probabilities.iter().find(|p| !p.is_finite()) {
        anyhow::bail!("Model produced a non-finite probability ({})", bad);
    }

    probabilities
        .iter()
        .copied()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .ok_or_else(|| anyhow::anyhow!("Model produced no class scores"))
}

fn model_config(config: &InferenceConfig) -> ModelConfig {
    ModelConfig::new(config.num_classes())
        .with_image_width(config.image_width as usize)
        .with_image_height(config.image_height as usize)
}
