//! 機械学習モデルの共通定義
//!
//! 花画像分類用のCNNモデルと画像の読み込み処理を提供します。

use std::path::Path;

use anyhow::{Context, Result};
use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        loss::CrossEntropyLossConfig,
        pool::{MaxPool2d, MaxPool2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{backend::Backend, Int, Tensor},
    train::ClassificationOutput,
};
use image::imageops::FilterType;

/// 入力チャネル数（RGB）
pub const NUM_CHANNELS: usize = 3;

/// プーリング段数。入力サイズは 2^3 以上が必要
const NUM_POOL_STAGES: u32 = 3;

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 分類クラス数
    pub num_classes: usize,
    /// 入力画像の高さ
    #[config(default = 180)]
    pub image_height: usize,
    /// 入力画像の幅
    #[config(default = 180)]
    pub image_width: usize,
    /// 全結合層の隠れユニット数
    #[config(default = 128)]
    pub hidden_size: usize,
    /// ドロップアウト率
    #[config(default = 0.2)]
    pub dropout: f64,
}

impl ModelConfig {
    /// 3段のプーリング後の特徴マップサイズ (高さ, 幅)
    pub fn feature_map_size(&self) -> (usize, usize) {
        let shrink = |size: usize| (0..NUM_POOL_STAGES).fold(size, |s, _| s / 2);
        (shrink(self.image_height), shrink(self.image_width))
    }

    /// 入力サイズが3段のプーリングに耐えるか確認
    pub fn validate_input_size(&self) -> Result<()> {
        let (feature_h, feature_w) = self.feature_map_size();

        if feature_h == 0 || feature_w == 0 {
            anyhow::bail!(
                "Input size {}x{} is too small (at least 8x8 is required)",
                self.image_width,
                self.image_height
            );
        }

        Ok(())
    }

    /// モデルを初期化
    ///
    /// 入力サイズが 8x8 未満の場合は panic する。外部から読み込んだ設定は先に
    /// [`ModelConfig::validate_input_size`] で確認すること。
    pub fn init<B: Backend>(&self, device: &B::Device) -> FlowerClassifier<B> {
        if let Err(e) = self.validate_input_size() {
            panic!("{}", e);
        }
        let (feature_h, feature_w) = self.feature_map_size();

        // 特徴次元 d = 64チャネル * feature_h * feature_w
        let d = 64 * feature_h * feature_w;

        log::debug!("[Model] 入力サイズ: {}x{}", self.image_width, self.image_height);
        log::debug!("[Model] Conv3+Pool3後: 64 x {}x{}", feature_w, feature_h);
        log::debug!("[Model] FC1: {} -> {}", d, self.hidden_size);
        log::debug!("[Model] FC2: {} -> {}", self.hidden_size, self.num_classes);

        FlowerClassifier {
            conv1: Conv2dConfig::new([NUM_CHANNELS, 16], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device),
            conv2: Conv2dConfig::new([16, 32], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device),
            conv3: Conv2dConfig::new([32, 64], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            dropout: DropoutConfig::new(self.dropout).init(),
            fc1: LinearConfig::new(d, self.hidden_size).init(device),
            fc2: LinearConfig::new(self.hidden_size, self.num_classes).init(device),
            activation: Relu::new(),
        }
    }
}

/// 花画像分類用CNNモデル
///
/// # アーキテクチャ
/// - {Conv 3x3 (same padding) + ReLU + MaxPool 2x2} x 3層 (16, 32, 64チャネル)
/// - Flatten + Dropout
/// - FC: d -> hidden + ReLU
/// - FC: hidden -> num_classes
///
/// 出力はロジット。確率が必要な場合は softmax を適用する。
#[derive(Module, Debug)]
pub struct FlowerClassifier<B: Backend> {
    conv1: Conv2d<B>, // 3 -> 16
    conv2: Conv2d<B>, // 16 -> 32
    conv3: Conv2d<B>, // 32 -> 64
    pool: MaxPool2d,

    dropout: Dropout,
    fc1: Linear<B>,
    fc2: Linear<B>,

    activation: Relu,
}

impl<B: Backend> FlowerClassifier<B> {
    /// 順伝播
    ///
    /// - `images`: バッチ画像 [batch_size, 3, height, width]、値域 [0, 1]
    /// - 戻り値: クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        let x = self.conv1.forward(images);
        let x = self.pool.forward(self.activation.forward(x));

        let x = self.conv2.forward(x);
        let x = self.pool.forward(self.activation.forward(x));

        let x = self.conv3.forward(x);
        let x = self.pool.forward(self.activation.forward(x));

        let [_, c, h, w] = x.dims();
        let x = x.reshape([batch_size, c * h * w]);
        let x = self.dropout.forward(x);

        let x = self.fc1.forward(x);
        let x = self.activation.forward(x);

        self.fc2.forward(x)
    }

    /// 順伝播と損失計算（学習用）
    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }

    /// 重みをf32精度のバイナリに書き出す
    pub fn to_bytes(self) -> Result<Vec<u8>> {
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        Recorder::<B>::record(&recorder, self.into_record(), ())
            .map_err(|e| anyhow::anyhow!("モデル重みの書き出しエラー: {:?}", e))
    }

    /// バイナリから重みを復元
    pub fn load_bytes(self, bytes: Vec<u8>, device: &B::Device) -> Result<Self> {
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let record = Recorder::<B>::load(&recorder, bytes, device)
            .map_err(|e| anyhow::anyhow!("モデル重みの読み込みエラー: {:?}", e))?;

        Ok(self.load_record(record))
    }
}

/// 画像を読み込み、指定サイズにリサイズして [0, 1] に正規化
///
/// アスペクト比は保持しない。戻り値は (C, H, W) の順で平坦化したRGBデータ。
pub fn load_and_normalize_image_with_size(
    path: &Path,
    width: usize,
    height: usize,
) -> Result<Vec<f32>> {
    let img = image::open(path)
        .with_context(|| format!("Failed to open image: {}", path.display()))?
        .resize_exact(width as u32, height as u32, FilterType::Triangle)
        .to_rgb8();

    let mut data = Vec::with_capacity(NUM_CHANNELS * width * height);

    for channel in 0..NUM_CHANNELS {
        for y in 0..height as u32 {
            for x in 0..width as u32 {
                let pixel = img.get_pixel(x, y);
                data.push(pixel[channel] as f32 / 255.0);
            }
        }
    }

    Ok(data)
}
