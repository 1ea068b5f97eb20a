//! モデルメタデータの定義
//!
//! 学習済みの重みと一緒に保存され、推論時にクラス名の順序と入力サイズを復元します。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ml::training::EpochMetrics;
use crate::model::config::TrainingConfig;

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// クラス名（インデックス順）
    /// 学習時のディレクトリ走査結果をそのまま保存する
    #[serde(default)]
    pub class_names: Vec<String>,

    /// モデル入力画像の幅（ピクセル）
    pub image_width: u32,

    /// モデル入力画像の高さ（ピクセル）
    pub image_height: u32,

    /// 学習エポック数
    pub num_epochs: u32,

    /// バッチサイズ
    pub batch_size: u32,

    /// 学習率
    pub learning_rate: f64,

    /// 検証データの割合
    pub validation_split: f64,

    /// 分割シード
    pub seed: u64,

    /// モデルの学習時刻（ISO8601形式）
    pub trained_at: String,

    /// エポックごとの損失と精度
    #[serde(default)]
    pub history: Vec<EpochMetrics>,
}

impl ModelMetadata {
    /// 学習設定と結果から新しいメタデータを作成
    pub fn new(
        class_names: Vec<String>,
        config: &TrainingConfig,
        history: Vec<EpochMetrics>,
    ) -> Self {
        let trained_at = chrono::Local::now().to_rfc3339();

        Self {
            class_names,
            image_width: config.image_width as u32,
            image_height: config.image_height as u32,
            num_epochs: config.num_epochs as u32,
            batch_size: config.batch_size as u32,
            learning_rate: config.learning_rate,
            validation_split: config.validation_split,
            seed: config.seed,
            trained_at,
            history,
        }
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize metadata from JSON")
    }
}
