//! モデルメタデータを使用した推論設定
//!
//! 保存されたモデルメタデータから推論に必要な情報を取得します。

use crate::model::model_metadata::ModelMetadata;

/// モデルメタデータから推論用情報を取得
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceConfig {
    /// 全クラスラベル（インデックス順）
    pub class_names: Vec<String>,

    /// モデル入力解像度
    pub image_width: u32,
    pub image_height: u32,
}

impl InferenceConfig {
    /// メタデータからInferenceConfigを作成
    pub fn from_metadata(metadata: &ModelMetadata) -> Self {
        Self {
            class_names: metadata.class_names.clone(),
            image_width: metadata.image_width,
            image_height: metadata.image_height,
        }
    }

    /// クラス数を取得
    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    /// クラスインデックスからラベルを取得
    pub fn class_index_to_label(&self, index: usize) -> Option<&str> {
        self.class_names.get(index).map(String::as_str)
    }

    /// 設定情報をログに出力
    pub fn log_info(&self) {
        log::info!(
            "推論設定: {} クラス ({}), 入力サイズ {}x{}",
            self.num_classes(),
            self.class_names.join(", "),
            self.image_width,
            self.image_height
        );
    }
}
