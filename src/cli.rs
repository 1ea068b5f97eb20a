//! コマンドライン引数

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use crate::commands::{predict_command, train_command};
use crate::model::{AppConfig, DeviceType, TrainingConfig};

/// 花の画像分類器の学習と推論
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Train the model using N epochs.
    #[arg(short = 't', long = "train", value_name = "N")]
    pub train: Option<usize>,

    /// Predict an image class. -p <IMG_PATH>
    #[arg(short = 'p', long = "predict", value_name = "IMG_PATH")]
    pub predict: Option<PathBuf>,

    /// 計算デバイス
    #[arg(long, value_enum, default_value_t = DeviceType::Wgpu)]
    pub device: DeviceType,

    /// デバッグログを出力する
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// アプリケーション設定を構築
    pub fn app_config(&self) -> AppConfig {
        AppConfig::default().with_device_type(self.device)
    }

    /// 指定された処理を実行（学習 → 推論の順）
    pub fn run(&self) -> Result<()> {
        self.run_with(&self.app_config())
    }

    pub fn run_with(&self, app: &AppConfig) -> Result<()> {
        if self.train.is_none() && self.predict.is_none() {
            log::debug!("処理が指定されていません");
            return Ok(());
        }

        app.log_info();

        if let Some(num_epochs) = self.train {
            let config = TrainingConfig::new().with_num_epochs(num_epochs);
            train_command(app, &config)?;
        }

        if let Some(image_path) = &self.predict {
            predict_command(app, image_path)?;
        }

        Ok(())
    }
}
