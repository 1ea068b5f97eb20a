//! ラベル付き画像ディレクトリの読み込みと学習/検証分割
//!
//! ディレクトリ直下のサブディレクトリ名をクラス名とし、その中の画像をサンプルとして扱います。

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use burn::data::dataset::Dataset;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::ml::load_and_normalize_image_with_size;
use crate::ml::ml_model::NUM_CHANNELS;

/// 対象とする画像の拡張子
const IMAGE_EXTENSIONS: [&str; 5] = ["bmp", "gif", "jpeg", "jpg", "png"];

/// 画像サンプル（パスとクラスID）
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sample {
    pub path: PathBuf,
    pub label: usize,
}

/// データセットアイテム（デコード済み画像）
#[derive(Clone, Debug)]
pub struct ImageItem {
    /// (C, H, W) の順で平坦化した [0, 1] の画素値
    pub pixels: Vec<f32>,
    pub label: usize,
    pub path: PathBuf,
}

/// ラベル付き画像ディレクトリ
#[derive(Debug)]
pub struct ImageFolder {
    samples: Vec<Sample>,
    class_names: Vec<String>,
}

impl ImageFolder {
    /// ディレクトリを走査してクラスとサンプルを収集
    ///
    /// クラス名はサブディレクトリ名の辞書順。画像のないサブディレクトリもクラスとして数える。
    pub fn scan(root: &Path) -> Result<Self> {
        let mut class_dirs = Vec::new();

        for entry in std::fs::read_dir(root)
            .with_context(|| format!("Failed to read dataset directory: {:?}", root))?
        {
            let path = entry?.path();
            if path.is_dir() {
                class_dirs.push(path);
            }
        }
        class_dirs.sort();

        if class_dirs.is_empty() {
            anyhow::bail!("No class directories found in {}", root.display());
        }

        let mut samples = Vec::new();
        let mut class_names = Vec::with_capacity(class_dirs.len());

        for (class_id, class_dir) in class_dirs.iter().enumerate() {
            let class_name = class_dir
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| anyhow::anyhow!("Invalid directory name: {:?}", class_dir))?
                .to_string();

            let mut images: Vec<PathBuf> = std::fs::read_dir(class_dir)
                .with_context(|| format!("Failed to read class directory: {:?}", class_dir))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| path.is_file() && is_image_file(path))
                .collect();
            images.sort();

            log::debug!("  クラス {}: {} ({} 枚)", class_id, class_name, images.len());

            samples.extend(images.into_iter().map(|path| Sample {
                path,
                label: class_id,
            }));
            class_names.push(class_name);
        }

        if samples.is_empty() {
            anyhow::bail!("No images found in {}", root.display());
        }

        Ok(Self {
            samples,
            class_names,
        })
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// サンプルを学習用と検証用に分割
    ///
    /// 全サンプルをシードでシャッフルし、末尾の `floor(validation_split * n)` 件を検証用とする。
    /// 同じシードと割合なら常に同じ分割になる。
    pub fn split(
        self,
        validation_split: f64,
        seed: u64,
        image_width: usize,
        image_height: usize,
    ) -> Result<(ImageSplit, ImageSplit)> {
        if !(0.0..1.0).contains(&validation_split) {
            anyhow::bail!(
                "validation_split must be in [0, 1), got {}",
                validation_split
            );
        }

        let mut samples = self.samples;
        let mut rng = StdRng::seed_from_u64(seed);
        samples.shuffle(&mut rng);

        let num_valid = (validation_split * samples.len() as f64) as usize;
        let valid_samples = samples.split_off(samples.len() - num_valid);

        let train = ImageSplit {
            samples,
            class_names: self.class_names.clone(),
            image_width,
            image_height,
        };
        let valid = ImageSplit {
            samples: valid_samples,
            class_names: self.class_names,
            image_width,
            image_height,
        };

        Ok((train, valid))
    }
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// 学習用または検証用のサンプル集合
///
/// 画像はアクセス時にデコード・リサイズされる。
#[derive(Clone, Debug)]
pub struct ImageSplit {
    samples: Vec<Sample>,
    class_names: Vec<String>,
    image_width: usize,
    image_height: usize,
}

impl ImageSplit {
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn image_size(&self) -> (usize, usize) {
        (self.image_width, self.image_height)
    }
}

impl Dataset<ImageItem> for ImageSplit {
    fn get(&self, index: usize) -> Option<ImageItem> {
        let sample = self.samples.get(index)?;

        let pixels = match load_and_normalize_image_with_size(
            &sample.path,
            self.image_width,
            self.image_height,
        ) {
            Ok(pixels) => pixels,
            Err(e) => {
                // 読み込めない画像は黒画像で置き換える
                log::warn!("画像読み込み失敗 {}: {:#}", sample.path.display(), e);
                vec![0.0; NUM_CHANNELS * self.image_width * self.image_height]
            }
        };

        Some(ImageItem {
            pixels,
            label: sample.label,
            path: sample.path.clone(),
        })
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// データセットディレクトリを学習用・検証用に分割し、クラス名と共に返す
pub fn partition(
    root: &Path,
    validation_split: f64,
    seed: u64,
    image_width: usize,
    image_height: usize,
) -> Result<(ImageSplit, ImageSplit, Vec<String>)> {
    let folder = ImageFolder::scan(root)?;
    let class_names = folder.class_names().to_vec();

    log::info!(
        "データセット: {} 枚, {} クラス ({})",
        folder.len(),
        folder.num_classes(),
        class_names.join(", ")
    );

    let (train, valid) = folder.split(validation_split, seed, image_width, image_height)?;

    log::info!("学習データ: {} 枚", train.len());
    log::info!("検証データ: {} 枚", valid.len());

    Ok((train, valid, class_names))
}
