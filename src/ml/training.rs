//! モデル学習
//!
//! バッチ作成と、エポックごとに学習・検証を行う学習ループを提供します。

use std::sync::Arc;

use burn::{
    data::dataloader::{batcher::Batcher, DataLoader},
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion, Int, Tensor,
    },
    train::ClassificationOutput,
};
use serde::{Deserialize, Serialize};

use crate::dataset::image_folder::ImageItem;
use crate::ml::ml_model::{FlowerClassifier, NUM_CHANNELS};
use crate::model::config::TrainingConfig;

/// バッチャー
#[derive(Clone, Debug)]
pub struct ImageBatcher {
    width: usize,
    height: usize,
}

impl ImageBatcher {
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }
}

impl<B: Backend> Batcher<B, ImageItem, ImageBatch<B>> for ImageBatcher {
    fn batch(&self, items: Vec<ImageItem>, device: &B::Device) -> ImageBatch<B> {
        let batch_size = items.len();
        let mut all_pixels = Vec::with_capacity(batch_size * NUM_CHANNELS * self.width * self.height);
        let mut targets_vec = Vec::with_capacity(batch_size);

        for item in items {
            all_pixels.extend_from_slice(&item.pixels);
            targets_vec.push(item.label as i64);
        }

        // 1回の転送でバッチ全体をデバイスへ
        let images = Tensor::<B, 1>::from_floats(all_pixels.as_slice(), device).reshape([
            batch_size,
            NUM_CHANNELS,
            self.height,
            self.width,
        ]);
        let targets = Tensor::<B, 1, Int>::from_ints(targets_vec.as_slice(), device);

        ImageBatch { images, targets }
    }
}

/// バッチデータ
#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

/// 1エポック分の損失と精度
///
/// サンプルが1件もない場合、損失と精度は 0 になる。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub valid_loss: f64,
    pub valid_accuracy: f64,
}

/// 学習結果
#[derive(Debug)]
pub struct TrainingOutcome<B: AutodiffBackend> {
    pub model: FlowerClassifier<B>,
    pub history: Vec<EpochMetrics>,
}

#[derive(Default)]
struct MetricAccumulator {
    loss_sum: f64,
    correct: usize,
    total: usize,
}

impl MetricAccumulator {
    fn update<B: Backend>(&mut self, output: &ClassificationOutput<B>) {
        let [batch_size] = output.targets.dims();
        let loss = output.loss.clone().into_scalar().elem::<f64>();

        // argmax(1) は [batch, 1] を返すので平坦化して比較する
        let predicted = output.output.clone().argmax(1).flatten::<1>(0, 1);
        let correct = predicted
            .equal(output.targets.clone())
            .int()
            .sum()
            .into_scalar()
            .elem::<i64>();

        self.loss_sum += loss * batch_size as f64;
        self.correct += correct as usize;
        self.total += batch_size;
    }

    fn loss(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.loss_sum / self.total as f64
        }
    }

    fn accuracy(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }
}

/// モデル学習を実行
///
/// `config.num_epochs` 回、学習データで Adam による更新を行い、各エポック後に検証データで評価する。
/// エポック数が 0 の場合は一度も更新せずにモデルをそのまま返す。
pub fn train_model<B: AutodiffBackend>(
    model: FlowerClassifier<B>,
    dataloader_train: Arc<dyn DataLoader<B, ImageBatch<B>>>,
    dataloader_valid: Arc<dyn DataLoader<B::InnerBackend, ImageBatch<B::InnerBackend>>>,
    config: &TrainingConfig,
) -> TrainingOutcome<B> {
    let mut model = model;
    let mut optim = AdamConfig::new().init::<B, FlowerClassifier<B>>();
    let mut history = Vec::with_capacity(config.num_epochs);

    log::info!(
        "学習を開始します: エポック数 {}, バッチサイズ {}, 学習率 {}",
        config.num_epochs,
        config.batch_size,
        config.learning_rate
    );

    for epoch in 1..=config.num_epochs {
        let mut train_metrics = MetricAccumulator::default();

        for batch in dataloader_train.iter() {
            let output = model.forward_classification(batch.images, batch.targets);
            train_metrics.update(&output);

            let grads = output.loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optim.step(config.learning_rate, model, grads);
        }

        // 検証は勾配なし（ドロップアウト無効）で行う
        let model_valid = model.valid();
        let mut valid_metrics = MetricAccumulator::default();

        for batch in dataloader_valid.iter() {
            let output = model_valid.forward_classification(batch.images, batch.targets);
            valid_metrics.update(&output);
        }

        let metrics = EpochMetrics {
            epoch,
            train_loss: train_metrics.loss(),
            train_accuracy: train_metrics.accuracy(),
            valid_loss: valid_metrics.loss(),
            valid_accuracy: valid_metrics.accuracy(),
        };

        log::info!(
            "Epoch {:>3}/{} | loss={:.4} | accuracy={:.1}% | val_loss={:.4} | val_accuracy={:.1}%",
            epoch,
            config.num_epochs,
            metrics.train_loss,
            metrics.train_accuracy * 100.0,
            metrics.valid_loss,
            metrics.valid_accuracy * 100.0,
        );

        history.push(metrics);
    }

    TrainingOutcome { model, history }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use burn::data::dataset::Dataset;
    use burn::module::Module;
    use burn::tensor::TensorData;

    use crate::dataset::image_folder::{partition, tests::write_synthetic_dataset};
    use crate::dataset::pipeline::{build_loader, PipelinePolicy};
    use crate::ml::ml_model::ModelConfig;

    type TestBackend = Autodiff<NdArray>;
    type TestInner = NdArray;

    const SIZE: usize = 16;

    fn loaders(
        root: &std::path::Path,
        batch_size: usize,
    ) -> (
        Arc<dyn DataLoader<TestBackend, ImageBatch<TestBackend>>>,
        Arc<dyn DataLoader<TestInner, ImageBatch<TestInner>>>,
        usize,
    ) {
        let (train, valid, class_names) = partition(root, 0.2, 123, SIZE, SIZE).unwrap();
        let train_loader = build_loader::<TestBackend>(
            &PipelinePolicy::train(123).with_num_workers(1),
            train,
            batch_size,
        );
        let valid_loader = build_loader::<TestInner>(
            &PipelinePolicy::valid().with_num_workers(1),
            valid,
            batch_size,
        );
        (train_loader, valid_loader, class_names.len())
    }

    fn weights(model: &FlowerClassifier<TestBackend>) -> Vec<u8> {
        model.clone().to_bytes().unwrap()
    }

    #[test]
    fn test_batcher_layout() {
        let items = vec![
            ImageItem {
                pixels: vec![0.5; 3 * 2 * 4],
                label: 1,
                path: "a.png".into(),
            },
            ImageItem {
                pixels: vec![0.25; 3 * 2 * 4],
                label: 0,
                path: "b.png".into(),
            },
        ];

        let batch: ImageBatch<TestInner> =
            ImageBatcher::new(4, 2).batch(items, &Default::default());

        assert_eq!(batch.images.dims(), [2, 3, 2, 4]);
        batch
            .targets
            .into_data()
            .assert_eq(&TensorData::from([1i64, 0]), false);
    }

    #[test]
    fn test_zero_epochs_keeps_initial_weights() {
        let dir = tempfile::tempdir().unwrap();
        write_synthetic_dataset(dir.path(), &["roses", "tulips"], 4);
        let (train_loader, valid_loader, num_classes) = loaders(dir.path(), 4);

        let model = ModelConfig::new(num_classes)
            .with_image_height(SIZE)
            .with_image_width(SIZE)
            .init::<TestBackend>(&Default::default());
        let before = weights(&model);

        let config = TrainingConfig::new().with_num_epochs(0);
        let outcome = train_model(model, train_loader, valid_loader, &config);

        assert!(outcome.history.is_empty());
        assert_eq!(weights(&outcome.model), before);
    }

    #[test]
    fn test_training_updates_weights_and_records_history() {
        let dir = tempfile::tempdir().unwrap();
        write_synthetic_dataset(dir.path(), &["roses", "tulips"], 5);
        let (train_loader, valid_loader, num_classes) = loaders(dir.path(), 4);

        let model = ModelConfig::new(num_classes)
            .with_image_height(SIZE)
            .with_image_width(SIZE)
            .init::<TestBackend>(&Default::default());
        let before = weights(&model);

        let config = TrainingConfig::new().with_num_epochs(2).with_batch_size(4);
        let outcome = train_model(model, train_loader, valid_loader, &config);

        assert_eq!(outcome.history.len(), 2);
        assert_eq!(outcome.history[0].epoch, 1);
        assert_eq!(outcome.history[1].epoch, 2);
        for metrics in &outcome.history {
            assert!(metrics.train_loss.is_finite());
            assert!((0.0..=1.0).contains(&metrics.train_accuracy));
            assert!((0.0..=1.0).contains(&metrics.valid_accuracy));
        }
        assert_ne!(weights(&outcome.model), before);
    }

    #[test]
    fn test_empty_validation_set_reports_zero() {
        let dir = tempfile::tempdir().unwrap();
        write_synthetic_dataset(dir.path(), &["roses"], 3);
        let (train, valid, _) = partition(dir.path(), 0.0, 1, SIZE, SIZE).unwrap();
        assert_eq!(valid.len(), 0);
        assert_eq!(train.len(), 3);

        let train_loader = build_loader::<TestBackend>(
            &PipelinePolicy::train(1).with_num_workers(1),
            train,
            2,
        );
        let valid_loader = build_loader::<TestInner>(
            &PipelinePolicy::valid().with_num_workers(1),
            valid,
            2,
        );

        let model = ModelConfig::new(1)
            .with_image_height(SIZE)
            .with_image_width(SIZE)
            .init::<TestBackend>(&Default::default());
        let outcome = train_model(
            model,
            train_loader,
            valid_loader,
            &TrainingConfig::new().with_num_epochs(1),
        );

        assert_eq!(outcome.history[0].valid_loss, 0.0);
        assert_eq!(outcome.history[0].valid_accuracy, 0.0);
        assert!(outcome.model.num_params() > 0);
    }
}
