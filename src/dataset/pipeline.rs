//! データ読み込みパイプラインの調整
//!
//! デコード済み画像のメモリキャッシュ、学習データのシャッフル、
//! ワーカースレッドによる先読みを DataLoader に設定します。
//! いずれもスループットのみに影響し、結果の正しさには影響しません。

use std::sync::{Arc, RwLock};

use burn::{
    data::{
        dataloader::{DataLoader, DataLoaderBuilder},
        dataset::Dataset,
    },
    tensor::backend::{AutodiffBackend, Backend},
};

use crate::dataset::image_folder::{ImageItem, ImageSplit};
use crate::ml::training::{ImageBatch, ImageBatcher};

/// アクセス済みアイテムをインデックスごとに保持するデータセット
pub struct CachedDataset<D, I> {
    inner: D,
    cache: RwLock<Vec<Option<I>>>,
}

impl<D, I> CachedDataset<D, I>
where
    D: Dataset<I>,
    I: Clone + Send + Sync,
{
    pub fn new(inner: D) -> Self {
        let len = inner.len();
        Self {
            inner,
            cache: RwLock::new(vec![None; len]),
        }
    }
}

impl<D, I> Dataset<I> for CachedDataset<D, I>
where
    D: Dataset<I>,
    I: Clone + Send + Sync,
{
    fn get(&self, index: usize) -> Option<I> {
        {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            if let Some(Some(item)) = cache.get(index) {
                return Some(item.clone());
            }
        }

        let item = self.inner.get(index)?;
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = cache.get_mut(index) {
            *slot = Some(item.clone());
        }

        Some(item)
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

/// DataLoader の調整方針
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelinePolicy {
    /// デコード済み画像をメモリに保持する
    pub cache: bool,
    /// エポックごとにシャッフルする場合のシード
    pub shuffle_seed: Option<u64>,
    /// 先読みワーカー数
    pub num_workers: usize,
}

impl PipelinePolicy {
    /// 学習用: キャッシュ + シャッフル + 先読み
    pub fn train(seed: u64) -> Self {
        Self {
            cache: true,
            shuffle_seed: Some(seed),
            num_workers: autotune_workers(),
        }
    }

    /// 検証用: キャッシュ + 先読み（シャッフルなし）
    pub fn valid() -> Self {
        Self {
            cache: true,
            shuffle_seed: None,
            num_workers: autotune_workers(),
        }
    }

    pub fn with_num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }
}

/// 先読みワーカー数を環境から決める
pub fn autotune_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// 方針に従って DataLoader を構築
///
/// バッチはバックエンドのデフォルトデバイス上に作られる。
pub fn build_loader<B: Backend>(
    policy: &PipelinePolicy,
    dataset: ImageSplit,
    batch_size: usize,
) -> Arc<dyn DataLoader<B, ImageBatch<B>>> {
    let (width, height) = dataset.image_size();
    let batcher = ImageBatcher::new(width, height);

    let dataset: Box<dyn Dataset<ImageItem>> = if policy.cache {
        Box::new(CachedDataset::new(dataset))
    } else {
        Box::new(dataset)
    };

    let mut builder = DataLoaderBuilder::new(batcher)
        .batch_size(batch_size)
        .num_workers(policy.num_workers);

    if let Some(seed) = policy.shuffle_seed {
        builder = builder.shuffle(seed);
    }

    builder.build(dataset)
}

/// 学習用・検証用の DataLoader をまとめて構築
///
/// 検証用は勾配不要のため内部バックエンドで構築する。
pub fn tune<B: AutodiffBackend>(
    train: ImageSplit,
    valid: ImageSplit,
    batch_size: usize,
    seed: u64,
) -> (
    Arc<dyn DataLoader<B, ImageBatch<B>>>,
    Arc<dyn DataLoader<B::InnerBackend, ImageBatch<B::InnerBackend>>>,
) {
    let train_policy = PipelinePolicy::train(seed);
    let valid_policy = PipelinePolicy::valid();

    log::debug!("パイプライン設定 (学習): {:?}", train_policy);
    log::debug!("パイプライン設定 (検証): {:?}", valid_policy);

    let train_loader = build_loader::<B>(&train_policy, train, batch_size);
    let valid_loader = build_loader::<B::InnerBackend>(&valid_policy, valid, batch_size);

    (train_loader, valid_loader)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::data::dataset::InMemDataset;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::dataset::image_folder::{partition, tests::write_synthetic_dataset};

    struct CountingDataset {
        items: Vec<u32>,
        hits: AtomicUsize,
    }

    impl Dataset<u32> for CountingDataset {
        fn get(&self, index: usize) -> Option<u32> {
            self.hits.fetch_add(1, Ordering::SeqCst);
            self.items.get(index).copied()
        }

        fn len(&self) -> usize {
            self.items.len()
        }
    }

    #[test]
    fn test_cached_dataset_reads_inner_once() {
        let inner = CountingDataset {
            items: vec![10, 20, 30],
            hits: AtomicUsize::new(0),
        };
        let cached = CachedDataset::new(inner);

        assert_eq!(cached.get(1), Some(20));
        assert_eq!(cached.get(1), Some(20));
        assert_eq!(cached.inner.hits.load(Ordering::SeqCst), 1);

        assert_eq!(cached.get(0), Some(10));
        assert_eq!(cached.inner.hits.load(Ordering::SeqCst), 2);

        assert_eq!(cached.get(3), None);
        assert_eq!(cached.len(), 3);
    }

    #[test]
    fn test_cached_dataset_matches_inner() {
        let cached = CachedDataset::new(InMemDataset::new(vec!["a", "b"]));
        let items: Vec<_> = (0..cached.len()).filter_map(|i| cached.get(i)).collect();
        assert_eq!(items, vec!["a", "b"]);
    }

    #[test]
    fn test_policies() {
        let train = PipelinePolicy::train(5);
        assert!(train.cache);
        assert_eq!(train.shuffle_seed, Some(5));
        assert!(train.num_workers >= 1);

        let valid = PipelinePolicy::valid().with_num_workers(2);
        assert_eq!(valid.shuffle_seed, None);
        assert_eq!(valid.num_workers, 2);
    }

    #[test]
    fn test_loader_yields_every_sample() {
        let dir = tempfile::tempdir().unwrap();
        write_synthetic_dataset(dir.path(), &["roses", "tulips"], 5);
        let (train, _, _) = partition(dir.path(), 0.2, 123, 16, 16).unwrap();

        let policy = PipelinePolicy::train(1).with_num_workers(1);
        let loader = build_loader::<NdArray>(&policy, train, 3);

        let mut seen = 0;
        for batch in loader.iter() {
            let [n, c, h, w] = batch.images.dims();
            assert_eq!([c, h, w], [3, 16, 16]);
            assert_eq!(batch.targets.dims(), [n]);
            seen += n;
        }
        assert_eq!(seen, 8);
        assert_eq!(loader.num_items(), 8);
    }
}
