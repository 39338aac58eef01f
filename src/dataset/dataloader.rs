//! Batch loader
//!
//! Fixed-size batches over a Burn `Dataset`, with an optional per-epoch
//! shuffle and a trailing partial batch that is dropped. The samples of one
//! batch are decoded in parallel on a dedicated rayon pool; the caller
//! blocks until the batch is ready.

use std::sync::Arc;

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::tensor::backend::Backend;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use rayon::ThreadPool;

use crate::dataset::burn_dataset::{SegmentationBatch, SegmentationBatcher, SegmentationItem};
use crate::utils::error::{Result, SegError};

/// How a loader walks its dataset
#[derive(Debug, Clone, Copy)]
pub struct LoaderOptions {
    pub batch_size: usize,
    pub shuffle: bool,
    pub drop_last: bool,
    pub num_workers: usize,
    pub seed: u64,
}

impl LoaderOptions {
    /// Shuffled, drop-last
    pub fn training(batch_size: usize, num_workers: usize, seed: u64) -> Self {
        Self {
            batch_size,
            shuffle: true,
            drop_last: true,
            num_workers,
            seed,
        }
    }

    /// In order, drop-last
    pub fn evaluation(batch_size: usize, num_workers: usize) -> Self {
        Self {
            batch_size,
            shuffle: false,
            drop_last: true,
            num_workers,
            seed: 0,
        }
    }
}

/// Loader producing [`SegmentationBatch`]es on one device
pub struct SegmentationLoader<B: Backend> {
    dataset: Arc<dyn Dataset<SegmentationItem>>,
    batcher: SegmentationBatcher,
    device: B::Device,
    options: LoaderOptions,
    rng: ChaCha8Rng,
    pool: ThreadPool,
}

impl<B: Backend> SegmentationLoader<B> {
    pub fn new(
        dataset: Arc<dyn Dataset<SegmentationItem>>,
        options: LoaderOptions,
        device: B::Device,
    ) -> Result<Self> {
        if options.batch_size == 0 {
            return Err(SegError::Config("batch size must be greater than 0".to_string()));
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.num_workers.max(1))
            .build()
            .map_err(|e| SegError::Dataset(format!("failed to start loader workers: {}", e)))?;

        Ok(Self {
            dataset,
            batcher: SegmentationBatcher,
            device,
            options,
            rng: ChaCha8Rng::seed_from_u64(options.seed),
            pool,
        })
    }

    /// Samples in the underlying dataset
    pub fn dataset_len(&self) -> usize {
        self.dataset.len()
    }

    /// Batches yielded per epoch
    pub fn num_batches(&self) -> usize {
        let n = self.dataset.len();
        let bs = self.options.batch_size;
        if self.options.drop_last {
            n / bs
        } else {
            n.div_ceil(bs)
        }
    }

    pub fn batch_size(&self) -> usize {
        self.options.batch_size
    }

    /// Start an epoch, reshuffling first when enabled
    pub fn epoch(&mut self) -> EpochBatches<'_, B> {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        if self.options.shuffle {
            order.shuffle(&mut self.rng);
        }

        EpochBatches {
            loader: self,
            order,
            position: 0,
        }
    }

    fn load_batch(&self, indices: &[usize]) -> Result<SegmentationBatch<B>> {
        let dataset = &self.dataset;
        let items = self.pool.install(|| {
            indices
                .par_iter()
                .map(|&index| {
                    dataset
                        .get(index)
                        .ok_or_else(|| SegError::Dataset(format!("failed to load sample {}", index)))
                })
                .collect::<Result<Vec<_>>>()
        })?;

        Ok(<SegmentationBatcher as Batcher<B, SegmentationItem, SegmentationBatch<B>>>::batch(
            &self.batcher,
            items,
            &self.device,
        ))
    }
}

/// Batches of a single epoch
pub struct EpochBatches<'a, B: Backend> {
    loader: &'a SegmentationLoader<B>,
    order: Vec<usize>,
    position: usize,
}

impl<B: Backend> EpochBatches<'_, B> {
    /// Dataset indices in the order this epoch visits them
    pub fn order(&self) -> &[usize] {
        &self.order
    }
}

impl<B: Backend> Iterator for EpochBatches<'_, B> {
    type Item = Result<SegmentationBatch<B>>;

    fn next(&mut self) -> Option<Self::Item> {
        let remaining = self.order.len() - self.position;
        let bs = self.loader.options.batch_size;
        if remaining == 0 || (remaining < bs && self.loader.options.drop_last) {
            return None;
        }

        let end = self.position + remaining.min(bs);
        let indices = &self.order[self.position..end];
        self.position = end;
        Some(self.loader.load_batch(indices))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    /// In-memory items whose single pixel stores their index
    struct Indexed(usize);

    impl Dataset<SegmentationItem> for Indexed {
        fn get(&self, index: usize) -> Option<SegmentationItem> {
            (index < self.0).then(|| SegmentationItem {
                image: vec![index as f32],
                label: vec![index as i64],
                channels: 1,
                height: 1,
                width: 1,
                filename: format!("{index}.png"),
            })
        }

        fn len(&self) -> usize {
            self.0
        }
    }

    fn loader(len: usize, options: LoaderOptions) -> SegmentationLoader<TestBackend> {
        SegmentationLoader::new(Arc::new(Indexed(len)), options, Default::default()).unwrap()
    }

    #[test]
    fn test_drop_last() {
        let mut loader = loader(5, LoaderOptions::evaluation(2, 1));
        assert_eq!(loader.num_batches(), 2);

        let batches: Vec<_> = loader.epoch().map(|b| b.unwrap()).collect();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].filenames, vec!["2.png", "3.png"]);
    }

    #[test]
    fn test_keep_last() {
        let mut options = LoaderOptions::evaluation(2, 1);
        options.drop_last = false;
        let mut loader = loader(5, options);
        assert_eq!(loader.num_batches(), 3);
        assert_eq!(loader.epoch().last().unwrap().unwrap().len(), 1);
    }

    #[test]
    fn test_shuffle_is_a_permutation_and_changes_per_epoch() {
        let mut loader = loader(32, LoaderOptions::training(4, 2, 7));
        let first = loader.epoch().order().to_vec();
        let second = loader.epoch().order().to_vec();

        let mut sorted = first.clone();
        sorted.sort();
        assert_eq!(sorted, (0..32).collect::<Vec<_>>());
        assert_ne!(first, second);
    }

    #[test]
    fn test_missing_sample_is_error() {
        struct Broken;
        impl Dataset<SegmentationItem> for Broken {
            fn get(&self, _index: usize) -> Option<SegmentationItem> {
                None
            }
            fn len(&self) -> usize {
                2
            }
        }

        let mut loader: SegmentationLoader<TestBackend> =
            SegmentationLoader::new(Arc::new(Broken), LoaderOptions::evaluation(2, 1), Default::default())
                .unwrap();
        assert!(loader.epoch().next().unwrap().is_err());
    }
}
