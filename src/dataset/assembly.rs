//! Dataset assembly
//!
//! Builds the training, validation and test sources described by a
//! [`RunConfig`]. Training concatenates a leading prefix of every configured
//! source. Validation and test build every configured entry but keep only
//! the last one.

use burn::data::dataset::transform::{ComposedDataset, PartialDataset};
use burn::data::dataset::Dataset;
use tracing::{info, warn};

use crate::config::{DatasetPaths, RunConfig};
use crate::dataset::augmentation::Augmenter;
use crate::dataset::burn_dataset::{SegmentationDataset, SegmentationItem};
use crate::utils::error::{Result, SegError};

/// Concatenation of truncated training sources
pub type TrainingSet = ComposedDataset<PartialDataset<SegmentationDataset, SegmentationItem>>;

/// Number of samples kept from a source of `len` samples
pub fn truncated_len(len: usize, fraction: f64) -> usize {
    (fraction * len as f64).floor() as usize
}

/// Leading `floor(fraction * len)` samples of every source, in order
pub fn build_training_set(
    sources: &[DatasetPaths],
    fraction: f64,
    augmenter: &Augmenter,
    input_channels: usize,
) -> Result<TrainingSet> {
    let mut parts = Vec::with_capacity(sources.len());
    for paths in sources {
        let dataset = SegmentationDataset::from_paths(paths, augmenter.clone(), input_channels)?;
        let keep = truncated_len(dataset.len(), fraction);
        info!(
            "Training source {:?}: using {} of {} samples",
            paths.images,
            keep,
            dataset.len()
        );
        parts.push(PartialDataset::new(dataset, 0, keep));
    }
    Ok(ComposedDataset::new(parts))
}

/// Build every validation source and keep the last
pub fn build_validation_set(
    sources: &[DatasetPaths],
    augmenter: &Augmenter,
    input_channels: usize,
) -> Result<SegmentationDataset> {
    if sources.len() > 1 {
        warn!(
            "{} validation sources configured; only {:?} is used",
            sources.len(),
            sources.last().map(|s| &s.images)
        );
    }

    let mut validation = None;
    for paths in sources {
        validation = Some(SegmentationDataset::from_paths(paths, augmenter.clone(), input_channels)?);
    }
    validation.ok_or_else(|| SegError::Config("no validation dataset configured".to_string()))
}

/// Build one source per test entry
pub fn build_test_sets(
    sources: &[DatasetPaths],
    augmenter: &Augmenter,
    input_channels: usize,
) -> Result<Vec<SegmentationDataset>> {
    sources
        .iter()
        .map(|paths| SegmentationDataset::from_paths(paths, augmenter.clone(), input_channels))
        .collect()
}

/// The three sources of a run
pub struct AssembledData {
    pub train: TrainingSet,
    pub validation: SegmentationDataset,
    pub test: SegmentationDataset,
}

/// Build all sources for a run
pub fn assemble(config: &RunConfig) -> Result<AssembledData> {
    let size = config.model.image_size as u32;
    let channels = config.model.input_channels;
    let train_augs = Augmenter::training(config.augmentation.clone(), size);
    let test_augs = Augmenter::test(size);

    let train = build_training_set(
        &config.train.datasets,
        config.train.training_fraction,
        &train_augs,
        channels,
    )?;
    let validation = build_validation_set(&config.eval.datasets_synthetic, &train_augs, channels)?;

    let mut tests = build_test_sets(&config.eval.datasets_real, &test_augs, channels)?;
    if tests.len() > 1 {
        warn!(
            "{} test sources configured; only the last is used",
            tests.len()
        );
    }
    let test = tests
        .pop()
        .ok_or_else(|| SegError::Config("no test dataset configured".to_string()))?;

    info!(
        "size db_train, db_val: {} {}",
        Dataset::<SegmentationItem>::len(&train),
        validation.len()
    );

    Ok(AssembledData {
        train,
        validation,
        test,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncated_len_floors() {
        assert_eq!(truncated_len(10, 0.5), 5);
        assert_eq!(truncated_len(10, 0.99), 9);
        assert_eq!(truncated_len(7, 1.0), 7);
        assert_eq!(truncated_len(3, 0.1), 0);
        assert_eq!(truncated_len(10, 0.7), 7);
    }
}
