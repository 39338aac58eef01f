//! Dataset module for segmentation sources
//!
//! This module provides:
//! - Folder scanning that pairs images with label maps
//! - Joint image/label augmentation
//! - Burn `Dataset` and `Batcher` implementations
//! - Train/validation/test assembly from the run configuration
//! - A drop-last batch loader

pub mod assembly;
pub mod augmentation;
pub mod burn_dataset;
pub mod dataloader;
pub mod loader;

pub use assembly::{assemble, AssembledData, TrainingSet};
pub use augmentation::{AugmentationConfig, Augmenter};
pub use burn_dataset::{SegmentationBatch, SegmentationBatcher, SegmentationDataset, SegmentationItem};
pub use dataloader::{LoaderOptions, SegmentationLoader};
pub use loader::SegmentationFolder;
