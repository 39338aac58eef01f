//! Burn Dataset Integration
//!
//! [`SegmentationDataset`] implements Burn's `Dataset` trait over a scanned
//! folder, decoding and augmenting each sample on demand.
//! [`SegmentationBatcher`] stacks samples into image and label tensors.

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use image::{DynamicImage, GrayImage, ImageReader};
use tracing::error;

use crate::config::DatasetPaths;
use crate::dataset::augmentation::Augmenter;
use crate::dataset::loader::{SamplePaths, SegmentationFolder};
use crate::utils::error::{Result, SegError};

/// A decoded, augmented sample
#[derive(Clone, Debug)]
pub struct SegmentationItem {
    /// Pixel values in [0, 1], CHW order
    pub image: Vec<f32>,
    /// Class index per pixel, row-major
    pub label: Vec<i64>,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub filename: String,
}

/// Lazily decoded segmentation source
#[derive(Debug, Clone)]
pub struct SegmentationDataset {
    folder: SegmentationFolder,
    augmenter: Augmenter,
    input_channels: usize,
}

impl SegmentationDataset {
    pub fn new(folder: SegmentationFolder, augmenter: Augmenter, input_channels: usize) -> Self {
        Self {
            folder,
            augmenter,
            input_channels,
        }
    }

    /// Scan a configured source
    pub fn from_paths(paths: &DatasetPaths, augmenter: Augmenter, input_channels: usize) -> Result<Self> {
        let folder = SegmentationFolder::scan(&paths.images, paths.labels.as_deref())?;
        Ok(Self::new(folder, augmenter, input_channels))
    }

    pub fn folder(&self) -> &SegmentationFolder {
        &self.folder
    }

    /// File names in sample order
    pub fn filenames(&self) -> Vec<String> {
        self.folder.samples.iter().map(|s| s.name.clone()).collect()
    }

    /// Decode and augment one sample
    pub fn load(&self, index: usize) -> Result<SegmentationItem> {
        let sample = self.folder.samples.get(index).ok_or_else(|| {
            SegError::Dataset(format!(
                "index {} out of range for {} samples",
                index,
                self.folder.len()
            ))
        })?;

        let image = read_image(&sample.image)?;
        let label = match &sample.label {
            Some(path) => read_image(path)?.to_luma8(),
            None => GrayImage::new(image.width(), image.height()),
        };

        let (image, label) = self.augmenter.apply(image, label, &mut rand::thread_rng());
        Ok(self.to_item(sample, image, label))
    }

    fn to_item(&self, sample: &SamplePaths, image: DynamicImage, label: GrayImage) -> SegmentationItem {
        let (width, height) = (image.width() as usize, image.height() as usize);
        let plane = width * height;
        let channels = self.input_channels;
        let mut data = vec![0.0f32; channels * plane];

        // Convert to CHW format and normalize to [0, 1]
        if channels == 1 {
            for (i, p) in image.to_luma8().pixels().enumerate() {
                data[i] = p[0] as f32 / 255.0;
            }
        } else {
            for (i, p) in image.to_rgb8().pixels().enumerate() {
                for c in 0..3 {
                    data[c * plane + i] = p[c] as f32 / 255.0;
                }
            }
        }

        SegmentationItem {
            image: data,
            label: label.pixels().map(|p| p[0] as i64).collect(),
            channels,
            height,
            width,
            filename: sample.name.clone(),
        }
    }
}

fn read_image(path: &std::path::Path) -> Result<DynamicImage> {
    ImageReader::open(path)
        .map_err(|e| SegError::ImageLoad(path.to_path_buf(), e.to_string()))?
        .decode()
        .map_err(|e| SegError::ImageLoad(path.to_path_buf(), e.to_string()))
}

impl Dataset<SegmentationItem> for SegmentationDataset {
    fn get(&self, index: usize) -> Option<SegmentationItem> {
        match self.load(index) {
            Ok(item) => Some(item),
            Err(e) => {
                error!("Failed to load sample {}: {}", index, e);
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.folder.len()
    }
}

/// A batch of images and their label maps
#[derive(Clone, Debug)]
pub struct SegmentationBatch<B: Backend> {
    /// [batch_size, channels, height, width]
    pub images: Tensor<B, 4>,
    /// [batch_size, 1, height, width]
    pub labels: Tensor<B, 4, Int>,
    pub filenames: Vec<String>,
}

impl<B: Backend> SegmentationBatch<B> {
    pub fn len(&self) -> usize {
        self.filenames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filenames.is_empty()
    }
}

/// Stacks samples of equal size into a batch
#[derive(Clone, Debug, Default)]
pub struct SegmentationBatcher;

impl<B: Backend> Batcher<B, SegmentationItem, SegmentationBatch<B>> for SegmentationBatcher {
    fn batch(&self, items: Vec<SegmentationItem>, device: &B::Device) -> SegmentationBatch<B> {
        let batch_size = items.len();
        let (channels, height, width) = items
            .first()
            .map(|item| (item.channels, item.height, item.width))
            .unwrap_or((0, 0, 0));

        let images_data: Vec<f32> = items.iter().flat_map(|item| item.image.iter().copied()).collect();
        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, channels, height, width]),
            device,
        );

        let labels_data: Vec<i64> = items.iter().flat_map(|item| item.label.iter().copied()).collect();
        let labels = Tensor::<B, 4, Int>::from_data(
            TensorData::new(labels_data, [batch_size, 1, height, width]),
            device,
        );

        SegmentationBatch {
            images,
            labels,
            filenames: items.into_iter().map(|item| item.filename).collect(),
        }
    }
}
