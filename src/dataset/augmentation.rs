//! Joint image/label augmentation
//!
//! Every geometric transform is applied to the image and its label map
//! together so the two stay aligned. The label map is always resampled with
//! nearest-neighbour so class indices are never blended.
//!
//! # Augmentation Strategy
//!
//! - **Training / validation**: resize with nearest-neighbour, optional flips
//! - **Test**: resize with a cubic filter, no random transforms

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Random transforms applied on top of the resize
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentationConfig {
    /// Probability of applying horizontal flip (0.0 - 1.0)
    pub horizontal_flip_prob: f32,
    /// Probability of applying vertical flip (0.0 - 1.0)
    pub vertical_flip_prob: f32,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self::none()
    }
}

impl AugmentationConfig {
    /// Resize only
    pub fn none() -> Self {
        Self {
            horizontal_flip_prob: 0.0,
            vertical_flip_prob: 0.0,
        }
    }

    /// Mirror in both directions half of the time
    pub fn flips() -> Self {
        Self {
            horizontal_flip_prob: 0.5,
            vertical_flip_prob: 0.5,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.horizontal_flip_prob <= 0.0 && self.vertical_flip_prob <= 0.0
    }
}

/// Resizes a sample to the network's input size and applies random transforms
#[derive(Clone, Debug)]
pub struct Augmenter {
    config: AugmentationConfig,
    image_size: u32,
    image_filter: FilterType,
}

impl Augmenter {
    pub fn new(config: AugmentationConfig, image_size: u32, image_filter: FilterType) -> Self {
        Self {
            config,
            image_size,
            image_filter,
        }
    }

    /// Pipeline used for the training and validation sources
    pub fn training(config: AugmentationConfig, image_size: u32) -> Self {
        Self::new(config, image_size, FilterType::Nearest)
    }

    /// Pipeline used for the test sources
    pub fn test(image_size: u32) -> Self {
        Self::new(AugmentationConfig::none(), image_size, FilterType::CatmullRom)
    }

    pub fn image_size(&self) -> u32 {
        self.image_size
    }

    /// Transform an image and its label map
    pub fn apply<R: Rng>(
        &self,
        image: DynamicImage,
        label: GrayImage,
        rng: &mut R,
    ) -> (DynamicImage, GrayImage) {
        let size = self.image_size;
        let mut image = image.resize_exact(size, size, self.image_filter);
        let mut label = imageops::resize(&label, size, size, FilterType::Nearest);

        if self.config.horizontal_flip_prob > 0.0 && rng.gen::<f32>() < self.config.horizontal_flip_prob {
            image = image.fliph();
            label = imageops::flip_horizontal(&label);
        }

        if self.config.vertical_flip_prob > 0.0 && rng.gen::<f32>() < self.config.vertical_flip_prob {
            image = image.flipv();
            label = imageops::flip_vertical(&label);
        }

        (image, label)
    }
}
