//! Segmentation networks
//!
//! - [`deeplab::DeepLabV3Plus`] with an Xception-style or ResNet-style encoder
//! - [`unet::UNet`]
//!
//! Both map `[N, C, H, W]` images to `[N, num_classes, H, W]` logits.

pub mod blocks;
pub mod deeplab;
pub mod factory;
pub mod unet;

use burn::tensor::{backend::Backend, Tensor};

pub use blocks::Upsample;
pub use deeplab::{DeepLabConfig, DeepLabV3Plus};
pub use factory::{build_deeplab, build_unet, Backbone, ModelFamily};
pub use unet::{UNet, UNetConfig};

/// A network producing per-pixel class logits at input resolution
pub trait Segmenter<B: Backend> {
    fn segment(&self, images: Tensor<B, 4>) -> Tensor<B, 4>;

    fn num_classes(&self) -> usize;
}
