//! Model family resolution
//!
//! The family is chosen once from the configured names and carries the loss
//! and learning-rate policy that go with it.

use std::fmt;

use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::deeplab::{DeepLabConfig, DeepLabV3Plus};
use super::unet::{UNet, UNetConfig};
use crate::config::{HyperParams, ModelSection};
use crate::training::loss::Criterion;
use crate::training::scheduler::LrPolicy;
use crate::utils::error::{Result, SegError};

/// DeepLabV3+ feature extractor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Backbone {
    Xception,
    ResNet,
}

impl Backbone {
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "xception" => Ok(Self::Xception),
            "resnet" => Ok(Self::ResNet),
            other => Err(SegError::NotImplemented(format!("backbone '{}'", other))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Xception => "xception",
            Self::ResNet => "resnet",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    DeepLab(Backbone),
    UNet,
}

impl ModelFamily {
    /// Resolve the configured model and backbone names
    ///
    /// The backbone is only consulted for DeepLab.
    pub fn from_names(model: &str, backbone: &str) -> Result<Self> {
        match model.to_lowercase().as_str() {
            "deeplab" => Ok(Self::DeepLab(Backbone::from_name(backbone)?)),
            "unet" => Ok(Self::UNet),
            other => Err(SegError::NotImplemented(format!("model '{}'", other))),
        }
    }

    pub fn from_config(model: &ModelSection) -> Result<Self> {
        Self::from_names(&model.family, &model.backbone)
    }

    /// Prefix of checkpoint file names
    pub fn model_name(&self) -> String {
        match self {
            Self::DeepLab(backbone) => format!("deeplabv3plus-{}", backbone.name()),
            Self::UNet => "unet".to_string(),
        }
    }

    /// Short family name as written in the parameter report
    pub fn short_name(&self) -> &'static str {
        match self {
            Self::DeepLab(_) => "deeplab",
            Self::UNet => "unet",
        }
    }

    pub fn criterion(&self) -> Criterion {
        match self {
            Self::DeepLab(_) => Criterion::deeplab(),
            Self::UNet => Criterion::summed(),
        }
    }

    pub fn lr_policy(&self, hyper: &HyperParams) -> LrPolicy {
        match self {
            Self::DeepLab(_) => LrPolicy::Poly {
                base_lr: hyper.lr,
                epoch_size: hyper.epoch_size,
                power: hyper.poly_power,
            },
            Self::UNet => LrPolicy::Step {
                base_lr: hyper.fixed_lr,
                step_size: hyper.step_size,
                gamma: hyper.gamma,
            },
        }
    }

    /// Human-readable optimizer settings for the parameter report
    pub fn optimizer_description(&self, hyper: &HyperParams) -> String {
        match self {
            Self::DeepLab(_) => format!(
                "SGD (lr: {}, momentum: {}, weight_decay: {})",
                hyper.lr, hyper.momentum, hyper.weight_decay
            ),
            Self::UNet => format!(
                "Adam (lr: {}, weight_decay: {})",
                hyper.fixed_lr, hyper.fixed_weight_decay
            ),
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.model_name())
    }
}

pub fn build_deeplab<B: Backend>(
    section: &ModelSection,
    backbone: Backbone,
    device: &B::Device,
) -> Result<DeepLabV3Plus<B>> {
    let model = DeepLabConfig::new(backbone)
        .with_num_classes(section.num_classes)
        .with_in_channels(section.input_channels)
        .with_output_stride(section.output_stride)
        .with_base_filters(section.base_filters)
        .with_upsample(section.upsample)
        .init(device)?;

    info!(
        "Built DeepLabV3+ ({}, output stride {}, {} classes, {} upsampling)",
        backbone.name(),
        section.output_stride,
        section.num_classes,
        section.upsample.name()
    );

    match &section.pretrained_backbone {
        Some(path) => model.load_backbone(path, device),
        None => Ok(model),
    }
}

pub fn build_unet<B: Backend>(section: &ModelSection, device: &B::Device) -> UNet<B> {
    info!("Built UNet ({} classes)", section.num_classes);
    UNetConfig::new()
        .with_num_classes(section.num_classes)
        .with_in_channels(section.input_channels)
        .with_base_filters(section.base_filters)
        .with_upsample(section.upsample)
        .init(device)
}
