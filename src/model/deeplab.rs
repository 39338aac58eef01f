//! DeepLabV3+ for semantic segmentation
//!
//! Encoder (Xception-style or ResNet-style) with an output stride of 8 or 16,
//! an ASPP head and a decoder that fuses stride-4 low-level features.
//!
//! ```text
//! image ─► encoder ─► high-level (stride os) ─► ASPP ─► upsample ×(os/4) ─┐
//!             └────► low-level (stride 4) ─► 1x1 reduce ─────────────────┴─► concat ─► 2× conv3x3 ─► 1x1 ─► upsample ×4
//! ```

use std::path::Path;

use burn::{
    config::Config,
    module::{Ignored, Module},
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        PaddingConfig2d, Relu,
    },
    record::{CompactRecorder, RecorderError},
    tensor::{backend::Backend, Tensor},
};
use tracing::info;

use super::blocks::{upsample, ConvBnRelu, SeparableConv, Upsample};
use super::factory::Backbone;
use super::Segmenter;
use crate::utils::error::SegError;

/// Configuration for [`DeepLabV3Plus`]
#[derive(Config, Debug)]
pub struct DeepLabConfig {
    pub backbone: Backbone,

    #[config(default = "2")]
    pub num_classes: usize,

    #[config(default = "3")]
    pub in_channels: usize,

    /// 8 or 16
    #[config(default = "8")]
    pub output_stride: usize,

    /// Width multiplier; 32 gives a 1024-channel encoder output
    #[config(default = "32")]
    pub base_filters: usize,

    /// Xception middle-flow depth
    #[config(default = "8")]
    pub middle_blocks: usize,

    /// ResNet blocks per stage
    #[config(default = "2")]
    pub blocks_per_stage: usize,

    /// Decoder and output resizing
    #[config(default = "Upsample::Bilinear")]
    pub upsample: Upsample,
}

impl DeepLabConfig {
    /// ASPP dilation rates for the configured output stride
    pub fn aspp_rates(&self) -> [usize; 3] {
        if self.output_stride == 8 {
            [12, 24, 36]
        } else {
            [6, 12, 18]
        }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> crate::utils::error::Result<DeepLabV3Plus<B>> {
        if self.output_stride != 8 && self.output_stride != 16 {
            return Err(SegError::Model(format!(
                "output stride must be 8 or 16, got {}",
                self.output_stride
            )));
        }
        Ok(DeepLabV3Plus::new(self, device))
    }
}

/// Xception residual block of three separable convolutions
#[derive(Module, Debug)]
pub struct XceptionBlock<B: Backend> {
    pub sep1: SeparableConv<B>,
    pub sep2: SeparableConv<B>,
    pub sep3: SeparableConv<B>,
    pub skip: Option<ConvBnRelu<B>>,
}

impl<B: Backend> XceptionBlock<B> {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        stride: usize,
        dilation: usize,
        device: &B::Device,
    ) -> Self {
        let skip = (in_channels != out_channels || stride != 1).then(|| {
            ConvBnRelu::with_options(in_channels, out_channels, 1, stride, 1, false, device)
        });

        Self {
            sep1: SeparableConv::new(in_channels, out_channels, 1, dilation, device),
            sep2: SeparableConv::new(out_channels, out_channels, 1, dilation, device),
            sep3: SeparableConv::new(out_channels, out_channels, stride, dilation, device),
            skip,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let residual = match &self.skip {
            Some(skip) => skip.forward(x.clone()),
            None => x.clone(),
        };
        let out = self.sep3.forward(self.sep2.forward(self.sep1.forward(x)));
        out + residual
    }
}

/// Aligned-Xception style encoder
#[derive(Module, Debug)]
pub struct XceptionEncoder<B: Backend> {
    pub stem1: ConvBnRelu<B>,
    pub stem2: ConvBnRelu<B>,
    pub entry1: XceptionBlock<B>,
    pub entry2: XceptionBlock<B>,
    pub entry3: XceptionBlock<B>,
    pub middle: Vec<XceptionBlock<B>>,
    pub exit: XceptionBlock<B>,
    pub exit_conv: SeparableConv<B>,
}

impl<B: Backend> XceptionEncoder<B> {
    pub fn new(config: &DeepLabConfig, device: &B::Device) -> Self {
        let b = config.base_filters;
        let (entry3_stride, middle_dilation, exit_dilations) = if config.output_stride == 16 {
            (2, 1, (1, 2))
        } else {
            (1, 2, (2, 4))
        };

        Self {
            stem1: ConvBnRelu::with_options(config.in_channels, b, 3, 2, 1, true, device),
            stem2: ConvBnRelu::new(b, b * 2, 3, device),
            entry1: XceptionBlock::new(b * 2, b * 4, 2, 1, device),
            entry2: XceptionBlock::new(b * 4, b * 8, 2, 1, device),
            entry3: XceptionBlock::new(b * 8, b * 16, entry3_stride, 1, device),
            middle: (0..config.middle_blocks)
                .map(|_| XceptionBlock::new(b * 16, b * 16, 1, middle_dilation, device))
                .collect(),
            exit: XceptionBlock::new(b * 16, b * 24, 1, exit_dilations.0, device),
            exit_conv: SeparableConv::new(b * 24, b * 32, 1, exit_dilations.1, device),
        }
    }

    pub fn out_channels(base_filters: usize) -> usize {
        base_filters * 32
    }

    pub fn low_level_channels(base_filters: usize) -> usize {
        base_filters * 4
    }

    /// Returns (high-level features, stride-4 features)
    pub fn forward(&self, x: Tensor<B, 4>) -> (Tensor<B, 4>, Tensor<B, 4>) {
        let x = self.stem2.forward(self.stem1.forward(x));
        let low_level = self.entry1.forward(x);
        let x = self.entry3.forward(self.entry2.forward(low_level.clone()));
        let x = self.middle.iter().fold(x, |x, block| block.forward(x));
        let x = self.exit_conv.forward(self.exit.forward(x));
        (x, low_level)
    }
}

/// Two 3x3 convolutions with an identity or projected shortcut
#[derive(Module, Debug)]
pub struct ResidualBlock<B: Backend> {
    pub conv1: ConvBnRelu<B>,
    pub conv2: ConvBnRelu<B>,
    pub downsample: Option<ConvBnRelu<B>>,
    pub relu: Relu,
}

impl<B: Backend> ResidualBlock<B> {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        stride: usize,
        dilation: usize,
        device: &B::Device,
    ) -> Self {
        let downsample = (in_channels != out_channels || stride != 1).then(|| {
            ConvBnRelu::with_options(in_channels, out_channels, 1, stride, 1, false, device)
        });

        Self {
            conv1: ConvBnRelu::with_options(in_channels, out_channels, 3, stride, dilation, true, device),
            conv2: ConvBnRelu::with_options(out_channels, out_channels, 3, 1, dilation, false, device),
            downsample,
            relu: Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(down) => down.forward(x.clone()),
            None => x.clone(),
        };
        let out = self.conv2.forward(self.conv1.forward(x));
        self.relu.forward(out + identity)
    }
}

/// ResNet-style encoder with dilated late stages
#[derive(Module, Debug)]
pub struct ResNetEncoder<B: Backend> {
    pub stem: ConvBnRelu<B>,
    pub pool: MaxPool2d,
    pub layer1: Vec<ResidualBlock<B>>,
    pub layer2: Vec<ResidualBlock<B>>,
    pub layer3: Vec<ResidualBlock<B>>,
    pub layer4: Vec<ResidualBlock<B>>,
}

impl<B: Backend> ResNetEncoder<B> {
    pub fn new(config: &DeepLabConfig, device: &B::Device) -> Self {
        let b = config.base_filters;
        let n = config.blocks_per_stage.max(1);
        // (stride, dilation) for stages 3 and 4
        let ((s3, d3), (s4, d4)) = if config.output_stride == 16 {
            ((2, 1), (1, 2))
        } else {
            ((1, 2), (1, 4))
        };

        let stage = |inc: usize, out: usize, stride: usize, dilation: usize| -> Vec<ResidualBlock<B>> {
            (0..n)
                .map(|i| {
                    if i == 0 {
                        ResidualBlock::new(inc, out, stride, dilation, device)
                    } else {
                        ResidualBlock::new(out, out, 1, dilation, device)
                    }
                })
                .collect()
        };

        Self {
            stem: ConvBnRelu::with_options(config.in_channels, b * 2, 7, 2, 1, true, device),
            pool: MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
            layer1: stage(b * 2, b * 2, 1, 1),
            layer2: stage(b * 2, b * 4, 2, 1),
            layer3: stage(b * 4, b * 8, s3, d3),
            layer4: stage(b * 8, b * 16, s4, d4),
        }
    }

    pub fn out_channels(base_filters: usize) -> usize {
        base_filters * 16
    }

    pub fn low_level_channels(base_filters: usize) -> usize {
        base_filters * 2
    }

    /// Returns (high-level features, stride-4 features)
    pub fn forward(&self, x: Tensor<B, 4>) -> (Tensor<B, 4>, Tensor<B, 4>) {
        let run = |x: Tensor<B, 4>, layer: &[ResidualBlock<B>]| layer.iter().fold(x, |x, block| block.forward(x));

        let x = self.pool.forward(self.stem.forward(x));
        let low_level = run(x, &self.layer1);
        let x = run(low_level.clone(), &self.layer2);
        let x = run(x, &self.layer3);
        let x = run(x, &self.layer4);
        (x, low_level)
    }
}

/// Atrous spatial pyramid pooling
#[derive(Module, Debug)]
pub struct Aspp<B: Backend> {
    pub branch1x1: ConvBnRelu<B>,
    pub atrous: Vec<ConvBnRelu<B>>,
    pub image_pool: AdaptiveAvgPool2d,
    pub pool_conv: ConvBnRelu<B>,
    pub project: ConvBnRelu<B>,
}

impl<B: Backend> Aspp<B> {
    pub fn new(in_channels: usize, out_channels: usize, rates: [usize; 3], device: &B::Device) -> Self {
        Self {
            branch1x1: ConvBnRelu::new(in_channels, out_channels, 1, device),
            atrous: rates
                .iter()
                .map(|&rate| ConvBnRelu::with_options(in_channels, out_channels, 3, 1, rate, true, device))
                .collect(),
            image_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            pool_conv: ConvBnRelu::new(in_channels, out_channels, 1, device),
            project: ConvBnRelu::new(out_channels * 5, out_channels, 1, device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, _, h, w] = x.dims();

        // Broadcast the 1x1 image-level features back over the map
        let pooled = self.pool_conv.forward(self.image_pool.forward(x.clone()));
        let pooled = pooled.repeat_dim(2, h).repeat_dim(3, w);

        let mut branches = vec![self.branch1x1.forward(x.clone())];
        branches.extend(self.atrous.iter().map(|conv| conv.forward(x.clone())));
        branches.push(pooled);

        self.project.forward(Tensor::cat(branches, 1))
    }
}

/// DeepLabV3+ segmentation network
///
/// Exactly one of `xception` and `resnet` is populated.
#[derive(Module, Debug)]
pub struct DeepLabV3Plus<B: Backend> {
    pub xception: Option<XceptionEncoder<B>>,
    pub resnet: Option<ResNetEncoder<B>>,
    pub aspp: Aspp<B>,
    pub low_level_reduce: ConvBnRelu<B>,
    pub decoder1: ConvBnRelu<B>,
    pub decoder2: ConvBnRelu<B>,
    pub classifier: Conv2d<B>,
    upsample: Ignored<Upsample>,
    num_classes: usize,
}

impl<B: Backend> DeepLabV3Plus<B> {
    pub fn new(config: &DeepLabConfig, device: &B::Device) -> Self {
        let b = config.base_filters;
        let (xception, resnet, encoder_channels, low_channels) = match config.backbone {
            Backbone::Xception => (
                Some(XceptionEncoder::new(config, device)),
                None,
                XceptionEncoder::<B>::out_channels(b),
                XceptionEncoder::<B>::low_level_channels(b),
            ),
            Backbone::ResNet => (
                None,
                Some(ResNetEncoder::new(config, device)),
                ResNetEncoder::<B>::out_channels(b),
                ResNetEncoder::<B>::low_level_channels(b),
            ),
        };

        let aspp_channels = b * 8;
        let reduced = (b * 3 / 2).max(1);

        Self {
            xception,
            resnet,
            aspp: Aspp::new(encoder_channels, aspp_channels, config.aspp_rates(), device),
            low_level_reduce: ConvBnRelu::new(low_channels, reduced, 1, device),
            decoder1: ConvBnRelu::new(aspp_channels + reduced, aspp_channels, 3, device),
            decoder2: ConvBnRelu::new(aspp_channels, aspp_channels, 3, device),
            classifier: Conv2dConfig::new([aspp_channels, config.num_classes], [1, 1]).init(device),
            upsample: Ignored(config.upsample),
            num_classes: config.num_classes,
        }
    }

    pub fn upsample_method(&self) -> Upsample {
        self.upsample.0
    }

    fn encode(&self, x: Tensor<B, 4>) -> (Tensor<B, 4>, Tensor<B, 4>) {
        match (&self.xception, &self.resnet) {
            (Some(encoder), _) => encoder.forward(x),
            (None, Some(encoder)) => encoder.forward(x),
            (None, None) => unreachable!("DeepLabV3Plus is always built with an encoder"),
        }
    }

    /// Logits at input resolution, [N, num_classes, H, W]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, _, h, w] = x.dims();

        let (high, low) = self.encode(x);
        let [_, _, lh, lw] = low.dims();

        let high = upsample(self.aspp.forward(high), [lh, lw], self.upsample.0);
        let low = self.low_level_reduce.forward(low);

        let x = Tensor::cat(vec![high, low], 1);
        let x = self.decoder2.forward(self.decoder1.forward(x));
        let x = self.classifier.forward(x);

        upsample(x, [h, w], self.upsample.0)
    }

    /// Replace the encoder weights with a record saved by `CompactRecorder`
    pub fn load_backbone(mut self, path: &Path, device: &B::Device) -> crate::utils::error::Result<Self> {
        let recorder = CompactRecorder::new();
        let failed = |e: RecorderError| SegError::Checkpoint(format!("backbone {:?}: {}", path, e));

        if let Some(encoder) = self.xception.take() {
            self.xception = Some(encoder.load_file(path.to_path_buf(), &recorder, device).map_err(failed)?);
        } else if let Some(encoder) = self.resnet.take() {
            self.resnet = Some(encoder.load_file(path.to_path_buf(), &recorder, device).map_err(failed)?);
        }
        info!("Loaded pretrained backbone from {:?}", path);
        Ok(self)
    }
}

impl<B: Backend> Segmenter<B> for DeepLabV3Plus<B> {
    fn segment(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        self.forward(images)
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }
}
