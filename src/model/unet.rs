//! UNet
//!
//! Four down-sampling levels with skip connections into a symmetric decoder.

use burn::{
    config::Config,
    module::{Ignored, Module},
    nn::{
        conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
    },
    tensor::{backend::Backend, Tensor},
};

use super::blocks::{upsample, ConvBnRelu, Upsample};
use super::Segmenter;

#[derive(Config, Debug)]
pub struct UNetConfig {
    #[config(default = "2")]
    pub num_classes: usize,

    #[config(default = "3")]
    pub in_channels: usize,

    /// Channels at the first level, doubled at every level below
    #[config(default = "32")]
    pub base_filters: usize,

    /// Aligns upsampled maps with odd-sized skips
    #[config(default = "Upsample::Bilinear")]
    pub upsample: Upsample,
}

impl UNetConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> UNet<B> {
        UNet::new(self, device)
    }
}

/// Two 3x3 ConvBnRelu
#[derive(Module, Debug)]
pub struct DoubleConv<B: Backend> {
    pub first: ConvBnRelu<B>,
    pub second: ConvBnRelu<B>,
}

impl<B: Backend> DoubleConv<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        Self {
            first: ConvBnRelu::new(in_channels, out_channels, 3, device),
            second: ConvBnRelu::new(out_channels, out_channels, 3, device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.second.forward(self.first.forward(x))
    }
}

/// Transposed-conv upsampling, skip concatenation, DoubleConv
#[derive(Module, Debug)]
pub struct UpBlock<B: Backend> {
    pub up: ConvTranspose2d<B>,
    pub conv: DoubleConv<B>,
    upsample: Ignored<Upsample>,
}

impl<B: Backend> UpBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, method: Upsample, device: &B::Device) -> Self {
        Self {
            up: ConvTranspose2dConfig::new([in_channels, out_channels], [2, 2])
                .with_stride([2, 2])
                .init(device),
            conv: DoubleConv::new(out_channels * 2, out_channels, device),
            upsample: Ignored(method),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>, skip: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, _, h, w] = skip.dims();
        // Odd input sizes leave the upsampled map one pixel short
        let x = upsample(self.up.forward(x), [h, w], self.upsample.0);
        self.conv.forward(Tensor::cat(vec![skip, x], 1))
    }
}

#[derive(Module, Debug)]
pub struct UNet<B: Backend> {
    pub down: Vec<DoubleConv<B>>,
    pub pool: MaxPool2d,
    pub bottleneck: DoubleConv<B>,
    pub up: Vec<UpBlock<B>>,
    pub head: Conv2d<B>,
    num_classes: usize,
}

impl<B: Backend> UNet<B> {
    pub const LEVELS: usize = 4;

    pub fn new(config: &UNetConfig, device: &B::Device) -> Self {
        let b = config.base_filters;
        let widths: Vec<usize> = (0..Self::LEVELS).map(|level| b << level).collect();

        let mut down = Vec::with_capacity(Self::LEVELS);
        let mut in_channels = config.in_channels;
        for &width in &widths {
            down.push(DoubleConv::new(in_channels, width, device));
            in_channels = width;
        }

        let bottom = b << Self::LEVELS;
        let up = widths
            .iter()
            .rev()
            .map(|&width| UpBlock::new(width * 2, width, config.upsample, device))
            .collect();

        Self {
            down,
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            bottleneck: DoubleConv::new(in_channels, bottom, device),
            up,
            head: Conv2dConfig::new([b, config.num_classes], [1, 1]).init(device),
            num_classes: config.num_classes,
        }
    }

    /// Logits at input resolution, [N, num_classes, H, W]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut skips = Vec::with_capacity(Self::LEVELS);
        let mut x = x;
        for level in &self.down {
            let features = level.forward(x);
            x = self.pool.forward(features.clone());
            skips.push(features);
        }

        let mut x = self.bottleneck.forward(x);
        for (block, skip) in self.up.iter().zip(skips.into_iter().rev()) {
            x = block.forward(x, skip);
        }

        self.head.forward(x)
    }
}

impl<B: Backend> Segmenter<B> for UNet<B> {
    fn segment(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        self.forward(images)
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_unet_output_shape() {
        let device = Default::default();
        let model = UNetConfig::new()
            .with_num_classes(4)
            .with_base_filters(2)
            .init::<TestBackend>(&device);
        let out = model.segment(Tensor::zeros([2, 3, 32, 32], &device));
        assert_eq!(out.dims(), [2, 4, 32, 32]);
    }

    #[test]
    fn test_unet_odd_size() {
        let device = Default::default();
        let model = UNetConfig::new()
            .with_in_channels(1)
            .with_base_filters(2)
            .init::<TestBackend>(&device);
        let out = model.segment(Tensor::zeros([1, 1, 36, 20], &device));
        assert_eq!(out.dims(), [1, 2, 36, 20]);
    }

    #[test]
    fn test_unet_level_widths() {
        let device = Default::default();
        let model = UNetConfig::new().with_base_filters(4).init::<TestBackend>(&device);
        assert_eq!(model.down.len(), 4);
        assert_eq!(model.up.len(), 4);
    }

    #[test]
    fn test_odd_size_backward_with_nearest() {
        let device = Default::default();
        let model = UNetConfig::new()
            .with_base_filters(2)
            .with_upsample(Upsample::Nearest)
            .init::<Autodiff<TestBackend>>(&device);
        let out = model.segment(Tensor::ones([2, 3, 36, 20], &device));
        assert_eq!(out.dims(), [2, 2, 36, 20]);

        let grads = out.sum().backward();
        assert!(model.head.weight.val().grad(&grads).is_some());
    }
}
