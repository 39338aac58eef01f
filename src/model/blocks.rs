//! Convolutional building blocks shared by the segmentation networks

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
    },
    tensor::{
        backend::Backend,
        module::interpolate,
        ops::{InterpolateMode, InterpolateOptions},
        Tensor,
    },
};
use serde::{Deserialize, Serialize};

/// Padding that keeps the spatial size of a stride-1 dilated convolution
fn same_padding(kernel_size: usize, dilation: usize) -> PaddingConfig2d {
    let pad = dilation * (kernel_size - 1) / 2;
    PaddingConfig2d::Explicit(pad, pad)
}

/// Conv2d, BatchNorm and an optional ReLU
#[derive(Module, Debug)]
pub struct ConvBnRelu<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B, 2>,
    pub relu: Relu,
    activate: bool,
}

impl<B: Backend> ConvBnRelu<B> {
    pub fn new(in_channels: usize, out_channels: usize, kernel_size: usize, device: &B::Device) -> Self {
        Self::with_options(in_channels, out_channels, kernel_size, 1, 1, true, device)
    }

    pub fn with_options(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        dilation: usize,
        activate: bool,
        device: &B::Device,
    ) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [kernel_size, kernel_size])
            .with_stride([stride, stride])
            .with_dilation([dilation, dilation])
            .with_padding(same_padding(kernel_size, dilation))
            .with_bias(false)
            .init(device);

        Self {
            conv,
            bn: BatchNormConfig::new(out_channels).init(device),
            relu: Relu::new(),
            activate,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.bn.forward(self.conv.forward(x));
        if self.activate {
            self.relu.forward(x)
        } else {
            x
        }
    }
}

/// Depthwise 3x3 followed by a pointwise 1x1, each with BatchNorm
#[derive(Module, Debug)]
pub struct SeparableConv<B: Backend> {
    pub depthwise: Conv2d<B>,
    pub bn_depth: BatchNorm<B, 2>,
    pub pointwise: Conv2d<B>,
    pub bn_point: BatchNorm<B, 2>,
    pub relu: Relu,
}

impl<B: Backend> SeparableConv<B> {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        stride: usize,
        dilation: usize,
        device: &B::Device,
    ) -> Self {
        let depthwise = Conv2dConfig::new([in_channels, in_channels], [3, 3])
            .with_stride([stride, stride])
            .with_dilation([dilation, dilation])
            .with_padding(same_padding(3, dilation))
            .with_groups(in_channels)
            .with_bias(false)
            .init(device);
        let pointwise = Conv2dConfig::new([in_channels, out_channels], [1, 1])
            .with_bias(false)
            .init(device);

        Self {
            depthwise,
            bn_depth: BatchNormConfig::new(in_channels).init(device),
            pointwise,
            bn_point: BatchNormConfig::new(out_channels).init(device),
            relu: Relu::new(),
        }
    }

    /// ReLU is applied after the pointwise BatchNorm
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.bn_depth.forward(self.depthwise.forward(x));
        let x = self.bn_point.forward(self.pointwise.forward(x));
        self.relu.forward(x)
    }
}

/// Interpolation used when a feature map is resized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Upsample {
    Bilinear,
    /// Has a backward pass on every backend, NdArray included
    Nearest,
}

impl Upsample {
    pub fn mode(&self) -> InterpolateMode {
        match self {
            Self::Bilinear => InterpolateMode::Bilinear,
            Self::Nearest => InterpolateMode::Nearest,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Bilinear => "bilinear",
            Self::Nearest => "nearest",
        }
    }
}

impl Default for Upsample {
    /// Bilinear on GPU builds, nearest on CPU builds
    fn default() -> Self {
        if cfg!(feature = "cuda") {
            Self::Bilinear
        } else {
            Self::Nearest
        }
    }
}

/// Resize a [N, C, H, W] tensor to `[height, width]`
pub fn upsample<B: Backend>(x: Tensor<B, 4>, size: [usize; 2], method: Upsample) -> Tensor<B, 4> {
    let [_, _, h, w] = x.dims();
    if [h, w] == size {
        return x;
    }
    interpolate(x, size, InterpolateOptions::new(method.mode()))
}
