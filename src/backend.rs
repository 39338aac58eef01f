//! Backend selection
//!
//! CUDA when the `cuda` feature is enabled, NdArray (CPU) otherwise.

use burn::backend::Autodiff;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

#[cfg(feature = "cuda")]
pub type DefaultBackend = burn_cuda::Cuda;

#[cfg(all(not(feature = "cuda"), any(feature = "ndarray", feature = "cpu")))]
pub type DefaultBackend = burn_ndarray::NdArray;

#[cfg(all(not(feature = "cuda"), not(feature = "ndarray"), not(feature = "cpu")))]
compile_error!("At least one backend (cuda, ndarray, or cpu) must be enabled!");

/// The default autodiff backend for training
pub type TrainingBackend = Autodiff<DefaultBackend>;

/// Get the default device
pub fn default_device() -> <DefaultBackend as Backend>::Device {
    <DefaultBackend as Backend>::Device::default()
}

/// Get a human-readable name for the current backend
pub fn backend_name() -> &'static str {
    #[cfg(feature = "cuda")]
    {
        "CUDA (GPU)"
    }

    #[cfg(all(not(feature = "cuda"), any(feature = "ndarray", feature = "cpu")))]
    {
        "NdArray (CPU)"
    }
}

/// The device every model and batch of a run lives on
#[derive(Debug, Clone)]
pub struct ComputeContext<B: Backend> {
    pub device: B::Device,
    pub name: &'static str,
}

impl<B: Backend> ComputeContext<B> {
    pub fn new(device: B::Device, name: &'static str) -> Self {
        Self { device, name }
    }
}

impl ComputeContext<TrainingBackend> {
    /// Context for the compiled-in backend
    pub fn detect() -> Self {
        Self::new(default_device(), backend_name())
    }
}

/// Whether `B` can differentiate bilinear interpolation
///
/// NdArray only implements the nearest-neighbour backward pass.
pub fn supports_bilinear_backward<B: AutodiffBackend>() -> bool {
    !std::any::type_name::<B::InnerBackend>().contains("NdArray")
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    #[test]
    fn test_detect_uses_default_device() {
        let ctx = ComputeContext::<TrainingBackend>::detect();
        assert_eq!(ctx.name, backend_name());
        let t = Tensor::<TrainingBackend, 1>::from_floats([1.0, 2.0], &ctx.device);
        assert_eq!(t.into_data().to_vec::<f32>().unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_ndarray_lacks_bilinear_backward() {
        assert!(!supports_bilinear_backward::<Autodiff<NdArray<f32>>>());
    }
}
