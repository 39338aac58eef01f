//! Pixel-wise cross-entropy for segmentation logits

use burn::prelude::*;
use burn::tensor::activation::log_softmax;

/// Label value excluded from the loss
pub const IGNORE_INDEX: i64 = 255;

/// How the summed per-pixel loss is normalized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reduction {
    /// Divide by H·W
    pub size_average: bool,
    /// Divide by N
    pub batch_average: bool,
}

impl Reduction {
    pub const SUM: Self = Self {
        size_average: false,
        batch_average: false,
    };

    pub const fn new(size_average: bool, batch_average: bool) -> Self {
        Self {
            size_average,
            batch_average,
        }
    }
}

/// Cross-entropy of `logits` [N, K, H, W] against `target` [N, H, W]
///
/// Pixels labelled [`IGNORE_INDEX`] contribute nothing. Returns a single
/// element tensor.
pub fn cross_entropy_2d<B: Backend>(
    logits: Tensor<B, 4>,
    target: Tensor<B, 3, Int>,
    reduction: Reduction,
) -> Tensor<B, 1> {
    let [n, k, h, w] = logits.dims();

    let ignored = target.clone().equal_elem(IGNORE_INDEX);
    let safe_target = target
        .mask_fill(ignored.clone(), 0)
        .clamp(0, k as i64 - 1)
        .unsqueeze_dim::<4>(1);

    let log_probs = log_softmax(logits, 1);
    let picked: Tensor<B, 3> = log_probs.gather(1, safe_target).squeeze::<3>(1);
    let nll = picked.neg().mask_fill(ignored, 0.0);

    let mut loss = nll.sum();
    if reduction.size_average {
        loss = loss.div_scalar((h * w) as f64);
    }
    if reduction.batch_average {
        loss = loss.div_scalar(n as f64);
    }
    loss
}

/// Train and evaluation reductions for a model family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Criterion {
    pub train: Reduction,
    pub eval: Reduction,
}

impl Criterion {
    /// Summed over pixels and averaged over the batch while training,
    /// per-pixel and per-image mean while evaluating
    pub fn deeplab() -> Self {
        Self {
            train: Reduction::new(false, true),
            eval: Reduction::new(true, true),
        }
    }

    /// Plain sum for both phases
    pub fn summed() -> Self {
        Self {
            train: Reduction::SUM,
            eval: Reduction::SUM,
        }
    }

    pub fn train_loss<B: Backend>(&self, logits: Tensor<B, 4>, target: Tensor<B, 3, Int>) -> Tensor<B, 1> {
        cross_entropy_2d(logits, target, self.train)
    }

    pub fn eval_loss<B: Backend>(&self, logits: Tensor<B, 4>, target: Tensor<B, 3, Int>) -> Tensor<B, 1> {
        cross_entropy_2d(logits, target, self.eval)
    }
}
