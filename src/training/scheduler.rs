//! Learning rate policies
//!
//! - Poly: `base * (1 - epoch / max_epochs)^power`, applied by rebuilding the
//!   optimizer every `epoch_size` epochs
//! - Step: multiply by `gamma` every `step_size` scheduler steps

use serde::{Deserialize, Serialize};

/// Polynomial decay
pub fn lr_poly(base_lr: f64, epoch: usize, max_epochs: usize, power: f64) -> f64 {
    base_lr * (1.0 - epoch as f64 / max_epochs as f64).powf(power)
}

/// Which schedule drives the optimizer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum LrPolicy {
    /// SGD, rebuilt with a poly learning rate
    Poly {
        base_lr: f64,
        epoch_size: usize,
        power: f64,
    },
    /// Adam with step decay
    Step {
        base_lr: f64,
        step_size: usize,
        gamma: f64,
    },
}

impl LrPolicy {
    pub fn base_lr(&self) -> f64 {
        match self {
            Self::Poly { base_lr, .. } | Self::Step { base_lr, .. } => *base_lr,
        }
    }

    /// New learning rate at the start of `epoch`, if the poly policy updates now
    pub fn poly_update(&self, epoch: usize, n_epochs: usize) -> Option<f64> {
        match *self {
            Self::Poly {
                base_lr,
                epoch_size,
                power,
            } if epoch_size > 0 && epoch % epoch_size == epoch_size - 1 => {
                Some(lr_poly(base_lr, epoch, n_epochs, power))
            }
            _ => None,
        }
    }
}

/// Step decay scheduler
#[derive(Debug, Clone)]
pub struct StepLr {
    step_size: usize,
    gamma: f64,
    current_lr: f64,
    steps: usize,
}

impl StepLr {
    pub fn new(base_lr: f64, step_size: usize, gamma: f64) -> Self {
        Self {
            step_size: step_size.max(1),
            gamma,
            current_lr: base_lr,
            steps: 0,
        }
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Advance one epoch and return the new learning rate
    pub fn step(&mut self) -> f64 {
        self.steps += 1;
        if self.steps % self.step_size == 0 {
            self.current_lr *= self.gamma;
        }
        self.current_lr
    }
}
