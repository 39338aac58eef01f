//! Training module
//!
//! This module provides:
//! - Pixel-wise cross-entropy criteria per model family
//! - Poly and step learning rate policies
//! - The epoch loop with gradient accumulation
//! - Validation and test passes with mIoU
//! - Checkpoints and the end-to-end run pipeline

pub mod checkpoint;
pub mod evaluator;
pub mod loss;
pub mod pipeline;
pub mod scheduler;
pub mod state;
pub mod trainer;

pub use evaluator::{EvalKind, EvalOutcome, Evaluator};
pub use loss::{cross_entropy_2d, Criterion, Reduction};
pub use pipeline::{run_training, run_training_with, RunSummary};
pub use scheduler::{lr_poly, LrPolicy, StepLr};
pub use state::TrainingState;
pub use trainer::{Trainer, TrainerSettings};
