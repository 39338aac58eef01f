//! # segtrain
//!
//! Training loop for semantic segmentation networks (DeepLabV3+ and UNet)
//! built on the Burn framework.
//!
//! ## Features
//!
//! - **DeepLabV3+** with an Xception-style or ResNet-style encoder, or a **UNet**
//! - **Multi-source datasets** with per-source truncation for training
//! - **Gradient accumulation** and poly/step learning rate policies
//! - **Periodic validation and test** with mIoU, loss curves and image grids
//! - **Resumable runs** with numbered run directories and epoch checkpoints
//!
//! ## Modules
//!
//! - `config`: TOML run configuration
//! - `dataset`: Folder scanning, augmentation, Burn dataset and batch loading
//! - `model`: Segmentation networks and family resolution
//! - `training`: Loss, schedules, the epoch loop, evaluation and checkpoints
//! - `utils`: Errors, logging, IoU, metrics sink, visualization, run directories
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use segtrain::config::RunConfig;
//! use segtrain::training::run_training;
//!
//! let config = RunConfig::load("config/config.toml".as_ref())?;
//! let summary = run_training(&config)?;
//! println!("run {} finished", summary.run_dir.id);
//! ```

pub mod backend;
pub mod config;
pub mod dataset;
pub mod model;
pub mod training;
pub mod utils;

pub use config::RunConfig;
pub use dataset::{SegmentationBatch, SegmentationDataset, SegmentationItem};
pub use model::{DeepLabV3Plus, ModelFamily, Segmenter, UNet};
pub use training::{run_training, RunSummary, Trainer, TrainingState};
pub use utils::error::{Result, SegError};
pub use utils::metrics::{get_iou, IouResult};

/// Label value excluded from loss and IoU
pub const IGNORE_INDEX: i64 = training::loss::IGNORE_INDEX;

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
