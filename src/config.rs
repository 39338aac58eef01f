//! Run Configuration Module
//!
//! A training run is described by one TOML document. The `train` and `eval`
//! sections are required; hyperparameters, model selection and output
//! locations fall back to defaults.
//!
//! ```toml
//! [train]
//! batch_size = 4
//! training_fraction = 0.9
//! datasets = [{ images = "data/sim/images", labels = "data/sim/labels" }]
//!
//! [eval]
//! datasets_synthetic = [{ images = "data/val/images", labels = "data/val/labels" }]
//! datasets_real = [{ images = "data/real/images" }]
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dataset::augmentation::AugmentationConfig;
use crate::model::blocks::Upsample;
use crate::utils::error::{Result, SegError};

/// An images directory and its (optional) labels directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetPaths {
    pub images: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<PathBuf>,
}

impl DatasetPaths {
    pub fn new(images: impl Into<PathBuf>, labels: Option<PathBuf>) -> Self {
        Self {
            images: images.into(),
            labels,
        }
    }
}

/// `[train]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainSection {
    /// Batch size shared by all three loaders
    pub batch_size: usize,
    /// Leading fraction of every training source that is used
    pub training_fraction: f64,
    pub datasets: Vec<DatasetPaths>,
}

/// `[eval]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalSection {
    /// Label-bearing validation sources (only the last one is used)
    pub datasets_synthetic: Vec<DatasetPaths>,
    /// Test sources, labels optional (only the last one is used)
    pub datasets_real: Vec<DatasetPaths>,
}

/// `[hyper]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HyperParams {
    pub n_epochs: usize,
    /// Epoch to start from; non-zero loads the snapshot of epoch `resume_epoch - 1`
    pub resume_epoch: usize,
    pub use_test: bool,
    /// Evaluate every `test_interval` epochs
    pub test_interval: usize,
    /// Save a snapshot every `snapshot` epochs
    pub snapshot: usize,
    /// Only reported; the test loader uses `train.batch_size`
    pub test_batch_size: usize,
    /// Gradient accumulation window
    pub n_ave_grad: usize,
    /// Base learning rate of the polynomial policy
    pub lr: f64,
    pub weight_decay: f64,
    pub momentum: f64,
    /// Epochs between polynomial learning-rate updates
    pub epoch_size: usize,
    pub poly_power: f64,
    /// Step scheduler period (epochs)
    pub step_size: usize,
    /// Step scheduler decay factor
    pub gamma: f64,
    /// Base learning rate of the step policy
    pub fixed_lr: f64,
    pub fixed_weight_decay: f64,
    pub num_workers: usize,
    /// Seed for the training loader shuffle
    pub seed: u64,
}

impl Default for HyperParams {
    fn default() -> Self {
        Self {
            n_epochs: 100,
            resume_epoch: 0,
            use_test: true,
            test_interval: 1,
            snapshot: 2,
            test_batch_size: 1,
            n_ave_grad: 1,
            lr: 1e-6,
            weight_decay: 5e-2,
            momentum: 0.9,
            epoch_size: 1,
            poly_power: 0.9,
            step_size: 7,
            gamma: 0.1,
            fixed_lr: 1e-4,
            fixed_weight_decay: 1e-4,
            num_workers: 4,
            seed: 42,
        }
    }
}

/// `[model]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSection {
    /// `deeplab` or `unet`
    pub family: String,
    /// `xception` or `resnet` (deeplab only)
    pub backbone: String,
    pub num_classes: usize,
    /// Side length images and labels are resized to
    pub image_size: usize,
    /// 8 or 16
    pub output_stride: usize,
    pub input_channels: usize,
    /// Width of the first encoder stage; later stages scale from it
    pub base_filters: usize,
    /// Feature map resizing: `bilinear` or `nearest`
    pub upsample: Upsample,
    /// Encoder weights to start from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pretrained_backbone: Option<PathBuf>,
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            family: "deeplab".to_string(),
            backbone: "xception".to_string(),
            num_classes: 2,
            image_size: 512,
            output_stride: 8,
            input_channels: 3,
            base_filters: 32,
            upsample: Upsample::default(),
            pretrained_backbone: None,
        }
    }
}

/// `[output]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    /// Parent of the `run/run_NN` directories
    pub save_root: PathBuf,
    /// Where test diagnostics are written each batch
    pub results_dir: PathBuf,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            save_root: PathBuf::from("."),
            results_dir: PathBuf::from("data/results/current_training_model"),
        }
    }
}

fn invalid(msg: &str) -> SegError {
    SegError::Config(msg.to_string())
}

/// Complete description of a training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub train: TrainSection,
    pub eval: EvalSection,
    #[serde(default)]
    pub hyper: HyperParams,
    #[serde(default)]
    pub model: ModelSection,
    #[serde(default)]
    pub augmentation: AugmentationConfig,
    #[serde(default)]
    pub output: OutputSection,
}

impl RunConfig {
    /// Read and parse a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| SegError::Config(format!("Failed to read config {}: {e}", path.display())))?;

        Self::from_toml_str(&content)
            .map_err(|e| SegError::Config(format!("{} ({})", e, path.display())))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| SegError::Config(format!("Failed to parse config: {e}")))
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| SegError::Serialization(e.to_string()))
    }

    /// Check the values serde cannot
    pub fn validate(&self) -> Result<()> {
        if self.train.batch_size == 0 {
            return Err(invalid("train.batch_size must be greater than 0"));
        }

        if !(self.train.training_fraction > 0.0 && self.train.training_fraction <= 1.0) {
            return Err(invalid("train.training_fraction must be in range (0.0, 1.0]"));
        }

        if self.train.datasets.is_empty() {
            return Err(invalid("train.datasets must list at least one source"));
        }

        if let Some(d) = self.train.datasets.iter().find(|d| d.labels.is_none()) {
            return Err(SegError::Config(format!("training source {} has no labels", d.images.display())));
        }

        if self.eval.datasets_synthetic.is_empty() {
            return Err(invalid("eval.datasets_synthetic must list at least one source"));
        }

        if let Some(d) = self.eval.datasets_synthetic.iter().find(|d| d.labels.is_none()) {
            return Err(SegError::Config(format!("validation source {} has no labels", d.images.display())));
        }

        if self.eval.datasets_real.is_empty() {
            return Err(invalid("eval.datasets_real must list at least one source"));
        }

        let h = &self.hyper;
        if h.n_ave_grad == 0 || h.snapshot == 0 || h.epoch_size == 0 || h.test_interval == 0 {
            return Err(invalid("n_ave_grad, snapshot, epoch_size and test_interval must be at least 1"));
        }

        if h.resume_epoch > h.n_epochs {
            return Err(SegError::Config(format!(
                "resume_epoch {} is past n_epochs {}",
                h.resume_epoch, h.n_epochs
            )));
        }

        let m = &self.model;
        if m.num_classes < 2 {
            return Err(invalid("model.num_classes must be at least 2"));
        }

        if m.input_channels != 1 && m.input_channels != 3 {
            return Err(invalid("model.input_channels must be 1 or 3"));
        }

        if m.image_size == 0 || m.base_filters == 0 {
            return Err(invalid("model.image_size and model.base_filters must be positive"));
        }

        Ok(())
    }

    /// Name of the experiment, taken from the save root's directory name
    pub fn exp_name(&self) -> String {
        let root = self
            .output
            .save_root
            .canonicalize()
            .unwrap_or_else(|_| self.output.save_root.clone());

        root.file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .unwrap_or_else(|| "segtrain".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[train]
batch_size = 2
training_fraction = 0.5
datasets = [{ images = "a/images", labels = "a/labels" }]

[eval]
datasets_synthetic = [
    { images = "v1/images", labels = "v1/labels" },
    { images = "v2/images", labels = "v2/labels" },
]
datasets_real = [{ images = "r/images" }]
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = RunConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.train.batch_size, 2);
        assert_eq!(config.eval.datasets_synthetic.len(), 2);
        assert_eq!(config.eval.datasets_real[0].labels, None);
        assert_eq!(config.hyper.n_epochs, 100);
        assert_eq!(config.hyper.snapshot, 2);
        assert_eq!(config.hyper.lr, 1e-6);
        assert_eq!(config.model.family, "deeplab");
        assert_eq!(config.model.output_stride, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides_are_read() {
        let text = format!(
            "{}\n[hyper]\nn_epochs = 3\nn_ave_grad = 4\n\n[model]\nfamily = \"unet\"\n",
            MINIMAL
        );
        let config = RunConfig::from_toml_str(&text).unwrap();
        assert_eq!(config.hyper.n_epochs, 3);
        assert_eq!(config.hyper.n_ave_grad, 4);
        assert_eq!(config.hyper.momentum, 0.9);
        assert_eq!(config.model.family, "unet");
    }

    #[test]
    fn test_missing_required_section() {
        let err = RunConfig::from_toml_str("[train]\nbatch_size = 2\n").unwrap_err();
        assert!(matches!(err, SegError::Config(_)));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let base = RunConfig::from_toml_str(MINIMAL).unwrap();

        let mut config = base.clone();
        config.train.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.train.training_fraction = 1.5;
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.hyper.n_ave_grad = 0;
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.train.datasets[0].labels = None;
        assert!(config.validate().is_err());

        let mut config = base;
        config.model.input_channels = 4;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_epoch_size_is_a_config_error() {
        let mut config = RunConfig::from_toml_str(MINIMAL).unwrap();
        config.hyper.epoch_size = 0;
        assert!(matches!(config.validate(), Err(SegError::Config(_))));
    }

    #[test]
    fn test_upsample_is_read() {
        let text = format!("{}\n[model]\nupsample = \"bilinear\"\n", MINIMAL);
        let config = RunConfig::from_toml_str(&text).unwrap();
        assert_eq!(config.model.upsample, Upsample::Bilinear);
    }

    #[test]
    fn test_roundtrip_through_toml() {
        let config = RunConfig::from_toml_str(MINIMAL).unwrap();
        let text = config.to_toml_string().unwrap();
        let again = RunConfig::from_toml_str(&text).unwrap();
        assert_eq!(again.train.datasets, config.train.datasets);
    }

    #[test]
    fn test_load_missing_file() {
        let err = RunConfig::load(Path::new("/nonexistent/segtrain.toml")).unwrap_err();
        assert!(format!("{}", err).contains("Failed to read config"));
    }

    #[test]
    fn test_shipped_config_is_valid() {
        let config = RunConfig::from_toml_str(include_str!("../config/config.toml")).unwrap();
        config.validate().unwrap();
        assert_eq!(config.model.family, "deeplab");
        assert_eq!(config.model.output_stride, 8);
        assert_eq!(config.model.upsample, Upsample::Nearest);
    }
}
