//! Metrics sink
//!
//! Scalars and image grids keyed by the global step. [`FileSummaryWriter`]
//! appends scalars as JSON lines and writes grids as PNG files under the run's
//! log directory; [`MemorySink`] keeps everything in memory.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{Local, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};

use super::error::Result;

/// Tags emitted by the training and evaluation loops
pub mod tags {
    pub const TOTAL_LOSS_EPOCH: &str = "data/total_loss_epoch";
    pub const TOTAL_LOSS_ITER: &str = "data/total_loss_iter";
    pub const VAL_LOSS_EPOCH: &str = "data/val_loss_epoch";
    pub const VAL_MIOU: &str = "data/val_miour";
    pub const TEST_LOSS_EPOCH: &str = "data/test_loss_epoch";
    pub const TEST_MIOU: &str = "data/test_miour";
    pub const EPOCH_NUM: &str = "Epoch Num";

    pub const TRAIN_GRID: &str = "Train";
    pub const VALIDATION_GRID: &str = "Validation";
    pub const TEST_GRID: &str = "Test";
}

/// Destination for scalar series and image grids
pub trait MetricsSink {
    fn add_scalar(&mut self, tag: &str, value: f64, step: usize) -> Result<()>;

    fn add_image(&mut self, tag: &str, image: &RgbImage, step: usize) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// One line of `scalars.jsonl`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarRecord {
    pub tag: String,
    pub value: f64,
    pub step: usize,
    /// Seconds since the Unix epoch
    pub wall_time: f64,
}

/// File-backed sink
pub struct FileSummaryWriter {
    log_dir: PathBuf,
    scalars: BufWriter<File>,
}

impl FileSummaryWriter {
    /// Open (or append to) a sink rooted at `log_dir`
    pub fn new(log_dir: impl Into<PathBuf>) -> Result<Self> {
        let log_dir = log_dir.into();
        fs::create_dir_all(&log_dir)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_dir.join("scalars.jsonl"))?;

        Ok(Self {
            log_dir,
            scalars: BufWriter::new(file),
        })
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }
}

impl MetricsSink for FileSummaryWriter {
    fn add_scalar(&mut self, tag: &str, value: f64, step: usize) -> Result<()> {
        let record = ScalarRecord {
            tag: tag.to_string(),
            value,
            step,
            wall_time: Utc::now().timestamp_millis() as f64 / 1000.0,
        };
        serde_json::to_writer(&mut self.scalars, &record)?;
        self.scalars.write_all(b"\n")?;
        Ok(())
    }

    fn add_image(&mut self, tag: &str, image: &RgbImage, step: usize) -> Result<()> {
        let dir = self.log_dir.join("images").join(sanitize_tag(tag));
        fs::create_dir_all(&dir)?;
        image.save(dir.join(format!("{:08}.png", step)))?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.scalars.flush()?;
        Ok(())
    }
}

/// An image grid captured by [`MemorySink`]
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    pub tag: String,
    pub step: usize,
    pub width: u32,
    pub height: u32,
}

/// In-memory sink, used for dry runs and tests
#[derive(Debug, Default)]
pub struct MemorySink {
    pub scalars: Vec<ScalarRecord>,
    pub images: Vec<ImageRecord>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// (step, value) pairs recorded under `tag`, in emission order
    pub fn series(&self, tag: &str) -> Vec<(usize, f64)> {
        self.scalars
            .iter()
            .filter(|r| r.tag == tag)
            .map(|r| (r.step, r.value))
            .collect()
    }

    pub fn images_for(&self, tag: &str) -> Vec<&ImageRecord> {
        self.images.iter().filter(|r| r.tag == tag).collect()
    }
}

impl MetricsSink for MemorySink {
    fn add_scalar(&mut self, tag: &str, value: f64, step: usize) -> Result<()> {
        self.scalars.push(ScalarRecord {
            tag: tag.to_string(),
            value,
            step,
            wall_time: 0.0,
        });
        Ok(())
    }

    fn add_image(&mut self, tag: &str, image: &RgbImage, step: usize) -> Result<()> {
        self.images.push(ImageRecord {
            tag: tag.to_string(),
            step,
            width: image.width(),
            height: image.height(),
        });
        Ok(())
    }
}

/// Log directory name for a new writer: `<MonDD_HH-MM-SS>_<hostname>`
pub fn log_dir_name() -> String {
    format!("{}_{}", Local::now().format("%b%d_%H-%M-%S"), hostname())
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

fn sanitize_tag(tag: &str) -> String {
    tag.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_writer_appends_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = FileSummaryWriter::new(dir.path().join("logs")).unwrap();
        writer.add_scalar(tags::VAL_MIOU, 0.5, 3).unwrap();
        writer.add_scalar(tags::EPOCH_NUM, 1.0, 4).unwrap();
        writer.flush().unwrap();

        let content = fs::read_to_string(dir.path().join("logs/scalars.jsonl")).unwrap();
        let records: Vec<ScalarRecord> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].tag, "data/val_miour");
        assert_eq!(records[1].step, 4);
    }

    #[test]
    fn test_file_writer_images() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = FileSummaryWriter::new(dir.path()).unwrap();
        writer
            .add_image(tags::TRAIN_GRID, &RgbImage::new(4, 4), 12)
            .unwrap();
        assert!(dir.path().join("images/Train/00000012.png").exists());
    }

    #[test]
    fn test_memory_sink_series() {
        let mut sink = MemorySink::new();
        sink.add_scalar(tags::TOTAL_LOSS_ITER, 2.0, 1).unwrap();
        sink.add_scalar(tags::TOTAL_LOSS_ITER, 1.0, 2).unwrap();
        sink.add_scalar(tags::EPOCH_NUM, 0.0, 2).unwrap();
        assert_eq!(sink.series(tags::TOTAL_LOSS_ITER), vec![(1, 2.0), (2, 1.0)]);
    }

    #[test]
    fn test_log_dir_name_has_host_suffix() {
        let name = log_dir_name();
        assert!(name.contains('_'));
        assert!(!name.ends_with('_'));
    }

    #[test]
    fn test_sanitize_tag() {
        assert_eq!(sanitize_tag("data/Epoch Num"), "data_Epoch_Num");
    }
}
