//! Segmentation folder scanning
//!
//! A source is an images directory plus an optional labels directory. Label
//! maps share the image's file stem and hold one class index per pixel.
//!
//! ```text
//! images/                labels/
//! ├── frame_0001.jpg     ├── frame_0001.png
//! └── frame_0002.jpg     └── frame_0002.png
//! ```

use std::path::{Path, PathBuf};

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::utils::error::{Result, SegError};

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Files backing one sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplePaths {
    pub image: PathBuf,
    /// `None` for unlabelled (real-world) sources
    pub label: Option<PathBuf>,
    /// File name of the image, reported alongside each batch
    pub name: String,
}

/// The samples of one images/labels directory pair, sorted by file name
#[derive(Debug, Clone)]
pub struct SegmentationFolder {
    pub images_dir: PathBuf,
    pub labels_dir: Option<PathBuf>,
    pub samples: Vec<SamplePaths>,
}

impl SegmentationFolder {
    /// Scan a source
    ///
    /// Fails when a directory is missing or a labelled source lacks the label
    /// of one of its images.
    pub fn scan(images_dir: &Path, labels_dir: Option<&Path>) -> Result<Self> {
        if !images_dir.is_dir() {
            return Err(SegError::PathNotFound(images_dir.to_path_buf()));
        }
        if let Some(dir) = labels_dir {
            if !dir.is_dir() {
                return Err(SegError::PathNotFound(dir.to_path_buf()));
            }
        }

        let mut images: Vec<PathBuf> = WalkDir::new(images_dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| e.into_path())
            .filter(|p| p.is_file() && is_image(p))
            .collect();
        images.sort();

        let mut samples = Vec::with_capacity(images.len());
        for image in images {
            let name = image
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();

            let label = match labels_dir {
                Some(dir) => Some(find_label(dir, &image)?),
                None => None,
            };

            samples.push(SamplePaths { image, label, name });
        }

        info!(
            "Found {} samples in {:?} (labels: {})",
            samples.len(),
            images_dir,
            labels_dir.map_or("none".to_string(), |d| d.display().to_string())
        );

        Ok(Self {
            images_dir: images_dir.to_path_buf(),
            labels_dir: labels_dir.map(Path::to_path_buf),
            samples,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// Label with the same file name, or else the same stem with any image extension
fn find_label(labels_dir: &Path, image: &Path) -> Result<PathBuf> {
    if let Some(name) = image.file_name() {
        let same_name = labels_dir.join(name);
        if same_name.is_file() {
            return Ok(same_name);
        }
    }

    let stem = image
        .file_stem()
        .ok_or_else(|| SegError::Dataset(format!("image {:?} has no file stem", image)))?;

    for ext in IMAGE_EXTENSIONS {
        let candidate = labels_dir.join(format!("{}.{}", stem.to_string_lossy(), ext));
        if candidate.is_file() {
            debug!("Label for {:?} is {:?}", image, candidate);
            return Ok(candidate);
        }
    }

    Err(SegError::Dataset(format!(
        "no label for {:?} in {:?}",
        image, labels_dir
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn test_scan_pairs_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let images = dir.path().join("images");
        let labels = dir.path().join("labels");
        fs::create_dir_all(&images).unwrap();
        fs::create_dir_all(&labels).unwrap();

        touch(&images.join("b.jpg"));
        touch(&images.join("a.png"));
        touch(&images.join("notes.txt"));
        touch(&labels.join("a.png"));
        touch(&labels.join("b.png"));

        let folder = SegmentationFolder::scan(&images, Some(&labels)).unwrap();
        assert_eq!(folder.len(), 2);
        assert_eq!(folder.samples[0].name, "a.png");
        assert_eq!(folder.samples[1].label.as_deref(), Some(labels.join("b.png").as_path()));
    }

    #[test]
    fn test_missing_label_fails() {
        let dir = tempfile::tempdir().unwrap();
        let images = dir.path().join("images");
        let labels = dir.path().join("labels");
        fs::create_dir_all(&images).unwrap();
        fs::create_dir_all(&labels).unwrap();
        touch(&images.join("a.png"));

        assert!(matches!(
            SegmentationFolder::scan(&images, Some(&labels)),
            Err(SegError::Dataset(_))
        ));
    }

    #[test]
    fn test_unlabelled_source() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("x.bmp"));
        let folder = SegmentationFolder::scan(dir.path(), None).unwrap();
        assert_eq!(folder.samples[0].label, None);
    }

    #[test]
    fn test_missing_directory() {
        let err = SegmentationFolder::scan(Path::new("/nonexistent/images"), None).unwrap_err();
        assert!(matches!(err, SegError::PathNotFound(_)));
    }
}
