//! Model checkpoints
//!
//! `<models_dir>/<model_name>_epoch-<epoch>.pth`, holding the full module
//! record in full precision.

use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::backend::Backend,
};
use tracing::info;

use crate::utils::error::{Result, SegError};

type CheckpointRecorder = BinBytesRecorder<FullPrecisionSettings>;

pub fn checkpoint_path(models_dir: &Path, model_name: &str, epoch: usize) -> PathBuf {
    models_dir.join(format!("{}_epoch-{}.pth", model_name, epoch))
}

/// Checkpoint a resumed run starts from, written at the end of `resume_epoch - 1`
pub fn resume_checkpoint_path(models_dir: &Path, model_name: &str, resume_epoch: usize) -> Option<PathBuf> {
    resume_epoch
        .checked_sub(1)
        .map(|epoch| checkpoint_path(models_dir, model_name, epoch))
}

pub fn save_checkpoint<B: Backend, M: Module<B>>(model: &M, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let bytes = Recorder::<B>::record(&CheckpointRecorder::default(), model.clone().into_record(), ())
        .map_err(|e| SegError::Checkpoint(format!("failed to encode model: {:?}", e)))?;
    std::fs::write(path, bytes)?;

    info!("Save model at {}", path.display());
    Ok(())
}

pub fn load_checkpoint<B: Backend, M: Module<B>>(model: M, path: &Path, device: &B::Device) -> Result<M> {
    if !path.is_file() {
        return Err(SegError::PathNotFound(path.to_path_buf()));
    }
    info!("Initializing weights from: {}...", path.display());

    let bytes = std::fs::read(path)?;
    let record = Recorder::<B>::load(&CheckpointRecorder::default(), bytes, device)
        .map_err(|e| SegError::Checkpoint(format!("failed to decode {:?}: {:?}", path, e)))?;
    Ok(model.load_record(record))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_names() {
        let dir = Path::new("/runs/run_03/models");
        assert_eq!(
            checkpoint_path(dir, "deeplabv3plus-xception", 9),
            PathBuf::from("/runs/run_03/models/deeplabv3plus-xception_epoch-9.pth")
        );
        assert_eq!(
            resume_checkpoint_path(dir, "unet", 4),
            Some(PathBuf::from("/runs/run_03/models/unet_epoch-3.pth"))
        );
        assert_eq!(resume_checkpoint_path(dir, "unet", 0), None);
    }
}
