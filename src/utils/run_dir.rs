//! Run directory selection
//!
//! Runs live under `<save_root>/run/run_NN`. A fresh run takes the next free
//! number; a resumed run reuses the newest one.

use std::fs;
use std::path::{Path, PathBuf};

use super::error::Result;

/// A selected run directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDir {
    pub id: usize,
    pub path: PathBuf,
}

impl RunDir {
    /// Where model snapshots and log directories are written
    pub fn models_dir(&self) -> PathBuf {
        self.path.join("models")
    }
}

/// Largest `run_NN` suffix found under `<save_root>/run`
pub fn latest_run_id(save_root: &Path) -> Result<Option<usize>> {
    let runs = save_root.join("run");
    if !runs.is_dir() {
        return Ok(None);
    }

    let mut latest = None;
    for entry in fs::read_dir(&runs)? {
        let entry = entry?;
        let name = entry.file_name();
        let id = name
            .to_str()
            .and_then(|n| n.strip_prefix("run_"))
            .and_then(|n| n.parse::<usize>().ok());
        if let Some(id) = id {
            latest = latest.max(Some(id));
        }
    }
    Ok(latest)
}

/// Pick the run directory for this invocation
///
/// Does not create the directory.
pub fn select_run_dir(save_root: &Path, resume: bool) -> Result<RunDir> {
    let id = match (latest_run_id(save_root)?, resume) {
        (Some(id), true) => id,
        (Some(id), false) => id + 1,
        (None, _) => 0,
    };

    Ok(RunDir {
        id,
        path: save_root.join("run").join(format!("run_{:02}", id)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_run_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        let run = select_run_dir(dir.path(), false).unwrap();
        assert_eq!(run.id, 0);
        assert!(run.path.ends_with("run/run_00"));
    }

    #[test]
    fn test_fresh_run_increments() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("run/run_00")).unwrap();
        fs::create_dir_all(dir.path().join("run/run_03")).unwrap();
        fs::create_dir_all(dir.path().join("run/notes")).unwrap();

        let run = select_run_dir(dir.path(), false).unwrap();
        assert_eq!(run.id, 4);
        assert!(run.path.ends_with("run_04"));
    }

    #[test]
    fn test_resume_reuses_latest() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("run/run_09")).unwrap();
        fs::create_dir_all(dir.path().join("run/run_10")).unwrap();

        let run = select_run_dir(dir.path(), true).unwrap();
        assert_eq!(run.id, 10);
        assert_eq!(run.models_dir(), dir.path().join("run/run_10/models"));
    }
}
