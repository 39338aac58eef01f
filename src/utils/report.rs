//! Human-readable dump of the run's hyperparameters.

use std::fmt::Display;
use std::fs;
use std::path::Path;

use super::error::Result;

/// Ordered `key:value` pairs written once when a run starts
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamReport {
    entries: Vec<(String, String)>,
}

impl ParamReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, keeping insertion order
    pub fn add(mut self, key: &str, value: impl Display) -> Self {
        self.entries.push((key.to_string(), value.to_string()));
        self
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect()
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.render())?;
        Ok(())
    }
}
