//! Envelope configuration: the set of paths an operation may touch.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{LoopguardError, Result};

/// Allow/deny globs plus symlink policy for one agent envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeConfig {
    pub allowed_paths: Vec<String>,
    pub denied_paths: Vec<String>,
    pub reject_symlinks: bool,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            allowed_paths: Vec::new(),
            denied_paths: Vec::new(),
            reject_symlinks: true,
        }
    }
}

impl EnvelopeConfig {
    pub fn new<A, D, S>(allowed: A, denied: D) -> Self
    where
        A: IntoIterator<Item = S>,
        D: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed_paths: allowed.into_iter().map(Into::into).collect(),
            denied_paths: denied.into_iter().map(Into::into).collect(),
            reject_symlinks: true,
        }
    }

    pub fn with_reject_symlinks(mut self, reject: bool) -> Self {
        self.reject_symlinks = reject;
        self
    }

    /// Load an envelope from a YAML (or JSON) file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| LoopguardError::EnvelopeConfig(format!("cannot read {}: {}", path.display(), e)))?;
        let envelope: Self = serde_yaml::from_str(&content)
            .map_err(|e| LoopguardError::EnvelopeConfig(format!("cannot parse {}: {}", path.display(), e)))?;
        log::debug!(
            "Loaded envelope from {}: {} allowed, {} denied",
            path.display(),
            envelope.allowed_paths.len(),
            envelope.denied_paths.len()
        );
        Ok(envelope)
    }
}
