//! Configuration system for Loopguard.
//!
//! Two layers:
//! 1. Global config (~/.config/loopguard/loopguard.yml or .loopguard.yml):
//!    where the repo, policy, ledger and waivers live, plus the envelope
//! 2. Policy config (the YAML file named by `policy_path`): budgets, routing,
//!    waiver rules, progress detection

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub use self::envelope::EnvelopeConfig;
pub use self::policy::{
    canonical_hash, Budgets, PolicyConfig, PolicyHashes, PolicyMetadata, ProgressDetection, RoutingEntry,
    WaiverRules, POLICY_SCHEMA_VERSION,
};

mod envelope;
mod policy;

#[cfg(test)]
pub(crate) use self::policy::fixtures;

/// Default policy file, relative to the repo root.
pub const DEFAULT_POLICY_PATH: &str = "config/loop/policy_v1.0.yaml";

/// Default waiver artifact directory, relative to the repo root.
pub const DEFAULT_WAIVER_DIR: &str = "artifacts/waivers/Policy_Engine";

/// Global configuration for Loopguard.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Repository the loop operates on.
    pub repo_root: PathBuf,

    /// Policy YAML, relative to `repo_root` unless absolute.
    pub policy_path: PathBuf,

    /// Attempt ledger (JSONL), relative to `repo_root` unless absolute.
    pub ledger_path: Option<PathBuf>,

    /// Waiver grant directory, relative to `repo_root` unless absolute.
    pub waiver_dir: PathBuf,

    /// Role reported in self-modification evidence.
    pub agent_role: String,

    /// Envelope used when checking paths.
    pub envelope: EnvelopeConfig,

    /// Escalate when the last attempt touched a path outside the envelope,
    /// not only when it touched a governance surface.
    pub escalate_on_envelope_violation: bool,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            repo_root: PathBuf::from("."),
            policy_path: PathBuf::from(DEFAULT_POLICY_PATH),
            ledger_path: None,
            waiver_dir: PathBuf::from(DEFAULT_WAIVER_DIR),
            agent_role: "builder".to_string(),
            envelope: EnvelopeConfig::default(),
            escalate_on_envelope_violation: false,
        }
    }
}

impl GlobalConfig {
    /// Load configuration with fallback chain.
    ///
    /// Search order:
    /// 1. Explicit path if provided
    /// 2. .loopguard.yml in current directory
    /// 3. ~/.config/loopguard/loopguard.yml
    /// 4. Defaults
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let project_config = PathBuf::from(".loopguard.yml");
        if project_config.exists() {
            match Self::load_from_file(&project_config) {
                Ok(config) => {
                    log::info!("Loaded config from .loopguard.yml");
                    return Ok(config);
                }
                Err(e) => {
                    log::warn!("Failed to load .loopguard.yml: {}", e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let project_name = env!("CARGO_PKG_NAME");
            let user_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", user_config.display());
                        return Ok(config);
                    }
                    Err(e) => {
                        log::warn!("Failed to load {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.repo_root.as_os_str().is_empty() {
            eyre::bail!("repo_root cannot be empty");
        }
        if self.policy_path.as_os_str().is_empty() {
            eyre::bail!("policy_path cannot be empty");
        }
        if self.agent_role.trim().is_empty() {
            eyre::bail!("agent_role cannot be empty");
        }
        Ok(())
    }

    /// Resolve a configured path against `repo_root`.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() { path.to_path_buf() } else { self.repo_root.join(path) }
    }

    pub fn policy_file(&self) -> PathBuf {
        self.resolve(&self.policy_path)
    }

    pub fn ledger_file(&self) -> Option<PathBuf> {
        self.ledger_path.as_deref().map(|p| self.resolve(p))
    }

    pub fn waiver_directory(&self) -> PathBuf {
        self.resolve(&self.waiver_dir)
    }
}
