//! Loop policy configuration.
//!
//! Loaded once per run from YAML and immutable thereafter. Routing keys must
//! be failure-class member names (`TEST_FAILURE`, not `test_failure`) and the
//! routing table must cover every failure class.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;

use crate::domain::{FailureClass, LoopAction, TerminalOutcome, TerminalReason};
use crate::error::{LoopguardError, Result};
use crate::id::sha256_hex;

/// Only supported policy schema.
pub const POLICY_SCHEMA_VERSION: &str = "1.0";

/// Validated loop policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub schema_version: String,

    #[serde(default)]
    pub policy_metadata: Option<PolicyMetadata>,

    pub budgets: Budgets,

    pub failure_routing: HashMap<FailureClass, RoutingEntry>,

    pub waiver_rules: WaiverRules,

    #[serde(default)]
    pub progress_detection: ProgressDetection,

    /// Hashes of the source document, filled in by the loader.
    #[serde(skip)]
    pub hashes: PolicyHashes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyMetadata {
    pub version: String,
    #[serde(default)]
    pub effective_date: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Retry and run budgets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Budgets {
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub max_diff_lines_per_attempt: Option<u32>,
    /// Consecutive-failure budget per class. A class without an entry has a
    /// budget of zero.
    #[serde(default)]
    pub retry_limits: HashMap<FailureClass, u32>,
}

/// How a failure class is routed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingEntry {
    pub default_action: LoopAction,
    #[serde(default)]
    pub terminal_outcome: Option<TerminalOutcome>,
    #[serde(default)]
    pub terminal_reason: Option<TerminalReason>,
}

impl RoutingEntry {
    pub fn retry() -> Self {
        Self {
            default_action: LoopAction::Retry,
            terminal_outcome: None,
            terminal_reason: None,
        }
    }

    pub fn terminate(outcome: TerminalOutcome, reason: TerminalReason) -> Self {
        Self {
            default_action: LoopAction::Terminate,
            terminal_outcome: Some(outcome),
            terminal_reason: Some(reason),
        }
    }

    /// Outcome applied when this class terminates; `BLOCKED` if unset.
    pub fn outcome(&self) -> TerminalOutcome {
        self.terminal_outcome.unwrap_or(TerminalOutcome::Blocked)
    }

    /// Reason applied when this class terminates; `MAX_RETRIES_EXCEEDED` if unset.
    pub fn reason(&self) -> TerminalReason {
        self.terminal_reason.unwrap_or(TerminalReason::MaxRetriesExceeded)
    }
}

/// Which failure classes may request an operator waiver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WaiverRules {
    pub eligible_failure_classes: BTreeSet<FailureClass>,
    pub ineligible_failure_classes: BTreeSet<FailureClass>,
}

impl WaiverRules {
    /// Ineligible wins over eligible; a class on neither list is not eligible.
    pub fn is_eligible(&self, class: FailureClass) -> bool {
        if self.ineligible_failure_classes.contains(&class) {
            return false;
        }
        self.eligible_failure_classes.contains(&class)
    }
}

/// Diff-hash based stall detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressDetection {
    pub no_progress_enabled: bool,
    /// Distance back from the last attempt for the no-progress comparison.
    pub no_progress_lookback: usize,
    pub oscillation_enabled: bool,
    /// Window size for the A -> B -> A comparison (last vs `window`-th last).
    pub oscillation_window_size: usize,
}

impl Default for ProgressDetection {
    fn default() -> Self {
        Self {
            no_progress_enabled: true,
            no_progress_lookback: 1,
            oscillation_enabled: true,
            oscillation_window_size: 3,
        }
    }
}

/// Canonical (line-ending stable) and raw-bytes SHA-256 of the policy file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyHashes {
    pub canonical: String,
    pub bytes: String,
}

impl PolicyHashes {
    pub fn compute(raw: &str) -> Self {
        Self {
            canonical: canonical_hash(raw),
            bytes: sha256_hex(raw),
        }
    }
}

/// SHA-256 over the document with CRLF folded to LF and exactly one
/// trailing newline.
pub fn canonical_hash(raw: &str) -> String {
    let mut normalized = raw.replace("\r\n", "\n");
    let trimmed_len = normalized.trim_end_matches('\n').len();
    normalized.truncate(trimmed_len);
    normalized.push('\n');
    sha256_hex(normalized)
}

impl PolicyConfig {
    /// Load and validate a policy file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| LoopguardError::PolicyConfig(format!("cannot read {}: {}", path.display(), e)))?;
        let config = Self::from_yaml_str(&content)?;
        log::info!(
            "Loaded policy from {} (canonical hash {})",
            path.display(),
            &config.hashes.canonical[..12]
        );
        Ok(config)
    }

    /// Parse and validate a policy document.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let mut config: Self = serde_yaml::from_str(content)
            .map_err(|e| LoopguardError::PolicyConfig(format!("YAML parsing failed: {}", e)))?;
        config.validate()?;
        config.hashes = PolicyHashes::compute(content);
        Ok(config)
    }

    /// Check structural invariants the decision engine relies on.
    pub fn validate(&self) -> Result<()> {
        if self.schema_version != POLICY_SCHEMA_VERSION {
            return Err(LoopguardError::PolicyConfig(format!(
                "unsupported schema version: {} (expected {})",
                self.schema_version, POLICY_SCHEMA_VERSION
            )));
        }

        let missing = self.missing_routes();
        if !missing.is_empty() {
            let names: Vec<&str> = missing.iter().map(|fc| fc.as_str()).collect();
            return Err(LoopguardError::PolicyConfig(format!(
                "incomplete routing table, missing entries for: {}",
                names.join(", ")
            )));
        }

        let mut classes: Vec<_> = self.failure_routing.iter().collect();
        classes.sort_by_key(|(fc, _)| **fc);
        for (fc, entry) in classes {
            if entry.default_action == LoopAction::Terminate {
                if entry.terminal_outcome.is_none() {
                    return Err(LoopguardError::PolicyConfig(format!(
                        "TERMINATE action requires 'terminal_outcome' for {}",
                        fc
                    )));
                }
                if entry.terminal_reason.is_none() {
                    return Err(LoopguardError::PolicyConfig(format!(
                        "TERMINATE action requires 'terminal_reason' for {}",
                        fc
                    )));
                }
            }
        }

        let pd = &self.progress_detection;
        if pd.no_progress_lookback < 1 {
            return Err(LoopguardError::PolicyConfig("no_progress_lookback must be >= 1".to_string()));
        }
        if pd.oscillation_window_size < 3 {
            return Err(LoopguardError::PolicyConfig("oscillation_window_size must be >= 3".to_string()));
        }

        Ok(())
    }

    /// Failure classes without a routing entry, in declaration order.
    pub fn missing_routes(&self) -> Vec<FailureClass> {
        FailureClass::ALL
            .iter()
            .copied()
            .filter(|fc| !self.failure_routing.contains_key(fc))
            .collect()
    }

    pub fn routing_for(&self, class: FailureClass) -> Option<&RoutingEntry> {
        self.failure_routing.get(&class)
    }

    pub fn retry_limit(&self, class: FailureClass) -> u32 {
        self.budgets.retry_limits.get(&class).copied().unwrap_or(0)
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::POLICY_YAML;
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_fixture() {
        let config = PolicyConfig::from_yaml_str(POLICY_YAML).unwrap();
        assert_eq!(config.retry_limit(FailureClass::TestFailure), 3);
        assert_eq!(
            config.routing_for(FailureClass::SyntaxError).unwrap().outcome(),
            TerminalOutcome::Blocked
        );
        assert!(config.missing_routes().is_empty());
        assert_eq!(config.hashes.canonical.len(), 64);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("policy.yaml");
        fs::write(&path, POLICY_YAML).unwrap();
        let config = PolicyConfig::load(&path).unwrap();
        assert_eq!(config.policy_metadata.unwrap().version, "test_v1.0");
    }

    #[test]
    fn test_load_missing_file() {
        let result = PolicyConfig::load("/nonexistent/policy.yaml");
        assert!(matches!(result, Err(LoopguardError::PolicyConfig(_))));
    }

    #[test]
    fn test_rejects_incomplete_routing() {
        let yaml = POLICY_YAML.replace(
            "  UNKNOWN:\n    default_action: \"TERMINATE\"\n    terminal_outcome: \"BLOCKED\"\n    terminal_reason: \"UNKNOWN_FAILURE\"\n",
            "",
        );
        let err = PolicyConfig::from_yaml_str(&yaml).unwrap_err();
        assert!(err.to_string().contains("UNKNOWN"));
    }

    #[test]
    fn test_rejects_value_form_keys() {
        let yaml = POLICY_YAML.replace("  TIMEOUT:\n    default_action", "  timeout:\n    default_action");
        assert!(PolicyConfig::from_yaml_str(&yaml).is_err());
    }

    #[test]
    fn test_rejects_terminate_without_outcome() {
        let yaml = POLICY_YAML.replace(
            "  CONFIG_ERROR:\n    default_action: \"TERMINATE\"\n    terminal_outcome: \"BLOCKED\"\n",
            "  CONFIG_ERROR:\n    default_action: \"TERMINATE\"\n",
        );
        let err = PolicyConfig::from_yaml_str(&yaml).unwrap_err();
        assert!(err.to_string().contains("terminal_outcome"));
    }

    #[test]
    fn test_rejects_schema_version() {
        let yaml = POLICY_YAML.replace("schema_version: \"1.0\"", "schema_version: \"2.0\"");
        let err = PolicyConfig::from_yaml_str(&yaml).unwrap_err();
        assert!(err.to_string().contains("unsupported schema version"));
    }

    #[test]
    fn test_missing_retry_limit_is_zero() {
        let mut config = PolicyConfig::from_yaml_str(POLICY_YAML).unwrap();
        config.budgets.retry_limits.remove(&FailureClass::Timeout);
        assert_eq!(config.retry_limit(FailureClass::Timeout), 0);
    }

    #[test]
    fn test_waiver_precedence() {
        let mut rules = WaiverRules::default();
        rules.eligible_failure_classes.insert(FailureClass::TestFailure);
        rules.eligible_failure_classes.insert(FailureClass::Timeout);
        rules.ineligible_failure_classes.insert(FailureClass::Timeout);

        assert!(rules.is_eligible(FailureClass::TestFailure));
        assert!(!rules.is_eligible(FailureClass::Timeout));
        assert!(!rules.is_eligible(FailureClass::DependencyError));
    }

    #[test]
    fn test_canonical_hash_line_ending_stable() {
        let lf = "a: 1\nb: 2\n";
        let crlf = "a: 1\r\nb: 2\r\n\r\n";
        assert_eq!(canonical_hash(lf), canonical_hash(crlf));
        assert_ne!(PolicyHashes::compute(lf).bytes, PolicyHashes::compute(crlf).bytes);
    }

    #[test]
    fn test_progress_detection_defaults() {
        let pd = ProgressDetection::default();
        assert!(pd.no_progress_enabled);
        assert_eq!(pd.no_progress_lookback, 1);
        assert_eq!(pd.oscillation_window_size, 3);
    }
}
