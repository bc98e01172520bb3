//! Self-modification protection.
//!
//! A compiled-in denylist of governance surfaces no agent may modify. This
//! list is not loaded from configuration and cannot be overridden by any
//! role: an agent must never be able to mutate the rules that constrain it.

use glob::Pattern;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use super::pattern::{normalize, plain_match};
use super::result::{base_evidence, ValidationResult};

/// Protected patterns and the surface each one guards.
const PROTECTED_PATHS: &[(&str, &str)] = &[
    // Role prompts
    ("config/agent_roles/*", "AGENT_IDENTITY"),
    // Model routing map
    ("config/models.yaml", "MODEL_CONFIG"),
    // Integrity manifest
    ("config/governance_baseline.yaml", "GOVERNANCE_BASELINE"),
    // Loop policy and envelope definitions
    ("config/loop/*", "ENVELOPE_POLICY"),
    ("config/governance/*", "GOVERNANCE_CONFIG"),
    // Packet transforms
    ("runtime/orchestration/transforms/*", "PACKET_TRANSFORMS"),
    // This module and the enforcer beside it
    ("src/governance/*", "SELF_MOD_PROTECTION"),
    // Versioned architecture documents
    ("docs/03_runtime/*_Architecture_v*.md", "ARCHITECTURE_DOCS"),
    // Governance document trees
    ("docs/00_foundations/*", "GOVERNANCE_FOUNDATION"),
    ("docs/01_governance/*", "GOVERNANCE_RULINGS"),
    ("docs/02_protocols/*", "GOVERNANCE_PROTOCOLS"),
    // Agent constitutions
    ("AGENTS.md", "AGENT_INSTRUCTIONS"),
    ("CLAUDE.md", "AGENT_INSTRUCTIONS"),
    ("GEMINI.md", "AGENT_INSTRUCTIONS"),
];

static COMPILED: LazyLock<Vec<(Pattern, &'static str, &'static str)>> = LazyLock::new(|| {
    PROTECTED_PATHS
        .iter()
        .filter_map(|(raw, surface)| Pattern::new(raw).ok().map(|p| (p, *raw, *surface)))
        .collect()
});

/// Protected glob patterns, in match order.
pub fn protected_paths() -> Vec<&'static str> {
    PROTECTED_PATHS.iter().map(|(raw, _)| *raw).collect()
}

/// `(pattern, surface)` pairs matching `path`.
fn matching(path: &str) -> Vec<(&'static str, &'static str)> {
    let norm = normalize(path);
    COMPILED
        .iter()
        .filter(|(pattern, _, _)| plain_match(&norm, pattern))
        .map(|(_, raw, surface)| (*raw, *surface))
        .collect()
}

/// Is `path` (repo-relative) a protected governance surface?
pub fn is_protected(path: &str) -> bool {
    let norm = normalize(path);
    COMPILED.iter().any(|(pattern, _, _)| plain_match(&norm, pattern))
}

/// Check whether `agent_role` may modify `path`.
pub fn check_self_modification(path: &str, agent_role: &str) -> ValidationResult {
    check_operation(path, agent_role, "modify")
}

/// [`check_self_modification`] with an explicit operation name for the evidence.
pub fn check_operation(path: &str, agent_role: &str, operation: &str) -> ValidationResult {
    let mut evidence = base_evidence(path, operation);
    evidence.insert("agent_role".to_string(), Value::from(agent_role));
    evidence.insert("normalized_path".to_string(), Value::from(normalize(path)));

    let hits = matching(path);
    if hits.is_empty() {
        return ValidationResult::allow("Path is not a protected governance surface", evidence);
    }

    log::warn!(
        "Blocked {} of protected path {} by role {} ({})",
        operation,
        path,
        agent_role,
        hits[0].1
    );
    let patterns: Vec<Value> = hits.iter().map(|(raw, _)| Value::from(*raw)).collect();
    let surfaces: Vec<Value> = hits.iter().map(|(_, surface)| Value::from(*surface)).collect();
    evidence.insert("protection_rule".to_string(), Value::from("hardcoded_denylist"));
    evidence.insert("matching_patterns".to_string(), Value::Array(patterns));
    evidence.insert("surfaces".to_string(), Value::Array(surfaces));

    ValidationResult::deny(format!("Path is a protected governance surface: {}", path), evidence)
}

/// Protector bound to a repository root, so absolute paths can be checked.
#[derive(Debug, Clone)]
pub struct SelfModProtector {
    repo_root: PathBuf,
}

impl SelfModProtector {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Validate an operation on `path`. Absolute paths are made repo-relative
    /// first; paths outside the repository are not this protector's concern.
    pub fn validate(&self, path: &str, agent_role: &str, operation: &str) -> ValidationResult {
        let candidate = Path::new(path);
        if !candidate.is_absolute() {
            return check_operation(path, agent_role, operation);
        }

        match candidate.strip_prefix(&self.repo_root) {
            Ok(rel) => {
                let rel = rel.to_string_lossy().replace('\\', "/");
                check_operation(&rel, agent_role, operation)
            }
            Err(_) => ValidationResult::allow("Path outside repository", base_evidence(path, operation))
                .with_evidence("repo_root", self.repo_root.to_string_lossy().to_string()),
        }
    }
}
