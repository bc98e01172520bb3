//! Validation result shared by the envelope enforcer and the self-modification
//! protector.
//!
//! A denial is a value, never an `Err`: callers have to branch on `allowed`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Evidence attached to every result, keyed by field name.
pub type Evidence = BTreeMap<String, Value>;

/// Outcome of a path check. Built fresh per call; never cache one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[must_use = "a ValidationResult must be checked before acting on the path"]
pub struct ValidationResult {
    pub allowed: bool,
    pub reason: String,
    pub evidence: Evidence,
}

impl ValidationResult {
    pub fn allow(reason: impl Into<String>, evidence: Evidence) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
            evidence,
        }
    }

    pub fn deny(reason: impl Into<String>, evidence: Evidence) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            evidence,
        }
    }

    /// Attach one more evidence field.
    pub fn with_evidence(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.evidence.insert(key.to_string(), value.into());
        self
    }

    /// String-valued evidence field, if present.
    pub fn evidence_str(&self, key: &str) -> Option<&str> {
        self.evidence.get(key).and_then(Value::as_str)
    }

    pub fn is_denied(&self) -> bool {
        !self.allowed
    }
}

/// Start an evidence map with the fields every check records.
pub fn base_evidence(requested_path: &str, operation: &str) -> Evidence {
    let mut evidence = Evidence::new();
    evidence.insert("requested_path".to_string(), Value::from(requested_path));
    evidence.insert("operation".to_string(), Value::from(operation));
    evidence.insert("timestamp".to_string(), Value::from(Utc::now().to_rfc3339()));
    evidence
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_and_deny() {
        let ok = ValidationResult::allow("Access permitted", Evidence::new());
        assert!(ok.allowed);
        assert!(!ok.is_denied());

        let denied = ValidationResult::deny("Path escapes repo root", Evidence::new());
        assert!(denied.is_denied());
        assert_eq!(denied.reason, "Path escapes repo root");
    }

    #[test]
    fn test_base_evidence_fields() {
        let evidence = base_evidence("docs/x.md", "write");
        assert_eq!(evidence["requested_path"], "docs/x.md");
        assert_eq!(evidence["operation"], "write");
        assert!(evidence.contains_key("timestamp"));
    }

    #[test]
    fn test_with_evidence() {
        let result = ValidationResult::deny("nope", Evidence::new()).with_evidence("denied_pattern", "secret.yaml");
        assert_eq!(result.evidence_str("denied_pattern"), Some("secret.yaml"));
        assert_eq!(result.evidence_str("missing"), None);
    }
}
