//! Attempt records: one per agent attempt, immutable once appended.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::taxonomy::{FailureClass, LoopAction};

/// A single agent attempt as seen by the policy engine.
///
/// Only `success`, `failure_class`, `diff_hash` and `changed_files` feed the
/// decision; the remaining fields are audit data carried by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based position in the run
    #[serde(default)]
    pub attempt_id: u32,
    /// RFC 3339 timestamp
    #[serde(default)]
    pub timestamp: Option<String>,
    pub success: bool,
    /// Raw failure class string as reported by the driver
    #[serde(default)]
    pub failure_class: Option<String>,
    /// Content hash of the produced diff; absent if no diff was produced
    #[serde(default)]
    pub diff_hash: Option<String>,
    /// Repo-relative paths touched by this attempt
    #[serde(default)]
    pub changed_files: Vec<String>,
    #[serde(default)]
    pub next_action: Option<LoopAction>,
    #[serde(default)]
    pub rationale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_record_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_hash: Option<String>,
}

impl AttemptRecord {
    /// Create a successful attempt.
    pub fn success() -> Self {
        Self::blank(true)
    }

    /// Create a failed attempt. The class string is kept verbatim and
    /// normalized only when read through [`AttemptRecord::classify`].
    pub fn failure(failure_class: impl Into<String>) -> Self {
        let mut record = Self::blank(false);
        record.failure_class = Some(failure_class.into());
        record
    }

    fn blank(success: bool) -> Self {
        Self {
            attempt_id: 0,
            timestamp: Some(Utc::now().to_rfc3339()),
            success,
            failure_class: None,
            diff_hash: None,
            changed_files: Vec::new(),
            next_action: None,
            rationale: None,
            prev_record_hash: None,
            record_hash: None,
        }
    }

    pub fn with_id(mut self, attempt_id: u32) -> Self {
        self.attempt_id = attempt_id;
        self
    }

    pub fn with_diff_hash(mut self, diff_hash: impl Into<String>) -> Self {
        self.diff_hash = Some(diff_hash.into());
        self
    }

    pub fn with_changed_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.changed_files = files.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_decision(mut self, action: LoopAction, rationale: impl Into<String>) -> Self {
        self.next_action = Some(action);
        self.rationale = Some(rationale.into());
        self
    }

    /// Normalized failure class. A failed attempt without a class, or with
    /// an unrecognized one, is `Unknown`. Successful attempts have none.
    pub fn classify(&self) -> Option<FailureClass> {
        if self.success {
            return None;
        }
        Some(self.failure_class.as_deref().map(FailureClass::parse).unwrap_or(FailureClass::Unknown))
    }

    /// Diff hash, treating an empty string as absent.
    pub fn progress_hash(&self) -> Option<&str> {
        self.diff_hash.as_deref().filter(|h| !h.is_empty())
    }

    /// Parsed timestamp; unparsable values are treated as absent.
    pub fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
            .as_deref()
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_success_is_none() {
        assert_eq!(AttemptRecord::success().classify(), None);
    }

    #[test]
    fn test_classify_normalizes() {
        assert_eq!(AttemptRecord::failure("syntax_error").classify(), Some(FailureClass::SyntaxError));
        assert_eq!(AttemptRecord::failure("cosmic_ray").classify(), Some(FailureClass::Unknown));
    }

    #[test]
    fn test_classify_missing_class_is_unknown() {
        let record = AttemptRecord {
            failure_class: None,
            ..AttemptRecord::failure("x")
        };
        assert_eq!(record.classify(), Some(FailureClass::Unknown));
    }

    #[test]
    fn test_progress_hash_ignores_empty() {
        assert_eq!(AttemptRecord::failure("TIMEOUT").with_diff_hash("").progress_hash(), None);
        assert_eq!(AttemptRecord::failure("TIMEOUT").with_diff_hash("abc").progress_hash(), Some("abc"));
    }

    #[test]
    fn test_parsed_timestamp_degrades() {
        let mut record = AttemptRecord::success();
        assert!(record.parsed_timestamp().is_some());
        record.timestamp = Some("yesterday-ish".to_string());
        assert!(record.parsed_timestamp().is_none());
    }

    #[test]
    fn test_deserialize_minimal_driver_shape() {
        let json = r#"{"success": false, "failure_class": "TEST_FAILURE", "diff_hash": null, "changed_files": ["src/x.py"]}"#;
        let record: AttemptRecord = serde_json::from_str(json).unwrap();
        assert!(!record.success);
        assert_eq!(record.classify(), Some(FailureClass::TestFailure));
        assert_eq!(record.changed_files, vec!["src/x.py".to_string()]);
        assert_eq!(record.attempt_id, 0);
        assert!(record.diff_hash.is_none());
    }
}
