//! Error types for Loopguard
//!
//! Centralized error handling using thiserror. Envelope and governance
//! decisions are never errors; they come back as `ValidationResult` values.

use thiserror::Error;

/// All error types that can occur in Loopguard
#[derive(Debug, Error)]
pub enum LoopguardError {
    /// Policy configuration is missing, malformed, or incomplete
    #[error("Policy config error: {0}")]
    PolicyConfig(String),

    /// Envelope configuration could not be loaded
    #[error("Envelope config error: {0}")]
    EnvelopeConfig(String),

    /// Ledger failed integrity checks (corrupt JSON, broken chain, sequence gap)
    #[error("Ledger integrity error: {0}")]
    LedgerIntegrity(String),

    /// Ledger operation not permitted in the current state
    #[error("Ledger error: {0}")]
    Ledger(String),

    /// Waiver artifact missing or invalid
    #[error("Waiver error: {0}")]
    Waiver(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for Loopguard operations
pub type Result<T> = std::result::Result<T, LoopguardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_config_error() {
        let err = LoopguardError::PolicyConfig("missing section: budgets".to_string());
        assert_eq!(err.to_string(), "Policy config error: missing section: budgets");
    }

    #[test]
    fn test_ledger_integrity_error() {
        let err = LoopguardError::LedgerIntegrity("header_hash mismatch".to_string());
        assert_eq!(err.to_string(), "Ledger integrity error: header_hash mismatch");
    }

    #[test]
    fn test_waiver_error() {
        let err = LoopguardError::Waiver("expired".to_string());
        assert_eq!(err.to_string(), "Waiver error: expired");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: LoopguardError = io_err.into();
        assert!(matches!(err, LoopguardError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: LoopguardError = json_err.into();
        assert!(matches!(err, LoopguardError::Json(_)));
    }

    #[test]
    fn test_yaml_error_conversion() {
        let yaml_err = serde_yaml::from_str::<serde_yaml::Value>("a: [").unwrap_err();
        let err: LoopguardError = yaml_err.into();
        assert!(matches!(err, LoopguardError::Yaml(_)));
    }
}
