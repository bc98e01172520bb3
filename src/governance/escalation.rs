//! Escalation checks consulted by the policy engine.
//!
//! Each check looks at the files an attempt changed and reports the first
//! one that must be escalated to a human. Checks hold no state between
//! calls: every call re-evaluates from the inputs it is given.

use std::fmt;

use super::envelope::EnvelopeEnforcer;
use super::pattern::collapse;
use super::protection::{check_operation, SelfModProtector};
use super::result::{base_evidence, ValidationResult};
use crate::config::EnvelopeConfig;

/// A changed file that requires escalation.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub check: String,
    pub path: String,
    pub result: ValidationResult,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.check, self.path, self.result.reason)
    }
}

/// A check run over changed files before any budget logic.
pub trait EscalationCheck: Send + Sync {
    /// Name recorded in violations and decision reasons.
    fn name(&self) -> &str;

    /// Validate a single changed file.
    fn validate(&self, path: &str) -> ValidationResult;

    /// First changed file this check denies, in order.
    fn first_violation(&self, changed_files: &[String]) -> Option<Violation> {
        changed_files.iter().find_map(|path| {
            let result = self.validate(path);
            result.is_denied().then(|| Violation {
                check: self.name().to_string(),
                path: path.clone(),
                result,
            })
        })
    }
}

/// Escalates any change to a protected governance surface.
#[derive(Debug, Clone)]
pub struct ProtectedPathCheck {
    agent_role: String,
    protector: Option<SelfModProtector>,
}

impl Default for ProtectedPathCheck {
    fn default() -> Self {
        Self::new("builder")
    }
}

impl ProtectedPathCheck {
    pub fn new(agent_role: impl Into<String>) -> Self {
        Self {
            agent_role: agent_role.into(),
            protector: None,
        }
    }

    /// Bind to a repo root so absolute changed paths are relativized.
    pub fn with_repo_root(mut self, protector: SelfModProtector) -> Self {
        self.protector = Some(protector);
        self
    }
}

impl EscalationCheck for ProtectedPathCheck {
    fn name(&self) -> &str {
        "protected_path"
    }

    /// Paths are collapsed lexically first; one that climbs above its root
    /// cannot be placed and is denied.
    fn validate(&self, path: &str) -> ValidationResult {
        let Some(collapsed) = collapse(path) else {
            log::warn!("Changed path {} escapes the repository root", path);
            return ValidationResult::deny(
                format!("Path escapes repository root: {}", path),
                base_evidence(path, "modify"),
            )
            .with_evidence("agent_role", self.agent_role.clone());
        };
        match &self.protector {
            Some(protector) => protector.validate(&collapsed, &self.agent_role, "modify"),
            None => check_operation(&collapsed, &self.agent_role, "modify"),
        }
    }
}

/// Escalates any change outside the agent's envelope.
#[derive(Debug, Clone)]
pub struct EnvelopeCheck {
    enforcer: EnvelopeEnforcer,
    envelope: EnvelopeConfig,
}

impl EnvelopeCheck {
    pub fn new(enforcer: EnvelopeEnforcer, envelope: EnvelopeConfig) -> Self {
        Self { enforcer, envelope }
    }
}

impl EscalationCheck for EnvelopeCheck {
    fn name(&self) -> &str {
        "envelope"
    }

    fn validate(&self, path: &str) -> ValidationResult {
        self.enforcer.validate_with_envelope(path, "write", &self.envelope)
    }
}
