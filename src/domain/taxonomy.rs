//! Failure taxonomy: the closed enumerations the policy engine speaks.
//!
//! Wire names are the SCREAMING_SNAKE_CASE member names used by the policy
//! YAML and by the loop driver.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Categorical reason an attempt did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureClass {
    TestFailure,
    SyntaxError,
    Timeout,
    ValidationError,
    ReviewRejection,
    DependencyError,
    EnvironmentError,
    ToolInvocationError,
    ConfigError,
    GovernanceViolation,
    Unknown,
}

impl FailureClass {
    /// Every member, in declaration order.
    pub const ALL: [FailureClass; 11] = [
        FailureClass::TestFailure,
        FailureClass::SyntaxError,
        FailureClass::Timeout,
        FailureClass::ValidationError,
        FailureClass::ReviewRejection,
        FailureClass::DependencyError,
        FailureClass::EnvironmentError,
        FailureClass::ToolInvocationError,
        FailureClass::ConfigError,
        FailureClass::GovernanceViolation,
        FailureClass::Unknown,
    ];

    /// Member name as it appears in config and ledgers.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::TestFailure => "TEST_FAILURE",
            FailureClass::SyntaxError => "SYNTAX_ERROR",
            FailureClass::Timeout => "TIMEOUT",
            FailureClass::ValidationError => "VALIDATION_ERROR",
            FailureClass::ReviewRejection => "REVIEW_REJECTION",
            FailureClass::DependencyError => "DEPENDENCY_ERROR",
            FailureClass::EnvironmentError => "ENVIRONMENT_ERROR",
            FailureClass::ToolInvocationError => "TOOL_INVOCATION_ERROR",
            FailureClass::ConfigError => "CONFIG_ERROR",
            FailureClass::GovernanceViolation => "GOVERNANCE_VIOLATION",
            FailureClass::Unknown => "UNKNOWN",
        }
    }

    /// Exact member-name lookup. Returns `None` for anything else, including
    /// lowercase value forms.
    pub fn from_member_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|fc| fc.as_str() == name)
    }

    /// Normalize an arbitrary input string. Case-insensitive, surrounding
    /// whitespace ignored; anything unrecognized folds to `Unknown`.
    pub fn parse(raw: &str) -> Self {
        let upper = raw.trim().to_ascii_uppercase();
        Self::from_member_name(&upper).unwrap_or(FailureClass::Unknown)
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for FailureClass {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

/// What the loop driver should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoopAction {
    Retry,
    Terminate,
}

impl LoopAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopAction::Retry => "RETRY",
            LoopAction::Terminate => "TERMINATE",
        }
    }
}

impl fmt::Display for LoopAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a run terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminalReason {
    Pass,
    NoProgress,
    OscillationDetected,
    MaxRetriesExceeded,
    CriticalFailure,
    TimeoutRetryLimit,
    NonConvergence,
    DependencyUnavailable,
    EnvironmentIssue,
    GovernanceEscalation,
    UnknownFailure,
    BudgetExhausted,
    DiffBudgetExceeded,
    PolicyChangedMidRun,
    RoutingMissing,
}

impl TerminalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalReason::Pass => "PASS",
            TerminalReason::NoProgress => "NO_PROGRESS",
            TerminalReason::OscillationDetected => "OSCILLATION_DETECTED",
            TerminalReason::MaxRetriesExceeded => "MAX_RETRIES_EXCEEDED",
            TerminalReason::CriticalFailure => "CRITICAL_FAILURE",
            TerminalReason::TimeoutRetryLimit => "TIMEOUT_RETRY_LIMIT",
            TerminalReason::NonConvergence => "NON_CONVERGENCE",
            TerminalReason::DependencyUnavailable => "DEPENDENCY_UNAVAILABLE",
            TerminalReason::EnvironmentIssue => "ENVIRONMENT_ISSUE",
            TerminalReason::GovernanceEscalation => "GOVERNANCE_ESCALATION",
            TerminalReason::UnknownFailure => "UNKNOWN_FAILURE",
            TerminalReason::BudgetExhausted => "BUDGET_EXHAUSTED",
            TerminalReason::DiffBudgetExceeded => "DIFF_BUDGET_EXCEEDED",
            TerminalReason::PolicyChangedMidRun => "POLICY_CHANGED_MID_RUN",
            TerminalReason::RoutingMissing => "ROUTING_MISSING",
        }
    }
}

impl fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome the driver records when a run ends (or, for `WaiverApplied`,
/// resumes under an operator waiver).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminalOutcome {
    Pass,
    Blocked,
    WaiverRequested,
    EscalationRequested,
    WaiverApplied,
}

impl TerminalOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalOutcome::Pass => "PASS",
            TerminalOutcome::Blocked => "BLOCKED",
            TerminalOutcome::WaiverRequested => "WAIVER_REQUESTED",
            TerminalOutcome::EscalationRequested => "ESCALATION_REQUESTED",
            TerminalOutcome::WaiverApplied => "WAIVER_APPLIED",
        }
    }
}

impl fmt::Display for TerminalOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
