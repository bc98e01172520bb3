//! Decision returned by the policy engine.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::taxonomy::{LoopAction, TerminalOutcome};

/// Next action plus the rationale the driver surfaces verbatim in its logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub action: LoopAction,
    pub reason: String,
    /// `None` means the routing table's default outcome applies.
    pub terminal_outcome: Option<TerminalOutcome>,
}

impl Decision {
    pub fn retry(reason: impl Into<String>) -> Self {
        Self {
            action: LoopAction::Retry,
            reason: reason.into(),
            terminal_outcome: None,
        }
    }

    pub fn terminate(reason: impl Into<String>) -> Self {
        Self {
            action: LoopAction::Terminate,
            reason: reason.into(),
            terminal_outcome: None,
        }
    }

    pub fn with_outcome(mut self, outcome: TerminalOutcome) -> Self {
        self.terminal_outcome = Some(outcome);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.action == LoopAction::Terminate
    }

    /// Tuple view `(action, reason, override)`.
    pub fn as_tuple(&self) -> (LoopAction, &str, Option<TerminalOutcome>) {
        (self.action, &self.reason, self.terminal_outcome)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.terminal_outcome {
            Some(outcome) => write!(f, "{} ({}) [{}]", self.action, self.reason, outcome),
            None => write!(f, "{} ({})", self.action, self.reason),
        }
    }
}
