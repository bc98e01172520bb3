//! Domain types for Loopguard
//!
//! - Taxonomy: failure classes, loop actions, terminal reasons and outcomes
//! - AttemptRecord: one agent attempt as recorded by the loop driver
//! - Decision: what the policy engine tells the driver to do next

pub mod attempt;
pub mod decision;
pub mod taxonomy;

pub use attempt::AttemptRecord;
pub use decision::Decision;
pub use taxonomy::{FailureClass, LoopAction, TerminalOutcome, TerminalReason};
