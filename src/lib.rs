//! Loopguard - retry policy and path governance for autonomous build loops
//!
//! Loopguard decides whether an agent build loop retries or terminates after
//! each attempt, and guards which files the agent may touch: an envelope of
//! allowed paths plus a compiled-in set of governance surfaces no agent may
//! modify.

pub mod config;
pub mod domain;
pub mod error;
pub mod governance;
pub mod id;
pub mod ledger;
pub mod policy;

pub use error::{LoopguardError, Result};
