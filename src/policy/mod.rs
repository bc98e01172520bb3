//! Loop policy: the decision engine and the waiver grants it honours.

mod engine;
pub mod waiver;

pub use engine::{consecutive_failures, LoopPolicy};
pub use waiver::{WaiverContext, WaiverGrant, WaiverStore, DEFAULT_TTL_SECONDS};
