//! Governance guards: the envelope enforcer, the self-modification protector,
//! and the escalation checks the policy engine runs over changed files.

pub mod envelope;
pub mod escalation;
pub mod pattern;
pub mod protection;
pub mod result;

pub use envelope::{validate_path_access, EnvelopeEnforcer};
pub use escalation::{EnvelopeCheck, EscalationCheck, ProtectedPathCheck, Violation};
pub use protection::{check_self_modification, is_protected, protected_paths, SelfModProtector};
pub use result::{Evidence, ValidationResult};
