//! Loop policy engine - decides whether the build loop retries or terminates.
//!
//! The engine is a pure function of the attempt history plus an immutable
//! policy. It holds no state between calls, so the same ledger always yields
//! the same decision (waiver checks aside, which read the waiver directory).

use chrono::{DateTime, Utc};

use super::waiver::{WaiverContext, WaiverStore};
use crate::config::PolicyConfig;
use crate::domain::{AttemptRecord, Decision, FailureClass, LoopAction, TerminalOutcome, TerminalReason};
use crate::governance::{EscalationCheck, ProtectedPathCheck, Violation};

/// Decision engine for the build loop.
///
/// Checks run in strict priority order:
/// 1. empty ledger
/// 2. governance escalation on the last attempt
/// 3. success
/// 4. no progress
/// 5. oscillation
/// 6. routing lookup
/// 7. failure streak
/// 8. retry budget, with escalation, waiver, and routed outcome at exhaustion
pub struct LoopPolicy {
    /// Validated policy
    config: PolicyConfig,
    /// Checks run over changed files; any violation escalates
    checks: Vec<Box<dyn EscalationCheck>>,
    /// Where waiver grants live; without one no waiver is ever applied
    waivers: Option<WaiverStore>,
}

impl LoopPolicy {
    /// Create an engine with the protected-path check and no waiver store.
    pub fn new(config: PolicyConfig) -> Self {
        Self {
            config,
            checks: vec![Box::new(ProtectedPathCheck::default())],
            waivers: None,
        }
    }

    /// Replace the escalation checks.
    pub fn with_checks(mut self, checks: Vec<Box<dyn EscalationCheck>>) -> Self {
        self.checks = checks;
        self
    }

    /// Add an escalation check after the existing ones.
    pub fn with_check(mut self, check: impl EscalationCheck + 'static) -> Self {
        self.checks.push(Box::new(check));
        self
    }

    pub fn with_waiver_store(mut self, store: WaiverStore) -> Self {
        self.waivers = Some(store);
        self
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Terminate if the ledger was started under a different policy.
    ///
    /// `recorded_hash` is the policy hash from the ledger header; either the
    /// canonical or the raw-bytes hash of the loaded policy matches. An empty
    /// recorded hash binds nothing.
    pub fn policy_drift(&self, recorded_hash: &str) -> Option<Decision> {
        let hashes = &self.config.hashes;
        if recorded_hash.is_empty() || recorded_hash == hashes.canonical || recorded_hash == hashes.bytes {
            return None;
        }
        log::warn!(
            "Policy changed mid-run: ledger has {}, loaded policy is {}",
            recorded_hash,
            hashes.canonical
        );
        Some(
            Decision::terminate(format!(
                "{}: ledger policy_hash {} does not match loaded policy {}",
                TerminalReason::PolicyChangedMidRun,
                recorded_hash,
                hashes.canonical
            ))
            .with_outcome(TerminalOutcome::Blocked),
        )
    }

    /// Decide the next action for `history` at the current time.
    pub fn decide_next_action(&self, history: &[AttemptRecord]) -> Decision {
        self.decide_next_action_at(history, Utc::now())
    }

    /// Decide the next action with an explicit clock for waiver expiry.
    pub fn decide_next_action_at(&self, history: &[AttemptRecord], now: DateTime<Utc>) -> Decision {
        let decision = self.decide(history, now);
        log::info!("Attempt {}: {}", history.len(), decision);
        decision
    }

    fn decide(&self, history: &[AttemptRecord], now: DateTime<Utc>) -> Decision {
        // 1. Start of run
        let Some(last) = history.last() else {
            return Decision::retry("Start of run");
        };

        // 2. Governance, before any budget logic
        if let Some(violation) = self.first_violation(&last.changed_files) {
            log::warn!("Governance violation on last attempt: {}", violation);
            return Decision::terminate(format!("{}: {}", TerminalReason::GovernanceEscalation, violation))
                .with_outcome(TerminalOutcome::EscalationRequested);
        }

        // 3. Success always terminates, whatever came before
        let Some(class) = last.classify() else {
            return Decision::terminate(TerminalReason::Pass.as_str());
        };

        // 4. No progress
        if self.no_progress(history) {
            log::debug!("No progress: diff hash repeated");
            return Decision::terminate(TerminalReason::NoProgress.as_str());
        }

        // 5. Oscillation
        if self.oscillating(history) {
            log::debug!("Oscillation: diff hash returned to an earlier state");
            return Decision::terminate(TerminalReason::OscillationDetected.as_str());
        }

        // 6. Routing
        let Some(route) = self.config.routing_for(class) else {
            log::error!("No routing entry for {}; policy is incomplete", class);
            return Decision::terminate(format!("{}: no routing entry for {}", TerminalReason::RoutingMissing, class));
        };

        // 7. Streak
        let retry_count = consecutive_failures(history, class);
        let retry_limit = self.config.retry_limit(class);
        log::debug!("{} streak {}/{}", class, retry_count, retry_limit);

        // 8. Budget
        if retry_count < retry_limit {
            if route.default_action == LoopAction::Terminate {
                return Decision::terminate(route.reason().as_str()).with_outcome(route.outcome());
            }
            return Decision::retry(format!("Retry {}/{} for {}", retry_count, retry_limit, class));
        }

        // Exhaustion is its own escalation trigger, over the whole run
        if let Some(violation) = history.iter().find_map(|a| self.first_violation(&a.changed_files)) {
            log::warn!("Governance violation in run after retry exhaustion: {}", violation);
            return Decision::terminate(format!("Escalation triggered after retry exhaustion: {}", violation))
                .with_outcome(TerminalOutcome::EscalationRequested);
        }

        if self.config.waiver_rules.is_eligible(class) {
            let context = WaiverContext::new(class, retry_count, retry_limit);
            if self.waivers.as_ref().is_some_and(|store| store.check(&context, now)) {
                return Decision::retry(format!("Waiver applied for {} - resuming", class))
                    .with_outcome(TerminalOutcome::WaiverApplied);
            }
            return Decision::terminate(format!(
                "Retry limit exhausted ({}/{}): waiver requested",
                retry_count, retry_limit
            ))
            .with_outcome(TerminalOutcome::WaiverRequested);
        }

        Decision::terminate(format!("{} ({}/{})", route.reason(), retry_count, retry_limit))
            .with_outcome(route.outcome())
    }

    fn first_violation(&self, changed_files: &[String]) -> Option<Violation> {
        self.checks.iter().find_map(|check| check.first_violation(changed_files))
    }

    fn no_progress(&self, history: &[AttemptRecord]) -> bool {
        let progress = &self.config.progress_detection;
        let lookback = progress.no_progress_lookback.max(1);
        if !progress.no_progress_enabled || history.len() < lookback + 1 {
            return false;
        }
        same_hash(&history[history.len() - 1], &history[history.len() - 1 - lookback])
    }

    fn oscillating(&self, history: &[AttemptRecord]) -> bool {
        let progress = &self.config.progress_detection;
        let window = progress.oscillation_window_size.max(3);
        if !progress.oscillation_enabled || history.len() < window {
            return false;
        }
        same_hash(&history[history.len() - 1], &history[history.len() - window])
    }
}

/// Both attempts carry the same non-empty diff hash.
fn same_hash(a: &AttemptRecord, b: &AttemptRecord) -> bool {
    matches!((a.progress_hash(), b.progress_hash()), (Some(x), Some(y)) if x == y)
}

/// Length of the trailing run of failures of `class`. Stops at a success or
/// a different class.
pub fn consecutive_failures(history: &[AttemptRecord], class: FailureClass) -> u32 {
    history
        .iter()
        .rev()
        .take_while(|attempt| attempt.classify() == Some(class))
        .count() as u32
}
