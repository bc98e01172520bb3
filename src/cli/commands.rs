//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - decide: run the policy engine over a ledger
//! - check-path: validate a path against the envelope and the protector
//! - protected: list or test protected governance surfaces
//! - verify-ledger: check a ledger's hash chain
//! - grant-waiver: write a waiver grant for an exhausted failure class

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Loopguard - retry policy and path governance for autonomous build loops
#[derive(Parser, Debug)]
#[command(name = "loopguard")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Decide the next loop action from an attempt ledger
    Decide {
        /// Ledger file (defaults to the configured ledger_path)
        #[arg(short, long)]
        ledger: Option<PathBuf>,

        /// Policy file (defaults to the configured policy_path)
        #[arg(short, long)]
        policy: Option<PathBuf>,

        /// Print the decision as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check whether a path may be touched
    CheckPath {
        /// Path to check, repo-relative or absolute
        path: String,

        /// Operation recorded in the evidence
        #[arg(short, long, default_value = "write")]
        operation: String,

        /// Envelope file overriding the configured envelope
        #[arg(short, long)]
        envelope: Option<PathBuf>,

        /// Print the results as JSON
        #[arg(long)]
        json: bool,
    },

    /// List protected governance surfaces, or test paths against them
    Protected {
        /// Paths to test; lists all patterns if empty
        paths: Vec<String>,
    },

    /// Verify a ledger's header and hash chain
    VerifyLedger {
        /// Ledger file (defaults to the configured ledger_path)
        ledger: Option<PathBuf>,

        /// Expected chain tip, to detect tail truncation
        #[arg(long)]
        expected_tip: Option<String>,

        /// Expected record count, to detect tail truncation
        #[arg(long)]
        expected_count: Option<usize>,
    },

    /// Grant a waiver for an exhausted failure class
    GrantWaiver {
        /// Failure class (e.g. TEST_FAILURE)
        #[arg(long = "class")]
        failure_class: String,

        /// Consecutive failures at exhaustion
        #[arg(long)]
        retry_count: u32,

        /// Retry limit at exhaustion
        #[arg(long)]
        retry_limit: u32,

        /// Authority granting the waiver
        #[arg(long)]
        granted_by: String,

        /// Why the waiver is granted
        #[arg(long)]
        reason: String,

        /// Lifetime in seconds
        #[arg(long, default_value_t = loopguard::policy::DEFAULT_TTL_SECONDS)]
        ttl: i64,
    },
}
