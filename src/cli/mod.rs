//! CLI module for loopguard - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands for policy decisions,
//! path checks, ledger verification and waiver grants.

pub mod commands;

pub use commands::Cli;
