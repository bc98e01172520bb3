use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};

use loopguard::config::{EnvelopeConfig, GlobalConfig, PolicyConfig};
use loopguard::domain::{Decision, FailureClass};
use loopguard::governance::{
    protected_paths, EnvelopeCheck, EnvelopeEnforcer, EscalationCheck, ProtectedPathCheck, SelfModProtector,
    ValidationResult,
};
use loopguard::ledger::LedgerFile;
use loopguard::policy::{LoopPolicy, WaiverContext, WaiverStore};

mod cli;

use cli::Cli;
use cli::commands::Commands;

fn setup_logging() -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("loopguard")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("loopguard.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn run_application(cli: &Cli, config: &GlobalConfig) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Decide { ledger, policy, json } => {
            handle_decide_command(ledger.as_deref(), policy.as_deref(), *json, config)
        }
        Commands::CheckPath {
            path,
            operation,
            envelope,
            json,
        } => handle_check_path_command(path, operation, envelope.as_deref(), *json, config),
        Commands::Protected { paths } => handle_protected_command(paths),
        Commands::VerifyLedger {
            ledger,
            expected_tip,
            expected_count,
        } => handle_verify_ledger_command(ledger.as_deref(), expected_tip.as_deref(), *expected_count, config),
        Commands::GrantWaiver {
            failure_class,
            retry_count,
            retry_limit,
            granted_by,
            reason,
            ttl,
        } => {
            let class = FailureClass::from_member_name(&failure_class.to_uppercase())
                .ok_or_else(|| eyre::eyre!("Unknown failure class: {}", failure_class))?;
            let context = WaiverContext::new(class, *retry_count, *retry_limit);
            handle_grant_waiver_command(&context, granted_by, reason, *ttl, config)
        }
    }
}

fn ledger_path(explicit: Option<&Path>, config: &GlobalConfig) -> Result<PathBuf> {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| config.ledger_file())
        .ok_or_else(|| eyre::eyre!("No ledger given and no ledger_path configured"))
}

fn build_policy(policy: PolicyConfig, config: &GlobalConfig) -> Result<LoopPolicy> {
    let repo_root = config.repo_root.canonicalize().unwrap_or_else(|_| config.repo_root.clone());
    let mut checks: Vec<Box<dyn EscalationCheck>> = vec![Box::new(
        ProtectedPathCheck::new(config.agent_role.clone()).with_repo_root(SelfModProtector::new(repo_root)),
    )];
    if config.escalate_on_envelope_violation {
        let enforcer = EnvelopeEnforcer::new(&config.repo_root)
            .context(format!("Failed to resolve repo root {}", config.repo_root.display()))?;
        checks.push(Box::new(EnvelopeCheck::new(enforcer, config.envelope.clone())));
    }
    Ok(LoopPolicy::new(policy)
        .with_checks(checks)
        .with_waiver_store(WaiverStore::new(config.waiver_directory())))
}

fn print_decision(decision: &Decision, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(decision)?);
        return Ok(());
    }
    let action = if decision.is_terminal() {
        decision.action.to_string().red()
    } else {
        decision.action.to_string().green()
    };
    println!("{} {}", "Action:".bold(), action);
    println!("{} {}", "Reason:".bold(), decision.reason);
    if let Some(outcome) = decision.terminal_outcome {
        println!("{} {}", "Outcome:".bold(), outcome.to_string().yellow());
    }
    Ok(())
}

fn handle_decide_command(
    ledger: Option<&Path>,
    policy: Option<&Path>,
    json: bool,
    config: &GlobalConfig,
) -> Result<()> {
    let policy_file = policy.map(Path::to_path_buf).unwrap_or_else(|| config.policy_file());
    let policy_config = PolicyConfig::load(&policy_file)
        .context(format!("Failed to load policy from {}", policy_file.display()))?;

    let ledger_file = ledger_path(ledger, config)?;
    let ledger = LedgerFile::open(&ledger_file).context(format!("Failed to open ledger {}", ledger_file.display()))?;
    info!("Deciding over {} attempts in {}", ledger.history().len(), ledger_file.display());

    let engine = build_policy(policy_config, config)?;
    let recorded_hash = ledger.header().map(|h| h.policy_hash.as_str()).unwrap_or_default();
    let decision = match engine.policy_drift(recorded_hash) {
        Some(drift) => drift,
        None => engine.decide_next_action(ledger.history()),
    };
    print_decision(&decision, json)
}

fn print_result(label: &str, result: &ValidationResult) {
    let verdict = if result.allowed { "ALLOWED".green() } else { "DENIED".red() };
    println!("{:<12} {} {}", label.bold(), verdict, result.reason);
}

fn handle_check_path_command(
    path: &str,
    operation: &str,
    envelope: Option<&Path>,
    json: bool,
    config: &GlobalConfig,
) -> Result<()> {
    let envelope = match envelope {
        Some(file) => EnvelopeConfig::load(file).context("Failed to load envelope")?,
        None => config.envelope.clone(),
    };
    let enforcer = EnvelopeEnforcer::new(&config.repo_root)
        .context(format!("Failed to resolve repo root {}", config.repo_root.display()))?;
    let protector = SelfModProtector::new(enforcer.repo_root());

    let envelope_result = enforcer.validate_with_envelope(path, operation, &envelope);
    let protection_result = protector.validate(path, &config.agent_role, operation);

    if json {
        let report = serde_json::json!({
            "envelope": &envelope_result,
            "self_modification": &protection_result,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_result("Envelope:", &envelope_result);
        print_result("Protector:", &protection_result);
    }

    if envelope_result.is_denied() || protection_result.is_denied() {
        eyre::bail!("Access denied for {}", path);
    }
    Ok(())
}

fn handle_protected_command(paths: &[String]) -> Result<()> {
    if paths.is_empty() {
        for pattern in protected_paths() {
            println!("{}", pattern);
        }
        return Ok(());
    }

    for path in paths {
        let result = loopguard::governance::check_self_modification(path, "operator");
        let verdict = if result.allowed {
            "unprotected".green()
        } else {
            "PROTECTED".red()
        };
        println!("{} {}", verdict, path);
    }
    Ok(())
}

fn handle_verify_ledger_command(
    ledger: Option<&Path>,
    expected_tip: Option<&str>,
    expected_count: Option<usize>,
    config: &GlobalConfig,
) -> Result<()> {
    let ledger_file = ledger_path(ledger, config)?;
    let mut ledger = LedgerFile::open(&ledger_file).context(format!("Failed to open ledger {}", ledger_file.display()))?;
    ledger.integrity_check().context("Ledger integrity check failed")?;

    let report = ledger.verify_chain(expected_tip, expected_count);
    if !report.is_valid() {
        for error in &report.errors {
            println!("{} {}", "error:".red(), error);
        }
        eyre::bail!("Ledger {} failed verification", ledger_file.display());
    }

    println!("{} {}", "OK".green().bold(), ledger_file.display());
    println!("  records: {}", ledger.history().len());
    println!("  tip:     {}", ledger.chain_tip().unwrap_or("-"));
    Ok(())
}

fn handle_grant_waiver_command(
    context: &WaiverContext,
    granted_by: &str,
    reason: &str,
    ttl: i64,
    config: &GlobalConfig,
) -> Result<()> {
    if ttl <= 0 {
        eyre::bail!("ttl must be positive, got {}", ttl);
    }
    let store = WaiverStore::new(config.waiver_directory());
    let path = store
        .grant(granted_by, reason, context, ttl, chrono::Utc::now())
        .context("Failed to write waiver grant")?;
    println!("{} {}", "Granted:".green(), path.display());
    Ok(())
}

fn main() -> Result<()> {
    // Setup logging first
    setup_logging().context("Failed to setup logging")?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = GlobalConfig::load(cli.config.as_ref()).context("Failed to load configuration")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).context("Application failed")?;

    Ok(())
}
