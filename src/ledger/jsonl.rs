//! JSONL ledger file with a header line and a SHA-256 hash chain.
//!
//! Layout: the first line is a [`LedgerHeader`], then one [`AttemptRecord`]
//! per line. From schema `v1.1` each record carries `prev_record_hash`
//! (the previous record's hash, or the header hash for the first record) and
//! `record_hash` (canonical JSON of the record without `record_hash`).
//! Legacy `v1.0` ledgers hydrate for reading but refuse appends.
//!
//! Every failure here is fail-closed: corruption surfaces as
//! [`LoopguardError::LedgerIntegrity`], never as an empty history.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::AttemptLedger;
use crate::domain::AttemptRecord;
use crate::error::{LoopguardError, Result};
use crate::id::hash_json;

/// Schema written by [`LedgerHeader::new`].
pub const LEDGER_SCHEMA_VERSION: &str = "v1.1";

/// Schema without a hash chain. Read-only.
pub const LEGACY_SCHEMA_VERSION: &str = "v1.0";

/// First line of a ledger file: immutable run context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerHeader {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "legacy_schema")]
    pub schema_version: String,
    #[serde(default)]
    pub policy_hash: String,
    #[serde(default)]
    pub handoff_hash: String,
    #[serde(default)]
    pub run_id: String,
    #[serde(default)]
    pub header_hash: Option<String>,
}

fn legacy_schema() -> String {
    LEGACY_SCHEMA_VERSION.to_string()
}

impl LedgerHeader {
    /// Build a current-schema header with its hash filled in.
    pub fn new(policy_hash: impl Into<String>, handoff_hash: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self::with_schema(LEDGER_SCHEMA_VERSION, policy_hash, handoff_hash, run_id)
    }

    pub fn with_schema(
        schema_version: impl Into<String>,
        policy_hash: impl Into<String>,
        handoff_hash: impl Into<String>,
        run_id: impl Into<String>,
    ) -> Self {
        let mut header = Self {
            kind: "header".to_string(),
            schema_version: schema_version.into(),
            policy_hash: policy_hash.into(),
            handoff_hash: handoff_hash.into(),
            run_id: run_id.into(),
            header_hash: None,
        };
        header.header_hash = Some(header.compute_hash());
        header
    }

    /// Hash over the immutable header fields.
    pub fn compute_hash(&self) -> String {
        hash_json(&json!({
            "type": "header",
            "schema_version": self.schema_version,
            "policy_hash": self.policy_hash,
            "handoff_hash": self.handoff_hash,
            "run_id": self.run_id,
        }))
    }

    /// Whether this schema must carry a hash chain.
    pub fn chain_required(&self) -> bool {
        chain_required(&self.schema_version)
    }
}

/// `v1.0` is the only chainless schema. Unparsable versions require a chain.
fn chain_required(version: &str) -> bool {
    if version == LEGACY_SCHEMA_VERSION {
        return false;
    }
    let parsed = version.strip_prefix('v').and_then(|rest| {
        let (major, minor) = rest.split_once('.')?;
        Some((major.parse::<u32>().ok()?, minor.parse::<u32>().ok()?))
    });
    match parsed {
        Some(version) => version >= (1, 1),
        None => true,
    }
}

/// Hash of a record linked to `prev_hash`. Excludes `record_hash` itself.
fn compute_record_hash(record: &AttemptRecord, prev_hash: &str) -> Result<String> {
    let mut value = serde_json::to_value(record)?;
    if let Value::Object(map) = &mut value {
        map.remove("record_hash");
        map.insert("prev_record_hash".to_string(), Value::from(prev_hash));
    }
    Ok(hash_json(&value))
}

/// Outcome of [`LedgerFile::verify_chain`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChainReport {
    pub errors: Vec<String>,
}

impl ChainReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Append-only JSONL ledger on disk, mirrored in memory.
#[derive(Debug)]
pub struct LedgerFile {
    path: PathBuf,
    header: Option<LedgerHeader>,
    ledger: AttemptLedger,
}

impl LedgerFile {
    /// Bind to `path`, creating its parent directory. Nothing is read yet.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path,
            header: None,
            ledger: AttemptLedger::new(),
        })
    }

    /// Bind to `path` and hydrate it. Fails if the file is missing or empty.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = Self::new(path)?;
        if !file.hydrate()? {
            return Err(LoopguardError::Ledger(format!("No ledger at {}", file.path.display())));
        }
        Ok(file)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> Option<&LedgerHeader> {
        self.header.as_ref()
    }

    pub fn ledger(&self) -> &AttemptLedger {
        &self.ledger
    }

    pub fn history(&self) -> &[AttemptRecord] {
        self.ledger.history()
    }

    /// Start a new ledger: truncates the file and writes `header`.
    pub fn initialize(&mut self, header: LedgerHeader) -> Result<()> {
        let mut file = File::create(&self.path)?;
        writeln!(file, "{}", serde_json::to_string(&header)?)?;
        log::info!("Initialized ledger {} for run {}", self.path.display(), header.run_id);
        self.header = Some(header);
        self.ledger = AttemptLedger::new();
        Ok(())
    }

    /// Load the ledger from disk.
    ///
    /// Returns `Ok(false)` if the file is missing or empty. A corrupt header,
    /// a header hash mismatch, or any unparsable record is an error.
    pub fn hydrate(&mut self) -> Result<bool> {
        if !self.path.exists() {
            return Ok(false);
        }
        let content = fs::read_to_string(&self.path)
            .map_err(|e| LoopguardError::LedgerIntegrity(format!("IO error reading ledger: {}", e)))?;
        let mut lines = content.lines().enumerate();
        let Some((_, first)) = lines.next() else {
            return Ok(false);
        };

        let raw: Value = serde_json::from_str(first)
            .map_err(|_| LoopguardError::LedgerIntegrity("Header JSON corrupt".to_string()))?;
        if raw.get("type").and_then(Value::as_str) != Some("header") {
            return Err(LoopguardError::LedgerIntegrity("First line is not a valid header".to_string()));
        }
        let header: LedgerHeader = serde_json::from_value(raw)
            .map_err(|e| LoopguardError::LedgerIntegrity(format!("Header invalid: {}", e)))?;

        if header.chain_required() {
            let stored = header.header_hash.as_deref().unwrap_or_default();
            if stored.is_empty() {
                return Err(LoopguardError::LedgerIntegrity(format!(
                    "{} ledger missing header_hash",
                    header.schema_version
                )));
            }
            let expected = header.compute_hash();
            if stored != expected {
                return Err(LoopguardError::LedgerIntegrity(format!(
                    "header_hash mismatch: stored={}, expected={}",
                    stored, expected
                )));
            }
        }

        let mut ledger = AttemptLedger::new();
        for (index, line) in lines {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let record: AttemptRecord = serde_json::from_str(line)
                .map_err(|e| LoopguardError::LedgerIntegrity(format!("Corrupt record at line {}: {}", index + 1, e)))?;
            ledger.push(record);
        }

        log::debug!("Hydrated ledger {} with {} records", self.path.display(), ledger.len());
        self.header = Some(header);
        self.ledger = ledger;
        Ok(true)
    }

    /// Append a record, linking it into the hash chain.
    ///
    /// A record with `attempt_id == 0` is assigned the next ID; any other ID
    /// must be exactly one past the last record.
    pub fn append(&mut self, mut record: AttemptRecord) -> Result<()> {
        let header = self
            .header
            .as_ref()
            .ok_or_else(|| LoopguardError::Ledger("append before initialize or hydrate".to_string()))?;

        if !header.chain_required() {
            return Err(LoopguardError::Ledger(format!(
                "append blocked for legacy {} ledger; migrate first",
                header.schema_version
            )));
        }

        let report = self.verify_chain(None, None);
        if !report.is_valid() {
            return Err(LoopguardError::LedgerIntegrity(format!(
                "append blocked: corrupted chain state ({})",
                report.errors.join("; ")
            )));
        }

        let next_id = self.ledger.next_attempt_id().ok_or_else(|| {
            LoopguardError::LedgerIntegrity(format!("append blocked: attempt_id space exhausted at {}", u32::MAX))
        })?;
        if record.attempt_id == 0 {
            record.attempt_id = next_id;
        } else if record.attempt_id != next_id {
            return Err(LoopguardError::Ledger(format!(
                "Sequence gap: last={}, new={}",
                self.ledger.last().map_or(0, |r| r.attempt_id),
                record.attempt_id
            )));
        }

        let prev_hash = match self.ledger.last() {
            Some(last) => last.record_hash.clone().ok_or_else(|| {
                LoopguardError::LedgerIntegrity("append blocked: previous record missing record_hash".to_string())
            })?,
            None => header
                .header_hash
                .clone()
                .filter(|h| !h.is_empty())
                .ok_or_else(|| LoopguardError::LedgerIntegrity("append blocked: missing header_hash".to_string()))?,
        };

        record.record_hash = None;
        record.prev_record_hash = Some(prev_hash.clone());
        record.record_hash = Some(compute_record_hash(&record, &prev_hash)?);

        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", serde_json::to_string(&record)?)?;

        log::debug!("Appended attempt {} to {}", record.attempt_id, self.path.display());
        self.ledger.push(record);
        Ok(())
    }

    /// Verify header hash, record links and record hashes.
    ///
    /// `expected_tip` and `expected_count` are external commitments that
    /// detect tail truncation, which the chain alone cannot.
    pub fn verify_chain(&self, expected_tip: Option<&str>, expected_count: Option<usize>) -> ChainReport {
        let mut report = ChainReport::default();
        let Some(header) = &self.header else {
            report.errors.push("ledger has no header".to_string());
            return report;
        };
        if !header.chain_required() {
            return report;
        }

        let stored_header_hash = header.header_hash.clone().unwrap_or_default();
        let expected_header_hash = header.compute_hash();
        if stored_header_hash != expected_header_hash {
            report.errors.push(format!(
                "header_hash mismatch: stored={}, expected={}",
                stored_header_hash, expected_header_hash
            ));
        }

        let mut prev_hash = Some(stored_header_hash.clone());
        for (index, record) in self.ledger.iter().enumerate() {
            if record.prev_record_hash != prev_hash {
                report.errors.push(format!(
                    "Record {} (attempt_id={}): prev_record_hash mismatch. Expected={}, got={}",
                    index,
                    record.attempt_id,
                    prev_hash.as_deref().unwrap_or("none"),
                    record.prev_record_hash.as_deref().unwrap_or("none"),
                ));
            }

            let link = record.prev_record_hash.as_deref().unwrap_or_default();
            match compute_record_hash(record, link) {
                Ok(recomputed) if record.record_hash.as_deref() == Some(recomputed.as_str()) => {}
                Ok(recomputed) => report.errors.push(format!(
                    "Record {} (attempt_id={}): record_hash mismatch. Expected={}, got={}",
                    index,
                    record.attempt_id,
                    recomputed,
                    record.record_hash.as_deref().unwrap_or("none"),
                )),
                Err(e) => report
                    .errors
                    .push(format!("Record {} (attempt_id={}): {}", index, record.attempt_id, e)),
            }

            prev_hash = record.record_hash.clone();
        }

        if let Some(expected) = expected_tip {
            let actual = self.chain_tip().unwrap_or_default();
            if actual != expected {
                report
                    .errors
                    .push(format!("chain tip mismatch: expected={}, actual={}", expected, actual));
            }
        }

        if let Some(expected) = expected_count {
            let actual = self.ledger.len();
            if actual != expected {
                report
                    .errors
                    .push(format!("record count mismatch: expected={}, actual={}", expected, actual));
            }
        }

        report
    }

    /// Re-read from disk, then check sequence numbering and the hash chain.
    pub fn integrity_check(&mut self) -> Result<()> {
        self.hydrate()?;

        for (expected, record) in (1..).zip(self.ledger.iter()) {
            if record.attempt_id != expected {
                return Err(LoopguardError::LedgerIntegrity(format!(
                    "Sequence error: expected {}, got {}",
                    expected, record.attempt_id
                )));
            }
        }

        let report = self.verify_chain(None, None);
        if !report.is_valid() {
            return Err(LoopguardError::LedgerIntegrity(format!(
                "Hash chain errors: {}",
                report.errors.join("; ")
            )));
        }
        Ok(())
    }

    /// Last record hash, or the header hash for an empty ledger.
    pub fn chain_tip(&self) -> Option<&str> {
        match self.ledger.last() {
            Some(last) => last.record_hash.as_deref(),
            None => self.header.as_ref().and_then(|h| h.header_hash.as_deref()),
        }
    }
}
