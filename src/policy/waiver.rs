//! Waiver grants: human approval to continue past an exhausted retry budget.
//!
//! A grant is a JSON artifact at `<dir>/WAIVER_<id>.json`, where `id` is the
//! first 16 hex chars of SHA-256 over the sorted, space-separated JSON of the
//! binding [`WaiverContext`] (see [`spaced_json`]). The same context always
//! maps to the same file.
//!
//! Validation is fail-closed: a missing file, parse error, schema mismatch,
//! unparsable expiry, expired grant or context mismatch all mean "no waiver".

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::FailureClass;
use crate::error::{LoopguardError, Result};
use crate::id::{sha256_hex, spaced_json};

pub const WAIVER_SCHEMA_VERSION: &str = "1.0";

/// Default grant lifetime.
pub const DEFAULT_TTL_SECONDS: i64 = 3600;

/// What a waiver is bound to. A grant for one retry count does not cover the
/// next exhaustion of the same class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaiverContext {
    pub failure_class: FailureClass,
    pub retry_count: u32,
    pub retry_limit: u32,
}

impl WaiverContext {
    pub fn new(failure_class: FailureClass, retry_count: u32, retry_limit: u32) -> Self {
        Self {
            failure_class,
            retry_count,
            retry_limit,
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "failure_class": self.failure_class.as_str(),
            "retry_count": self.retry_count,
            "retry_limit": self.retry_limit,
        })
    }

    /// Deterministic ID derived from the context.
    pub fn waiver_id(&self) -> String {
        let mut id = sha256_hex(spaced_json(&self.to_json()));
        id.truncate(16);
        id
    }

    /// Artifact path for this context under `dir`.
    pub fn waiver_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("WAIVER_{}.json", self.waiver_id()))
    }
}

/// A persisted waiver grant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaiverGrant {
    pub schema_version: String,
    pub waiver_id: String,
    pub granted_by: String,
    pub granted_at: String,
    pub ttl_seconds: i64,
    pub expires_at: String,
    pub reason: String,
    pub context: Map<String, Value>,
}

impl WaiverGrant {
    pub fn create(
        granted_by: impl Into<String>,
        reason: impl Into<String>,
        context: &WaiverContext,
        ttl_seconds: i64,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let expires_at = Duration::try_seconds(ttl_seconds)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| LoopguardError::Waiver(format!("ttl_seconds out of range: {}", ttl_seconds)))?;
        let context_map = match context.to_json() {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Ok(Self {
            schema_version: WAIVER_SCHEMA_VERSION.to_string(),
            waiver_id: context.waiver_id(),
            granted_by: granted_by.into(),
            granted_at: now.to_rfc3339(),
            ttl_seconds,
            expires_at: expires_at.to_rfc3339(),
            reason: reason.into(),
            context: context_map,
        })
    }

    /// Write with sorted keys and a trailing newline, creating parent dirs.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let value = serde_json::to_value(self)?;
        fs::write(path, serde_json::to_string_pretty(&value)? + "\n")?;
        Ok(())
    }

    /// Read and structurally validate a grant.
    pub fn read(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(LoopguardError::Waiver(format!("Waiver artifact not found: {}", path.display())));
        }
        let content = fs::read_to_string(path)
            .map_err(|e| LoopguardError::Waiver(format!("Failed to read waiver artifact: {}", e)))?;
        let grant: Self = serde_json::from_str(&content)
            .map_err(|e| LoopguardError::Waiver(format!("Invalid waiver artifact: {}", e)))?;
        if grant.schema_version != WAIVER_SCHEMA_VERSION {
            return Err(LoopguardError::Waiver(format!(
                "Schema version mismatch: expected {}, got {}",
                WAIVER_SCHEMA_VERSION, grant.schema_version
            )));
        }
        Ok(grant)
    }

    /// Expiry instant. Timestamps without an offset are taken as UTC.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.expires_at)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(&self.expires_at, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| naive.and_utc())
            })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_none_or(|expires| now >= expires)
    }
}

/// Is the grant at `path` present, well-formed, unexpired and (if `context`
/// is given) bound to `context`?
pub fn is_valid(path: &Path, context: Option<&WaiverContext>, now: DateTime<Utc>) -> bool {
    let grant = match WaiverGrant::read(path) {
        Ok(grant) => grant,
        Err(e) => {
            log::debug!("Waiver {} rejected: {}", path.display(), e);
            return false;
        }
    };
    if grant.is_expired(now) {
        log::debug!("Waiver {} expired at {}", path.display(), grant.expires_at);
        return false;
    }
    match context {
        Some(ctx) if grant.waiver_id != ctx.waiver_id() => {
            log::warn!("Waiver {} bound to a different context", path.display());
            false
        }
        _ => true,
    }
}

/// Directory of waiver grants.
#[derive(Debug, Clone)]
pub struct WaiverStore {
    dir: PathBuf,
}

impl WaiverStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, context: &WaiverContext) -> PathBuf {
        context.waiver_path(&self.dir)
    }

    /// Create and persist a grant for `context`. Returns the artifact path.
    pub fn grant(
        &self,
        granted_by: &str,
        reason: &str,
        context: &WaiverContext,
        ttl_seconds: i64,
        now: DateTime<Utc>,
    ) -> Result<PathBuf> {
        let grant = WaiverGrant::create(granted_by, reason, context, ttl_seconds, now)?;
        let path = self.path_for(context);
        grant.write(&path)?;
        log::info!(
            "Granted waiver {} for {} ({}/{}) by {}",
            grant.waiver_id,
            context.failure_class,
            context.retry_count,
            context.retry_limit,
            granted_by
        );
        Ok(path)
    }

    /// Is there a valid grant for `context` at `now`?
    pub fn check(&self, context: &WaiverContext, now: DateTime<Utc>) -> bool {
        is_valid(&self.path_for(context), Some(context), now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn ctx() -> WaiverContext {
        WaiverContext::new(FailureClass::TestFailure, 3, 3)
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_waiver_id_is_deterministic() {
        assert_eq!(ctx().waiver_id(), ctx().waiver_id());
        assert_eq!(ctx().waiver_id().len(), 16);
        assert_ne!(
            ctx().waiver_id(),
            WaiverContext::new(FailureClass::TestFailure, 4, 3).waiver_id()
        );
    }

    #[test]
    fn test_waiver_id_matches_spaced_context_digest() {
        // sha256('{"failure_class": "TEST_FAILURE", "retry_count": 3, "retry_limit": 3}')[:16]
        assert_eq!(ctx().waiver_id(), "d18a93595c3dfb64");
    }

    #[test]
    fn test_create_rejects_out_of_range_ttl() {
        let err = WaiverGrant::create("CEO", "r", &ctx(), 9_999_999_999_999, t0()).unwrap_err();
        assert!(matches!(err, LoopguardError::Waiver(_)));
        assert!(WaiverGrant::create("CEO", "r", &ctx(), i64::MAX, t0()).is_err());

        let dir = tempdir().unwrap();
        let store = WaiverStore::new(dir.path());
        assert!(store.grant("CEO", "r", &ctx(), 9_999_999_999_999, t0()).is_err());
        assert!(!store.path_for(&ctx()).exists());
    }

    #[test]
    fn test_waiver_path() {
        let path = ctx().waiver_path(Path::new("artifacts/waivers"));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("WAIVER_"));
        assert!(name.ends_with(".json"));
    }

    #[test]
    fn test_create_fields() {
        let grant = WaiverGrant::create("CEO", "flaky suite", &ctx(), 60, t0()).unwrap();
        assert_eq!(grant.schema_version, WAIVER_SCHEMA_VERSION);
        assert_eq!(grant.context["failure_class"], "TEST_FAILURE");
        assert_eq!(grant.expires_at(), Some(t0() + Duration::seconds(60)));
    }

    #[test]
    fn test_write_read_and_validity_window() {
        let dir = tempdir().unwrap();
        let store = WaiverStore::new(dir.path().join("waivers"));
        let path = store.grant("CEO", "flaky suite", &ctx(), 60, t0()).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.ends_with('\n'));
        assert_eq!(WaiverGrant::read(&path).unwrap().granted_by, "CEO");

        assert!(store.check(&ctx(), t0()));
        assert!(store.check(&ctx(), t0() + Duration::seconds(59)));
        assert!(!store.check(&ctx(), t0() + Duration::seconds(60)));
    }

    #[test]
    fn test_missing_grant_is_invalid() {
        let dir = tempdir().unwrap();
        let store = WaiverStore::new(dir.path());
        assert!(!store.check(&ctx(), t0()));
    }

    #[test]
    fn test_context_mismatch_is_invalid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("grant.json");
        WaiverGrant::create("CEO", "r", &ctx(), 60, t0()).unwrap().write(&path).unwrap();

        let other = WaiverContext::new(FailureClass::ReviewRejection, 3, 3);
        assert!(is_valid(&path, None, t0()));
        assert!(is_valid(&path, Some(&ctx()), t0()));
        assert!(!is_valid(&path, Some(&other), t0()));
    }

    #[test]
    fn test_malformed_grants_fail_closed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("grant.json");

        fs::write(&path, "{not json").unwrap();
        assert!(!is_valid(&path, None, t0()));

        let mut grant = WaiverGrant::create("CEO", "r", &ctx(), 60, t0()).unwrap();
        grant.schema_version = "2.0".to_string();
        grant.write(&path).unwrap();
        assert!(matches!(WaiverGrant::read(&path), Err(LoopguardError::Waiver(_))));
        assert!(!is_valid(&path, None, t0()));

        let mut grant = WaiverGrant::create("CEO", "r", &ctx(), 60, t0()).unwrap();
        grant.expires_at = "next tuesday".to_string();
        grant.write(&path).unwrap();
        assert!(!is_valid(&path, None, t0()));

        fs::write(
            &path,
            r#"{"schema_version":"1.0","waiver_id":"x","granted_by":"a","granted_at":"b","ttl_seconds":1.5,"expires_at":"c","reason":"d","context":{}}"#,
        )
        .unwrap();
        assert!(WaiverGrant::read(&path).is_err());
    }

    #[test]
    fn test_naive_expiry_is_utc() {
        let mut grant = WaiverGrant::create("CEO", "r", &ctx(), 60, t0()).unwrap();
        grant.expires_at = "2026-03-01T12:01:00".to_string();
        assert_eq!(grant.expires_at(), Some(t0() + Duration::seconds(60)));
    }
}
