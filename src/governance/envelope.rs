//! Envelope enforcement: path containment and access validation.
//!
//! Checks run in a fixed order and the first failure wins:
//! 1. resolution against the repo root
//! 2. containment (component-wise, never a string prefix)
//! 3. symlink rejection
//! 4. denylist
//! 5. allowlist
//!
//! Results are never cached. The filesystem can change between a check and
//! the operation it guards, so callers re-validate immediately before use
//! (see [`EnvelopeEnforcer::guarded`]).

use serde_json::Value;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use super::pattern::envelope_match;
use super::result::{base_evidence, Evidence, ValidationResult};
use crate::config::EnvelopeConfig;
use crate::error::Result;

/// Maximum symlinks followed while resolving one path.
const MAX_SYMLINK_HOPS: usize = 40;

/// Enforces envelope constraints relative to a canonical repository root.
#[derive(Debug, Clone)]
pub struct EnvelopeEnforcer {
    repo_root: PathBuf,
}

/// Validation result plus the resolved path it was computed for.
struct Verdict {
    result: ValidationResult,
    real_path: Option<PathBuf>,
}

impl EnvelopeEnforcer {
    /// Bind to `repo_root`, which must exist.
    pub fn new(repo_root: impl AsRef<Path>) -> Result<Self> {
        let repo_root = repo_root.as_ref().canonicalize()?;
        Ok(Self { repo_root })
    }

    /// Canonical repository root.
    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Validate access to `requested_path` against explicit allow/deny lists.
    pub fn validate_path_access<S: AsRef<str>>(
        &self,
        requested_path: &str,
        operation: &str,
        allowed_paths: &[S],
        denied_paths: &[S],
        reject_symlinks: bool,
    ) -> ValidationResult {
        self.evaluate(requested_path, operation, allowed_paths, denied_paths, reject_symlinks)
            .result
    }

    /// Validate access against an [`EnvelopeConfig`].
    pub fn validate_with_envelope(&self, requested_path: &str, operation: &str, envelope: &EnvelopeConfig) -> ValidationResult {
        self.validate_path_access(
            requested_path,
            operation,
            &envelope.allowed_paths,
            &envelope.denied_paths,
            envelope.reject_symlinks,
        )
    }

    /// Re-validate immediately before running `op` on the resolved path.
    ///
    /// Returns the denial instead of running `op` if the check fails.
    pub fn guarded<T, F>(
        &self,
        requested_path: &str,
        operation: &str,
        envelope: &EnvelopeConfig,
        op: F,
    ) -> std::result::Result<T, ValidationResult>
    where
        F: FnOnce(&Path) -> T,
    {
        let verdict = self.evaluate(
            requested_path,
            operation,
            &envelope.allowed_paths,
            &envelope.denied_paths,
            envelope.reject_symlinks,
        );
        match (verdict.result.allowed, verdict.real_path) {
            (true, Some(real)) => Ok(op(&real)),
            _ => Err(verdict.result),
        }
    }

    /// True if `path` contains no symlink below the repo root and resolves
    /// inside it.
    pub fn check_symlink_safety(&self, path: &str) -> bool {
        if path.is_empty() || path.contains('\0') {
            return false;
        }
        let joined = self.join(Path::new(path));
        if self.first_symlink(&joined).is_some() {
            return false;
        }
        match resolve_lenient(&joined) {
            Ok(real) => real.starts_with(&self.repo_root),
            Err(_) => false,
        }
    }

    fn join(&self, requested: &Path) -> PathBuf {
        if requested.is_absolute() {
            requested.to_path_buf()
        } else {
            self.repo_root.join(requested)
        }
    }

    fn evaluate<S: AsRef<str>>(
        &self,
        requested_path: &str,
        operation: &str,
        allowed_paths: &[S],
        denied_paths: &[S],
        reject_symlinks: bool,
    ) -> Verdict {
        let mut evidence = base_evidence(requested_path, operation);
        let deny = |reason: String, evidence: Evidence| Verdict {
            result: ValidationResult::deny(reason, evidence),
            real_path: None,
        };

        if requested_path.is_empty() {
            return deny("Path resolution failed: empty path".to_string(), evidence);
        }
        if requested_path.contains('\0') {
            evidence.insert("error".to_string(), Value::from("NUL byte in path"));
            return deny("Path resolution failed: NUL byte in path".to_string(), evidence);
        }

        // 1. Resolve
        let joined = self.join(Path::new(requested_path));
        let real_path = match resolve_lenient(&joined) {
            Ok(real) => real,
            Err(e) => {
                evidence.insert("error".to_string(), Value::from(e.to_string()));
                return deny(format!("Path resolution failed: {}", e), evidence);
            }
        };
        evidence.insert("real_path".to_string(), Value::from(real_path.to_string_lossy().to_string()));

        // 2. Containment
        let rel_path = match real_path.strip_prefix(&self.repo_root) {
            Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
            Err(_) => {
                evidence.insert(
                    "repo_root".to_string(),
                    Value::from(self.repo_root.to_string_lossy().to_string()),
                );
                log::warn!("Envelope: {} escapes repo root ({})", requested_path, real_path.display());
                return deny(format!("Path escapes repo root: {}", real_path.display()), evidence);
            }
        };

        // 3. Symlinks
        if reject_symlinks {
            if let Some(link) = self.first_symlink(&joined) {
                evidence.insert("symlink_rejected".to_string(), Value::Bool(true));
                evidence.insert(
                    "symlink_component".to_string(),
                    Value::from(link.to_string_lossy().to_string()),
                );
                log::warn!("Envelope: symlink {} in {}", link.display(), requested_path);
                return deny(format!("Symlink detected in path: {}", requested_path), evidence);
            }
        }

        evidence.insert("relative_path".to_string(), Value::from(rel_path.clone()));

        // 4. Denylist first so a broad allow can never override a deny
        for pattern in denied_paths {
            let pattern = pattern.as_ref();
            match envelope_match(&rel_path, pattern) {
                Ok(false) => {}
                Ok(true) => {
                    evidence.insert("denied_pattern".to_string(), Value::from(pattern));
                    return deny(format!("Path matches denied pattern: {}", pattern), evidence);
                }
                Err(e) => {
                    evidence.insert("denied_pattern".to_string(), Value::from(pattern));
                    evidence.insert("error".to_string(), Value::from(e.to_string()));
                    return deny(format!("Invalid denied pattern {}: {}", pattern, e), evidence);
                }
            }
        }

        // 5. Allowlist
        if !allowed_paths.is_empty() {
            let matched = allowed_paths.iter().map(AsRef::as_ref).find(|pattern| {
                envelope_match(&rel_path, pattern).unwrap_or_else(|e| {
                    log::warn!("Envelope: ignoring invalid allowed pattern {}: {}", pattern, e);
                    false
                })
            });
            match matched {
                Some(pattern) => {
                    evidence.insert("allowed_pattern".to_string(), Value::from(pattern));
                }
                None => {
                    let patterns: Vec<Value> = allowed_paths.iter().map(|p| Value::from(p.as_ref())).collect();
                    evidence.insert("allowed_patterns".to_string(), Value::Array(patterns));
                    return deny("Path does not match any allowed pattern".to_string(), evidence);
                }
            }
        }

        log::debug!("Envelope: {} {} permitted", operation, rel_path);
        Verdict {
            result: ValidationResult::allow("Access permitted", evidence),
            real_path: Some(real_path),
        }
    }

    /// First component of `path` below the repo root that is a symlink.
    ///
    /// Components are checked as written (`..` included) so a link followed
    /// by `..` is still seen. Components that are the root itself or one of
    /// its ancestors are skipped.
    fn first_symlink(&self, path: &Path) -> Option<PathBuf> {
        let mut current = PathBuf::new();
        for component in path.components() {
            current.push(component.as_os_str());
            if !matches!(component, Component::Normal(_)) || self.repo_root.starts_with(&current) {
                continue;
            }
            if fs::symlink_metadata(&current).is_ok_and(|meta| meta.file_type().is_symlink()) {
                return Some(current);
            }
        }
        None
    }
}

/// Convenience wrapper: build an enforcer for `repo_root` and validate once.
///
/// A repo root that cannot be resolved denies.
pub fn validate_path_access(
    requested_path: &str,
    operation: &str,
    envelope: &EnvelopeConfig,
    repo_root: &Path,
) -> ValidationResult {
    match EnvelopeEnforcer::new(repo_root) {
        Ok(enforcer) => enforcer.validate_with_envelope(requested_path, operation, envelope),
        Err(e) => ValidationResult::deny(
            format!("Repo root resolution failed: {}", e),
            base_evidence(requested_path, operation),
        )
        .with_evidence("repo_root", repo_root.to_string_lossy().to_string()),
    }
}

enum Step {
    Root(OsString),
    Parent,
    Name(OsString),
}

fn steps(path: &Path) -> impl Iterator<Item = Step> + '_ {
    path.components().filter_map(|c| match c {
        Component::Prefix(_) | Component::RootDir => Some(Step::Root(c.as_os_str().to_os_string())),
        Component::CurDir => None,
        Component::ParentDir => Some(Step::Parent),
        Component::Normal(name) => Some(Step::Name(name.to_os_string())),
    })
}

/// Resolve `path` like `realpath` but without requiring the tail to exist:
/// existing symlinks are followed, missing components are appended
/// lexically.
fn resolve_lenient(path: &Path) -> io::Result<PathBuf> {
    let mut queue: VecDeque<Step> = steps(path).collect();
    let mut resolved = PathBuf::new();
    let mut hops = 0;

    while let Some(step) = queue.pop_front() {
        match step {
            Step::Root(root) => {
                if root == "/" || root == "\\" {
                    resolved = PathBuf::from(MAIN_SEPARATOR_ROOT);
                } else {
                    resolved.push(root);
                }
            }
            Step::Parent => {
                resolved.pop();
            }
            Step::Name(name) => {
                let candidate = resolved.join(&name);
                match fs::symlink_metadata(&candidate) {
                    Ok(meta) if meta.file_type().is_symlink() => {
                        hops += 1;
                        if hops > MAX_SYMLINK_HOPS {
                            return Err(io::Error::other("too many levels of symbolic links"));
                        }
                        let target = fs::read_link(&candidate)?;
                        if target.is_absolute() {
                            resolved = PathBuf::new();
                        }
                        let spliced: Vec<Step> = steps(&target).collect();
                        for step in spliced.into_iter().rev() {
                            queue.push_front(step);
                        }
                    }
                    _ => resolved = candidate,
                }
            }
        }
    }

    Ok(resolved)
}

const MAIN_SEPARATOR_ROOT: &str = std::path::MAIN_SEPARATOR_STR;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn repo() -> (tempfile::TempDir, EnvelopeEnforcer) {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("docs")).unwrap();
        fs::write(dir.path().join("docs/x.md"), "doc").unwrap();
        let enforcer = EnvelopeEnforcer::new(dir.path()).unwrap();
        (dir, enforcer)
    }

    #[test]
    fn test_allows_allowlisted_path() {
        let (_dir, enforcer) = repo();
        let result = enforcer.validate_path_access("docs/x.md", "write", &["docs/**"], &[], true);
        assert!(result.allowed, "{}", result.reason);
        assert_eq!(result.evidence_str("allowed_pattern"), Some("docs/**"));
        assert_eq!(result.evidence_str("relative_path"), Some("docs/x.md"));
        assert!(result.evidence.contains_key("timestamp"));
    }

    #[test]
    fn test_rejects_parent_escape() {
        let (_dir, enforcer) = repo();
        let result = enforcer.validate_path_access("../outside/file", "read", &["**"], &[], true);
        assert!(!result.allowed);
        assert!(result.reason.starts_with("Path escapes repo root"));
        assert!(result.evidence.contains_key("repo_root"));
    }

    #[test]
    fn test_rejects_absolute_outside() {
        let (_dir, enforcer) = repo();
        let result = enforcer.validate_path_access("/etc/passwd", "read", &[] as &[&str], &[], true);
        assert!(!result.allowed);
    }

    #[test]
    fn test_accepts_absolute_inside() {
        let (_dir, enforcer) = repo();
        let abs = enforcer.repo_root().join("docs/x.md");
        let result = enforcer.validate_path_access(abs.to_str().unwrap(), "read", &["docs/**"], &[], true);
        assert!(result.allowed, "{}", result.reason);
    }

    #[test]
    fn test_sibling_prefix_is_not_contained() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("foo")).unwrap();
        fs::create_dir_all(dir.path().join("foobar")).unwrap();
        fs::write(dir.path().join("foobar/file"), "x").unwrap();

        let enforcer = EnvelopeEnforcer::new(dir.path().join("foo")).unwrap();
        let sibling = enforcer.repo_root().parent().unwrap().join("foobar/file");
        let result = enforcer.validate_path_access(sibling.to_str().unwrap(), "read", &[] as &[&str], &[], false);
        assert!(!result.allowed);
        assert!(result.reason.starts_with("Path escapes repo root"));

        let relative = enforcer.validate_path_access("../foobar/file", "read", &[] as &[&str], &[], false);
        assert!(!relative.allowed);
    }

    #[test]
    fn test_denylist_beats_allowlist() {
        let (_dir, enforcer) = repo();
        let result = enforcer.validate_path_access("secret.yaml", "read", &["**"], &["secret.yaml"], true);
        assert!(!result.allowed);
        assert_eq!(result.evidence_str("denied_pattern"), Some("secret.yaml"));
    }

    #[test]
    fn test_not_in_allowlist() {
        let (_dir, enforcer) = repo();
        let result = enforcer.validate_path_access("src/main.rs", "write", &["docs/**"], &[], true);
        assert!(!result.allowed);
        assert_eq!(result.reason, "Path does not match any allowed pattern");
        assert!(result.evidence.contains_key("allowed_patterns"));
    }

    #[test]
    fn test_empty_allowlist_allows() {
        let (_dir, enforcer) = repo();
        let result = enforcer.validate_path_access("anything/new.txt", "write", &[] as &[&str], &[], true);
        assert!(result.allowed);
    }

    #[test]
    fn test_invalid_deny_pattern_fails_closed() {
        let (_dir, enforcer) = repo();
        let result = enforcer.validate_path_access("docs/x.md", "write", &["docs/**"], &["docs/a**b"], true);
        assert!(!result.allowed);
        assert!(result.reason.starts_with("Invalid denied pattern"));
    }

    #[test]
    fn test_nul_byte_denied() {
        let (_dir, enforcer) = repo();
        let result = enforcer.validate_path_access("docs/\0x.md", "write", &["**"], &[], true);
        assert!(!result.allowed);
        assert!(result.reason.contains("NUL"));
    }

    #[test]
    fn test_empty_path_denied() {
        let (_dir, enforcer) = repo();
        assert!(!enforcer.validate_path_access("", "write", &["**"], &[], true).allowed);
    }

    #[test]
    fn test_nonexistent_file_inside_repo_allowed() {
        let (_dir, enforcer) = repo();
        let result = enforcer.validate_path_access("docs/new/deep/file.md", "write", &["docs/**"], &[], true);
        assert!(result.allowed, "{}", result.reason);
    }

    #[test]
    fn test_dot_dot_inside_repo_normalizes() {
        let (_dir, enforcer) = repo();
        let result = enforcer.validate_path_access("src/../docs/x.md", "read", &["docs/**"], &[], true);
        assert!(result.allowed, "{}", result.reason);
        assert_eq!(result.evidence_str("relative_path"), Some("docs/x.md"));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_rejected() {
        let (dir, enforcer) = repo();
        std::os::unix::fs::symlink(dir.path().join("docs"), dir.path().join("link")).unwrap();

        let result = enforcer.validate_path_access("link/x.md", "read", &["**"], &[], true);
        assert!(!result.allowed);
        assert_eq!(result.evidence["symlink_rejected"], true);

        let permitted = enforcer.validate_path_access("link/x.md", "read", &["**"], &[], false);
        assert!(permitted.allowed, "{}", permitted.reason);
        assert_eq!(permitted.evidence_str("relative_path"), Some("docs/x.md"));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_rejected_even_when_symlinks_allowed() {
        let outside = tempdir().unwrap();
        fs::write(outside.path().join("target.txt"), "x").unwrap();
        let (dir, enforcer) = repo();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("escape")).unwrap();

        let result = enforcer.validate_path_access("escape/target.txt", "read", &["**"], &[], false);
        assert!(!result.allowed);
        assert!(result.reason.starts_with("Path escapes repo root"));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_loop_denied() {
        let (dir, enforcer) = repo();
        std::os::unix::fs::symlink(dir.path().join("b"), dir.path().join("a")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("a"), dir.path().join("b")).unwrap();

        let result = enforcer.validate_path_access("a/file", "read", &["**"], &[], false);
        assert!(!result.allowed);
        assert!(result.reason.starts_with("Path resolution failed"));
    }

    #[cfg(unix)]
    #[test]
    fn test_check_symlink_safety() {
        let (dir, enforcer) = repo();
        std::os::unix::fs::symlink(dir.path().join("docs"), dir.path().join("link")).unwrap();
        assert!(enforcer.check_symlink_safety("docs/x.md"));
        assert!(!enforcer.check_symlink_safety("link/x.md"));
        assert!(!enforcer.check_symlink_safety("../x"));
    }

    #[cfg(unix)]
    #[test]
    fn test_guarded_revalidates_before_use() {
        let (dir, enforcer) = repo();
        let envelope = EnvelopeConfig::new(["docs/**"], []);

        let first = enforcer.guarded("docs/x.md", "read", &envelope, |p| fs::read_to_string(p).unwrap());
        assert_eq!(first.unwrap(), "doc");

        // Swap the directory for a symlink between check and use
        fs::rename(dir.path().join("docs"), dir.path().join("real_docs")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("real_docs"), dir.path().join("docs")).unwrap();

        let second = enforcer.guarded("docs/x.md", "read", &envelope, |_| String::new());
        let denial = second.unwrap_err();
        assert!(denial.reason.starts_with("Symlink detected"));
    }

    #[test]
    fn test_convenience_wrapper() {
        let (dir, _enforcer) = repo();
        let envelope = EnvelopeConfig::new(["docs/**"], ["docs/private/**"]);
        assert!(validate_path_access("docs/x.md", "read", &envelope, dir.path()).allowed);
        assert!(!validate_path_access("docs/private/k.md", "read", &envelope, dir.path()).allowed);
    }

    #[test]
    fn test_convenience_wrapper_missing_root_denies() {
        let envelope = EnvelopeConfig::default();
        let result = validate_path_access("x", "read", &envelope, Path::new("/nonexistent/repo/root"));
        assert!(!result.allowed);
        assert!(result.reason.starts_with("Repo root resolution failed"));
    }

    #[test]
    fn test_results_are_not_cached() {
        let (dir, enforcer) = repo();
        let envelope = EnvelopeConfig::new(["docs/**"], []);
        let a = enforcer.validate_with_envelope("docs/y.md", "write", &envelope);
        fs::write(dir.path().join("docs/y.md"), "now exists").unwrap();
        let b = enforcer.validate_with_envelope("docs/y.md", "write", &envelope);
        assert!(a.allowed && b.allowed);
        assert_ne!(a.evidence.get("timestamp"), None);
        assert_eq!(a.evidence_str("real_path"), b.evidence_str("real_path"));
    }
}
