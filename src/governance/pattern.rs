//! Glob matching for repo-relative paths.
//!
//! Envelope patterns are segment-aware: `*` and `?` never cross `/`, `**`
//! spans any depth. A trailing `**` (e.g. `docs/**`) matches every file below
//! the directory. Governance patterns use plain glob semantics where `*` may
//! cross `/`.

use glob::{MatchOptions, Pattern, PatternError};

const SEGMENT_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

const PLAIN_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Normalize a path for matching: `\` becomes `/`, leading `./` is stripped.
pub fn normalize(path: &str) -> String {
    let mut norm = path.replace('\\', "/");
    while let Some(rest) = norm.strip_prefix("./") {
        norm = rest.to_string();
    }
    norm
}

/// Collapse `.`, `..` and repeated separators without touching the
/// filesystem. Returns `None` when `..` climbs above the start of the path.
pub fn collapse(path: &str) -> Option<String> {
    let norm = path.replace('\\', "/");
    let absolute = norm.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for segment in norm.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            _ => parts.push(segment),
        }
    }
    let joined = parts.join("/");
    Some(if absolute { format!("/{}", joined) } else { joined })
}

/// Compile an envelope pattern.
pub fn compile_envelope(pattern: &str) -> Result<Pattern, PatternError> {
    let mut pat = normalize(pattern);
    // `dir/**` means "anything below dir"; glob's `**` alone only spans directories.
    if pat == "**" || pat.ends_with("/**") {
        pat.push_str("/*");
    }
    Pattern::new(&pat)
}

/// Match a repo-relative path against an envelope pattern.
pub fn envelope_match(path: &str, pattern: &str) -> Result<bool, PatternError> {
    let compiled = compile_envelope(pattern)?;
    Ok(compiled.matches_with(&normalize(path), SEGMENT_OPTIONS))
}

/// Plain glob test used for the governance denylist.
pub fn plain_match(path: &str, pattern: &Pattern) -> bool {
    pattern.matches_with(path, PLAIN_OPTIONS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("config\\governance_baseline.yaml"), "config/governance_baseline.yaml");
        assert_eq!(normalize("./docs/x.md"), "docs/x.md");
        assert_eq!(normalize("././a"), "a");
    }

    #[test]
    fn test_collapse() {
        assert_eq!(collapse("src/../CLAUDE.md").as_deref(), Some("CLAUDE.md"));
        assert_eq!(collapse("docs//01_governance/./x.md").as_deref(), Some("docs/01_governance/x.md"));
        assert_eq!(collapse("./a\\b/../c").as_deref(), Some("a/c"));
        assert_eq!(collapse("/repo/src/../AGENTS.md").as_deref(), Some("/repo/AGENTS.md"));
        assert_eq!(collapse("../CLAUDE.md"), None);
        assert_eq!(collapse("src/../../x"), None);
    }

    #[test]
    fn test_double_star_any_depth() {
        assert!(envelope_match("docs/x.md", "docs/**").unwrap());
        assert!(envelope_match("docs/a/b/c.md", "docs/**").unwrap());
        assert!(!envelope_match("src/x.md", "docs/**").unwrap());
        assert!(envelope_match("secret.yaml", "**").unwrap());
        assert!(envelope_match("a/b/secret.yaml", "**").unwrap());
    }

    #[test]
    fn test_double_star_in_middle() {
        assert!(envelope_match("runtime/tests/test_x.py", "runtime/**/test_*.py").unwrap());
        assert!(envelope_match("runtime/test_x.py", "runtime/**/test_*.py").unwrap());
    }

    #[test]
    fn test_single_star_one_segment() {
        assert!(envelope_match("src/x.py", "src/*.py").unwrap());
        assert!(!envelope_match("src/deep/x.py", "src/*.py").unwrap());
    }

    #[test]
    fn test_question_mark_one_char() {
        assert!(envelope_match("file1.txt", "file?.txt").unwrap());
        assert!(!envelope_match("file12.txt", "file?.txt").unwrap());
        assert!(!envelope_match("a/b", "a?b").unwrap());
    }

    #[test]
    fn test_exact_match() {
        assert!(envelope_match("secret.yaml", "secret.yaml").unwrap());
        assert!(!envelope_match("other/secret.yaml", "secret.yaml").unwrap());
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(envelope_match("x", "a**b").is_err());
        assert!(envelope_match("x", "[").is_err());
    }

    #[test]
    fn test_plain_star_crosses_separator() {
        let pattern = Pattern::new("config/agent_roles/*").unwrap();
        assert!(plain_match("config/agent_roles/builder.md", &pattern));
        assert!(plain_match("config/agent_roles/nested/builder.md", &pattern));
        assert!(!plain_match("config/models.yaml", &pattern));
    }
}
