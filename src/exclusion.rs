//! Repository exclusion patterns
//!
//! Three pattern forms are recognised:
//!
//! - `owner/repo` excludes exactly that repository
//! - `owner/*` excludes every repository owned by `owner`
//! - `owner` is shorthand for `owner/*`
//!
//! Matching is case-sensitive and purely textual; there is no globbing beyond
//! the trailing `/*` form.

use tracing::debug;

use crate::error::{Error, Result};

/// Check whether `repo_full_name` matches any of `patterns`
pub fn is_excluded(repo_full_name: &str, patterns: &[String]) -> bool {
    patterns
        .iter()
        .any(|pattern| matches_pattern(repo_full_name, pattern))
}

/// Check a single repository name against a single pattern
pub fn matches_pattern(repo_full_name: &str, pattern: &str) -> bool {
    let pattern = pattern.trim();
    let repo_full_name = repo_full_name.trim();

    if pattern == repo_full_name {
        return true;
    }

    if let Some(owner) = pattern.strip_suffix("/*") {
        return owns(repo_full_name, owner);
    }

    if !pattern.contains('/') {
        return owns(repo_full_name, pattern);
    }

    false
}

fn owns(repo_full_name: &str, owner: &str) -> bool {
    repo_full_name
        .strip_prefix(owner)
        .is_some_and(|rest| rest.starts_with('/'))
}

/// Check whether a pattern is acceptable for storage
///
/// Rejects empty patterns, patterns with embedded whitespace, patterns with
/// more than one `/`, and two-segment patterns with an empty owner or name.
pub fn is_valid_pattern(pattern: &str) -> bool {
    let pattern = pattern.trim();
    if pattern.is_empty() {
        return false;
    }

    if pattern.contains([' ', '\t', '\r', '\n']) {
        return false;
    }

    let parts: Vec<&str> = pattern.split('/').collect();
    match parts.as_slice() {
        [_owner] => true,
        [owner, name] => !owner.is_empty() && !name.is_empty(),
        _ => false,
    }
}

/// Validate a batch of patterns, trimming each and dropping blanks
///
/// The whole batch is rejected on the first invalid entry so callers never
/// persist a partially valid list. An empty result is a valid "clear".
pub fn validate_patterns<I, S>(patterns: I) -> Result<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut accepted = Vec::new();

    for pattern in patterns {
        let pattern = pattern.as_ref().trim();
        if pattern.is_empty() {
            continue;
        }
        if !is_valid_pattern(pattern) {
            debug!("Rejecting exclusion batch due to pattern: {}", pattern);
            return Err(Error::InvalidExclusionPattern(pattern.to_string()));
        }
        accepted.push(pattern.to_string());
    }

    Ok(accepted)
}

/// Parse newline-separated pattern input, one pattern per line
pub fn parse_patterns(input: &str) -> Result<Vec<String>> {
    validate_patterns(input.lines())
}
