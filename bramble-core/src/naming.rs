//! Deterministic child resource naming
//!
//! Every child resource of an execution has a name derived only from the
//! execution's namespace and name (and task name), so a repeated reconcile
//! can find an existing child instead of creating a second one. Two
//! distinct executions never derive the same child name.

use sha2::{Digest, Sha256};

/// Label carrying the owning execution's child base name on every child resource
pub const LABEL_EXECUTION: &str = "bramble-execution";

/// Label carrying the owning execution's namespace
pub const LABEL_NAMESPACE: &str = "bramble-namespace";

/// Label carrying the owning execution's uid
pub const LABEL_EXECUTION_UID: &str = "bramble-execution-uid";

/// Label carrying the task name on task jobs
pub const LABEL_TASK: &str = "bramble-task";

/// Maximum length of a name that is also used as a label value
pub const MAX_NAME_LEN: usize = 63;

const HASH_LEN: usize = 8;

/// Stem every child name of an execution starts with
///
/// A name that already is a DNS-1123 label is used as is. Anything else is
/// sanitized and suffixed with a short hash of the original name, so `a.b`
/// and `a-b` stay apart.
pub fn child_base(execution: &str) -> String {
    if is_dns_label(execution) {
        return execution.to_string();
    }

    let digest = hex::encode(Sha256::digest(execution.as_bytes()));
    let hash = &digest[..HASH_LEN];
    let mut stem = sanitize(execution);
    stem.truncate(MAX_NAME_LEN - HASH_LEN - 1);
    let stem = stem.trim_end_matches('-');

    if stem.is_empty() {
        hash.to_string()
    } else {
        format!("{}-{}", stem, hash)
    }
}

/// Cluster-scoped volume. Carries the namespace since volumes are not namespaced.
pub fn volume_name(namespace: &str, execution: &str) -> String {
    format!("{}.{}-pv", namespace, child_base(execution))
}

pub fn claim_name(execution: &str) -> String {
    format!("{}-pvc", child_base(execution))
}

pub fn cloner_name(execution: &str) -> String {
    format!("{}-cloner", child_base(execution))
}

pub fn task_job_name(execution: &str, task: &str) -> String {
    format!("{}-task-{}", child_base(execution), sanitize(task))
}

/// Maps a name onto the DNS-1123 label alphabet
///
/// Lowercases, replaces every character outside `[a-z0-9-]` with `-`, and
/// trims leading/trailing dashes.
pub fn sanitize(name: &str) -> String {
    let mapped: String = name
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();

    mapped.trim_matches('-').to_string()
}

/// True for 1-63 characters of `[a-z0-9-]` starting and ending alphanumeric
pub fn is_dns_label(name: &str) -> bool {
    let alnum = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();

    fits_label(name)
        && name.starts_with(alnum)
        && name.ends_with(alnum)
        && name.chars().all(|c| alnum(c) || c == '-')
}

/// Checks a generated name fits in a label value
pub fn fits_label(name: &str) -> bool {
    !name.is_empty() && name.len() <= MAX_NAME_LEN
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_names() {
        assert_eq!(volume_name("ci", "run-1"), "ci.run-1-pv");
        assert_eq!(claim_name("run-1"), "run-1-pvc");
        assert_eq!(cloner_name("run-1"), "run-1-cloner");
        assert_eq!(task_job_name("run-1", "build"), "run-1-task-build");
    }

    #[test]
    fn test_volume_names_differ_across_namespaces() {
        assert_ne!(volume_name("team-a", "run-1"), volume_name("team-b", "run-1"));
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("Unit_Tests"), "unit-tests");
        assert_eq!(sanitize("_lint_"), "lint");
        assert_eq!(sanitize("a.b"), "a-b");
        assert_eq!(task_job_name("run-1", "Integration Tests"), "run-1-task-integration-tests");
    }

    #[test]
    fn test_distinct_names_never_share_children() {
        assert_eq!(child_base("a-b"), "a-b");
        assert_ne!(child_base("a.b"), child_base("a-b"));
        assert_ne!(cloner_name("a.b"), cloner_name("a-b"));
        assert_ne!(child_base("Run"), child_base("run"));
        assert!(child_base("a.b").starts_with("a-b-"));
        assert!(is_dns_label(&child_base("a.b")));
    }

    #[test]
    fn test_child_base_is_stable_and_bounded() {
        assert_eq!(child_base("release.v1"), child_base("release.v1"));

        let long = format!("{}.x", "a".repeat(120));
        let base = child_base(&long);
        assert!(base.len() <= MAX_NAME_LEN);
        assert!(is_dns_label(&base));

        assert_eq!(child_base("...").len(), 8);
    }

    #[test]
    fn test_is_dns_label() {
        assert!(is_dns_label("run-1"));
        assert!(is_dns_label("9lives"));
        assert!(!is_dns_label(""));
        assert!(!is_dns_label("-run"));
        assert!(!is_dns_label("run-"));
        assert!(!is_dns_label("Run"));
        assert!(!is_dns_label("a.b"));
        assert!(!is_dns_label(&"x".repeat(64)));
    }

    #[test]
    fn test_fits_label() {
        assert!(fits_label(&task_job_name("run-1", "build")));
        let long = "x".repeat(60);
        assert!(!fits_label(&task_job_name("run-1", &long)));
    }
}
