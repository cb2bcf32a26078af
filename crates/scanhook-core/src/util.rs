//! Small, self-contained helpers shared across webhook classification and
//! the Kubernetes executor: checkbox-diff detection and cluster-safe name
//! derivation.

/// Count non-overlapping occurrences of the literal `[x]` in `s`.
pub fn count_checked(s: &str) -> usize {
    let mut count = 0;
    let mut rest = s;
    while let Some(idx) = rest.find("[x]") {
        count += 1;
        rest = &rest[idx + 3..];
    }
    count
}

/// True iff `new_body` has strictly more checked items than `old_body`.
pub fn checked_increased(old_body: &str, new_body: &str) -> bool {
    count_checked(old_body) < count_checked(new_body)
}

/// Kubernetes object names (and `generateName` prefixes) are capped at 253
/// characters; the orchestrator appends an 11-character random suffix to
/// `generateName`, so the prefix we hand over must leave room for that plus
/// the trailing hyphen the cluster inserts before the suffix.
const K8S_NAME_MAX: usize = 253;
const GENERATE_NAME_SUFFIX_LEN: usize = 11;

/// Derive a job `generateName` prefix bounded by the cluster's name limit.
///
/// Lowercases `repo`, trims it to fit, preferring to drop leading path
/// segments over truncating mid-segment, then replaces any remaining `/`
/// with `-` and appends a trailing hyphen.
pub fn format_name_prefix(prefix: &str, repo: &str) -> String {
    let max = K8S_NAME_MAX
        .saturating_sub(prefix.len())
        .saturating_sub(GENERATE_NAME_SUFFIX_LEN)
        .saturating_sub(1);

    let mut repo = repo.to_lowercase();
    while repo.len() > max {
        if let Some(slash) = repo.find('/') {
            repo = repo[slash + 1..].to_string();
        } else {
            repo.truncate(max);
            break;
        }
    }

    let repo = repo.replace('/', "-");
    format!("{prefix}{repo}-")
}
