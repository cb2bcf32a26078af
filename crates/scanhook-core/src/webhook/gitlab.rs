//! GitLab webhook payload parsing and trigger classification.
//!
//! GitLab does not sign payloads; authentication relies on network trust
//! (and, for Push, not re-triggering on the scan tool's own pushes).

use serde::Deserialize;

use crate::error::{Result, ScanhookError};
use crate::util::count_checked;

pub type Classification = Option<String>;

#[derive(Deserialize)]
struct Project {
    path_with_namespace: String,
}

#[derive(Deserialize)]
struct IssueAttributes {
    title: String,
    description: Option<String>,
}

#[derive(Deserialize)]
struct IssueEvent {
    object_attributes: IssueAttributes,
    project: Project,
}

#[derive(Deserialize)]
struct MergeAttributes {
    description: Option<String>,
}

#[derive(Deserialize)]
struct MergeEvent {
    object_attributes: MergeAttributes,
    project: Project,
}

#[derive(Deserialize)]
struct PushEvent {
    user_email: String,
    project: Project,
}

/// Classify a raw GitLab webhook payload. `event_type` is the value of the
/// `X-Gitlab-Event` header. `dashboard_title_for` resolves the configured
/// dashboard issue title for a given repo ("" means "accept any title") —
/// like GitHub's classifier, it is only consulted once the repo has been
/// extracted from the payload, so per-project overrides apply. `git_email`
/// is this endpoint's configured git identity email, used to suppress
/// self-pushes.
pub fn classify(
    event_type: &str,
    payload: &[u8],
    dashboard_title_for: impl Fn(&str) -> String,
    git_email: &str,
) -> Result<Classification> {
    match event_type {
        "Issue Hook" => classify_issue(payload, dashboard_title_for),
        "Merge Request Hook" => classify_merge(payload),
        "Push Hook" => classify_push(payload, git_email),
        _ => Ok(None),
    }
}

fn classify_issue(payload: &[u8], dashboard_title_for: impl Fn(&str) -> String) -> Result<Classification> {
    let event: IssueEvent =
        serde_json::from_slice(payload).map_err(|e| ScanhookError::BadRequest(format!("invalid issue payload: {e}")))?;
    let repo = event.project.path_with_namespace;
    let dashboard_title = dashboard_title_for(&repo);

    if !dashboard_title.is_empty() && event.object_attributes.title != dashboard_title {
        return Ok(None);
    }

    let checked = count_checked(&event.object_attributes.description.unwrap_or_default());
    Ok((checked > 0).then_some(repo))
}

fn classify_merge(payload: &[u8]) -> Result<Classification> {
    let event: MergeEvent =
        serde_json::from_slice(payload).map_err(|e| ScanhookError::BadRequest(format!("invalid merge_request payload: {e}")))?;

    let checked = count_checked(&event.object_attributes.description.unwrap_or_default());
    Ok((checked > 0).then_some(event.project.path_with_namespace))
}

fn classify_push(payload: &[u8], git_email: &str) -> Result<Classification> {
    let event: PushEvent =
        serde_json::from_slice(payload).map_err(|e| ScanhookError::BadRequest(format!("invalid push payload: {e}")))?;

    if event.user_email == git_email {
        return Ok(None);
    }
    Ok(Some(event.project.path_with_namespace))
}
