//! GitHub webhook payload parsing and trigger classification.

use serde::Deserialize;

use crate::error::{Result, ScanhookError};
use crate::util::checked_increased;

/// The outcome of classifying a webhook event: either a repo to schedule a
/// scan for, or no trigger.
pub type Classification = Option<String>;

#[derive(Deserialize)]
struct Repo {
    full_name: String,
}

#[derive(Deserialize)]
struct BodyChange {
    from: Option<String>,
}

#[derive(Deserialize)]
struct Changes {
    body: Option<BodyChange>,
}

#[derive(Deserialize)]
struct IssuesEvent {
    action: Option<String>,
    issue: Issue,
    changes: Option<Changes>,
    repository: Repo,
}

#[derive(Deserialize)]
struct Issue {
    title: String,
    body: Option<String>,
}

#[derive(Deserialize)]
struct PullRequestEvent {
    action: Option<String>,
    pull_request: PullRequest,
    changes: Option<Changes>,
    repository: Repo,
}

#[derive(Deserialize)]
struct PullRequest {
    body: Option<String>,
}

#[derive(Deserialize)]
struct PushEvent {
    repository: Repo,
}

/// Classify a raw GitHub webhook payload. `event_type` is the value of the
/// `X-GitHub-Event` header. `dashboard_title_for` resolves the configured
/// dashboard issue title for a given repo ("" means "accept any title") —
/// it is only consulted once the repo has been extracted from the payload,
/// so per-project overrides can be applied.
pub fn classify(event_type: &str, payload: &[u8], dashboard_title_for: impl Fn(&str) -> String) -> Result<Classification> {
    match event_type {
        "issues" => classify_issues(payload, dashboard_title_for),
        "pull_request" => classify_pull_request(payload),
        "push" => classify_push(payload),
        _ => Ok(None),
    }
}

fn classify_issues(payload: &[u8], dashboard_title_for: impl Fn(&str) -> String) -> Result<Classification> {
    let event: IssuesEvent =
        serde_json::from_slice(payload).map_err(|e| ScanhookError::BadRequest(format!("invalid issues payload: {e}")))?;
    let repo = event.repository.full_name;
    let dashboard_title = dashboard_title_for(&repo);

    if !dashboard_title.is_empty() && event.issue.title != dashboard_title {
        return Ok(None);
    }

    let Some(action) = event.action else {
        return Ok(Some(repo));
    };

    match action.as_str() {
        "deleted" | "transferred" | "closed" | "reopened" => Ok(Some(repo)),
        "edited" => {
            let Some(old_body) = event.changes.and_then(|c| c.body).and_then(|b| b.from) else {
                return Ok(None);
            };
            let new_body = event.issue.body.unwrap_or_default();
            Ok(checked_increased(&old_body, &new_body).then_some(repo))
        }
        _ => Ok(None),
    }
}

fn classify_pull_request(payload: &[u8]) -> Result<Classification> {
    let event: PullRequestEvent = serde_json::from_slice(payload)
        .map_err(|e| ScanhookError::BadRequest(format!("invalid pull_request payload: {e}")))?;
    let repo = event.repository.full_name;

    let Some(action) = event.action else {
        return Ok(Some(repo));
    };

    match action.as_str() {
        "closed" | "reopened" => Ok(Some(repo)),
        "edited" => {
            let Some(old_body) = event.changes.and_then(|c| c.body).and_then(|b| b.from) else {
                return Ok(None);
            };
            let new_body = event.pull_request.body.unwrap_or_default();
            Ok(checked_increased(&old_body, &new_body).then_some(repo))
        }
        _ => Ok(None),
    }
}

fn classify_push(payload: &[u8]) -> Result<Classification> {
    let event: PushEvent =
        serde_json::from_slice(payload).map_err(|e| ScanhookError::BadRequest(format!("invalid push payload: {e}")))?;
    Ok(Some(event.repository.full_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issues_payload(action: &str, title: &str, old_body: Option<&str>, new_body: &str) -> String {
        let changes = old_body
            .map(|b| format!(r#","changes":{{"body":{{"from":{:?}}}}}"#, b))
            .unwrap_or_default();
        format!(
            r#"{{"action":{:?},"issue":{{"title":{:?},"body":{:?}}}{changes},"repository":{{"full_name":"o/r"}}}}"#,
            action, title, new_body
        )
    }

    #[test]
    fn issue_edited_triggers_on_checkbox_increase() {
        let payload = issues_payload(
            "edited",
            "Dependency Dashboard",
            Some("[x] Foo [ ]bar [x] fooBar"),
            "[x] Foo [x]bar [x] fooBar",
        );
        let result = classify("issues", payload.as_bytes(), |_| "Dependency Dashboard".to_string()).unwrap();
        assert_eq!(result, Some("o/r".to_string()));
    }

    #[test]
    fn issue_edited_does_not_trigger_without_checkbox_increase() {
        let payload = issues_payload(
            "edited",
            "Dependency Dashboard",
            Some("[x] Foo [ ]bar [x] fooBar"),
            "[x] Foo [ ]bar [x] fooBar",
        );
        let result = classify("issues", payload.as_bytes(), |_| "Dependency Dashboard".to_string()).unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn issue_edited_respects_dashboard_title_mismatch() {
        let payload = issues_payload("edited", "Some Other Issue", Some("[ ]"), "[x]");
        let result = classify("issues", payload.as_bytes(), |_| "Dependency Dashboard".to_string()).unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn issue_edited_accepts_any_title_when_unconfigured() {
        let payload = issues_payload("edited", "Whatever", Some("[ ]"), "[x]");
        let result = classify("issues", payload.as_bytes(), |_| "".to_string()).unwrap();
        assert_eq!(result, Some("o/r".to_string()));
    }

    #[test]
    fn issue_closed_triggers_unconditionally() {
        let payload = r#"{"action":"closed","issue":{"title":"x","body":null},"repository":{"full_name":"o/r"}}"#;
        let result = classify("issues", payload.as_bytes(), |_| "".to_string()).unwrap();
        assert_eq!(result, Some("o/r".to_string()));
    }

    #[test]
    fn issue_nil_action_triggers() {
        let payload = r#"{"issue":{"title":"x","body":null},"repository":{"full_name":"o/r"}}"#;
        let result = classify("issues", payload.as_bytes(), |_| "".to_string()).unwrap();
        assert_eq!(result, Some("o/r".to_string()));
    }

    #[test]
    fn pull_request_edited_ignores_title_and_checks_body_only() {
        let payload = r#"{"action":"edited","pull_request":{"body":"[x] one [x] two"},
            "changes":{"body":{"from":"[ ] one [ ] two"}},"repository":{"full_name":"o/r"}}"#;
        let result = classify("pull_request", payload.as_bytes(), |_| "irrelevant".to_string()).unwrap();
        assert_eq!(result, Some("o/r".to_string()));
    }

    #[test]
    fn push_event_always_triggers() {
        let payload = r#"{"repository":{"full_name":"o/r"}}"#;
        let result = classify("push", payload.as_bytes(), |_| "".to_string()).unwrap();
        assert_eq!(result, Some("o/r".to_string()));
    }

    #[test]
    fn unknown_event_type_is_ignored() {
        let result = classify("star", b"{}", |_| "".to_string()).unwrap();
        assert_eq!(result, None);
    }
}
