//! Webhook event classification
//!
//! Maps a verified delivery (event-type header + raw body) to a typed
//! domain event. Payloads are deserialized into per-event structs at this
//! boundary; nothing downstream sees raw JSON.

use serde::{Deserialize, Serialize};

use crate::error::ServiceError;
use crate::installations::InstallationRecord;

/// Everything the reward pipeline needs from a merged pull request.
///
/// Built per delivery and dropped once the delivery is processed.
#[derive(Debug, Clone, Serialize)]
pub struct PullRequestSummary {
    pub repository: String,
    pub author: String,
    pub additions: u64,
    pub deletions: u64,
    pub files_changed: u64,
    pub number: u64,
    pub title: String,
    pub installation_id: Option<u64>,
}

#[derive(Debug, Clone)]
pub enum DomainEvent {
    PullRequestMerged(PullRequestSummary),
    PullRequestOpened { repository: String, number: u64 },
    PullRequestSynchronized { repository: String, number: u64 },
    InstallationCreated(InstallationRecord),
    InstallationDeleted { installation_id: u64, account_login: String },
    InstallationRepositoriesChanged {
        installation_id: u64,
        added: Vec<String>,
        removed: Vec<String>,
    },
    Ping,
    Unrecognized { event: String },
}

#[derive(Debug, Deserialize)]
struct PullRequestEventPayload {
    action: String,
    pull_request: PullRequestPayload,
    repository: RepositoryRef,
    installation: Option<InstallationRef>,
}

#[derive(Debug, Deserialize)]
struct PullRequestPayload {
    #[serde(default)]
    merged: bool,
    user: AccountRef,
    // GitHub omits the diff counters on some delivery shapes
    #[serde(default)]
    additions: u64,
    #[serde(default)]
    deletions: u64,
    #[serde(default)]
    changed_files: u64,
    number: u64,
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
struct InstallationEventPayload {
    action: String,
    installation: InstallationPayload,
    #[serde(default)]
    repositories: Vec<RepositoryRef>,
    #[serde(default)]
    repositories_added: Vec<RepositoryRef>,
    #[serde(default)]
    repositories_removed: Vec<RepositoryRef>,
}

#[derive(Debug, Deserialize)]
struct InstallationPayload {
    id: u64,
    account: AccountRef,
    repository_selection: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RepositoryRef {
    full_name: String,
}

#[derive(Debug, Deserialize)]
struct AccountRef {
    login: String,
}

#[derive(Debug, Deserialize)]
struct InstallationRef {
    id: u64,
}

/// Classify a verified webhook delivery.
///
/// Callers must have checked the signature first; this function trusts the
/// body. Unknown event types are not errors — they classify as
/// [`DomainEvent::Unrecognized`] and the caller counts and ignores them.
pub fn classify(event_type: &str, raw_body: &[u8]) -> Result<DomainEvent, ServiceError> {
    match event_type {
        // ping carries no domain data; acknowledge without parsing
        "ping" => Ok(DomainEvent::Ping),
        "pull_request" => {
            let payload: PullRequestEventPayload =
                serde_json::from_slice(raw_body).map_err(ServiceError::MalformedPayload)?;
            Ok(classify_pull_request(payload))
        }
        "installation" => {
            let payload: InstallationEventPayload =
                serde_json::from_slice(raw_body).map_err(ServiceError::MalformedPayload)?;
            Ok(classify_installation(payload))
        }
        "installation_repositories" => {
            let payload: InstallationEventPayload =
                serde_json::from_slice(raw_body).map_err(ServiceError::MalformedPayload)?;
            Ok(DomainEvent::InstallationRepositoriesChanged {
                installation_id: payload.installation.id,
                added: full_names(payload.repositories_added),
                removed: full_names(payload.repositories_removed),
            })
        }
        other => Ok(DomainEvent::Unrecognized {
            event: other.to_string(),
        }),
    }
}

fn classify_pull_request(payload: PullRequestEventPayload) -> DomainEvent {
    let repository = payload.repository.full_name;
    let pr = payload.pull_request;

    match payload.action.as_str() {
        "closed" if pr.merged => DomainEvent::PullRequestMerged(PullRequestSummary {
            repository,
            author: pr.user.login,
            additions: pr.additions,
            deletions: pr.deletions,
            files_changed: pr.changed_files,
            number: pr.number,
            title: pr.title,
            installation_id: payload.installation.map(|i| i.id),
        }),
        "opened" => DomainEvent::PullRequestOpened {
            repository,
            number: pr.number,
        },
        "synchronize" => DomainEvent::PullRequestSynchronized {
            repository,
            number: pr.number,
        },
        other => DomainEvent::Unrecognized {
            event: format!("pull_request.{}", other),
        },
    }
}

fn classify_installation(payload: InstallationEventPayload) -> DomainEvent {
    let installation = payload.installation;

    match payload.action.as_str() {
        "created" => DomainEvent::InstallationCreated(InstallationRecord {
            id: installation.id,
            account_login: installation.account.login,
            repository_selection: installation.repository_selection,
            repository_count: payload.repositories.len() as u64,
        }),
        "deleted" => DomainEvent::InstallationDeleted {
            installation_id: installation.id,
            account_login: installation.account.login,
        },
        other => DomainEvent::Unrecognized {
            event: format!("installation.{}", other),
        },
    }
}

fn full_names(repos: Vec<RepositoryRef>) -> Vec<String> {
    repos.into_iter().map(|r| r.full_name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pull_request_body(action: &str, merged: bool) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "action": action,
            "pull_request": {
                "merged": merged,
                "user": { "login": "octocat" },
                "additions": 50,
                "deletions": 3,
                "changed_files": 5,
                "number": 42,
                "title": "Add frobnicator"
            },
            "repository": { "full_name": "acme/widgets" },
            "installation": { "id": 7001 }
        }))
        .unwrap()
    }

    #[test]
    fn test_merged_pull_request() {
        let event = classify("pull_request", &pull_request_body("closed", true)).unwrap();
        match event {
            DomainEvent::PullRequestMerged(pr) => {
                assert_eq!(pr.repository, "acme/widgets");
                assert_eq!(pr.author, "octocat");
                assert_eq!(pr.additions, 50);
                assert_eq!(pr.files_changed, 5);
                assert_eq!(pr.number, 42);
                assert_eq!(pr.installation_id, Some(7001));
            }
            other => panic!("expected PullRequestMerged, got {:?}", other),
        }
    }

    #[test]
    fn test_closed_without_merge_is_not_a_merge() {
        let event = classify("pull_request", &pull_request_body("closed", false)).unwrap();
        assert!(matches!(
            event,
            DomainEvent::Unrecognized { ref event } if event == "pull_request.closed"
        ));
    }

    #[test]
    fn test_opened_and_synchronize() {
        let event = classify("pull_request", &pull_request_body("opened", false)).unwrap();
        assert!(matches!(event, DomainEvent::PullRequestOpened { number: 42, .. }));

        let event = classify("pull_request", &pull_request_body("synchronize", false)).unwrap();
        assert!(matches!(event, DomainEvent::PullRequestSynchronized { .. }));
    }

    #[test]
    fn test_missing_diff_counters_default_to_zero() {
        let body = serde_json::to_vec(&json!({
            "action": "closed",
            "pull_request": {
                "merged": true,
                "user": { "login": "octocat" },
                "number": 7
            },
            "repository": { "full_name": "acme/widgets" }
        }))
        .unwrap();

        match classify("pull_request", &body).unwrap() {
            DomainEvent::PullRequestMerged(pr) => {
                assert_eq!(pr.additions, 0);
                assert_eq!(pr.files_changed, 0);
                assert_eq!(pr.installation_id, None);
            }
            other => panic!("expected PullRequestMerged, got {:?}", other),
        }
    }

    #[test]
    fn test_ping_short_circuits() {
        // body intentionally not valid JSON: ping must not parse it
        let event = classify("ping", b"not json").unwrap();
        assert!(matches!(event, DomainEvent::Ping));
    }

    #[test]
    fn test_installation_created() {
        let body = serde_json::to_vec(&json!({
            "action": "created",
            "installation": {
                "id": 7001,
                "account": { "login": "acme" },
                "repository_selection": "selected"
            },
            "repositories": [
                { "full_name": "acme/widgets" },
                { "full_name": "acme/gadgets" }
            ]
        }))
        .unwrap();

        match classify("installation", &body).unwrap() {
            DomainEvent::InstallationCreated(record) => {
                assert_eq!(record.id, 7001);
                assert_eq!(record.account_login, "acme");
                assert_eq!(record.repository_count, 2);
            }
            other => panic!("expected InstallationCreated, got {:?}", other),
        }
    }

    #[test]
    fn test_installation_deleted() {
        let body = serde_json::to_vec(&json!({
            "action": "deleted",
            "installation": {
                "id": 7001,
                "account": { "login": "acme" }
            }
        }))
        .unwrap();

        match classify("installation", &body).unwrap() {
            DomainEvent::InstallationDeleted {
                installation_id,
                account_login,
            } => {
                assert_eq!(installation_id, 7001);
                assert_eq!(account_login, "acme");
            }
            other => panic!("expected InstallationDeleted, got {:?}", other),
        }
    }

    #[test]
    fn test_repositories_changed() {
        let body = serde_json::to_vec(&json!({
            "action": "added",
            "installation": {
                "id": 7001,
                "account": { "login": "acme" }
            },
            "repositories_added": [ { "full_name": "acme/new-repo" } ],
            "repositories_removed": []
        }))
        .unwrap();

        match classify("installation_repositories", &body).unwrap() {
            DomainEvent::InstallationRepositoriesChanged { added, removed, .. } => {
                assert_eq!(added, vec!["acme/new-repo".to_string()]);
                assert!(removed.is_empty());
            }
            other => panic!("expected InstallationRepositoriesChanged, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_event_is_not_an_error() {
        let event = classify("workflow_run", b"{}").unwrap();
        assert!(matches!(
            event,
            DomainEvent::Unrecognized { ref event } if event == "workflow_run"
        ));
    }

    #[test]
    fn test_malformed_payload() {
        let err = classify("pull_request", b"{ not json").unwrap_err();
        assert!(matches!(err, ServiceError::MalformedPayload(_)));
    }
}
