//! Tests for delivery routing.

use super::*;
use crate::config::WebhookSecret;
use std::collections::BTreeMap;

/// Build a configuration directly; routing never touches the filesystem so
/// no validation pass is needed here.
fn test_config() -> DeployConfig {
    let mut events = BTreeMap::new();
    events.insert(
        "push".to_string(),
        ScriptConfig::new("/opt/deploy/push.sh").with_refs(["refs/heads/main", "refs/heads/prod"]),
    );
    events.insert(
        "release".to_string(),
        ScriptConfig::new("/opt/deploy/release.sh"),
    );

    let mut repos = BTreeMap::new();
    repos.insert(
        "acme/widgets".to_string(),
        RepositoryConfig {
            secret: WebhookSecret::new("secret"),
            events,
        },
    );
    repos.insert(
        "acme/empty".to_string(),
        RepositoryConfig {
            secret: WebhookSecret::new("secret"),
            events: BTreeMap::new(),
        },
    );

    DeployConfig {
        repos,
        max_queue_length: 0,
    }
}

#[test]
fn test_resolves_script_when_ref_in_filter() {
    let config = test_config();

    let script = config
        .resolve("acme/widgets", "push", Some("refs/heads/main"))
        .unwrap();
    assert_eq!(script.run, std::path::Path::new("/opt/deploy/push.sh"));

    assert!(config
        .resolve("acme/widgets", "push", Some("refs/heads/prod"))
        .is_ok());
}

#[test]
fn test_resolves_any_ref_when_filter_unset() {
    let config = test_config();

    for git_ref in [Some("refs/tags/v1.0.0"), Some("refs/heads/anything"), None] {
        let script = config.resolve("acme/widgets", "release", git_ref).unwrap();
        assert_eq!(script.run, std::path::Path::new("/opt/deploy/release.sh"));
    }
}

#[test]
fn test_ref_outside_filter_is_not_applicable() {
    let config = test_config();

    let result = config.resolve("acme/widgets", "push", Some("refs/heads/feature"));
    assert_eq!(
        result,
        Err(RouteError::RefNotApplicable {
            event_type: "push".to_string(),
            git_ref: Some("refs/heads/feature".to_string()),
        })
    );
    assert!(result.unwrap_err().is_informational());
}

#[test]
fn test_missing_ref_with_filter_is_not_applicable() {
    let config = test_config();

    let result = config.resolve("acme/widgets", "push", None);
    assert!(matches!(
        result,
        Err(RouteError::RefNotApplicable { git_ref: None, .. })
    ));
}

#[test]
fn test_unknown_repository_wins_over_everything_else() {
    let config = test_config();

    for (event, git_ref) in [
        ("push", Some("refs/heads/main")),
        ("release", None),
        ("unknown", Some("refs/heads/feature")),
    ] {
        let result = config.resolve("acme/gadgets", event, git_ref);
        assert_eq!(
            result,
            Err(RouteError::RepositoryUndefined {
                repository: "acme/gadgets".to_string()
            })
        );
    }
}

#[test]
fn test_unknown_event_reported_before_ref() {
    let config = test_config();

    let result = config.resolve("acme/widgets", "issues", Some("refs/heads/main"));
    let error = result.unwrap_err();

    assert_eq!(
        error,
        RouteError::EventUndefined {
            repository: "acme/widgets".to_string(),
            event_type: "issues".to_string(),
        }
    );
    assert!(!error.is_informational());
    assert!(error.to_string().contains("issues"));

    assert!(matches!(
        config.resolve("acme/empty", "push", None),
        Err(RouteError::EventUndefined { .. })
    ));
}

#[test]
fn test_repository_lookup() {
    let config = test_config();

    let repo = config.repository("acme/widgets").unwrap();
    assert_eq!(repo.events.len(), 2);
    assert!(matches!(
        config.repository("Acme/Widgets"),
        Err(RouteError::RepositoryUndefined { .. })
    ));
}

#[test]
fn test_ref_not_applicable_message() {
    let error = RouteError::RefNotApplicable {
        event_type: "push".to_string(),
        git_ref: Some("refs/heads/dev".to_string()),
    };
    assert_eq!(
        error.to_string(),
        "Ref 'refs/heads/dev' not associated with 'push' event task"
    );
}
