//! Webhook dispatch integration tests

#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;

use secrecy::SecretString;
use serde_json::json;

use boop_engine::errors::EngineError;
use boop_engine::store::RecordStore;
use boop_engine::webhooks::{sign_payload, WebhookHandler, WebhookOutcome};

use common::{git_site, Harness};

const SECRET: &str = "hook-secret";

fn handler(h: &Harness, secret: Option<&str>) -> WebhookHandler {
    WebhookHandler::new(h.engine.clone(), h.store.clone(), secret.map(SecretString::from))
}

fn push(clone_url: &str, branch: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "ref": format!("refs/heads/{}", branch),
        "repository": { "clone_url": clone_url }
    }))
    .unwrap()
}

#[tokio::test]
async fn test_push_deploys_matching_sites() {
    let h = Harness::new();
    h.store.put_site(git_site("s1", "u1")).await.unwrap();
    let mut other_branch = git_site("s2", "u1");
    other_branch.git_url = Some("https://github.com/acme/s1".to_string());
    other_branch.git_branch = Some("develop".to_string());
    h.store.put_site(other_branch).await.unwrap();
    h.store.put_site(git_site("s3", "u2")).await.unwrap();

    let webhooks = handler(&h, Some(SECRET));
    let body = push("https://github.com/ACME/s1.git", "main");
    let signature = sign_payload(&body, SECRET).unwrap();

    let outcome = webhooks.handle("push", &body, Some(&signature)).await.unwrap();
    assert_eq!(outcome, WebhookOutcome::Push { matched: 1, deployed: 1 });

    h.engine.drain().await;
    assert_eq!(h.store.list_deployments("s1").await.unwrap().len(), 1);
    assert!(h.store.list_deployments("s2").await.unwrap().is_empty());
    assert!(h.store.list_deployments("s3").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_signature_is_required_when_configured() {
    let h = Harness::new();
    let webhooks = handler(&h, Some(SECRET));
    let body = push("https://github.com/acme/s1.git", "main");

    for signature in [None, Some("sha256=00"), Some("garbage")] {
        let err = webhooks.handle("push", &body, signature).await.unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));
    }

    let unsigned = handler(&h, None);
    assert_eq!(
        unsigned.handle("push", &body, None).await.unwrap(),
        WebhookOutcome::Push { matched: 0, deployed: 0 }
    );
}

#[tokio::test]
async fn test_ignored_events_and_bad_payloads() {
    let h = Harness::new();
    let webhooks = handler(&h, None);

    assert_eq!(
        webhooks.handle("ping", b"{}", None).await.unwrap(),
        WebhookOutcome::Ignored("event")
    );
    assert_eq!(
        webhooks.handle("push", b"{}", None).await.unwrap(),
        WebhookOutcome::Ignored("no-repo")
    );
    let err = webhooks.handle("push", b"not json", None).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(message) if message.starts_with("invalid-json")));
}

#[tokio::test]
async fn test_installation_created_and_deleted() {
    let h = Harness::new();
    let webhooks = handler(&h, None);

    let created = serde_json::to_vec(&json!({
        "action": "created",
        "installation": { "id": 4242, "account": { "login": "acme", "type": "Organization" } }
    }))
    .unwrap();
    let outcome = webhooks.handle("installation", &created, None).await.unwrap();
    assert_eq!(
        outcome,
        WebhookOutcome::Installation {
            action: "created".to_string(),
            installation_id: "4242".to_string()
        }
    );

    let installations = h.store.installations().await;
    assert_eq!(installations.len(), 1);
    assert_eq!(installations[0].account_login.as_deref(), Some("acme"));
    assert_eq!(installations[0].account_type.as_deref(), Some("Organization"));

    let deleted = serde_json::to_vec(&json!({
        "action": "deleted",
        "installation": { "id": 4242 }
    }))
    .unwrap();
    webhooks.handle("installation", &deleted, None).await.unwrap();
    assert!(h.store.installations().await.is_empty());

    let suspended = serde_json::to_vec(&json!({
        "action": "suspend",
        "installation": { "id": 4242 }
    }))
    .unwrap();
    assert_eq!(
        webhooks.handle("installation", &suspended, None).await.unwrap(),
        WebhookOutcome::Ignored("action")
    );
}

#[tokio::test]
async fn test_empty_secret_disables_verification() {
    let h = Harness::new();
    let store: Arc<dyn RecordStore> = h.store.clone();
    let webhooks = WebhookHandler::new(h.engine.clone(), store, Some(SecretString::from("")));

    let body = push("https://github.com/acme/s1.git", "main");
    assert!(webhooks.handle("push", &body, None).await.is_ok());
}
