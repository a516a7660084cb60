//! Custom domain lifecycle integration tests

#[path = "../common/mod.rs"]
mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use boop_engine::deploy::domains::{DomainManager, MAX_CUSTOM_DOMAINS_PER_OWNER};
use boop_engine::errors::EngineError;
use boop_engine::models::domain::DomainStatus;
use boop_engine::store::{LocalStore, RecordStore};

use common::{git_site, RecordingEdge};

struct Setup {
    store: Arc<LocalStore>,
    edge: Arc<RecordingEdge>,
    domains: DomainManager,
}

async fn setup(edge: RecordingEdge) -> Setup {
    let store = Arc::new(LocalStore::in_memory());
    store.put_site(git_site("s1", "u1")).await.unwrap();
    store.put_site(git_site("s2", "u1")).await.unwrap();
    store.put_site(git_site("s3", "u2")).await.unwrap();
    let edge = Arc::new(edge);
    let domains = DomainManager::new(store.clone(), edge.clone(), "boop.cat");
    Setup { store, edge, domains }
}

fn validation_message(err: EngineError) -> String {
    match err {
        EngineError::Validation(message) => message,
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_pending_domain_routes_once_active() {
    let s = setup(RecordingEdge::new()).await;

    let domain = s
        .domains
        .create("s1", "u1", "https://WWW.Example.com/")
        .await
        .unwrap();
    assert_eq!(domain.hostname, "www.example.com");
    assert_eq!(domain.status, DomainStatus::Pending);
    assert_eq!(domain.cdn_hostname_id.as_deref(), Some("ch_1"));
    assert_eq!(s.edge.fallback_calls.load(Ordering::SeqCst), 1);
    assert!(s.edge.get("host:www.example.com").is_none());

    s.edge.set_status("ch_1", "active", "pending_validation");
    let domain = s.domains.poll("s1", "u1", &domain.id).await.unwrap();
    assert_eq!(domain.status, DomainStatus::PendingSsl);
    assert!(s.edge.get("host:www.example.com").is_none());

    s.edge.set_status("ch_1", "active", "active");
    let domain = s.domains.poll("s1", "u1", &domain.id).await.unwrap();
    assert_eq!(domain.status, DomainStatus::Active);
    assert_eq!(s.edge.get("host:www.example.com").as_deref(), Some("s1"));

    let stored = s.store.get_custom_domain(&domain.id).await.unwrap();
    assert_eq!(stored.status, DomainStatus::Active);
    assert_eq!(stored.ssl_status.as_deref(), Some("active"));
}

#[tokio::test]
async fn test_active_on_create_routes_immediately() {
    let edge = RecordingEdge::new();
    edge.set_initial_status("active", "active");
    let s = setup(edge).await;

    let domain = s.domains.create("s1", "u1", "shop.example.com").await.unwrap();
    assert_eq!(domain.status, DomainStatus::Active);
    assert_eq!(s.edge.get("host:shop.example.com").as_deref(), Some("s1"));
}

#[tokio::test]
async fn test_rejects_root_and_blank_hostnames() {
    let s = setup(RecordingEdge::new()).await;

    for hostname in ["boop.cat", "blog.boop.cat"] {
        let err = s.domains.create("s1", "u1", hostname).await.unwrap_err();
        assert_eq!(validation_message(err), "root-domains-not-supported");
    }
    let err = s.domains.create("s1", "u1", "   ").await.unwrap_err();
    assert_eq!(validation_message(err), "hostname-required");
    assert!(s.edge.hostnames.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_limit_applies_across_owner_sites() {
    let s = setup(RecordingEdge::new()).await;

    s.domains.create("s1", "u1", "a.example.com").await.unwrap();
    s.domains.create("s1", "u1", "b.example.com").await.unwrap();
    s.domains.create("s2", "u1", "c.example.com").await.unwrap();
    assert_eq!(MAX_CUSTOM_DOMAINS_PER_OWNER, 3);

    let err = s.domains.create("s2", "u1", "d.example.com").await.unwrap_err();
    assert_eq!(validation_message(err), "custom-domain-limit-reached");

    // another owner has their own budget
    s.domains.create("s3", "u2", "e.example.com").await.unwrap();
}

#[tokio::test]
async fn test_fallback_origin_failure_is_not_fatal() {
    let s = setup(RecordingEdge::failing_fallback()).await;

    let domain = s.domains.create("s1", "u1", "www.example.com").await.unwrap();
    assert_eq!(domain.status, DomainStatus::Pending);
    assert_eq!(s.domains.fallback_origin(), "sites.boop.cat");
}

#[tokio::test]
async fn test_delete_removes_everywhere() {
    let edge = RecordingEdge::new();
    edge.set_initial_status("active", "active");
    let s = setup(edge).await;

    let domain = s.domains.create("s1", "u1", "www.example.com").await.unwrap();
    assert!(s.edge.get("host:www.example.com").is_some());

    s.domains.delete("s1", "u1", &domain.id).await.unwrap();

    assert!(s.edge.get("host:www.example.com").is_none());
    assert_eq!(*s.edge.deleted_hostnames.lock().unwrap(), vec!["ch_1".to_string()]);
    assert!(matches!(
        s.store.get_custom_domain(&domain.id).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_domains_are_scoped_to_site_and_owner() {
    let s = setup(RecordingEdge::new()).await;
    let domain = s.domains.create("s1", "u1", "www.example.com").await.unwrap();

    assert!(matches!(
        s.domains.poll("s2", "u1", &domain.id).await,
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        s.domains.delete("s1", "u2", &domain.id).await,
        Err(EngineError::Forbidden(_))
    ));
    assert!(matches!(
        s.domains.create("s3", "u1", "x.example.com").await,
        Err(EngineError::Forbidden(_))
    ));
}

#[tokio::test]
async fn test_poll_recovers_missing_cdn_id() {
    let s = setup(RecordingEdge::new()).await;
    let mut domain = s.domains.create("s1", "u1", "www.example.com").await.unwrap();

    domain.cdn_hostname_id = None;
    s.store.update_custom_domain(&domain).await.unwrap();
    s.edge.set_status("ch_1", "active", "active");

    let domain = s.domains.poll("s1", "u1", &domain.id).await.unwrap();
    assert_eq!(domain.cdn_hostname_id.as_deref(), Some("ch_1"));
    assert_eq!(domain.status, DomainStatus::Active);
}
