//! Deployment engine integration tests

#[path = "../common/mod.rs"]
mod common;

use boop_engine::deploy::envtext::EnvCipher;
use boop_engine::deploy::fsm::DeploymentStatus;
use boop_engine::errors::EngineError;
use boop_engine::models::domain::{CustomDomain, DomainStatus};
use boop_engine::store::RecordStore;

use common::{git_site, FakeFetcher, GatedToolchain, Harness, MemoryObjectStore};

#[tokio::test]
async fn test_deploy_publishes_site() {
    let h = Harness::builder().toolchain(GatedToolchain::gated()).build();
    h.store.put_site(git_site("s1", "u1")).await.unwrap();

    let (tx, mut rx) = boop_engine::deploy::logger::log_channel(10);
    let deployment = h.engine.deploy("s1", "u1", Some(tx)).await.unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Building);

    // exactly one row, still building while the build is held
    h.toolchain.started.notified().await;
    let rows = h.store.list_deployments("s1").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, DeploymentStatus::Building);
    assert!(h.engine.is_running(&deployment.id));

    h.toolchain.release();
    let mut lines = Vec::new();
    while let Some(line) = rx.recv().await {
        lines.push(line);
    }

    assert_eq!(lines.first().map(String::as_str), Some("Starting deployment for site Site s1 (s1)"));
    assert_eq!(lines.last().map(String::as_str), Some("Deployment successful!"));
    assert!(lines.iter().any(|l| l == "Found 3 files to upload"));
    assert!(lines.iter().any(|l| l == "No GitHub token found for user. Private repos may fail."));

    let stored = h.store.get_deployment(&deployment.id).await.unwrap();
    assert_eq!(stored.status, DeploymentStatus::Running);
    assert_eq!(stored.url.as_deref(), Some("https://s1.boop.cat"));
    assert_eq!(stored.commit.sha.as_deref(), Some("abc123"));
    assert!(!h.engine.is_running(&deployment.id));

    let site = h.store.get_site("s1", "u1").await.unwrap();
    assert_eq!(site.current_deployment_id.as_deref(), Some(deployment.id.as_str()));

    assert_eq!(h.edge.get("host:s1").as_deref(), Some("s1"));
    assert_eq!(h.edge.get("current:s1").as_deref(), Some(deployment.id.as_str()));

    let prefix = format!("sites/s1/{}/", deployment.id);
    let names = h.objects.names();
    assert_eq!(names.len(), 3);
    assert!(names.iter().all(|n| n.starts_with(&prefix)));
    assert_eq!(
        h.objects.content_type(&format!("{}index.html", prefix)).as_deref(),
        Some("text/html")
    );

    assert!(!h.layout.scratch_dir(&deployment.id).exists().await);
    let logs = h.engine.read_logs(&deployment.id, "u1").await.unwrap();
    assert!(logs.contains("Deployment successful!"));
}

#[tokio::test]
async fn test_second_deploy_stops_first() {
    let h = Harness::new();
    h.store.put_site(git_site("s1", "u1")).await.unwrap();

    let (first, _) = h.deploy_and_wait("s1", "u1").await;
    let (second, _) = h.deploy_and_wait("s1", "u1").await;

    let first = h.store.get_deployment(&first.id).await.unwrap();
    let second = h.store.get_deployment(&second.id).await.unwrap();
    assert_eq!(first.status, DeploymentStatus::Stopped);
    assert_eq!(second.status, DeploymentStatus::Running);

    let running = h
        .store
        .list_deployments("s1")
        .await
        .unwrap()
        .into_iter()
        .filter(|d| d.status == DeploymentStatus::Running)
        .count();
    assert_eq!(running, 1);
    assert_eq!(h.edge.get("current:s1").as_deref(), Some(second.id.as_str()));

    // artifacts of the older deployment stay in place
    assert_eq!(h.objects.names().len(), 6);
}

#[tokio::test]
async fn test_cancel_during_build() {
    let h = Harness::builder().toolchain(GatedToolchain::gated()).build();
    h.store.put_site(git_site("s1", "u1")).await.unwrap();

    let (tx, mut rx) = boop_engine::deploy::logger::log_channel(10);
    let deployment = h.engine.deploy("s1", "u1", Some(tx)).await.unwrap();
    h.toolchain.started.notified().await;

    h.engine.cancel(&deployment.id).unwrap();
    h.toolchain.release();
    let mut lines = Vec::new();
    while let Some(line) = rx.recv().await {
        lines.push(line);
    }

    let stored = h.store.get_deployment(&deployment.id).await.unwrap();
    assert_eq!(stored.status, DeploymentStatus::Canceled);
    assert!(lines.iter().any(|l| l.starts_with("Deployment failed:")));
    assert!(h.objects.names().is_empty());
    assert!(h.edge.get("current:s1").is_none());

    assert!(matches!(h.engine.cancel(&deployment.id), Err(EngineError::NotRunning(_))));
}

#[tokio::test]
async fn test_stop_while_building_cancels_pipeline() {
    let h = Harness::builder().toolchain(GatedToolchain::gated()).build();
    h.store.put_site(git_site("s1", "u1")).await.unwrap();

    let (tx, mut rx) = boop_engine::deploy::logger::log_channel(10);
    let deployment = h.engine.deploy("s1", "u1", Some(tx)).await.unwrap();
    h.toolchain.started.notified().await;

    assert!(matches!(
        h.engine.stop(&deployment.id, "u2").await,
        Err(EngineError::Forbidden(_))
    ));
    assert_eq!(
        h.engine.stop(&deployment.id, "u1").await.unwrap(),
        DeploymentStatus::Canceled
    );

    h.toolchain.release();
    while rx.recv().await.is_some() {}
    assert_eq!(
        h.store.get_deployment(&deployment.id).await.unwrap().status,
        DeploymentStatus::Canceled
    );
}

#[tokio::test]
async fn test_stop_running_deployment_removes_routing() {
    let h = Harness::new();
    h.store.put_site(git_site("s1", "u1")).await.unwrap();
    let (deployment, _) = h.deploy_and_wait("s1", "u1").await;
    assert!(h.edge.get("host:s1").is_some());

    let status = h.engine.stop(&deployment.id, "u1").await.unwrap();
    assert_eq!(status, DeploymentStatus::Stopped);
    assert!(h.edge.get("host:s1").is_none());
    assert!(h.edge.get("current:s1").is_none());

    assert!(matches!(
        h.engine.stop(&deployment.id, "u1").await,
        Err(EngineError::NotRunning(_))
    ));
}

#[tokio::test]
async fn test_deploy_rejects_bad_sites_before_creating_records() {
    let h = Harness::new();

    let mut no_git = git_site("s1", "u1");
    no_git.git_url = None;
    h.store.put_site(no_git).await.unwrap();

    let mut bad_command = git_site("s2", "u1");
    bad_command.build_command = Some("npm run build && rm -rf /".to_string());
    h.store.put_site(bad_command).await.unwrap();

    let mut server = git_site("s3", "u1");
    server.build_command = Some("npm run start".to_string());
    h.store.put_site(server).await.unwrap();

    for site in ["s1", "s2", "s3"] {
        let err = h.engine.deploy(site, "u1", None).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)), "{site}: {err}");
        assert!(h.store.list_deployments(site).await.unwrap().is_empty());
    }

    assert!(matches!(
        h.engine.deploy("s1", "u2", None).await,
        Err(EngineError::Forbidden(_))
    ));
    assert!(matches!(
        h.engine.deploy("missing", "u1", None).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_build_failure_marks_failed() {
    let h = Harness::builder().toolchain(GatedToolchain::failing()).build();
    h.store.put_site(git_site("s1", "u1")).await.unwrap();

    let (deployment, lines) = h.deploy_and_wait("s1", "u1").await;

    let stored = h.store.get_deployment(&deployment.id).await.unwrap();
    assert_eq!(stored.status, DeploymentStatus::Failed);
    assert!(lines
        .iter()
        .any(|l| l.starts_with("Deployment failed:") && l.contains("exit status 1")));
    assert!(h.objects.names().is_empty());
    assert!(!h.layout.scratch_dir(&deployment.id).exists().await);
}

#[tokio::test]
async fn test_clone_failure_marks_failed() {
    let h = Harness::builder()
        .fetcher(FakeFetcher {
            fail: true,
            ..FakeFetcher::default()
        })
        .build();
    h.store.put_site(git_site("s1", "u1")).await.unwrap();

    let (deployment, _) = h.deploy_and_wait("s1", "u1").await;
    assert_eq!(
        h.store.get_deployment(&deployment.id).await.unwrap().status,
        DeploymentStatus::Failed
    );
}

#[tokio::test]
async fn test_upload_failure_marks_failed() {
    let h = Harness::builder()
        .objects(MemoryObjectStore::failing_on("app.js"))
        .build();
    h.store.put_site(git_site("s1", "u1")).await.unwrap();

    let (deployment, lines) = h.deploy_and_wait("s1", "u1").await;

    assert_eq!(
        h.store.get_deployment(&deployment.id).await.unwrap().status,
        DeploymentStatus::Failed
    );
    assert!(lines.iter().any(|l| l.contains("assets/app.js")));
    assert!(h.edge.get("current:s1").is_none());
}

#[tokio::test]
async fn test_custom_domains_are_routed_and_preferred_for_url() {
    let h = Harness::new();
    h.store.put_site(git_site("s1", "u1")).await.unwrap();

    let mut active = CustomDomain::new("c1", "s1", "www.example.com");
    active.status = DomainStatus::Active;
    h.store.create_custom_domain(&active).await.unwrap();
    h.store
        .create_custom_domain(&CustomDomain::new("c2", "s1", "broken.example.com"))
        .await
        .unwrap();
    h.edge.fail_label("broken.example.com");

    let (deployment, lines) = h.deploy_and_wait("s1", "u1").await;

    let stored = h.store.get_deployment(&deployment.id).await.unwrap();
    assert_eq!(stored.status, DeploymentStatus::Running);
    assert_eq!(stored.url.as_deref(), Some("https://www.example.com"));
    assert_eq!(h.edge.get("host:www.example.com").as_deref(), Some("s1"));
    assert!(lines
        .iter()
        .any(|l| l.starts_with("Failed to update routing for broken.example.com")));
}

#[tokio::test]
async fn test_primary_route_failure_fails_deployment() {
    let h = Harness::new();
    h.store.put_site(git_site("s1", "u1")).await.unwrap();
    h.edge.fail_label("s1");

    let (deployment, _) = h.deploy_and_wait("s1", "u1").await;
    assert_eq!(
        h.store.get_deployment(&deployment.id).await.unwrap().status,
        DeploymentStatus::Failed
    );
}

#[tokio::test]
async fn test_encrypted_env_reaches_build() {
    let h = Harness::builder().cipher_secret("env-secret").build();
    let mut site = git_site("s1", "u1");
    let blob = EnvCipher::new(Some("env-secret"))
        .encrypt("API_KEY=abc\n# comment\nMODE=\"prod\"\n")
        .unwrap();
    assert!(blob.starts_with("enc:v1:"));
    site.env_text = Some(blob);
    h.store.put_site(site).await.unwrap();

    h.deploy_and_wait("s1", "u1").await;

    let envs = h.toolchain.envs.lock().unwrap().clone();
    assert_eq!(envs.len(), 1);
    assert!(envs[0].contains(&("API_KEY".to_string(), "abc".to_string())));
    assert!(envs[0].contains(&("MODE".to_string(), "prod".to_string())));
}

#[tokio::test]
async fn test_source_token_is_passed_to_fetcher() {
    let h = Harness::new();
    h.store.put_site(git_site("s1", "u1")).await.unwrap();
    h.store.put_source_token("u1", "ghp_token").await.unwrap();

    let (_, lines) = h.deploy_and_wait("s1", "u1").await;

    assert!(lines
        .iter()
        .any(|l| l == "Injecting source host authentication token..."));
    let fetched = h.fetcher.fetched.lock().unwrap().clone();
    assert_eq!(
        fetched,
        vec![("https://github.com/acme/s1.git".to_string(), "main".to_string(), true)]
    );
}

#[tokio::test]
async fn test_cleanup_site_purges_routing_and_storage() {
    let h = Harness::new();
    h.store.put_site(git_site("s1", "u1")).await.unwrap();
    let mut custom = CustomDomain::new("c1", "s1", "www.example.com");
    custom.status = DomainStatus::Active;
    h.store.create_custom_domain(&custom).await.unwrap();

    h.deploy_and_wait("s1", "u1").await;
    h.objects.insert("sites/s10/d9/index.html");
    assert!(h.edge.get("host:www.example.com").is_some());

    h.engine.cleanup_site("s1", "u1").await.unwrap();

    assert_eq!(h.objects.names(), vec!["sites/s10/d9/index.html".to_string()]);
    assert!(h.edge.get("host:s1").is_none());
    assert!(h.edge.get("current:s1").is_none());
    assert!(h.edge.get("host:www.example.com").is_none());
}

#[tokio::test]
async fn test_cleanup_reports_purge_failures() {
    let h = Harness::new();
    h.store.put_site(git_site("s1", "u1")).await.unwrap();
    h.objects.insert("sites/s1/d1/a.html");
    h.objects.insert("sites/s1/d1/b.html");
    h.objects.insert("sites/s1/d1/c.html");
    h.objects
        .fail_delete
        .lock()
        .unwrap()
        .insert("sites/s1/d1/b.html".to_string());

    let err = h.engine.cleanup_site("s1", "u1").await.unwrap_err();
    match err {
        EngineError::Purge { failed, first } => {
            assert_eq!(failed, 1);
            assert!(first.contains("sites/s1/d1/b.html"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(h.objects.names(), vec!["sites/s1/d1/b.html".to_string()]);
}

#[tokio::test]
async fn test_delete_site_survives_purge_failure() {
    let h = Harness::new();
    h.store.put_site(git_site("s1", "u1")).await.unwrap();
    h.deploy_and_wait("s1", "u1").await;
    h.objects.insert("sites/s1/d1/stale.html");
    h.objects
        .fail_delete
        .lock()
        .unwrap()
        .insert("sites/s1/d1/stale.html".to_string());

    let purge = h.engine.delete_site("s1", "u1").await.unwrap();

    assert!(matches!(purge, Some(EngineError::Purge { failed: 1, .. })));
    assert!(matches!(
        h.store.get_site("s1", "u1").await,
        Err(EngineError::NotFound(_))
    ));
    assert!(h.store.list_deployments("s1").await.unwrap().is_empty());
    assert!(h.edge.get("current:s1").is_none());
}

#[tokio::test]
async fn test_delete_site_requires_owner() {
    let h = Harness::new();
    h.store.put_site(git_site("s1", "u1")).await.unwrap();

    assert!(matches!(
        h.engine.delete_site("s1", "u2").await,
        Err(EngineError::Forbidden(_))
    ));
    assert!(h.store.get_site("s1", "u1").await.is_ok());
}

#[tokio::test]
async fn test_read_logs_checks_owner() {
    let h = Harness::new();
    h.store.put_site(git_site("s1", "u1")).await.unwrap();
    let (deployment, _) = h.deploy_and_wait("s1", "u1").await;

    assert!(matches!(
        h.engine.read_logs(&deployment.id, "u2").await,
        Err(EngineError::Forbidden(_))
    ));
    assert!(matches!(
        h.engine.read_logs("missing", "u1").await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_shutdown_cancels_running_pipelines() {
    let h = Harness::builder().toolchain(GatedToolchain::gated()).build();
    h.store.put_site(git_site("s1", "u1")).await.unwrap();

    let deployment = h.engine.deploy("s1", "u1", None).await.unwrap();
    h.toolchain.started.notified().await;

    let engine = h.engine.clone();
    let shutdown = tokio::spawn(async move { engine.shutdown().await });
    tokio::task::yield_now().await;
    h.toolchain.release();
    shutdown.await.unwrap();

    assert_eq!(
        h.store.get_deployment(&deployment.id).await.unwrap().status,
        DeploymentStatus::Canceled
    );
    assert!(matches!(
        h.engine.deploy("s1", "u1", None).await,
        Err(EngineError::Internal(_))
    ));
}
