//! Deployment engine: one background pipeline per deployment

use std::sync::Arc;

use secrecy::SecretString;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::deploy::build::{resolve_build_root, validate_build_command, BuildRequest, Toolchain};
use crate::deploy::envtext::{parse_env_text, EnvCipher};
use crate::deploy::fsm::{DeploymentEvent, DeploymentFsm, DeploymentStatus};
use crate::deploy::git::{CloneRequest, SourceFetcher};
use crate::deploy::logger::{DeployLogger, LogSink};
use crate::deploy::registry::CancellationRegistry;
use crate::deploy::upload::{deployment_prefix, list_output_files, site_prefix, upload_files, UPLOAD_CONCURRENCY};
use crate::edge::EdgeRouting;
use crate::errors::EngineError;
use crate::http::github::CommitLookup;
use crate::models::deployment::Deployment;
use crate::models::domain::{CustomDomain, DomainStatus};
use crate::models::site::Site;
use crate::objstore::ObjectStore;
use crate::storage::layout::StorageLayout;
use crate::store::RecordStore;
use crate::utils::{generate_id, normalize_hostname};

/// Engine tunables
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Platform root domain, e.g. `boop.cat`
    pub root_domain: String,

    pub upload_concurrency: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            root_domain: "boop.cat".to_string(),
            upload_concurrency: UPLOAD_CONCURRENCY,
        }
    }
}

/// Collaborators the engine drives
pub struct EngineParts {
    pub store: Arc<dyn RecordStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub edge: Arc<dyn EdgeRouting>,
    pub fetcher: Arc<dyn SourceFetcher>,
    pub toolchain: Arc<dyn Toolchain>,
    pub commits: Arc<dyn CommitLookup>,
    pub cipher: EnvCipher,
    pub layout: StorageLayout,
}

struct EngineInner {
    parts: EngineParts,
    options: EngineOptions,
    registry: CancellationRegistry,
    tasks: TaskTracker,
}

/// Deployment engine
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn new(parts: EngineParts, options: EngineOptions) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                parts,
                options,
                registry: CancellationRegistry::new(),
                tasks: TaskTracker::new(),
            }),
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.inner.options
    }

    /// True while the deployment's pipeline runs in this process
    pub fn is_running(&self, deployment_id: &str) -> bool {
        self.inner.registry.contains(deployment_id)
    }

    /// Create a `building` deployment and start its pipeline in the background.
    ///
    /// With a sink every pipeline line is also pushed to it; the sink is closed
    /// once the pipeline has ended.
    pub async fn deploy(
        &self,
        site_id: &str,
        owner_id: &str,
        sink: Option<LogSink>,
    ) -> Result<Deployment, EngineError> {
        let inner = &self.inner;
        if inner.tasks.is_closed() {
            return Err(EngineError::Internal("engine is shutting down".to_string()));
        }

        let site = inner.parts.store.get_site(site_id, owner_id).await?;
        let Some(repo_url) = site.repo_url() else {
            return Err(EngineError::Validation("site has no git url".to_string()));
        };
        if let Some(command) = site.build_command.as_deref() {
            validate_build_command(command)
                .map_err(|e| EngineError::Validation(format!("invalid build command: {}", e)))?;
        }

        let token = match inner.parts.store.source_token(owner_id).await {
            Ok(token) => token,
            Err(e) => {
                warn!("Failed to read source token for {}: {}", owner_id, e);
                None
            }
        };

        let mut deployment = Deployment::building(generate_id(), &site.id, owner_id);
        if let Some(commit) = inner.parts.commits.lookup(repo_url, site.branch(), token.as_ref()).await {
            deployment.commit = commit;
        }
        let log_file = inner.parts.layout.deployment_log(&deployment.id);
        deployment.log_path = Some(log_file.path().to_path_buf());
        inner.parts.store.create_deployment(&deployment).await?;

        info!("Created deployment {} for site {}", deployment.id, site.id);

        let cancel = inner.registry.register(&deployment.id);
        if let Err(e) = inner.parts.layout.logs_dir().create().await {
            warn!("Failed to create logs directory: {}", e);
        }
        let logger = DeployLogger::new(&deployment.id, Some(log_file), sink);

        let engine = self.clone();
        let record = deployment.clone();
        inner.tasks.spawn(async move {
            engine.run(site, record, token, cancel, logger).await;
        });

        Ok(deployment)
    }

    /// Signal the cancellation token of a deployment still running in this process
    pub fn cancel(&self, deployment_id: &str) -> Result<(), EngineError> {
        if self.inner.registry.cancel(deployment_id) {
            info!("Cancel requested for deployment {}", deployment_id);
            Ok(())
        } else {
            Err(EngineError::NotRunning(deployment_id.to_string()))
        }
    }

    /// Take a deployment offline.
    ///
    /// A running pipeline is canceled. A live deployment has its routing
    /// removed and becomes `stopped`; an orphaned `building` one becomes `canceled`.
    pub async fn stop(&self, deployment_id: &str, owner_id: &str) -> Result<DeploymentStatus, EngineError> {
        let store = &self.inner.parts.store;
        let deployment = store.get_deployment(deployment_id).await?;
        if deployment.owner_id != owner_id {
            return Err(EngineError::Forbidden(format!("deployment {}", deployment_id)));
        }

        if self.cancel(deployment_id).is_ok() {
            return Ok(DeploymentStatus::Canceled);
        }

        let mut fsm = DeploymentFsm::from_state(deployment.status);
        let event = match deployment.status {
            DeploymentStatus::Running => DeploymentEvent::Stop,
            DeploymentStatus::Building => DeploymentEvent::Cancel,
            _ => return Err(EngineError::NotRunning(deployment_id.to_string())),
        };
        let status = fsm.process(event).map_err(EngineError::Internal)?;

        if status == DeploymentStatus::Stopped {
            let site = store.get_site(&deployment.site_id, owner_id).await?;
            let domains = self.custom_domains(&site).await;
            self.remove_site_routing(&site, &domains).await;
        }

        store.update_deployment_status(deployment_id, status, None).await?;
        info!("Deployment {} is now {}", deployment_id, status);
        Ok(status)
    }

    /// Remove every routing entry and stored artifact of a site.
    ///
    /// Routing removal is best-effort; purge failures are collected and reported
    /// after the purge has gone through every object.
    pub async fn cleanup_site(&self, site_id: &str, owner_id: &str) -> Result<(), EngineError> {
        let parts = &self.inner.parts;
        match parts.store.get_site(site_id, owner_id).await {
            Ok(site) => {
                let domains = self.custom_domains(&site).await;
                self.remove_site_routing(&site, &domains).await;
            }
            Err(EngineError::NotFound(_)) => {
                warn!("Site {} not found, purging storage only", site_id);
            }
            Err(e) => return Err(e),
        }

        let report = parts
            .objects
            .delete_all_with_prefix(&site_prefix(site_id))
            .await
            .map_err(|e| EngineError::Purge {
                failed: 0,
                first: e.to_string(),
            })?;

        match report.failures.first() {
            Some((name, err)) => Err(EngineError::Purge {
                failed: report.failures.len(),
                first: format!("{}: {}", name, err),
            }),
            None => Ok(()),
        }
    }

    /// Tear a site down and delete its records.
    ///
    /// A failed purge does not keep the records; it is logged and returned
    /// as `Ok(Some(_))` once the site is gone.
    pub async fn delete_site(&self, site_id: &str, owner_id: &str) -> Result<Option<EngineError>, EngineError> {
        let purge_error = match self.cleanup_site(site_id, owner_id).await {
            Ok(()) => None,
            Err(e @ EngineError::Purge { .. }) => {
                warn!("Cleanup of site {} incomplete: {}", site_id, e);
                Some(e)
            }
            Err(e) => return Err(e),
        };

        self.inner.parts.store.delete_site(site_id, owner_id).await?;
        info!("Site {} deleted", site_id);
        Ok(purge_error)
    }

    /// Persisted log of a deployment
    pub async fn read_logs(&self, deployment_id: &str, owner_id: &str) -> Result<String, EngineError> {
        let deployment = self.inner.parts.store.get_deployment(deployment_id).await?;
        if deployment.owner_id != owner_id {
            return Err(EngineError::Forbidden(format!("deployment {}", deployment_id)));
        }
        let Some(path) = deployment.log_path else {
            return Err(EngineError::NotFound(format!("logs for deployment {}", deployment_id)));
        };
        let file = crate::filesys::file::File::new(path);
        if !file.exists().await {
            return Err(EngineError::NotFound(format!("logs for deployment {}", deployment_id)));
        }
        file.read_string().await
    }

    /// Stop accepting deployments and wait for running pipelines to finish
    pub async fn drain(&self) {
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
    }

    /// Cancel every running pipeline and wait for all of them to end
    pub async fn shutdown(&self) {
        let canceled = self.inner.registry.cancel_all();
        info!("Shutting down engine, {} pipeline(s) canceled", canceled);
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
    }

    async fn run(
        &self,
        site: Site,
        deployment: Deployment,
        token: Option<SecretString>,
        cancel: CancellationToken,
        logger: DeployLogger,
    ) {
        let inner = &self.inner;
        let mut fsm = DeploymentFsm::new();

        let result = self.pipeline(&site, &deployment, token.as_ref(), &cancel, &logger, &mut fsm).await;

        if let Err(e) = result {
            logger.log(format!("Deployment failed: {}", e)).await;
            let event = if cancel.is_cancelled() || e.is_canceled() {
                DeploymentEvent::Cancel
            } else {
                DeploymentEvent::Fail(e.to_string())
            };
            match fsm.process(event) {
                Ok(status) => {
                    if let Err(e) = inner
                        .parts
                        .store
                        .update_deployment_status(&deployment.id, status, None)
                        .await
                    {
                        error!("Failed to record status of {}: {}", deployment.id, e);
                    }
                }
                Err(e) => warn!("Deployment {}: {}", deployment.id, e),
            }
        }

        inner.registry.remove(&deployment.id);
        let scratch = inner.parts.layout.scratch_dir(&deployment.id);
        if let Err(e) = scratch.delete().await {
            warn!("Failed to remove scratch dir {}: {}", scratch.path().display(), e);
        }
        logger.close().await;
    }

    async fn pipeline(
        &self,
        site: &Site,
        deployment: &Deployment,
        token: Option<&SecretString>,
        cancel: &CancellationToken,
        logger: &DeployLogger,
        fsm: &mut DeploymentFsm,
    ) -> Result<(), EngineError> {
        let parts = &self.inner.parts;
        let options = &self.inner.options;

        logger
            .log(format!("Starting deployment for site {} ({})", site.name, site.id))
            .await;
        checkpoint(cancel)?;

        let scratch = parts.layout.scratch_dir(&deployment.id);
        logger.log("Cloning repository...").await;
        let repo_url = site
            .repo_url()
            .ok_or_else(|| EngineError::Validation("site has no git url".to_string()))?;
        match token {
            Some(_) => logger.log("Injecting source host authentication token...").await,
            None => logger.log("No GitHub token found for user. Private repos may fail.").await,
        }
        let request = CloneRequest {
            url: repo_url,
            branch: site.branch(),
            token,
            target: scratch.path(),
        };
        parts.fetcher.fetch(&request, logger).await?;
        checkpoint(cancel)?;

        match parts.fetcher.head_commit(scratch.path()).await {
            Ok(mut head) => {
                head.merge_missing(&deployment.commit);
                if let Err(e) = parts.store.update_deployment_commit(&deployment.id, &head).await {
                    warn!("Failed to record commit of {}: {}", deployment.id, e);
                }
            }
            Err(e) => debug!("Could not read HEAD of {}: {}", deployment.id, e),
        }

        logger.log("Building project...").await;
        let env = match site.env_text.as_deref().filter(|t| !t.trim().is_empty()) {
            Some(blob) => parse_env_text(&parts.cipher.decrypt(blob)?),
            None => Vec::new(),
        };
        let root = resolve_build_root(scratch.path(), site.git_subdir.as_deref())?;
        let build = BuildRequest {
            root: &root,
            env: &env,
            command: site.build_command.as_deref(),
            output_dir: site.output_dir.as_deref(),
        };
        let output = parts.toolchain.build(&build, logger).await?;
        checkpoint(cancel)?;

        logger.log("Build complete. Starting upload...").await;
        self.advance(fsm, &deployment.id, DeploymentEvent::BuildSucceeded, None)
            .await?;

        logger.log("Uploading to storage...").await;
        let files = list_output_files(&output).await?;
        logger.log(format!("Found {} files to upload", files.len())).await;
        upload_files(
            parts.objects.as_ref(),
            files,
            &deployment_prefix(&site.id, &deployment.id),
            options.upload_concurrency,
            cancel,
        )
        .await?;
        logger.log("Upload complete").await;
        checkpoint(cancel)?;

        logger.log("Updating routing...").await;
        let domains = self.publish_routing(site, &deployment.id, logger).await?;

        let url = final_url(site.domain.as_deref(), &domains, &options.root_domain);
        self.advance(fsm, &deployment.id, DeploymentEvent::Published, url.as_deref())
            .await?;
        parts
            .store
            .set_site_current_deployment(&site.id, &deployment.id)
            .await?;

        if let Err(e) = self.stop_other_deployments(&site.id, &deployment.id).await {
            logger
                .log(format!("Warning: Failed to stop other deployments: {}", e))
                .await;
        }

        logger.log("Deployment successful!").await;
        Ok(())
    }

    /// Point the site's labels at this deployment
    async fn publish_routing(
        &self,
        site: &Site,
        deployment_id: &str,
        logger: &DeployLogger,
    ) -> Result<Vec<CustomDomain>, EngineError> {
        let edge = &self.inner.parts.edge;
        let domain = site.domain.as_deref().map(str::trim).filter(|d| !d.is_empty());

        if let Some(domain) = domain {
            let label = routing_label(domain, &self.inner.options.root_domain);
            edge.ensure_routing(&label, &site.id, deployment_id)
                .await
                .map_err(|e| EngineError::Routing(Box::new(e)))?;
        }

        let domains = self.custom_domains(site).await;
        for custom in &domains {
            let hostname = normalize_hostname(&custom.hostname);
            logger
                .log(format!("Updating routing for custom domain: {}", hostname))
                .await;
            if let Err(e) = edge.ensure_routing(&hostname, &site.id, deployment_id).await {
                logger
                    .log(format!("Failed to update routing for {}: {}", hostname, e))
                    .await;
            }
        }

        if domain.is_none() && domains.is_empty() {
            edge.ensure_routing("", &site.id, deployment_id)
                .await
                .map_err(|e| EngineError::Routing(Box::new(e)))?;
        }

        Ok(domains)
    }

    async fn stop_other_deployments(&self, site_id: &str, deployment_id: &str) -> Result<(), EngineError> {
        let store = &self.inner.parts.store;
        let others = store
            .list_other_deployments(site_id, deployment_id, DeploymentStatus::Running)
            .await?;
        for other in others {
            let status = DeploymentFsm::from_state(other.status)
                .process(DeploymentEvent::Superseded)
                .map_err(EngineError::Internal)?;
            store.update_deployment_status(&other.id, status, None).await?;
            debug!("Deployment {} superseded by {}", other.id, deployment_id);
        }
        Ok(())
    }

    async fn remove_site_routing(&self, site: &Site, domains: &[CustomDomain]) {
        let edge = &self.inner.parts.edge;
        let domain = site.domain.as_deref().map(str::trim).unwrap_or("");
        let label = if domain.is_empty() {
            String::new()
        } else {
            routing_label(domain, &self.inner.options.root_domain)
        };

        if let Err(e) = edge.remove_routing(&label, &site.id, domain).await {
            warn!("Failed to remove routing for site {}: {}", site.id, e);
        }
        for custom in domains {
            let hostname = normalize_hostname(&custom.hostname);
            if let Err(e) = edge.remove_routing("", "", &hostname).await {
                warn!("Failed to remove routing for {}: {}", hostname, e);
            }
        }
    }

    async fn custom_domains(&self, site: &Site) -> Vec<CustomDomain> {
        match self.inner.parts.store.list_custom_domains(&site.id).await {
            Ok(domains) => domains,
            Err(e) => {
                warn!("Failed to list custom domains of {}: {}", site.id, e);
                Vec::new()
            }
        }
    }

    async fn advance(
        &self,
        fsm: &mut DeploymentFsm,
        deployment_id: &str,
        event: DeploymentEvent,
        url: Option<&str>,
    ) -> Result<DeploymentStatus, EngineError> {
        let status = fsm.process(event).map_err(EngineError::Internal)?;
        self.inner
            .parts
            .store
            .update_deployment_status(deployment_id, status, url)
            .await?;
        Ok(status)
    }
}

fn checkpoint(cancel: &CancellationToken) -> Result<(), EngineError> {
    if cancel.is_cancelled() {
        Err(EngineError::Canceled)
    } else {
        Ok(())
    }
}

/// KV label a primary domain routes under: the subdomain of `root`, `@` for `root` itself
pub fn routing_label(domain: &str, root: &str) -> String {
    if root.is_empty() {
        return domain.to_string();
    }
    if domain == root {
        return "@".to_string();
    }
    match domain.strip_suffix(root).and_then(|d| d.strip_suffix('.')) {
        Some(label) if !label.is_empty() => label.to_string(),
        _ => domain.to_string(),
    }
}

/// Public URL of a published deployment
pub fn final_url(domain: Option<&str>, custom: &[CustomDomain], root: &str) -> Option<String> {
    if let Some(active) = custom.iter().find(|d| d.status == DomainStatus::Active) {
        return Some(format!("https://{}", normalize_hostname(&active.hostname)));
    }

    let domain = domain.map(str::trim).filter(|d| !d.is_empty())?;
    let under_root = domain == root || domain.ends_with(&format!(".{}", root));
    if under_root || root.is_empty() {
        Some(format!("https://{}", domain))
    } else {
        Some(format!("https://{}.{}", domain, root))
    }
}
