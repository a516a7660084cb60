//! Application state management

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tracing::{info, warn};

use crate::app::options::AppOptions;
use crate::deploy::build::BuildDriver;
use crate::deploy::domains::DomainManager;
use crate::deploy::envtext::EnvCipher;
use crate::deploy::git::GitCli;
use crate::deploy::logger::LogSink;
use crate::deploy::{Engine, EngineOptions, EngineParts};
use crate::edge::{EdgeClient, EdgeOptions};
use crate::errors::EngineError;
use crate::http::github::GitHubClient;
use crate::models::deployment::Deployment;
use crate::objstore::{B2Client, B2Options};
use crate::ratelimit::RateLimiter;
use crate::store::{LocalStore, RecordStore};
use crate::webhooks::WebhookHandler;

/// Main application state
pub struct AppState {
    pub store: Arc<LocalStore>,
    pub engine: Engine,
    pub domains: DomainManager,
    pub webhooks: WebhookHandler,

    /// Deploy triggers per owner
    pub limiter: RateLimiter,
}

impl AppState {
    /// Wire the engine and its collaborators from settings
    pub async fn init(options: &AppOptions) -> Result<Self, EngineError> {
        info!("Initializing application state...");
        let settings = &options.settings;
        options.layout.setup().await?;

        let store = Arc::new(LocalStore::open(options.layout.records_file()).await?);
        let records: Arc<dyn RecordStore> = store.clone();

        let storage = &settings.object_storage;
        if storage.key_id.is_empty() || storage.bucket_id.is_empty() {
            warn!("Object storage credentials are not configured");
        }
        let mut b2 = B2Options::new(
            &storage.key_id,
            SecretString::from(storage.app_key.as_str()),
            &storage.bucket_id,
        );
        if let Some(url) = &storage.auth_url {
            b2.auth_url = url.clone();
        }

        let edge_settings = &settings.edge;
        if edge_settings.api_token.is_empty() {
            warn!("Edge API token is not configured");
        }
        let mut edge = EdgeOptions::new(
            SecretString::from(edge_settings.api_token.as_str()),
            &edge_settings.account_id,
            &edge_settings.kv_namespace_id,
        );
        edge.root_domain = settings.root_domain.clone();
        edge.zone_id = edge_settings.zone_id.clone();
        if let Some(base) = &edge_settings.api_base {
            edge.api_base = base.clone();
        }
        let edge = Arc::new(EdgeClient::new(edge)?);

        let parts = EngineParts {
            store: records.clone(),
            objects: Arc::new(B2Client::new(b2)?),
            edge: edge.clone(),
            fetcher: Arc::new(GitCli::new()),
            toolchain: Arc::new(BuildDriver::new()),
            commits: Arc::new(GitHubClient::new(settings.source_host.api_base.as_deref())?),
            cipher: EnvCipher::new(settings.env_encryption_secret.as_deref()),
            layout: options.layout.clone(),
        };
        let engine = Engine::new(
            parts,
            EngineOptions {
                root_domain: settings.root_domain.clone(),
                upload_concurrency: settings.upload_concurrency,
            },
        );

        let domains = DomainManager::new(records.clone(), edge, &settings.root_domain);
        let webhooks = WebhookHandler::new(
            engine.clone(),
            records,
            settings.source_host.webhook_secret.as_deref().map(SecretString::from),
        );
        let limiter = RateLimiter::new(
            settings.rate_limit.max,
            Duration::from_millis(settings.rate_limit.window_ms),
        )?;

        Ok(Self {
            store,
            engine,
            domains,
            webhooks,
            limiter,
        })
    }

    /// Rate-limited deploy trigger
    pub async fn trigger_deploy(
        &self,
        site_id: &str,
        owner_id: &str,
        sink: Option<LogSink>,
    ) -> Result<Deployment, EngineError> {
        self.limiter.check(owner_id)?;
        self.engine.deploy(site_id, owner_id, sink).await
    }

    /// Shutdown application state
    pub async fn shutdown(&self) {
        info!("Shutting down application state...");
        self.engine.shutdown().await;
    }
}
