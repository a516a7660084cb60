//! Source host webhooks: push-triggered redeploys and app installations

use std::sync::Arc;

use chrono::Utc;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{info, warn};

use crate::deploy::Engine;
use crate::errors::EngineError;
use crate::models::site::Site;
use crate::store::{Installation, RecordStore};
use crate::utils::generate_id;

const SIGNATURE_PREFIX: &str = "sha256=";

#[derive(Debug, Deserialize)]
struct PushEvent {
    #[serde(default, rename = "ref")]
    reference: String,
    #[serde(default)]
    repository: Option<Repository>,
}

#[derive(Debug, Deserialize)]
struct Repository {
    #[serde(default)]
    clone_url: String,
}

#[derive(Debug, Deserialize)]
struct InstallationEvent {
    #[serde(default)]
    action: String,
    #[serde(default)]
    installation: Option<InstallationPayload>,
}

#[derive(Debug, Deserialize)]
struct InstallationPayload {
    id: u64,
    #[serde(default)]
    account: Option<Account>,
}

#[derive(Debug, Default, Deserialize)]
struct Account {
    #[serde(default)]
    login: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

/// What a delivery resulted in
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Event type or payload not acted on
    Ignored(&'static str),

    /// Push matched `matched` sites, `deployed` of which started a deployment
    Push { matched: usize, deployed: usize },

    /// Installation recorded or removed
    Installation { action: String, installation_id: String },
}

/// Handles webhook deliveries from the source host
pub struct WebhookHandler {
    engine: Engine,
    store: Arc<dyn RecordStore>,
    secret: Option<SecretString>,
}

impl WebhookHandler {
    /// Without a secret signatures are not checked
    pub fn new(engine: Engine, store: Arc<dyn RecordStore>, secret: Option<SecretString>) -> Self {
        let secret = secret.filter(|s| !s.expose_secret().is_empty());
        Self { engine, store, secret }
    }

    /// Verify and dispatch one delivery
    pub async fn handle(
        &self,
        event_type: &str,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, EngineError> {
        if let Some(secret) = &self.secret {
            let valid = signature
                .map(|sig| verify_signature(payload, sig, secret.expose_secret()))
                .unwrap_or(false);
            if !valid {
                return Err(EngineError::Forbidden("invalid-signature".to_string()));
            }
        }

        match event_type {
            "push" => {
                let event: PushEvent = parse(payload)?;
                self.handle_push(event).await
            }
            "installation" => {
                let event: InstallationEvent = parse(payload)?;
                self.handle_installation(event).await
            }
            _ => Ok(WebhookOutcome::Ignored("event")),
        }
    }

    async fn handle_push(&self, event: PushEvent) -> Result<WebhookOutcome, EngineError> {
        let Some(repository) = event.repository else {
            return Ok(WebhookOutcome::Ignored("no-repo"));
        };
        let branch = event
            .reference
            .strip_prefix("refs/heads/")
            .unwrap_or(&event.reference);
        if repository.clone_url.is_empty() || branch.is_empty() {
            return Ok(WebhookOutcome::Ignored("no-url-or-branch"));
        }

        let sites = self.store.list_git_sites().await?;
        let matching: Vec<&Site> = sites
            .iter()
            .filter(|site| site.branch() == branch)
            .filter(|site| site.repo_url().is_some_and(|url| repo_matches(url, &repository.clone_url)))
            .collect();

        let mut deployed = 0;
        for site in &matching {
            info!("Push to {} ({}), deploying site {}", repository.clone_url, branch, site.id);
            match self.engine.deploy(&site.id, &site.owner_id, None).await {
                Ok(_) => deployed += 1,
                Err(e) => warn!("Webhook deploy failed for {}: {}", site.id, e),
            }
        }

        Ok(WebhookOutcome::Push {
            matched: matching.len(),
            deployed,
        })
    }

    async fn handle_installation(&self, event: InstallationEvent) -> Result<WebhookOutcome, EngineError> {
        let Some(payload) = event.installation else {
            return Ok(WebhookOutcome::Ignored("no-installation"));
        };
        let installation_id = payload.id.to_string();

        match event.action.as_str() {
            "created" => {
                let account = payload.account.unwrap_or_default();
                let installation = Installation {
                    id: generate_id(),
                    installation_id: installation_id.clone(),
                    account_login: account.login,
                    account_type: account.kind,
                    owner_id: None,
                    created_at: Utc::now(),
                };
                self.store.add_installation(&installation).await?;
                info!("Recorded installation {}", installation_id);
            }
            "deleted" => {
                self.store.remove_installation(&installation_id).await?;
                info!("Removed installation {}", installation_id);
            }
            _ => return Ok(WebhookOutcome::Ignored("action")),
        }

        Ok(WebhookOutcome::Installation {
            action: event.action,
            installation_id,
        })
    }
}

fn parse<'a, T: Deserialize<'a>>(payload: &'a [u8]) -> Result<T, EngineError> {
    serde_json::from_slice(payload).map_err(|e| EngineError::Validation(format!("invalid-json: {}", e)))
}

/// Check a `sha256=<hex>` HMAC signature of the payload
pub fn verify_signature(payload: &[u8], signature: &str, secret: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    let Some(expected) = signature
        .strip_prefix(SIGNATURE_PREFIX)
        .and_then(|h| hex::decode(h).ok())
    else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

/// Signature header value for a payload
pub fn sign_payload(payload: &[u8], secret: &str) -> Result<String, EngineError> {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|e| EngineError::Crypto(e.to_string()))?;
    mac.update(payload);
    Ok(format!("{}{}", SIGNATURE_PREFIX, hex::encode(mac.finalize().into_bytes())))
}

/// Case- and `.git`-insensitive match where either URL may be a suffix of the other
pub fn repo_matches(site_url: &str, event_url: &str) -> bool {
    let clean = |u: &str| {
        let lower = u.trim().to_lowercase();
        lower.strip_suffix(".git").map(str::to_string).unwrap_or(lower)
    };
    let site = clean(site_url);
    let event = clean(event_url);
    if site.is_empty() || event.is_empty() {
        return false;
    }
    site == event || event.ends_with(&site) || site.ends_with(&event)
}
