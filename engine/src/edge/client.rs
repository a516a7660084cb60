//! CDN control plane client

use std::time::Duration;

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::info;

use crate::edge::{EdgeRouting, HostnameState};
use crate::errors::{ApiError, EngineError};
use crate::http::client::HttpClient;

/// Characters escaped in KV keys and query values
pub(crate) const URL_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

pub(crate) fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, URL_COMPONENT).to_string()
}

pub const DEFAULT_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Edge client options
#[derive(Debug)]
pub struct EdgeOptions {
    pub api_base: String,
    pub api_token: SecretString,
    pub account_id: String,
    pub kv_namespace_id: String,

    /// Zone id; resolved from `root_domain` when absent
    pub zone_id: Option<String>,
    pub root_domain: String,
    pub timeout: Duration,
}

impl EdgeOptions {
    pub fn new(api_token: SecretString, account_id: impl Into<String>, kv_namespace_id: impl Into<String>) -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            api_token,
            account_id: account_id.into(),
            kv_namespace_id: kv_namespace_id.into(),
            zone_id: None,
            root_domain: String::new(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Standard response envelope of the control plane
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub errors: Vec<EnvelopeMessage>,
    pub result: Option<T>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EnvelopeMessage {
    #[serde(default)]
    pub message: String,
}

impl<T> Envelope<T> {
    /// Unwrap `result`, turning `success: false` into an error
    pub fn into_result(self, op: &str) -> Result<T, EngineError> {
        if !self.success {
            let message = self
                .errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(EngineError::Edge(ApiError::new(op, None, message)));
        }
        self.result
            .ok_or_else(|| EngineError::Edge(ApiError::new(op, None, "response has no result")))
    }
}

#[derive(Debug, Deserialize)]
struct Zone {
    id: String,
}

/// Client for the KV routing surface and the CDN zone API
pub struct EdgeClient {
    pub(crate) http: HttpClient,
    pub(crate) options: EdgeOptions,
    zone: OnceCell<String>,
}

impl EdgeClient {
    pub fn new(options: EdgeOptions) -> Result<Self, EngineError> {
        let http = HttpClient::new(
            &options.api_base,
            SecretString::from(options.api_token.expose_secret()),
            options.timeout,
        )
        .map_err(EngineError::Edge)?;
        let zone = match &options.zone_id {
            Some(id) => OnceCell::new_with(Some(id.clone())),
            None => OnceCell::new(),
        };
        Ok(Self { http, options, zone })
    }

    /// Zone of the root domain, looked up once
    pub async fn zone_id(&self) -> Result<&str, EngineError> {
        let id = self
            .zone
            .get_or_try_init(|| async {
                const OP: &str = "zone_lookup";
                let path = format!("/zones?name={}", encode_component(&self.options.root_domain));
                let envelope: Envelope<Vec<Zone>> = self.http.get(OP, &path).await.map_err(EngineError::Edge)?;
                let zone = envelope
                    .into_result(OP)?
                    .into_iter()
                    .next()
                    .ok_or_else(|| {
                        EngineError::Edge(ApiError::new(OP, None, format!("zone not found: {}", self.options.root_domain)))
                    })?;
                info!("Resolved zone {} for {}", zone.id, self.options.root_domain);
                Ok::<String, EngineError>(zone.id)
            })
            .await?;
        Ok(id.as_str())
    }
}

#[async_trait]
impl EdgeRouting for EdgeClient {
    async fn ensure_routing(&self, label: &str, site_id: &str, deployment_id: &str) -> Result<(), EngineError> {
        if !label.is_empty() {
            self.kv_put(&format!("host:{}", label), site_id).await?;
        }
        if !deployment_id.is_empty() {
            self.kv_put(&format!("current:{}", site_id), deployment_id).await?;
        }
        Ok(())
    }

    async fn remove_routing(&self, label: &str, site_id: &str, hostname: &str) -> Result<(), EngineError> {
        if !hostname.is_empty() {
            self.kv_delete(&format!("host:{}", hostname)).await?;
        }
        if !label.is_empty() {
            self.kv_delete(&format!("host:{}", label)).await?;
        }
        if !site_id.is_empty() {
            self.kv_delete(&format!("current:{}", site_id)).await?;
        }
        Ok(())
    }

    async fn create_custom_hostname(&self, hostname: &str) -> Result<HostnameState, EngineError> {
        EdgeClient::create_custom_hostname(self, hostname).await
    }

    async fn get_custom_hostname(&self, id: &str) -> Result<HostnameState, EngineError> {
        EdgeClient::get_custom_hostname(self, id).await
    }

    async fn find_custom_hostname(&self, hostname: &str) -> Result<Option<HostnameState>, EngineError> {
        EdgeClient::find_custom_hostname(self, hostname).await
    }

    async fn delete_custom_hostname(&self, id: &str) -> Result<(), EngineError> {
        EdgeClient::delete_custom_hostname(self, id).await
    }

    async fn ensure_fallback_origin(&self, origin: &str) -> Result<(), EngineError> {
        EdgeClient::ensure_fallback_origin(self, origin).await
    }
}
