//! Edge routing: serving-time KV plus the CDN custom-hostname lifecycle

pub mod client;
pub mod dns;
pub mod hostnames;
pub mod kv;

pub use client::{EdgeClient, EdgeOptions};

use async_trait::async_trait;

use crate::errors::EngineError;
use crate::models::domain::{DomainStatus, VerificationRecord};

/// Provider-side view of a custom hostname
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostnameState {
    pub id: String,

    /// Raw hostname status
    pub status: String,

    /// Raw SSL status
    pub ssl_status: String,

    pub records: Vec<VerificationRecord>,
}

impl HostnameState {
    pub fn combined_status(&self) -> DomainStatus {
        DomainStatus::derive(&self.status, &self.ssl_status)
    }
}

/// Edge routing trait for testability
#[async_trait]
pub trait EdgeRouting: Send + Sync {
    /// Upsert `host:<label>` and `current:<site>`; empty arguments skip their key
    async fn ensure_routing(&self, label: &str, site_id: &str, deployment_id: &str) -> Result<(), EngineError>;

    /// Delete `host:<hostname>`, `host:<label>` and `current:<site>`; empty arguments skip their key
    async fn remove_routing(&self, label: &str, site_id: &str, hostname: &str) -> Result<(), EngineError>;

    async fn create_custom_hostname(&self, hostname: &str) -> Result<HostnameState, EngineError>;

    async fn get_custom_hostname(&self, id: &str) -> Result<HostnameState, EngineError>;

    /// Look a hostname up by name
    async fn find_custom_hostname(&self, hostname: &str) -> Result<Option<HostnameState>, EngineError>;

    async fn delete_custom_hostname(&self, id: &str) -> Result<(), EngineError>;

    /// Make sure `origin` resolves to the serving edge and is the zone's fallback origin
    async fn ensure_fallback_origin(&self, origin: &str) -> Result<(), EngineError>;
}
