//! Record store boundary: sites, deployments, custom domains and linked accounts

pub mod local;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::deploy::fsm::DeploymentStatus;
use crate::errors::EngineError;
use crate::models::deployment::{CommitMetadata, Deployment};
use crate::models::domain::CustomDomain;
use crate::models::site::Site;

pub use local::LocalStore;

/// A source-host app installation reported by webhook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Installation {
    pub id: String,
    pub installation_id: String,
    #[serde(default)]
    pub account_login: Option<String>,
    #[serde(default)]
    pub account_type: Option<String>,
    #[serde(default)]
    pub owner_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Record store trait consumed by the engine
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Site owned by `owner_id`; `NotFound` or `Forbidden` otherwise
    async fn get_site(&self, site_id: &str, owner_id: &str) -> Result<Site, EngineError>;

    /// Every site with a git URL configured
    async fn list_git_sites(&self) -> Result<Vec<Site>, EngineError>;

    async fn set_site_current_deployment(&self, site_id: &str, deployment_id: &str) -> Result<(), EngineError>;

    async fn update_site_env_text(&self, site_id: &str, env_text: Option<String>) -> Result<(), EngineError>;

    /// Delete a site along with its deployments and custom domains
    async fn delete_site(&self, site_id: &str, owner_id: &str) -> Result<(), EngineError>;

    async fn create_deployment(&self, deployment: &Deployment) -> Result<(), EngineError>;

    async fn get_deployment(&self, deployment_id: &str) -> Result<Deployment, EngineError>;

    /// Deployments of a site, newest first
    async fn list_deployments(&self, site_id: &str) -> Result<Vec<Deployment>, EngineError>;

    /// Deployments of a site in `status`, excluding `except_id`
    async fn list_other_deployments(
        &self,
        site_id: &str,
        except_id: &str,
        status: DeploymentStatus,
    ) -> Result<Vec<Deployment>, EngineError>;

    /// Change status and, when given, the public URL; terminal records are immutable
    async fn update_deployment_status(
        &self,
        deployment_id: &str,
        status: DeploymentStatus,
        url: Option<&str>,
    ) -> Result<(), EngineError>;

    async fn update_deployment_commit(&self, deployment_id: &str, commit: &CommitMetadata) -> Result<(), EngineError>;

    async fn create_custom_domain(&self, domain: &CustomDomain) -> Result<(), EngineError>;

    async fn get_custom_domain(&self, domain_id: &str) -> Result<CustomDomain, EngineError>;

    async fn list_custom_domains(&self, site_id: &str) -> Result<Vec<CustomDomain>, EngineError>;

    async fn update_custom_domain(&self, domain: &CustomDomain) -> Result<(), EngineError>;

    async fn delete_custom_domain(&self, domain_id: &str) -> Result<(), EngineError>;

    /// Custom domains across every site of an owner
    async fn count_custom_domains_for_owner(&self, owner_id: &str) -> Result<usize, EngineError>;

    /// Access token of the owner's linked source-host account
    async fn source_token(&self, owner_id: &str) -> Result<Option<SecretString>, EngineError>;

    /// Insert or refresh an installation, keyed by installation id
    async fn add_installation(&self, installation: &Installation) -> Result<(), EngineError>;

    async fn remove_installation(&self, installation_id: &str) -> Result<(), EngineError>;
}
