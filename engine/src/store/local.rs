//! Local record store, in memory with optional JSON file persistence

use std::collections::HashMap;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::deploy::fsm::DeploymentStatus;
use crate::errors::EngineError;
use crate::filesys::file::File;
use crate::models::deployment::{CommitMetadata, Deployment};
use crate::models::domain::CustomDomain;
use crate::models::site::Site;
use crate::store::{Installation, RecordStore};

/// Everything the store holds
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Records {
    #[serde(default)]
    pub sites: HashMap<String, Site>,
    #[serde(default)]
    pub deployments: HashMap<String, Deployment>,
    #[serde(default)]
    pub custom_domains: HashMap<String, CustomDomain>,
    /// Owner id -> source host access token
    #[serde(default)]
    pub source_tokens: HashMap<String, String>,
    /// Installation id -> installation
    #[serde(default)]
    pub installations: HashMap<String, Installation>,
}

impl Records {
    fn site_mut(&mut self, site_id: &str) -> Result<&mut Site, EngineError> {
        self.sites
            .get_mut(site_id)
            .ok_or_else(|| EngineError::NotFound(format!("site {}", site_id)))
    }

    fn deployment_mut(&mut self, deployment_id: &str) -> Result<&mut Deployment, EngineError> {
        self.deployments
            .get_mut(deployment_id)
            .ok_or_else(|| EngineError::NotFound(format!("deployment {}", deployment_id)))
    }
}

/// Record store backed by a map, flushed to a file after each write when opened from one
pub struct LocalStore {
    records: RwLock<Records>,
    file: Option<File>,
}

impl LocalStore {
    /// An empty store that never touches disk
    pub fn in_memory() -> Self {
        Self {
            records: RwLock::new(Records::default()),
            file: None,
        }
    }

    /// Load the store from a JSON file, starting empty if it does not exist
    pub async fn open(file: File) -> Result<Self, EngineError> {
        let records = if file.exists().await {
            file.read_json::<Records>().await?
        } else {
            Records::default()
        };
        info!(
            "Loaded {} site(s) and {} deployment(s) from {}",
            records.sites.len(),
            records.deployments.len(),
            file.path().display()
        );
        Ok(Self {
            records: RwLock::new(records),
            file: Some(file),
        })
    }

    /// Apply a mutation and persist the result
    async fn mutate<T>(&self, f: impl FnOnce(&mut Records) -> Result<T, EngineError> + Send) -> Result<T, EngineError> {
        let mut records = self.records.write().await;
        let out = f(&mut records)?;
        if let Some(file) = &self.file {
            debug!("Flushing records to {}", file.path().display());
            file.write_json(&*records).await?;
        }
        Ok(out)
    }

    /// Insert or replace a site
    pub async fn put_site(&self, site: Site) -> Result<(), EngineError> {
        self.mutate(|r| {
            r.sites.insert(site.id.clone(), site);
            Ok(())
        })
        .await
    }

    /// Link a source-host token to an owner
    pub async fn put_source_token(&self, owner_id: &str, token: &str) -> Result<(), EngineError> {
        self.mutate(|r| {
            r.source_tokens.insert(owner_id.to_string(), token.to_string());
            Ok(())
        })
        .await
    }

    /// Snapshot of every installation
    pub async fn installations(&self) -> Vec<Installation> {
        self.records.read().await.installations.values().cloned().collect()
    }
}

#[async_trait]
impl RecordStore for LocalStore {
    async fn get_site(&self, site_id: &str, owner_id: &str) -> Result<Site, EngineError> {
        let records = self.records.read().await;
        let site = records
            .sites
            .get(site_id)
            .ok_or_else(|| EngineError::NotFound(format!("site {}", site_id)))?;
        if site.owner_id != owner_id {
            return Err(EngineError::Forbidden(format!("site {}", site_id)));
        }
        Ok(site.clone())
    }

    async fn list_git_sites(&self) -> Result<Vec<Site>, EngineError> {
        let records = self.records.read().await;
        Ok(records
            .sites
            .values()
            .filter(|s| s.repo_url().is_some())
            .cloned()
            .collect())
    }

    async fn set_site_current_deployment(&self, site_id: &str, deployment_id: &str) -> Result<(), EngineError> {
        self.mutate(|r| {
            r.site_mut(site_id)?.current_deployment_id = Some(deployment_id.to_string());
            Ok(())
        })
        .await
    }

    async fn update_site_env_text(&self, site_id: &str, env_text: Option<String>) -> Result<(), EngineError> {
        self.mutate(|r| {
            r.site_mut(site_id)?.env_text = env_text;
            Ok(())
        })
        .await
    }

    async fn delete_site(&self, site_id: &str, owner_id: &str) -> Result<(), EngineError> {
        self.mutate(|r| {
            let site = r.site_mut(site_id)?;
            if site.owner_id != owner_id {
                return Err(EngineError::Forbidden(format!("site {}", site_id)));
            }
            r.sites.remove(site_id);
            r.deployments.retain(|_, d| d.site_id != site_id);
            r.custom_domains.retain(|_, d| d.site_id != site_id);
            Ok(())
        })
        .await
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<(), EngineError> {
        self.mutate(|r| {
            if r.deployments.contains_key(&deployment.id) {
                return Err(EngineError::Internal(format!(
                    "deployment {} already exists",
                    deployment.id
                )));
            }
            r.deployments.insert(deployment.id.clone(), deployment.clone());
            Ok(())
        })
        .await
    }

    async fn get_deployment(&self, deployment_id: &str) -> Result<Deployment, EngineError> {
        let records = self.records.read().await;
        records
            .deployments
            .get(deployment_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("deployment {}", deployment_id)))
    }

    async fn list_deployments(&self, site_id: &str) -> Result<Vec<Deployment>, EngineError> {
        let records = self.records.read().await;
        let mut out: Vec<Deployment> = records
            .deployments
            .values()
            .filter(|d| d.site_id == site_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn list_other_deployments(
        &self,
        site_id: &str,
        except_id: &str,
        status: DeploymentStatus,
    ) -> Result<Vec<Deployment>, EngineError> {
        Ok(self
            .list_deployments(site_id)
            .await?
            .into_iter()
            .filter(|d| d.id != except_id && d.status == status)
            .collect())
    }

    async fn update_deployment_status(
        &self,
        deployment_id: &str,
        status: DeploymentStatus,
        url: Option<&str>,
    ) -> Result<(), EngineError> {
        self.mutate(|r| {
            let deployment = r.deployment_mut(deployment_id)?;
            if deployment.status.is_terminal() {
                return Err(EngineError::Validation(format!(
                    "deployment {} is already {}",
                    deployment_id, deployment.status
                )));
            }
            deployment.status = status;
            if let Some(url) = url {
                deployment.url = Some(url.to_string());
            }
            Ok(())
        })
        .await
    }

    async fn update_deployment_commit(&self, deployment_id: &str, commit: &CommitMetadata) -> Result<(), EngineError> {
        self.mutate(|r| {
            r.deployment_mut(deployment_id)?.commit = commit.clone();
            Ok(())
        })
        .await
    }

    async fn create_custom_domain(&self, domain: &CustomDomain) -> Result<(), EngineError> {
        self.mutate(|r| {
            if r.custom_domains.values().any(|d| d.hostname == domain.hostname) {
                return Err(EngineError::Validation(format!(
                    "hostname {} is already in use",
                    domain.hostname
                )));
            }
            r.custom_domains.insert(domain.id.clone(), domain.clone());
            Ok(())
        })
        .await
    }

    async fn get_custom_domain(&self, domain_id: &str) -> Result<CustomDomain, EngineError> {
        let records = self.records.read().await;
        records
            .custom_domains
            .get(domain_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("custom domain {}", domain_id)))
    }

    async fn list_custom_domains(&self, site_id: &str) -> Result<Vec<CustomDomain>, EngineError> {
        let records = self.records.read().await;
        let mut out: Vec<CustomDomain> = records
            .custom_domains
            .values()
            .filter(|d| d.site_id == site_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    async fn update_custom_domain(&self, domain: &CustomDomain) -> Result<(), EngineError> {
        self.mutate(|r| {
            let existing = r
                .custom_domains
                .get_mut(&domain.id)
                .ok_or_else(|| EngineError::NotFound(format!("custom domain {}", domain.id)))?;
            *existing = domain.clone();
            Ok(())
        })
        .await
    }

    async fn delete_custom_domain(&self, domain_id: &str) -> Result<(), EngineError> {
        self.mutate(|r| {
            r.custom_domains
                .remove(domain_id)
                .map(|_| ())
                .ok_or_else(|| EngineError::NotFound(format!("custom domain {}", domain_id)))
        })
        .await
    }

    async fn count_custom_domains_for_owner(&self, owner_id: &str) -> Result<usize, EngineError> {
        let records = self.records.read().await;
        Ok(records
            .custom_domains
            .values()
            .filter(|d| {
                records
                    .sites
                    .get(&d.site_id)
                    .map(|s| s.owner_id == owner_id)
                    .unwrap_or(false)
            })
            .count())
    }

    async fn source_token(&self, owner_id: &str) -> Result<Option<SecretString>, EngineError> {
        let records = self.records.read().await;
        Ok(records
            .source_tokens
            .get(owner_id)
            .map(|t| SecretString::from(t.as_str())))
    }

    async fn add_installation(&self, installation: &Installation) -> Result<(), EngineError> {
        self.mutate(|r| {
            match r.installations.get_mut(&installation.installation_id) {
                Some(existing) => {
                    if installation.owner_id.is_some() {
                        existing.owner_id = installation.owner_id.clone();
                    }
                }
                None => {
                    r.installations
                        .insert(installation.installation_id.clone(), installation.clone());
                }
            }
            Ok(())
        })
        .await
    }

    async fn remove_installation(&self, installation_id: &str) -> Result<(), EngineError> {
        self.mutate(|r| {
            r.installations.remove(installation_id);
            Ok(())
        })
        .await
    }
}
