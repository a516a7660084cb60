//! Custom domain lifecycle: create, poll until active, delete

use std::sync::Arc;

use tracing::{info, warn};

use crate::edge::{EdgeRouting, HostnameState};
use crate::errors::EngineError;
use crate::models::domain::{CustomDomain, DomainStatus};
use crate::store::RecordStore;
use crate::utils::{generate_id, normalize_hostname};

/// Custom domains an owner may hold across all sites
pub const MAX_CUSTOM_DOMAINS_PER_OWNER: usize = 3;

/// Drives custom hostnames through the CDN and keeps the records in sync
pub struct DomainManager {
    store: Arc<dyn RecordStore>,
    edge: Arc<dyn EdgeRouting>,
    root_domain: String,
}

impl DomainManager {
    pub fn new(store: Arc<dyn RecordStore>, edge: Arc<dyn EdgeRouting>, root_domain: impl Into<String>) -> Self {
        Self {
            store,
            edge,
            root_domain: root_domain.into().to_lowercase(),
        }
    }

    /// Fallback origin custom hostnames resolve through
    pub fn fallback_origin(&self) -> String {
        format!("sites.{}", self.root_domain)
    }

    /// Register a hostname for a site; routes it at once if the CDN reports it active
    pub async fn create(&self, site_id: &str, owner_id: &str, hostname: &str) -> Result<CustomDomain, EngineError> {
        let site = self.store.get_site(site_id, owner_id).await?;

        let hostname = normalize_hostname(hostname);
        if hostname.is_empty() {
            return Err(EngineError::Validation("hostname-required".to_string()));
        }
        if self.is_root_hostname(&hostname) {
            return Err(EngineError::Validation("root-domains-not-supported".to_string()));
        }
        if self.store.count_custom_domains_for_owner(owner_id).await? >= MAX_CUSTOM_DOMAINS_PER_OWNER {
            return Err(EngineError::Validation("custom-domain-limit-reached".to_string()));
        }

        if let Err(e) = self.edge.ensure_fallback_origin(&self.fallback_origin()).await {
            warn!("Fallback origin error: {}", e);
        }

        let state = self.edge.create_custom_hostname(&hostname).await?;
        let mut domain = CustomDomain::new(generate_id(), &site.id, &hostname);
        apply_state(&mut domain, &state);
        self.store.create_custom_domain(&domain).await?;
        info!("Custom domain {} added to site {} ({})", hostname, site.id, domain.status.as_str());

        if domain.status == DomainStatus::Active {
            self.route(&domain).await;
        }
        Ok(domain)
    }

    /// Refresh status from the CDN; routing is added on the transition into `active`
    pub async fn poll(&self, site_id: &str, owner_id: &str, domain_id: &str) -> Result<CustomDomain, EngineError> {
        let mut domain = self.owned_domain(site_id, owner_id, domain_id).await?;

        let cdn_id = match domain.cdn_hostname_id.clone().filter(|id| !id.is_empty()) {
            Some(id) => id,
            None => self
                .edge
                .find_custom_hostname(&domain.hostname)
                .await?
                .map(|state| state.id)
                .ok_or_else(|| EngineError::NotFound(format!("custom hostname {}", domain.hostname)))?,
        };

        let state = self.edge.get_custom_hostname(&cdn_id).await?;
        let previous = domain.status;
        apply_state(&mut domain, &state);
        self.store.update_custom_domain(&domain).await?;

        if domain.status == DomainStatus::Active && previous != DomainStatus::Active {
            info!("Custom domain {} is now active", domain.hostname);
            self.route(&domain).await;
        }
        Ok(domain)
    }

    /// Remove a hostname from the CDN, the edge KV and the record store
    pub async fn delete(&self, site_id: &str, owner_id: &str, domain_id: &str) -> Result<(), EngineError> {
        let domain = self.owned_domain(site_id, owner_id, domain_id).await?;

        let cdn_id = match domain.cdn_hostname_id.clone().filter(|id| !id.is_empty()) {
            Some(id) => Some(id),
            None => match self.edge.find_custom_hostname(&domain.hostname).await {
                Ok(found) => found.map(|state| state.id),
                Err(e) => {
                    warn!("Could not find CDN id for {}: {}", domain.hostname, e);
                    None
                }
            },
        };

        if let Some(id) = cdn_id {
            if let Err(e) = self.edge.delete_custom_hostname(&id).await {
                warn!("Failed to delete custom hostname {}: {}", id, e);
            }
        }
        if let Err(e) = self.edge.remove_routing("", "", &domain.hostname).await {
            warn!("Failed to remove routing for {}: {}", domain.hostname, e);
        }

        self.store.delete_custom_domain(&domain.id).await?;
        info!("Custom domain {} removed from site {}", domain.hostname, site_id);
        Ok(())
    }

    fn is_root_hostname(&self, hostname: &str) -> bool {
        !self.root_domain.is_empty()
            && (hostname == self.root_domain || hostname.ends_with(&format!(".{}", self.root_domain)))
    }

    async fn owned_domain(&self, site_id: &str, owner_id: &str, domain_id: &str) -> Result<CustomDomain, EngineError> {
        let site = self.store.get_site(site_id, owner_id).await?;
        let domain = self.store.get_custom_domain(domain_id).await?;
        if domain.site_id != site.id {
            return Err(EngineError::NotFound(format!("custom domain {}", domain_id)));
        }
        Ok(domain)
    }

    async fn route(&self, domain: &CustomDomain) {
        if let Err(e) = self.edge.ensure_routing(&domain.hostname, &domain.site_id, "").await {
            warn!("Failed to route {}: {}", domain.hostname, e);
        }
    }
}

fn apply_state(domain: &mut CustomDomain, state: &HostnameState) {
    domain.cdn_hostname_id = Some(state.id.clone()).filter(|id| !id.is_empty());
    domain.status = state.combined_status();
    domain.ssl_status = Some(state.ssl_status.clone()).filter(|s| !s.is_empty());
    domain.verification_records = state.records.clone();
}
