//! DNS records and the zone fallback origin

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::edge::client::{encode_component, EdgeClient, Envelope};
use crate::errors::EngineError;

/// Address a proxied record points at so the CDN answers for it
pub const FALLBACK_TARGET: &str = "100::";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecord {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub proxied: bool,
}

impl DnsRecord {
    /// The proxied AAAA record every fallback origin needs
    pub fn fallback(name: &str) -> Self {
        Self {
            id: String::new(),
            kind: "AAAA".to_string(),
            name: name.to_string(),
            content: FALLBACK_TARGET.to_string(),
            proxied: true,
        }
    }

    /// Same type, content and proxy flag
    pub fn matches(&self, other: &DnsRecord) -> bool {
        self.kind == other.kind && self.content == other.content && self.proxied == other.proxied
    }
}

impl EdgeClient {
    pub async fn dns_records(&self, name: &str) -> Result<Vec<DnsRecord>, EngineError> {
        const OP: &str = "dns_records_get";
        let zone = self.zone_id().await?;
        let envelope: Envelope<Vec<DnsRecord>> = self
            .http
            .get(OP, &format!("/zones/{}/dns_records?name={}", zone, encode_component(name)))
            .await
            .map_err(EngineError::Edge)?;
        envelope.into_result(OP)
    }

    pub async fn create_dns_record(&self, record: &DnsRecord) -> Result<(), EngineError> {
        const OP: &str = "dns_record_create";
        let zone = self.zone_id().await?;
        let envelope: Envelope<serde_json::Value> = self
            .http
            .post(OP, &format!("/zones/{}/dns_records", zone), record)
            .await
            .map_err(EngineError::Edge)?;
        envelope.into_result(OP).map(|_| ())
    }

    pub async fn update_dns_record(&self, id: &str, record: &DnsRecord) -> Result<(), EngineError> {
        const OP: &str = "dns_record_update";
        let zone = self.zone_id().await?;
        let envelope: Envelope<serde_json::Value> = self
            .http
            .patch(OP, &format!("/zones/{}/dns_records/{}", zone, id), record)
            .await
            .map_err(EngineError::Edge)?;
        envelope.into_result(OP).map(|_| ())
    }

    /// Create or correct the fallback DNS record, then set the fallback origin
    pub async fn ensure_fallback_origin(&self, origin: &str) -> Result<(), EngineError> {
        const OP: &str = "fallback_origin_update";
        let desired = DnsRecord::fallback(origin);

        let existing = self
            .dns_records(origin)
            .await?
            .into_iter()
            .find(|r| r.name == origin);
        match existing {
            Some(record) if record.matches(&desired) => {
                debug!("DNS record for {} already in place", origin);
            }
            Some(record) => {
                info!("Updating DNS record {} for {}", record.id, origin);
                self.update_dns_record(&record.id, &desired).await?;
            }
            None => {
                info!("Creating DNS record for {}", origin);
                self.create_dns_record(&desired).await?;
            }
        }

        let zone = self.zone_id().await?;
        let envelope: Envelope<serde_json::Value> = self
            .http
            .put(
                OP,
                &format!("/zones/{}/custom_hostnames/fallback_origin", zone),
                &serde_json::json!({ "origin": origin }),
            )
            .await
            .map_err(EngineError::Edge)?;
        envelope.into_result(OP).map(|_| ())
    }
}
