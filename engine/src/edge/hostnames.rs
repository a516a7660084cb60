//! Custom hostnames with TLS terminated at the CDN

use serde::Deserialize;
use tracing::info;

use crate::edge::client::{encode_component, EdgeClient, Envelope};
use crate::edge::HostnameState;
use crate::errors::EngineError;
use crate::models::domain::VerificationRecord;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CfHostname {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub ssl: CfSsl,
    #[serde(default)]
    pub ownership_verification: CfOwnership,
    #[serde(default)]
    pub ownership_verification_http: CfHttpChallenge,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CfSsl {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub validation_records: Vec<CfValidationRecord>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CfValidationRecord {
    #[serde(default)]
    pub txt_name: String,
    #[serde(default)]
    pub txt_value: String,
    #[serde(default)]
    pub http_url: String,
    #[serde(default)]
    pub http_body: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CfOwnership {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CfHttpChallenge {
    #[serde(default)]
    pub http_url: String,
    #[serde(default)]
    pub http_body: String,
}

impl From<CfHostname> for HostnameState {
    fn from(raw: CfHostname) -> Self {
        let records = extract_verification_records(&raw);
        HostnameState {
            id: raw.id,
            status: raw.status,
            ssl_status: raw.ssl.status,
            records,
        }
    }
}

/// Challenges the owner has to publish, skipping incomplete ones
pub(crate) fn extract_verification_records(raw: &CfHostname) -> Vec<VerificationRecord> {
    let mut records = Vec::new();

    let owner = &raw.ownership_verification;
    if !owner.kind.is_empty() && !owner.name.is_empty() && !owner.value.is_empty() {
        records.push(txt_record(&owner.kind, &owner.name, &owner.value));
    }

    let http = &raw.ownership_verification_http;
    if !http.http_url.is_empty() && !http.http_body.is_empty() {
        records.push(http_record("http", &http.http_url, &http.http_body));
    }

    for rec in &raw.ssl.validation_records {
        if !rec.txt_name.is_empty() && !rec.txt_value.is_empty() {
            records.push(txt_record("ssl_txt", &rec.txt_name, &rec.txt_value));
        }
        if !rec.http_url.is_empty() && !rec.http_body.is_empty() {
            records.push(http_record("ssl_http", &rec.http_url, &rec.http_body));
        }
    }

    records
}

fn txt_record(kind: &str, name: &str, value: &str) -> VerificationRecord {
    VerificationRecord {
        kind: kind.to_string(),
        name: Some(name.to_string()),
        value: Some(value.to_string()),
        http_url: None,
        http_body: None,
    }
}

fn http_record(kind: &str, url: &str, body: &str) -> VerificationRecord {
    VerificationRecord {
        kind: kind.to_string(),
        name: None,
        value: None,
        http_url: Some(url.to_string()),
        http_body: Some(body.to_string()),
    }
}

impl EdgeClient {
    pub async fn create_custom_hostname(&self, hostname: &str) -> Result<HostnameState, EngineError> {
        const OP: &str = "custom_hostname_create";
        let zone = self.zone_id().await?;
        let body = serde_json::json!({
            "hostname": hostname,
            "ssl": {
                "method": "http",
                "type": "dv",
                "settings": { "min_tls_version": "1.2", "http2": "on" }
            }
        });
        let envelope: Envelope<CfHostname> = self
            .http
            .post(OP, &format!("/zones/{}/custom_hostnames", zone), &body)
            .await
            .map_err(EngineError::Edge)?;
        let state = HostnameState::from(envelope.into_result(OP)?);
        info!("Created custom hostname {} ({})", hostname, state.id);
        Ok(state)
    }

    pub async fn get_custom_hostname(&self, id: &str) -> Result<HostnameState, EngineError> {
        const OP: &str = "custom_hostname_get";
        let zone = self.zone_id().await?;
        let envelope: Envelope<CfHostname> = self
            .http
            .get(OP, &format!("/zones/{}/custom_hostnames/{}", zone, id))
            .await
            .map_err(EngineError::Edge)?;
        Ok(envelope.into_result(OP)?.into())
    }

    pub async fn find_custom_hostname(&self, hostname: &str) -> Result<Option<HostnameState>, EngineError> {
        const OP: &str = "custom_hostname_lookup";
        let zone = self.zone_id().await?;
        let envelope: Envelope<Vec<CfHostname>> = self
            .http
            .get(OP, &format!("/zones/{}/custom_hostnames?hostname={}", zone, encode_component(hostname)))
            .await
            .map_err(EngineError::Edge)?;
        Ok(envelope.into_result(OP)?.into_iter().next().map(HostnameState::from))
    }

    pub async fn delete_custom_hostname(&self, id: &str) -> Result<(), EngineError> {
        const OP: &str = "custom_hostname_delete";
        let zone = self.zone_id().await?;
        let _: serde_json::Value = self
            .http
            .delete(OP, &format!("/zones/{}/custom_hostnames/{}", zone, id))
            .await
            .map_err(EngineError::Edge)?;
        info!("Deleted custom hostname {}", id);
        Ok(())
    }
}
