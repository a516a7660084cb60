//! Custom domain models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Combined hostname + TLS status of a custom domain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainStatus {
    #[default]
    Pending,
    PendingSsl,
    Active,
}

impl DomainStatus {
    /// Derive the combined status from the provider's hostname and SSL status
    pub fn derive(hostname_status: &str, ssl_status: &str) -> Self {
        let hostname_active = hostname_status == "active";
        let ssl_active = ssl_status == "active";
        match (hostname_active, ssl_active) {
            (true, true) => DomainStatus::Active,
            (true, false) | (false, true) => DomainStatus::PendingSsl,
            (false, false) => DomainStatus::Pending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DomainStatus::Pending => "pending",
            DomainStatus::PendingSsl => "pending_ssl",
            DomainStatus::Active => "active",
        }
    }
}

/// A DNS or HTTP challenge the domain owner must satisfy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRecord {
    /// `ownership`, `http`, `ssl_txt` or `ssl_http`
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_body: Option<String>,
}

/// A tenant-owned hostname pointed at a site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomDomain {
    pub id: String,

    pub site_id: String,

    pub hostname: String,

    /// Identifier of the hostname on the CDN side
    #[serde(default)]
    pub cdn_hostname_id: Option<String>,

    #[serde(default)]
    pub status: DomainStatus,

    /// Raw SSL status as reported by the provider
    #[serde(default)]
    pub ssl_status: Option<String>,

    #[serde(default)]
    pub verification_records: Vec<VerificationRecord>,

    pub created_at: DateTime<Utc>,
}

impl CustomDomain {
    pub fn new(id: impl Into<String>, site_id: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            site_id: site_id.into(),
            hostname: hostname.into(),
            cdn_hostname_id: None,
            status: DomainStatus::Pending,
            ssl_status: None,
            verification_records: Vec::new(),
            created_at: Utc::now(),
        }
    }
}
