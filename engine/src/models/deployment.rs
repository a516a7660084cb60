//! Deployment models

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deploy::fsm::DeploymentStatus;

/// Commit metadata attached to a deployment, all best-effort
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitMetadata {
    #[serde(default)]
    pub sha: Option<String>,

    #[serde(default)]
    pub message: Option<String>,

    #[serde(default)]
    pub author: Option<String>,

    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl CommitMetadata {
    /// Fill unset fields from another source
    pub fn merge_missing(&mut self, other: &CommitMetadata) {
        if self.sha.is_none() {
            self.sha = other.sha.clone();
        }
        if self.message.is_none() {
            self.message = other.message.clone();
        }
        if self.author.is_none() {
            self.author = other.author.clone();
        }
        if self.avatar_url.is_none() {
            self.avatar_url = other.avatar_url.clone();
        }
    }
}

/// One attempt at publishing a site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    /// Unique deployment ID
    pub id: String,

    pub site_id: String,

    pub owner_id: String,

    pub created_at: DateTime<Utc>,

    pub status: DeploymentStatus,

    /// Public URL once published
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub commit: CommitMetadata,

    /// Persisted pipeline log
    #[serde(default)]
    pub log_path: Option<PathBuf>,
}

impl Deployment {
    /// A fresh deployment in the building state
    pub fn building(id: impl Into<String>, site_id: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            site_id: site_id.into(),
            owner_id: owner_id.into(),
            created_at: Utc::now(),
            status: DeploymentStatus::Building,
            url: None,
            commit: CommitMetadata::default(),
            log_path: None,
        }
    }
}
