//! Site model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Branch used when a site has none configured
pub const DEFAULT_BRANCH: &str = "main";

/// A tenant's static site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Site {
    /// Unique site ID
    pub id: String,

    /// Owning user ID
    pub owner_id: String,

    /// Display name
    pub name: String,

    /// Primary domain: a bare label, a subdomain of the root, or the root itself
    #[serde(default)]
    pub domain: Option<String>,

    #[serde(default)]
    pub git_url: Option<String>,

    #[serde(default)]
    pub git_branch: Option<String>,

    /// Subdirectory of the repository to build from
    #[serde(default)]
    pub git_subdir: Option<String>,

    #[serde(default)]
    pub build_command: Option<String>,

    /// Output directory, relative to the build root
    #[serde(default)]
    pub output_dir: Option<String>,

    /// Environment variables, possibly encrypted
    #[serde(default)]
    pub env_text: Option<String>,

    /// Set by the engine after a successful deploy
    #[serde(default)]
    pub current_deployment_id: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl Site {
    pub fn new(id: impl Into<String>, owner_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            name: name.into(),
            domain: None,
            git_url: None,
            git_branch: None,
            git_subdir: None,
            build_command: None,
            output_dir: None,
            env_text: None,
            current_deployment_id: None,
            created_at: Utc::now(),
        }
    }

    /// Configured branch, or the default one
    pub fn branch(&self) -> &str {
        self.git_branch
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .unwrap_or(DEFAULT_BRANCH)
    }

    /// Git URL if one is set and non-blank
    pub fn repo_url(&self) -> Option<&str> {
        self.git_url.as_deref().map(str::trim).filter(|u| !u.is_empty())
    }
}
