//! Settings file management

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;

/// Engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit process logs as JSON
    #[serde(default)]
    pub json_logs: bool,

    /// Platform root domain sites are served under
    #[serde(default = "default_root_domain")]
    pub root_domain: String,

    /// Maximum concurrent artifact uploads per deployment
    #[serde(default = "default_upload_concurrency")]
    pub upload_concurrency: usize,

    /// Secret the environment blobs are encrypted with
    #[serde(default)]
    pub env_encryption_secret: Option<String>,

    /// Object storage configuration
    #[serde(default)]
    pub object_storage: ObjectStorageSettings,

    /// Edge configuration
    #[serde(default)]
    pub edge: EdgeSettings,

    /// Source host configuration
    #[serde(default)]
    pub source_host: SourceHostSettings,

    /// Deploy trigger rate limit
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
}

fn default_root_domain() -> String {
    "boop.cat".to_string()
}

fn default_upload_concurrency() -> usize {
    20
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            json_logs: false,
            root_domain: default_root_domain(),
            upload_concurrency: default_upload_concurrency(),
            env_encryption_secret: None,
            object_storage: ObjectStorageSettings::default(),
            edge: EdgeSettings::default(),
            source_host: SourceHostSettings::default(),
            rate_limit: RateLimitSettings::default(),
        }
    }
}

impl Settings {
    /// Overlay values from the process environment
    pub fn apply_env(&mut self) {
        let vars: HashMap<String, String> = std::env::vars().collect();
        self.apply_vars(&vars);
    }

    /// Overlay values from a variable map; blank values are ignored
    pub fn apply_vars(&mut self, vars: &HashMap<String, String>) {
        let get = |name: &str| {
            vars.get(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(v) = get("FSD_EDGE_ROOT_DOMAIN") {
            self.root_domain = v;
        }
        if let Some(v) = get("ENV_ENCRYPTION_SECRET") {
            self.env_encryption_secret = Some(v);
        }
        if let Some(v) = get("B2_KEY_ID") {
            self.object_storage.key_id = v;
        }
        if let Some(v) = get("B2_APP_KEY") {
            self.object_storage.app_key = v;
        }
        if let Some(v) = get("B2_BUCKET_ID") {
            self.object_storage.bucket_id = v;
        }
        if let Some(v) = get("CF_API_TOKEN") {
            self.edge.api_token = v;
        }
        if let Some(v) = get("CF_ACCOUNT_ID") {
            self.edge.account_id = v;
        }
        if let Some(v) = get("CF_KV_NAMESPACE_ID") {
            self.edge.kv_namespace_id = v;
        }
        if let Some(v) = get("CF_ZONE_ID") {
            self.edge.zone_id = Some(v);
        }
        if let Some(v) = get("GITHUB_APP_WEBHOOK_SECRET") {
            self.source_host.webhook_secret = Some(v);
        }
        if let Some(v) = get("RATE_API_V1_WINDOW_MS").and_then(|v| v.parse().ok()) {
            self.rate_limit.window_ms = v;
        }
        if let Some(v) = get("RATE_API_V1_MAX").and_then(|v| v.parse().ok()) {
            self.rate_limit.max = v;
        }
    }
}

/// Object storage credentials
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectStorageSettings {
    #[serde(default)]
    pub key_id: String,

    #[serde(default)]
    pub app_key: String,

    #[serde(default)]
    pub bucket_id: String,

    /// Account authorization endpoint
    #[serde(default)]
    pub auth_url: Option<String>,
}

/// Edge control plane credentials
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EdgeSettings {
    #[serde(default)]
    pub api_token: String,

    #[serde(default)]
    pub account_id: String,

    #[serde(default)]
    pub kv_namespace_id: String,

    /// Zone of the root domain; looked up by name when absent
    #[serde(default)]
    pub zone_id: Option<String>,

    #[serde(default)]
    pub api_base: Option<String>,
}

/// Source host settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceHostSettings {
    #[serde(default)]
    pub api_base: Option<String>,

    /// Secret webhook deliveries are signed with
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

/// Fixed-window rate limit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    #[serde(default = "default_rate_max")]
    pub max: u32,
}

fn default_window_ms() -> u64 {
    15 * 60 * 1000
}

fn default_rate_max() -> u32 {
    100
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            max: default_rate_max(),
        }
    }
}
