//! Application configuration options

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::EngineError;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Storage layout paths
    pub layout: StorageLayout,

    /// Loaded settings, environment overrides applied
    pub settings: Settings,

    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl AppOptions {
    pub fn new(layout: StorageLayout, settings: Settings) -> Self {
        Self {
            layout,
            settings,
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// One invocation of the binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Deploy {
        site: String,
        owner: String,
        wait: bool,
    },
    Cancel {
        deployment: String,
    },
    Stop {
        deployment: String,
        owner: String,
    },
    Cleanup {
        site: String,
        owner: String,
    },
    AddDomain {
        site: String,
        owner: String,
        hostname: String,
    },
    PollDomain {
        site: String,
        owner: String,
        domain: String,
    },
    RemoveDomain {
        site: String,
        owner: String,
        domain: String,
    },
    Webhook {
        event: String,
        payload: PathBuf,
        signature: Option<String>,
    },
    Logs {
        deployment: String,
        owner: String,
    },
}

impl Command {
    /// Pick the command from `--flag` / `--key=value` arguments
    pub fn from_args(args: &HashMap<String, String>) -> Result<Self, EngineError> {
        let get = |key: &str| {
            args.get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| EngineError::Config(format!("missing --{}=<value>", key)))
        };

        if args.contains_key("deploy") {
            return Ok(Command::Deploy {
                site: get("site")?,
                owner: get("owner")?,
                wait: args.contains_key("wait"),
            });
        }
        if args.contains_key("cancel") {
            return Ok(Command::Cancel {
                deployment: get("deployment")?,
            });
        }
        if args.contains_key("stop") {
            return Ok(Command::Stop {
                deployment: get("deployment")?,
                owner: get("owner")?,
            });
        }
        if args.contains_key("cleanup") {
            return Ok(Command::Cleanup {
                site: get("site")?,
                owner: get("owner")?,
            });
        }
        if args.contains_key("add-domain") {
            return Ok(Command::AddDomain {
                site: get("site")?,
                owner: get("owner")?,
                hostname: get("hostname")?,
            });
        }
        if args.contains_key("poll-domain") {
            return Ok(Command::PollDomain {
                site: get("site")?,
                owner: get("owner")?,
                domain: get("domain")?,
            });
        }
        if args.contains_key("remove-domain") {
            return Ok(Command::RemoveDomain {
                site: get("site")?,
                owner: get("owner")?,
                domain: get("domain")?,
            });
        }
        if args.contains_key("webhook") {
            return Ok(Command::Webhook {
                event: get("event")?,
                payload: PathBuf::from(get("payload")?),
                signature: get("signature").ok(),
            });
        }
        if args.contains_key("logs") {
            return Ok(Command::Logs {
                deployment: get("deployment")?,
                owner: get("owner")?,
            });
        }

        Err(EngineError::Config(
            "no command given (try --deploy, --cleanup, --add-domain, --webhook or --logs)".to_string(),
        ))
    }
}
