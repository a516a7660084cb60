//! boop engine - Entry Point
//!
//! Runs one deployment command against the local record store: deploy,
//! cancel or stop a deployment, manage custom domains, replay a webhook.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use boop_engine::app::options::{AppOptions, Command};
use boop_engine::app::run::run;
use boop_engine::logs::{init_logging, LogOptions};
use boop_engine::storage::layout::StorageLayout;
use boop_engine::storage::settings::Settings;
use boop_engine::utils::version_info;
use colored::Colorize;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version_info()) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("{} {}", "error:".red().bold(), e),
        }
        return ExitCode::SUCCESS;
    }

    let command = match Command::from_args(&cli_args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            return ExitCode::from(2);
        }
    };

    let layout = match cli_args.get("base-dir") {
        Some(dir) => StorageLayout::new(dir),
        None => StorageLayout::default(),
    };

    let settings = match load_settings(&layout).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        json_format: settings.json_logs,
        log_dir: cli_args.get("log-dir").map(PathBuf::from),
        ..Default::default()
    };
    if let Err(e) = init_logging(log_options) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let options = AppOptions::new(layout, settings);
    info!("Running {:?} with base dir {}", command, options.layout.base_dir.display());

    match run(options, command, await_shutdown_signal(), |line| println!("{}", line)).await {
        Ok(()) => {
            eprintln!("{}", "done".green().bold());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Command failed: {e}");
            eprintln!("{} {} ({})", "error:".red().bold(), e, e.code().yellow());
            ExitCode::FAILURE
        }
    }
}

/// Settings file if present, then environment overrides
async fn load_settings(layout: &StorageLayout) -> anyhow::Result<Settings> {
    let settings_file = layout.settings_file();
    let mut settings = if settings_file.exists().await {
        settings_file
            .read_json::<Settings>()
            .await
            .with_context(|| format!("unable to read {}", settings_file.path().display()))?
    } else {
        Settings::default()
    };
    settings.apply_env();
    Ok(settings)
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(term), Ok(int)) => (term, int),
            _ => {
                warn!("Unable to install signal handlers, falling back to Ctrl+C");
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Ctrl+C received, shutting down...");
                }
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, shutting down...");
        }
    }
}
