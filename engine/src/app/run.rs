//! Main application run loop

use std::future::Future;

use tracing::{error, info};

use crate::app::options::{AppOptions, Command};
use crate::app::state::AppState;
use crate::deploy::logger::{log_channel, DEFAULT_SINK_CAPACITY};
use crate::errors::EngineError;
use crate::filesys::file::File;

/// Run one command, then wait for the pipelines it started.
///
/// A shutdown signal cancels running pipelines instead of waiting for them.
pub async fn run(
    options: AppOptions,
    command: Command,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
    mut print: impl FnMut(&str) + Send,
) -> Result<(), EngineError> {
    let state = AppState::init(&options).await?;

    tokio::pin!(shutdown_signal);
    let result = tokio::select! {
        result = execute(&state, command, &mut print) => result,
        _ = &mut shutdown_signal => {
            info!("Shutdown signal received, shutting down...");
            return shutdown(&state, &options).await;
        }
    };

    tokio::select! {
        _ = state.engine.drain() => {}
        _ = &mut shutdown_signal => {
            info!("Shutdown signal received, canceling running deployments...");
            shutdown(&state, &options).await?;
        }
    }

    result
}

async fn shutdown(state: &AppState, options: &AppOptions) -> Result<(), EngineError> {
    match tokio::time::timeout(options.max_shutdown_delay, state.shutdown()).await {
        Ok(()) => {
            info!("Shutdown complete");
            Ok(())
        }
        Err(_) => {
            error!("Shutdown timed out after {:?}", options.max_shutdown_delay);
            Err(EngineError::Internal("shutdown timed out".to_string()))
        }
    }
}

async fn execute(
    state: &AppState,
    command: Command,
    print: &mut (impl FnMut(&str) + Send),
) -> Result<(), EngineError> {
    match command {
        Command::Deploy { site, owner, wait } => {
            if wait {
                let (tx, mut rx) = log_channel(DEFAULT_SINK_CAPACITY);
                state.trigger_deploy(&site, &owner, Some(tx)).await?;
                while let Some(line) = rx.recv().await {
                    print(&line);
                }
            } else {
                let deployment = state.trigger_deploy(&site, &owner, None).await?;
                print(&serde_json::to_string_pretty(&deployment)?);
            }
        }
        Command::Cancel { deployment } => {
            state.engine.cancel(&deployment)?;
            print(&format!("cancel requested for {}", deployment));
        }
        Command::Stop { deployment, owner } => {
            let status = state.engine.stop(&deployment, &owner).await?;
            print(&format!("deployment {} is {}", deployment, status));
        }
        Command::Cleanup { site, owner } => {
            match state.engine.delete_site(&site, &owner).await? {
                None => print(&format!("site {} removed", site)),
                Some(e) => print(&format!("site {} removed, storage cleanup incomplete: {}", site, e)),
            }
        }
        Command::AddDomain { site, owner, hostname } => {
            let domain = state.domains.create(&site, &owner, &hostname).await?;
            print(&serde_json::to_string_pretty(&domain)?);
        }
        Command::PollDomain { site, owner, domain } => {
            let domain = state.domains.poll(&site, &owner, &domain).await?;
            print(&serde_json::to_string_pretty(&domain)?);
        }
        Command::RemoveDomain { site, owner, domain } => {
            state.domains.delete(&site, &owner, &domain).await?;
            print(&format!("custom domain {} removed", domain));
        }
        Command::Webhook {
            event,
            payload,
            signature,
        } => {
            let body = File::new(payload).read_bytes().await?;
            let outcome = state.webhooks.handle(&event, &body, signature.as_deref()).await?;
            print(&format!("{:?}", outcome));
        }
        Command::Logs { deployment, owner } => {
            let logs = state.engine.read_logs(&deployment, &owner).await?;
            print(logs.trim_end());
        }
    }
    Ok(())
}
