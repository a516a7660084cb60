//! Child processes whose output is streamed line by line to the deployment log

use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use crate::deploy::git::redact_credentials;
use crate::deploy::logger::DeployLogger;

/// Run a command to completion, logging stdout and stderr as they arrive
pub async fn run_streaming(mut command: Command, logger: &DeployLogger) -> std::io::Result<ExitStatus> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn()?;
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let (_, _, status) = tokio::join!(pump(stdout, logger), pump(stderr, logger), child.wait());
    status
}

async fn pump<R: AsyncRead + Unpin>(reader: Option<R>, logger: &DeployLogger) {
    let Some(reader) = reader else {
        return;
    };
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        logger.log(redact_credentials(&line)).await;
    }
}
