//! Shallow git checkout of a site's repository

use std::path::Path;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::process::Command;
use tracing::debug;
use url::Url;

use crate::deploy::command::run_streaming;
use crate::deploy::logger::DeployLogger;
use crate::errors::EngineError;
use crate::filesys::dir::Dir;
use crate::models::deployment::CommitMetadata;

/// Hosts a linked access token is injected for
const TOKEN_HOSTS: &[&str] = &["github.com"];

/// What to check out and where
pub struct CloneRequest<'a> {
    pub url: &'a str,
    pub branch: &'a str,
    pub token: Option<&'a SecretString>,
    pub target: &'a Path,
}

/// Source fetcher trait for testability
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Replace `request.target` with a depth-1 checkout of the branch
    async fn fetch(&self, request: &CloneRequest<'_>, logger: &DeployLogger) -> Result<(), EngineError>;

    /// SHA, subject and author of the checked-out commit
    async fn head_commit(&self, dir: &Path) -> Result<CommitMetadata, EngineError>;
}

/// Fetcher driving the `git` binary
#[derive(Debug, Clone)]
pub struct GitCli {
    program: String,
}

impl GitCli {
    pub fn new() -> Self {
        Self {
            program: "git".to_string(),
        }
    }

    async fn read(&self, dir: &Path, args: &[&str]) -> Result<String, EngineError> {
        let output = Command::new(&self.program)
            .arg("-C")
            .arg(dir)
            .args(args)
            .output()
            .await
            .map_err(|e| EngineError::Clone(format!("failed to run git: {}", e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::Clone(redact_credentials(stderr.trim())));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceFetcher for GitCli {
    async fn fetch(&self, request: &CloneRequest<'_>, logger: &DeployLogger) -> Result<(), EngineError> {
        let target = Dir::new(request.target);
        target.delete().await?;
        if let Some(parent) = request.target.parent() {
            Dir::new(parent).create().await?;
        }

        let url = match request.token {
            Some(token) => inject_token(request.url, token),
            None => request.url.to_string(),
        };
        logger
            .log(format!("Cloning {} (branch {})", redact_credentials(&url), request.branch))
            .await;

        let mut command = Command::new(&self.program);
        command
            .args(["clone", "--no-tags", "--depth", "1", "--single-branch", "--branch"])
            .arg(request.branch)
            .arg(&url)
            .arg(request.target)
            .env("GIT_TERMINAL_PROMPT", "0");

        let status = run_streaming(command, logger)
            .await
            .map_err(|e| EngineError::Clone(format!("failed to run git: {}", e)))?;
        if !status.success() {
            return Err(EngineError::Clone(format!("git exited with {}", status)));
        }
        debug!("Cloned into {}", request.target.display());
        Ok(())
    }

    async fn head_commit(&self, dir: &Path) -> Result<CommitMetadata, EngineError> {
        let sha = self.read(dir, &["rev-parse", "HEAD"]).await?;
        let message = self.read(dir, &["log", "-1", "--pretty=%s"]).await?;
        let author = self.read(dir, &["log", "-1", "--pretty=%an <%ae>"]).await?;
        Ok(CommitMetadata {
            sha: Some(sha),
            message: Some(message),
            author: Some(author),
            avatar_url: None,
        })
    }
}

/// Embed an access token as basic-auth userinfo for supported hosts
pub fn inject_token(repo_url: &str, token: &SecretString) -> String {
    let Ok(mut url) = Url::parse(repo_url) else {
        return repo_url.to_string();
    };
    let supported = url.scheme() == "https"
        && url.username().is_empty()
        && url.host_str().map(|h| TOKEN_HOSTS.contains(&h)).unwrap_or(false);
    if !supported {
        return repo_url.to_string();
    }
    if url.set_username("oauth2").is_err() || url.set_password(Some(token.expose_secret())).is_err() {
        return repo_url.to_string();
    }
    url.to_string()
}

/// Replace credentials in a line with `***`: the userinfo of every
/// `//userinfo@host`, and bare `user:token@host` words
pub fn redact_credentials(line: &str) -> String {
    redact_bare_userinfo(&redact_url_userinfo(line))
}

fn redact_url_userinfo(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;

    while let Some(idx) = rest.find("//") {
        let (head, tail) = rest.split_at(idx + 2);
        out.push_str(head);

        let end = tail
            .find(|c: char| c == '/' || c == '@' || c.is_whitespace())
            .unwrap_or(tail.len());
        if end > 0 && tail[end..].starts_with('@') {
            out.push_str("***");
            rest = &tail[end..];
        } else {
            rest = tail;
        }
    }

    out.push_str(rest);
    out
}

/// Words start after whitespace, a quote or an opening delimiter
fn is_word_boundary(c: char) -> bool {
    c.is_whitespace() || matches!(c, '"' | '\'' | '`' | '(' | '<' | '=')
}

fn redact_bare_userinfo(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    for segment in line.split_inclusive(is_word_boundary) {
        let word = segment.trim_end_matches(is_word_boundary);
        match redact_word(word) {
            Some(redacted) => {
                out.push_str(&redacted);
                out.push_str(&segment[word.len()..]);
            }
            None => out.push_str(segment),
        }
    }
    out
}

/// `user:secret@host...` becomes `***@host...`
fn redact_word(word: &str) -> Option<String> {
    let at = word.find('@')?;
    let (userinfo, rest) = word.split_at(at);
    if rest.len() < 2 || userinfo.contains('/') {
        return None;
    }
    let (user, secret) = userinfo.split_once(':')?;
    if user.is_empty() || secret.is_empty() {
        return None;
    }
    Some(format!("***{}", rest))
}
