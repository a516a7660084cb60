//! Source host commit lookup

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::models::deployment::CommitMetadata;

pub const DEFAULT_API_BASE: &str = "https://api.github.com";

/// Best-effort commit metadata enrichment
#[async_trait]
pub trait CommitLookup: Send + Sync {
    /// Commit metadata for a ref of the repository, or `None` on any failure
    async fn lookup(
        &self,
        repo_url: &str,
        reference: &str,
        token: Option<&SecretString>,
    ) -> Option<CommitMetadata>;
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    sha: String,
    commit: CommitDetail,
    #[serde(default)]
    author: Option<Account>,
    #[serde(default)]
    committer: Option<Account>,
}

#[derive(Debug, Deserialize)]
struct CommitDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    author: Option<CommitAuthor>,
}

#[derive(Debug, Deserialize)]
struct CommitAuthor {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct Account {
    #[serde(default)]
    avatar_url: Option<String>,
}

/// Commit lookup against the GitHub REST API
pub struct GitHubClient {
    client: Client,
    api_base: String,
}

impl GitHubClient {
    pub fn new(api_base: Option<&str>) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .user_agent(concat!("boop-engine/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            api_base: api_base
                .unwrap_or(DEFAULT_API_BASE)
                .trim_end_matches('/')
                .to_string(),
        })
    }

    async fn fetch(
        &self,
        repo_url: &str,
        reference: &str,
        token: Option<&SecretString>,
    ) -> Result<CommitMetadata, String> {
        let (owner, repo) = parse_repo(repo_url).ok_or("not a GitHub repository URL")?;
        let url = format!("{}/repos/{}/{}/commits/{}", self.api_base, owner, repo, reference);

        let mut request = self
            .client
            .get(&url)
            .header(header::ACCEPT, "application/vnd.github+json");
        if let Some(token) = token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request.send().await.map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("status {}", response.status()));
        }
        let body: CommitResponse = response.json().await.map_err(|e| e.to_string())?;

        let avatar_url = body
            .author
            .and_then(|a| a.avatar_url)
            .or_else(|| body.committer.and_then(|c| c.avatar_url));

        Ok(CommitMetadata {
            sha: Some(body.sha),
            message: Some(body.commit.message),
            author: body.commit.author.map(|a| a.name),
            avatar_url,
        })
    }
}

#[async_trait]
impl CommitLookup for GitHubClient {
    async fn lookup(
        &self,
        repo_url: &str,
        reference: &str,
        token: Option<&SecretString>,
    ) -> Option<CommitMetadata> {
        match self.fetch(repo_url, reference, token).await {
            Ok(meta) => Some(meta),
            Err(e) => {
                debug!("Commit lookup for {} failed: {}", reference, e);
                None
            }
        }
    }
}

/// Lookup that never finds anything
pub struct NoCommitLookup;

#[async_trait]
impl CommitLookup for NoCommitLookup {
    async fn lookup(&self, _: &str, _: &str, _: Option<&SecretString>) -> Option<CommitMetadata> {
        None
    }
}

/// Extract `(owner, repo)` from an https or scp-style GitHub URL
pub fn parse_repo(repo_url: &str) -> Option<(String, String)> {
    let trimmed = repo_url.trim();
    let path = if let Some(rest) = trimmed.strip_prefix("git@github.com:") {
        rest.to_string()
    } else {
        let url = Url::parse(trimmed).ok()?;
        if url.host_str()? != "github.com" {
            return None;
        }
        url.path().trim_start_matches('/').to_string()
    };

    let mut parts = path.trim_end_matches('/').splitn(2, '/');
    let owner = parts.next().filter(|s| !s.is_empty())?;
    let repo = parts.next()?.trim_end_matches(".git");
    if repo.is_empty() || repo.contains('/') {
        return None;
    }
    Some((owner.to_string(), repo.to_string()))
}
