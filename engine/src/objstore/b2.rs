//! B2-style object storage client

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{header, Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::errors::{ApiError, EngineError};
use crate::http::client::check_status;
use crate::objstore::store::{ListPage, ObjectInfo, ObjectStore};
use crate::utils::sha1_hex;

pub const DEFAULT_AUTH_URL: &str = "https://api.backblazeb2.com/b2api/v2/b2_authorize_account";

/// Characters escaped in object names; `/` stays literal
const OBJECT_NAME: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Object storage options
#[derive(Debug)]
pub struct B2Options {
    pub key_id: String,
    pub app_key: SecretString,
    pub bucket_id: String,
    pub auth_url: String,
    pub timeout: Duration,
}

impl B2Options {
    pub fn new(key_id: impl Into<String>, app_key: SecretString, bucket_id: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            app_key,
            bucket_id: bucket_id.into(),
            auth_url: DEFAULT_AUTH_URL.to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

/// An authorized account session
#[derive(Debug)]
pub struct Session {
    token: SecretString,
    pub api_url: String,
    pub download_url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorizeResponse {
    authorization_token: String,
    api_url: String,
    download_url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadUrlResponse {
    upload_url: String,
    authorization_token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ListRequest<'a> {
    bucket_id: &'a str,
    max_file_count: u32,
    #[serde(skip_serializing_if = "is_blank")]
    prefix: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_file_name: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    files: Vec<FileEntry>,
    #[serde(default)]
    next_file_name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileEntry {
    file_name: String,
    file_id: String,
}

/// Object storage client with lazy, refreshable authorization
pub struct B2Client {
    client: Client,
    options: B2Options,
    session: RwLock<Option<Arc<Session>>>,
}

impl B2Client {
    pub fn new(options: B2Options) -> Result<Self, EngineError> {
        let client = Client::builder().timeout(options.timeout).build()?;
        Ok(Self {
            client,
            options,
            session: RwLock::new(None),
        })
    }

    /// Current session, authorizing on first use.
    ///
    /// Concurrent first callers wait on the write lock so only one
    /// authorization goes out.
    pub async fn session(&self) -> Result<Arc<Session>, EngineError> {
        if let Some(session) = self.session.read().await.as_ref() {
            return Ok(session.clone());
        }

        let mut slot = self.session.write().await;
        if let Some(session) = slot.as_ref() {
            return Ok(session.clone());
        }
        let session = Arc::new(self.exchange().await?);
        *slot = Some(session.clone());
        Ok(session)
    }

    /// Replace the cached session with a fresh one
    pub async fn authorize(&self) -> Result<Arc<Session>, EngineError> {
        let mut slot = self.session.write().await;
        let session = Arc::new(self.exchange().await?);
        *slot = Some(session.clone());
        Ok(session)
    }

    /// Exchange the account key for a session
    async fn exchange(&self) -> Result<Session, EngineError> {
        const OP: &str = "b2_authorize_account";
        debug!("Authorizing object storage account {}", self.options.key_id);

        let response = self
            .client
            .get(&self.options.auth_url)
            .basic_auth(&self.options.key_id, Some(self.options.app_key.expose_secret()))
            .send()
            .await
            .map_err(|e| storage_err(ApiError::transport(OP, &e)))?;
        let response = check_status(OP, response).await.map_err(storage_err)?;
        let body: AuthorizeResponse = response
            .json()
            .await
            .map_err(|e| storage_err(ApiError::transport(OP, &e)))?;

        info!("Object storage authorized");
        Ok(Session {
            token: SecretString::from(body.authorization_token),
            api_url: body.api_url.trim_end_matches('/').to_string(),
            download_url: body.download_url,
        })
    }

    async fn api_call<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        session: &Session,
        op: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let url = format!("{}/b2api/v2/{}", session.api_url, op);
        let response = self
            .client
            .post(&url)
            .header(header::AUTHORIZATION, session.token.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::transport(op, &e))?;
        let response = check_status(op, response).await?;
        response.json().await.map_err(|e| ApiError::transport(op, &e))
    }

    /// API call that re-authorizes once when the session has expired
    async fn api_call_with_refresh<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        op: &str,
        body: &B,
    ) -> Result<T, EngineError> {
        let session = self.session().await?;
        match self.api_call(&session, op, body).await {
            Err(e) if e.status == Some(StatusCode::UNAUTHORIZED.as_u16()) => {
                warn!("{} rejected the session, re-authorizing", op);
                let session = self.authorize().await?;
                self.api_call(&session, op, body).await.map_err(storage_err)
            }
            other => other.map_err(storage_err),
        }
    }

    async fn get_upload_url(&self, session: &Session) -> Result<UploadUrlResponse, ApiError> {
        self.api_call(
            session,
            "b2_get_upload_url",
            &serde_json::json!({ "bucketId": self.options.bucket_id }),
        )
        .await
    }

    /// Upload URL for one upload, re-authorizing once if the request fails
    async fn upload_target(&self) -> Result<UploadUrlResponse, EngineError> {
        let session = self.session().await?;
        match self.get_upload_url(&session).await {
            Ok(target) => Ok(target),
            Err(e) => {
                warn!("Getting upload URL failed ({}), re-authorizing", e);
                let session = self.authorize().await?;
                self.get_upload_url(&session).await.map_err(storage_err)
            }
        }
    }

    async fn post_upload(
        &self,
        target: &UploadUrlResponse,
        name: &str,
        data: &[u8],
        content_type: &str,
        sha1: &str,
    ) -> Result<(), ApiError> {
        const OP: &str = "b2_upload_file";
        let response = self
            .client
            .post(&target.upload_url)
            .header(header::AUTHORIZATION, &target.authorization_token)
            .header("X-Bz-File-Name", escape_object_name(name))
            .header(header::CONTENT_TYPE, content_type)
            .header("X-Bz-Content-Sha1", sha1)
            .body(data.to_vec())
            .send()
            .await
            .map_err(|e| ApiError::transport(OP, &e))?;
        check_status(OP, response).await.map(|_| ())
    }
}

#[async_trait]
impl ObjectStore for B2Client {
    async fn upload(&self, name: &str, data: &[u8], content_type: &str) -> Result<(), EngineError> {
        let sha1 = sha1_hex(data);
        let target = self.upload_target().await?;

        match self.post_upload(&target, name, data, content_type, &sha1).await {
            Ok(()) => Ok(()),
            Err(e) if is_stale_upload(&e) => {
                warn!("Upload of {} hit a stale session ({}), retrying", name, e);
                self.authorize().await?;
                let target = self.upload_target().await?;
                self.post_upload(&target, name, data, content_type, &sha1)
                    .await
                    .map_err(storage_err)
            }
            Err(e) => Err(storage_err(e)),
        }
    }

    async fn list(&self, prefix: &str, cursor: Option<&str>, page_size: u32) -> Result<ListPage, EngineError> {
        let request = ListRequest {
            bucket_id: &self.options.bucket_id,
            max_file_count: page_size,
            prefix,
            start_file_name: cursor,
        };
        let response: ListResponse = self.api_call_with_refresh("b2_list_file_names", &request).await?;
        Ok(ListPage {
            objects: response
                .files
                .into_iter()
                .map(|f| ObjectInfo {
                    name: f.file_name,
                    id: f.file_id,
                })
                .collect(),
            next: response.next_file_name,
        })
    }

    async fn delete(&self, name: &str, id: &str) -> Result<(), EngineError> {
        let _: serde_json::Value = self
            .api_call_with_refresh(
                "b2_delete_file_version",
                &serde_json::json!({ "fileName": name, "fileId": id }),
            )
            .await?;
        Ok(())
    }
}

fn is_blank(s: &&str) -> bool {
    s.is_empty()
}

fn storage_err(e: ApiError) -> EngineError {
    EngineError::Storage(e)
}

/// Expired token or an upload pod that stopped accepting uploads
fn is_stale_upload(e: &ApiError) -> bool {
    matches!(e.status, Some(401) | Some(503))
}

/// Percent-encode an object name for the `X-Bz-File-Name` header
pub fn escape_object_name(name: &str) -> String {
    utf8_percent_encode(name, OBJECT_NAME).to_string()
}
