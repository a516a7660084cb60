//! HTTP client implementation

use std::time::Duration;

use reqwest::{header, Client, Method, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error};

use crate::errors::ApiError;

/// Bearer-authenticated JSON client for a REST control plane
pub struct HttpClient {
    client: Client,
    base_url: String,
    token: SecretString,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(base_url: &str, token: SecretString, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::transport("client_build", &e))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!("{} {}", method, url);
        self.client
            .request(method, &url)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token.expose_secret()))
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, op: &str, path: &str) -> Result<T, ApiError> {
        let request = self.request(Method::GET, path);
        self.send_json(op, request).await
    }

    /// Make a POST request
    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        op: &str,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let request = self.request(Method::POST, path).json(body);
        self.send_json(op, request).await
    }

    /// Make a PUT request
    pub async fn put<T: DeserializeOwned, B: Serialize>(
        &self,
        op: &str,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let request = self.request(Method::PUT, path).json(body);
        self.send_json(op, request).await
    }

    /// Make a PATCH request
    pub async fn patch<T: DeserializeOwned, B: Serialize>(
        &self,
        op: &str,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let request = self.request(Method::PATCH, path).json(body);
        self.send_json(op, request).await
    }

    /// Make a DELETE request, decoding the response
    pub async fn delete<T: DeserializeOwned>(&self, op: &str, path: &str) -> Result<T, ApiError> {
        let request = self.request(Method::DELETE, path);
        self.send_json(op, request).await
    }

    /// PUT a plain-text body, ignoring the response body
    pub async fn put_text(&self, op: &str, path: &str, body: String) -> Result<(), ApiError> {
        let request = self
            .request(Method::PUT, path)
            .header(header::CONTENT_TYPE, "text/plain")
            .body(body);
        let response = request.send().await.map_err(|e| ApiError::transport(op, &e))?;
        check_status(op, response).await.map(|_| ())
    }

    /// GET a plain-text body; 404 yields `None`
    pub async fn get_text(&self, op: &str, path: &str) -> Result<Option<String>, ApiError> {
        let response = self
            .request(Method::GET, path)
            .send()
            .await
            .map_err(|e| ApiError::transport(op, &e))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(op, response).await?;
        let text = response.text().await.map_err(|e| ApiError::transport(op, &e))?;
        Ok(Some(text))
    }

    /// DELETE where a missing resource counts as success
    pub async fn delete_if_exists(&self, op: &str, path: &str) -> Result<(), ApiError> {
        let response = self
            .request(Method::DELETE, path)
            .send()
            .await
            .map_err(|e| ApiError::transport(op, &e))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check_status(op, response).await.map(|_| ())
    }

    async fn send_json<T: DeserializeOwned>(&self, op: &str, request: RequestBuilder) -> Result<T, ApiError> {
        let response = request.send().await.map_err(|e| ApiError::transport(op, &e))?;
        let response = check_status(op, response).await?;
        response.json().await.map_err(|e| ApiError::transport(op, &e))
    }
}

/// Turn a non-success response into an [`ApiError`] carrying its body
pub async fn check_status(op: &str, response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    error!("{} failed: {} - {}", op, status, body);
    Err(ApiError::new(op, Some(status.as_u16()), body))
}
