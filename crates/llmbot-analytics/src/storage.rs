//! Remote object storage for exported artifacts.

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

use crate::error::ExportError;

/// The operations an export run needs from a remote disk.
#[async_trait]
pub trait RemoteStorage: Send + Sync {
    /// Whether the configured credentials are accepted.
    async fn check_token(&self) -> Result<bool, ExportError>;

    async fn exists(&self, path: &str) -> Result<bool, ExportError>;

    async fn mkdir(&self, path: &str) -> Result<(), ExportError>;

    /// Upload a local file to `remote_path`.
    async fn upload(
        &self,
        local_path: &Path,
        remote_path: &str,
        overwrite: bool,
    ) -> Result<(), ExportError>;
}

/// Upload target returned by the disk API.
#[derive(Debug, Deserialize)]
struct UploadLink {
    href: String,
}

/// Yandex Disk REST API client authenticated with an OAuth token.
pub struct YandexDiskClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl YandexDiskClient {
    pub fn new(api_base: impl Into<String>, token: impl Into<String>) -> Self {
        // No request timeout: a stalled upload is allowed to block the run.
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.api_base, endpoint)
    }

    fn auth(&self) -> String {
        format!("OAuth {}", self.token)
    }
}

async fn storage_error(operation: &'static str, response: Response) -> ExportError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    ExportError::Storage {
        operation,
        message: format!("{}: {}", status, body),
    }
}

#[async_trait]
impl RemoteStorage for YandexDiskClient {
    async fn check_token(&self) -> Result<bool, ExportError> {
        let response = self
            .http
            .get(self.url("/"))
            .header(AUTHORIZATION, self.auth())
            .send()
            .await?;

        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(false),
            _ => Err(storage_error("token check", response).await),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool, ExportError> {
        let response = self
            .http
            .get(self.url("/resources"))
            .header(AUTHORIZATION, self.auth())
            .query(&[("path", path)])
            .send()
            .await?;

        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(storage_error("exists", response).await),
        }
    }

    async fn mkdir(&self, path: &str) -> Result<(), ExportError> {
        let response = self
            .http
            .put(self.url("/resources"))
            .header(AUTHORIZATION, self.auth())
            .query(&[("path", path)])
            .send()
            .await?;

        match response.status() {
            // 409: created concurrently by someone else, which is fine.
            s if s.is_success() || s == StatusCode::CONFLICT => {
                debug!(path, "Remote folder ready");
                Ok(())
            }
            _ => Err(storage_error("mkdir", response).await),
        }
    }

    async fn upload(
        &self,
        local_path: &Path,
        remote_path: &str,
        overwrite: bool,
    ) -> Result<(), ExportError> {
        let response = self
            .http
            .get(self.url("/resources/upload"))
            .header(AUTHORIZATION, self.auth())
            .query(&[
                ("path", remote_path),
                ("overwrite", if overwrite { "true" } else { "false" }),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(storage_error("upload link", response).await);
        }
        let link: UploadLink = response.json().await?;

        let body = tokio::fs::read(local_path).await?;
        let response = self.http.put(&link.href).body(body).send().await?;
        if !response.status().is_success() {
            return Err(storage_error("upload", response).await);
        }

        debug!(remote_path, "Upload complete");
        Ok(())
    }
}
