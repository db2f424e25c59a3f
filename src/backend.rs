// src/backend.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! Client for the remote credential-issuing service.
//!
//! Datasets managed by the backend get short-lived delegated credentials; the
//! provider asks this service for a fresh set whenever the tracked expiration
//! passes (or a forced refresh is requested) and for presigned URLs on
//! managed datasets. Failures here propagate to the caller unmodified — the
//! retry policy around object-store calls does not apply to this RPC.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::creds::Credentials;

/// Access mode requested along with delegated credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

impl AccessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMode::Read => "r",
            AccessMode::Write => "a",
        }
    }
}

/// Credentials and metadata issued for one dataset.
#[derive(Debug, Clone, Deserialize)]
pub struct DatasetCredentials {
    /// Root locator of the dataset's storage.
    pub storage_url: String,
    pub credentials: Credentials,
    /// Mode the backend actually granted (may be narrower than requested).
    pub mode: String,
    /// Unix timestamp (stringly encoded) after which the credentials are dead.
    pub expiration: Option<String>,
    /// Backend repository the dataset lives in.
    pub repository: Option<String>,
}

/// The issuing service, seen as a plain RPC endpoint.
#[async_trait]
pub trait CredentialBackend: Send + Sync {
    async fn get_dataset_credentials(
        &self,
        org_id: &str,
        dataset_name: &str,
        mode: AccessMode,
        managed_engine: bool,
        force_refresh: bool,
    ) -> Result<DatasetCredentials>;

    async fn get_presigned_url(
        &self,
        org_id: &str,
        dataset_name: &str,
        key: &str,
    ) -> Result<String>;
}

/// HTTP implementation speaking JSON, authenticated with the API token.
pub struct HttpCredentialBackend {
    base_url: String,
    token: Option<String>,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct PresignResponse {
    url: String,
}

impl HttpCredentialBackend {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token,
            http: reqwest::Client::new(),
        }
    }

    fn request(&self, url: String) -> reqwest::RequestBuilder {
        let mut req = self.http.get(url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        req
    }
}

#[async_trait]
impl CredentialBackend for HttpCredentialBackend {
    async fn get_dataset_credentials(
        &self,
        org_id: &str,
        dataset_name: &str,
        mode: AccessMode,
        managed_engine: bool,
        force_refresh: bool,
    ) -> Result<DatasetCredentials> {
        let url = format!(
            "{}/api/org/{org_id}/ds/{dataset_name}/credentials",
            self.base_url
        );
        let resp = self
            .request(url)
            .query(&[
                ("mode", mode.as_str()),
                ("db_engine", if managed_engine { "true" } else { "false" }),
                ("force", if force_refresh { "true" } else { "false" }),
            ])
            .send()
            .await
            .context("credential backend unreachable")?
            .error_for_status()
            .context("credential backend refused the request")?;

        resp.json::<DatasetCredentials>()
            .await
            .context("malformed credential response")
    }

    async fn get_presigned_url(
        &self,
        org_id: &str,
        dataset_name: &str,
        key: &str,
    ) -> Result<String> {
        let url = format!(
            "{}/api/org/{org_id}/ds/{dataset_name}/presign",
            self.base_url
        );
        let resp = self
            .request(url)
            .query(&[("key", key)])
            .send()
            .await
            .context("credential backend unreachable")?
            .error_for_status()
            .context("credential backend refused the request")?;

        Ok(resp.json::<PresignResponse>().await.context("malformed presign response")?.url)
    }
}
