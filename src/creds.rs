// src/creds.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! Credential material, its provenance marker, and ambient (environment /
//! profile) discovery through the AWS default provider chain.
//!
//! Credentials with an `expiration` set are temporary, backend-issued ones;
//! permanent credentials never set it.

use anyhow::Result;
use aws_credential_types::provider::ProvideCredentials;
use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_REGION;

/// Which source produced the credentials currently in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredSource {
    /// Passed explicitly at construction.
    Explicit,
    /// Discovered from the environment / shared profile chain.
    Environment,
    /// Issued by the credential backend for a managed dataset.
    Backend,
}

/// Credential material plus the client-level overrides that travel with it.
/// All key fields optional; absence means "use ambient/default resolution".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
}

impl Credentials {
    pub fn region_or_default(&self) -> &str {
        self.region.as_deref().unwrap_or(DEFAULT_REGION)
    }

    /// True when no explicit key material was supplied.
    pub fn is_anonymous(&self) -> bool {
        self.access_key_id.is_none() && self.secret_access_key.is_none()
    }
}

/// Client-level knobs that are not credential material. An explicit struct
/// rather than an open-ended option bag; every field has a default and a
/// `LAKESTORE_*` environment override.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    pub connect_timeout_secs: u64,
    pub operation_timeout_secs: u64,
    pub force_path_style: bool,
    /// Hint carried from construction kwargs; never read back after the
    /// provider adopts it as its live expiration.
    pub expiration_hint: Option<String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout_secs: crate::constants::DEFAULT_CONNECT_TIMEOUT_SECS,
            operation_timeout_secs: crate::constants::DEFAULT_OPERATION_TIMEOUT_SECS,
            force_path_style: true,
            expiration_hint: None,
        }
    }
}

impl ClientOptions {
    /// Defaults overridden by `LAKESTORE_CONNECT_TIMEOUT_SECS` /
    /// `LAKESTORE_OPERATION_TIMEOUT_SECS`. Loads `.env` first so the vars are
    /// visible.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let mut opts = Self::default();
        if let Some(v) = env_u64("LAKESTORE_CONNECT_TIMEOUT_SECS") {
            opts.connect_timeout_secs = v;
        }
        if let Some(v) = env_u64("LAKESTORE_OPERATION_TIMEOUT_SECS") {
            opts.operation_timeout_secs = v;
        }
        opts
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

/// Resolve ambient credentials through the profile-aware AWS default chain.
///
/// Returns `None` when the chain produced nothing, in which case the caller
/// keeps whatever it had (the SDK default resolution still applies at client
/// build time). The resolved region replaces `current.region` only when the
/// latter is unset.
pub async fn discover_environment_credentials(
    profile: Option<&str>,
    current: &Credentials,
) -> Result<Option<Credentials>> {
    dotenvy::dotenv().ok();

    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
    if let Some(profile) = profile {
        loader = loader.profile_name(profile);
    }
    let cfg = loader.load().await;

    let Some(provider) = cfg.credentials_provider() else {
        return Ok(None);
    };
    let resolved = match provider.provide_credentials().await {
        Ok(c) => c,
        // An empty chain is not an error for us; explicit resolution happens
        // again when the client is built.
        Err(e) => {
            log::debug!("environment credential discovery found nothing: {e}");
            return Ok(None);
        }
    };

    let region = current
        .region
        .clone()
        .or_else(|| cfg.region().map(|r| r.to_string()));

    Ok(Some(Credentials {
        access_key_id: Some(resolved.access_key_id().to_string()),
        secret_access_key: Some(resolved.secret_access_key().to_string()),
        session_token: resolved.session_token().map(|t| t.to_string()),
        region,
        endpoint_url: current.endpoint_url.clone(),
    }))
}
