// src/client.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! The object-store capability: a pluggable async trait covering the raw
//! primitives (get/put/delete/list/copy/presign/head) plus the AWS SDK
//! implementation and its error classification.
//!
//! The provider never talks to the SDK directly; it goes through
//! [`ObjectClient`] so credential refreshes can atomically swap the live
//! handle and tests can substitute a scripted fake.

use anyhow::Result;
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::timeout::TimeoutConfig;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

use crate::constants::{DEFAULT_REGION, DELETE_BATCH_SIZE};
use crate::creds::{ClientOptions, Credentials};
use crate::error::{ClientError, ErrorClass};
use crate::runtime::run_on_global_rt;

/// One page of a paginated listing, plus the opaque token for the next one.
#[derive(Debug, Clone, Default)]
pub struct ListingPage {
    pub keys: Vec<String>,
    pub next_token: Option<String>,
}

/// Raw object-store primitives. Errors carry a machine-readable
/// [`ErrorClass`]; recovery policy lives entirely in the provider.
#[async_trait]
pub trait ObjectClient: Send + Sync {
    /// Download an object, optionally restricted to an HTTP byte-range.
    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<&str>,
    ) -> Result<Bytes, ClientError>;

    /// Upload one object with the given content type.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), ClientError>;

    /// Delete one object. Object stores no-op silently on missing keys.
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), ClientError>;

    /// Bulk delete. The default implementation walks the keys one by one;
    /// backends with a server-side filtered delete override it.
    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<(), ClientError> {
        for key in keys {
            self.delete_object(bucket, key).await?;
        }
        Ok(())
    }

    /// Fetch one listing page under `prefix`, resuming from `token`.
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        token: Option<&str>,
    ) -> Result<ListingPage, ClientError>;

    /// Server-side copy within one bucket.
    async fn copy_object(
        &self,
        bucket: &str,
        src_key: &str,
        dst_key: &str,
    ) -> Result<(), ClientError>;

    /// Generate a time-limited download URL.
    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<String, ClientError>;

    /// HEAD the object and return its content length.
    async fn head_size(&self, bucket: &str, key: &str) -> Result<u64, ClientError>;
}

/// Builds a fresh client handle from the current credential set. The
/// provider calls it at construction and after every credential refresh so
/// no stale credentials persist in open handles.
pub type ClientFactory = Arc<
    dyn Fn(&Credentials, Option<&str>, &ClientOptions) -> Result<Arc<dyn ObjectClient>>
        + Send
        + Sync,
>;

/// The production factory: blocks on an AWS SDK client build.
pub fn default_client_factory() -> ClientFactory {
    Arc::new(|creds, profile, opts| {
        let creds = creds.clone();
        let profile = profile.map(|p| p.to_owned());
        let opts = opts.clone();
        let client = run_on_global_rt(async move {
            S3ObjectClient::connect(&creds, profile.as_deref(), &opts).await
        })?;
        Ok(Arc::new(client) as Arc<dyn ObjectClient>)
    })
}

// -----------------------------------------------------------------------------
// Error classification
// -----------------------------------------------------------------------------

/// Map an SDK failure onto our error classes. Transport-level failures
/// (timeouts, dispatch failures, broken responses) are connectivity; service
/// codes distinguish missing keys from credential problems.
fn classify_sdk_error<E>(err: SdkError<E>) -> ClientError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let class = match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            ErrorClass::Connectivity
        }
        _ => match err.code() {
            Some("NoSuchKey") | Some("NotFound") => ErrorClass::NoSuchKey,
            Some("InvalidAccessKeyId") | Some("ExpiredToken") | Some("InvalidToken") => {
                ErrorClass::BadCredentials
            }
            _ => ErrorClass::Other,
        },
    };
    ClientError::new(class, format!("{}", DisplayErrorContext(&err)))
}

/// A failure while draining a response body is a mid-stream read failure,
/// which counts as connectivity.
fn body_error(err: impl std::fmt::Display) -> ClientError {
    ClientError::new(ErrorClass::Connectivity, format!("body read failed: {err}"))
}

// -----------------------------------------------------------------------------
// AWS SDK implementation
// -----------------------------------------------------------------------------

/// [`ObjectClient`] over `aws-sdk-s3`.
pub struct S3ObjectClient {
    client: aws_sdk_s3::Client,
}

impl S3ObjectClient {
    /// Build a client from explicit credentials, or the ambient default chain
    /// (profile-aware) when no key material is present.
    pub async fn connect(
        creds: &Credentials,
        profile: Option<&str>,
        opts: &ClientOptions,
    ) -> Result<Self> {
        dotenvy::dotenv().ok();

        let timeout_config = TimeoutConfig::builder()
            .connect_timeout(Duration::from_secs(opts.connect_timeout_secs))
            .operation_timeout(Duration::from_secs(opts.operation_timeout_secs))
            .build();

        let region = RegionProviderChain::first_try(creds.region.clone().map(Region::new))
            .or_default_provider()
            .or_else(Region::new(DEFAULT_REGION));

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(region)
            .timeout_config(timeout_config);

        match (&creds.access_key_id, &creds.secret_access_key) {
            (Some(access_key), Some(secret_key)) => {
                loader = loader.credentials_provider(aws_credential_types::Credentials::new(
                    access_key.clone(),
                    secret_key.clone(),
                    creds.session_token.clone(),
                    None,
                    "lakestore-static-credentials",
                ));
            }
            _ => {
                if let Some(profile) = profile {
                    loader = loader.profile_name(profile);
                }
            }
        }

        if let Some(endpoint) = &creds.endpoint_url {
            if !endpoint.is_empty() {
                loader = loader.endpoint_url(endpoint);
            }
        }

        let cfg = loader.load().await;

        // Path-style addressing: required for S3-compatible services
        // (MinIO, Ceph, etc.) behind custom endpoints.
        let s3_config = aws_sdk_s3::config::Builder::from(&cfg)
            .force_path_style(opts.force_path_style)
            .build();

        Ok(Self { client: aws_sdk_s3::Client::from_conf(s3_config) })
    }
}

#[async_trait]
impl ObjectClient for S3ObjectClient {
    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<&str>,
    ) -> Result<Bytes, ClientError> {
        let mut req = self.client.get_object().bucket(bucket).key(key);
        if let Some(range) = range {
            req = req.range(range);
        }
        let resp = req.send().await.map_err(classify_sdk_error)?;
        let body = resp.body.collect().await.map_err(body_error)?;
        Ok(body.into_bytes())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), ClientError> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(classify_sdk_error)?;
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), ClientError> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(classify_sdk_error)?;
        Ok(())
    }

    /// Batched DeleteObjects, 1 000 keys per call.
    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<(), ClientError> {
        use aws_sdk_s3::types::{Delete, ObjectIdentifier};

        for chunk in keys.chunks(DELETE_BATCH_SIZE) {
            let objs: Vec<ObjectIdentifier> = chunk
                .iter()
                .map(|k| {
                    ObjectIdentifier::builder()
                        .key(k)
                        .build()
                        .map_err(|e| ClientError::other(e.to_string()))
                })
                .collect::<Result<_, _>>()?;

            let delete = Delete::builder()
                .set_objects(Some(objs))
                .build()
                .map_err(|e| ClientError::other(e.to_string()))?;

            self.client
                .delete_objects()
                .bucket(bucket)
                .delete(delete)
                .send()
                .await
                .map_err(classify_sdk_error)?;
        }
        Ok(())
    }

    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        token: Option<&str>,
    ) -> Result<ListingPage, ClientError> {
        let mut req = self.client.list_objects_v2().bucket(bucket).prefix(prefix);
        if let Some(token) = token {
            req = req.continuation_token(token);
        }
        let resp = req.send().await.map_err(classify_sdk_error)?;

        let keys = resp
            .contents()
            .iter()
            .filter_map(|obj| obj.key().map(|k| k.to_owned()))
            .collect();
        Ok(ListingPage {
            keys,
            next_token: resp.next_continuation_token().map(|t| t.to_owned()),
        })
    }

    async fn copy_object(
        &self,
        bucket: &str,
        src_key: &str,
        dst_key: &str,
    ) -> Result<(), ClientError> {
        let copy_source = format!("{bucket}/{src_key}");
        self.client
            .copy_object()
            .copy_source(&copy_source)
            .bucket(bucket)
            .key(dst_key)
            .send()
            .await
            .map_err(classify_sdk_error)?;
        Ok(())
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<String, ClientError> {
        let config = aws_sdk_s3::presigning::PresigningConfig::builder()
            .expires_in(ttl)
            .build()
            .map_err(|e| ClientError::other(format!("presign config: {e}")))?;

        let request = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(config)
            .await
            .map_err(classify_sdk_error)?;

        Ok(request.uri().to_string())
    }

    async fn head_size(&self, bucket: &str, key: &str) -> Result<u64, ClientError> {
        let resp = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| match &e {
                SdkError::ServiceError(se) if se.err().is_not_found() => ClientError::new(
                    ErrorClass::NoSuchKey,
                    format!("{}", DisplayErrorContext(&e)),
                ),
                _ => classify_sdk_error(e),
            })?;
        Ok(resp.content_length().unwrap_or(0) as u64)
    }
}
