// src/provider.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! The S3 storage provider: one configured binding to a bucket/prefix pair,
//! holding live credentials and the client handle.
//!
//! Every public operation first lets the credential lifecycle check run, then
//! goes through [`S3Provider::execute`], which classifies raw failures and
//! applies the recovery policy: a one-shot refresh-and-retry for credential
//! errors and an age-bounded retry loop for transient connectivity errors.
//!
//! Credential reads and refreshes are mutually exclusive: the credential
//! fields and the live client handle sit behind one mutex, and a refresh
//! swaps the handle inside the critical section so no stale credentials
//! persist in open handles.

use anyhow::{anyhow, Context, Result as AnyResult};
use bytes::Bytes;
use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

use crate::backend::{AccessMode, CredentialBackend, HttpCredentialBackend};
use crate::cache::PresignedUrlCache;
use crate::client::{default_client_factory, ClientFactory, ObjectClient};
use crate::constants::{
    BINARY_CONTENT_TYPE, DEFAULT_BACKEND_URL, DEFAULT_BATCH_CONCURRENCY, PRESIGN_VALIDITY_SECS,
};
use crate::creds::{ClientOptions, CredSource, Credentials};
use crate::error::{ClientError, ErrorClass, Result, StorageError};
use crate::retry::{attempts_for_age, OpKind};
use crate::runtime::run_on_global_rt;
use crate::uri::{join_root, parse_full_url, parse_root, request_prefix};

/// Mutable credential state plus the client handle built from it. Guarded by
/// one mutex; see the module docs.
struct CredState {
    creds: Credentials,
    expiration: Option<String>,
    repository: Option<String>,
    creds_used: Option<CredSource>,
    creds_from_environment: bool,
    client: Arc<dyn ObjectClient>,
}

/// Provider for objects stored under one `s3://bucket/prefix` root.
pub struct S3Provider {
    root: String,
    bucket: String,
    path: String,
    profile: Option<String>,
    token: Option<String>,
    /// `org/dataset` identity the temporary credentials were issued for.
    tag: Option<String>,
    managed_engine: bool,
    read_only: bool,
    options: ClientOptions,
    start_time: Instant,
    backend: Arc<dyn CredentialBackend>,
    factory: ClientFactory,
    url_cache: PresignedUrlCache,
    state: Mutex<CredState>,
}

// -----------------------------------------------------------------------------
// Construction
// -----------------------------------------------------------------------------

pub struct S3ProviderBuilder {
    root: String,
    credentials: Credentials,
    profile: Option<String>,
    token: Option<String>,
    read_only: bool,
    options: ClientOptions,
    backend: Option<Arc<dyn CredentialBackend>>,
    factory: Option<ClientFactory>,
}

impl S3ProviderBuilder {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            credentials: Credentials::default(),
            profile: None,
            token: None,
            read_only: false,
            options: ClientOptions::from_env(),
            backend: None,
            factory: None,
        }
    }

    pub fn credentials(mut self, creds: Credentials) -> Self {
        self.credentials = creds;
        self
    }

    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    /// API token for the credential-issuing service.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    pub fn backend(mut self, backend: Arc<dyn CredentialBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn client_factory(mut self, factory: ClientFactory) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn build(self) -> AnyResult<S3Provider> {
        let (bucket, path) = parse_root(&self.root)?;

        let backend = self.backend.unwrap_or_else(|| {
            let base = std::env::var("LAKESTORE_BACKEND_URL")
                .unwrap_or_else(|_| DEFAULT_BACKEND_URL.to_string());
            Arc::new(HttpCredentialBackend::new(base, self.token.clone()))
        });
        let factory = self.factory.unwrap_or_else(default_client_factory);

        let mut creds = self.credentials;
        let mut creds_from_environment = false;
        let mut creds_used = Some(CredSource::Explicit);
        if creds.is_anonymous() {
            // No explicit key material: discover ambient credentials once so
            // they can be rotated later without re-walking the chain.
            let profile = self.profile.clone();
            let snapshot = creds.clone();
            let discovered = run_on_global_rt(async move {
                crate::creds::discover_environment_credentials(profile.as_deref(), &snapshot)
                    .await
            })?;
            if let Some(found) = discovered {
                creds = found;
            }
            creds_from_environment = true;
            creds_used = Some(CredSource::Environment);
        }

        let client = (factory)(&creds, self.profile.as_deref(), &self.options)?;

        Ok(S3Provider {
            root: self.root,
            bucket,
            path,
            profile: self.profile,
            token: self.token,
            tag: None,
            managed_engine: false,
            read_only: self.read_only,
            options: self.options.clone(),
            start_time: Instant::now(),
            backend,
            factory,
            url_cache: PresignedUrlCache::default(),
            state: Mutex::new(CredState {
                expiration: self.options.expiration_hint,
                repository: None,
                creds_used,
                creds_from_environment,
                creds,
                client,
            }),
        })
    }
}

// -----------------------------------------------------------------------------
// Persisted state
// -----------------------------------------------------------------------------

/// The full persisted field set — nothing derived (bucket, path, live client
/// handles) is part of it; everything derived is recomputed on restore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderState {
    pub root: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub client_config: ClientOptions,
    pub expiration: Option<String>,
    pub managed_engine: bool,
    pub repository: Option<String>,
    pub tag: Option<String>,
    pub token: Option<String>,
    pub creds_from_environment: bool,
    pub read_only: bool,
    pub profile: Option<String>,
    pub creds_used: Option<CredSource>,
}

impl S3Provider {
    // -------------------------------------------------------------------------
    // Credential lifecycle
    // -------------------------------------------------------------------------

    /// If an expiration is tracked, refresh the delegated credentials when
    /// forced or past due. Providers without an expiration hold long-lived
    /// credentials and skip straight through.
    ///
    /// A successful refresh rewrites the credential fields and swaps in a
    /// freshly built client handle. Refresh failures propagate unmodified.
    pub fn ensure_credentials(&self, force: bool) -> AnyResult<()> {
        let mut st = self.state.lock().expect("credential state poisoned");
        let Some(expiration) = st.expiration.clone() else {
            return Ok(());
        };
        let now = chrono::Utc::now().timestamp() as f64;
        let due = expiration.parse::<f64>().map(|e| e < now).unwrap_or(true);
        if !(force || due) {
            return Ok(());
        }

        let tag = self
            .tag
            .clone()
            .context("credentials expired but provider is not bound to a dataset")?;
        let (org_id, dataset) = tag
            .split_once('/')
            .map(|(o, d)| (o.to_owned(), d.to_owned()))
            .context("malformed dataset tag, expected org/dataset")?;
        let mode = if self.read_only { AccessMode::Read } else { AccessMode::Write };
        let managed_engine = self.managed_engine;

        debug!("refreshing delegated credentials for {tag} (force={force})");
        let backend = self.backend.clone();
        let issued = run_on_global_rt(async move {
            backend
                .get_dataset_credentials(&org_id, &dataset, mode, managed_engine, true)
                .await
        })?;

        st.expiration = issued.expiration;
        st.repository = issued.repository;
        st.creds.access_key_id = issued.credentials.access_key_id;
        st.creds.secret_access_key = issued.credentials.secret_access_key;
        st.creds.session_token = issued.credentials.session_token;
        if issued.credentials.region.is_some() {
            st.creds.region = issued.credentials.region;
        }
        st.creds_used = Some(CredSource::Backend);
        st.client = (self.factory)(&st.creds, self.profile.as_deref(), &self.options)?;
        Ok(())
    }

    /// Re-walk the ambient credential chain and rebuild the client handle.
    /// Used by the credential-retry scope when no expiration is tracked.
    fn reload_environment_credentials(&self) -> AnyResult<()> {
        let mut st = self.state.lock().expect("credential state poisoned");
        let profile = self.profile.clone();
        let snapshot = st.creds.clone();
        let discovered = run_on_global_rt(async move {
            crate::creds::discover_environment_credentials(profile.as_deref(), &snapshot).await
        })?;
        if let Some(found) = discovered {
            st.creds = found;
            st.creds_from_environment = true;
            st.creds_used = Some(CredSource::Environment);
        }
        st.client = (self.factory)(&st.creds, self.profile.as_deref(), &self.options)?;
        Ok(())
    }

    /// Entry of the credential-retry scope: forced refresh when an expiration
    /// is tracked, full ambient re-resolution otherwise.
    fn refresh_for_access_error(&self) -> AnyResult<()> {
        let tracked = {
            let st = self.state.lock().expect("credential state poisoned");
            st.expiration.is_some()
        };
        if tracked {
            self.ensure_credentials(true)
        } else {
            self.reload_environment_credentials()
        }
    }

    /// Fast-path hint: the failure is an expired token and the credentials
    /// came from the environment, so a plain chain re-walk may fix it. Only a
    /// hint — it gates no retry behavior beyond the single refresh-and-retry.
    pub fn needs_env_reload(&self, err: &ClientError) -> bool {
        let st = self.state.lock().expect("credential state poisoned");
        st.creds_from_environment && err.message.contains("ExpiredToken")
    }

    fn client_handle(&self) -> Arc<dyn ObjectClient> {
        self.state.lock().expect("credential state poisoned").client.clone()
    }

    // -------------------------------------------------------------------------
    // Resilient execution
    // -------------------------------------------------------------------------

    /// Run one raw operation with classification-driven recovery.
    ///
    /// * missing key → [`StorageError::NotFound`] (GET only), no retry;
    /// * bad credentials → one forced refresh, one re-execution; a second
    ///   failure maps to the operation's access/generic kind;
    /// * connectivity → up to [`attempts_for_age`] re-executions, exhaustion
    ///   wraps the last failure in the operation's generic kind;
    /// * anything else → wrapped immediately.
    fn execute<T>(
        &self,
        op: OpKind,
        target: Option<&str>,
        f: impl Fn(Arc<dyn ObjectClient>) -> std::result::Result<T, ClientError>,
    ) -> Result<T> {
        let err = match f(self.client_handle()) {
            Ok(v) => return Ok(v),
            Err(err) => err,
        };

        match err.class {
            ErrorClass::NoSuchKey if op.missing_key_is_error() => {
                Err(StorageError::NotFound(target.unwrap_or_default().to_owned()))
            }
            ErrorClass::BadCredentials => {
                if self.needs_env_reload(&err) {
                    debug!("{} hit an expired environment token, re-walking the chain", op.name());
                }
                self.refresh_for_access_error()?;
                f(self.client_handle()).map_err(|second| op.access_error(second))
            }
            ErrorClass::Connectivity => {
                let tries = attempts_for_age(self.start_time.elapsed());
                let mut last = err;
                for i in 1..=tries {
                    warn!("Encountered connection error, retry {i} out of {tries}");
                    match f(self.client_handle()) {
                        Ok(v) => {
                            warn!(
                                "Connection re-established after {i} {}.",
                                if i == 1 { "retry" } else { "retries" }
                            );
                            return Ok(v);
                        }
                        Err(e) => last = e,
                    }
                }
                Err(op.generic_error(last))
            }
            _ => Err(op.generic_error(err)),
        }
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Bucket-relative key prefix; always separator-terminated.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    /// Bound to a managed dataset identity (delegated credentials / backend
    /// presigning apply)?
    pub fn is_managed(&self) -> bool {
        self.tag.is_some()
    }

    fn check_readonly(&self) -> Result<()> {
        if self.read_only {
            return Err(StorageError::ReadOnly);
        }
        Ok(())
    }

    fn full_key(&self, path: &str) -> String {
        format!("{}{}", request_prefix(&self.path), path)
    }

    /// Bind this provider to a backend-managed dataset so expired delegated
    /// credentials can be re-issued. `dataset_locator` is the dataset's cloud
    /// path; everything after the scheme is the `org/dataset` tag.
    pub fn bind_dataset(
        &mut self,
        dataset_locator: &str,
        expiration: impl Into<String>,
        managed_engine: bool,
        repository: Option<String>,
    ) {
        let tag = dataset_locator
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(dataset_locator)
            .to_owned();
        self.bind_tag(tag, expiration.into(), managed_engine, repository);
    }

    fn bind_tag(
        &mut self,
        tag: String,
        expiration: String,
        managed_engine: bool,
        repository: Option<String>,
    ) {
        self.tag = Some(tag);
        self.managed_engine = managed_engine;
        let mut st = self.state.lock().expect("credential state poisoned");
        st.expiration = Some(expiration);
        st.repository = repository;
    }

    // -------------------------------------------------------------------------
    // Object operations
    // -------------------------------------------------------------------------

    /// Download the whole object at `path` (relative to the provider root).
    pub fn get(&self, path: &str) -> Result<Bytes> {
        self.get_bytes(path, None, None)
    }

    /// Download `[start_byte, end_byte)` of the object. Either bound may be
    /// open. A zero-width span returns empty bytes without any remote call.
    pub fn get_bytes(
        &self,
        path: &str,
        start_byte: Option<u64>,
        end_byte: Option<u64>,
    ) -> Result<Bytes> {
        if let Some(end) = end_byte {
            // An absent start bound means the object head.
            let start = start_byte.unwrap_or(0);
            if start > end {
                return Err(StorageError::Other(anyhow!(
                    "invalid byte range: start {start} > end {end}"
                )));
            }
            if start == end {
                return Ok(Bytes::new());
            }
        }
        self.ensure_credentials(false)?;

        let bucket = self.bucket.clone();
        let key = self.full_key(path);
        let range = format_range(start_byte, end_byte);
        self.execute(OpKind::Get, Some(path), move |client| {
            let bucket = bucket.clone();
            let key = key.clone();
            let range = range.clone();
            run_client_op(async move { client.get_object(&bucket, &key, range.as_deref()).await })
        })
    }

    /// Download an object addressed by an absolute `s3://bucket/key` locator,
    /// with the same recovery treatment as [`get`](Self::get).
    pub fn get_from_full_url(&self, url: &str) -> Result<Bytes> {
        self.ensure_credentials(false)?;
        let (bucket, key) = parse_full_url(url)?;
        self.execute(OpKind::Get, Some(url), move |client| {
            let bucket = bucket.clone();
            let key = key.clone();
            run_client_op(async move { client.get_object(&bucket, &key, None).await })
        })
    }

    /// Upload `content` at `path`.
    pub fn set(&self, path: &str, content: impl Into<Bytes>) -> Result<()> {
        self.check_readonly()?;
        self.ensure_credentials(false)?;

        let bucket = self.bucket.clone();
        let key = self.full_key(path);
        let content = content.into();
        self.execute(OpKind::Set, None, move |client| {
            let bucket = bucket.clone();
            let key = key.clone();
            let content = content.clone();
            run_client_op(async move {
                client.put_object(&bucket, &key, content, BINARY_CONTENT_TYPE).await
            })
        })
    }

    /// Delete the object at `path`. Missing keys are a silent no-op, matching
    /// the store's own semantics.
    pub fn del(&self, path: &str) -> Result<()> {
        self.check_readonly()?;
        self.ensure_credentials(false)?;

        let bucket = self.bucket.clone();
        let key = self.full_key(path);
        self.execute(OpKind::Delete, None, move |client| {
            let bucket = bucket.clone();
            let key = key.clone();
            run_client_op(async move { client.delete_object(&bucket, &key).await })
        })
    }

    /// Size of the object at `path`, via a HEAD call.
    pub fn object_size(&self, path: &str) -> Result<u64> {
        self.ensure_credentials(false)?;
        let client = self.client_handle();
        let bucket = self.bucket.clone();
        let key = self.full_key(path);
        let target = path.to_owned();
        run_client_op(async move { client.head_size(&bucket, &key).await }).map_err(|e| {
            if e.class == ErrorClass::NoSuchKey {
                StorageError::NotFound(target)
            } else {
                StorageError::Get(e)
            }
        })
    }

    /// Upload many independent objects concurrently as one unit. All puts are
    /// dispatched before any is awaited; the whole batch shares one recovery
    /// scope, so a classified failure re-runs the **entire** batch. There is
    /// no partial-success reporting.
    pub fn set_items(&self, items: HashMap<String, Bytes>) -> Result<()> {
        self.check_readonly()?;
        self.ensure_credentials(false)?;

        let items: Arc<Vec<(String, Bytes)>> = Arc::new(
            items.into_iter().map(|(k, v)| (self.full_key(&k), v)).collect(),
        );
        let bucket = self.bucket.clone();
        self.execute(OpKind::Set, None, move |client| {
            let items = items.clone();
            let bucket = bucket.clone();
            run_client_op(async move {
                let sem = Arc::new(Semaphore::new(DEFAULT_BATCH_CONCURRENCY));
                let mut futs = FuturesUnordered::new();
                for (key, body) in items.iter().cloned() {
                    let sem = sem.clone();
                    let client = client.clone();
                    let bucket = bucket.clone();
                    futs.push(tokio::spawn(async move {
                        let _permit = sem
                            .acquire_owned()
                            .await
                            .map_err(|e| ClientError::other(e.to_string()))?;
                        client.put_object(&bucket, &key, body, BINARY_CONTENT_TYPE).await
                    }));
                }

                // Join the whole group; keep the first classified failure.
                let mut first_err: Option<ClientError> = None;
                while let Some(joined) = futs.next().await {
                    let outcome = match joined {
                        Ok(res) => res,
                        Err(join_err) => Err(ClientError::other(join_err.to_string())),
                    };
                    if let Err(e) = outcome {
                        first_err.get_or_insert(e);
                    }
                }
                match first_err {
                    None => Ok(()),
                    Some(e) => Err(e),
                }
            })
        })
    }

    // -------------------------------------------------------------------------
    // Enumeration, clear, rename
    // -------------------------------------------------------------------------

    /// Lazily iterate the keys under the provider's prefix, prefix-stripped.
    /// Pages are fetched on demand; the iterator is finite and cannot be
    /// restarted.
    pub fn keys(&self) -> Result<KeyIter> {
        self.ensure_credentials(false)?;
        let prefix = request_prefix(&self.path).to_owned();
        Ok(KeyIter {
            client: self.client_handle(),
            bucket: self.bucket.clone(),
            strip: prefix.clone(),
            prefix,
            page: Vec::new().into_iter(),
            next_token: None,
            done: false,
        })
    }

    /// Number of objects under the prefix. Expensive: consumes a full
    /// enumeration, one round trip per listing page.
    pub fn len(&self) -> Result<usize> {
        let mut n = 0;
        for key in self.keys()? {
            key?;
            n += 1;
        }
        Ok(n)
    }

    pub fn is_empty(&self) -> Result<bool> {
        for key in self.keys()? {
            key?;
            return Ok(false);
        }
        Ok(true)
    }

    /// Delete every object whose key starts with the provider's prefix plus
    /// `prefix` (all of the provider's objects when `None`), using the bulk
    /// delete capability. Runs under the credential-retry scope only; bulk
    /// delete failures surface as [`StorageError::Deletion`] without the
    /// connectivity loop.
    pub fn clear(&self, prefix: Option<&str>) -> Result<()> {
        self.check_readonly()?;
        self.ensure_credentials(false)?;

        let full_prefix = match prefix {
            Some(p) => format!("{}{}", request_prefix(&self.path), p),
            None => request_prefix(&self.path).to_owned(),
        };
        let bucket = self.bucket.clone();

        let sweep = |client: Arc<dyn ObjectClient>| {
            let bucket = bucket.clone();
            let prefix = full_prefix.clone();
            run_client_op(async move {
                let keys = collect_keys(&*client, &bucket, &prefix).await?;
                if keys.is_empty() {
                    return Ok(());
                }
                client.delete_objects(&bucket, &keys).await
            })
        };

        match sweep(self.client_handle()) {
            Ok(()) => Ok(()),
            Err(first) => {
                debug!("clear sweep failed ({first}), refreshing credentials and retrying once");
                self.refresh_for_access_error()?;
                sweep(self.client_handle()).map_err(StorageError::Deletion)
            }
        }
    }

    /// Move every object under the current prefix to `new_root` and point the
    /// provider there.
    ///
    /// Aborts with [`StorageError::PathNotEmpty`] before any mutation when the
    /// destination prefix already holds an object. **Not atomic**: a failure
    /// mid-sweep leaves some keys copied and others not, with no rollback.
    pub fn rename(&mut self, new_root: &str) -> Result<()> {
        self.check_readonly()?;
        self.ensure_credentials(false)?;

        let (new_bucket, new_path) = parse_root(new_root)?;
        if new_bucket != self.bucket {
            return Err(StorageError::Other(anyhow!(
                "rename cannot cross buckets: {} -> {}",
                self.bucket,
                new_bucket
            )));
        }

        let client = self.client_handle();
        let bucket = self.bucket.clone();
        let src_prefix = request_prefix(&self.path).to_owned();
        let dst_prefix = request_prefix(&new_path).to_owned();

        // Enumerate the source, then probe the destination before mutating.
        let src_keys = {
            let client = client.clone();
            let bucket = bucket.clone();
            let prefix = src_prefix.clone();
            run_client_op(async move { collect_keys(&*client, &bucket, &prefix).await })
                .map_err(StorageError::List)?
        };
        let dst_page = {
            let client = client.clone();
            let bucket = bucket.clone();
            let prefix = dst_prefix.clone();
            run_client_op(async move { client.list_page(&bucket, &prefix, None).await })
                .map_err(StorageError::List)?
        };
        if !dst_page.keys.is_empty() {
            return Err(StorageError::PathNotEmpty(new_path));
        }

        for src_key in src_keys {
            let rel = src_key.strip_prefix(&src_prefix).unwrap_or(&src_key).to_owned();
            let dst_key = format!("{dst_prefix}{rel}");
            let client = client.clone();
            let bucket = bucket.clone();
            run_client_op(async move {
                client.copy_object(&bucket, &src_key, &dst_key).await?;
                client.delete_object(&bucket, &src_key).await
            })
            .map_err(|e| StorageError::Other(e.into()))?;
        }

        self.root = new_root.to_owned();
        self.path = new_path;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Presigned URLs
    // -------------------------------------------------------------------------

    /// A time-limited download URL for `key`. Cached per resolved path until
    /// the cache TTL passes; managed datasets get their URL from the backend,
    /// everything else from the store's native signer.
    pub fn presigned_url(&self, key: &str, full: bool) -> Result<String> {
        self.ensure_credentials(false)?;

        let (bucket, path) = if full {
            parse_full_url(key)?
        } else {
            (self.bucket.clone(), self.full_key(key))
        };

        if let Some(url) = self.url_cache.get(&path) {
            return Ok(url);
        }

        let url = if let Some(tag) = self.tag.clone() {
            let (org_id, dataset) = tag
                .split_once('/')
                .map(|(o, d)| (o.to_owned(), d.to_owned()))
                .context("malformed dataset tag, expected org/dataset")?;
            let backend = self.backend.clone();
            let key = key.to_owned();
            run_on_global_rt(async move {
                backend.get_presigned_url(&org_id, &dataset, &key).await
            })?
        } else {
            let client = self.client_handle();
            let bucket = bucket.clone();
            let sign_path = path.clone();
            run_client_op(async move {
                client
                    .presign_get(&bucket, &sign_path, Duration::from_secs(PRESIGN_VALIDITY_SECS))
                    .await
            })
            .map_err(StorageError::Get)?
        };

        self.url_cache.insert(&path, url.clone());
        Ok(url)
    }

    // -------------------------------------------------------------------------
    // Scoping and persistence
    // -------------------------------------------------------------------------

    /// A child provider rooted at a sub-path, sharing credential material and
    /// seams with its parent. The child's retry-age clock starts fresh.
    pub fn subdir(&self, path: &str, read_only: bool) -> AnyResult<S3Provider> {
        let (creds, expiration, repository, creds_used) = {
            let st = self.state.lock().expect("credential state poisoned");
            (st.creds.clone(), st.expiration.clone(), st.repository.clone(), st.creds_used)
        };

        let mut builder = S3ProviderBuilder::new(join_root(&self.root, path))
            .credentials(creds)
            .read_only(read_only)
            .options(self.options.clone())
            .backend(self.backend.clone())
            .client_factory(self.factory.clone());
        if let Some(profile) = &self.profile {
            builder = builder.profile(profile.clone());
        }
        if let Some(token) = &self.token {
            builder = builder.token(token.clone());
        }
        let mut child = builder.build()?;

        if let (Some(tag), Some(expiration)) = (self.tag.clone(), expiration) {
            child.bind_tag(tag, expiration, self.managed_engine, repository);
        }
        {
            let mut st = child.state.lock().expect("credential state poisoned");
            st.creds_used = creds_used;
        }
        Ok(child)
    }

    /// Snapshot the persisted field set.
    pub fn snapshot(&self) -> ProviderState {
        let st = self.state.lock().expect("credential state poisoned");
        ProviderState {
            root: self.root.clone(),
            access_key_id: st.creds.access_key_id.clone(),
            secret_access_key: st.creds.secret_access_key.clone(),
            session_token: st.creds.session_token.clone(),
            region: st.creds.region.clone(),
            endpoint_url: st.creds.endpoint_url.clone(),
            client_config: self.options.clone(),
            expiration: st.expiration.clone(),
            managed_engine: self.managed_engine,
            repository: st.repository.clone(),
            tag: self.tag.clone(),
            token: self.token.clone(),
            creds_from_environment: st.creds_from_environment,
            read_only: self.read_only,
            profile: self.profile.clone(),
            creds_used: st.creds_used,
        }
    }

    /// Rebuild a provider from a snapshot: bucket/path re-derived, a fresh
    /// client handle built, and the retry-age clock reset to now.
    pub fn restore(
        state: ProviderState,
        backend: Arc<dyn CredentialBackend>,
        factory: ClientFactory,
    ) -> AnyResult<S3Provider> {
        let (bucket, path) = parse_root(&state.root)?;
        let creds = Credentials {
            access_key_id: state.access_key_id,
            secret_access_key: state.secret_access_key,
            session_token: state.session_token,
            region: state.region,
            endpoint_url: state.endpoint_url,
        };
        let client = (factory)(&creds, state.profile.as_deref(), &state.client_config)?;

        Ok(S3Provider {
            root: state.root,
            bucket,
            path,
            profile: state.profile,
            token: state.token,
            tag: state.tag,
            managed_engine: state.managed_engine,
            read_only: state.read_only,
            options: state.client_config,
            start_time: Instant::now(),
            backend,
            factory,
            url_cache: PresignedUrlCache::default(),
            state: Mutex::new(CredState {
                creds,
                expiration: state.expiration,
                repository: state.repository,
                creds_used: state.creds_used,
                creds_from_environment: state.creds_from_environment,
                client,
            }),
        })
    }

    /// Age of this provider instance; drives the connectivity attempt cap.
    pub fn age(&self) -> Duration {
        self.start_time.elapsed()
    }
}

// -----------------------------------------------------------------------------
// Key enumeration
// -----------------------------------------------------------------------------

/// Lazy, non-restartable iterator over the keys below a prefix. One listing
/// page is in memory at a time; the next page is requested only once the
/// current one is exhausted.
pub struct KeyIter {
    client: Arc<dyn ObjectClient>,
    bucket: String,
    prefix: String,
    strip: String,
    page: std::vec::IntoIter<String>,
    next_token: Option<String>,
    done: bool,
}

impl Iterator for KeyIter {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(key) = self.page.next() {
                let rel = key.strip_prefix(&self.strip).unwrap_or(&key).to_owned();
                return Some(Ok(rel));
            }
            if self.done {
                return None;
            }

            let client = self.client.clone();
            let bucket = self.bucket.clone();
            let prefix = self.prefix.clone();
            let token = self.next_token.clone();
            let page = run_client_op(async move {
                client.list_page(&bucket, &prefix, token.as_deref()).await
            });
            match page {
                Ok(page) => {
                    self.next_token = page.next_token;
                    self.done = self.next_token.is_none();
                    self.page = page.keys.into_iter();
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(StorageError::List(e)));
                }
            }
        }
    }
}

// -----------------------------------------------------------------------------
// Helpers
// -----------------------------------------------------------------------------

/// Block on one raw client future; runtime-level failures count as Other.
fn run_client_op<T: Send + 'static>(
    fut: impl std::future::Future<Output = std::result::Result<T, ClientError>> + Send + 'static,
) -> std::result::Result<T, ClientError> {
    match run_on_global_rt(async move { Ok(fut.await) }) {
        Ok(inner) => inner,
        Err(e) => Err(ClientError::other(format!("runtime failure: {e}"))),
    }
}

/// Drain the paginated listing below `prefix` into a key vector.
async fn collect_keys(
    client: &dyn ObjectClient,
    bucket: &str,
    prefix: &str,
) -> std::result::Result<Vec<String>, ClientError> {
    let mut keys = Vec::new();
    let mut token: Option<String> = None;
    loop {
        let page = client.list_page(bucket, prefix, token.as_deref()).await?;
        keys.extend(page.keys);
        match page.next_token {
            Some(t) => token = Some(t),
            None => return Ok(keys),
        }
    }
}

fn format_range(start: Option<u64>, end: Option<u64>) -> Option<String> {
    match (start, end) {
        (Some(start), Some(end)) => Some(format!("bytes={}-{}", start, end - 1)),
        (Some(start), None) => Some(format!("bytes={start}-")),
        (None, Some(end)) => Some(format!("bytes=0-{}", end - 1)),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_header_formatting() {
        assert_eq!(format_range(Some(0), Some(10)).as_deref(), Some("bytes=0-9"));
        assert_eq!(format_range(Some(5), None).as_deref(), Some("bytes=5-"));
        assert_eq!(format_range(None, Some(4)).as_deref(), Some("bytes=0-3"));
        assert_eq!(format_range(None, None), None);
    }
}
