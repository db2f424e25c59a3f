// tests/common/mod.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
// Shared scripted fakes: an in-memory object client with a failure queue and
// call counters, plus a counting credential backend. No test in this suite
// touches the network.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use lakestore::{
    AccessMode, ClientError, ClientFactory, CredentialBackend, Credentials, DatasetCredentials,
    ErrorClass, ListingPage, ObjectClient, S3Provider, S3ProviderBuilder,
};

/// Unix timestamp comfortably in the future, as the stringly encoding the
/// credential service uses.
pub fn far_future() -> String {
    (chrono::Utc::now().timestamp() + 100_000).to_string()
}

pub fn explicit_creds() -> Credentials {
    Credentials {
        access_key_id: Some("AKIAMOCK".into()),
        secret_access_key: Some("mock-secret".into()),
        session_token: None,
        region: Some("us-east-1".into()),
        endpoint_url: None,
    }
}

// -----------------------------------------------------------------------------
// Object client fake
// -----------------------------------------------------------------------------

/// In-memory [`ObjectClient`]. Each call first pops the shared failure queue;
/// a popped error is returned instead of executing, so tests can script
/// exact failure sequences.
pub struct MockClient {
    objects: Mutex<BTreeMap<String, Bytes>>,
    fail_queue: Mutex<VecDeque<ClientError>>,
    page_size: usize,

    pub get_calls: AtomicU32,
    pub put_calls: AtomicU32,
    pub delete_calls: AtomicU32,
    pub bulk_delete_calls: AtomicU32,
    pub list_calls: AtomicU32,
    pub copy_calls: AtomicU32,
    pub presign_calls: AtomicU32,
    pub head_calls: AtomicU32,

    /// Range header of every GET, in call order.
    pub ranges: Mutex<Vec<Option<String>>>,
}

impl MockClient {
    pub fn new() -> Arc<Self> {
        Self::with_page_size(1_000)
    }

    /// Small pages force the listing iterator to paginate.
    pub fn with_page_size(page_size: usize) -> Arc<Self> {
        Arc::new(Self {
            objects: Mutex::new(BTreeMap::new()),
            fail_queue: Mutex::new(VecDeque::new()),
            page_size,
            get_calls: AtomicU32::new(0),
            put_calls: AtomicU32::new(0),
            delete_calls: AtomicU32::new(0),
            bulk_delete_calls: AtomicU32::new(0),
            list_calls: AtomicU32::new(0),
            copy_calls: AtomicU32::new(0),
            presign_calls: AtomicU32::new(0),
            head_calls: AtomicU32::new(0),
            ranges: Mutex::new(Vec::new()),
        })
    }

    pub fn insert(&self, key: &str, body: &[u8]) {
        self.objects.lock().unwrap().insert(key.to_owned(), Bytes::copy_from_slice(body));
    }

    pub fn has(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    /// Queue one failure; the next client call (whatever it is) returns it.
    pub fn fail_next(&self, err: ClientError) {
        self.fail_queue.lock().unwrap().push_back(err);
    }

    fn pop_failure(&self) -> Result<(), ClientError> {
        match self.fail_queue.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn missing(key: &str) -> ClientError {
        ClientError::new(ErrorClass::NoSuchKey, format!("NoSuchKey: {key}"))
    }
}

#[async_trait]
impl ObjectClient for MockClient {
    async fn get_object(
        &self,
        _bucket: &str,
        key: &str,
        range: Option<&str>,
    ) -> Result<Bytes, ClientError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.ranges.lock().unwrap().push(range.map(|r| r.to_owned()));
        self.pop_failure()?;
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| Self::missing(key))
    }

    async fn put_object(
        &self,
        _bucket: &str,
        key: &str,
        body: Bytes,
        _content_type: &str,
    ) -> Result<(), ClientError> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        self.pop_failure()?;
        self.objects.lock().unwrap().insert(key.to_owned(), body);
        Ok(())
    }

    async fn delete_object(&self, _bucket: &str, key: &str) -> Result<(), ClientError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.pop_failure()?;
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn delete_objects(&self, _bucket: &str, keys: &[String]) -> Result<(), ClientError> {
        self.bulk_delete_calls.fetch_add(1, Ordering::SeqCst);
        self.pop_failure()?;
        let mut objects = self.objects.lock().unwrap();
        for key in keys {
            objects.remove(key);
        }
        Ok(())
    }

    async fn list_page(
        &self,
        _bucket: &str,
        prefix: &str,
        token: Option<&str>,
    ) -> Result<ListingPage, ClientError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.pop_failure()?;

        let matching: Vec<String> = self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        let offset: usize = token.and_then(|t| t.parse().ok()).unwrap_or(0);
        let keys: Vec<String> =
            matching.iter().skip(offset).take(self.page_size).cloned().collect();
        let next = offset + keys.len();
        let next_token = (next < matching.len()).then(|| next.to_string());
        Ok(ListingPage { keys, next_token })
    }

    async fn copy_object(
        &self,
        _bucket: &str,
        src_key: &str,
        dst_key: &str,
    ) -> Result<(), ClientError> {
        self.copy_calls.fetch_add(1, Ordering::SeqCst);
        self.pop_failure()?;
        let mut objects = self.objects.lock().unwrap();
        let body = objects.get(src_key).cloned().ok_or_else(|| Self::missing(src_key))?;
        objects.insert(dst_key.to_owned(), body);
        Ok(())
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        _ttl: std::time::Duration,
    ) -> Result<String, ClientError> {
        let n = self.presign_calls.fetch_add(1, Ordering::SeqCst);
        self.pop_failure()?;
        Ok(format!("https://mock.s3/{bucket}/{key}?sig={n}"))
    }

    async fn head_size(&self, _bucket: &str, key: &str) -> Result<u64, ClientError> {
        self.head_calls.fetch_add(1, Ordering::SeqCst);
        self.pop_failure()?;
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|b| b.len() as u64)
            .ok_or_else(|| Self::missing(key))
    }
}

// -----------------------------------------------------------------------------
// Credential backend fake
// -----------------------------------------------------------------------------

pub struct MockBackend {
    pub refresh_calls: AtomicU32,
    pub presign_calls: AtomicU32,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            refresh_calls: AtomicU32::new(0),
            presign_calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl CredentialBackend for MockBackend {
    async fn get_dataset_credentials(
        &self,
        org_id: &str,
        dataset_name: &str,
        _mode: AccessMode,
        _managed_engine: bool,
        _force_refresh: bool,
    ) -> anyhow::Result<DatasetCredentials> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        Ok(DatasetCredentials {
            storage_url: format!("s3://bucket/{org_id}/{dataset_name}"),
            credentials: Credentials {
                access_key_id: Some("refreshed-key".into()),
                secret_access_key: Some("refreshed-secret".into()),
                session_token: Some("refreshed-token".into()),
                region: None,
                endpoint_url: None,
            },
            mode: "a".into(),
            expiration: Some(far_future()),
            repository: None,
        })
    }

    async fn get_presigned_url(
        &self,
        org_id: &str,
        dataset_name: &str,
        key: &str,
    ) -> anyhow::Result<String> {
        self.presign_calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("https://backend.example/presign/{org_id}/{dataset_name}/{key}"))
    }
}

// -----------------------------------------------------------------------------
// Harness
// -----------------------------------------------------------------------------

pub fn counting_factory(client: Arc<MockClient>, builds: Arc<AtomicU32>) -> ClientFactory {
    Arc::new(move |_creds, _profile, _opts| {
        builds.fetch_add(1, Ordering::SeqCst);
        Ok(client.clone() as Arc<dyn ObjectClient>)
    })
}

/// One mock client + backend pair and a provider builder wired to them.
pub struct Harness {
    pub client: Arc<MockClient>,
    pub backend: Arc<MockBackend>,
    /// Client handle rebuilds: 1 at construction, +1 per credential refresh.
    pub builds: Arc<AtomicU32>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_page_size(1_000)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            client: MockClient::with_page_size(page_size),
            backend: MockBackend::new(),
            builds: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn builder(&self, root: &str) -> S3ProviderBuilder {
        S3ProviderBuilder::new(root)
            .credentials(explicit_creds())
            .backend(self.backend.clone())
            .client_factory(counting_factory(self.client.clone(), self.builds.clone()))
    }

    pub fn provider(&self, root: &str) -> S3Provider {
        self.builder(root).build().unwrap()
    }

    /// A provider bound to a managed dataset, so credential refreshes go
    /// through the backend fake.
    pub fn managed_provider(&self, root: &str) -> S3Provider {
        let mut provider = self.provider(root);
        provider.bind_dataset("lake://acme/imagenet", far_future(), false, None);
        provider
    }

    pub fn rebuilds(&self) -> u32 {
        self.builds.load(Ordering::SeqCst)
    }
}
