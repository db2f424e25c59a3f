// src/constants.rs
//
// Centralized constants for lakestore to avoid hardcoded values throughout the codebase

/// Default region used when neither the credentials nor the environment name one.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Content type stamped on every uploaded object (binary data).
pub const BINARY_CONTENT_TYPE: &str = "application/octet-stream";

/// Validity window requested for natively generated presigned URLs (seconds).
pub const PRESIGN_VALIDITY_SECS: u64 = 3600;

/// Staleness cutoff for cached presigned URLs (seconds). Strictly shorter than
/// `PRESIGN_VALIDITY_SECS` so a cached URL is never handed out past its expiry,
/// clock skew included.
pub const PRESIGN_CACHE_TTL_SECS: u64 = 3200;

/// Width of one retry-budget window: the connectivity attempt cap grows by one
/// per elapsed window of provider lifetime (seconds).
pub const RETRY_WINDOW_SECS: u64 = 300;

/// Hard cap on connectivity retry attempts, regardless of provider age.
pub const MAX_RETRY_ATTEMPTS: u32 = 5;

/// Maximum keys per DeleteObjects request (S3 API limit).
pub const DELETE_BATCH_SIZE: usize = 1_000;

/// Concurrent in-flight uploads within one `set_items` batch.
pub const DEFAULT_BATCH_CONCURRENCY: usize = 64;

/// Credential-issuing service endpoint; override with `LAKESTORE_BACKEND_URL`.
pub const DEFAULT_BACKEND_URL: &str = "https://app.lakestore.dev";

/// Connection timeout for the S3 client (seconds).
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Whole-operation timeout for a single S3 call (seconds).
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 120;
