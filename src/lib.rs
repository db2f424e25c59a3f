// src/lib.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! lakestore: resilient access layer for S3-compatible object stores.
//!
//! The crate binds one `s3://bucket/prefix` root to an [`S3Provider`] whose
//! operations survive credential expiry and transient connectivity loss:
//! failures are classified, credentials are refreshed in place (from the
//! environment or from the managed credential backend), and interrupted
//! transfers are retried under an age-scaled attempt budget. Presigned
//! download URLs are cached below their validity window, and provider state
//! can be snapshotted and restored across process boundaries.
//!
//! The public API is synchronous; all network work runs on a shared
//! background Tokio runtime so callers never need an async context.

pub mod backend;
pub mod cache;
pub mod client;
pub mod constants;
pub mod creds;
pub mod error;
pub mod provider;
pub mod retry;
pub mod runtime;
pub mod uri;

pub use backend::{AccessMode, CredentialBackend, DatasetCredentials, HttpCredentialBackend};
pub use cache::PresignedUrlCache;
pub use client::{ClientFactory, ListingPage, ObjectClient, S3ObjectClient};
pub use creds::{ClientOptions, CredSource, Credentials};
pub use error::{ClientError, ErrorClass, Result, StorageError};
pub use provider::{KeyIter, ProviderState, S3Provider, S3ProviderBuilder};
pub use retry::{attempts_for_age, OpKind};
pub use uri::{join_root, parse_full_url, parse_root};
