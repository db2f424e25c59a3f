// src/error.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! Error taxonomy surfaced to callers, plus the classified raw error the
//! object-store capability reports.
//!
//! Classification drives recovery: `BadCredentials` gets exactly one
//! refresh-and-retry, `Connectivity` gets the age-bounded retry loop,
//! `NoSuchKey` and everything else surface immediately.

use thiserror::Error;

/// Machine-readable class of a raw object-store failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Explicit "no such key" signal from the store.
    NoSuchKey,
    /// Invalid or expired credential signal.
    BadCredentials,
    /// Transient connectivity: timeouts, resets, unreachable endpoint,
    /// mid-stream read failures.
    Connectivity,
    /// Anything else the store reported.
    Other,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorClass::NoSuchKey => "no such key",
            ErrorClass::BadCredentials => "bad credentials",
            ErrorClass::Connectivity => "connectivity",
            ErrorClass::Other => "other",
        };
        f.write_str(s)
    }
}

/// A raw failure from the object-store capability, already classified.
#[derive(Debug, Clone, Error)]
#[error("object store error ({class}): {message}")]
pub struct ClientError {
    pub class: ErrorClass,
    pub message: String,
}

impl ClientError {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self { class, message: message.into() }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Other, message)
    }

    pub fn is_connectivity(&self) -> bool {
        self.class == ErrorClass::Connectivity
    }
}

/// Errors delivered to provider callers. Retries and credential refreshes are
/// observable only through log output, never through the final kind.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Object absent. Raised immediately, never retried.
    #[error("no object found at '{0}'")]
    NotFound(String),

    /// Credentials invalid or expired, and still failing after the one-shot
    /// refresh-and-retry cycle.
    #[error("access denied by object storage (credentials invalid or expired)")]
    Access(#[source] ClientError),

    /// GET failed for a reason other than a missing key or bad credentials.
    #[error("unable to get object from storage")]
    Get(#[source] ClientError),

    /// PUT failed.
    #[error("unable to set object in storage")]
    Set(#[source] ClientError),

    /// DELETE (single or bulk) failed.
    #[error("unable to delete object(s) in storage")]
    Deletion(#[source] ClientError),

    /// A paginated listing call failed.
    #[error("unable to list objects in storage")]
    List(#[source] ClientError),

    /// Rename destination prefix already holds at least one object. Raised
    /// before any mutation.
    #[error("destination path '{0}' is not empty")]
    PathNotEmpty(String),

    /// Mutating call on a read-only provider. Checked before any network I/O.
    #[error("provider is in read-only mode")]
    ReadOnly,

    /// Anything outside the object store proper, e.g. a credential refresh
    /// that failed. Propagated unmodified.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StorageError {
    /// True when the underlying cause was classified as connectivity and the
    /// bounded retry budget was exhausted.
    pub fn is_connectivity(&self) -> bool {
        match self {
            StorageError::Access(e)
            | StorageError::Get(e)
            | StorageError::Set(e)
            | StorageError::Deletion(e)
            | StorageError::List(e) => e.is_connectivity(),
            _ => false,
        }
    }
}

pub type Result<T, E = StorageError> = std::result::Result<T, E>;
