// src/retry.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! Attempt budgeting and operation→error-kind mapping for the resilient
//! executor. The stateful recovery loop itself lives on the provider; these
//! are the pure pieces.

use std::time::Duration;

use crate::constants::{MAX_RETRY_ATTEMPTS, RETRY_WINDOW_SECS};
use crate::error::{ClientError, StorageError};

/// How many connectivity retries a provider of the given age is allowed:
/// one during the first 5-minute window, one more per additional window,
/// capped at 5.
pub fn attempts_for_age(age: Duration) -> u32 {
    let windows = (age.as_secs() / RETRY_WINDOW_SECS) as u32;
    (windows + 1).min(MAX_RETRY_ATTEMPTS)
}

/// Which provider operation is executing; selects the error kind failures
/// map onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Get,
    Set,
    Delete,
    List,
}

impl OpKind {
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::Get => "GET",
            OpKind::Set => "PUT",
            OpKind::Delete => "DELETE",
            OpKind::List => "LIST",
        }
    }

    /// Only GET distinguishes a missing key; stores mutate idempotently or
    /// silently no-op on missing keys for deletes.
    pub fn missing_key_is_error(&self) -> bool {
        matches!(self, OpKind::Get)
    }

    /// Kind raised when the one-shot credential refresh did not help.
    pub fn access_error(&self, err: ClientError) -> StorageError {
        match self {
            OpKind::Get => StorageError::Access(err),
            _ => self.generic_error(err),
        }
    }

    /// The operation's generic wrapper for non-recoverable failures.
    pub fn generic_error(&self, err: ClientError) -> StorageError {
        match self {
            OpKind::Get => StorageError::Get(err),
            OpKind::Set => StorageError::Set(err),
            OpKind::Delete => StorageError::Deletion(err),
            OpKind::List => StorageError::List(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;

    fn attempts(secs: u64) -> u32 {
        attempts_for_age(Duration::from_secs(secs))
    }

    #[test]
    fn attempt_cap_scales_with_age() {
        assert_eq!(attempts(0), 1);
        assert_eq!(attempts(299), 1);
        assert_eq!(attempts(300), 2);
        assert_eq!(attempts(1_199), 4);
        assert_eq!(attempts(1_200), 5);
        assert_eq!(attempts(100_000), 5);
    }

    #[test]
    fn kind_mapping_matches_operation() {
        let err = || ClientError::new(ErrorClass::Other, "boom");
        assert!(matches!(OpKind::Get.generic_error(err()), StorageError::Get(_)));
        assert!(matches!(OpKind::Set.generic_error(err()), StorageError::Set(_)));
        assert!(matches!(OpKind::Delete.generic_error(err()), StorageError::Deletion(_)));
        assert!(matches!(OpKind::List.generic_error(err()), StorageError::List(_)));
    }

    #[test]
    fn access_kind_is_get_specific() {
        let err = || ClientError::new(ErrorClass::BadCredentials, "expired");
        assert!(matches!(OpKind::Get.access_error(err()), StorageError::Access(_)));
        assert!(matches!(OpKind::Set.access_error(err()), StorageError::Set(_)));
        assert!(matches!(OpKind::Delete.access_error(err()), StorageError::Deletion(_)));
    }
}
