//! Error types for the controller.
//!
//! Defines custom error types with classification for retry behavior.
//! Transient transport failures bubble up to the reconcile framework for
//! backoff; everything else moves the migration to the Failed phase.

use std::time::Duration;

use thiserror::Error;

use crate::cluster::RegistryError;
use crate::ebs::EbsError;
use crate::translate::TranslateError;

/// Error type for controller operations
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error against the local or a remote cluster
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Remote cluster client could not be built or reached
    #[error("credential error: {0}")]
    Registry(#[from] RegistryError),

    /// EBS operation failed or the volume is stuck
    #[error(transparent)]
    Ebs(#[from] EbsError),

    /// The translator rejected the source volume
    #[error(transparent)]
    Translate(#[from] TranslateError),

    /// Pre-flight validation failure
    #[error("Validation error: {0}")]
    Validation(String),

    /// An object the migrate loop depends on is missing or changed
    #[error("Precondition violated: {0}")]
    Precondition(String),

    /// A bounded wait elapsed
    #[error("{0}")]
    Timeout(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Check if this error indicates a not-found condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(e)) if e.code == 404)
    }

    /// Check if this error should be retried by the framework rather than
    /// failing the migration
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(e) => kube_retryable(e),
            Error::Registry(RegistryError::Kube(e)) => kube_retryable(e),
            Error::Ebs(e) => e.is_retryable(),
            Error::Registry(_)
            | Error::Translate(_)
            | Error::Validation(_)
            | Error::Precondition(_)
            | Error::Timeout(_)
            | Error::Serialization(_) => false,
        }
    }

    /// Get the recommended requeue duration for this error
    pub fn requeue_after(&self) -> Duration {
        if self.is_retryable() {
            Duration::from_secs(30)
        } else {
            Duration::from_secs(3600)
        }
    }
}

/// Network errors, rate limiting, and server-side errors are worth retrying.
fn kube_retryable(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(api_err) if api_err.code >= 500 || api_err.code == 429)
        || matches!(e, kube::Error::Service(_))
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_not_retryable() {
        let err = Error::Validation("namespace missing".to_string());
        assert!(!err.is_retryable());
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_timeout_not_retryable() {
        let err = Error::Timeout("pod web-0 not ready".to_string());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_ebs_describe_retryable() {
        let err = Error::Ebs(EbsError::Describe {
            volume_id: "vol-x".to_string(),
            message: "503".to_string(),
        });
        assert!(err.is_retryable());
    }

    #[test]
    fn test_ebs_timeout_fails_migration() {
        let err = Error::Ebs(EbsError::DetachTimeout {
            volume_id: "vol-x".to_string(),
            timeout: Duration::from_secs(300),
        });
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_requeue_after() {
        let retryable = Error::Ebs(EbsError::Describe {
            volume_id: "vol-x".to_string(),
            message: "timeout".to_string(),
        });
        assert_eq!(retryable.requeue_after(), Duration::from_secs(30));

        let fatal = Error::Validation("bad".to_string());
        assert_eq!(fatal.requeue_after(), Duration::from_secs(3600));
    }
}
