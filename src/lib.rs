//! # Fingerlink
//!
//! Fingerprint template matching and attendance bookkeeping.
//!
//! A captured fingerprint template is encoded into a fixed-length vector under a
//! [`Scheme`], compared against previously enrolled vectors with a 1-nearest-neighbor
//! query, and accepted or rejected against the scheme's distance threshold. The
//! decision then drives enrollment and attendance records in the identity store.
//!
//! ## Layers
//!
//! - **Models**: schemes, template identifiers, encoded vectors, identity records
//! - **Encoding**: raw bytes to vectors, raw bytes to content-addressed IDs
//! - **Storage**: vector index backends (Redis, in-memory) and the `SQLite` identity store
//! - **Services**: template store, matcher, enrollment and attendance workflows
//! - **Transport**: optional HTTP surface (`http` feature) and the CLI binary
//!
//! ## Example
//!
//! ```rust,ignore
//! use fingerlink::services::ServiceContainer;
//! use fingerlink::models::{SchemeId, UserId};
//!
//! let services = ServiceContainer::in_memory()?;
//! let receipt = services
//!     .enrollment()
//!     .enroll(&UserId::new("42"), &raw_template, SchemeId::Normalized16.scheme())?;
//! println!("enrolled {}", receipt.template_id);
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

pub mod channel;
pub mod config;
pub mod encoding;
#[cfg(feature = "http")]
pub mod http;
pub mod models;
pub mod observability;
pub mod services;
pub mod storage;

pub use config::FingerlinkConfig;
pub use models::{
    AttendanceEvent, DeviceId, DistanceMetric, EncodedVector, EnrollmentRecord, MatchResult,
    Scheme, SchemeId, TemplateId, UserId, Verdict,
};
pub use services::{
    AttendanceService, EnrollmentService, ServiceContainer, SimilarityMatcher, TemplateStore,
};

/// Error type for fingerlink operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When | Caller sees |
/// |---------|-------------|-------------|
/// | `Validation` | Empty template, missing user/device/code | bad request |
/// | `Encoding` | Template shorter than the scheme dimension | bad request |
/// | `UnknownScheme` | Unrecognized scheme id or API version | internal error |
/// | `Store` | Vector index or identity lookup failure | internal error |
/// | `NoMatch` | Best candidate above threshold, or empty index | not found |
/// | `IdentityResolution` | Matched vector without a link, or link without profile | not found |
/// | `Persistence` | Enrollment link or attendance insert failure | internal error |
/// | `OperationFailed` | Config, I/O, channel, runtime failures | internal error |
/// | `FeatureNotEnabled` | Backend requested without its cargo feature | internal error |
/// | `Unauthorized` | Missing or wrong API key on the HTTP surface | forbidden |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Required input was missing or empty.
    #[error("invalid input: {0}")]
    Validation(String),

    /// The raw template is too short for the requested scheme.
    #[error("template too short for scheme '{scheme}': need {required} bytes, got {actual}")]
    Encoding {
        /// Scheme the template was encoded under.
        scheme: SchemeId,
        /// Minimum number of bytes the scheme needs.
        required: usize,
        /// Number of bytes supplied.
        actual: usize,
    },

    /// The scheme identifier is not in the registry.
    #[error("unknown scheme: {0}")]
    UnknownScheme(String),

    /// The vector index or identity store could not be read or written.
    #[error("store operation '{operation}' failed: {cause}")]
    Store {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// No enrolled template is close enough to the query.
    #[error("no matching fingerprint under scheme '{scheme}'")]
    NoMatch {
        /// Scheme the query was issued under.
        scheme: SchemeId,
    },

    /// A match (or code) could not be resolved to a known participant.
    #[error("identity resolution failed: {0}")]
    IdentityResolution(String),

    /// An enrollment link or attendance event could not be persisted.
    #[error("persisting '{operation}' failed: {cause}")]
    Persistence {
        /// The record being written.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// A non-storage operation failed.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// Feature not enabled (requires feature flag).
    #[error("feature not enabled: {0} (compile with --features {0})")]
    FeatureNotEnabled(String),

    /// The caller is not allowed to invoke the operation.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

/// How an [`Error`] is presented to the caller of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The request itself was malformed.
    BadRequest,
    /// The caller failed authorization.
    Unauthorized,
    /// Nothing matched, or the match could not be resolved.
    NotFound,
    /// A backend or configuration failure.
    Internal,
}

impl Error {
    /// Returns the caller-facing category for this error.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) | Self::Encoding { .. } => ErrorCategory::BadRequest,
            Self::Unauthorized(_) => ErrorCategory::Unauthorized,
            Self::NoMatch { .. } | Self::IdentityResolution(_) => ErrorCategory::NotFound,
            Self::UnknownScheme(_)
            | Self::Store { .. }
            | Self::Persistence { .. }
            | Self::OperationFailed { .. }
            | Self::FeatureNotEnabled(_) => ErrorCategory::Internal,
        }
    }

    /// Short machine-readable name, used as a metrics label.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Encoding { .. } => "encoding",
            Self::UnknownScheme(_) => "unknown_scheme",
            Self::Store { .. } => "store",
            Self::NoMatch { .. } => "no_match",
            Self::IdentityResolution(_) => "identity_resolution",
            Self::Persistence { .. } => "persistence",
            Self::OperationFailed { .. } => "operation_failed",
            Self::FeatureNotEnabled(_) => "feature_not_enabled",
            Self::Unauthorized(_) => "unauthorized",
        }
    }

    pub(crate) fn store(operation: &str, cause: impl std::fmt::Display) -> Self {
        Self::Store {
            operation: operation.to_string(),
            cause: cause.to_string(),
        }
    }

    pub(crate) fn persistence(operation: &str, cause: impl std::fmt::Display) -> Self {
        Self::Persistence {
            operation: operation.to_string(),
            cause: cause.to_string(),
        }
    }

    pub(crate) fn operation(operation: &str, cause: impl std::fmt::Display) -> Self {
        Self::OperationFailed {
            operation: operation.to_string(),
            cause: cause.to_string(),
        }
    }
}

/// Result type alias for fingerlink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current Unix timestamp in seconds.
///
/// Falls back to 0 if the system clock is before the Unix epoch.
#[must_use]
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Validation("device_id is required".to_string());
        assert_eq!(err.to_string(), "invalid input: device_id is required");

        let err = Error::Encoding {
            scheme: SchemeId::Normalized16,
            required: 16,
            actual: 3,
        };
        assert_eq!(
            err.to_string(),
            "template too short for scheme 'normalized-16': need 16 bytes, got 3"
        );

        let err = Error::store("knn_query", "connection refused");
        assert_eq!(
            err.to_string(),
            "store operation 'knn_query' failed: connection refused"
        );
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(
            Error::Validation(String::new()).category(),
            ErrorCategory::BadRequest
        );
        assert_eq!(
            Error::Encoding {
                scheme: SchemeId::Normalized512,
                required: 512,
                actual: 0
            }
            .category(),
            ErrorCategory::BadRequest
        );
        assert_eq!(
            Error::NoMatch {
                scheme: SchemeId::Normalized16
            }
            .category(),
            ErrorCategory::NotFound
        );
        assert_eq!(
            Error::IdentityResolution(String::new()).category(),
            ErrorCategory::NotFound
        );
        assert_eq!(
            Error::UnknownScheme("v9".to_string()).category(),
            ErrorCategory::Internal
        );
        assert_eq!(
            Error::persistence("attendance", "disk full").category(),
            ErrorCategory::Internal
        );
        assert_eq!(
            Error::Unauthorized(String::new()).category(),
            ErrorCategory::Unauthorized
        );
    }

    #[test]
    fn test_no_match_and_identity_resolution_are_distinct_kinds() {
        let no_match = Error::NoMatch {
            scheme: SchemeId::Normalized16,
        };
        let unresolved = Error::IdentityResolution("orphan".to_string());
        assert_eq!(no_match.category(), unresolved.category());
        assert_ne!(no_match.kind(), unresolved.kind());
    }

    #[test]
    fn test_current_timestamp_is_positive() {
        assert!(current_timestamp() > 0);
    }
}
