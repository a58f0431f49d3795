//! # Shared Error Handling Module
//!
//! Startup and configuration errors for the upscaler workspace. Request-level
//! failures (unknown models, backpressure, decode failures) live in the
//! inference crate's `UpscaleError`; this type covers what happens before and
//! around the service, such as invalid configuration or an unusable models
//! directory.
//!
//! ## Error Categories
//!
//! - **Configuration Errors**: invalid values from the environment or CLI
//! - **I/O Errors**: filesystem failures while preparing the service
//! - **Internal Errors**: anything unexpected, with the cause attached

use thiserror::Error;
use tracing::warn;

/// Result type alias for upscaler operations outside the request path
pub type Result<T> = std::result::Result<T, UpscalerError>;

/// Workspace-level error type
#[derive(Error, Debug)]
pub enum UpscalerError {
    /// Configuration validation errors
    ///
    /// Raised while loading or validating `ServiceConfig`. These indicate
    /// operator mistakes that must be fixed before the service can start.
    ///
    /// **HTTP Status Mapping**: Not applicable (startup error)
    #[error("Configuration error: {message}")]
    Configuration {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// Optional source error for additional context
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Filesystem errors while preparing directories or reading inputs
    #[error("I/O error: {message}")]
    Io {
        /// What was being attempted
        message: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Unexpected failures
    ///
    /// **HTTP Status Mapping**: 500 Internal Server Error
    #[error("Internal error: {message}")]
    Internal {
        /// Error message describing the internal failure
        message: String,
        /// Source error for debugging
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl UpscalerError {
    /// Creates a configuration error with context
    ///
    /// # Examples
    ///
    /// ```rust
    /// use upscaler_shared::error::UpscalerError;
    ///
    /// let error = UpscalerError::configuration("max_concurrent must be at least 1", None);
    /// ```
    pub fn configuration(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Configuration {
            message: message.into(),
            source,
        }
    }

    /// Creates an I/O error describing the failed operation
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Creates an internal error with source context
    pub fn internal(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Internal {
            message: message.into(),
            source,
        }
    }

    /// Maps this error to an HTTP status code for the transport layer
    pub fn to_http_status(&self) -> u16 {
        match self {
            UpscalerError::Configuration { .. } => {
                // Configuration errors shouldn't reach HTTP layer
                warn!("Configuration error reached HTTP status mapping");
                500
            }
            UpscalerError::Io { .. } | UpscalerError::Internal { .. } => 500,
        }
    }
}

/// Conversion from I/O errors
impl From<std::io::Error> for UpscalerError {
    fn from(err: std::io::Error) -> Self {
        UpscalerError::io("I/O operation failed", err)
    }
}
