//! Error types for the upscale pipeline and model lifecycle

use thiserror::Error;

/// Result type for catalog, loader and pipeline operations
pub type UpscaleResult<T> = Result<T, UpscaleError>;

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Every failure a caller of the service can observe
///
/// Each variant has a stable machine-readable [`code`](UpscaleError::code) and
/// an HTTP status mapping so the transport never has to inspect messages.
#[derive(Error, Debug)]
pub enum UpscaleError {
    /// The id is not in the catalog
    #[error("Model {0} not found")]
    NotFound(String),

    /// The model exists but its runtime is absent in this deployment
    #[error("Model {0} is not available in this deployment")]
    Unavailable(String),

    /// The model has not been downloaded yet
    #[error("Model {0} not downloaded")]
    NotDownloaded(String),

    /// Fetching the model artifact failed; no partial file is left behind
    #[error("Failed to download model {model_id}: {message}")]
    DownloadFailed {
        /// Model being downloaded
        model_id: String,
        /// What went wrong
        message: String,
        /// Underlying transfer or filesystem error
        #[source]
        source: Option<BoxedSource>,
    },

    /// Constructing the engine failed; the previously loaded model stays active
    #[error("Failed to load model {model_id}: {message}")]
    LoadFailed {
        /// Model being loaded
        model_id: String,
        /// What went wrong
        message: String,
        /// Underlying engine error
        #[source]
        source: Option<BoxedSource>,
    },

    /// No model is loaded
    #[error("No model loaded. Please load a model first.")]
    NoModelLoaded,

    /// The input bytes are not a decodable image
    #[error("Failed to decode image: {0}")]
    DecodeError(String),

    /// Admission ceiling reached; expected backpressure
    #[error("Too many concurrent requests ({active}/{limit})")]
    TooManyConcurrent {
        /// Requests in flight when the request was rejected
        active: usize,
        /// Configured ceiling
        limit: usize,
    },

    /// Invalid argument provided by the caller
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Unexpected forward-pass or worker failure
    #[error("Internal error: {message}")]
    Internal {
        /// Error message describing the failure
        message: String,
        /// Source error for debugging
        #[source]
        source: Option<BoxedSource>,
    },
}

impl UpscaleError {
    /// Creates a download failure
    pub fn download_failed(
        model_id: impl Into<String>,
        message: impl Into<String>,
        source: Option<BoxedSource>,
    ) -> Self {
        Self::DownloadFailed {
            model_id: model_id.into(),
            message: message.into(),
            source,
        }
    }

    /// Creates a load failure
    pub fn load_failed(
        model_id: impl Into<String>,
        message: impl Into<String>,
        source: Option<BoxedSource>,
    ) -> Self {
        Self::LoadFailed {
            model_id: model_id.into(),
            message: message.into(),
            source,
        }
    }

    /// Creates an internal error
    pub fn internal(message: impl Into<String>, source: Option<BoxedSource>) -> Self {
        Self::Internal {
            message: message.into(),
            source,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Unavailable(_) => "unavailable",
            Self::NotDownloaded(_) => "not_downloaded",
            Self::DownloadFailed { .. } => "download_failed",
            Self::LoadFailed { .. } => "load_failed",
            Self::NoModelLoaded => "no_model_loaded",
            Self::DecodeError(_) => "decode_error",
            Self::TooManyConcurrent { .. } => "too_many_concurrent",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Internal { .. } => "internal_error",
        }
    }

    /// Maps this error to the HTTP status the transport should return
    pub fn to_http_status(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Unavailable(_) | Self::NotDownloaded(_) => 409,
            Self::DownloadFailed { .. } => 502,
            Self::LoadFailed { .. } | Self::Internal { .. } => 500,
            Self::NoModelLoaded
            | Self::DecodeError(_)
            | Self::InvalidArgument(_) => 400,
            Self::TooManyConcurrent { .. } => 429,
        }
    }

    /// Whether retrying the same request later can succeed
    pub fn is_temporary(&self) -> bool {
        matches!(
            self,
            Self::TooManyConcurrent { .. } | Self::DownloadFailed { .. }
        )
    }
}

impl From<UpscaleError> for upscaler_shared::UpscalerError {
    fn from(err: UpscaleError) -> Self {
        upscaler_shared::UpscalerError::internal(err.to_string(), Some(Box::new(err)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(UpscaleError::NotFound("x".into()).to_http_status(), 404);
        assert_eq!(UpscaleError::NoModelLoaded.to_http_status(), 400);
        assert_eq!(
            UpscaleError::TooManyConcurrent {
                active: 4,
                limit: 4
            }
            .to_http_status(),
            429
        );
        assert_eq!(UpscaleError::internal("boom", None).to_http_status(), 500);
    }

    #[test]
    fn test_codes_are_distinct() {
        let errors = [
            UpscaleError::NotFound("a".into()),
            UpscaleError::Unavailable("a".into()),
            UpscaleError::NotDownloaded("a".into()),
            UpscaleError::download_failed("a", "x", None),
            UpscaleError::load_failed("a", "x", None),
            UpscaleError::NoModelLoaded,
            UpscaleError::DecodeError("x".into()),
            UpscaleError::TooManyConcurrent {
                active: 1,
                limit: 1,
            },
            UpscaleError::InvalidArgument("x".into()),
            UpscaleError::internal("x", None),
        ];
        let mut codes: Vec<_> = errors.iter().map(UpscaleError::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_backpressure_is_temporary() {
        assert!(UpscaleError::TooManyConcurrent {
            active: 4,
            limit: 4
        }
        .is_temporary());
        assert!(!UpscaleError::NoModelLoaded.is_temporary());
    }
}
