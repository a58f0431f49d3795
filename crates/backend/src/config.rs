//! Service configuration management

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use upscaler_inference::{
    DEFAULT_ITERATIONS, DEFAULT_MAX_CONCURRENT, DEFAULT_SAMPLE_SIZE,
};
use upscaler_shared::{default_models_dir, expand_home_dir, parse_bool_flag, Result, UpscalerError};
use validator::{Validate, ValidationError};

/// Highest admission ceiling accepted at startup and at runtime
///
/// Mirrors the `max` of the `max_concurrent` range below.
pub const MAX_CONCURRENT_CEILING: usize = 256;

/// Configuration for the upscaler service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct ServiceConfig {
    /// Directory holding downloaded model files
    pub models_dir: PathBuf,

    /// Prefer accelerated execution when loading models
    pub use_gpu: bool,

    /// Upscale requests allowed in flight
    #[validate(range(min = 1, max = 256, message = "max_concurrent must be between 1 and 256"))]
    pub max_concurrent: usize,

    /// Model loaded at startup when already downloaded
    #[validate(custom(function = "validate_model_id"))]
    pub default_model: Option<String>,

    /// Per-request download timeout
    #[validate(range(min = 1, max = 3600, message = "download timeout must be between 1 and 3600 seconds"))]
    pub download_timeout_secs: u64,

    /// Timeout for the accelerator query tool
    #[validate(range(min = 1, max = 60, message = "probe timeout must be between 1 and 60 seconds"))]
    pub probe_timeout_secs: u64,

    /// Edge length of the synthetic benchmark image
    #[validate(range(min = 8, max = 4096, message = "benchmark size must be between 8 and 4096"))]
    pub benchmark_size: usize,

    /// Timed passes per benchmark
    #[validate(range(min = 1, max = 100, message = "benchmark iterations must be between 1 and 100"))]
    pub benchmark_iterations: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            models_dir: default_models_dir(),
            use_gpu: true,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            default_model: None,
            download_timeout_secs: 300,
            probe_timeout_secs: 5,
            benchmark_size: DEFAULT_SAMPLE_SIZE,
            benchmark_iterations: DEFAULT_ITERATIONS,
        }
    }
}

fn validate_model_id(id: &str) -> std::result::Result<(), ValidationError> {
    if id.trim().is_empty() {
        return Err(ValidationError::new("empty_model_id"));
    }
    Ok(())
}

fn invalid_value(field: &str, value: &str, reason: &str) -> UpscalerError {
    UpscalerError::configuration(
        format!("Invalid value '{value}' for {field}: {reason}"),
        None,
    )
}

fn parse_env<T: FromStr>(var: &str, field: &str, reason: &str) -> Result<Option<T>> {
    match env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| invalid_value(field, &raw, reason)),
        Err(_) => Ok(None),
    }
}

impl ServiceConfig {
    /// Creates configuration from `UPSCALER_*` environment variables, falling
    /// back to defaults
    pub fn from_env() -> Result<Self> {
        let config = Self::default().with_env()?;
        config.validate_config()?;
        Ok(config)
    }

    /// Applies the `UPSCALER_*` variables that are set
    ///
    /// Values are parsed but not range checked, so later overrides can still
    /// replace them before [`validate_config`](Self::validate_config).
    pub fn with_env(self) -> Result<Self> {
        let mut config = self;

        if let Ok(dir) = env::var("UPSCALER_MODELS_DIR") {
            config.models_dir = expand_home_dir(&dir);
        }

        if let Ok(raw) = env::var("UPSCALER_USE_GPU") {
            config.use_gpu = parse_bool_flag(&raw)
                .ok_or_else(|| invalid_value("use_gpu", &raw, "must be true or false"))?;
        }

        if let Some(max) = parse_env("UPSCALER_MAX_CONCURRENT", "max_concurrent", "must be a positive integer")? {
            config.max_concurrent = max;
        }

        if let Ok(model) = env::var("UPSCALER_DEFAULT_MODEL") {
            let model = model.trim();
            config.default_model = (!model.is_empty()).then(|| model.to_string());
        }

        if let Some(secs) = parse_env(
            "UPSCALER_DOWNLOAD_TIMEOUT_SECS",
            "download_timeout_secs",
            "must be a number of seconds",
        )? {
            config.download_timeout_secs = secs;
        }

        if let Some(secs) = parse_env(
            "UPSCALER_PROBE_TIMEOUT_SECS",
            "probe_timeout_secs",
            "must be a number of seconds",
        )? {
            config.probe_timeout_secs = secs;
        }

        if let Some(size) = parse_env("UPSCALER_BENCHMARK_SIZE", "benchmark_size", "must be a positive integer")? {
            config.benchmark_size = size;
        }

        if let Some(n) = parse_env(
            "UPSCALER_BENCHMARK_ITERATIONS",
            "benchmark_iterations",
            "must be a positive integer",
        )? {
            config.benchmark_iterations = n;
        }

        Ok(config)
    }

    /// Validates ranges and the models directory
    pub fn validate_config(&self) -> Result<()> {
        Validate::validate(self).map_err(|e| {
            UpscalerError::configuration("Invalid service configuration", Some(Box::new(e)))
        })?;

        if self.models_dir.as_os_str().is_empty() {
            return Err(UpscalerError::configuration("models_dir cannot be empty", None));
        }
        if self.models_dir.is_file() {
            return Err(UpscalerError::configuration(
                format!("models_dir {} is a file", self.models_dir.display()),
                None,
            ));
        }

        if self.max_concurrent > 32 {
            tracing::warn!(
                max_concurrent = self.max_concurrent,
                "High concurrency ceiling, each request holds a decoded image in memory"
            );
        }
        Ok(())
    }
}

/// Runtime-adjustable settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConfigUpdate {
    pub use_gpu: Option<bool>,
    pub max_concurrent: Option<usize>,
}

/// Current runtime settings as returned by `update_config`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RuntimeSettings {
    pub use_gpu: bool,
    pub max_concurrent: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ServiceConfig::default();
        assert!(config.validate_config().is_ok());
        assert_eq!(config.max_concurrent, 4);
        assert!(config.use_gpu);
        assert!(config.default_model.is_none());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config = ServiceConfig {
            max_concurrent: 0,
            ..ServiceConfig::default()
        };
        assert!(matches!(
            config.validate_config(),
            Err(UpscalerError::Configuration { .. })
        ));
    }

    #[test]
    fn test_ceiling_matches_validation_range() {
        let at_ceiling = ServiceConfig {
            max_concurrent: MAX_CONCURRENT_CEILING,
            ..ServiceConfig::default()
        };
        assert!(at_ceiling.validate_config().is_ok());

        let above = ServiceConfig {
            max_concurrent: MAX_CONCURRENT_CEILING + 1,
            ..ServiceConfig::default()
        };
        assert!(above.validate_config().is_err());
    }

    #[test]
    fn test_blank_default_model_rejected() {
        let config = ServiceConfig {
            default_model: Some("  ".into()),
            ..ServiceConfig::default()
        };
        assert!(config.validate_config().is_err());
    }

    #[test]
    fn test_models_dir_must_not_be_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let config = ServiceConfig {
            models_dir: file.path().to_path_buf(),
            ..ServiceConfig::default()
        };
        assert!(config.validate_config().is_err());
    }
}
