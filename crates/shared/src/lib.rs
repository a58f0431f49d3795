//! # Upscaler Shared Library
//!
//! Shared utilities used by every upscaler component.
//!
//! ## Features
//!
//! - **Error Handling**: startup and configuration error types
//! - **CLI Options**: logging flags shared by all entry points
//! - **Hardware Inspection**: CPU and accelerator probe
//! - **Paths**: default model store location

pub mod cli;
pub mod error;
pub mod hardware;
pub mod paths;

pub use cli::{parse_bool_flag, LoggingOptions};
pub use error::{Result, UpscalerError};
pub use hardware::{
    AcceleratorInfo, CapabilityFlags, HardwareInspector, HardwareSnapshot, DEFAULT_PROBE_TIMEOUT,
};
pub use paths::{default_models_dir, expand_home_dir};
