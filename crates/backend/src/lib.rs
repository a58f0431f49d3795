//! # Upscaler Backend
//!
//! Service context for the upscaler. Owns the model lifecycle, request
//! admission, connection registry and runtime settings, and exposes them as
//! plain async methods a transport can call.
//!
//! ## Features
//!
//! - Model catalog listing, download and load
//! - Bounded-concurrency upscale requests
//! - Benchmarking and hardware introspection
//! - Environment and command-line configuration

pub mod cli_options;
pub mod config;
pub mod connections;
pub mod service;

pub use cli_options::{Command, ServiceOptions, UpscalerCli};
pub use config::{ConfigUpdate, RuntimeSettings, ServiceConfig, MAX_CONCURRENT_CEILING};
pub use connections::{ConnectionRecord, ConnectionRegistry};
pub use service::{
    DownloadResponse, HealthResponse, LoadResponse, ModelListing, StatusResponse, UpscalerService,
};
