//! # Upscaler - Main Entry Point
//!
//! Local super-resolution upscaling service driven from the command line.
//!
//! ## Usage
//!
//! ```bash
//! # List the catalog
//! upscaler models
//!
//! # Fetch a model and upscale a frame
//! upscaler download fsrcnn-x2
//! upscaler upscale --model fsrcnn-x2 frame.jpg frame@2x.png
//!
//! # Benchmark on the CPU
//! UPSCALER_USE_GPU=false upscaler benchmark --model espcn-x4
//! ```
//!
//! ## Exit codes
//!
//! - `0`: success
//! - `1`: invalid configuration
//! - `2`: the request failed (unknown model, decode failure, ...)
//! - `3`: I/O or internal failure

use clap::Parser;
use std::process;
use tracing::error;
use upscaler_backend::UpscalerCli;
use upscaler_inference::UpscaleError;
use upscaler_shared::UpscalerError;

fn exit_code(err: &UpscalerError) -> i32 {
    match err {
        UpscalerError::Configuration { .. } => 1,
        UpscalerError::Internal {
            source: Some(source),
            ..
        } if source.downcast_ref::<UpscaleError>().is_some() => 2,
        _ => 3,
    }
}

fn error_body(err: &UpscalerError) -> serde_json::Value {
    let code = match err {
        UpscalerError::Internal {
            source: Some(source),
            ..
        } => source
            .downcast_ref::<UpscaleError>()
            .map(UpscaleError::code)
            .unwrap_or("internal_error"),
        UpscalerError::Configuration { .. } => "configuration_error",
        UpscalerError::Io { .. } => "io_error",
        UpscalerError::Internal { .. } => "internal_error",
    };
    serde_json::json!({ "error": code, "message": err.to_string() })
}

#[tokio::main]
async fn main() {
    let cli = UpscalerCli::parse();
    cli.logging.init_logging();

    if let Err(err) = cli.run().await {
        error!(error = %err, "command failed");
        eprintln!("{}", error_body(&err));
        process::exit(exit_code(&err));
    }
}
