//! CLI options for the upscaler binary
//!
//! Each subcommand builds a service context, drives one boundary operation
//! and prints the result as JSON on stdout.

use clap::{builder::BoolishValueParser, Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;
use upscaler_shared::{expand_home_dir, LoggingOptions, Result, UpscalerError};

use crate::config::ServiceConfig;
use crate::service::UpscalerService;

/// Upscaler - local super-resolution upscaling service
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct UpscalerCli {
    #[command(flatten)]
    pub service: ServiceOptions,

    #[command(flatten)]
    pub logging: LoggingOptions,

    #[command(subcommand)]
    pub command: Command,
}

/// Service settings shared by every subcommand
///
/// Unset flags fall back to the `UPSCALER_*` environment, see
/// [`ServiceConfig::with_env`].
#[derive(Args, Debug, Clone, Default)]
pub struct ServiceOptions {
    /// Directory holding downloaded models
    #[arg(long, global = true)]
    pub models_dir: Option<PathBuf>,

    /// Prefer accelerated execution (true/false)
    #[arg(long, global = true, value_parser = BoolishValueParser::new())]
    pub use_gpu: Option<bool>,

    /// Maximum concurrent upscale requests
    #[arg(long, global = true)]
    pub max_concurrent: Option<usize>,

    /// Model to load at startup if already downloaded
    #[arg(long, global = true)]
    pub default_model: Option<String>,

    /// Download timeout in seconds
    #[arg(long, global = true)]
    pub download_timeout_secs: Option<u64>,

    /// Accelerator probe timeout in seconds
    #[arg(long, global = true)]
    pub probe_timeout_secs: Option<u64>,

    /// Benchmark image edge length in pixels
    #[arg(long, global = true)]
    pub benchmark_size: Option<usize>,

    /// Timed benchmark passes
    #[arg(long, global = true)]
    pub benchmark_iterations: Option<usize>,
}

impl ServiceOptions {
    /// Overlays the given flags on the `UPSCALER_*` environment and validates
    /// the result
    pub fn to_config(&self) -> Result<ServiceConfig> {
        let mut config = ServiceConfig::default().with_env()?;

        if let Some(dir) = &self.models_dir {
            config.models_dir = expand_home_dir(dir);
        }
        if let Some(use_gpu) = self.use_gpu {
            config.use_gpu = use_gpu;
        }
        if let Some(max) = self.max_concurrent {
            config.max_concurrent = max;
        }
        if let Some(model) = self.default_model.as_deref().map(str::trim) {
            config.default_model = (!model.is_empty()).then(|| model.to_string());
        }
        if let Some(secs) = self.download_timeout_secs {
            config.download_timeout_secs = secs;
        }
        if let Some(secs) = self.probe_timeout_secs {
            config.probe_timeout_secs = secs;
        }
        if let Some(size) = self.benchmark_size {
            config.benchmark_size = size;
        }
        if let Some(n) = self.benchmark_iterations {
            config.benchmark_iterations = n;
        }

        config.validate_config()?;
        Ok(config)
    }
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List the model catalog
    Models,

    /// Download a model into the models directory
    Download {
        /// Catalog id, e.g. fsrcnn-x2
        model: String,
    },

    /// Upscale one image file to PNG
    Upscale {
        /// Model to load
        #[arg(short, long)]
        model: String,

        /// Download the model first if it is missing
        #[arg(long)]
        download: bool,

        /// Input image (PNG, JPEG, BMP or WebP)
        input: PathBuf,

        /// Output PNG path
        output: PathBuf,
    },

    /// Benchmark a model on a random image
    Benchmark {
        /// Model to load
        #[arg(short, long)]
        model: String,
    },

    /// Show the hardware snapshot
    Hardware,

    /// Show service status
    Status,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(|e| {
        UpscalerError::internal("failed to serialize output", Some(Box::new(e)))
    })?;
    println!("{json}");
    Ok(())
}

impl UpscalerCli {
    /// Run the selected command
    pub async fn run(self) -> Result<()> {
        let config = self.service.to_config()?;
        let service = UpscalerService::start(config).await?;

        let outcome = Self::execute(&service, self.command).await;
        service.shutdown();
        outcome
    }

    async fn execute(service: &UpscalerService, command: Command) -> Result<()> {
        match command {
            Command::Models => print_json(&service.list_models()),
            Command::Download { model } => print_json(&service.download_model(&model).await?),
            Command::Upscale {
                model,
                download,
                input,
                output,
            } => {
                if download {
                    service.download_model(&model).await?;
                }
                service.load_model(&model, None).await?;

                let bytes = tokio::fs::read(&input)
                    .await
                    .map_err(|e| UpscalerError::io(format!("reading {}", input.display()), e))?;
                let png = service.upscale(bytes).await?;
                tokio::fs::write(&output, &png)
                    .await
                    .map_err(|e| UpscalerError::io(format!("writing {}", output.display()), e))?;

                info!(input = %input.display(), output = %output.display(), "image upscaled");
                print_json(&serde_json::json!({
                    "status": "success",
                    "model": model,
                    "output": output,
                    "bytes": png.len(),
                }))
            }
            Command::Benchmark { model } => {
                service.load_model(&model, None).await?;
                print_json(&service.benchmark().await?)
            }
            Command::Hardware => print_json(&service.hardware_info()),
            Command::Status => print_json(&service.status()),
        }
    }
}
