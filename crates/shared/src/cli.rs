//! Shared CLI functionality for upscaler components
//!
//! Options that every entry point accepts, kept in one place so the binary
//! and any embedding transport parse them identically.

use clap::Args;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Common logging options
#[derive(Args, Debug, Clone)]
pub struct LoggingOptions {
    /// Logging level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", env = "UPSCALER_LOG_LEVEL")]
    pub log_level: String,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl LoggingOptions {
    /// Initialize logging with the configured level
    ///
    /// Safe to call more than once; later calls leave the first subscriber in
    /// place.
    pub fn init_logging(&self) {
        let level = self.parse_log_level();

        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_writer(std::io::stderr)
            .finish();

        if tracing::subscriber::set_global_default(subscriber).is_err() {
            tracing::debug!("Logging subscriber already installed");
        }
    }

    /// Parse the log level string into a tracing Level
    pub fn parse_log_level(&self) -> Level {
        match self.log_level.to_lowercase().as_str() {
            "error" => Level::ERROR,
            "warn" | "warning" => Level::WARN,
            "info" => Level::INFO,
            "debug" => Level::DEBUG,
            "trace" => Level::TRACE,
            _ => Level::INFO,
        }
    }
}

/// Parse a boolean flag the way the environment usually spells it
///
/// Accepts `true/false`, `1/0`, `yes/no` and `on/off`, case-insensitively.
pub fn parse_bool_flag(input: &str) -> Option<bool> {
    match input.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
