//! Configuration Tests
//!
//! Tests for service configuration loading and validation. Tests touching
//! `UPSCALER_*` variables run serially.

use serial_test::serial;
use std::env;
use std::path::PathBuf;
use upscaler_backend::{ServiceConfig, UpscalerCli};
use upscaler_shared::UpscalerError;

const VARS: &[&str] = &[
    "UPSCALER_MODELS_DIR",
    "UPSCALER_USE_GPU",
    "UPSCALER_MAX_CONCURRENT",
    "UPSCALER_DEFAULT_MODEL",
    "UPSCALER_DOWNLOAD_TIMEOUT_SECS",
    "UPSCALER_PROBE_TIMEOUT_SECS",
    "UPSCALER_BENCHMARK_SIZE",
    "UPSCALER_BENCHMARK_ITERATIONS",
];

fn clear_env() {
    for var in VARS {
        env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_configuration_from_env_defaults() {
    clear_env();
    let config = ServiceConfig::from_env().unwrap();
    assert_eq!(config, ServiceConfig::default());
}

#[test]
#[serial]
fn test_configuration_from_env_overrides() {
    clear_env();
    env::set_var("UPSCALER_MODELS_DIR", "/srv/upscaler/models");
    env::set_var("UPSCALER_USE_GPU", "false");
    env::set_var("UPSCALER_MAX_CONCURRENT", "8");
    env::set_var("UPSCALER_DEFAULT_MODEL", "fsrcnn-x2");
    env::set_var("UPSCALER_BENCHMARK_ITERATIONS", "3");

    let config = ServiceConfig::from_env().unwrap();
    clear_env();

    assert_eq!(config.models_dir, PathBuf::from("/srv/upscaler/models"));
    assert!(!config.use_gpu);
    assert_eq!(config.max_concurrent, 8);
    assert_eq!(config.default_model.as_deref(), Some("fsrcnn-x2"));
    assert_eq!(config.benchmark_iterations, 3);
}

#[test]
#[serial]
fn test_configuration_rejects_garbage() {
    clear_env();
    env::set_var("UPSCALER_MAX_CONCURRENT", "many");
    let err = ServiceConfig::from_env().unwrap_err();
    clear_env();

    assert!(matches!(err, UpscalerError::Configuration { .. }));
    assert!(err.to_string().contains("max_concurrent"));
}

#[test]
#[serial]
fn test_configuration_rejects_out_of_range() {
    clear_env();
    env::set_var("UPSCALER_MAX_CONCURRENT", "0");
    let result = ServiceConfig::from_env();
    clear_env();
    assert!(result.is_err());
}

#[test]
#[serial]
fn test_blank_default_model_means_none() {
    clear_env();
    env::set_var("UPSCALER_DEFAULT_MODEL", "   ");
    let config = ServiceConfig::from_env().unwrap();
    clear_env();
    assert!(config.default_model.is_none());
}

#[test]
#[serial]
fn test_cli_flags_and_env() {
    use clap::Parser;

    clear_env();
    env::set_var("UPSCALER_MAX_CONCURRENT", "6");
    env::set_var("UPSCALER_BENCHMARK_SIZE", "64");
    let cli = UpscalerCli::parse_from(["upscaler", "--use-gpu", "no", "status"]);
    let from_env = cli.service.to_config();
    let overridden = UpscalerCli::parse_from(["upscaler", "status", "--max-concurrent", "2"])
        .service
        .to_config();
    clear_env();

    let config = from_env.unwrap();
    assert_eq!(config.max_concurrent, 6);
    assert_eq!(config.benchmark_size, 64);
    assert!(!config.use_gpu);

    let config = overridden.unwrap();
    assert_eq!(config.max_concurrent, 2);
    assert_eq!(config.benchmark_size, 64);
}

#[test]
#[serial]
fn test_cli_flag_replaces_out_of_range_env() {
    use clap::Parser;

    clear_env();
    env::set_var("UPSCALER_MAX_CONCURRENT", "0");
    let fixed = UpscalerCli::parse_from(["upscaler", "--max-concurrent", "3", "status"])
        .service
        .to_config();
    let broken = UpscalerCli::parse_from(["upscaler", "status"]).service.to_config();
    clear_env();

    assert_eq!(fixed.unwrap().max_concurrent, 3);
    assert!(matches!(broken, Err(UpscalerError::Configuration { .. })));
}

#[test]
#[serial]
fn test_cli_rejects_garbage_env() {
    use clap::Parser;

    clear_env();
    env::set_var("UPSCALER_USE_GPU", "sometimes");
    let result = UpscalerCli::parse_from(["upscaler", "status"]).service.to_config();
    clear_env();

    let err = result.unwrap_err();
    assert!(err.to_string().contains("use_gpu"));
}
