//! Error Tests
//!
//! Tests for shared error construction and conversion.

use std::error::Error as _;
use upscaler_shared::error::UpscalerError;

#[test]
fn test_error_construction() {
    let config_err = UpscalerError::configuration("test", None);
    assert!(matches!(config_err, UpscalerError::Configuration { .. }));

    let internal_err = UpscalerError::internal("boom", None);
    assert!(matches!(internal_err, UpscalerError::Internal { .. }));

    let io_err = UpscalerError::io(
        "creating models directory",
        std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
    );
    assert!(matches!(io_err, UpscalerError::Io { .. }));
}

#[test]
fn test_http_status_mapping() {
    assert_eq!(UpscalerError::configuration("x", None).to_http_status(), 500);
    assert_eq!(UpscalerError::internal("x", None).to_http_status(), 500);
}

#[test]
fn test_configuration_error_chains_source() {
    let parse_err = "abc".parse::<usize>().unwrap_err();
    let err = UpscalerError::configuration("max_concurrent", Some(Box::new(parse_err)));
    assert!(err.source().is_some());
    assert!(err.to_string().contains("max_concurrent"));
}
