//! Integration tests for logging system

use bridge_traits::time::LogLevel;
use core_runtime::logging::{
    init_logging, redact_if_sensitive, redact_url, strip_path, LogFormat, LoggingConfig,
};

#[test]
fn test_logging_initialization_only_once() {
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Debug)
        .with_spans(false);

    assert!(init_logging(config.clone()).is_ok());
    // A global subscriber is already installed in this process.
    assert!(init_logging(config).is_err());
}

#[test]
fn test_invalid_custom_filter_is_rejected_before_install() {
    let config = LoggingConfig::default().with_filter("core_playback=notalevel");
    assert!(init_logging(config).is_err());
}

#[test]
fn test_token_redaction() {
    assert_eq!(redact_if_sensitive("access_token", "abc"), "[REDACTED]");
    assert_eq!(redact_if_sensitive("Authorization", "Bearer x"), "[REDACTED]");
    assert_eq!(redact_if_sensitive("position", "4096"), "4096");
}

#[test]
fn test_signed_url_redaction() {
    let url = "https://media.example.com/v1/tracks/42.opus?X-Amz-Signature=deadbeef&X-Amz-Expires=900";
    let redacted = redact_url(url);

    assert_eq!(redacted, "https://media.example.com/v1/tracks/42.opus?[REDACTED]");
    assert!(!redacted.contains("deadbeef"));
}

#[test]
fn test_path_stripping() {
    assert_eq!(strip_path("/var/cache/media/ab12/0.1f.span"), "0.1f.span");
    assert_eq!(strip_path("C:\\cache\\ab12\\1048576.span"), "1048576.span");
    assert_eq!(strip_path("cache_index.json"), "cache_index.json");
    assert_eq!(strip_path(""), "");
}

#[test]
fn test_config_chaining() {
    let config = LoggingConfig::default()
        .with_format(LogFormat::Json)
        .with_level(LogLevel::Warn)
        .with_filter("core_playback=debug")
        .with_target(false)
        .with_thread_info(true);

    assert_eq!(config.format, LogFormat::Json);
    assert_eq!(config.level, LogLevel::Warn);
    assert_eq!(config.filter.as_deref(), Some("core_playback=debug"));
    assert!(!config.display_target);
    assert!(config.display_thread_info);
}
