//! Tests for logging configuration and format parsing
//!
//! Tests the pure functions in the logging module that handle
//! log format parsing and configuration from environment variables.

use messenger_listener::error::sanitize_error_message;
use messenger_listener::observability::logging::{parse_level, parse_spans_flag, LogFormat};
use tracing::Level;

#[test]
fn test_log_format_parse_json() {
    assert!(matches!(LogFormat::parse("json"), LogFormat::Json));
    assert!(matches!(LogFormat::parse("JSON"), LogFormat::Json));
    assert!(matches!(LogFormat::parse("Json"), LogFormat::Json));
}

#[test]
fn test_log_format_parse_pretty() {
    assert!(matches!(LogFormat::parse("pretty"), LogFormat::Pretty));
    assert!(matches!(LogFormat::parse("PRETTY"), LogFormat::Pretty));
}

#[test]
fn test_log_format_parse_compact() {
    assert!(matches!(LogFormat::parse("compact"), LogFormat::Compact));
    assert!(matches!(LogFormat::parse("Compact"), LogFormat::Compact));
}

#[test]
fn test_log_format_parse_invalid_defaults_to_json() {
    // Invalid formats should default to JSON for production safety
    assert!(matches!(LogFormat::parse("invalid"), LogFormat::Json));
    assert!(matches!(LogFormat::parse(""), LogFormat::Json));
    assert!(matches!(LogFormat::parse("yaml"), LogFormat::Json));
}

#[test]
fn test_log_level_from_environment_values() {
    assert_eq!(parse_level("error"), Level::ERROR);
    assert_eq!(parse_level("WARN"), Level::WARN);
    assert_eq!(parse_level("debug"), Level::DEBUG);
    assert_eq!(parse_level("verbose"), Level::INFO);
}

#[test]
fn test_spans_flag() {
    assert!(parse_spans_flag("true"));
    assert!(parse_spans_flag("True"));
    assert!(!parse_spans_flag("on"));
}

#[test]
fn test_error_text_never_carries_cookies() {
    let message = "websocket handshake rejected\nCookie: c_user=100; xs=42%3Asecret";

    let sanitized = sanitize_error_message(message);

    assert!(sanitized.contains("websocket handshake rejected"));
    assert!(!sanitized.contains("secret"));
    assert!(!sanitized.contains("c_user=100"));
}
