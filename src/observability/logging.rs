//! Structured logging system using tracing crate
//!
//! Provides contextual, machine-readable logging with span macros for the
//! listener session, connection attempts and frame handling.
//!
//! ## Log Format Options
//!
//! The output format is controlled by the `LOG_FORMAT` environment variable:
//!
//! - `json` - Structured JSON format for production and log aggregation systems
//! - `pretty` - Human-readable format with colors and indentation for development
//! - `compact` - Terminal-friendly format with colors but minimal spacing
//!
//! ## Environment Variables
//!
//! - `LOG_LEVEL`: Log level (ERROR, WARN, INFO, DEBUG, TRACE) - defaults to INFO
//! - `LOG_FORMAT`: Output format (json, pretty, compact) - defaults to json
//! - `LOG_SPANS`: Include span events (true/false) - defaults to false
//! - `RUST_LOG`: Override log filtering (follows env_logger format)
//!
//! ## Examples
//!
//! ```bash
//! # Production JSON logging
//! LOG_FORMAT=json LOG_LEVEL=INFO ./messenger-listen run -c listener.toml
//!
//! # Watch raw payloads while debugging
//! LOG_FORMAT=pretty LOG_LEVEL=DEBUG ./messenger-listen run -c listener.toml
//! ```

use std::env;
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON format for structured logging (machine-readable)
    Json,
    /// Pretty format with colors and indentation (human-readable)
    Pretty,
    /// Compact format with colors but minimal spacing (terminal-friendly)
    Compact,
}

impl LogFormat {
    /// Parse log format from string
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Json, // Default to JSON for production
        }
    }
}

/// Parse a log level name, falling back to INFO (pure function)
pub fn parse_level(s: &str) -> Level {
    match s.to_uppercase().as_str() {
        "ERROR" => Level::ERROR,
        "WARN" => Level::WARN,
        "INFO" => Level::INFO,
        "DEBUG" => Level::DEBUG,
        "TRACE" => Level::TRACE,
        _ => Level::INFO,
    }
}

/// Only the literal "true" enables span events (pure function)
pub fn parse_spans_flag(s: &str) -> bool {
    s.to_lowercase() == "true"
}

/// Default filter: the requested level for us, warnings for the MQTT stack
fn build_filter(level: Level) -> EnvFilter {
    let mut filter = EnvFilter::new(level.to_string());
    for directive in [
        "rumqttc=warn",
        "tungstenite=warn",
        "tokio_tungstenite=warn",
        "rustls=warn",
        "tokio=warn",
    ] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

/// Initialize logging with manual configuration
pub fn init_logging(level: Level, format: LogFormat, include_spans: bool) {
    let filter = match env::var("RUST_LOG") {
        // Allow RUST_LOG to override
        Ok(rust_log) => EnvFilter::new(rust_log),
        Err(_) => build_filter(level),
    };

    let span_events = if include_spans {
        fmt::format::FmtSpan::NEW | fmt::format::FmtSpan::CLOSE
    } else {
        fmt::format::FmtSpan::NONE
    };

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => {
            let fmt_layer = fmt::layer().json().with_span_events(span_events);
            subscriber.with(fmt_layer).init();
        }
        LogFormat::Pretty => {
            let fmt_layer = fmt::layer()
                .pretty()
                .with_ansi(true)
                .with_span_events(span_events);
            subscriber.with(fmt_layer).init();
        }
        LogFormat::Compact => {
            let fmt_layer = fmt::layer()
                .compact()
                .with_ansi(true)
                .with_target(false)
                .with_span_events(span_events);
            subscriber.with(fmt_layer).init();
        }
    }
}

/// Initialize logging from environment variables
pub fn init_default_logging() {
    let level = parse_level(&env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()));
    let format = LogFormat::parse(&env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string()));
    let include_spans =
        parse_spans_flag(&env::var("LOG_SPANS").unwrap_or_else(|_| "false".to_string()));

    init_logging(level, format, include_spans);
}

/// Create a span covering one listener session
#[macro_export]
macro_rules! listener_span {
    ($($field:tt)*) => {
        tracing::info_span!("listener_session", $($field)*)
    };
}

/// Create a span for one connect attempt
#[macro_export]
macro_rules! connection_span {
    ($($field:tt)*) => {
        tracing::info_span!("mqtt_connection", $($field)*)
    };
}

/// Create a span for handling one received frame
#[macro_export]
macro_rules! frame_span {
    ($($field:tt)*) => {
        tracing::debug_span!("frame", $($field)*)
    };
}

// Re-export macros for convenience
pub use {connection_span, frame_span, listener_span};
