//! Configuration loading and validation tests
//!
//! Tests focus on BEHAVIOR of configuration loading, validation, and error handling.
//! We test observable outcomes, not implementation details of TOML parsing.

use messenger_listener::config::{ConfigError, ListenerConfig};
use messenger_listener::events::DomainEvent;
use messenger_listener::listener::Listener;
use messenger_listener::testing::FakeTransport;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "{contents}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let temp_file = write_config(
        r#"
[session]
user_id = "100012345"
client_id = "5f3e2a"
domain = "facebook.com"
cookie_env = "FB_COOKIE"

[listener]
chat_on = false
tick_interval_ms = 500
queue_capacity = 128
sequence_id = 777

[mqtt]
keep_alive_secs = 20

[reconnect]
max_attempts = 10
backoff_pattern_ms = [100, 200]
sustained_delay_ms = 3000
"#,
    );

    let config = ListenerConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.session.user_id, "100012345");
    assert_eq!(config.session.client_id.as_deref(), Some("5f3e2a"));
    assert_eq!(config.session.domain, "facebook.com");
    assert_eq!(config.session.cookie_env, "FB_COOKIE");
    assert!(!config.listener.chat_on);
    assert!(config.listener.foreground);
    assert_eq!(config.listener.sequence_id, Some(777));

    let settings = config.listener_settings();
    assert_eq!(settings.tick_interval, Duration::from_millis(500));
    assert_eq!(settings.queue_capacity, 128);
    assert_eq!(settings.keep_alive, Duration::from_secs(20));
    assert_eq!(settings.connect_timeout, Duration::from_secs(30));
    assert_eq!(settings.reconnect.max_attempts, Some(10));
    assert_eq!(settings.reconnect.backoff_pattern, vec![100, 200]);
    assert_eq!(settings.reconnect.sustained_delay, 3000);
}

#[test]
fn test_config_defaults_for_optional_sections() {
    let temp_file = write_config(
        r#"
[session]
user_id = "100"
"#,
    );

    let config = ListenerConfig::load_from_file(temp_file.path()).unwrap();
    let settings = config.listener_settings();

    assert_eq!(config.session.domain, "messenger.com");
    assert_eq!(config.session.cookie_env, "MESSENGER_COOKIE");
    assert_eq!(settings.tick_interval, Duration::from_millis(1000));
    assert_eq!(settings.poll_wait, Duration::from_millis(50));
    assert_eq!(settings.queue_capacity, 64);
    assert_eq!(settings.enqueue_timeout, Duration::from_millis(50));
    assert_eq!(settings.keep_alive, Duration::from_secs(10));
    assert_eq!(settings.reconnect.max_attempts, None);
    assert_eq!(settings.reconnect.backoff_pattern, vec![250, 500, 1000, 2000]);
    assert_eq!(settings.sequence_id, None);
}

#[test]
fn test_missing_file_is_read_error() {
    let result = ListenerConfig::load_from_file(std::path::Path::new(
        "/nonexistent/messenger-listener/listener.toml",
    ));

    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_invalid_toml_is_parse_error() {
    let temp_file = write_config("[session\nuser_id = ");

    let result = ListenerConfig::load_from_file(temp_file.path());

    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_validation_rejects_bad_values() {
    let cases = [
        (
            "[session]\nuser_id = \"not-a-number\"",
            "non-numeric user id",
        ),
        (
            "[session]\nuser_id = \"100\"\n[listener]\nqueue_capacity = 0",
            "zero queue capacity",
        ),
        (
            "[session]\nuser_id = \"100\"\n[listener]\ntick_interval_ms = 0",
            "zero tick interval",
        ),
        (
            "[session]\nuser_id = \"100\"\n[reconnect]\nmax_attempts = 0",
            "zero max attempts",
        ),
        (
            "[session]\nuser_id = \"100\"\ndomain = \"  \"",
            "blank domain",
        ),
    ];

    for (contents, case) in cases {
        let temp_file = write_config(contents);
        let result = ListenerConfig::load_from_file(temp_file.path());
        assert!(result.is_err(), "Expected {case} to be rejected");
    }
}

#[tokio::test]
async fn test_listener_from_config_reads_cookie_from_environment() {
    // Arrange
    let cookie_env = "MESSENGER_LISTENER_IT_CONFIG_COOKIE";
    std::env::set_var(cookie_env, "c_user=100; xs=from-env");
    let temp_file = write_config(&format!(
        r#"
[session]
user_id = "100"
client_id = "abc"
cookie_env = "{cookie_env}"

[listener]
tick_interval_ms = 1
sequence_id = 55
"#
    ));
    let config = ListenerConfig::load_from_file(temp_file.path()).unwrap();
    let fake = FakeTransport::new();

    // Act
    let mut listener = Listener::from_config(fake.clone(), &config).unwrap();
    let first = listener.next_event().await.unwrap().unwrap();

    // Assert
    assert_eq!(first, DomainEvent::Connect);
    let connects = fake.connects().await;
    assert_eq!(connects[0].headers["Cookie"], "c_user=100; xs=from-env");
    assert_eq!(connects[0].host, "edge-chat.messenger.com");

    let blob: serde_json::Value = serde_json::from_str(&connects[0].username).unwrap();
    assert_eq!(blob["u"], "100");
    assert_eq!(blob["d"], "abc");
}
