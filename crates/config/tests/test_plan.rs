//! Test plan for the `switchboard-config` crate.
//!
//! These tests exercise the configuration loader across default handling,
//! file discovery, environment overrides, and validation behaviour.

use std::fs;
use std::path::{Path, PathBuf};

use serial_test::serial;
use tempfile::TempDir;

use switchboard_config::{load, AppConfig, MessagingConfig, RealtimeConfig, TelemetryConfig};

const ENV_VARS_TO_RESET: &[&str] = &[
    "SWITCHBOARD_CONFIG",
    "SWITCHBOARD__REALTIME__ROOT",
    "SWITCHBOARD__REALTIME__SANDBOX",
    "SWITCHBOARD__MESSAGING__DELIVERY_RECEIPTS_ENABLED",
    "SWITCHBOARD__MESSAGING__AUTO_ACCEPT_CHAT_INVITE",
    "SWITCHBOARD__TELEMETRY__FILTER",
];

struct TestContext {
    vars: Vec<(String, Option<String>)>,
    original_dir: Option<PathBuf>,
}

impl TestContext {
    fn new() -> Self {
        Self {
            vars: Vec::new(),
            original_dir: None,
        }
    }

    fn reset_environment(&mut self) {
        for key in ENV_VARS_TO_RESET {
            self.remove_var(key);
        }
    }

    fn set_var(&mut self, key: &str, value: impl AsRef<str>) {
        let previous = std::env::var(key).ok();
        std::env::set_var(key, value.as_ref());
        self.vars.push((key.to_string(), previous));
    }

    fn remove_var(&mut self, key: &str) {
        let previous = std::env::var(key).ok();
        std::env::remove_var(key);
        self.vars.push((key.to_string(), previous));
    }

    fn set_current_dir(&mut self, dir: &Path) {
        if self.original_dir.is_none() {
            self.original_dir =
                Some(std::env::current_dir().expect("failed to capture current directory"));
        }
        std::env::set_current_dir(dir).expect("failed to set current directory");
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        if let Some(original) = self.original_dir.take() {
            let _ = std::env::set_current_dir(original);
        }

        while let Some((key, value)) = self.vars.pop() {
            match value {
                Some(val) => std::env::set_var(&key, val),
                None => std::env::remove_var(&key),
            }
        }
    }
}

fn write_config_file(root: &Path, relative: &str, contents: &str) -> PathBuf {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("failed to create config directories");
    }
    fs::write(&path, contents).expect("failed to write config file");
    path
}

#[test]
#[serial]
fn load_uses_default_values_when_no_files_found() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let mut ctx = TestContext::new();
    ctx.reset_environment();
    ctx.set_current_dir(temp_dir.path());

    let config = load().expect("configuration load should succeed without files");
    let defaults = AppConfig::default();

    assert_eq!(config.realtime.root, defaults.realtime.root);
    assert_eq!(config.realtime.sandbox, defaults.realtime.sandbox);
    assert_eq!(
        config.messaging.delivery_receipts_enabled,
        defaults.messaging.delivery_receipts_enabled
    );
    assert_eq!(
        config.messaging.auto_accept_chat_invite,
        defaults.messaging.auto_accept_chat_invite
    );
    assert_eq!(config.telemetry.filter, defaults.telemetry.filter);
}

#[test]
#[serial]
fn load_picks_first_available_file_in_search_order() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let mut ctx = TestContext::new();
    ctx.reset_environment();
    ctx.set_current_dir(temp_dir.path());

    write_config_file(
        temp_dir.path(),
        "switchboard.toml",
        r#"
        [realtime]
        sandbox = "first"
        "#,
    );
    write_config_file(
        temp_dir.path(),
        "config/switchboard.toml",
        r#"
        [realtime]
        sandbox = "second"
        "#,
    );

    let config = load().expect("configuration load should pick the first file");
    assert_eq!(config.realtime.sandbox, "first");
}

#[test]
#[serial]
fn load_merges_partial_file_with_defaults() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let mut ctx = TestContext::new();
    ctx.reset_environment();
    ctx.set_current_dir(temp_dir.path());

    write_config_file(
        temp_dir.path(),
        "switchboard.toml",
        r#"
        [messaging]
        delivery_receipts_enabled = false
        "#,
    );

    let config = load().expect("partial configuration should load");
    assert!(!config.messaging.delivery_receipts_enabled);
    assert!(config.messaging.auto_accept_chat_invite);
    assert_eq!(config.realtime.root, RealtimeConfig::default().root);
}

#[test]
#[serial]
fn load_prefers_explicit_config_path() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let mut ctx = TestContext::new();
    ctx.reset_environment();
    ctx.set_current_dir(temp_dir.path());

    write_config_file(
        temp_dir.path(),
        "switchboard.toml",
        r#"
        [realtime]
        root = "discovered"
        "#,
    );
    let explicit = write_config_file(
        temp_dir.path(),
        "elsewhere/custom.toml",
        r#"
        [realtime]
        root = "explicit"
        "#,
    );
    ctx.set_var("SWITCHBOARD_CONFIG", explicit.display().to_string());

    let config = load().expect("explicit configuration should load");
    assert_eq!(config.realtime.root, "explicit");
}

#[test]
#[serial]
fn load_applies_environment_overrides() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let mut ctx = TestContext::new();
    ctx.reset_environment();
    ctx.set_current_dir(temp_dir.path());

    write_config_file(
        temp_dir.path(),
        "switchboard.toml",
        r#"
        [realtime]
        sandbox = "from-file"
        "#,
    );
    ctx.set_var("SWITCHBOARD__REALTIME__SANDBOX", "from-env");
    ctx.set_var("SWITCHBOARD__MESSAGING__AUTO_ACCEPT_CHAT_INVITE", "false");
    ctx.set_var("SWITCHBOARD__TELEMETRY__FILTER", "debug");

    let config = load().expect("environment overrides should load");
    assert_eq!(config.realtime.sandbox, "from-env");
    assert!(!config.messaging.auto_accept_chat_invite);
    assert_eq!(config.telemetry.filter, "debug");
}

#[test]
#[serial]
fn load_rejects_namespaces_that_are_not_path_segments() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let mut ctx = TestContext::new();
    ctx.reset_environment();
    ctx.set_current_dir(temp_dir.path());

    write_config_file(
        temp_dir.path(),
        "switchboard.toml",
        r#"
        [realtime]
        root = "a/b"
        "#,
    );

    let error = load().expect_err("slash in root must be rejected");
    assert!(format!("{error:?}").contains("realtime.root"));
}

#[test]
#[serial]
fn load_errors_on_invalid_toml_contents() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let mut ctx = TestContext::new();
    ctx.reset_environment();
    ctx.set_current_dir(temp_dir.path());

    write_config_file(temp_dir.path(), "switchboard.toml", "[realtime\nroot = ");

    assert!(load().is_err());
}

#[test]
fn validate_rejects_empty_sandbox() {
    let mut config = AppConfig::default();
    config.realtime.sandbox = "  ".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn section_defaults_match_expected_values() {
    let messaging = MessagingConfig::default();
    assert!(messaging.delivery_receipts_enabled);
    assert!(messaging.auto_accept_chat_invite);
    assert_eq!(TelemetryConfig::default().filter, "info");
    assert!(AppConfig::default().validate().is_ok());
}
