use std::{env, fs, sync::Arc};

use anyhow::{Context, Result};
use serial_test::serial;
use switchboard_chats::{InMemoryStore, Path, RealtimeStore};
use switchboard_config::{AppConfig, TelemetryConfig};
use switchboard_runtime::{telemetry, ChatServices};
use tempfile::TempDir;

fn initialise(config: &AppConfig) -> Result<(Arc<InMemoryStore>, ChatServices)> {
    let store = Arc::new(InMemoryStore::new());
    let shared: Arc<dyn RealtimeStore> = store.clone();
    let services =
        ChatServices::initialise(config, shared).context("failed to initialise chat services")?;
    Ok((store, services))
}

#[test]
fn initialise_rejects_unusable_namespace() {
    let mut config = AppConfig::default();
    config.realtime.sandbox = "a/b".into();

    let error = initialise(&config).err().expect("namespace with '/' must fail");
    assert!(format!("{error:#}").contains("realtime.sandbox"));
}

#[tokio::test]
#[serial]
async fn sign_in_uses_namespace_from_config_file() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config_path = temp_dir.path().join("switchboard.toml");
    fs::write(
        &config_path,
        "[realtime]\nroot = \"chatapp\"\nsandbox = \"staging\"\n",
    )?;
    env::set_var("SWITCHBOARD_CONFIG", &config_path);
    let loaded = switchboard_config::load();
    env::remove_var("SWITCHBOARD_CONFIG");
    let config = loaded?;

    let (store, services) = initialise(&config)?;
    services.sign_in("alice").await?;
    assert!(services.messenger.is_connected());

    services.messenger.block(&switchboard_chats::User::new("mallory")).await?;
    assert!(store
        .value_at(&Path::parse("chatapp/staging/users/alice/blocked/mallory"))
        .is_some());

    services.sign_out();
    Ok(())
}

#[tokio::test]
async fn sign_out_disconnects_and_forgets_identity() -> Result<()> {
    let (_store, services) = initialise(&AppConfig::default())?;
    services.sign_in("alice").await?;
    assert!(services.context.is_signed_in());

    services.sign_out();
    assert!(!services.messenger.is_connected());
    assert!(!services.context.is_signed_in());
    assert!(services.context.current_user_id().is_err());
    Ok(())
}

#[tokio::test]
async fn sign_in_rejects_invalid_user_id() -> Result<()> {
    let (_store, services) = initialise(&AppConfig::default())?;
    assert!(services.sign_in("").await.is_err());
    assert!(!services.messenger.is_connected());
    Ok(())
}

#[test]
#[serial]
fn tracing_installs_once() {
    env::remove_var("RUST_LOG");

    let bad = TelemetryConfig {
        filter: "switchboard=loudest".into(),
    };
    assert!(telemetry::init_tracing(&bad).is_err());

    telemetry::init_tracing(&TelemetryConfig::default()).expect("first install succeeds");
    assert!(telemetry::init_tracing(&TelemetryConfig::default()).is_err());
}
