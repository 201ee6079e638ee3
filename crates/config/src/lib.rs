use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

const DEFAULT_CONFIG_FILES: &[&str] = &[
    "switchboard.toml",
    "config/switchboard.toml",
    "crates/config/switchboard.toml",
    "../switchboard.toml",
    "../config/switchboard.toml",
    "../crates/config/switchboard.toml",
];

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub realtime: RealtimeConfig,
    pub messaging: MessagingConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// Reject namespaces that cannot be used as store path segments.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (key, value) in [
            ("realtime.root", &self.realtime.root),
            ("realtime.sandbox", &self.realtime.sandbox),
        ] {
            if value.trim().is_empty() {
                bail!("{key} cannot be empty");
            }
            if value.contains('/') {
                bail!("{key} cannot contain '/' (got {value:?})");
            }
        }
        Ok(())
    }
}

/// Location of the chat data inside the realtime store.
///
/// Every path the chat layer computes starts with `[root, sandbox]`.
///
/// ```
/// use switchboard_config::RealtimeConfig;
///
/// let realtime = RealtimeConfig::default();
/// assert_eq!(realtime.root, "switchboard");
/// assert_eq!(realtime.sandbox, "prod");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    #[serde(default = "RealtimeConfig::default_root")]
    pub root: String,
    #[serde(default = "RealtimeConfig::default_sandbox")]
    pub sandbox: String,
}

impl RealtimeConfig {
    fn default_root() -> String {
        "switchboard".to_string()
    }

    fn default_sandbox() -> String {
        "prod".to_string()
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            root: Self::default_root(),
            sandbox: Self::default_sandbox(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagingConfig {
    /// Answer every incoming message with a `received` delivery receipt.
    #[serde(default = "MessagingConfig::enabled")]
    pub delivery_receipts_enabled: bool,
    /// Join group chats as soon as an invitation arrives.
    #[serde(default = "MessagingConfig::enabled")]
    pub auto_accept_chat_invite: bool,
}

impl MessagingConfig {
    const fn enabled() -> bool {
        true
    }
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            delivery_receipts_enabled: true,
            auto_accept_chat_invite: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Fallback `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "TelemetryConfig::default_filter")]
    pub filter: String,
}

impl TelemetryConfig {
    fn default_filter() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: Self::default_filter(),
        }
    }
}

/// Load the application configuration by combining defaults, files, and environment overrides.
///
/// ```
/// use switchboard_config::load;
///
/// std::env::remove_var("SWITCHBOARD_CONFIG");
///
/// let config = load().expect("configuration should load with defaults");
/// assert!(!config.realtime.root.is_empty());
/// ```
pub fn load() -> anyhow::Result<AppConfig> {
    let defaults = AppConfig::default();

    let mut builder = config::Config::builder()
        .set_default("realtime.root", defaults.realtime.root.clone())
        .context("invalid default for realtime.root")?
        .set_default("realtime.sandbox", defaults.realtime.sandbox.clone())
        .context("invalid default for realtime.sandbox")?
        .set_default(
            "messaging.delivery_receipts_enabled",
            defaults.messaging.delivery_receipts_enabled,
        )
        .context("invalid default for messaging.delivery_receipts_enabled")?
        .set_default(
            "messaging.auto_accept_chat_invite",
            defaults.messaging.auto_accept_chat_invite,
        )
        .context("invalid default for messaging.auto_accept_chat_invite")?
        .set_default("telemetry.filter", defaults.telemetry.filter.clone())
        .context("invalid default for telemetry.filter")?;

    let environment_overrides = config::Environment::with_prefix("SWITCHBOARD")
        .separator("__")
        .try_parsing(true);

    let mut config_file_attached = false;

    if let Ok(path) = std::env::var("SWITCHBOARD_CONFIG") {
        builder = builder.add_source(config::File::from(PathBuf::from(&path)));
        config_file_attached = true;
        debug!(path, "loading configuration via SWITCHBOARD_CONFIG");
    } else if let Ok(cwd) = std::env::current_dir() {
        let fallback = DEFAULT_CONFIG_FILES
            .iter()
            .map(|candidate| cwd.join(candidate))
            .find(|path| path.exists());

        if let Some(path) = fallback {
            debug!(path = %path.display(), "loading configuration file");
            builder = builder.add_source(config::File::from(path));
            config_file_attached = true;
        }
    }

    if !config_file_attached {
        debug!("no configuration file found, relying on defaults and environment overrides");
    }

    builder = builder.add_source(environment_overrides);

    let cfg = builder.build().context("unable to build configuration")?;

    let config = cfg
        .try_deserialize::<AppConfig>()
        .context("invalid configuration")?;

    config.validate().context("invalid configuration")?;

    debug!(?config, "loaded chat configuration");
    Ok(config)
}
