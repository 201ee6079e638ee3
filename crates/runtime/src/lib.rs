use std::sync::Arc;

use anyhow::{Context, Result};
use switchboard_chats::{ChatContext, Messenger, RealtimeStore};
use switchboard_config::AppConfig;
use tracing::info;

pub mod telemetry {
    use anyhow::{Context, Result};
    use switchboard_config::TelemetryConfig;
    use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

    /// Install the global subscriber. `RUST_LOG` wins over the configured
    /// filter.
    pub fn init_tracing(config: &TelemetryConfig) -> Result<()> {
        let env_filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(&config.filter)
                .with_context(|| format!("invalid tracing filter {:?}", config.filter))?,
        };

        let subscriber = SubscriberBuilder::default()
            .with_env_filter(env_filter)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .map_err(|error| anyhow::anyhow!("failed to set tracing subscriber: {error}"))
    }
}

/// Everything a signed-in session needs, wired to one store.
#[derive(Clone)]
pub struct ChatServices {
    pub config: AppConfig,
    pub context: Arc<ChatContext>,
    pub store: Arc<dyn RealtimeStore>,
    pub messenger: Messenger,
}

impl ChatServices {
    pub fn initialise(config: &AppConfig, store: Arc<dyn RealtimeStore>) -> Result<Self> {
        config
            .validate()
            .context("invalid realtime configuration")?;

        let context = Arc::new(ChatContext::new(config.clone()));
        let messenger = Messenger::new(store.clone(), context.clone());
        info!(
            root = %config.realtime.root,
            sandbox = %config.realtime.sandbox,
            "chat services ready"
        );

        Ok(Self {
            config: config.clone(),
            context,
            store,
            messenger,
        })
    }

    /// Bind the session to `user_id` and start listening on its data.
    pub async fn sign_in(&self, user_id: &str) -> Result<()> {
        self.context
            .sign_in(user_id)
            .with_context(|| format!("failed to sign in {user_id}"))?;
        self.messenger
            .connect()
            .await
            .context("failed to connect messenger")?;
        Ok(())
    }

    /// Tear down every listener, then forget the identity.
    pub fn sign_out(&self) {
        self.messenger.disconnect();
        self.context.sign_out();
    }
}
