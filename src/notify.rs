// Best-effort operator notifications
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Fire-and-forget message channel. Implementations must never block the
/// caller and never surface an error.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str);
}

/// Posts messages to a Discord webhook on a spawned task
pub struct DiscordNotifier {
    webhook_url: String,
    client: reqwest::Client,
}

impl DiscordNotifier {
    pub fn new(webhook_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();

        Self {
            webhook_url,
            client,
        }
    }

    /// `None` when DISCORD_WEBHOOK_URL is unset or empty
    pub fn from_env() -> Option<Self> {
        std::env::var("DISCORD_WEBHOOK_URL")
            .ok()
            .filter(|url| !url.trim().is_empty())
            .map(Self::new)
    }
}

impl Notifier for DiscordNotifier {
    fn notify(&self, message: &str) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No runtime for webhook post, dropping: {}", message);
            return;
        };

        let client = self.client.clone();
        let url = self.webhook_url.clone();
        let payload = json!({ "content": message });

        handle.spawn(async move {
            match client.post(&url).json(&payload).send().await {
                Ok(resp) if !resp.status().is_success() => {
                    tracing::warn!("Discord webhook returned {}", resp.status());
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Discord webhook failed: {}", e),
            }
        });
    }
}

/// Used when no webhook is configured
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str) {
        tracing::info!(target: "gapbot::notify", "{}", message);
    }
}

/// Discord when configured, otherwise log-only
pub fn from_env() -> Arc<dyn Notifier> {
    match DiscordNotifier::from_env() {
        Some(discord) => Arc::new(discord),
        None => {
            tracing::info!("DISCORD_WEBHOOK_URL not set, notifications go to the log only");
            Arc::new(LogNotifier)
        }
    }
}
