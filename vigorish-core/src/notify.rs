use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

/// Best-effort chat notifications. Callers log failures and move on;
/// a dead notifier must never hold up settlement.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, chat_id: &str, text: &str) -> Result<()>;
}

#[derive(Serialize)]
struct WebhookMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

/// Posts messages to a chat webhook as JSON.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            client,
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, chat_id: &str, text: &str) -> Result<()> {
        self.client
            .post(&self.url)
            .json(&WebhookMessage { chat_id, text })
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}

/// Stand-in used when no webhook is configured.
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, _chat_id: &str, _text: &str) -> Result<()> {
        Ok(())
    }
}
