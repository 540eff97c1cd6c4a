use crate::error::{CoreError, Result};
use crate::types::GameRecord;
use async_trait::async_trait;
use std::time::Duration;

/// Read-only access to game records from the external sports data service.
#[async_trait]
pub trait GameProvider: Send + Sync {
    async fn game(&self, game_id: &str) -> Result<GameRecord>;
}

/// Fetches game records as JSON documents over plain HTTP.
pub struct HttpGameProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGameProvider {
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl GameProvider for HttpGameProvider {
    async fn game(&self, game_id: &str) -> Result<GameRecord> {
        let url = format!("{}/{}", self.base_url, game_id);
        let response = self.client.get(&url).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(CoreError::GameNotFound {
                id: game_id.to_string(),
            });
        }

        let game = response.error_for_status()?.json::<GameRecord>().await?;
        Ok(game)
    }
}
