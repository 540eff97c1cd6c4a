use crate::chain::ChainClient;
use crate::error::{CoreError, Result};
use crate::types::{BalanceChange, IncomingTransfer};
use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// JSON-RPC client against the wallet daemon. Balance-change subscriptions
/// are emulated by a per-address polling task; the daemon itself exposes no
/// push channel.
pub struct RpcChainClient {
    client: reqwest::Client,
    url: String,
    poll_interval: Duration,
    next_subscription: AtomicU64,
    subscriptions: Mutex<HashMap<u64, tokio::task::JoinHandle<()>>>,
}

async fn rpc_call(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: serde_json::Value,
) -> Result<serde_json::Value> {
    let response = client
        .post(url)
        .json(&serde_json::json!({
            "jsonrpc": "2.0",
            "id": "0",
            "method": method,
            "params": params,
        }))
        .send()
        .await?;

    let body: serde_json::Value = response.json().await?;

    if let Some(error) = body.get("error") {
        if !error.is_null() {
            let message = error["message"].as_str().unwrap_or("unknown RPC error");
            return Err(CoreError::chain(format!("{} failed: {}", method, message)));
        }
    }

    Ok(body["result"].clone())
}

async fn fetch_balance(client: &reqwest::Client, url: &str, address: &str) -> Result<u64> {
    let result = rpc_call(
        client,
        url,
        "get_balance",
        serde_json::json!({ "address": address }),
    )
    .await?;

    result["balance"]
        .as_u64()
        .ok_or_else(|| CoreError::chain("get_balance response missing balance"))
}

impl RpcChainClient {
    pub fn new(rpc_url: &str, event_poll_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            client,
            url: rpc_url.to_string(),
            poll_interval: Duration::from_secs(event_poll_secs.max(1)),
            next_subscription: AtomicU64::new(1),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }
}

impl Drop for RpcChainClient {
    fn drop(&mut self) {
        for (_, handle) in self.subscriptions.lock().drain() {
            handle.abort();
        }
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn balance(&self, address: &str) -> Result<u64> {
        fetch_balance(&self.client, &self.url, address).await
    }

    async fn send(&self, from: &SigningKey, to: &str, amount: u64) -> Result<String> {
        let result = rpc_call(
            &self.client,
            &self.url,
            "transfer",
            serde_json::json!({
                "secret_key": hex::encode(from.to_bytes()),
                "to": to,
                "amount": amount,
            }),
        )
        .await;

        let result = match result {
            Err(CoreError::Chain(message)) if message.to_lowercase().contains("insufficient") => {
                let from_address = hex::encode(from.verifying_key().to_bytes());
                let available = self.balance(&from_address).await.unwrap_or(0);
                return Err(CoreError::InsufficientFunds {
                    need: amount,
                    available,
                });
            }
            other => other?,
        };

        result["signature"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| CoreError::chain("transfer response missing signature"))
    }

    async fn recent_incoming(
        &self,
        address: &str,
        limit: usize,
    ) -> Result<Vec<IncomingTransfer>> {
        let result = rpc_call(
            &self.client,
            &self.url,
            "recent_transfers",
            serde_json::json!({ "address": address, "limit": limit }),
        )
        .await?;

        let entries = result["transfers"]
            .as_array()
            .ok_or_else(|| CoreError::chain("recent_transfers response missing transfers"))?;

        let mut transfers = Vec::with_capacity(entries.len());
        for entry in entries {
            let signature = entry["signature"]
                .as_str()
                .ok_or_else(|| CoreError::chain("transfer entry missing signature"))?;
            let amount = entry["amount"]
                .as_u64()
                .ok_or_else(|| CoreError::chain("transfer entry missing amount"))?;
            transfers.push(IncomingTransfer {
                signature: signature.to_string(),
                amount,
            });
        }

        Ok(transfers)
    }

    async fn subscribe(
        &self,
        address: &str,
        events: mpsc::UnboundedSender<BalanceChange>,
    ) -> Result<u64> {
        let subscription_id = self.next_subscription.fetch_add(1, Ordering::SeqCst);

        let client = self.client.clone();
        let url = self.url.clone();
        let address = address.to_string();
        let poll_interval = self.poll_interval;

        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(poll_interval);
            let mut last_balance: Option<u64> = None;

            loop {
                timer.tick().await;

                let balance = match fetch_balance(&client, &url, &address).await {
                    Ok(balance) => balance,
                    Err(e) => {
                        tracing::debug!("Balance poll for {} failed: {}", address, e);
                        continue;
                    }
                };

                if last_balance != Some(balance) {
                    let had_baseline = last_balance.is_some();
                    last_balance = Some(balance);

                    if had_baseline {
                        let change = BalanceChange {
                            address: address.clone(),
                            balance,
                        };
                        if events.send(change).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        self.subscriptions.lock().insert(subscription_id, handle);
        Ok(subscription_id)
    }

    async fn unsubscribe(&self, subscription_id: u64) -> Result<()> {
        if let Some(handle) = self.subscriptions.lock().remove(&subscription_id) {
            handle.abort();
        }
        Ok(())
    }
}
