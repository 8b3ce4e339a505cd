use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use mdp_core::{Message, Operator, RawRecord, RecordTx, Source};
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::wait_or_cancel;

/// Polls an HTTP endpoint and forwards every successful response body.
pub struct HttpPollSource {
    pub id: String,
    pub url: String,
    pub interval: Duration,
    client: Client,
}

impl HttpPollSource {
    pub fn new(id: String, url: String, interval: Duration, client: Client) -> Self {
        Self {
            id,
            url,
            interval,
            client,
        }
    }

    // `None` when the endpoint answered with a non-success status
    async fn poll_once(&self) -> Result<Option<Vec<u8>>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("GET {}", self.url))?;
        let status = response.status();
        if !status.is_success() {
            warn!(source = %self.id, url = %self.url, %status, "poll returned non-success status");
            return Ok(None);
        }
        let body = response.bytes().await.context("read response body")?;
        Ok(Some(body.to_vec()))
    }
}

#[async_trait]
impl Operator for HttpPollSource {
    fn name(&self) -> &str {
        &self.id
    }
}

#[async_trait]
impl Source for HttpPollSource {
    async fn run(&mut self, tx: RecordTx, cancel: CancellationToken) -> Result<()> {
        info!(source = %self.id, url = %self.url, interval = ?self.interval, "HTTP poller started");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let polled = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                polled = self.poll_once() => polled,
            };
            match polled {
                Ok(Some(body)) => {
                    debug!(source = %self.id, bytes = body.len(), "HTTP poll succeeded");
                    if tx.send(Message::Record(RawRecord::Bytes(body))).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(source = %self.id, error = ?e, "HTTP poll failed"),
            }
            if !wait_or_cancel(&cancel, self.interval).await {
                break;
            }
        }
        info!(source = %self.id, "HTTP poller stopped");
        let _ = tx.send(Message::Eos).await;
        Ok(())
    }
}
