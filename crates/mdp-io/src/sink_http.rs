use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use mdp_core::{Operator, Sink};
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

/// POSTs each record as a JSON body.
pub struct HttpSink {
    id: String,
    url: String,
    client: Client,
}

impl HttpSink {
    pub fn new(url: String, client: Client) -> Self {
        Self {
            id: format!("http:{url}"),
            url,
            client,
        }
    }
}

#[async_trait]
impl Operator for HttpSink {
    fn name(&self) -> &str {
        &self.id
    }
}

#[async_trait]
impl Sink for HttpSink {
    async fn send(&self, record: &Value) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(record)
            .send()
            .await
            .with_context(|| format!("POST {}", self.url))?;
        let status = response.status();
        if !status.is_success() {
            bail!("POST {} returned {}", self.url, status);
        }
        debug!(sink = %self.id, %status, "record delivered");
        Ok(())
    }
}
