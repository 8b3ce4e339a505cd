use std::sync::Arc;
use std::time::Duration;

use mdp_core::{DestinationEntry, RoutingTable, Sink, SinkConfig, SourceId};
use serde_json::Value;
use tracing::{debug, warn};

use crate::sink_http::HttpSink;
use crate::sink_kafka::{KafkaSink, ProducerPool};

/// Outcome counts of one fan-out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSummary {
    pub delivered: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Delivers transformed records to the sinks routed for their source id.
///
/// Sinks are visited in configuration order. A failing sink is logged and
/// does not prevent delivery to the ones after it.
pub struct Dispatcher {
    routes: Arc<RoutingTable>,
    client: reqwest::Client,
    producers: ProducerPool,
    producer_timeout: Duration,
}

impl Dispatcher {
    pub fn new(routes: Arc<RoutingTable>, client: reqwest::Client, producer_timeout: Duration) -> Self {
        Self {
            routes,
            client,
            producers: ProducerPool::default(),
            producer_timeout,
        }
    }

    pub fn routes(&self) -> &Arc<RoutingTable> {
        &self.routes
    }

    pub async fn dispatch(&self, source_id: SourceId, record: &Value) -> DispatchSummary {
        let Some(entry) = self.routes.lookup(source_id) else {
            debug!(source_id, "no destination configured, record discarded");
            return DispatchSummary::default();
        };
        self.dispatch_to(&entry, record).await
    }

    /// Delivers to the sinks of an already resolved entry.
    pub async fn dispatch_to(&self, entry: &DestinationEntry, record: &Value) -> DispatchSummary {
        let source_id = entry.source_id;
        let mut summary = DispatchSummary::default();
        for sink in &entry.sinks {
            match self.deliver(sink, record).await {
                Some(Ok(())) => summary.delivered += 1,
                Some(Err(e)) => {
                    summary.failed += 1;
                    warn!(source_id, sink = sink.label(), error = ?e, "delivery failed");
                }
                None => summary.skipped += 1,
            }
        }
        debug!(
            source_id,
            delivered = summary.delivered,
            failed = summary.failed,
            skipped = summary.skipped,
            "record dispatched"
        );
        summary
    }

    /// `None` for sink kinds that do not deliver.
    async fn deliver(&self, sink: &SinkConfig, record: &Value) -> Option<anyhow::Result<()>> {
        match sink {
            SinkConfig::Http { url } => {
                let sink = HttpSink::new(url.clone(), self.client.clone());
                Some(sink.send(record).await)
            }
            SinkConfig::Kafka { brokers, topic } => {
                let producer = match self.producers.get(brokers, self.producer_timeout) {
                    Ok(producer) => producer,
                    Err(e) => return Some(Err(e.into())),
                };
                let sink = KafkaSink::new(topic.clone(), producer, self.producer_timeout);
                Some(sink.send(record).await)
            }
            SinkConfig::Db(params) => {
                debug!(host = %params.host, table = %params.table, "database sink does not deliver");
                None
            }
            SinkConfig::File { path } => {
                debug!(path = %path, "file sink does not deliver");
                None
            }
        }
    }
}
