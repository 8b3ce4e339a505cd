//! # MDP I/O - Source Connectors and Sinks
//!
//! This crate provides the concrete connectors of an MDP pipeline.
//!
//! ## Features
//!
//! ### Data Sources
//! - **HTTP poll**: GET an endpoint every poll interval
//! - **Kafka**: consume partition 0 of a topic from the newest offset
//! - **Database poll**: `SELECT *` from a MySQL table every poll interval
//! - **CSV**: one-shot scan of the files matching a path or glob pattern
//!
//! ### Data Sinks
//! - **HTTP**: POST the JSON-encoded record
//! - **Kafka**: publish the JSON-encoded record as the message value
//!
//! The [`dispatch::Dispatcher`] resolves a source id through the routing
//! table and fans each record out to the configured sinks.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use mdp_core::{SourceConfig, SourceKind};
//! use std::time::Duration;
//!
//! let config = SourceConfig {
//!     source_id: 1,
//!     name: "customers".into(),
//!     kind: SourceKind::Http {
//!         url: "http://localhost:8000/customers".into(),
//!         poll_interval: Duration::from_secs(30),
//!     },
//! };
//! let source = mdp_io::build_source(&config, &reqwest::Client::new());
//! ```

use std::time::Duration;

use mdp_core::{SourceConfig, SourceKind};
use tokio_util::sync::CancellationToken;

/// Fan-out of transformed records to sinks
pub mod dispatch;

/// HTTP POST sink
pub mod sink_http;

/// Kafka publish sink
pub mod sink_kafka;

/// Delimited file source
pub mod source_csv;

/// MySQL table poller
pub mod source_db;

/// HTTP endpoint poller
pub mod source_http;

/// Kafka partition consumer
pub mod source_kafka;

/// Builds the connector matching `config.kind`.
pub fn build_source(config: &SourceConfig, client: &reqwest::Client) -> Box<dyn mdp_core::Source> {
    let id = config.name.clone();
    match &config.kind {
        SourceKind::Http { url, poll_interval } => Box::new(source_http::HttpPollSource::new(
            id,
            url.clone(),
            *poll_interval,
            client.clone(),
        )),
        SourceKind::Kafka { brokers, topic } => {
            Box::new(source_kafka::KafkaSource::new(id, brokers, topic))
        }
        SourceKind::Db {
            params,
            poll_interval,
        } => Box::new(source_db::DbPollSource::new(id, params.clone(), *poll_interval)),
        SourceKind::File { path } => Box::new(source_csv::CsvSource::new(id, path.clone())),
    }
}

/// Sleeps for `interval` unless cancelled first. Returns `false` on cancellation.
pub(crate) async fn wait_or_cancel(cancel: &CancellationToken, interval: Duration) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(interval) => true,
    }
}
