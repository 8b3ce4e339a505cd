//! # MDP Core - Multi-source Data Pipeline Core Library
//!
//! This crate provides the foundational types, traits, and configuration model
//! shared by every part of an MDP pipeline. Records are ingested by sources,
//! reshaped by the transformation engine and fanned out to sinks; the wiring
//! between them is a numeric *source id* resolved through the [`RoutingTable`].
//!
//! ## Key Components
//!
//! - **Message System**: [`RawRecord`] values passed from a source to its worker pump
//! - **Operator Traits**: [`Source`] and [`Sink`] capability contracts
//! - **Configuration**: the persisted `SourceData` document and its validated form
//! - **Routing**: the copy-on-write [`RoutingTable`] read by every in-flight record
//! - **Error Handling**: the configuration error taxonomy and [`PipelineError`] for abnormal worker exits
//!
//! ## Example Usage
//!
//! ```rust
//! use mdp_core::{Message, RawRecord};
//! use tokio::sync::mpsc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let (tx, mut rx) = mpsc::channel(16);
//! tx.send(Message::Record(RawRecord::Bytes(br#"{"name":"Ann"}"#.to_vec()))).await?;
//! drop(tx);
//! while let Some(msg) = rx.recv().await {
//!     // hand the record to the transformation engine
//!     # let _ = msg;
//! }
//! # Ok(())
//! # }
//! ```

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub mod config;
pub mod routing;

pub use config::{
    ConfigDocument, ConfigError, ConfigKind, DataSource, DbParams, DestinationEntry, Endpoint,
    FieldSpec, OutputField, SinkConfig, SourceConfig, SourceKind, TransformSpec,
    TransformationConfig, ValueType,
};
pub use routing::RoutingTable;

/// Integer key linking an ingestion config to a destination/transformation config.
pub type SourceId = i64;

/// Type alias for the sender side of a source's record channel
pub type RecordTx = mpsc::Sender<Message>;

/// One unit of raw input as produced by a source connector.
///
/// Sources do not interpret payloads; the transformation engine decides
/// whether a record is a single object, an object array or a table.
#[derive(Debug, Clone, PartialEq)]
pub enum RawRecord {
    /// Undecoded payload bytes (an HTTP response body, a broker message value).
    Bytes(Vec<u8>),

    /// An already decoded JSON value (e.g. a database result set as an array of objects).
    Json(Value),

    /// A delimited file: the header row plus the remaining rows, keyed by position.
    Table {
        header: Vec<String>,
        rows: Vec<Vec<String>>,
    },
}

/// Messages passed from a source connector to its worker pump
#[derive(Debug, Clone)]
pub enum Message {
    /// A raw record to transform and dispatch
    Record(RawRecord),

    /// End-of-stream marker
    ///
    /// Signals that the source will not produce anything else, allowing
    /// the pump to finish before the channel is dropped.
    Eos,
}

/// Ways a worker can end abnormally
///
/// Returned by a worker's run loop; the worker manager logs it. It never
/// reaches the control surface.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The source could not start (e.g. the broker consumer could not be created)
    #[error("source {worker} failed to start: {error:#}")]
    SourceFailed {
        worker: String,
        error: anyhow::Error,
    },

    /// The source task panicked or was aborted
    #[error("source {worker} aborted: {reason}")]
    SourceAborted { worker: String, reason: String },
}

/// Base trait for all pipeline operators
#[async_trait]
pub trait Operator: Send + Sync {
    /// Returns the unique name/identifier of this operator
    ///
    /// Used for logging and for keying workers.
    fn name(&self) -> &str;
}

/// Trait for data source operators
///
/// Sources are the entry points of a pipeline: they poll or subscribe to an
/// external system and push every raw record into the worker's channel.
///
/// ## Examples
/// - HTTP endpoint poller
/// - Kafka partition consumer
/// - Database table poller
/// - Delimited file scanner
#[async_trait]
pub trait Source: Operator {
    /// Run the source operator
    ///
    /// # Arguments
    /// * `tx` - Channel sender for publishing records to the worker pump
    /// * `cancel` - Cancellation token; the source must return promptly once it fires
    ///
    /// # Returns
    /// `Err` only when the source cannot start at all (the worker then terminates).
    /// Failures inside a single polling cycle are logged and absorbed.
    async fn run(&mut self, tx: RecordTx, cancel: CancellationToken) -> Result<()>;
}

/// Trait for data sink operators
///
/// Sinks are the exit points of a pipeline: each call delivers one
/// transformed record to an external system.
#[async_trait]
pub trait Sink: Operator {
    /// Deliver one JSON-encoded record
    async fn send(&self, record: &Value) -> Result<()>;
}
