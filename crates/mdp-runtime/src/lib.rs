//! # MDP Runtime - Workers and Control Surface
//!
//! This crate ties the connectors of `mdp-io` and the transformation engine of
//! `mdp-tx` into running pipelines.
//!
//! ## Key Components
//!
//! - **Pipeline**: the per-worker record pump. Every record is transformed in
//!   arrival order and handed to an ephemeral task for delivery, with a cap on
//!   how many deliveries one worker keeps pending.
//! - **Worker manager**: one worker per name. Starting a name that is already
//!   running replaces the old worker once it has fully stopped.
//! - **Control surface**: persisted configuration documents and the
//!   [`Controller`] that applies them to the routing table and the workers.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use mdp_core::ConfigKind;
//! use mdp_runtime::{ConfigStore, Controller, RuntimeOptions};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let controller = Controller::new(ConfigStore::new("./config"), RuntimeOptions::default())?;
//! controller.restore().await;
//! controller.refresh_configuration(ConfigKind::Source).await?;
//! controller.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

pub mod control;
pub mod pipeline;
pub mod workers;

pub use control::{ConfigStore, Controller};
pub use pipeline::Pipeline;
pub use workers::WorkerManager;

/// Tuning knobs shared by every worker.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Timeout applied to every HTTP poll and HTTP delivery.
    pub http_timeout: Duration,
    /// Delivery timeout of Kafka sinks.
    pub producer_timeout: Duration,
    /// Bounded capacity of the channel between a source and its pump.
    pub channel_capacity: usize,
    /// Deliveries a single worker may have pending at once.
    pub max_in_flight: usize,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            http_timeout: Duration::from_secs(30),
            producer_timeout: Duration::from_secs(5),
            channel_capacity: 64,
            max_in_flight: 64,
        }
    }
}
