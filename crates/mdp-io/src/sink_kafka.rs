use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use mdp_core::{Operator, Sink};
use rdkafka::config::ClientConfig;
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde_json::Value;
use tracing::{debug, info};

/// Publishes each record, JSON-encoded, as the value of one Kafka message.
pub struct KafkaSink {
    id: String,
    topic: String,
    producer: FutureProducer,
    timeout: Duration,
}

impl KafkaSink {
    pub fn new(topic: String, producer: FutureProducer, timeout: Duration) -> Self {
        Self {
            id: format!("kafka:{topic}"),
            topic,
            producer,
            timeout,
        }
    }
}

#[async_trait]
impl Operator for KafkaSink {
    fn name(&self) -> &str {
        &self.id
    }
}

#[async_trait]
impl Sink for KafkaSink {
    async fn send(&self, record: &Value) -> Result<()> {
        let payload = serde_json::to_string(record)?;
        let message = FutureRecord::<(), String>::to(&self.topic).payload(&payload);
        match self.producer.send(message, self.timeout).await {
            Ok((partition, offset)) => {
                debug!(sink = %self.id, partition, offset, "record published");
                Ok(())
            }
            Err((e, _)) => Err(anyhow!("publish to {} failed: {}", self.topic, e)),
        }
    }
}

/// Producers shared across deliveries, one per broker address.
#[derive(Default)]
pub struct ProducerPool {
    producers: Mutex<HashMap<String, FutureProducer>>,
}

impl ProducerPool {
    pub fn get(&self, brokers: &str, timeout: Duration) -> Result<FutureProducer, KafkaError> {
        let mut producers = self.producers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(producer) = producers.get(brokers) {
            return Ok(producer.clone());
        }
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .create()?;
        info!(brokers, "Kafka producer created");
        producers.insert(brokers.to_string(), producer.clone());
        Ok(producer)
    }
}
