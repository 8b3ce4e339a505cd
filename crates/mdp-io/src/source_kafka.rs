use rdkafka::ClientConfig;
use rdkafka::Message as KafkaMessage;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::{Offset, TopicPartitionList};

use anyhow::{Context, Result};
use async_trait::async_trait;
use mdp_core::{Message, Operator, RawRecord, RecordTx, Source};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Only partition 0 of the topic is consumed.
const PARTITION: i32 = 0;

/// Consumes one topic partition, starting at the newest offset.
///
/// Every message value is forwarded as one raw record. Auto-commit is off;
/// an offset is committed once its message has been handed to the worker,
/// so cancellation leaves at most the in-flight message uncommitted.
pub struct KafkaSource {
    pub id: String,
    pub brokers: String,
    pub topic: String,
    pub group_id: String,
}

impl KafkaSource {
    pub fn new(id: String, brokers: &str, topic: &str) -> Self {
        KafkaSource {
            group_id: format!("mdp-{id}"),
            id,
            brokers: brokers.to_string(),
            topic: topic.to_string(),
        }
    }

    fn consumer(&self) -> Result<StreamConsumer, KafkaError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &self.group_id)
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "6000")
            .set("enable.auto.commit", "false")
            .create()?;

        let mut assignment = TopicPartitionList::new();
        assignment.add_partition_offset(&self.topic, PARTITION, Offset::End)?;
        consumer.assign(&assignment)?;
        Ok(consumer)
    }

    fn commit(&self, consumer: &StreamConsumer, offset: i64) -> Result<(), KafkaError> {
        let mut position = TopicPartitionList::new();
        position.add_partition_offset(&self.topic, PARTITION, Offset::Offset(offset + 1))?;
        consumer.commit(&position, CommitMode::Async)
    }
}

#[async_trait]
impl Operator for KafkaSource {
    fn name(&self) -> &str {
        &self.id
    }
}

#[async_trait]
impl Source for KafkaSource {
    async fn run(&mut self, tx: RecordTx, cancel: CancellationToken) -> Result<()> {
        let consumer = self
            .consumer()
            .with_context(|| format!("subscribe to {} on {}", self.topic, self.brokers))?;
        info!(source = %self.id, topic = %self.topic, brokers = %self.brokers, "Kafka consumer started");

        loop {
            // copy out of the borrowed message before awaiting anything else
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                received = consumer.recv() => received.map(|m| {
                    (m.payload().map(<[u8]>::to_vec).unwrap_or_default(), m.offset())
                }),
            };
            match received {
                Ok((payload, offset)) => {
                    debug!(source = %self.id, offset, bytes = payload.len(), "Kafka message received");
                    if tx.send(Message::Record(RawRecord::Bytes(payload))).await.is_err() {
                        break;
                    }
                    if let Err(e) = self.commit(&consumer, offset) {
                        warn!(source = %self.id, offset, error = ?e, "offset commit failed");
                    }
                }
                Err(e) => {
                    warn!(source = %self.id, error = ?e, "kafka error on consuming message from broker");
                }
            }
        }

        if let Err(e) = consumer.unassign() {
            debug!(source = %self.id, error = ?e, "unassign failed");
        }
        drop(consumer);
        info!(source = %self.id, "Kafka consumer stopped");
        let _ = tx.send(Message::Eos).await;
        Ok(())
    }
}
