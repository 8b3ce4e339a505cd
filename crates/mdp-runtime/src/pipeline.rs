use std::sync::Arc;

use mdp_core::{
    DestinationEntry, Message, PipelineError, RawRecord, RoutingTable, Source, SourceId,
};
use mdp_io::dispatch::Dispatcher;
use serde_json::Value;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Transform-and-dispatch stage shared by every worker.
pub struct Pipeline {
    dispatcher: Dispatcher,
    max_in_flight: usize,
}

impl Pipeline {
    /// `max_in_flight` bounds the deliveries a single worker has running at once.
    pub fn new(dispatcher: Dispatcher, max_in_flight: usize) -> Self {
        Self {
            dispatcher,
            max_in_flight: max_in_flight.max(1),
        }
    }

    pub fn routes(&self) -> &Arc<RoutingTable> {
        self.dispatcher.routes()
    }

    /// Resolves the routing entry for `source_id` and applies its transform.
    ///
    /// `None` when the source is not routed or nothing survived the filter.
    /// The returned entry is the snapshot the payload must be delivered with.
    pub fn process(
        &self,
        source_id: SourceId,
        raw: &RawRecord,
    ) -> Option<(Arc<DestinationEntry>, Value)> {
        let Some(entry) = self.routes().lookup(source_id) else {
            debug!(source_id, "no destination configured, record discarded");
            return None;
        };
        let Some(payload) = mdp_tx::transform(raw, &entry.transform).into_payload() else {
            debug!(source_id, "record filtered out");
            return None;
        };
        Some((entry, payload))
    }

    /// Runs `source` until it ends or `cancel` fires, pumping its records
    /// through transform and dispatch.
    ///
    /// Records are transformed in arrival order; each delivery runs as its
    /// own task and all of them are awaited before this returns. Once
    /// `max_in_flight` deliveries are pending the pump stops reading, which
    /// in turn blocks the source on its bounded channel.
    pub async fn run_worker(
        self: Arc<Self>,
        name: String,
        source_id: SourceId,
        mut source: Box<dyn Source>,
        cancel: CancellationToken,
        channel_capacity: usize,
    ) -> Result<(), PipelineError> {
        let (tx, mut rx) = mpsc::channel(channel_capacity);
        let source_cancel = cancel.child_token();
        let source_task = tokio::spawn(async move { source.run(tx, source_cancel).await });
        info!(worker = %name, source_id, "worker started");

        let slots = Arc::new(Semaphore::new(self.max_in_flight));
        let mut deliveries = JoinSet::new();
        loop {
            let msg = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                msg = rx.recv() => msg,
            };
            match msg {
                Some(Message::Record(raw)) => {
                    if let Some((entry, payload)) = self.process(source_id, &raw) {
                        let permit = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => break,
                            permit = Arc::clone(&slots).acquire_owned() => permit,
                        };
                        // the semaphore is never closed
                        let Ok(permit) = permit else { break };
                        let pipeline = Arc::clone(&self);
                        deliveries.spawn(async move {
                            pipeline.dispatcher.dispatch_to(&entry, &payload).await;
                            drop(permit);
                        });
                    }
                }
                Some(Message::Eos) | None => break,
            }
            while let Some(done) = deliveries.try_join_next() {
                if let Err(e) = done {
                    warn!(worker = %name, error = %e, "delivery task failed");
                }
            }
        }
        drop(rx);

        let outcome = match source_task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(PipelineError::SourceFailed {
                worker: name.clone(),
                error,
            }),
            Err(e) => Err(PipelineError::SourceAborted {
                worker: name.clone(),
                reason: e.to_string(),
            }),
        };
        while let Some(done) = deliveries.join_next().await {
            if let Err(e) = done {
                warn!(worker = %name, error = %e, "delivery task failed");
            }
        }
        info!(worker = %name, source_id, "worker stopped");
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Result, bail};
    use async_trait::async_trait;
    use axum::{Router, extract::State, http::StatusCode, routing::post};
    use mdp_core::{FieldSpec, Operator, RecordTx, SinkConfig, TransformSpec, ValueType};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn pipeline_with(entries: Vec<DestinationEntry>, max_in_flight: usize) -> Pipeline {
        let routes = Arc::new(RoutingTable::new());
        routes.replace(entries);
        Pipeline::new(
            Dispatcher::new(routes, reqwest::Client::new(), Duration::from_secs(5)),
            max_in_flight,
        )
    }

    /// Emits `count` small records, then ends.
    struct Burst {
        count: usize,
    }

    #[async_trait]
    impl Operator for Burst {
        fn name(&self) -> &str {
            "burst"
        }
    }

    #[async_trait]
    impl Source for Burst {
        async fn run(&mut self, tx: RecordTx, _cancel: CancellationToken) -> Result<()> {
            for n in 0..self.count {
                let record = RawRecord::Json(json!({ "n": n }));
                if tx.send(Message::Record(record)).await.is_err() {
                    break;
                }
            }
            let _ = tx.send(Message::Eos).await;
            Ok(())
        }
    }

    struct Unreachable;

    #[async_trait]
    impl Operator for Unreachable {
        fn name(&self) -> &str {
            "unreachable"
        }
    }

    #[async_trait]
    impl Source for Unreachable {
        async fn run(&mut self, _tx: RecordTx, _cancel: CancellationToken) -> Result<()> {
            bail!("broker unreachable")
        }
    }

    #[derive(Clone, Default)]
    struct Load {
        current: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        served: Arc<AtomicUsize>,
    }

    async fn slow_sink(State(load): State<Load>) -> StatusCode {
        let now = load.current.fetch_add(1, Ordering::SeqCst) + 1;
        load.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        load.current.fetch_sub(1, Ordering::SeqCst);
        load.served.fetch_add(1, Ordering::SeqCst);
        StatusCode::OK
    }

    fn adults_only(source_id: SourceId) -> DestinationEntry {
        DestinationEntry {
            source_id,
            sinks: vec![SinkConfig::File {
                path: "out.csv".into(),
            }],
            transform: TransformSpec {
                filter: "age > 18".into(),
                schema: vec![
                    FieldSpec::new("name", ValueType::String),
                    FieldSpec::new("age", ValueType::Int),
                ],
            },
        }
    }

    #[test]
    fn process_applies_the_routed_transform() {
        let p = pipeline_with(vec![adults_only(1)], 4);

        let raw = RawRecord::Bytes(br#"{"name":"Bo","age":30,"extra":true}"#.to_vec());
        let (entry, payload) = p.process(1, &raw).unwrap();
        assert_eq!(entry.source_id, 1);
        assert_eq!(payload, json!({"name": "Bo", "age": 30}));

        let minor = RawRecord::Bytes(br#"{"name":"Ann","age":17}"#.to_vec());
        assert!(p.process(1, &minor).is_none());
        assert!(p.process(2, &raw).is_none());
    }

    #[test]
    fn batch_payload_keeps_only_matching_rows() {
        let p = pipeline_with(vec![adults_only(3)], 4);
        let raw = RawRecord::Json(json!([
            {"name": "Ann", "age": 17},
            {"name": "Bo", "age": 30},
        ]));
        let (_, payload) = p.process(3, &raw).unwrap();
        assert_eq!(payload, json!([{"name": "Bo", "age": 30}]));

        let none_match = RawRecord::Json(json!([{"name": "Ann", "age": 17}]));
        assert!(p.process(3, &none_match).is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn deliveries_per_worker_are_capped() {
        let load = Load::default();
        let router = Router::new()
            .route("/slow", post(slow_sink))
            .with_state(load.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let pipeline = Arc::new(pipeline_with(
            vec![DestinationEntry {
                source_id: 7,
                sinks: vec![SinkConfig::Http {
                    url: format!("http://{addr}/slow"),
                }],
                transform: TransformSpec {
                    filter: String::new(),
                    schema: vec![FieldSpec::new("n", ValueType::Int)],
                },
            }],
            2,
        ));
        pipeline
            .run_worker(
                "burst".into(),
                7,
                Box::new(Burst { count: 12 }),
                CancellationToken::new(),
                4,
            )
            .await
            .unwrap();

        assert_eq!(load.served.load(Ordering::SeqCst), 12);
        assert!(load.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn source_that_cannot_start_ends_the_worker_with_an_error() {
        let pipeline = Arc::new(pipeline_with(vec![], 4));
        let outcome = pipeline
            .run_worker(
                "orders".into(),
                1,
                Box::new(Unreachable),
                CancellationToken::new(),
                4,
            )
            .await;
        match outcome {
            Err(PipelineError::SourceFailed { worker, error }) => {
                assert_eq!(worker, "orders");
                assert!(error.to_string().contains("broker unreachable"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }
}
