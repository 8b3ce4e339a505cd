use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use mdp_core::{ConfigDocument, ConfigError, ConfigKind, FieldSpec, RawRecord, TransformSpec, ValueType};
use mdp_runtime::{ConfigStore, Controller, RuntimeOptions};
use serde_json::{Value, json};

#[derive(Clone, Default)]
struct Sinks {
    received: Arc<Mutex<Vec<(String, Value)>>>,
}

impl Sinks {
    fn bodies(&self, target: &str) -> Vec<Value> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == target)
            .map(|(_, body)| body.clone())
            .collect()
    }

    fn count(&self) -> usize {
        self.received.lock().unwrap().len()
    }
}

async fn collect(
    State(sinks): State<Sinks>,
    Path(target): Path<String>,
    Json(body): Json<Value>,
) -> StatusCode {
    sinks.received.lock().unwrap().push((target, body));
    StatusCode::OK
}

/// Serves `GET /people` plus a collecting `POST /sink/:target`.
async fn upstream(people: Value) -> (SocketAddr, Sinks) {
    let sinks = Sinks::default();
    let router = Router::new()
        .route("/people", get(move || async move { Json(people) }))
        .route("/sink/:target", post(collect))
        .with_state(sinks.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (addr, sinks)
}

fn controller(dir: &tempfile::TempDir) -> Controller {
    Controller::new(ConfigStore::new(dir.path()), RuntimeOptions::default()).unwrap()
}

fn people_schema() -> TransformSpec {
    TransformSpec {
        filter: String::new(),
        schema: vec![
            FieldSpec::new("name", ValueType::String),
            FieldSpec::new("age", ValueType::Int),
        ],
    }
}

async fn apply(controller: &Controller, kind: ConfigKind, yaml: &str) {
    let doc = ConfigDocument::from_yaml(yaml).unwrap();
    controller.update_configuration(kind, &doc).await.unwrap();
    controller.refresh_configuration(kind).await.unwrap();
}

async fn wait_for(sinks: &Sinks, at_least: usize) {
    for _ in 0..100 {
        if sinks.count() >= at_least {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("expected {at_least} deliveries, got {}", sinks.count());
}

fn destination_yaml(source: i64, addr: SocketAddr, target: &str, rule: &str, field: &str) -> String {
    format!(
        r#"
SourceData:
  - Source: {source}
    NAME: out
    TYPEOF:
      - TYPE: API
        URL: "http://{addr}/sink/{target}"
    TransformationConfig:
      RuleType: "{rule}"
      OutputFormat:
        - Key: name
          DisplayName: {field}
          KeyType: STRING
        - Key: age
          KeyType: INT
"#
    )
}

#[test]
fn filter_drops_minors() {
    let spec = TransformSpec {
        filter: "age > 18".into(),
        ..people_schema()
    };
    let ann = RawRecord::Bytes(br#"{"name":"Ann","age":17}"#.to_vec());
    assert!(mdp_tx::transform(&ann, &spec).is_empty());
}

#[test]
fn filter_keeps_adults() {
    let spec = TransformSpec {
        filter: "age > 18".into(),
        ..people_schema()
    };
    let bo = RawRecord::Bytes(br#"{"name":"Bo","age":30}"#.to_vec());
    assert_eq!(
        mdp_tx::transform(&bo, &spec).into_payload(),
        Some(json!({"name": "Bo", "age": 30}))
    );
}

#[test]
fn tabular_cells_are_copied_as_text() {
    let table = RawRecord::Table {
        header: vec!["name".into(), "age".into()],
        rows: vec![vec!["Cy".into(), "22".into()]],
    };
    assert_eq!(
        mdp_tx::transform(&table, &people_schema()).into_payload(),
        Some(json!([{"name": "Cy", "age": "22"}]))
    );
}

#[tokio::test]
async fn empty_source_document_is_rejected_and_not_written() {
    let dir = tempfile::tempdir().unwrap();
    let controller = controller(&dir);

    let err = controller
        .update_configuration(ConfigKind::Source, &ConfigDocument::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ConfigError::EmptyData));
    assert_eq!(err.to_string(), "empty data");
    assert!(!dir.path().join("sourceConfig.yaml").exists());
    assert!(matches!(
        controller.load_configuration(ConfigKind::Source).await,
        Err(ConfigError::NotFound(_))
    ));
}

#[tokio::test]
async fn polled_records_reach_their_destination() {
    let (addr, sinks) = upstream(json!({"name": "Bo", "age": 30, "city": "Oslo"})).await;
    let dir = tempfile::tempdir().unwrap();
    let controller = controller(&dir);

    apply(
        &controller,
        ConfigKind::Destination,
        &destination_yaml(1, addr, "main", "age > 18", "name"),
    )
    .await;
    apply(
        &controller,
        ConfigKind::Source,
        &format!(
            r#"
SourceData:
  - Source: 1
    NAME: people
    TYPEOF:
      - TYPE: API
        URL: "http://{addr}/people"
        Duration: 1h
"#
        ),
    )
    .await;

    wait_for(&sinks, 1).await;
    assert_eq!(sinks.bodies("main"), vec![json!({"name": "Bo", "age": 30})]);
    assert_eq!(controller.workers().names(), vec!["people"]);

    controller.shutdown().await;
    assert!(controller.workers().is_empty());
}

#[tokio::test]
async fn file_scan_delivers_one_batch_then_finishes() {
    let (addr, sinks) = upstream(Value::Null).await;
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("people.csv");
    std::fs::write(&csv, "name,age\nCy,22\n").unwrap();
    let controller = controller(&dir);

    apply(
        &controller,
        ConfigKind::Destination,
        &destination_yaml(5, addr, "files", "", "name"),
    )
    .await;
    apply(
        &controller,
        ConfigKind::Source,
        &format!(
            r#"
SourceData:
  - Source: 5
    NAME: people-file
    TYPEOF:
      - TYPE: FILE
        FILE_PATH: "{}"
"#,
            csv.display()
        ),
    )
    .await;

    wait_for(&sinks, 1).await;
    assert_eq!(sinks.bodies("files"), vec![json!([{"name": "Cy", "age": "22"}])]);

    // the one-shot worker unregisters itself once it is done
    for _ in 0..100 {
        if controller.workers().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(controller.workers().is_empty());
}

#[tokio::test]
async fn records_without_a_destination_are_dropped() {
    let (addr, sinks) = upstream(json!({"name": "Bo", "age": 30})).await;
    let dir = tempfile::tempdir().unwrap();
    let controller = controller(&dir);

    apply(
        &controller,
        ConfigKind::Destination,
        &destination_yaml(2, addr, "other", "", "name"),
    )
    .await;
    apply(
        &controller,
        ConfigKind::Source,
        &format!(
            r#"
SourceData:
  - Source: 1
    NAME: unrouted
    TYPEOF:
      - TYPE: API
        URL: "http://{addr}/people"
        Duration: 50ms
"#
        ),
    )
    .await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(controller.workers().is_running("unrouted"));
    assert_eq!(sinks.count(), 0);
    controller.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reconfiguring_destinations_mid_delivery_uses_one_snapshot_per_record() {
    let (addr, sinks) = upstream(json!({"name": "Di", "age": 40})).await;
    let dir = tempfile::tempdir().unwrap();
    let controller = Arc::new(controller(&dir));

    let old = destination_yaml(1, addr, "old", "", "name");
    let new = destination_yaml(1, addr, "new", "", "label");
    apply(&controller, ConfigKind::Destination, &old).await;
    apply(
        &controller,
        ConfigKind::Source,
        &format!(
            r#"
SourceData:
  - Source: 1
    NAME: fast
    TYPEOF:
      - TYPE: HTTP
        URL: "http://{addr}/people"
        Duration: 5ms
"#
        ),
    )
    .await;

    for round in 0..40 {
        let yaml = if round % 2 == 0 { &new } else { &old };
        apply(&controller, ConfigKind::Destination, yaml).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    wait_for(&sinks, 1).await;
    controller.shutdown().await;

    // a record sent to "old" was shaped by the old schema, and likewise for "new"
    for body in sinks.bodies("old") {
        assert_eq!(body, json!({"name": "Di", "age": 40}));
    }
    for body in sinks.bodies("new") {
        assert_eq!(body, json!({"label": "Di", "age": 40}));
    }
    assert!(controller.workers().is_empty());
}
