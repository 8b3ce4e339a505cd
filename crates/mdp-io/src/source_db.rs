use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use mdp_core::{DbParams, Message, Operator, RawRecord, RecordTx, Source};
use serde_json::{Map, Value};
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::{Column, ConnectOptions, Connection, Executor, Row};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::wait_or_cancel;

/// Polls a MySQL table. Each cycle forwards the whole result set as one
/// batch record (a JSON array of column-name → value objects).
///
/// No connection is held between cycles.
pub struct DbPollSource {
    pub id: String,
    pub params: DbParams,
    pub interval: Duration,
}

impl DbPollSource {
    pub fn new(id: String, params: DbParams, interval: Duration) -> Self {
        Self {
            id,
            params,
            interval,
        }
    }

    fn connect_options(&self) -> MySqlConnectOptions {
        let p = &self.params;
        let mut options = MySqlConnectOptions::new()
            .host(&p.host)
            .port(p.port)
            .username(&p.user);
        if !p.password.is_empty() {
            options = options.password(&p.password);
        }
        if !p.database.is_empty() {
            options = options.database(&p.database);
        }
        options
    }

    async fn fetch(&self) -> Result<Value> {
        let mut conn = self
            .connect_options()
            .connect()
            .await
            .with_context(|| format!("connect to {}:{}", self.params.host, self.params.port))?;

        // a bare &str runs through the text protocol, so every column decodes as text
        let sql = format!("SELECT * FROM {}", self.params.table);
        let rows = conn.fetch_all(sql.as_str()).await;
        close(conn).await;

        let rows = rows.with_context(|| format!("query {}", self.params.table))?;
        Ok(Value::Array(
            rows.iter().map(row_to_object).map(Value::Object).collect(),
        ))
    }
}

async fn close(conn: MySqlConnection) {
    if let Err(e) = conn.close().await {
        debug!(error = ?e, "closing database connection failed");
    }
}

fn row_to_object(row: &MySqlRow) -> Map<String, Value> {
    row.columns()
        .iter()
        .map(|col| {
            let idx = col.ordinal();
            let value = match row.try_get_unchecked::<Option<String>, _>(idx) {
                Ok(Some(text)) => Value::String(text),
                Ok(None) => Value::Null,
                Err(_) => match row.try_get_unchecked::<Option<Vec<u8>>, _>(idx) {
                    Ok(Some(bytes)) => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
                    _ => Value::Null,
                },
            };
            (col.name().to_string(), value)
        })
        .collect()
}

#[async_trait]
impl Operator for DbPollSource {
    fn name(&self) -> &str {
        &self.id
    }
}

#[async_trait]
impl Source for DbPollSource {
    async fn run(&mut self, tx: RecordTx, cancel: CancellationToken) -> Result<()> {
        info!(source = %self.id, host = %self.params.host, table = %self.params.table, "DB poller started");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                fetched = self.fetch() => fetched,
            };
            match fetched {
                Ok(rows) => {
                    debug!(source = %self.id, rows = rows.as_array().map_or(0, Vec::len), "DB poll succeeded");
                    if tx.send(Message::Record(RawRecord::Json(rows))).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(source = %self.id, error = ?e, "DB poll failed"),
            }
            if !wait_or_cancel(&cancel, self.interval).await {
                break;
            }
        }
        info!(source = %self.id, "DB poller stopped");
        let _ = tx.send(Message::Eos).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::closed_addr;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn unreachable_database_is_a_cycle_error() {
        let addr = closed_addr().await;
        let mut source = DbPollSource::new(
            "db-down".into(),
            DbParams {
                host: addr.ip().to_string(),
                port: addr.port(),
                user: "app".into(),
                password: String::new(),
                database: "shop".into(),
                table: "orders".into(),
            },
            Duration::from_millis(10),
        );
        assert!(source.fetch().await.is_err());

        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move { source.run(tx, cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!handle.is_finished());
        cancel.cancel();
        handle.await.unwrap().unwrap();
        assert!(matches!(rx.recv().await, Some(Message::Eos)));
    }
}
