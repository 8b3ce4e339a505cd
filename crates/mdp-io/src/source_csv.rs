use std::fs::File;
use std::io::Seek;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{Array, StringArray};
use arrow_csv::reader::{Format, ReaderBuilder};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use glob::glob;
use mdp_core::{Message, Operator, RawRecord, RecordTx, Source};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const BATCH_ROWS: usize = 8192;

/// One-shot scan of delimited files.
///
/// `path` may be a single file or a glob pattern; every matched file is
/// forwarded as one [`RawRecord::Table`], first row as header. A file that
/// cannot be read is logged and skipped.
pub struct CsvSource {
    pub id: String,
    pub path: String,
}

impl CsvSource {
    pub fn new(id: String, path: String) -> Self {
        Self { id, path }
    }
}

/// Reads a whole delimited file as text cells. Empty cells come back as `""`.
pub fn read_table(path: &str) -> Result<RawRecord> {
    let mut file = File::open(path).with_context(|| format!("open {path}"))?;

    // only the header names matter; every column is read as text
    let format = Format::default().with_header(true);
    let (inferred, _) = format
        .infer_schema(&mut file, Some(0))
        .with_context(|| format!("read header of {path}"))?;
    file.rewind()?;
    let schema = Arc::new(Schema::new(
        inferred
            .fields()
            .iter()
            .map(|f| Field::new(f.name(), DataType::Utf8, true))
            .collect::<Vec<_>>(),
    ));
    let header: Vec<String> = schema.fields().iter().map(|f| f.name().clone()).collect();

    let reader = ReaderBuilder::new(Arc::clone(&schema))
        .with_header(true)
        .with_batch_size(BATCH_ROWS)
        .build(file)?;

    let mut rows: Vec<Vec<String>> = Vec::new();
    for batch in reader {
        let batch = batch.with_context(|| format!("parse {path}"))?;
        let columns = batch
            .columns()
            .iter()
            .map(|c| {
                c.as_any()
                    .downcast_ref::<StringArray>()
                    .context("column is not utf8")
            })
            .collect::<Result<Vec<_>>>()?;
        for row in 0..batch.num_rows() {
            rows.push(
                columns
                    .iter()
                    .map(|col| {
                        if col.is_null(row) {
                            String::new()
                        } else {
                            col.value(row).to_string()
                        }
                    })
                    .collect(),
            );
        }
    }
    Ok(RawRecord::Table { header, rows })
}

#[async_trait]
impl Operator for CsvSource {
    fn name(&self) -> &str {
        &self.id
    }
}

#[async_trait]
impl Source for CsvSource {
    async fn run(&mut self, tx: RecordTx, cancel: CancellationToken) -> Result<()> {
        let mut paths: Vec<String> = vec![];
        match glob(&self.path) {
            Ok(entries) => {
                for entry in entries {
                    match entry {
                        Ok(p) => paths.push(p.display().to_string()),
                        Err(e) => warn!(source = %self.id, error = %e, "unreadable glob entry"),
                    }
                }
            }
            Err(e) => warn!(source = %self.id, pattern = %self.path, error = %e, "invalid file pattern"),
        }

        if paths.is_empty() {
            warn!(source = %self.id, pattern = %self.path, "no files matched");
        }

        for p in paths {
            if cancel.is_cancelled() {
                break;
            }
            let path = p.clone();
            match tokio::task::spawn_blocking(move || read_table(&path)).await {
                Ok(Ok(record)) => {
                    if let RawRecord::Table { rows, .. } = &record {
                        info!(source = %self.id, file = %p, rows = rows.len(), "read file");
                    }
                    if tx.send(Message::Record(record)).await.is_err() {
                        break;
                    }
                }
                Ok(Err(e)) => warn!(source = %self.id, file = %p, error = ?e, "csv read error"),
                Err(e) => warn!(source = %self.id, file = %p, error = %e, "csv reader task failed"),
            }
        }

        info!(source = %self.id, "CSV scan finished");
        let _ = tx.send(Message::Eos).await; // best-effort
        Ok(())
    }
}
