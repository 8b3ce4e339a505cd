use mdp_core::{RawRecord, TransformSpec};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::expr::{Expression, flatten};
use crate::schema::materialize;

/// A raw record decoded into one of the shapes the engine understands.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    /// Anything that is not an object or a homogeneous array; exposed to the
    /// schema as a single `data` field.
    Scalar(Value),
    Object(Map<String, Value>),
    ObjectArray(Vec<Map<String, Value>>),
    /// A header row plus data rows keyed by header position.
    Tabular {
        header: Vec<String>,
        rows: Vec<Vec<Value>>,
    },
}

impl Shape {
    /// Decodes a raw record. Never fails: undecodable payloads become a
    /// [`Shape::Scalar`] holding the payload text.
    pub fn decode(raw: &RawRecord) -> Self {
        match raw {
            RawRecord::Bytes(bytes) => match serde_json::from_slice::<Value>(bytes) {
                Ok(value) => Self::from_value(value),
                Err(_) => Shape::Scalar(Value::String(String::from_utf8_lossy(bytes).into_owned())),
            },
            RawRecord::Json(value) => Self::from_value(value.clone()),
            RawRecord::Table { header, rows } => Shape::Tabular {
                header: header.clone(),
                rows: rows
                    .iter()
                    .map(|row| row.iter().cloned().map(Value::String).collect())
                    .collect(),
            },
        }
    }

    /// Detection order: tabular pair, object array, single object, scalar.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Array(items) => match as_tabular(&items) {
                Some(header) => Shape::Tabular {
                    header,
                    rows: items
                        .into_iter()
                        .skip(1)
                        .filter_map(|row| match row {
                            Value::Array(cells) => Some(cells),
                            _ => None,
                        })
                        .collect(),
                },
                None if items.iter().all(Value::is_object) => Shape::ObjectArray(
                    items
                        .into_iter()
                        .filter_map(|item| match item {
                            Value::Object(obj) => Some(obj),
                            _ => None,
                        })
                        .collect(),
                ),
                None => Shape::Scalar(Value::Array(items)),
            },
            Value::Object(obj) => Shape::Object(obj),
            other => Shape::Scalar(other),
        }
    }
}

// an array of arrays whose first row is all strings
fn as_tabular(items: &[Value]) -> Option<Vec<String>> {
    if !items.iter().all(Value::is_array) {
        return None;
    }
    items
        .first()?
        .as_array()?
        .iter()
        .map(|cell| cell.as_str().map(str::to_string))
        .collect()
}

/// Result of transforming one raw record.
#[derive(Debug, Clone, PartialEq)]
pub enum Transformed {
    /// A single input object that passed the filter.
    Record(Map<String, Value>),
    /// Every row or element of a batch input that passed the filter.
    Batch(Vec<Map<String, Value>>),
    /// A single input object rejected by the filter.
    Dropped,
}

impl Transformed {
    pub fn records(&self) -> &[Map<String, Value>] {
        match self {
            Transformed::Record(r) => std::slice::from_ref(r),
            Transformed::Batch(rs) => rs,
            Transformed::Dropped => &[],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    /// The JSON value handed to sinks: the object itself for a single record,
    /// an array for a batch. Nothing is delivered when no record survived.
    pub fn into_payload(self) -> Option<Value> {
        match self {
            Transformed::Record(r) => Some(Value::Object(r)),
            Transformed::Batch(rs) if !rs.is_empty() => {
                Some(Value::Array(rs.into_iter().map(Value::Object).collect()))
            }
            Transformed::Batch(_) | Transformed::Dropped => None,
        }
    }
}

/// Applies `spec` to one raw record.
pub fn transform(raw: &RawRecord, spec: &TransformSpec) -> Transformed {
    transform_shape(Shape::decode(raw), spec)
}

pub fn transform_shape(shape: Shape, spec: &TransformSpec) -> Transformed {
    let filter = match Expression::parse(&spec.filter) {
        Ok(expr) if expr.is_empty() => None,
        Ok(expr) => Some(Ok(expr)),
        Err(e) => {
            warn!(filter = %spec.filter, error = %e, "filter does not parse, dropping records");
            Some(Err(e))
        }
    };
    let passes = |item: &Map<String, Value>| match &filter {
        None => true,
        Some(Err(_)) => false,
        Some(Ok(expr)) => match expr.evaluate(&flatten(item)) {
            Ok(matched) => matched,
            Err(e) => {
                debug!(error = %e, "filter evaluation failed, dropping record");
                false
            }
        },
    };
    let emit = |item: Map<String, Value>| passes(&item).then(|| materialize(&spec.schema, &item));

    match shape {
        Shape::Object(obj) => emit(obj).map_or(Transformed::Dropped, Transformed::Record),
        Shape::Scalar(value) => {
            let mut item = Map::new();
            item.insert("data".to_string(), value);
            emit(item).map_or(Transformed::Dropped, Transformed::Record)
        }
        Shape::ObjectArray(items) => Transformed::Batch(items.into_iter().filter_map(emit).collect()),
        Shape::Tabular { header, rows } => Transformed::Batch(
            rows.into_iter()
                .map(|row| header.iter().cloned().zip(row).collect::<Map<_, _>>())
                .filter_map(emit)
                .collect(),
        ),
    }
}
