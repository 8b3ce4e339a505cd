//! Pipeline configuration documents and their validated form.
//!
//! Both persisted configuration kinds (`sourceConfig` and `destinationConfig`)
//! share one document shape, [`ConfigDocument`]. A source document is turned
//! into [`SourceConfig`]s (one per `TYPEOF` endpoint) that drive the workers;
//! a destination document is turned into [`DestinationEntry`]s that populate
//! the routing table.
//!
//! # Example YAML Configuration
//!
//! ```yaml
//! SourceData:
//!   - Source: 1
//!     NAME: customers
//!     TYPEOF:
//!       - TYPE: API
//!         URL: http://localhost:8000/customers
//!         Duration: 30s
//!     TransformationConfig:
//!       RuleType: "age > 18"
//!       OutputFormat:
//!         - Key: name
//!           DisplayName: CName
//!           KeyType: STRING
//! ```

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::SourceId;

/// Deepest `Structure` nesting accepted in an output schema.
pub const MAX_SCHEMA_DEPTH: usize = 32;

/// Poll interval used when an HTTP or DB endpoint carries no `Duration`.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

const DEFAULT_KAFKA_PORT: &str = "9092";
const DEFAULT_DB_PORT: u16 = 3306;

/// Configuration errors, the only error category surfaced to callers of the
/// control surface.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The document carries no `SourceData` entries.
    #[error("empty data")]
    EmptyData,

    #[error("unknown configuration type: {0:?}")]
    UnknownKind(String),

    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("source {source_id}: unsupported endpoint type {kind:?}")]
    UnsupportedEndpoint { source_id: SourceId, kind: String },

    #[error("source {source_id}: {kind} endpoint is missing {field}")]
    MissingField {
        source_id: SourceId,
        kind: &'static str,
        field: &'static str,
    },

    #[error("source {source_id}: invalid duration {value:?}: {reason}")]
    InvalidDuration {
        source_id: SourceId,
        value: String,
        reason: String,
    },

    #[error("source {source_id}: invalid table name {table:?}")]
    InvalidTable { source_id: SourceId, table: String },

    #[error("field {field:?}: unknown key type {key_type:?}")]
    UnknownKeyType { field: String, key_type: String },

    #[error("output field at depth {0} has neither Key nor DisplayName")]
    UnnamedField(usize),

    #[error("duplicate display name {0:?}")]
    DuplicateDisplayName(String),

    #[error("output schema nested deeper than {MAX_SCHEMA_DEPTH} levels")]
    SchemaTooDeep,

    #[error("duplicate destination for source {0}")]
    DuplicateDestination(SourceId),

    #[error("duplicate worker name {0:?}")]
    DuplicateWorker(String),

    #[error("malformed configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The two persisted configuration kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKind {
    Source,
    Destination,
}

impl ConfigKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKind::Source => "sourceConfig",
            ConfigKind::Destination => "destinationConfig",
        }
    }

    /// Name of the file holding the last applied document of this kind.
    pub fn file_name(&self) -> String {
        format!("{}.yaml", self.as_str())
    }
}

impl fmt::Display for ConfigKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfigKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sourceConfig" => Ok(ConfigKind::Source),
            "destinationConfig" => Ok(ConfigKind::Destination),
            other => Err(ConfigError::UnknownKind(other.to_string())),
        }
    }
}

/// A configuration document as exchanged with the control surface and
/// persisted on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigDocument {
    #[serde(rename = "SourceData", default)]
    pub source_data: Vec<DataSource>,
}

/// One `SourceData` entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    #[serde(rename = "Source", default)]
    pub source: SourceId,

    #[serde(rename = "NAME", default)]
    pub name: String,

    /// Connection endpoints: ingestion endpoints in a source document,
    /// sinks in a destination document.
    #[serde(rename = "TYPEOF", default)]
    pub endpoints: Vec<Endpoint>,

    #[serde(rename = "TransformationConfig", default)]
    pub transformation: TransformationConfig,
}

/// One `TYPEOF` entry. Which fields matter depends on `TYPE`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    #[serde(rename = "TYPE", default)]
    pub kind: String,
    #[serde(rename = "DB_TYPE", default)]
    pub db_type: String,
    #[serde(rename = "DB_HOST", default)]
    pub db_host: String,
    #[serde(rename = "DB_PORT", default)]
    pub db_port: u16,
    #[serde(rename = "DB_USER", default)]
    pub db_user: String,
    #[serde(rename = "DB_PASSWORD", default)]
    pub db_password: String,
    #[serde(rename = "DB_NAME", default)]
    pub db_name: String,
    #[serde(rename = "DB_TABLE_NAME", default)]
    pub db_table: String,
    #[serde(rename = "Duration", default)]
    pub duration: String,
    #[serde(rename = "FILE_PATH", default)]
    pub file_path: String,
    #[serde(rename = "S3_BUCKET", default)]
    pub s3_bucket: String,
    #[serde(rename = "S3_REGION", default)]
    pub s3_region: String,
    #[serde(rename = "URL", default)]
    pub url: String,
    #[serde(rename = "IP", default)]
    pub ip: String,
    #[serde(rename = "Port", default, deserialize_with = "string_or_number")]
    pub port: String,
    #[serde(rename = "TopicName", default)]
    pub topic: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformationConfig {
    /// Filter expression; empty means every record passes.
    #[serde(rename = "RuleType", default)]
    pub rule_type: String,

    #[serde(rename = "OutputFormat", default)]
    pub output_format: Vec<OutputField>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputField {
    #[serde(rename = "Key", default)]
    pub key: String,
    #[serde(rename = "DisplayName", default)]
    pub display_name: String,
    #[serde(rename = "KeyType", default)]
    pub key_type: String,
    #[serde(rename = "Rule", default)]
    pub rule: String,
    #[serde(rename = "Structure", default)]
    pub structure: Vec<OutputField>,
}

// `Port` shows up both quoted and bare in hand-written YAML.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(i64),
    }
    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Str(s)) => s,
        Some(Raw::Num(n)) => n.to_string(),
        None => String::new(),
    })
}

/// Connection parameters of a relational endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub table: String,
}

/// A validated ingestion endpoint. Immutable once a worker runs against it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    pub source_id: SourceId,
    /// Worker name; unique within one source document.
    pub name: String,
    pub kind: SourceKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    Http { url: String, poll_interval: Duration },
    Kafka { brokers: String, topic: String },
    Db { params: DbParams, poll_interval: Duration },
    File { path: String },
}

impl SourceKind {
    pub fn label(&self) -> &'static str {
        match self {
            SourceKind::Http { .. } => "HTTP",
            SourceKind::Kafka { .. } => "KAFKA",
            SourceKind::Db { .. } => "DB",
            SourceKind::File { .. } => "FILE",
        }
    }
}

/// A validated delivery endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkConfig {
    Http { url: String },
    Kafka { brokers: String, topic: String },
    Db(DbParams),
    File { path: String },
}

impl SinkConfig {
    pub fn label(&self) -> &'static str {
        match self {
            SinkConfig::Http { .. } => "HTTP",
            SinkConfig::Kafka { .. } => "KAFKA",
            SinkConfig::Db(_) => "DB",
            SinkConfig::File { .. } => "FILE",
        }
    }
}

/// Declared type of an output field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    String,
    Int,
    ArrayString,
    ArrayInt,
    Struct,
    ArrayStruct,
}

impl ValueType {
    pub fn is_structured(&self) -> bool {
        matches!(self, ValueType::Struct | ValueType::ArrayStruct)
    }
}

impl FromStr for ValueType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            // untyped fields behave like strings
            "" | "STRING" => Ok(ValueType::String),
            "INT" => Ok(ValueType::Int),
            "ARRAY_STRING" => Ok(ValueType::ArrayString),
            "ARRAY_INT" => Ok(ValueType::ArrayInt),
            "STRUCT" => Ok(ValueType::Struct),
            "ARRAY_STRUCT" => Ok(ValueType::ArrayStruct),
            _ => Err(()),
        }
    }
}

/// One field of an output schema. `nested` is only populated for
/// [`ValueType::Struct`] and [`ValueType::ArrayStruct`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub source_key: String,
    pub display_name: String,
    pub value_type: ValueType,
    pub nested: Vec<FieldSpec>,
}

impl FieldSpec {
    pub fn new(display_name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            source_key: String::new(),
            display_name: display_name.into(),
            value_type,
            nested: Vec::new(),
        }
    }

    pub fn with_source_key(mut self, key: impl Into<String>) -> Self {
        self.source_key = key.into();
        self
    }

    pub fn with_nested(mut self, nested: Vec<FieldSpec>) -> Self {
        self.nested = nested;
        self
    }

    /// Key looked up in an input item: `source_key`, or the display name
    /// when no source key was configured.
    pub fn lookup_key(&self) -> &str {
        if self.source_key.is_empty() {
            &self.display_name
        } else {
            &self.source_key
        }
    }
}

/// The (filter expression, output schema) pair applied to one source's records
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformSpec {
    pub filter: String,
    pub schema: Vec<FieldSpec>,
}

/// Routing entry for one source id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationEntry {
    pub source_id: SourceId,
    pub sinks: Vec<SinkConfig>,
    pub transform: TransformSpec,
}

impl ConfigDocument {
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn is_empty(&self) -> bool {
        self.source_data.is_empty()
    }

    /// Checks that the document converts cleanly for the given kind.
    pub fn validate(&self, kind: ConfigKind) -> Result<(), ConfigError> {
        if self.is_empty() {
            return Err(ConfigError::EmptyData);
        }
        match kind {
            ConfigKind::Source => self.sources().map(|_| ()),
            ConfigKind::Destination => self.destinations().map(|_| ()),
        }
    }

    /// Ingestion endpoints, one per `TYPEOF` entry of every `SourceData` item.
    pub fn sources(&self) -> Result<Vec<SourceConfig>, ConfigError> {
        let mut names = HashSet::new();
        let mut out = Vec::new();
        for ds in &self.source_data {
            let base = if ds.name.trim().is_empty() {
                format!("source-{}", ds.source)
            } else {
                ds.name.trim().to_string()
            };
            for (i, ep) in ds.endpoints.iter().enumerate() {
                let name = if ds.endpoints.len() == 1 {
                    base.clone()
                } else {
                    format!("{base}[{i}]")
                };
                if !names.insert(name.clone()) {
                    return Err(ConfigError::DuplicateWorker(name));
                }
                out.push(SourceConfig {
                    source_id: ds.source,
                    name,
                    kind: source_kind(ds.source, ep)?,
                });
            }
        }
        Ok(out)
    }

    /// Routing entries, one per `SourceData` item.
    pub fn destinations(&self) -> Result<Vec<DestinationEntry>, ConfigError> {
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(self.source_data.len());
        for ds in &self.source_data {
            if !seen.insert(ds.source) {
                return Err(ConfigError::DuplicateDestination(ds.source));
            }
            let sinks = ds
                .endpoints
                .iter()
                .map(|ep| sink_config(ds.source, ep))
                .collect::<Result<Vec<_>, _>>()?;
            out.push(DestinationEntry {
                source_id: ds.source,
                sinks,
                transform: TransformSpec {
                    filter: ds.transformation.rule_type.trim().to_string(),
                    schema: field_specs(&ds.transformation.output_format, 0)?,
                },
            });
        }
        Ok(out)
    }
}

fn source_kind(source_id: SourceId, ep: &Endpoint) -> Result<SourceKind, ConfigError> {
    match ep.kind.trim().to_ascii_uppercase().as_str() {
        "API" | "HTTP" => Ok(SourceKind::Http {
            url: required(source_id, "HTTP", "URL", &ep.url)?,
            poll_interval: poll_interval(source_id, &ep.duration)?,
        }),
        "KAFKA" => {
            let (brokers, topic) = kafka_params(source_id, ep)?;
            Ok(SourceKind::Kafka { brokers, topic })
        }
        "DB" => Ok(SourceKind::Db {
            params: db_params(source_id, ep)?,
            poll_interval: poll_interval(source_id, &ep.duration)?,
        }),
        // anything carrying a file path is scanned as a delimited file
        _ if !ep.file_path.trim().is_empty() => Ok(SourceKind::File {
            path: ep.file_path.trim().to_string(),
        }),
        other => Err(ConfigError::UnsupportedEndpoint {
            source_id,
            kind: other.to_string(),
        }),
    }
}

fn sink_config(source_id: SourceId, ep: &Endpoint) -> Result<SinkConfig, ConfigError> {
    match ep.kind.trim().to_ascii_uppercase().as_str() {
        "API" | "HTTP" => Ok(SinkConfig::Http {
            url: required(source_id, "HTTP", "URL", &ep.url)?,
        }),
        "KAFKA" => {
            let (brokers, topic) = kafka_params(source_id, ep)?;
            Ok(SinkConfig::Kafka { brokers, topic })
        }
        "DB" => Ok(SinkConfig::Db(db_params(source_id, ep)?)),
        "FILE" | "CSV" => Ok(SinkConfig::File {
            path: required(source_id, "FILE", "FILE_PATH", &ep.file_path)?,
        }),
        // untyped sinks with a URL are HTTP endpoints
        _ if !ep.url.trim().is_empty() => Ok(SinkConfig::Http {
            url: ep.url.trim().to_string(),
        }),
        other => Err(ConfigError::UnsupportedEndpoint {
            source_id,
            kind: other.to_string(),
        }),
    }
}

fn required(
    source_id: SourceId,
    kind: &'static str,
    field: &'static str,
    value: &str,
) -> Result<String, ConfigError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ConfigError::MissingField {
            source_id,
            kind,
            field,
        });
    }
    Ok(value.to_string())
}

fn kafka_params(source_id: SourceId, ep: &Endpoint) -> Result<(String, String), ConfigError> {
    let host = required(source_id, "KAFKA", "IP", &ep.ip)?;
    let topic = required(source_id, "KAFKA", "TopicName", &ep.topic)?;
    let port = match ep.port.trim() {
        "" => DEFAULT_KAFKA_PORT,
        p => p,
    };
    Ok((format!("{host}:{port}"), topic))
}

fn db_params(source_id: SourceId, ep: &Endpoint) -> Result<DbParams, ConfigError> {
    let host = required(source_id, "DB", "DB_HOST", &ep.db_host)?;
    let table = required(source_id, "DB", "DB_TABLE_NAME", &ep.db_table)?;
    if !is_identifier(&table) {
        return Err(ConfigError::InvalidTable { source_id, table });
    }
    Ok(DbParams {
        host,
        port: if ep.db_port == 0 {
            DEFAULT_DB_PORT
        } else {
            ep.db_port
        },
        user: ep.db_user.clone(),
        password: ep.db_password.clone(),
        database: ep.db_name.clone(),
        table,
    })
}

// table names are spliced into `SELECT * FROM <table>`
fn is_identifier(name: &str) -> bool {
    name.split('.').all(|part| {
        let mut chars = part.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    })
}

fn poll_interval(source_id: SourceId, value: &str) -> Result<Duration, ConfigError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(DEFAULT_POLL_INTERVAL);
    }
    let invalid = |reason: String| ConfigError::InvalidDuration {
        source_id,
        value: value.to_string(),
        reason,
    };
    let terms = whole_duration_terms(value).ok_or_else(|| invalid("unknown unit".into()))?;
    let duration = humantime::parse_duration(&terms).map_err(|e| invalid(e.to_string()))?;
    if duration.is_zero() {
        return Err(invalid("must be positive".into()));
    }
    Ok(duration)
}

// Go durations allow fractional terms ("1.5h") and `µs`; humantime takes
// neither, so fractional terms are rewritten as whole nanoseconds.
fn whole_duration_terms(value: &str) -> Option<String> {
    let is_number = |c: char| c.is_ascii_digit() || c == '.';
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while !rest.is_empty() {
        let number_len = rest.find(|c: char| !is_number(c)).unwrap_or(rest.len());
        let (number, tail) = rest.split_at(number_len);
        let unit_len = tail.find(is_number).unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        rest = tail;

        let unit = match unit.trim() {
            "µs" | "μs" => "us",
            u => u,
        };
        if !number.contains('.') {
            out.push_str(number);
            out.push_str(unit);
            continue;
        }
        let nanos_per_unit = match unit {
            "ns" => 1.0,
            "us" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return None,
        };
        let amount: f64 = number.parse().ok()?;
        out.push_str(&format!("{}ns", (amount * nanos_per_unit).round() as u64));
    }
    Some(out)
}

fn field_specs(fields: &[OutputField], depth: usize) -> Result<Vec<FieldSpec>, ConfigError> {
    if depth >= MAX_SCHEMA_DEPTH {
        return Err(ConfigError::SchemaTooDeep);
    }
    let mut names = HashSet::new();
    let mut out = Vec::with_capacity(fields.len());
    for field in fields {
        let display_name = match (field.display_name.trim(), field.key.trim()) {
            ("", "") => return Err(ConfigError::UnnamedField(depth)),
            ("", key) => key.to_string(),
            (name, _) => name.to_string(),
        };
        if !names.insert(display_name.clone()) {
            return Err(ConfigError::DuplicateDisplayName(display_name));
        }
        let value_type: ValueType = field
            .key_type
            .parse()
            .map_err(|()| ConfigError::UnknownKeyType {
                field: display_name.clone(),
                key_type: field.key_type.clone(),
            })?;
        let nested = if value_type.is_structured() {
            field_specs(&field.structure, depth + 1)?
        } else {
            Vec::new()
        };
        out.push(FieldSpec {
            source_key: field.key.trim().to_string(),
            display_name,
            value_type,
            nested,
        });
    }
    Ok(out)
}
