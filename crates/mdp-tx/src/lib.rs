//! # MDP TX - Transformation Engine
//!
//! Reshapes raw source records according to a [`TransformSpec`]:
//!
//! 1. the raw record is decoded once into a [`Shape`] (single object, object
//!    array, header + rows table, or opaque scalar);
//! 2. each logical item is checked against the filter [`Expression`];
//! 3. surviving items are materialized by walking the output schema, so every
//!    output record carries exactly the schema's display names.
//!
//! ```rust
//! use mdp_core::{FieldSpec, RawRecord, TransformSpec, ValueType};
//! use mdp_tx::transform;
//!
//! let spec = TransformSpec {
//!     filter: "age > 18".into(),
//!     schema: vec![
//!         FieldSpec::new("name", ValueType::String),
//!         FieldSpec::new("age", ValueType::Int),
//!     ],
//! };
//! let raw = RawRecord::Bytes(br#"{"name":"Bo","age":30,"city":"Oslo"}"#.to_vec());
//! let payload = transform(&raw, &spec).into_payload();
//! assert_eq!(payload, Some(serde_json::json!({"name": "Bo", "age": 30})));
//! ```
//!
//! [`TransformSpec`]: mdp_core::TransformSpec

pub mod engine;
pub mod expr;
pub mod schema;

pub use engine::{Shape, Transformed, transform, transform_shape};
pub use expr::{CmpOp, EvalError, Expression};
pub use schema::{default_record, materialize};
