//! Schema walker.
//!
//! Every walk returns a freshly built output map; nothing is shared between
//! walks, so concurrent workers never observe each other's partial output.

use mdp_core::{FieldSpec, ValueType};
use serde_json::{Map, Value};

/// Default value of one field when the input does not provide it.
pub fn default_value(field: &FieldSpec) -> Value {
    match field.value_type {
        ValueType::String => Value::String(String::new()),
        ValueType::Int => Value::from(0),
        ValueType::ArrayString | ValueType::ArrayInt | ValueType::ArrayStruct => {
            Value::Array(Vec::new())
        }
        ValueType::Struct => Value::Object(default_record(&field.nested)),
    }
}

/// The output record for `schema` with every field at its default.
pub fn default_record(schema: &[FieldSpec]) -> Map<String, Value> {
    schema
        .iter()
        .map(|field| (field.display_name.clone(), default_value(field)))
        .collect()
}

/// Builds the output record for `schema` from one input item.
///
/// The result always has exactly the schema's display names as keys; input
/// keys the schema does not mention are ignored and absent inputs keep
/// their defaults.
pub fn materialize(schema: &[FieldSpec], item: &Map<String, Value>) -> Map<String, Value> {
    schema
        .iter()
        .map(|field| {
            let input = item
                .get(field.lookup_key())
                .or_else(|| item.get(&field.display_name));
            (field.display_name.clone(), field_value(field, input))
        })
        .collect()
}

fn field_value(field: &FieldSpec, input: Option<&Value>) -> Value {
    let input = match input {
        None | Some(Value::Null) => return default_value(field),
        Some(v) => v,
    };
    match field.value_type {
        // scalars are carried over verbatim
        ValueType::String | ValueType::Int => input.clone(),
        ValueType::ArrayString | ValueType::ArrayInt => match input {
            Value::Array(_) => input.clone(),
            scalar => Value::Array(vec![scalar.clone()]),
        },
        ValueType::Struct => match input {
            Value::Object(obj) => Value::Object(materialize(&field.nested, obj)),
            _ => default_value(field),
        },
        ValueType::ArrayStruct => match input {
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .filter_map(Value::as_object)
                    .map(|obj| Value::Object(materialize(&field.nested, obj)))
                    .collect(),
            ),
            Value::Object(obj) => Value::Array(vec![Value::Object(materialize(&field.nested, obj))]),
            _ => default_value(field),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Vec<FieldSpec> {
        vec![
            FieldSpec::new("CName", ValueType::String).with_source_key("name"),
            FieldSpec::new("age", ValueType::Int),
            FieldSpec::new("tags", ValueType::ArrayString),
            FieldSpec::new("scores", ValueType::ArrayInt),
            FieldSpec::new("address", ValueType::Struct).with_nested(vec![
                FieldSpec::new("city", ValueType::String),
                FieldSpec::new("zip", ValueType::Int),
            ]),
            FieldSpec::new("orders", ValueType::ArrayStruct)
                .with_nested(vec![FieldSpec::new("id", ValueType::Int)]),
        ]
    }

    fn object(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    #[test]
    fn defaults_follow_value_types() {
        let record = default_record(&schema());
        assert_eq!(
            Value::Object(record),
            json!({
                "CName": "",
                "age": 0,
                "tags": [],
                "scores": [],
                "address": {"city": "", "zip": 0},
                "orders": []
            })
        );
    }

    #[test]
    fn default_walk_is_repeatable() {
        assert_eq!(default_record(&schema()), default_record(&schema()));
    }

    #[test]
    fn materialize_populates_declared_fields() {
        let item = object(json!({
            "name": "Ann",
            "age": 41,
            "tags": "vip",
            "scores": [1, 2],
            "address": {"city": "Oslo", "street": "Main"},
            "orders": [{"id": 1, "total": 9}, "junk", {"id": 2}],
            "ignored": true
        }));
        let out = materialize(&schema(), &item);
        assert_eq!(
            Value::Object(out),
            json!({
                "CName": "Ann",
                "age": 41,
                "tags": ["vip"],
                "scores": [1, 2],
                "address": {"city": "Oslo", "zip": 0},
                "orders": [{"id": 1}, {"id": 2}]
            })
        );
    }

    #[test]
    fn missing_and_null_inputs_keep_defaults() {
        let item = object(json!({"age": null, "address": "not an object"}));
        let out = materialize(&schema(), &item);
        assert_eq!(out, default_record(&schema()));
    }

    #[test]
    fn single_object_counts_as_one_struct_occurrence() {
        let item = object(json!({"orders": {"id": 5}}));
        let out = materialize(&schema(), &item);
        assert_eq!(out["orders"], json!([{"id": 5}]));
    }

    #[test]
    fn display_name_is_a_fallback_key() {
        let item = object(json!({"CName": "Bo"}));
        let out = materialize(&schema(), &item);
        assert_eq!(out["CName"], json!("Bo"));
    }
}
