//! Boolean filter expressions.
//!
//! The language is deliberately small: one or more `key op value` conditions
//! joined with `&&`. Operators are `==`, `>`, `<` and `contains`; the three
//! parts are separated by whitespace. Values may be bare (`18`, `gold`) or
//! quoted (`"Ann Lee"`, `'x'`).
//!
//! ```text
//! age > 18 && tier == gold && name contains "Ann"
//! ```
//!
//! Keys address the record after [`flatten`], so nested fields are reachable
//! as `address.city`.

use std::fmt;

use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("invalid condition {0:?}, expected `key op value`")]
    InvalidCondition(String),

    #[error("unsupported operator {0:?}")]
    UnsupportedOperator(String),

    #[error("key {0:?} not found in record")]
    MissingKey(String),

    #[error("operator {op} cannot compare {left} with {right}")]
    TypeMismatch {
        op: CmpOp,
        left: String,
        right: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Gt,
    Lt,
    Contains,
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CmpOp::Eq => "==",
            CmpOp::Gt => ">",
            CmpOp::Lt => "<",
            CmpOp::Contains => "contains",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
struct Condition {
    key: String,
    op: CmpOp,
    value: Literal,
}

/// A parsed filter expression. An empty expression matches every record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Expression {
    conditions: Vec<Condition>,
}

impl Expression {
    pub fn parse(src: &str) -> Result<Self, EvalError> {
        let src = src.trim();
        if src.is_empty() {
            return Ok(Self::default());
        }
        let conditions = src
            .split("&&")
            .map(parse_condition)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { conditions })
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Evaluates every condition against `record`, short-circuiting on the
    /// first false one.
    pub fn evaluate(&self, record: &Map<String, Value>) -> Result<bool, EvalError> {
        for cond in &self.conditions {
            if !cond.evaluate(record)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Parses and evaluates `expr` against `record` in one go.
pub fn evaluate(expr: &str, record: &Map<String, Value>) -> Result<bool, EvalError> {
    Expression::parse(expr)?.evaluate(record)
}

fn parse_condition(src: &str) -> Result<Condition, EvalError> {
    let src = src.trim();
    let (key, op, value) =
        split_condition(src).ok_or_else(|| EvalError::InvalidCondition(src.to_string()))?;
    let op = match op {
        "==" => CmpOp::Eq,
        ">" => CmpOp::Gt,
        "<" => CmpOp::Lt,
        "contains" => CmpOp::Contains,
        other => return Err(EvalError::UnsupportedOperator(other.to_string())),
    };
    Ok(Condition {
        key: key.to_string(),
        op,
        value: parse_literal(value),
    })
}

// `key op value`; the value keeps any inner whitespace
fn split_condition(src: &str) -> Option<(&str, &str, &str)> {
    let (key, rest) = src.split_once(char::is_whitespace)?;
    let (op, value) = rest.trim_start().split_once(char::is_whitespace)?;
    let value = value.trim();
    (!value.is_empty()).then_some((key, op, value))
}

fn parse_literal(raw: &str) -> Literal {
    for quote in ['"', '\''] {
        if raw.len() >= 2 && raw.starts_with(quote) && raw.ends_with(quote) {
            return Literal::Text(raw[1..raw.len() - 1].to_string());
        }
    }
    match raw.parse::<f64>() {
        Ok(n) => Literal::Number(n),
        Err(_) => Literal::Text(raw.to_string()),
    }
}

impl Condition {
    fn evaluate(&self, record: &Map<String, Value>) -> Result<bool, EvalError> {
        let actual = record
            .get(&self.key)
            .ok_or_else(|| EvalError::MissingKey(self.key.clone()))?;
        let mismatch = || EvalError::TypeMismatch {
            op: self.op,
            left: actual.to_string(),
            right: self.value.to_string(),
        };
        match self.op {
            CmpOp::Eq => Ok(match (as_number(actual), self.value.as_number()) {
                (Some(l), Some(r)) => l == r,
                _ => as_text(actual).ok_or_else(mismatch)? == self.value.as_text(),
            }),
            CmpOp::Gt | CmpOp::Lt => {
                let (l, r) = as_number(actual)
                    .zip(self.value.as_number())
                    .ok_or_else(mismatch)?;
                Ok(if self.op == CmpOp::Gt { l > r } else { l < r })
            }
            CmpOp::Contains => match (actual, &self.value) {
                (Value::String(l), Literal::Text(r)) => Ok(l.contains(r.as_str())),
                _ => Err(mismatch()),
            },
        }
    }
}

impl Literal {
    fn as_number(&self) -> Option<f64> {
        match self {
            Literal::Number(n) => Some(*n),
            Literal::Text(s) => s.trim().parse().ok(),
        }
    }

    fn as_text(&self) -> String {
        match self {
            Literal::Number(n) => n.to_string(),
            Literal::Text(s) => s.clone(),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Number(n) => write!(f, "{n}"),
            Literal::Text(s) => write!(f, "{s:?}"),
        }
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Flattens nested objects into dotted keys (`{"a":{"b":1}}` → `{"a.b":1}`).
/// Arrays are kept as leaf values.
pub fn flatten(record: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    flatten_into(&mut out, None, record);
    out
}

fn flatten_into(out: &mut Map<String, Value>, prefix: Option<&str>, record: &Map<String, Value>) {
    for (key, value) in record {
        let path = match prefix {
            Some(p) => format!("{p}.{key}"),
            None => key.clone(),
        };
        match value {
            Value::Object(inner) => flatten_into(out, Some(&path), inner),
            leaf => {
                out.insert(path, leaf.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    #[test]
    fn empty_expression_matches_everything() {
        let expr = Expression::parse("  ").unwrap();
        assert!(expr.is_empty());
        assert!(expr.evaluate(&Map::new()).unwrap());
    }

    #[test]
    fn numeric_comparisons() {
        let r = record(json!({"age": 30, "score": "7.5"}));
        assert!(evaluate("age > 18", &r).unwrap());
        assert!(!evaluate("age < 18", &r).unwrap());
        assert!(evaluate("score < 10", &r).unwrap());
        assert!(evaluate("age == 30", &r).unwrap());
        assert!(evaluate("age == \"30\"", &r).unwrap());
    }

    #[test]
    fn string_comparisons() {
        let r = record(json!({"name": "Ann Lee", "tier": "gold"}));
        assert!(evaluate("tier == gold", &r).unwrap());
        assert!(evaluate("name contains 'Ann L'", &r).unwrap());
        assert!(!evaluate("name contains Bo", &r).unwrap());
    }

    #[test]
    fn conditions_split_on_any_whitespace() {
        let r = record(json!({"name": "Ann Lee", "age": 30}));
        assert!(evaluate("  age\t>   18  ", &r).unwrap());
        assert!(evaluate("name == Ann Lee", &r).unwrap());
        assert!(evaluate("name contains \"n L\" && age == 30", &r).unwrap());
        assert!(matches!(
            evaluate("age >", &r),
            Err(EvalError::InvalidCondition(_))
        ));
    }

    #[test]
    fn conjunction_requires_every_condition() {
        let r = record(json!({"age": 30, "tier": "gold"}));
        assert!(evaluate("age > 18 && tier == gold", &r).unwrap());
        assert!(!evaluate("age > 18 && tier == silver", &r).unwrap());
    }

    #[test]
    fn operand_type_errors() {
        let r = record(json!({"name": "Ann", "age": 30}));
        assert!(matches!(
            evaluate("name > 3", &r),
            Err(EvalError::TypeMismatch { op: CmpOp::Gt, .. })
        ));
        assert!(matches!(
            evaluate("age contains 3", &r),
            Err(EvalError::TypeMismatch {
                op: CmpOp::Contains,
                ..
            })
        ));
        assert!(matches!(
            evaluate("name contains 3", &r),
            Err(EvalError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn malformed_expressions() {
        let r = record(json!({"age": 30}));
        assert_eq!(
            evaluate("age >= 18", &r),
            Err(EvalError::UnsupportedOperator(">=".into()))
        );
        assert!(matches!(
            evaluate("age>18", &r),
            Err(EvalError::InvalidCondition(_))
        ));
        assert!(matches!(
            evaluate("age > 1 &&", &r),
            Err(EvalError::InvalidCondition(_))
        ));
        assert_eq!(
            evaluate("height > 1", &r),
            Err(EvalError::MissingKey("height".into()))
        );
    }

    #[test]
    fn flatten_uses_dotted_paths() {
        let flat = flatten(&record(json!({
            "name": "Ann",
            "address": {"city": "Oslo", "geo": {"lat": 59.9}},
            "tags": ["a", "b"]
        })));
        assert_eq!(flat["address.city"], json!("Oslo"));
        assert_eq!(flat["address.geo.lat"], json!(59.9));
        assert_eq!(flat["tags"], json!(["a", "b"]));
        assert!(evaluate("address.city == Oslo", &flat).unwrap());
    }
}
