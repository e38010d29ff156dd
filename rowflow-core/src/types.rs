//! Record and dataset primitives shared by the pipeline and CDC engines.
//!
//! A [`Record`] is an insertion-ordered JSON object; a [`Dataset`] is an
//! ordered list of records. The helpers here give every component the same
//! notion of key equality and value ordering.

use serde_json::{Map, Number, Value};
use std::cmp::Ordering;
use std::collections::HashMap;

/// A schema-less row. Field iteration order is insertion order.
pub type Record = Map<String, Value>;

/// An ordered sequence of records.
pub type Dataset = Vec<Record>;

/// Named datasets supplied to a pipeline run, keyed by source id.
pub type InputData = HashMap<String, Dataset>;

/// Deterministic string rendering of a value, used as a hash/group/join key.
///
/// Object keys are sorted, so two records with the same fields in a
/// different order share a key. Integral floats render as integers so that
/// `1` and `1.0` are the same key.
pub fn canonical_key(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

/// Canonical key of a whole record.
pub fn canonical_record_key(record: &Record) -> String {
    let mut out = String::new();
    write_canonical_object(record.iter(), &mut out);
    out
}

/// Canonical key of a subset of fields; missing fields count as `null`.
pub fn canonical_fields_key(record: &Record, fields: &[String]) -> String {
    let mut out = String::from("[");
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_canonical(record.get(field).unwrap_or(&Value::Null), &mut out);
    }
    out.push(']');
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&canonical_number(n)),
        Value::String(s) => {
            out.push_str(&serde_json::to_string(s).unwrap_or_else(|_| format!("\"{s}\"")))
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => write_canonical_object(map.iter(), out),
    }
}

fn write_canonical_object<'a>(entries: impl Iterator<Item = (&'a String, &'a Value)>, out: &mut String) {
    let mut entries: Vec<_> = entries.collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    out.push('{');
    for (i, (key, value)) in entries.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&serde_json::to_string(key).unwrap_or_else(|_| format!("\"{key}\"")));
        out.push(':');
        write_canonical(value, out);
    }
    out.push('}');
}

fn canonical_number(n: &Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => format!("{}", f as i64),
        Some(f) => format!("{f}"),
        None => n.to_string(),
    }
}

/// Numeric view of a value. Only JSON numbers count; strings are not coerced.
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Build a JSON number from a float, collapsing integral values to integers.
/// Non-finite results become `null`.
pub fn number_value(f: f64) -> Value {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15 {
        Value::from(f as i64)
    } else {
        Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over values: `null < bool < number < string < array < object`.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(_), Value::Number(_)) => {
            let x = as_number(a).unwrap_or(0.0);
            let y = as_number(b).unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let ord = compare_values(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(_), Value::Object(_)) => canonical_key(a).cmp(&canonical_key(b)),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Compare an optional field value, treating a missing field as `null`.
pub fn compare_fields(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    compare_values(a.unwrap_or(&Value::Null), b.unwrap_or(&Value::Null))
}

/// Convert a JSON array of objects into a dataset, rejecting non-object rows.
pub fn dataset_from_value(value: Value) -> std::result::Result<Dataset, String> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::Object(map) => Ok(map),
                other => Err(format!(
                    "row {i} is not an object (found {})",
                    value_type_name(&other)
                )),
            })
            .collect(),
        other => Err(format!(
            "expected an array of records, found {}",
            value_type_name(&other)
        )),
    }
}

/// Human-readable JSON type name, used in error messages.
pub fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(v: Value) -> Record {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_canonical_key_ignores_field_order() {
        let a = rec(json!({"id": 1, "name": "x"}));
        let b = rec(json!({"name": "x", "id": 1}));
        assert_eq!(canonical_record_key(&a), canonical_record_key(&b));
    }

    #[test]
    fn test_canonical_key_integral_float() {
        assert_eq!(canonical_key(&json!(1.0)), canonical_key(&json!(1)));
        assert_ne!(canonical_key(&json!(1.5)), canonical_key(&json!(1)));
    }

    #[test]
    fn test_canonical_key_distinguishes_string_and_number() {
        assert_ne!(canonical_key(&json!("1")), canonical_key(&json!(1)));
    }

    #[test]
    fn test_canonical_fields_key_missing_is_null() {
        let r = rec(json!({"a": 1}));
        let fields = vec!["a".to_string(), "b".to_string()];
        assert_eq!(canonical_fields_key(&r, &fields), "[1,null]");
    }

    #[test]
    fn test_compare_values_cross_type() {
        assert_eq!(compare_values(&json!(null), &json!(0)), Ordering::Less);
        assert_eq!(compare_values(&json!(5), &json!("a")), Ordering::Less);
        assert_eq!(compare_values(&json!(true), &json!(1)), Ordering::Less);
    }

    #[test]
    fn test_compare_values_numbers() {
        assert_eq!(compare_values(&json!(2), &json!(10)), Ordering::Less);
        assert_eq!(compare_values(&json!(2.5), &json!(2)), Ordering::Greater);
        assert_eq!(compare_values(&json!(3), &json!(3.0)), Ordering::Equal);
    }

    #[test]
    fn test_number_value_collapses_integral() {
        assert_eq!(number_value(11000.0), json!(11000));
        assert_eq!(number_value(5500.5), json!(5500.5));
        assert_eq!(number_value(f64::NAN), Value::Null);
    }

    #[test]
    fn test_dataset_from_value() {
        let ds = dataset_from_value(json!([{"a": 1}, {"a": 2}])).unwrap();
        assert_eq!(ds.len(), 2);
        assert!(dataset_from_value(json!([1])).is_err());
        assert!(dataset_from_value(json!({"a": 1})).is_err());
    }
}
