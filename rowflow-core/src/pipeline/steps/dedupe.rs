use crate::error::StepError;
use crate::types::{Dataset, Record, canonical_fields_key, canonical_record_key};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DedupeConfig {
    /// Compare only these fields. Absent or empty means the whole record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_fields: Option<Vec<String>>,
}

/// Drop rows equal to an earlier row, keeping the first occurrence.
///
/// Equality is structural: field order does not matter, `1` equals `1.0`,
/// and `null` equals `null`. With `keyFields`, a missing field compares as
/// `null`.
pub fn apply(_step_id: &str, config: &DedupeConfig, data: &[Record]) -> Result<Dataset, StepError> {
    let key_fields = config.key_fields.as_deref().filter(|f| !f.is_empty());
    let mut seen = HashSet::with_capacity(data.len());
    let out = data
        .iter()
        .filter(|row| {
            let key = match key_fields {
                Some(fields) => canonical_fields_key(row, fields),
                None => canonical_record_key(row),
            };
            seen.insert(key)
        })
        .cloned()
        .collect();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::dataset_from_value;
    use serde_json::json;

    #[test]
    fn test_dedupe_keeps_first_occurrence() {
        let data = dataset_from_value(json!([
            {"id": 1, "v": "a"},
            {"id": 1, "v": "a"},
            {"id": 2, "v": "b"},
            {"v": "a", "id": 1},
        ]))
        .unwrap();
        let out = apply("d", &DedupeConfig::default(), &data).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["id"], json!(1));
        assert_eq!(out[1]["id"], json!(2));
    }

    #[test]
    fn test_dedupe_by_key_fields() {
        let data = dataset_from_value(json!([
            {"email": "a@x", "seen": 1},
            {"email": "b@x", "seen": 2},
            {"email": "a@x", "seen": 3},
        ]))
        .unwrap();
        let config = DedupeConfig {
            key_fields: Some(vec!["email".into()]),
        };
        let out = apply("d", &config, &data).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["seen"], json!(1));
    }

    #[test]
    fn test_null_equals_null() {
        let data = dataset_from_value(json!([{"a": null}, {"a": null}, {"a": 1.0}, {"a": 1}])).unwrap();
        let out = apply("d", &DedupeConfig::default(), &data).unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_empty_key_fields_means_whole_record() {
        let data = dataset_from_value(json!([{"a": 1, "b": 1}, {"a": 1, "b": 2}])).unwrap();
        let config = DedupeConfig {
            key_fields: Some(vec![]),
        };
        assert_eq!(apply("d", &config, &data).unwrap().len(), 2);
    }
}
