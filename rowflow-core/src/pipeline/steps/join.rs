//! Equi-join of the current dataset (left) against a named input (right).
//!
//! Matched pairs are emitted in left-row order, and within a left row in
//! right-row order. The joined record starts from the left record; right-side
//! fields are then written over it, so a colliding name takes the right value
//! while keeping its left position, and right-only fields are appended.
//! `null` and missing keys never match.

use crate::error::StepError;
use crate::types::{Dataset, InputData, Record, canonical_key};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinType {
    #[default]
    Inner,
    Left,
    Right,
    #[serde(alias = "outer")]
    Full,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinConfig {
    pub target_source_id: String,
    pub join_key: String,
    /// Key field in the target dataset, when named differently.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_join_key: Option<String>,
    #[serde(default)]
    pub join_type: JoinType,
}

fn join_key_of(record: &Record, field: &str) -> Option<String> {
    match record.get(field) {
        None | Some(Value::Null) => None,
        Some(v) => Some(canonical_key(v)),
    }
}

fn merge_pair(left: &Record, right: &Record) -> Record {
    let mut joined = left.clone();
    for (k, v) in right {
        joined.insert(k.clone(), v.clone());
    }
    joined
}

pub fn apply(
    step_id: &str,
    config: &JoinConfig,
    left: &[Record],
    inputs: &InputData,
) -> Result<Dataset, StepError> {
    if config.join_key.is_empty() {
        return Err(StepError::configuration(step_id, "joinKey is empty"));
    }
    let right = inputs.get(&config.target_source_id).ok_or_else(|| {
        StepError::configuration(
            step_id,
            format!("target source '{}' is not in the input data", config.target_source_id),
        )
    })?;
    let right_key = config.target_join_key.as_deref().unwrap_or(&config.join_key);

    if !right.is_empty() && !right.iter().any(|r| r.contains_key(right_key)) {
        return Err(StepError::JoinKey {
            key: right_key.to_string(),
            target: config.target_source_id.clone(),
        });
    }

    let mut index: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, row) in right.iter().enumerate() {
        if let Some(key) = join_key_of(row, right_key) {
            index.entry(key).or_default().push(i);
        }
    }

    let mut matched_right = vec![false; right.len()];
    let mut out = Vec::new();
    for row in left {
        let matches = join_key_of(row, &config.join_key)
            .and_then(|k| index.get(&k))
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        if matches.is_empty() {
            if matches!(config.join_type, JoinType::Left | JoinType::Full) {
                out.push(row.clone());
            }
            continue;
        }
        for &i in matches {
            matched_right[i] = true;
            out.push(merge_pair(row, &right[i]));
        }
    }

    if matches!(config.join_type, JoinType::Right | JoinType::Full) {
        out.extend(
            right
                .iter()
                .zip(&matched_right)
                .filter(|(_, matched)| !**matched)
                .map(|(row, _)| row.clone()),
        );
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::dataset_from_value;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn customers() -> Dataset {
        dataset_from_value(json!([
            {"customer_id": 1, "name": "John"},
            {"customer_id": 2, "name": "Jane"},
            {"customer_id": 3, "name": "Bob"},
        ]))
        .unwrap()
    }

    fn inputs() -> InputData {
        let orders = dataset_from_value(json!([
            {"order_id": 101, "customer_id": 1, "amount": 50},
            {"order_id": 102, "customer_id": 1, "amount": 75},
            {"order_id": 103, "customer_id": 2, "amount": 20},
        ]))
        .unwrap();
        InputData::from([("orders".to_string(), orders)])
    }

    fn config(join_type: JoinType) -> JoinConfig {
        JoinConfig {
            target_source_id: "orders".into(),
            join_key: "customer_id".into(),
            target_join_key: None,
            join_type,
        }
    }

    #[test]
    fn test_inner_join_cross_product_within_key() {
        let out = apply("j", &config(JoinType::Inner), &customers(), &inputs()).unwrap();
        assert_eq!(out.len(), 3);
        assert!(out.iter().any(|r| r["name"] == json!("John") && r["order_id"] == json!(101)));
        assert!(out.iter().all(|r| r["name"] != json!("Bob")));
    }

    #[test]
    fn test_left_join_keeps_unmatched_once() {
        let out = apply("j", &config(JoinType::Left), &customers(), &inputs()).unwrap();
        assert_eq!(out.len(), 4);
        let bob: Vec<_> = out.iter().filter(|r| r["name"] == json!("Bob")).collect();
        assert_eq!(bob.len(), 1);
        assert!(!bob[0].contains_key("order_id"));
    }

    #[test]
    fn test_right_and_full_join() {
        let mut inputs = inputs();
        inputs
            .get_mut("orders")
            .unwrap()
            .push(json!({"order_id": 104, "customer_id": 9}).as_object().cloned().unwrap());

        let right = apply("j", &config(JoinType::Right), &customers(), &inputs).unwrap();
        assert_eq!(right.len(), 4);
        assert_eq!(right[3]["order_id"], json!(104));

        let full = apply("j", &config(JoinType::Full), &customers(), &inputs).unwrap();
        assert_eq!(full.len(), 5);
    }

    #[test]
    fn test_collision_right_overwrites_left_in_place() {
        let left = dataset_from_value(json!([{"id": 1, "status": "lead", "name": "A"}])).unwrap();
        let right = dataset_from_value(json!([{"id": 1, "status": "paid", "total": 9}])).unwrap();
        let inputs = InputData::from([("r".to_string(), right)]);
        let config = JoinConfig {
            target_source_id: "r".into(),
            join_key: "id".into(),
            target_join_key: None,
            join_type: JoinType::Inner,
        };
        let out = apply("j", &config, &left, &inputs).unwrap();
        let keys: Vec<&String> = out[0].keys().collect();
        assert_eq!(keys, vec!["id", "status", "name", "total"]);
        assert_eq!(out[0]["status"], json!("paid"));
    }

    #[test]
    fn test_target_join_key() {
        let left = dataset_from_value(json!([{"cid": 2, "name": "Jane"}])).unwrap();
        let config = JoinConfig {
            target_source_id: "orders".into(),
            join_key: "cid".into(),
            target_join_key: Some("customer_id".into()),
            join_type: JoinType::Inner,
        };
        let out = apply("j", &config, &left, &inputs()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["order_id"], json!(103));
    }

    #[test]
    fn test_null_keys_never_match() {
        let left = dataset_from_value(json!([{"k": null, "l": 1}])).unwrap();
        let right = dataset_from_value(json!([{"k": null, "r": 1}])).unwrap();
        let inputs = InputData::from([("r".to_string(), right)]);
        let config = JoinConfig {
            target_source_id: "r".into(),
            join_key: "k".into(),
            target_join_key: None,
            join_type: JoinType::Inner,
        };
        assert!(apply("j", &config, &left, &inputs).unwrap().is_empty());
    }

    #[test]
    fn test_missing_target_is_configuration_error() {
        let mut config = config(JoinType::Inner);
        config.target_source_id = "nope".into();
        let err = apply("j", &config, &customers(), &inputs()).unwrap_err();
        assert_eq!(err.kind(), "configuration");
    }

    #[test]
    fn test_key_absent_from_target_is_join_key_error() {
        let mut config = config(JoinType::Inner);
        config.join_key = "email".into();
        let err = apply("j", &config, &customers(), &inputs()).unwrap_err();
        assert_eq!(err.kind(), "join_key");
    }

    #[test]
    fn test_outer_alias() {
        let parsed: JoinConfig = serde_json::from_value(json!({
            "targetSourceId": "t", "joinKey": "k", "joinType": "outer"
        }))
        .unwrap();
        assert_eq!(parsed.join_type, JoinType::Full);
    }
}
