//! Applies a [`ChangeSet`] to an existing dataset.
//!
//! - inserts are appended; an insert whose key is already stored (normally a
//!   tombstone) replaces that record in place
//! - updates replace the stored record (`source-wins`) or only fill fields the
//!   stored record lacks (`target-wins`); a field stored as `null` counts as
//!   present. Updates for unknown keys are appended
//! - deletes either tombstone the record in place (`softDelete`) or remove
//!   it; deletes for unknown keys are ignored
//!
//! Every change-set record is checked for its primary key before anything is
//! applied, so a failing merge leaves no partial result.

use crate::cdc::classifier::{
    DELETED_AT_FIELD, DELETED_FIELD, OPERATION_FIELD, TIMESTAMP_FIELD, index_by_key,
    is_soft_deleted, record_key,
};
use crate::cdc::types::{ChangeSet, ConflictResolution, MergeStrategy};
use crate::error::CdcError;
use crate::types::{Dataset, Record};
use serde_json::Value;
use std::collections::HashSet;

fn stamp(record: &mut Record, operation: &str, timestamp: &str) {
    record.insert(OPERATION_FIELD.to_string(), Value::from(operation));
    record.insert(TIMESTAMP_FIELD.to_string(), Value::from(timestamp));
}

pub fn merge(
    existing: &[Record],
    change_set: &ChangeSet,
    primary_key: &str,
    strategy: &MergeStrategy,
) -> Result<Dataset, CdcError> {
    if primary_key.is_empty() {
        return Err(CdcError::configuration("primaryKey is empty"));
    }

    let mut index = index_by_key(existing, primary_key, "existing")?;
    let insert_keys = change_set
        .inserts
        .iter()
        .enumerate()
        .map(|(i, r)| record_key(r, primary_key, "insert", i))
        .collect::<Result<Vec<_>, _>>()?;
    let update_keys = change_set
        .updates
        .iter()
        .enumerate()
        .map(|(i, u)| record_key(&u.after, primary_key, "update", i))
        .collect::<Result<Vec<_>, _>>()?;
    let delete_keys = change_set
        .deletes
        .iter()
        .enumerate()
        .map(|(i, r)| record_key(r, primary_key, "delete", i))
        .collect::<Result<Vec<_>, _>>()?;

    let audit_ts = change_set.timestamp.to_rfc3339();
    let mut merged: Dataset = existing.to_vec();

    for (key, record) in insert_keys.into_iter().zip(&change_set.inserts) {
        let mut incoming = record.clone();
        if strategy.audit_changes {
            stamp(&mut incoming, "insert", &audit_ts);
        }
        match index.get(&key) {
            Some(&i) => merged[i] = incoming,
            None => {
                index.insert(key, merged.len());
                merged.push(incoming);
            }
        }
    }

    for (key, update) in update_keys.into_iter().zip(&change_set.updates) {
        let mut incoming = match index.get(&key) {
            Some(&i) if !is_soft_deleted(&merged[i]) => match strategy.on_conflict {
                ConflictResolution::SourceWins => update.after.clone(),
                ConflictResolution::TargetWins => {
                    let mut kept = merged[i].clone();
                    for (field, value) in &update.after {
                        if !kept.contains_key(field) {
                            kept.insert(field.clone(), value.clone());
                        }
                    }
                    kept
                }
            },
            _ => update.after.clone(),
        };
        if strategy.audit_changes {
            stamp(&mut incoming, "update", &audit_ts);
        }
        match index.get(&key) {
            Some(&i) => merged[i] = incoming,
            None => {
                index.insert(key, merged.len());
                merged.push(incoming);
            }
        }
    }

    let mut removed: HashSet<usize> = HashSet::new();
    for key in delete_keys {
        let Some(&i) = index.get(&key) else {
            continue;
        };
        if strategy.soft_delete {
            let record = &mut merged[i];
            record.insert(DELETED_FIELD.to_string(), Value::Bool(true));
            if strategy.audit_changes {
                record.insert(DELETED_AT_FIELD.to_string(), Value::from(audit_ts.as_str()));
                stamp(record, "delete", &audit_ts);
            }
        } else {
            removed.insert(i);
        }
    }

    if removed.is_empty() {
        return Ok(merged);
    }
    Ok(merged
        .into_iter()
        .enumerate()
        .filter(|(i, _)| !removed.contains(i))
        .map(|(_, r)| r)
        .collect())
}
