//! Change classification between an existing snapshot and a new one.
//!
//! Keys are compared by their canonical rendering, so `1` and `1.0` are the
//! same key. Existing rows flagged `_deleted: true` are tombstones: they are
//! not part of the key index, so a reappearing key is an insert and a
//! tombstone is never deleted twice.

use crate::cdc::types::{CdcConfig, ChangeSet, RecordUpdate, TrackingMode, Watermark};
use crate::error::CdcError;
use crate::types::{Record, canonical_key, canonical_record_key};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Soft-delete marker written by the merge engine.
pub const DELETED_FIELD: &str = "_deleted";
pub const DELETED_AT_FIELD: &str = "_deleted_at";
pub const OPERATION_FIELD: &str = "_cdc_operation";
pub const TIMESTAMP_FIELD: &str = "_cdc_timestamp";
pub const HASH_FIELD: &str = "_cdc_hash";

/// Fields that never contribute to a record's content hash.
pub const BOOKKEEPING_FIELDS: [&str; 5] = [
    DELETED_FIELD,
    DELETED_AT_FIELD,
    OPERATION_FIELD,
    TIMESTAMP_FIELD,
    HASH_FIELD,
];

/// SHA-256 over the canonical form of the record's content fields.
pub fn content_hash(record: &Record) -> String {
    let content: Record = record
        .iter()
        .filter(|(k, _)| !BOOKKEEPING_FIELDS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let digest = Sha256::digest(canonical_record_key(&content).as_bytes());
    format!("{digest:x}")
}

pub fn is_soft_deleted(record: &Record) -> bool {
    record.get(DELETED_FIELD).and_then(Value::as_bool).unwrap_or(false)
}

/// Canonical primary-key value of a record. `null` counts as missing.
pub(crate) fn record_key(
    record: &Record,
    primary_key: &str,
    dataset: &'static str,
    index: usize,
) -> Result<String, CdcError> {
    match record.get(primary_key) {
        None | Some(Value::Null) => Err(CdcError::KeyMissing {
            dataset,
            index,
            key: primary_key.to_string(),
        }),
        Some(v) => Ok(canonical_key(v)),
    }
}

/// Index stored records by primary key. Two records with the same key make
/// the dataset ambiguous and fail the call.
pub(crate) fn index_by_key(
    records: &[Record],
    primary_key: &str,
    dataset: &'static str,
) -> Result<HashMap<String, usize>, CdcError> {
    let mut index = HashMap::with_capacity(records.len());
    for (i, record) in records.iter().enumerate() {
        let key = record_key(record, primary_key, dataset, i)?;
        if let Some(&first) = index.get(&key) {
            return Err(CdcError::DuplicateKey {
                dataset,
                key,
                first,
                index: i,
            });
        }
        index.insert(key, i);
    }
    Ok(index)
}

/// Parse a timestamp column value: RFC 3339, `YYYY-MM-DD HH:MM:SS`, or epoch
/// milliseconds.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            DateTime::parse_from_rfc3339(s)
                .map(|t| t.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
                        .map(|t| t.and_utc())
                        .ok()
                })
        }
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

/// Parse a version column value: an integer or an integer string.
pub fn parse_version(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Highest version found in `data`, if any row carries one.
pub fn max_version(data: &[Record], column: &str) -> Option<i64> {
    data.iter()
        .filter_map(|r| r.get(column).and_then(parse_version))
        .max()
}

enum Cutoff {
    None,
    Timestamp(String, DateTime<Utc>),
    Version(String, i64),
}

impl Cutoff {
    fn from_config(config: &CdcConfig, watermark: Option<&Watermark>) -> Self {
        match (config.tracking_mode, watermark) {
            (TrackingMode::Timestamp, Some(w)) => match &config.timestamp_column {
                Some(col) => Cutoff::Timestamp(col.clone(), w.last_sync_timestamp),
                None => Cutoff::None,
            },
            (TrackingMode::Version, Some(w)) => match w.last_sync_version {
                Some(v) => Cutoff::Version(config.version_column.clone(), v),
                None => Cutoff::None,
            },
            _ => Cutoff::None,
        }
    }

    /// Whether a row may have changed since the watermark. Rows whose
    /// tracking value is missing or unreadable are always candidates.
    fn is_candidate(&self, record: &Record) -> bool {
        match self {
            Cutoff::None => true,
            Cutoff::Timestamp(col, since) => record
                .get(col)
                .and_then(parse_timestamp)
                .is_none_or(|t| t > *since),
            Cutoff::Version(col, since) => record
                .get(col)
                .and_then(parse_version)
                .is_none_or(|v| v > *since),
        }
    }
}

/// Classify `new_data` against `existing` under `config`.
///
/// Without a watermark there is no cutoff and every new row is compared
/// against `existing` by key and content hash. The call fails as a whole if
/// any record lacks the primary key.
pub fn classify(
    new_data: &[Record],
    existing: &[Record],
    config: &CdcConfig,
    watermark: Option<&Watermark>,
) -> Result<ChangeSet, CdcError> {
    config.validate()?;
    let pk = config.primary_key.as_str();

    let mut existing_index = index_by_key(existing, pk, "existing")?;
    existing_index.retain(|_, i| !is_soft_deleted(&existing[*i]));

    // Later duplicates of a key replace earlier ones; order is first appearance.
    let mut new_rows: Vec<(String, &Record)> = Vec::with_capacity(new_data.len());
    let mut new_index: HashMap<String, usize> = HashMap::with_capacity(new_data.len());
    for (i, record) in new_data.iter().enumerate() {
        let key = record_key(record, pk, "new", i)?;
        match new_index.get(&key) {
            Some(&slot) => {
                debug!(key = %key, "duplicate key in new data, keeping the later row");
                new_rows[slot].1 = record;
            }
            None => {
                new_index.insert(key.clone(), new_rows.len());
                new_rows.push((key, record));
            }
        }
    }

    let cutoff = Cutoff::from_config(config, watermark);
    let mut change_set = ChangeSet::empty();

    for (key, record) in &new_rows {
        if !cutoff.is_candidate(record) {
            change_set.unchanged += 1;
            continue;
        }
        match existing_index.get(key) {
            None => change_set.inserts.push((*record).clone()),
            Some(&i) if content_hash(&existing[i]) == content_hash(record) => {
                change_set.unchanged += 1;
            }
            Some(&i) => change_set.updates.push(RecordUpdate {
                before: existing[i].clone(),
                after: (*record).clone(),
            }),
        }
    }

    if config.enable_deletes {
        let seen: HashSet<&str> = new_rows.iter().map(|(k, _)| k.as_str()).collect();
        let mut gone: Vec<usize> = existing_index
            .iter()
            .filter(|(k, _)| !seen.contains(k.as_str()))
            .map(|(_, &i)| i)
            .collect();
        gone.sort_unstable();
        change_set.deletes = gone.into_iter().map(|i| existing[i].clone()).collect();
    }

    change_set.total_records = new_rows.len() + change_set.deletes.len();
    Ok(change_set)
}
