//! CDC configuration, change sets, merge policy, and watermarks.

use crate::error::CdcError;
use crate::types::Record;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Signal used to detect changed rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingMode {
    #[default]
    Hash,
    Timestamp,
    Version,
}

impl fmt::Display for TrackingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackingMode::Hash => write!(f, "hash"),
            TrackingMode::Timestamp => write!(f, "timestamp"),
            TrackingMode::Version => write!(f, "version"),
        }
    }
}

fn default_version_column() -> String {
    "version".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdcConfig {
    pub data_source_id: String,
    #[serde(default)]
    pub tracking_mode: TrackingMode,
    pub primary_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_column: Option<String>,
    #[serde(default = "default_version_column")]
    pub version_column: String,
    #[serde(default)]
    pub enable_deletes: bool,
}

impl CdcConfig {
    pub fn new(data_source_id: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self {
            data_source_id: data_source_id.into(),
            tracking_mode: TrackingMode::Hash,
            primary_key: primary_key.into(),
            timestamp_column: None,
            version_column: default_version_column(),
            enable_deletes: false,
        }
    }

    pub fn with_deletes(mut self, enable: bool) -> Self {
        self.enable_deletes = enable;
        self
    }

    pub fn with_timestamp_column(mut self, column: impl Into<String>) -> Self {
        self.tracking_mode = TrackingMode::Timestamp;
        self.timestamp_column = Some(column.into());
        self
    }

    pub fn with_version_column(mut self, column: impl Into<String>) -> Self {
        self.tracking_mode = TrackingMode::Version;
        self.version_column = column.into();
        self
    }

    pub fn validate(&self) -> Result<(), CdcError> {
        if self.primary_key.is_empty() {
            return Err(CdcError::configuration("primaryKey is empty"));
        }
        match self.tracking_mode {
            TrackingMode::Timestamp if self.timestamp_column.as_deref().is_none_or(str::is_empty) => Err(
                CdcError::configuration("timestampColumn is required in timestamp tracking mode"),
            ),
            TrackingMode::Version if self.version_column.is_empty() => Err(
                CdcError::configuration("versionColumn is required in version tracking mode"),
            ),
            _ => Ok(()),
        }
    }
}

/// An update pairs the stored record with its replacement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordUpdate {
    pub before: Record,
    pub after: Record,
}

/// Result of classifying a new snapshot against the existing one.
///
/// `inserts + updates + deletes + unchanged == total_records`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSet {
    pub inserts: Vec<Record>,
    pub updates: Vec<RecordUpdate>,
    pub deletes: Vec<Record>,
    pub unchanged: usize,
    pub total_records: usize,
    pub timestamp: DateTime<Utc>,
}

impl ChangeSet {
    pub fn empty() -> Self {
        Self {
            inserts: Vec::new(),
            updates: Vec::new(),
            deletes: Vec::new(),
            unchanged: 0,
            total_records: 0,
            timestamp: Utc::now(),
        }
    }

    pub fn total_changes(&self) -> usize {
        self.inserts.len() + self.updates.len() + self.deletes.len()
    }

    pub fn has_changes(&self) -> bool {
        self.total_changes() > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConflictResolution {
    #[default]
    #[serde(rename = "source-wins")]
    SourceWins,
    #[serde(rename = "target-wins")]
    TargetWins,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeStrategy {
    #[serde(default)]
    pub on_conflict: ConflictResolution,
    #[serde(default)]
    pub soft_delete: bool,
    #[serde(default)]
    pub audit_changes: bool,
}

/// Bookkeeping for how far a data source has been synced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Watermark {
    pub data_source_id: String,
    pub last_sync_timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_version: Option<i64>,
    /// Cumulative across syncs until the watermark is reset.
    pub records_processed: u64,
}

/// Percentages of each change kind relative to `total_records`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeStats {
    pub insert_rate: f64,
    pub update_rate: f64,
    pub delete_rate: f64,
    pub unchanged_rate: f64,
    pub total_changes: usize,
}

impl ChangeStats {
    pub fn from_change_set(change_set: &ChangeSet) -> Self {
        let total = change_set.total_records;
        let rate = |count: usize| {
            if total == 0 {
                0.0
            } else {
                count as f64 / total as f64 * 100.0
            }
        };
        Self {
            insert_rate: rate(change_set.inserts.len()),
            update_rate: rate(change_set.updates.len()),
            delete_rate: rate(change_set.deletes.len()),
            unchanged_rate: rate(change_set.unchanged),
            total_changes: change_set.total_changes(),
        }
    }
}

/// Everything `incremental_sync` produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub change_set: ChangeSet,
    pub watermark: Watermark,
    pub statistics: ChangeStats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: CdcConfig = serde_json::from_value(json!({
            "dataSourceId": "customers",
            "primaryKey": "id"
        }))
        .unwrap();
        assert_eq!(config.tracking_mode, TrackingMode::Hash);
        assert_eq!(config.version_column, "version");
        assert!(!config.enable_deletes);
        config.validate().unwrap();
    }

    #[test]
    fn test_timestamp_mode_requires_column() {
        let mut config = CdcConfig::new("s", "id");
        config.tracking_mode = TrackingMode::Timestamp;
        assert!(matches!(
            config.validate(),
            Err(CdcError::Configuration { .. })
        ));
        CdcConfig::new("s", "id")
            .with_timestamp_column("updated_at")
            .validate()
            .unwrap();
    }

    #[test]
    fn test_merge_strategy_wire_names() {
        let strategy: MergeStrategy = serde_json::from_value(json!({
            "onConflict": "target-wins",
            "softDelete": true
        }))
        .unwrap();
        assert_eq!(strategy.on_conflict, ConflictResolution::TargetWins);
        assert!(strategy.soft_delete);
        assert!(!strategy.audit_changes);
        assert_eq!(
            serde_json::to_value(ConflictResolution::SourceWins).unwrap(),
            json!("source-wins")
        );
    }

    #[test]
    fn test_stats_guard_zero_total() {
        let stats = ChangeStats::from_change_set(&ChangeSet::empty());
        assert_eq!(stats.insert_rate, 0.0);
        assert_eq!(stats.unchanged_rate, 0.0);
        assert_eq!(stats.total_changes, 0);
    }

    #[test]
    fn test_stats_rates() {
        let rec = json!({"id": 1}).as_object().cloned().unwrap();
        let mut cs = ChangeSet::empty();
        cs.inserts.push(rec.clone());
        cs.deletes.push(rec);
        cs.unchanged = 2;
        cs.total_records = 4;
        let stats = ChangeStats::from_change_set(&cs);
        assert_eq!(stats.insert_rate, 25.0);
        assert_eq!(stats.delete_rate, 25.0);
        assert_eq!(stats.update_rate, 0.0);
        assert_eq!(stats.unchanged_rate, 50.0);
        assert_eq!(stats.total_changes, 2);
    }
}
