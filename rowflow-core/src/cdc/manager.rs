//! CDC facade: classification, merge, statistics, and watermark lifecycle.

use crate::cdc::classifier::{self, max_version};
use crate::cdc::merge;
use crate::cdc::store::{InMemoryWatermarkStore, WatermarkStore};
use crate::cdc::types::{
    CdcConfig, ChangeSet, ChangeStats, MergeStrategy, SyncResult, TrackingMode, Watermark,
};
use crate::error::CdcError;
use crate::types::{Dataset, Record};
use std::sync::Arc;
use tracing::{info, instrument};

pub struct CdcManager {
    store: Arc<dyn WatermarkStore>,
}

impl CdcManager {
    pub fn new(store: Arc<dyn WatermarkStore>) -> Self {
        Self { store }
    }

    /// A manager whose watermarks live only as long as it does.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryWatermarkStore::new()))
    }

    pub async fn watermark(&self, data_source_id: &str) -> Result<Option<Watermark>, CdcError> {
        self.store.load(data_source_id).await
    }

    /// Classify `new_data` against `existing_data` and advance the watermark.
    ///
    /// The watermark is only written after classification succeeds; on error
    /// nothing is returned and the stored watermark is untouched.
    #[instrument(
        skip(self, new_data, existing_data, config),
        fields(mode = %config.tracking_mode, new = new_data.len(), existing = existing_data.len())
    )]
    pub async fn incremental_sync(
        &self,
        data_source_id: &str,
        new_data: &[Record],
        existing_data: &[Record],
        config: &CdcConfig,
    ) -> Result<SyncResult, CdcError> {
        if !config.data_source_id.is_empty() && config.data_source_id != data_source_id {
            return Err(CdcError::configuration(format!(
                "config is for data source '{}', not '{data_source_id}'",
                config.data_source_id
            )));
        }

        let previous = self.store.load(data_source_id).await?;
        let change_set = classifier::classify(new_data, existing_data, config, previous.as_ref())?;

        let last_sync_version = match config.tracking_mode {
            TrackingMode::Version => {
                let seen = max_version(new_data, &config.version_column);
                let prior = previous.as_ref().and_then(|w| w.last_sync_version);
                seen.max(prior)
            }
            _ => previous.as_ref().and_then(|w| w.last_sync_version),
        };
        let watermark = Watermark {
            data_source_id: data_source_id.to_string(),
            last_sync_timestamp: change_set.timestamp,
            last_sync_version,
            records_processed: previous.as_ref().map_or(0, |w| w.records_processed)
                + change_set.total_records as u64,
        };
        self.store.save(&watermark).await?;

        let statistics = ChangeStats::from_change_set(&change_set);
        info!(
            data_source_id,
            inserts = change_set.inserts.len(),
            updates = change_set.updates.len(),
            deletes = change_set.deletes.len(),
            unchanged = change_set.unchanged,
            full_load = previous.is_none(),
            "incremental sync complete"
        );
        Ok(SyncResult {
            change_set,
            watermark,
            statistics,
        })
    }

    /// Apply a change set to `existing_data` under `strategy`.
    pub fn merge_changes(
        &self,
        existing_data: &[Record],
        change_set: &ChangeSet,
        config: &CdcConfig,
        strategy: &MergeStrategy,
    ) -> Result<Dataset, CdcError> {
        merge::merge(existing_data, change_set, &config.primary_key, strategy)
    }

    pub fn calculate_change_stats(&self, change_set: &ChangeSet) -> ChangeStats {
        ChangeStats::from_change_set(change_set)
    }

    /// Forget a source's watermark so the next sync is a full load.
    pub async fn reset_watermark(&self, data_source_id: &str) -> Result<bool, CdcError> {
        let existed = self.store.delete(data_source_id).await?;
        info!(data_source_id, existed, "watermark reset");
        Ok(existed)
    }

    /// `incremental_sync` followed by `merge_changes`.
    ///
    /// The merge runs before the caller sees anything, but the watermark has
    /// already advanced when the merge itself fails.
    pub async fn sync_and_merge(
        &self,
        data_source_id: &str,
        new_data: &[Record],
        existing_data: &[Record],
        config: &CdcConfig,
        strategy: &MergeStrategy,
    ) -> Result<(SyncResult, Dataset), CdcError> {
        let sync = self
            .incremental_sync(data_source_id, new_data, existing_data, config)
            .await?;
        let merged = self.merge_changes(existing_data, &sync.change_set, config, strategy)?;
        Ok((sync, merged))
    }
}
