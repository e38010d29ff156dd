//! CDC sync and merge scenarios through the public API.

use rowflow_core::types::dataset_from_value;
use rowflow_core::{
    CdcConfig, CdcError, CdcManager, ChangeSet, ConflictResolution, Dataset, FileWatermarkStore,
    MergeStrategy, TrackingMode, WatermarkStore,
};
use serde_json::{Value, json};
use std::sync::Arc;

fn data(v: Value) -> Dataset {
    dataset_from_value(v).unwrap()
}

#[tokio::test]
async fn test_insert_and_unchanged_without_deletes() {
    let manager = CdcManager::in_memory();
    let result = manager
        .incremental_sync(
            "customers",
            &data(json!([{"id": 1}, {"id": 2}])),
            &data(json!([{"id": 1}])),
            &CdcConfig::new("customers", "id"),
        )
        .await
        .unwrap();
    let cs = &result.change_set;
    assert_eq!(cs.inserts.len(), 1);
    assert_eq!(cs.updates.len(), 0);
    assert_eq!(cs.unchanged, 1);
}

#[tokio::test]
async fn test_update_detected() {
    let manager = CdcManager::in_memory();
    let result = manager
        .incremental_sync(
            "customers",
            &data(json!([{"id": 1, "email": "new"}])),
            &data(json!([{"id": 1, "email": "old"}])),
            &CdcConfig::new("customers", "id"),
        )
        .await
        .unwrap();
    assert_eq!(result.change_set.updates.len(), 1);
    assert_eq!(result.change_set.updates[0].after["email"], json!("new"));
}

#[tokio::test]
async fn test_delete_detected_when_enabled() {
    let manager = CdcManager::in_memory();
    let result = manager
        .incremental_sync(
            "customers",
            &data(json!([{"id": 1}])),
            &data(json!([{"id": 1}, {"id": 2}])),
            &CdcConfig::new("customers", "id").with_deletes(true),
        )
        .await
        .unwrap();
    assert_eq!(result.change_set.deletes.len(), 1);
    assert_eq!(result.change_set.deletes[0]["id"], json!(2));
    assert_eq!(result.statistics.delete_rate, 50.0);
}

#[tokio::test]
async fn test_merge_soft_delete_keeps_length() {
    let manager = CdcManager::in_memory();
    let existing = data(json!([{"id": 1, "name": "a"}, {"id": 2, "name": "b"}]));
    let mut change_set = ChangeSet::empty();
    change_set.deletes = data(json!([{"id": 2}]));
    let strategy = MergeStrategy {
        on_conflict: ConflictResolution::SourceWins,
        soft_delete: true,
        audit_changes: false,
    };
    let merged = manager
        .merge_changes(&existing, &change_set, &CdcConfig::new("customers", "id"), &strategy)
        .unwrap();
    assert_eq!(merged.len(), 2);
    let deleted = merged.iter().find(|r| r["id"] == json!(2)).unwrap();
    assert_eq!(deleted["_deleted"], json!(true));
}

#[tokio::test]
async fn test_repeat_sync_is_idempotent() {
    let manager = CdcManager::in_memory();
    let config = CdcConfig::new("orders", "order_id").with_deletes(true);
    let existing = data(json!([
        {"order_id": 1, "status": "open"},
        {"order_id": 2, "status": "open"},
    ]));
    let new = data(json!([
        {"order_id": 1, "status": "closed"},
        {"order_id": 3, "status": "open"},
    ]));

    let (_, merged) = manager
        .sync_and_merge("orders", &new, &existing, &config, &MergeStrategy::default())
        .await
        .unwrap();

    let again = manager
        .incremental_sync("orders", &new, &merged, &config)
        .await
        .unwrap();
    let cs = &again.change_set;
    assert_eq!(cs.inserts.len(), 0);
    assert_eq!(cs.updates.len(), 0);
    assert_eq!(cs.deletes.len(), 0);
    assert_eq!(cs.unchanged, cs.total_records);
    assert_eq!(again.statistics.unchanged_rate, 100.0);
}

#[tokio::test]
async fn test_idempotent_after_soft_delete_with_audit() {
    let manager = CdcManager::in_memory();
    let config = CdcConfig::new("s", "id").with_deletes(true);
    let existing = data(json!([{"id": 1, "v": 1}, {"id": 2, "v": 2}]));
    let new = data(json!([{"id": 1, "v": 10}]));
    let strategy = MergeStrategy {
        on_conflict: ConflictResolution::SourceWins,
        soft_delete: true,
        audit_changes: true,
    };
    let (_, merged) = manager
        .sync_and_merge("s", &new, &existing, &config, &strategy)
        .await
        .unwrap();
    assert_eq!(merged.len(), 2);

    // audit fields and the tombstone must not register as changes
    let again = manager.incremental_sync("s", &new, &merged, &config).await.unwrap();
    assert_eq!(again.change_set.total_changes(), 0);
    assert_eq!(again.change_set.unchanged, 1);
    assert_eq!(again.change_set.total_records, 1);
}

#[tokio::test]
async fn test_timestamp_mode_second_sync_sees_only_new_rows() {
    let manager = CdcManager::in_memory();
    let config = CdcConfig::new("events", "id").with_timestamp_column("updated_at");
    let snapshot = data(json!([
        {"id": 1, "updated_at": "2020-01-01T00:00:00Z", "v": 1},
        {"id": 2, "updated_at": "2020-01-02T00:00:00Z", "v": 2},
    ]));

    let first = manager
        .incremental_sync("events", &snapshot, &[], &config)
        .await
        .unwrap();
    assert_eq!(first.change_set.inserts.len(), 2);

    let mut next = snapshot.clone();
    next.push(
        json!({"id": 3, "updated_at": "2999-01-01T00:00:00Z", "v": 3})
            .as_object()
            .cloned()
            .unwrap(),
    );
    let second = manager
        .incremental_sync("events", &next, &snapshot, &config)
        .await
        .unwrap();
    assert_eq!(second.change_set.unchanged, 2);
    assert_eq!(second.change_set.inserts.len(), 1);
    assert_eq!(second.watermark.records_processed, 5);
}

#[tokio::test]
async fn test_reset_forces_full_load() {
    let manager = CdcManager::in_memory();
    let config = CdcConfig {
        tracking_mode: TrackingMode::Timestamp,
        timestamp_column: Some("ts".into()),
        ..CdcConfig::new("s", "id")
    };
    let existing = data(json!([{"id": 1, "ts": "2000-01-01T00:00:00Z", "v": "old"}]));
    let new = data(json!([{"id": 1, "ts": "2000-01-01T00:00:00Z", "v": "fixed"}]));

    manager.incremental_sync("s", &existing, &[], &config).await.unwrap();
    let skipped = manager.incremental_sync("s", &new, &existing, &config).await.unwrap();
    assert_eq!(skipped.change_set.updates.len(), 0);

    manager.reset_watermark("s").await.unwrap();
    let full = manager.incremental_sync("s", &new, &existing, &config).await.unwrap();
    assert_eq!(full.change_set.updates.len(), 1);
}

#[tokio::test]
async fn test_missing_key_aborts_sync() {
    let manager = CdcManager::in_memory();
    let err = manager
        .incremental_sync(
            "s",
            &data(json!([{"id": 1}])),
            &data(json!([{"id": 1}, {"name": "orphan"}])),
            &CdcConfig::new("s", "id"),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CdcError::KeyMissing {
            dataset: "existing",
            index: 1,
            ..
        }
    ));
    assert!(manager.watermark("s").await.unwrap().is_none());
}

#[tokio::test]
async fn test_target_wins_merge_through_manager() {
    let manager = CdcManager::in_memory();
    let config = CdcConfig::new("s", "id");
    let existing = data(json!([{"id": 1, "email": "keep@x"}]));
    let new = data(json!([{"id": 1, "email": "drop@x", "phone": "555"}]));
    let strategy = MergeStrategy {
        on_conflict: ConflictResolution::TargetWins,
        ..MergeStrategy::default()
    };
    let (_, merged) = manager
        .sync_and_merge("s", &new, &existing, &config, &strategy)
        .await
        .unwrap();
    assert_eq!(merged[0]["email"], json!("keep@x"));
    assert_eq!(merged[0]["phone"], json!("555"));
}

#[tokio::test]
async fn test_file_store_persists_across_managers() {
    let dir = tempfile::tempdir().unwrap();
    let config = CdcConfig::new("s", "id");
    let rows = data(json!([{"id": 1}, {"id": 2}]));

    {
        let manager = CdcManager::new(Arc::new(FileWatermarkStore::new(dir.path())));
        manager.incremental_sync("s", &rows, &[], &config).await.unwrap();
    }

    let store = Arc::new(FileWatermarkStore::new(dir.path()));
    let saved = store.load("s").await.unwrap().unwrap();
    assert_eq!(saved.records_processed, 2);

    let manager = CdcManager::new(store);
    let next = manager.incremental_sync("s", &rows, &rows, &config).await.unwrap();
    assert_eq!(next.watermark.records_processed, 4);
}
