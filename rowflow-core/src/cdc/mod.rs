//! Change data capture: detect inserts, updates and deletes between two
//! snapshots of a dataset, and merge them back under a conflict policy.
//!
//! ```text
//! CdcManager::incremental_sync
//!     ├── WatermarkStore::load
//!     ├── classifier::classify ──▶ ChangeSet
//!     └── WatermarkStore::save
//! CdcManager::merge_changes ──▶ merge::merge ──▶ Dataset
//! ```

pub mod classifier;
pub mod manager;
pub mod merge;
pub mod store;
pub mod types;

pub use classifier::{BOOKKEEPING_FIELDS, classify, content_hash};
pub use manager::CdcManager;
pub use store::{FileWatermarkStore, InMemoryWatermarkStore, WatermarkStore};
pub use types::{
    CdcConfig, ChangeSet, ChangeStats, ConflictResolution, MergeStrategy, RecordUpdate, SyncResult,
    TrackingMode, Watermark,
};
