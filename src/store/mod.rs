//! Local persistent store — an embedded, versioned, multi-collection
//! key-value store backed by redb.
//!
//! Collections are redb tables with JSON-encoded record values. Every
//! multi-record mutation runs in a single write transaction, so either all
//! sub-writes land or none do. Opening the store at a higher schema version
//! creates any missing tables without touching existing data; there is no
//! downgrade path.

pub mod blobs;
pub mod folders;
pub mod pending;
pub mod playlists;
pub mod queue;
pub mod settings;
pub mod songs;
pub mod types;

use std::path::Path;

use anyhow::{Context, Result};
use redb::{Database, ReadableTable, TableDefinition};

pub use types::{
    AuthSnapshot, BlobRecord, BrowseFilter, EqPreset, FolderRecord, FolderSelector, PendingWrite,
    PlaylistId, PlaylistRecord, PlaylistSummary, Preferences, QueueSlot, QueueSnapshot, SongRecord,
    StoredPreferences, WriteDomain,
};

pub(crate) const SONGS: TableDefinition<&str, &[u8]> = TableDefinition::new("songs");
pub(crate) const BLOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("blobs");
pub(crate) const BLOB_META: TableDefinition<&str, &[u8]> = TableDefinition::new("blob_meta");
pub(crate) const PLAYLISTS: TableDefinition<&str, &[u8]> = TableDefinition::new("playlists");
pub(crate) const QUEUE: TableDefinition<&str, &[u8]> = TableDefinition::new("queue");
pub(crate) const SETTINGS: TableDefinition<&str, &[u8]> = TableDefinition::new("settings");
pub(crate) const FAVORITES: TableDefinition<&str, ()> = TableDefinition::new("favorites");
pub(crate) const PENDING: TableDefinition<u64, &[u8]> = TableDefinition::new("pending_writes");
pub(crate) const PENDING_BY_TYPE: TableDefinition<(&str, u64), ()> =
    TableDefinition::new("pending_writes_by_type");
pub(crate) const FOLDERS: TableDefinition<&str, &[u8]> = TableDefinition::new("offline_folders");
pub(crate) const DISK_USAGE: TableDefinition<&str, (u64, u64)> =
    TableDefinition::new("disk_usage");
pub(crate) const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

pub(crate) const SCHEMA_VERSION_KEY: &str = "schema_version";
pub(crate) const PENDING_SEQ_KEY: &str = "pending_next_id";

/// Current schema version. v1 is the original cache layout; v2 added the
/// offline-folder and disk-usage tables.
pub const SCHEMA_VERSION: u64 = 2;

/// Handle to the offline store. Open failures are fatal to the offline
/// subsystem and propagate to the caller.
pub struct OfflineStore {
    pub(crate) db: Database,
}

impl OfflineStore {
    /// Open (or create) the store at `path` and apply additive migrations.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)
            .with_context(|| format!("failed to open offline store at {}", path.display()))?;
        let store = Self { db };
        store.migrate().context("offline store schema upgrade failed")?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut meta = txn.open_table(META)?;
            let version = meta
                .get(SCHEMA_VERSION_KEY)?
                .map(|g| g.value())
                .unwrap_or(0);

            if version < 1 {
                txn.open_table(SONGS)?;
                txn.open_table(BLOBS)?;
                txn.open_table(BLOB_META)?;
                txn.open_table(PLAYLISTS)?;
                txn.open_table(QUEUE)?;
                txn.open_table(SETTINGS)?;
                txn.open_table(FAVORITES)?;
                txn.open_table(PENDING)?;
                txn.open_table(PENDING_BY_TYPE)?;
            }
            if version < 2 {
                txn.open_table(FOLDERS)?;
                txn.open_table(DISK_USAGE)?;
            }

            if version < SCHEMA_VERSION {
                meta.insert(SCHEMA_VERSION_KEY, SCHEMA_VERSION)?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Stored schema version, for diagnostics.
    pub fn schema_version(&self) -> Result<u64> {
        let txn = self.db.begin_read()?;
        let meta = txn.open_table(META)?;
        Ok(meta
            .get(SCHEMA_VERSION_KEY)?
            .map(|g| g.value())
            .unwrap_or(0))
    }
}

pub(crate) fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).context("corrupt record in offline store")
}

pub(crate) fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).context("failed to encode record")
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;
    use tempfile::TempDir;

    /// Store backed by a temp dir; the dir handle keeps the files alive for
    /// the duration of the test.
    pub fn open_temp() -> (TempDir, OfflineStore) {
        let dir = TempDir::new().unwrap();
        let store = OfflineStore::open(&dir.path().join("offline.redb")).unwrap();
        (dir, store)
    }
}
