//! Offline-aware API facade.
//!
//! One method per domain operation. Every call routes through the same
//! decision: when [`SharedState::should_use_offline`] is true the operation
//! runs entirely against the local store (reads return best-effort cached
//! data, writes mutate the cache optimistically and append a pending
//! write); otherwise the remote is attempted, successful results are
//! mirrored into the store, and a transport-shaped failure flips
//! connectivity and re-dispatches to the offline path. Business errors from
//! the remote propagate unchanged.

pub mod auth;
pub mod browse;
pub mod history;
pub mod playback;
pub mod playlists;
pub mod preferences;
pub mod queue;

pub use playlists::{PlaylistCreateOutcome, PlaylistOpOutcome};
pub use preferences::PreferencesOutcome;
pub use queue::{QueueAddOutcome, QueueRemoveOutcome, QueueSortOutcome, SavedQueuePlaylist};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;

use crate::config::WorkOfflineFlag;
use crate::error::RemoteError;
use crate::events::{ChangeEvent, EventBus};
use crate::remote::api::RemoteApi;
use crate::state::SharedState;
use crate::store::{OfflineStore, QueueSlot, SongRecord, WriteDomain};

pub struct OfflineClient {
    pub(crate) remote: RemoteApi,
    pub(crate) store: Arc<OfflineStore>,
    pub(crate) state: SharedState,
    pub(crate) events: EventBus,
    work_offline_flag: WorkOfflineFlag,
    pub(crate) device_id: String,
    /// While true, queue operations address the temp snapshot pair and
    /// enqueue no pending writes.
    preview_active: AtomicBool,
}

impl OfflineClient {
    pub fn new(
        remote: RemoteApi,
        store: Arc<OfflineStore>,
        state: SharedState,
        events: EventBus,
        work_offline_flag: WorkOfflineFlag,
    ) -> Self {
        let device_id = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown-device".to_string());
        Self {
            remote,
            store,
            state,
            events,
            work_offline_flag,
            device_id,
            preview_active: AtomicBool::new(false),
        }
    }

    /// Toggle user-forced offline mode. Persisted in the sidecar flag file
    /// so it is readable before the store opens on the next start.
    pub fn set_work_offline(&self, enabled: bool) -> Result<()> {
        self.work_offline_flag.set(enabled)?;
        self.state.set_work_offline(enabled);
        Ok(())
    }

    pub(crate) fn offline(&self) -> bool {
        self.state.should_use_offline()
    }

    /// A transport failure flips connectivity; the caller then re-dispatches
    /// to the offline path.
    pub(crate) fn note_transport_failure(&self, op: &str, err: &RemoteError) {
        tracing::warn!(op, error = %err, "network unavailable, falling back to offline path");
        self.state.set_online(false);
    }

    pub(crate) fn preview_active(&self) -> bool {
        self.preview_active.load(Ordering::Relaxed)
    }

    pub(crate) fn set_preview_active(&self, active: bool) {
        self.preview_active.store(active, Ordering::Relaxed);
    }

    /// The queue slot current operations address.
    pub(crate) fn queue_slot(&self) -> QueueSlot {
        if self.preview_active() {
            QueueSlot::Temp
        } else {
            QueueSlot::Current
        }
    }

    /// Append a pending write and refresh the observable count.
    pub(crate) fn enqueue_write(
        &self,
        domain: WriteDomain,
        operation: &str,
        payload: serde_json::Value,
    ) -> Result<()> {
        self.store.pending_append(domain, operation, payload)?;
        self.refresh_pending_count()
    }

    pub(crate) fn refresh_pending_count(&self) -> Result<()> {
        let count = self.store.pending_count()?;
        self.state.set_pending_write_count(count);
        Ok(())
    }

    /// Explicit user-initiated discard of the whole pending queue.
    pub fn discard_pending_writes(&self) -> Result<u64> {
        let discarded = self.store.pending_discard_all()?;
        self.refresh_pending_count()?;
        Ok(discarded)
    }

    /// Refresh derived browse indexes and offline lists after a bulk
    /// metadata change.
    pub(crate) fn refresh_derived_state(&self) -> Result<()> {
        let songs = self.store.songs_all()?;
        self.state.refresh_browse_index(&songs);
        self.state.set_offline_folders(self.store.folders_all()?);
        Ok(())
    }

    pub(crate) fn emit_playlists_changed(&self) {
        self.events.emit(ChangeEvent::PlaylistsChanged);
    }

    /// Resolve cached metadata for a uuid list, in order, stubbing any
    /// unknown entry.
    pub(crate) fn songs_for(&self, uuids: &[String]) -> Result<Vec<SongRecord>> {
        let mut songs = Vec::with_capacity(uuids.len());
        for uuid in uuids {
            songs.push(
                self.store
                    .song_get(uuid)?
                    .unwrap_or_else(|| SongRecord::stub(uuid)),
            );
        }
        Ok(songs)
    }
}
