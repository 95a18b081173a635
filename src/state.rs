//! Reactive state container.
//!
//! Single source of truth for connectivity, sync status, and cache-derived
//! browsing state. Mutated only through the setters here (by the facade,
//! the sync manager, and explicit UI-originated calls); consumers read
//! snapshots or subscribe to the event bus. Mutations apply synchronously,
//! so a read that follows a mutation in the same logical operation observes
//! it.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::config::WorkOfflineFlag;
use crate::events::{ChangeEvent, EventBus};
use crate::store::{FolderRecord, OfflineStore, PlaylistId, PlaylistSummary, SongRecord};

/// Derived browse indexes, rebuilt by a full scan of cached song metadata.
#[derive(Debug, Clone, Default)]
pub struct BrowseIndex {
    pub artists: BTreeSet<String>,
    pub albums: BTreeSet<String>,
    pub genres: BTreeSet<String>,
    pub categories: BTreeSet<String>,
    pub paths: BTreeSet<String>,
    pub has_unknown_artist: bool,
    pub has_unknown_genre: bool,
    pub has_unknown_category: bool,
}

impl BrowseIndex {
    /// One pass over the cached metadata rebuilds every index set and the
    /// unknown flags. Deliberately not incremental; call it after any bulk
    /// metadata change.
    pub fn rebuild(songs: &[SongRecord]) -> Self {
        let mut index = BrowseIndex::default();
        for song in songs {
            match song.artist.trim() {
                "" => index.has_unknown_artist = true,
                artist => {
                    index.artists.insert(artist.to_string());
                }
            }
            if !song.album.trim().is_empty() {
                index.albums.insert(song.album.trim().to_string());
            }
            match song.genre.as_deref().map(str::trim) {
                None | Some("") => index.has_unknown_genre = true,
                Some(genre) => {
                    index.genres.insert(genre.to_string());
                }
            }
            match song.category.as_deref().map(str::trim) {
                None | Some("") => index.has_unknown_category = true,
                Some(category) => {
                    index.categories.insert(category.to_string());
                }
            }
            if let Some(file) = &song.file {
                if let Some(dir) = parent_dir(file) {
                    index.paths.insert(dir);
                }
            }
        }
        index
    }
}

fn parent_dir(file: &str) -> Option<String> {
    let trimmed = file.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => Some("/".to_string()),
        Some(idx) => Some(trimmed[..idx].to_string()),
        None => None,
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    /// Mirrors platform connectivity; flipped false on transport failures.
    pub is_online: bool,
    /// User-forced offline mode.
    pub work_offline: bool,
    pub pending_write_count: u64,
    pub sync_failed: bool,
    pub sync_error: Option<String>,
    pub sync_failed_at: Option<DateTime<Utc>>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub offline_song_uuids: HashSet<String>,
    pub favorite_songs: HashSet<String>,
    pub favorites_playlist_id: Option<PlaylistId>,
    pub offline_playlists: Vec<PlaylistSummary>,
    pub offline_folders: Vec<FolderRecord>,
    pub browse: BrowseIndex,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            is_online: true,
            work_offline: false,
            pending_write_count: 0,
            sync_failed: false,
            sync_error: None,
            sync_failed_at: None,
            last_sync_at: None,
            offline_song_uuids: HashSet::new(),
            favorite_songs: HashSet::new(),
            favorites_playlist_id: None,
            offline_playlists: Vec::new(),
            offline_folders: Vec::new(),
            browse: BrowseIndex::default(),
        }
    }
}

/// Shared handle to the reactive state. Cheap to clone; all mutation goes
/// through the methods here so every change also reaches the event bus.
#[derive(Clone)]
pub struct SharedState {
    inner: Arc<Mutex<AppState>>,
    events: EventBus,
}

impl SharedState {
    pub fn new(events: EventBus) -> Self {
        Self {
            inner: Arc::new(Mutex::new(AppState::default())),
            events,
        }
    }

    /// Populate from the persisted store at startup.
    pub fn hydrate(&self, store: &OfflineStore, flag: &WorkOfflineFlag) -> Result<()> {
        let pending = store.pending_count()?;
        let favorites = store.favorites()?;
        let songs = store.songs_all()?;
        let playlists: Vec<PlaylistSummary> = store
            .setting_get(crate::store::settings::KEY_PLAYLIST_LIST)?
            .unwrap_or_default();
        let folders = store.folders_all()?;
        let last_sync = store.last_sync_at()?;
        let favorites_playlist_id =
            store.setting_get(crate::store::settings::KEY_FAVORITES_PLAYLIST_ID)?;
        let offline_uuids: HashSet<String> = store
            .blob_metas_all()?
            .into_iter()
            .map(|b| b.uuid)
            .collect();

        let mut state = self.lock();
        state.work_offline = flag.get();
        state.pending_write_count = pending;
        state.favorite_songs = favorites;
        state.offline_song_uuids = offline_uuids;
        state.offline_playlists = playlists;
        state.offline_folders = folders;
        state.last_sync_at = last_sync;
        state.favorites_playlist_id = favorites_playlist_id;
        state.browse = BrowseIndex::rebuild(&songs);
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AppState> {
        self.inner.lock().expect("state lock poisoned")
    }

    pub fn snapshot(&self) -> AppState {
        self.lock().clone()
    }

    /// The single predicate that routes every facade operation.
    pub fn should_use_offline(&self) -> bool {
        let state = self.lock();
        !state.is_online || state.work_offline
    }

    pub fn is_online(&self) -> bool {
        self.lock().is_online
    }

    pub fn set_online(&self, online: bool) {
        let regained = {
            let mut state = self.lock();
            let regained = online && !state.is_online;
            state.is_online = online;
            regained
        };
        if regained {
            self.events.emit(ChangeEvent::OnlineRegained);
        }
    }

    pub fn work_offline(&self) -> bool {
        self.lock().work_offline
    }

    pub fn set_work_offline(&self, enabled: bool) {
        self.lock().work_offline = enabled;
    }

    pub fn pending_write_count(&self) -> u64 {
        self.lock().pending_write_count
    }

    pub fn set_pending_write_count(&self, count: u64) {
        self.lock().pending_write_count = count;
        self.events.emit(ChangeEvent::PendingWrites(count));
    }

    pub fn record_sync_failure(&self, error: &str) {
        {
            let mut state = self.lock();
            state.sync_failed = true;
            state.sync_error = Some(error.to_string());
            state.sync_failed_at = Some(Utc::now());
        }
        self.events.emit(ChangeEvent::SyncFailed(error.to_string()));
    }

    pub fn record_sync_success(&self, at: DateTime<Utc>) {
        {
            let mut state = self.lock();
            state.sync_failed = false;
            state.sync_error = None;
            state.sync_failed_at = None;
            state.last_sync_at = Some(at);
        }
        self.events.emit(ChangeEvent::SyncSucceeded);
    }

    pub fn set_favorites(&self, favorites: HashSet<String>) {
        self.lock().favorite_songs = favorites;
    }

    pub fn favorites(&self) -> HashSet<String> {
        self.lock().favorite_songs.clone()
    }

    pub fn favorites_playlist_id(&self) -> Option<PlaylistId> {
        self.lock().favorites_playlist_id.clone()
    }

    pub fn set_favorites_playlist_id(&self, id: Option<PlaylistId>) {
        self.lock().favorites_playlist_id = id;
    }

    pub fn set_offline_playlists(&self, playlists: Vec<PlaylistSummary>) {
        self.lock().offline_playlists = playlists;
    }

    pub fn set_offline_folders(&self, folders: Vec<FolderRecord>) {
        self.lock().offline_folders = folders;
    }

    pub fn set_offline_song_uuids(&self, uuids: HashSet<String>) {
        self.lock().offline_song_uuids = uuids;
    }

    /// Rebuild the derived browse indexes from a metadata scan.
    pub fn refresh_browse_index(&self, songs: &[SongRecord]) {
        let index = BrowseIndex::rebuild(songs);
        self.lock().browse = index;
    }
}
