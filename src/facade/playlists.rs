//! Playlist operations.
//!
//! Playlists created offline get a placeholder identity and live entirely
//! in the local cache until the sync commits their create; every mutation
//! addressed to a placeholder operates on the locally-stored song list and
//! the queued write carries the placeholder as a correlation token.

use anyhow::{anyhow, Result};
use chrono::Utc;
use serde_json::json;

use super::OfflineClient;
use crate::remote::api::Page;
use crate::sorting::{self, SortKey, SortOrder};
use crate::store::settings::{playlist_songs_key, KEY_PLAYLIST_LIST};
use crate::store::{PlaylistId, PlaylistRecord, PlaylistSummary, SongRecord, WriteDomain};

const DEFAULT_SONGS_PAGE: u64 = 100;

#[derive(Debug, Clone)]
pub struct PlaylistCreateOutcome {
    pub id: PlaylistId,
    pub name: String,
    pub queued: bool,
}

#[derive(Debug, Clone)]
pub struct PlaylistOpOutcome {
    pub queued: bool,
}

impl OfflineClient {
    // ── Shared cache plumbing ────────────────────────────────────────

    pub(crate) fn cached_playlist_list(&self) -> Result<Vec<PlaylistSummary>> {
        Ok(self
            .store
            .setting_get(KEY_PLAYLIST_LIST)?
            .unwrap_or_default())
    }

    fn save_playlist_list(&self, list: Vec<PlaylistSummary>) -> Result<()> {
        self.store.setting_put(KEY_PLAYLIST_LIST, &list)?;
        self.state.set_offline_playlists(list);
        Ok(())
    }

    fn update_cached_summary(
        &self,
        id: &PlaylistId,
        update: impl FnOnce(&mut PlaylistSummary),
    ) -> Result<()> {
        let mut list = self.cached_playlist_list()?;
        if let Some(entry) = list.iter_mut().find(|p| p.id == *id) {
            update(entry);
        }
        self.save_playlist_list(list)
    }

    pub(crate) fn mirror_new_playlist_summary(
        &self,
        id: &PlaylistId,
        name: &str,
        song_count: u32,
    ) -> Result<()> {
        let mut list = self.cached_playlist_list()?;
        list.retain(|p| p.id != *id);
        list.push(PlaylistSummary {
            id: id.clone(),
            name: name.to_string(),
            description: String::new(),
            song_count,
            is_public: false,
            pending: id.is_local(),
        });
        self.save_playlist_list(list)
    }

    /// Locally-known song list for a playlist: the downloaded record when
    /// there is one, else the cached browse list.
    fn playlist_local_songs(&self, id: &PlaylistId) -> Result<Vec<String>> {
        if let Some(record) = self.store.playlist_get(id)? {
            return Ok(record.song_uuids);
        }
        Ok(self
            .store
            .setting_get(&playlist_songs_key(&id.as_key()))?
            .unwrap_or_default())
    }

    fn set_playlist_local_songs(&self, id: &PlaylistId, uuids: &[String]) -> Result<()> {
        if let Some(mut record) = self.store.playlist_get(id)? {
            record.song_uuids = uuids.to_vec();
            record.total_songs = uuids.len() as u32;
            self.store.playlist_put(&record)?;
        } else {
            for uuid in uuids {
                if !self.store.song_exists(uuid)? {
                    self.store.song_put(&SongRecord::stub(uuid))?;
                }
            }
        }
        self.store
            .setting_put(&playlist_songs_key(&id.as_key()), &uuids.to_vec())?;
        self.update_cached_summary(id, |s| s.song_count = uuids.len() as u32)
    }

    pub(crate) fn fresh_placeholder_id(&self) -> Result<PlaylistId> {
        let mut token = Utc::now().timestamp_millis() as u64;
        while self.store.playlist_get(&PlaylistId::Local(token))?.is_some() {
            token += 1;
        }
        Ok(PlaylistId::Local(token))
    }

    pub(crate) fn insert_placeholder_playlist(
        &self,
        id: &PlaylistId,
        name: &str,
        description: &str,
        song_uuids: &[String],
    ) -> Result<()> {
        self.store.playlist_put(&PlaylistRecord {
            id: id.clone(),
            name: name.to_string(),
            description: description.to_string(),
            song_uuids: song_uuids.to_vec(),
            downloaded_bytes: 0,
            downloaded_songs: 0,
            total_songs: song_uuids.len() as u32,
            complete: false,
        })?;
        self.store
            .setting_put(&playlist_songs_key(&id.as_key()), &song_uuids.to_vec())?;

        let mut list = self.cached_playlist_list()?;
        list.push(PlaylistSummary {
            id: id.clone(),
            name: name.to_string(),
            description: description.to_string(),
            song_count: song_uuids.len() as u32,
            is_public: false,
            pending: true,
        });
        self.save_playlist_list(list)
    }

    // ── Operations ───────────────────────────────────────────────────

    pub async fn playlists_list(&self) -> Result<Vec<PlaylistSummary>> {
        if self.offline() {
            return self.playlists_list_offline();
        }
        match self.remote.playlists_list().await {
            Ok(remote_list) => {
                // Keep optimistic placeholder entries that haven't synced.
                let pending: Vec<PlaylistSummary> = self
                    .cached_playlist_list()?
                    .into_iter()
                    .filter(|p| p.pending)
                    .collect();
                let mut merged = remote_list;
                merged.extend(pending);
                self.save_playlist_list(merged.clone())?;
                Ok(merged)
            }
            Err(e) if e.is_transport() => {
                self.note_transport_failure("playlists_list", &e);
                self.playlists_list_offline()
            }
            Err(e) => Err(e.into()),
        }
    }

    fn playlists_list_offline(&self) -> Result<Vec<PlaylistSummary>> {
        let cached = self.cached_playlist_list()?;
        if !cached.is_empty() {
            return Ok(cached);
        }
        // No cached listing; derive one from downloaded playlist records.
        Ok(self
            .store
            .playlists_all()?
            .into_iter()
            .map(|record| PlaylistSummary {
                pending: record.id.is_local(),
                id: record.id,
                name: record.name,
                description: record.description,
                song_count: record.total_songs,
                is_public: false,
            })
            .collect())
    }

    pub async fn playlists_get_songs(
        &self,
        id: &PlaylistId,
        cursor: Option<&str>,
        limit: Option<u64>,
    ) -> Result<Page<SongRecord>> {
        if id.is_local() || self.offline() {
            return self.playlists_get_songs_offline(id, cursor, limit);
        }
        match self.remote.playlists_get_songs(id, cursor, limit).await {
            Ok(page) => {
                self.store.song_put_many(&page.items)?;
                self.refresh_derived_state()?;
                let page_uuids: Vec<String> =
                    page.items.iter().map(|s| s.uuid.clone()).collect();
                let key = playlist_songs_key(&id.as_key());
                if cursor.is_none() {
                    self.store.setting_put(&key, &page_uuids)?;
                } else {
                    let mut cached: Vec<String> =
                        self.store.setting_get(&key)?.unwrap_or_default();
                    cached.extend(page_uuids);
                    self.store.setting_put(&key, &cached)?;
                }
                Ok(page)
            }
            Err(e) if e.is_transport() => {
                self.note_transport_failure("playlists_get_songs", &e);
                self.playlists_get_songs_offline(id, cursor, limit)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn playlists_get_songs_offline(
        &self,
        id: &PlaylistId,
        cursor: Option<&str>,
        limit: Option<u64>,
    ) -> Result<Page<SongRecord>> {
        let uuids = self.playlist_local_songs(id)?;
        let songs = self.songs_for(&uuids)?;
        Ok(super::browse::paginate(songs, cursor, limit.unwrap_or(DEFAULT_SONGS_PAGE)))
    }

    pub async fn playlists_create(
        &self,
        name: &str,
        description: &str,
    ) -> Result<PlaylistCreateOutcome> {
        if name.trim().is_empty() {
            return Err(anyhow!("Playlist name is required"));
        }
        if self.offline() {
            return self.playlists_create_offline(name.trim(), description);
        }
        match self.remote.playlists_create(name.trim(), description, false).await {
            Ok(created) => {
                let id = PlaylistId::Remote(created.id);
                self.mirror_new_playlist_summary(&id, &created.name, 0)?;
                self.emit_playlists_changed();
                Ok(PlaylistCreateOutcome {
                    id,
                    name: created.name,
                    queued: false,
                })
            }
            Err(e) if e.is_transport() => {
                self.note_transport_failure("playlists_create", &e);
                self.playlists_create_offline(name.trim(), description)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn playlists_create_offline(
        &self,
        name: &str,
        description: &str,
    ) -> Result<PlaylistCreateOutcome> {
        let id = self.fresh_placeholder_id()?;
        self.insert_placeholder_playlist(&id, name, description, &[])?;

        // The placeholder rides along as the correlation token the commit
        // resolves to a server id.
        self.enqueue_write(
            WriteDomain::Playlists,
            "create",
            json!({
                "tempId": id.as_key(),
                "name": name,
                "description": description,
                "isPublic": false,
            }),
        )?;
        self.emit_playlists_changed();
        Ok(PlaylistCreateOutcome {
            id,
            name: name.to_string(),
            queued: true,
        })
    }

    pub async fn playlists_delete(&self, id: &PlaylistId) -> Result<PlaylistOpOutcome> {
        // A never-synced placeholder has nothing server-side to delete:
        // drop the local state and the writes that would have created it.
        if let PlaylistId::Local(_) = id {
            self.remove_local_playlist_state(id)?;
            self.drop_pending_writes_for(id)?;
            self.emit_playlists_changed();
            return Ok(PlaylistOpOutcome { queued: false });
        }

        if self.offline() {
            return self.playlists_delete_offline(id);
        }
        match self.remote.playlists_delete(id).await {
            Ok(()) => {
                self.remove_local_playlist_state(id)?;
                self.emit_playlists_changed();
                Ok(PlaylistOpOutcome { queued: false })
            }
            Err(e) if e.is_transport() => {
                self.note_transport_failure("playlists_delete", &e);
                self.playlists_delete_offline(id)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn playlists_delete_offline(&self, id: &PlaylistId) -> Result<PlaylistOpOutcome> {
        self.remove_local_playlist_state(id)?;
        self.enqueue_write(
            WriteDomain::Playlists,
            "delete",
            json!({ "playlistId": id }),
        )?;
        self.emit_playlists_changed();
        Ok(PlaylistOpOutcome { queued: true })
    }

    fn remove_local_playlist_state(&self, id: &PlaylistId) -> Result<()> {
        self.store.playlist_delete(id)?;
        let mut list = self.cached_playlist_list()?;
        list.retain(|p| p.id != *id);
        self.save_playlist_list(list)
    }

    /// Drop queued writes that reference a placeholder that no longer
    /// exists locally (its create, adds, and so on).
    fn drop_pending_writes_for(&self, id: &PlaylistId) -> Result<()> {
        let key = id.as_key();
        let doomed: Vec<u64> = self
            .store
            .pending_all()?
            .into_iter()
            .filter(|w| {
                w.payload.get("tempId").and_then(|v| v.as_str()) == Some(key.as_str())
                    || w.payload.get("playlistId").and_then(|v| v.as_str())
                        == Some(key.as_str())
            })
            .map(|w| w.id)
            .collect();
        if !doomed.is_empty() {
            self.store.pending_delete_batch(&doomed)?;
        }
        self.refresh_pending_count()
    }

    pub async fn playlists_add_song(
        &self,
        id: &PlaylistId,
        song_uuid: &str,
    ) -> Result<PlaylistOpOutcome> {
        if id.is_local() || self.offline() {
            return self.playlists_add_songs_offline(id, std::slice::from_ref(&song_uuid.to_string()), "addSong");
        }
        match self.remote.playlists_add_song(id, song_uuid).await {
            Ok(()) => {
                let mut uuids = self.playlist_local_songs(id)?;
                uuids.push(song_uuid.to_string());
                self.set_playlist_local_songs(id, &uuids)?;
                Ok(PlaylistOpOutcome { queued: false })
            }
            Err(e) if e.is_transport() => {
                self.note_transport_failure("playlists_add_song", &e);
                self.playlists_add_songs_offline(
                    id,
                    std::slice::from_ref(&song_uuid.to_string()),
                    "addSong",
                )
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn playlists_add_songs_batch(
        &self,
        id: &PlaylistId,
        song_uuids: &[String],
    ) -> Result<PlaylistOpOutcome> {
        if id.is_local() || self.offline() {
            return self.playlists_add_songs_offline(id, song_uuids, "addSongsBatch");
        }
        match self.remote.playlists_add_songs(id, song_uuids).await {
            Ok(_) => {
                let mut uuids = self.playlist_local_songs(id)?;
                uuids.extend(song_uuids.iter().cloned());
                self.set_playlist_local_songs(id, &uuids)?;
                Ok(PlaylistOpOutcome { queued: false })
            }
            Err(e) if e.is_transport() => {
                self.note_transport_failure("playlists_add_songs_batch", &e);
                self.playlists_add_songs_offline(id, song_uuids, "addSongsBatch")
            }
            Err(e) => Err(e.into()),
        }
    }

    fn playlists_add_songs_offline(
        &self,
        id: &PlaylistId,
        song_uuids: &[String],
        operation: &str,
    ) -> Result<PlaylistOpOutcome> {
        let mut uuids = self.playlist_local_songs(id)?;
        uuids.extend(song_uuids.iter().cloned());
        self.set_playlist_local_songs(id, &uuids)?;

        let payload = if operation == "addSong" {
            json!({ "playlistId": id, "songUuid": song_uuids[0] })
        } else {
            json!({ "playlistId": id, "songUuids": song_uuids })
        };
        self.enqueue_write(WriteDomain::Playlists, operation, payload)?;
        self.emit_playlists_changed();
        Ok(PlaylistOpOutcome { queued: true })
    }

    pub async fn playlists_remove_song(
        &self,
        id: &PlaylistId,
        song_uuid: &str,
    ) -> Result<PlaylistOpOutcome> {
        if id.is_local() || self.offline() {
            return self.playlists_remove_songs_offline(
                id,
                std::slice::from_ref(&song_uuid.to_string()),
                "removeSong",
            );
        }
        match self.remote.playlists_remove_song(id, song_uuid).await {
            Ok(()) => {
                let mut uuids = self.playlist_local_songs(id)?;
                uuids.retain(|u| u != song_uuid);
                self.set_playlist_local_songs(id, &uuids)?;
                Ok(PlaylistOpOutcome { queued: false })
            }
            Err(e) if e.is_transport() => {
                self.note_transport_failure("playlists_remove_song", &e);
                self.playlists_remove_songs_offline(
                    id,
                    std::slice::from_ref(&song_uuid.to_string()),
                    "removeSong",
                )
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn playlists_remove_songs(
        &self,
        id: &PlaylistId,
        song_uuids: &[String],
    ) -> Result<PlaylistOpOutcome> {
        if id.is_local() || self.offline() {
            return self.playlists_remove_songs_offline(id, song_uuids, "removeSongs");
        }
        match self.remote.playlists_remove_songs(id, song_uuids).await {
            Ok(()) => {
                let mut uuids = self.playlist_local_songs(id)?;
                uuids.retain(|u| !song_uuids.contains(u));
                self.set_playlist_local_songs(id, &uuids)?;
                Ok(PlaylistOpOutcome { queued: false })
            }
            Err(e) if e.is_transport() => {
                self.note_transport_failure("playlists_remove_songs", &e);
                self.playlists_remove_songs_offline(id, song_uuids, "removeSongs")
            }
            Err(e) => Err(e.into()),
        }
    }

    fn playlists_remove_songs_offline(
        &self,
        id: &PlaylistId,
        song_uuids: &[String],
        operation: &str,
    ) -> Result<PlaylistOpOutcome> {
        let mut uuids = self.playlist_local_songs(id)?;
        uuids.retain(|u| !song_uuids.contains(u));
        self.set_playlist_local_songs(id, &uuids)?;

        let payload = if operation == "removeSong" {
            json!({ "playlistId": id, "songUuid": song_uuids[0] })
        } else {
            json!({ "playlistId": id, "songUuids": song_uuids })
        };
        self.enqueue_write(WriteDomain::Playlists, operation, payload)?;
        self.emit_playlists_changed();
        Ok(PlaylistOpOutcome { queued: true })
    }

    /// Reorder playlist songs. `positions` pairs each uuid with its new
    /// position, matching the remote's contract.
    pub async fn playlists_reorder(
        &self,
        id: &PlaylistId,
        positions: &[(String, usize)],
    ) -> Result<PlaylistOpOutcome> {
        if id.is_local() || self.offline() {
            return self.playlists_reorder_offline(id, positions);
        }
        match self.remote.playlists_reorder(id, positions).await {
            Ok(()) => {
                self.apply_reorder_locally(id, positions)?;
                Ok(PlaylistOpOutcome { queued: false })
            }
            Err(e) if e.is_transport() => {
                self.note_transport_failure("playlists_reorder", &e);
                self.playlists_reorder_offline(id, positions)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn apply_reorder_locally(
        &self,
        id: &PlaylistId,
        positions: &[(String, usize)],
    ) -> Result<()> {
        let uuids = self.playlist_local_songs(id)?;
        let mut keyed: Vec<(usize, String)> = uuids
            .iter()
            .enumerate()
            .map(|(i, u)| {
                let new_pos = positions
                    .iter()
                    .find(|(uuid, _)| uuid == u)
                    .map(|(_, p)| *p)
                    .unwrap_or(i);
                (new_pos, u.clone())
            })
            .collect();
        keyed.sort_by_key(|(pos, _)| *pos);
        let reordered: Vec<String> = keyed.into_iter().map(|(_, u)| u).collect();
        self.set_playlist_local_songs(id, &reordered)
    }

    fn playlists_reorder_offline(
        &self,
        id: &PlaylistId,
        positions: &[(String, usize)],
    ) -> Result<PlaylistOpOutcome> {
        self.apply_reorder_locally(id, positions)?;

        let wire: Vec<serde_json::Value> = positions
            .iter()
            .map(|(uuid, pos)| json!({ "uuid": uuid, "position": pos }))
            .collect();
        self.enqueue_write(
            WriteDomain::Playlists,
            "reorder",
            json!({ "playlistId": id, "positions": wire }),
        )?;
        self.emit_playlists_changed();
        Ok(PlaylistOpOutcome { queued: true })
    }

    pub async fn playlists_sort(
        &self,
        id: &PlaylistId,
        sort_by: SortKey,
        order: SortOrder,
    ) -> Result<PlaylistOpOutcome> {
        if id.is_local() || self.offline() {
            return self.playlists_sort_offline(id, sort_by, order);
        }
        match self.remote.playlists_sort(id, sort_by, order).await {
            Ok(()) => {
                // Mirror by applying the same deterministic sort locally.
                let uuids = self.playlist_local_songs(id)?;
                let mut songs = self.songs_for(&uuids)?;
                sorting::sort_songs(&mut songs, sort_by, order);
                let sorted: Vec<String> = songs.into_iter().map(|s| s.uuid).collect();
                self.set_playlist_local_songs(id, &sorted)?;
                Ok(PlaylistOpOutcome { queued: false })
            }
            Err(e) if e.is_transport() => {
                self.note_transport_failure("playlists_sort", &e);
                self.playlists_sort_offline(id, sort_by, order)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn playlists_sort_offline(
        &self,
        id: &PlaylistId,
        sort_by: SortKey,
        order: SortOrder,
    ) -> Result<PlaylistOpOutcome> {
        let uuids = self.playlist_local_songs(id)?;
        let mut songs = self.songs_for(&uuids)?;
        sorting::sort_songs(&mut songs, sort_by, order);
        let sorted: Vec<String> = songs.into_iter().map(|s| s.uuid).collect();
        self.set_playlist_local_songs(id, &sorted)?;

        self.enqueue_write(
            WriteDomain::Playlists,
            "sort",
            json!({
                "playlistId": id,
                "sortBy": sort_by.as_str(),
                "order": order.as_str(),
            }),
        )?;
        self.emit_playlists_changed();
        Ok(PlaylistOpOutcome { queued: true })
    }
}
