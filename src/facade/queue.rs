//! Queue operations.
//!
//! Mutations are two-stage: a pure local application on the cached
//! snapshot, then either a remote call (online, result mirrored) or a
//! pending write (offline). Preview mode routes everything to the temp
//! snapshot pair and enqueues nothing.

use anyhow::{anyhow, Result};
use chrono::Utc;
use rand::seq::SliceRandom;
use serde_json::json;

use super::OfflineClient;
use crate::remote::api::QueueState;
use crate::sorting::{self, SortKey, SortOrder};
use crate::store::{BrowseFilter, PlaylistId, QueueSlot, QueueSnapshot, WriteDomain};

#[derive(Debug, Clone)]
pub struct QueueAddOutcome {
    pub added: u64,
    pub failed: u64,
    pub queue_length: u64,
    pub queued: bool,
}

#[derive(Debug, Clone)]
pub struct QueueRemoveOutcome {
    pub removed: u64,
    pub queue_length: u64,
    pub queued: bool,
}

#[derive(Debug, Clone)]
pub struct QueueSortOutcome {
    pub queue_length: u64,
    pub new_index: usize,
    pub queued: bool,
}

#[derive(Debug, Clone)]
pub struct SavedQueuePlaylist {
    pub playlist_id: PlaylistId,
    pub name: String,
    pub songs_added: u64,
    pub queued: bool,
}

// ── Pure snapshot mutations ──────────────────────────────────────────

pub(crate) fn apply_add(snap: &mut QueueSnapshot, uuids: &[String], position: Option<usize>) {
    match position {
        Some(pos) if pos <= snap.song_uuids.len() => {
            for (i, uuid) in uuids.iter().enumerate() {
                snap.song_uuids.insert(pos + i, uuid.clone());
            }
        }
        _ => snap.song_uuids.extend(uuids.iter().cloned()),
    }
}

/// Remove by position, highest first, so earlier-computed indices stay
/// valid. Returns how many were actually removed.
pub(crate) fn apply_remove(snap: &mut QueueSnapshot, positions: &[usize]) -> usize {
    let mut sorted: Vec<usize> = positions.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut removed = 0;
    for &pos in sorted.iter().rev() {
        if pos < snap.song_uuids.len() {
            snap.song_uuids.remove(pos);
            removed += 1;
        }
    }
    if snap.queue_index >= snap.song_uuids.len() {
        snap.queue_index = snap.song_uuids.len().saturating_sub(1);
    }
    removed
}

pub(crate) fn apply_reorder(snap: &mut QueueSnapshot, from_pos: usize, to_pos: usize) -> bool {
    let len = snap.song_uuids.len();
    if from_pos >= len || to_pos >= len {
        return false;
    }
    let uuid = snap.song_uuids.remove(from_pos);
    snap.song_uuids.insert(to_pos, uuid);
    true
}

/// Decompose a batch reorder into single moves that reproduce it when
/// replayed in order. The target index is adjusted for items removed
/// before it, so the moved block lands where the caller pointed in
/// pre-removal coordinates.
pub(crate) fn plan_reorder_batch(
    snap: &QueueSnapshot,
    from_positions: &[usize],
    to_position: usize,
) -> Vec<(usize, usize)> {
    let len = snap.song_uuids.len();
    let mut froms: Vec<usize> = from_positions
        .iter()
        .copied()
        .filter(|&p| p < len)
        .collect();
    froms.sort_unstable();
    froms.dedup();
    if froms.is_empty() {
        return Vec::new();
    }

    let removed_before = froms.iter().filter(|&&p| p < to_position).count();
    let target = to_position
        .saturating_sub(removed_before)
        .min(len - froms.len());

    // Work on identity indices so duplicate uuids can't confuse the
    // position lookups. Build the desired final order, then derive single
    // moves that converge on it when replayed left to right.
    let mut final_order: Vec<usize> = (0..len).filter(|i| !froms.contains(i)).collect();
    for (i, &from) in froms.iter().enumerate() {
        final_order.insert(target + i, from);
    }

    let mut order: Vec<usize> = (0..len).collect();
    let mut moves = Vec::new();
    for i in 0..len {
        if order[i] == final_order[i] {
            continue;
        }
        let j = order
            .iter()
            .position(|&x| x == final_order[i])
            .expect("permutation of the same indices");
        let id = order.remove(j);
        order.insert(i, id);
        moves.push((j, i));
    }
    moves
}

// ── Facade operations ────────────────────────────────────────────────

impl OfflineClient {
    fn load_slot(&self, slot: QueueSlot) -> Result<QueueSnapshot> {
        Ok(self.store.queue_load(slot)?.unwrap_or_default())
    }

    fn queue_view_offline(&self) -> Result<QueueState> {
        let snap = self.load_slot(self.queue_slot())?;
        let songs = self.songs_for(&snap.song_uuids)?;
        Ok(QueueState {
            songs,
            queue_index: snap.queue_index,
            play_mode: snap.play_mode.clone(),
            sca_enabled: snap.sca_enabled,
            volume: snap.volume,
            active_device_id: snap.device_id.clone(),
            active_device_seq: snap.device_seq,
            next_cursor: None,
            has_more: false,
        })
    }

    /// Current queue contents. Never fails for lack of cache: an empty
    /// default is a valid offline answer.
    pub async fn queue_list(&self) -> Result<QueueState> {
        if self.preview_active() || self.offline() {
            return self.queue_view_offline();
        }
        match self.remote.queue_list(None, None).await {
            Ok(state) => {
                self.mirror_queue_state(&state)?;
                Ok(state)
            }
            Err(e) if e.is_transport() => {
                self.note_transport_failure("queue_list", &e);
                self.queue_view_offline()
            }
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) fn mirror_queue_state(&self, state: &QueueState) -> Result<()> {
        self.store.song_put_many(&state.songs)?;
        let mut snap = self.load_slot(QueueSlot::Current)?;
        snap.song_uuids = state.songs.iter().map(|s| s.uuid.clone()).collect();
        snap.queue_index = state.queue_index;
        snap.play_mode = state.play_mode.clone();
        snap.sca_enabled = state.sca_enabled;
        snap.volume = state.volume;
        snap.last_synced_at = Some(Utc::now());
        self.store.queue_save(QueueSlot::Current, &snap)?;
        self.refresh_derived_state()?;
        Ok(())
    }

    pub async fn queue_add(
        &self,
        song_uuids: &[String],
        position: Option<usize>,
    ) -> Result<QueueAddOutcome> {
        if self.preview_active() || self.offline() {
            return self.queue_add_offline(song_uuids, position);
        }
        match self.remote.queue_add(song_uuids, position).await {
            Ok(res) => {
                let mut snap = self.load_slot(QueueSlot::Current)?;
                apply_add(&mut snap, song_uuids, position);
                self.store.queue_save(QueueSlot::Current, &snap)?;
                Ok(QueueAddOutcome {
                    added: res.added,
                    failed: 0,
                    queue_length: res.queue_length,
                    queued: false,
                })
            }
            Err(e) if e.is_transport() => {
                self.note_transport_failure("queue_add", &e);
                self.queue_add_offline(song_uuids, position)
            }
            Err(e) if song_uuids.len() > 1 => {
                // A bulk add can be rejected for one bad song; degrade to
                // one-by-one insertion so only the invalid items are
                // skipped.
                tracing::warn!(error = %e, "bulk queue add rejected, retrying per-song");
                self.queue_add_one_by_one(song_uuids, position).await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn queue_add_one_by_one(
        &self,
        song_uuids: &[String],
        position: Option<usize>,
    ) -> Result<QueueAddOutcome> {
        let mut added = Vec::new();
        let mut failed = 0u64;
        let mut queue_length = 0;
        for uuid in song_uuids {
            let pos = position.map(|p| p + added.len());
            match self.remote.queue_add(std::slice::from_ref(uuid), pos).await {
                Ok(res) => {
                    queue_length = res.queue_length;
                    added.push(uuid.clone());
                }
                Err(e) if e.is_transport() => {
                    // Connectivity died mid-batch; queue the remainder.
                    self.note_transport_failure("queue_add", &e);
                    let rest: Vec<String> = song_uuids
                        .iter()
                        .skip(added.len() + failed as usize)
                        .cloned()
                        .collect();
                    let mut outcome = self.queue_add_offline(&rest, None)?;
                    outcome.added += added.len() as u64;
                    outcome.failed += failed;
                    return Ok(outcome);
                }
                Err(e) => {
                    tracing::debug!(uuid = %uuid, error = %e, "song rejected by queue add");
                    failed += 1;
                }
            }
        }
        if !added.is_empty() {
            let mut snap = self.load_slot(QueueSlot::Current)?;
            apply_add(&mut snap, &added, position);
            self.store.queue_save(QueueSlot::Current, &snap)?;
        }
        Ok(QueueAddOutcome {
            added: added.len() as u64,
            failed,
            queue_length,
            queued: false,
        })
    }

    fn queue_add_offline(
        &self,
        song_uuids: &[String],
        position: Option<usize>,
    ) -> Result<QueueAddOutcome> {
        let slot = self.queue_slot();
        let mut snap = self.load_slot(slot)?;
        apply_add(&mut snap, song_uuids, position);
        self.store.queue_save(slot, &snap)?;

        let queued = !self.preview_active();
        if queued {
            self.enqueue_write(
                WriteDomain::Queue,
                "add",
                json!({ "songUuids": song_uuids, "position": position }),
            )?;
        }
        Ok(QueueAddOutcome {
            added: song_uuids.len() as u64,
            failed: 0,
            queue_length: snap.song_uuids.len() as u64,
            queued,
        })
    }

    pub async fn queue_remove(&self, positions: &[usize]) -> Result<QueueRemoveOutcome> {
        if self.preview_active() || self.offline() {
            return self.queue_remove_offline(positions);
        }
        match self.remote.queue_remove(positions).await {
            Ok(res) => {
                let mut snap = self.load_slot(QueueSlot::Current)?;
                apply_remove(&mut snap, positions);
                self.store.queue_save(QueueSlot::Current, &snap)?;
                Ok(QueueRemoveOutcome {
                    removed: res.removed,
                    queue_length: res.queue_length,
                    queued: false,
                })
            }
            Err(e) if e.is_transport() => {
                self.note_transport_failure("queue_remove", &e);
                self.queue_remove_offline(positions)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn queue_remove_offline(&self, positions: &[usize]) -> Result<QueueRemoveOutcome> {
        let slot = self.queue_slot();
        let mut snap = self.load_slot(slot)?;
        let removed = apply_remove(&mut snap, positions);
        self.store.queue_save(slot, &snap)?;

        let queued = !self.preview_active();
        if queued {
            self.enqueue_write(
                WriteDomain::Queue,
                "remove",
                json!({ "positions": positions }),
            )?;
        }
        Ok(QueueRemoveOutcome {
            removed: removed as u64,
            queue_length: snap.song_uuids.len() as u64,
            queued,
        })
    }

    pub async fn queue_clear(&self) -> Result<QueueRemoveOutcome> {
        if self.preview_active() || self.offline() {
            return self.queue_clear_offline();
        }
        match self.remote.queue_clear().await {
            Ok(cleared) => {
                let mut snap = self.load_slot(QueueSlot::Current)?;
                snap.song_uuids.clear();
                snap.queue_index = 0;
                self.store.queue_save(QueueSlot::Current, &snap)?;
                Ok(QueueRemoveOutcome {
                    removed: cleared,
                    queue_length: 0,
                    queued: false,
                })
            }
            Err(e) if e.is_transport() => {
                self.note_transport_failure("queue_clear", &e);
                self.queue_clear_offline()
            }
            Err(e) => Err(e.into()),
        }
    }

    fn queue_clear_offline(&self) -> Result<QueueRemoveOutcome> {
        let slot = self.queue_slot();
        let mut snap = self.load_slot(slot)?;
        let removed = snap.song_uuids.len() as u64;
        snap.song_uuids.clear();
        snap.queue_index = 0;
        self.store.queue_save(slot, &snap)?;

        let queued = !self.preview_active();
        if queued {
            self.enqueue_write(WriteDomain::Queue, "clear", json!({}))?;
        }
        Ok(QueueRemoveOutcome {
            removed,
            queue_length: 0,
            queued,
        })
    }

    pub async fn queue_reorder(&self, from_pos: usize, to_pos: usize) -> Result<bool> {
        if self.preview_active() || self.offline() {
            return self.queue_reorder_offline(from_pos, to_pos);
        }
        match self.remote.queue_reorder(from_pos, to_pos).await {
            Ok(()) => {
                let mut snap = self.load_slot(QueueSlot::Current)?;
                apply_reorder(&mut snap, from_pos, to_pos);
                self.store.queue_save(QueueSlot::Current, &snap)?;
                Ok(true)
            }
            Err(e) if e.is_transport() => {
                self.note_transport_failure("queue_reorder", &e);
                self.queue_reorder_offline(from_pos, to_pos)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn queue_reorder_offline(&self, from_pos: usize, to_pos: usize) -> Result<bool> {
        let slot = self.queue_slot();
        let mut snap = self.load_slot(slot)?;
        if !apply_reorder(&mut snap, from_pos, to_pos) {
            return Err(anyhow!("reorder positions out of range"));
        }
        self.store.queue_save(slot, &snap)?;
        if !self.preview_active() {
            self.enqueue_write(
                WriteDomain::Queue,
                "reorder",
                json!({ "fromPos": from_pos, "toPos": to_pos }),
            )?;
        }
        Ok(true)
    }

    pub async fn queue_reorder_batch(
        &self,
        from_positions: &[usize],
        to_position: usize,
    ) -> Result<()> {
        if self.preview_active() || self.offline() {
            return self.queue_reorder_batch_offline(from_positions, to_position);
        }
        match self
            .remote
            .queue_reorder_batch(from_positions, to_position)
            .await
        {
            Ok(()) => {
                let mut snap = self.load_slot(QueueSlot::Current)?;
                let moves = plan_reorder_batch(&snap, from_positions, to_position);
                for (from, to) in moves {
                    apply_reorder(&mut snap, from, to);
                }
                self.store.queue_save(QueueSlot::Current, &snap)?;
                Ok(())
            }
            Err(e) if e.is_transport() => {
                self.note_transport_failure("queue_reorder_batch", &e);
                self.queue_reorder_batch_offline(from_positions, to_position)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn queue_reorder_batch_offline(
        &self,
        from_positions: &[usize],
        to_position: usize,
    ) -> Result<()> {
        let slot = self.queue_slot();
        let mut snap = self.load_slot(slot)?;
        let moves = plan_reorder_batch(&snap, from_positions, to_position);
        for &(from, to) in &moves {
            apply_reorder(&mut snap, from, to);
        }
        self.store.queue_save(slot, &snap)?;
        if !self.preview_active() {
            for (from, to) in moves {
                self.enqueue_write(
                    WriteDomain::Queue,
                    "reorder",
                    json!({ "fromPos": from, "toPos": to }),
                )?;
            }
        }
        Ok(())
    }

    pub async fn queue_set_index(&self, index: usize) -> Result<bool> {
        if self.preview_active() || self.offline() {
            return self.queue_set_index_offline(index);
        }

        // Bump this device's sequence first so the marker survives even if
        // the call fails over to the offline path.
        let slot = QueueSlot::Current;
        let mut snap = self.load_slot(slot)?;
        snap.device_id = Some(self.device_id.clone());
        snap.device_seq += 1;
        let seq = snap.device_seq;

        match self
            .remote
            .queue_set_index(index, Some(&self.device_id), Some(seq))
            .await
        {
            Ok(accepted) => {
                snap.queue_index = index;
                self.store.queue_save(slot, &snap)?;
                Ok(accepted)
            }
            Err(e) if e.is_transport() => {
                self.note_transport_failure("queue_set_index", &e);
                self.queue_set_index_offline(index)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn queue_set_index_offline(&self, index: usize) -> Result<bool> {
        let slot = self.queue_slot();
        let mut snap = self.load_slot(slot)?;
        snap.queue_index = index;
        snap.device_id = Some(self.device_id.clone());
        snap.device_seq += 1;
        self.store.queue_save(slot, &snap)?;
        if !self.preview_active() {
            self.enqueue_write(WriteDomain::Queue, "setIndex", json!({ "index": index }))?;
        }
        Ok(true)
    }

    pub async fn queue_sort(&self, sort_by: SortKey, order: SortOrder) -> Result<QueueSortOutcome> {
        if self.preview_active() || self.offline() {
            return self.queue_sort_offline(sort_by, order);
        }
        match self.remote.queue_sort(sort_by, order).await {
            Ok(res) => {
                // Mirror the authoritative order; a failed mirror pull is
                // not an operation failure.
                if let Ok(state) = self.remote.queue_list(None, None).await {
                    self.mirror_queue_state(&state)?;
                }
                Ok(QueueSortOutcome {
                    queue_length: res.queue_length,
                    new_index: res.new_index,
                    queued: false,
                })
            }
            Err(e) if e.is_transport() => {
                self.note_transport_failure("queue_sort", &e);
                self.queue_sort_offline(sort_by, order)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn queue_sort_offline(&self, sort_by: SortKey, order: SortOrder) -> Result<QueueSortOutcome> {
        let slot = self.queue_slot();
        let mut snap = self.load_slot(slot)?;

        // Remember which occurrence of the playing song is current, so the
        // sorted queue keeps pointing at the same instance even with
        // duplicates.
        let current_uuid = snap.song_uuids.get(snap.queue_index).cloned();
        let occurrence = current_uuid.as_ref().map(|uuid| {
            snap.song_uuids[..=snap.queue_index]
                .iter()
                .filter(|u| *u == uuid)
                .count()
        });

        let mut songs = self.songs_for(&snap.song_uuids)?;
        sorting::sort_songs(&mut songs, sort_by, order);
        snap.song_uuids = songs.iter().map(|s| s.uuid.clone()).collect();

        if let (Some(uuid), Some(occurrence)) = (current_uuid, occurrence) {
            let mut seen = 0;
            let mut new_index = None;
            for (i, u) in snap.song_uuids.iter().enumerate() {
                if u == &uuid {
                    seen += 1;
                    if seen == occurrence {
                        new_index = Some(i);
                        break;
                    }
                }
            }
            snap.queue_index = new_index
                .or_else(|| snap.song_uuids.iter().rposition(|u| u == &uuid))
                .unwrap_or(0);
        }
        self.store.queue_save(slot, &snap)?;

        let queued = !self.preview_active();
        if queued {
            // The sorted order shown locally is what the remote replays:
            // same key, same order.
            self.enqueue_write(
                WriteDomain::Queue,
                "sort",
                json!({ "sortBy": sort_by.as_str(), "order": order.as_str() }),
            )?;
        }
        Ok(QueueSortOutcome {
            queue_length: snap.song_uuids.len() as u64,
            new_index: snap.queue_index,
            queued,
        })
    }

    pub async fn queue_add_by_playlist(
        &self,
        playlist_id: &PlaylistId,
        position: Option<usize>,
        shuffle: bool,
    ) -> Result<QueueAddOutcome> {
        if self.preview_active() || self.offline() {
            return self.queue_add_by_playlist_offline(playlist_id, position, shuffle);
        }
        match self
            .remote
            .queue_add_by_playlist(playlist_id, position, shuffle)
            .await
        {
            Ok(res) => {
                if let Ok(state) = self.remote.queue_list(None, None).await {
                    self.mirror_queue_state(&state)?;
                }
                Ok(QueueAddOutcome {
                    added: res.added,
                    failed: 0,
                    queue_length: res.queue_length,
                    queued: false,
                })
            }
            Err(e) if e.is_transport() => {
                self.note_transport_failure("queue_add_by_playlist", &e);
                self.queue_add_by_playlist_offline(playlist_id, position, shuffle)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn queue_add_by_playlist_offline(
        &self,
        playlist_id: &PlaylistId,
        position: Option<usize>,
        shuffle: bool,
    ) -> Result<QueueAddOutcome> {
        let mut uuids = self.resolve_playlist_songs_offline(playlist_id)?;
        if shuffle {
            uuids.shuffle(&mut rand::thread_rng());
        }
        self.queue_add_offline(&uuids, position)
    }

    /// Resolve a playlist to its song list from local data only.
    fn resolve_playlist_songs_offline(&self, playlist_id: &PlaylistId) -> Result<Vec<String>> {
        // Playlists created offline keep their full song list locally.
        if playlist_id.is_local() {
            if let Some(record) = self.store.playlist_get(playlist_id)? {
                return Ok(record.song_uuids);
            }
            return Err(anyhow!(
                "offline playlist {playlist_id} has no local record"
            ));
        }

        // The favorites pseudo-playlist is backed by the favorites set.
        if self.state.favorites_playlist_id().as_ref() == Some(playlist_id) {
            let mut favorites: Vec<String> = self.store.favorites()?.into_iter().collect();
            favorites.sort();
            return Ok(favorites);
        }

        // A fully-downloaded playlist has an authoritative local list.
        if let Some(record) = self.store.playlist_get(playlist_id)? {
            if record.complete || !record.song_uuids.is_empty() {
                return Ok(record.song_uuids);
            }
        }

        // Fall back to whatever song list was cached from past browsing.
        let cached: Option<Vec<String>> = self.store.setting_get(
            &crate::store::settings::playlist_songs_key(&playlist_id.as_key()),
        )?;
        if let Some(uuids) = cached {
            if !uuids.is_empty() {
                return Ok(uuids);
            }
        }

        Err(anyhow!(
            "playlist {playlist_id} is not available offline: no cached song list"
        ))
    }

    pub async fn queue_add_by_path(
        &self,
        path: &str,
        position: Option<usize>,
    ) -> Result<QueueAddOutcome> {
        if self.preview_active() || self.offline() {
            return self.queue_add_by_path_offline(path, position);
        }
        match self.remote.queue_add_by_path(path, position, None).await {
            Ok(res) => {
                if let Ok(state) = self.remote.queue_list(None, None).await {
                    self.mirror_queue_state(&state)?;
                }
                Ok(QueueAddOutcome {
                    added: res.added,
                    failed: 0,
                    queue_length: res.queue_length,
                    queued: false,
                })
            }
            Err(e) if e.is_transport() => {
                self.note_transport_failure("queue_add_by_path", &e);
                self.queue_add_by_path_offline(path, position)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn queue_add_by_path_offline(
        &self,
        path: &str,
        position: Option<usize>,
    ) -> Result<QueueAddOutcome> {
        let mut songs: Vec<_> = self
            .store
            .songs_all()?
            .into_iter()
            .filter(|s| s.file.as_deref().is_some_and(|f| f.starts_with(path)))
            .collect();
        songs.sort_by(|a, b| a.file.cmp(&b.file));
        let uuids: Vec<String> = songs.into_iter().map(|s| s.uuid).collect();
        self.queue_add_offline(&uuids, position)
    }

    pub async fn queue_add_by_filter(
        &self,
        filter: &BrowseFilter,
        position: Option<usize>,
    ) -> Result<QueueAddOutcome> {
        if self.preview_active() || self.offline() {
            return self.queue_add_by_filter_offline(filter, position);
        }
        match self.remote.queue_add_by_filter(filter, position, None).await {
            Ok(res) => {
                if let Ok(state) = self.remote.queue_list(None, None).await {
                    self.mirror_queue_state(&state)?;
                }
                Ok(QueueAddOutcome {
                    added: res.added,
                    failed: 0,
                    queue_length: res.queue_length,
                    queued: false,
                })
            }
            Err(e) if e.is_transport() => {
                self.note_transport_failure("queue_add_by_filter", &e);
                self.queue_add_by_filter_offline(filter, position)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn queue_add_by_filter_offline(
        &self,
        filter: &BrowseFilter,
        position: Option<usize>,
    ) -> Result<QueueAddOutcome> {
        let mut songs = super::browse::filter_songs(self.store.songs_all()?, filter);
        songs.sort_by(|a, b| {
            (a.artist.to_lowercase(), a.album.to_lowercase(), a.disc_number, a.track_number).cmp(&(
                b.artist.to_lowercase(),
                b.album.to_lowercase(),
                b.disc_number,
                b.track_number,
            ))
        });
        let uuids: Vec<String> = songs.into_iter().map(|s| s.uuid).collect();
        self.queue_add_offline(&uuids, position)
    }

    // ── Preview (temp) queue ─────────────────────────────────────────

    /// Enter preview mode: the given songs become a temporary queue whose
    /// mutations never reach the remote. The initial content is kept as a
    /// restore point.
    pub fn begin_preview_queue(&self, song_uuids: &[String]) -> Result<()> {
        let snap = QueueSnapshot {
            song_uuids: song_uuids.to_vec(),
            ..Default::default()
        };
        self.store.queue_save(QueueSlot::Temp, &snap)?;
        self.store.queue_save(QueueSlot::TempSaved, &snap)?;
        self.set_preview_active(true);
        Ok(())
    }

    /// Reset the preview queue to its saved restore point.
    pub fn restore_preview_queue(&self) -> Result<()> {
        if let Some(saved) = self.store.queue_load(QueueSlot::TempSaved)? {
            self.store.queue_save(QueueSlot::Temp, &saved)?;
        }
        Ok(())
    }

    /// Leave preview mode, dropping both temp snapshots.
    pub fn end_preview_queue(&self) -> Result<()> {
        self.set_preview_active(false);
        self.store.queue_clear_slot(QueueSlot::Temp)?;
        self.store.queue_clear_slot(QueueSlot::TempSaved)?;
        Ok(())
    }

    // ── Save queue as playlist ───────────────────────────────────────

    pub async fn queue_save_as_playlist(
        &self,
        name: &str,
        description: &str,
        is_public: bool,
    ) -> Result<SavedQueuePlaylist> {
        if name.trim().is_empty() {
            return Err(anyhow!("Playlist name is required"));
        }
        if self.offline() {
            return self.queue_save_as_playlist_offline(name, description, is_public);
        }
        match self
            .remote
            .queue_save_as_playlist(name.trim(), description, is_public)
            .await
        {
            Ok(saved) => {
                let id = PlaylistId::Remote(saved.playlist_id);
                self.mirror_new_playlist_summary(&id, &saved.name, saved.songs_added as u32)?;
                self.emit_playlists_changed();
                Ok(SavedQueuePlaylist {
                    playlist_id: id,
                    name: saved.name,
                    songs_added: saved.songs_added,
                    queued: false,
                })
            }
            Err(e) if e.is_transport() => {
                self.note_transport_failure("queue_save_as_playlist", &e);
                self.queue_save_as_playlist_offline(name, description, is_public)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn queue_save_as_playlist_offline(
        &self,
        name: &str,
        description: &str,
        is_public: bool,
    ) -> Result<SavedQueuePlaylist> {
        let snap = self.load_slot(self.queue_slot())?;

        // The server deduplicates queue songs when saving; match it.
        let mut seen = std::collections::HashSet::new();
        let song_uuids: Vec<String> = snap
            .song_uuids
            .iter()
            .filter(|u| seen.insert((*u).clone()))
            .cloned()
            .collect();

        let id = self.fresh_placeholder_id()?;
        self.insert_placeholder_playlist(&id, name.trim(), description, &song_uuids)?;

        self.enqueue_write(
            WriteDomain::Playlists,
            "createFromQueue",
            json!({
                "tempId": id.as_key(),
                "name": name.trim(),
                "description": description,
                "isPublic": is_public,
                "songUuids": song_uuids,
            }),
        )?;
        self.emit_playlists_changed();

        Ok(SavedQueuePlaylist {
            playlist_id: id,
            name: name.trim().to_string(),
            songs_added: song_uuids.len() as u64,
            queued: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facade::test_util::harness;
    use crate::error::RemoteError;
    use crate::store::SongRecord;
    use serde_json::json;

    fn uuids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn offline_add_caches_and_queues_one_write() {
        let h = harness(false);

        let outcome = h
            .client
            .queue_add(&uuids(&["uuid1", "uuid2"]), None)
            .await
            .unwrap();
        assert!(outcome.queued);
        assert_eq!(outcome.added, 2);

        let snap = h.store.queue_load(QueueSlot::Current).unwrap().unwrap();
        assert_eq!(snap.song_uuids, vec!["uuid1", "uuid2"]);

        let pending = h.store.pending_all().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].domain, WriteDomain::Queue);
        assert_eq!(pending[0].operation, "add");
        assert_eq!(h.state.pending_write_count(), 1);

        // Nothing touched the network.
        assert_eq!(h.transport.call_count(), 0);
    }

    #[tokio::test]
    async fn online_add_mirrors_into_cache() {
        let h = harness(true);
        h.transport
            .push_ok(json!({"success": true, "result": {"added": 1, "queueLength": 1}}));

        let outcome = h.client.queue_add(&uuids(&["u1"]), None).await.unwrap();
        assert!(!outcome.queued);
        assert_eq!(outcome.queue_length, 1);

        let snap = h.store.queue_load(QueueSlot::Current).unwrap().unwrap();
        assert_eq!(snap.song_uuids, vec!["u1"]);
        assert_eq!(h.store.pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn transport_failure_flips_offline_and_queues() {
        let h = harness(true);
        h.transport.set_unreachable(true);

        let outcome = h.client.queue_add(&uuids(&["u1"]), None).await.unwrap();
        assert!(outcome.queued);
        assert!(!h.state.is_online());
        assert_eq!(h.state.pending_write_count(), 1);
    }

    #[tokio::test]
    async fn business_error_propagates() {
        let h = harness(true);
        h.transport
            .push_err(RemoteError::Api("unknown song".to_string()));

        let err = h.client.queue_add(&uuids(&["u1"]), None).await.unwrap_err();
        assert!(err.to_string().contains("unknown song"));
        // Still online: business errors don't flip connectivity.
        assert!(h.state.is_online());
        assert_eq!(h.state.pending_write_count(), 0);
    }

    #[tokio::test]
    async fn bulk_add_degrades_to_per_song() {
        let h = harness(true);
        // Bulk call rejected, then per-song: ok, rejected, ok.
        h.transport
            .push_err(RemoteError::Api("invalid song in batch".to_string()));
        h.transport
            .push_ok(json!({"success": true, "result": {"added": 1, "queueLength": 1}}));
        h.transport
            .push_err(RemoteError::Api("unknown song".to_string()));
        h.transport
            .push_ok(json!({"success": true, "result": {"added": 1, "queueLength": 2}}));

        let outcome = h
            .client
            .queue_add(&uuids(&["a", "bad", "c"]), None)
            .await
            .unwrap();
        assert_eq!(outcome.added, 2);
        assert_eq!(outcome.failed, 1);
        assert!(!outcome.queued);

        let snap = h.store.queue_load(QueueSlot::Current).unwrap().unwrap();
        assert_eq!(snap.song_uuids, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn remove_processes_positions_highest_first() {
        let h = harness(false);
        h.client
            .queue_add(&uuids(&["s0", "s1", "s2", "s3", "s4"]), None)
            .await
            .unwrap();

        let outcome = h.client.queue_remove(&[0, 2, 4]).await.unwrap();
        assert_eq!(outcome.removed, 3);

        let snap = h.store.queue_load(QueueSlot::Current).unwrap().unwrap();
        assert_eq!(snap.song_uuids, vec!["s1", "s3"]);
    }

    #[tokio::test]
    async fn remove_out_of_range_positions_are_skipped() {
        let h = harness(false);
        h.client.queue_add(&uuids(&["a", "b"]), None).await.unwrap();

        let outcome = h.client.queue_remove(&[5, 1]).await.unwrap();
        assert_eq!(outcome.removed, 1);
        let snap = h.store.queue_load(QueueSlot::Current).unwrap().unwrap();
        assert_eq!(snap.song_uuids, vec!["a"]);
    }

    #[test]
    fn reorder_batch_plan_replays_to_the_same_order() {
        let cases: &[(&[usize], usize)] = &[
            (&[0, 1], 3),
            (&[3, 4], 0),
            (&[1, 3], 2),
            (&[0], 4),
            (&[4], 0),
            (&[0, 2, 4], 1),
        ];
        for &(froms, to) in cases {
            let snap = QueueSnapshot {
                song_uuids: (0..5).map(|i| format!("s{i}")).collect(),
                ..Default::default()
            };

            // Expected: remove the block, insert at the index-adjusted
            // target, relative order preserved.
            let mut rest: Vec<String> = snap
                .song_uuids
                .iter()
                .enumerate()
                .filter(|(i, _)| !froms.contains(i))
                .map(|(_, u)| u.clone())
                .collect();
            let adjusted = to
                .saturating_sub(froms.iter().filter(|&&p| p < to).count())
                .min(rest.len());
            for (i, &from) in froms.iter().enumerate() {
                rest.insert(adjusted + i, snap.song_uuids[from].clone());
            }

            // Replaying the planned single moves reproduces it.
            let mut replay = snap.clone();
            for (from, to) in plan_reorder_batch(&snap, froms, to) {
                assert!(apply_reorder(&mut replay, from, to));
            }
            assert_eq!(replay.song_uuids, rest, "froms={froms:?} to={to}");
        }
    }

    #[tokio::test]
    async fn reorder_batch_adjusts_target_for_removed_items() {
        let h = harness(false);
        h.client
            .queue_add(&uuids(&["a", "b", "c", "d", "e"]), None)
            .await
            .unwrap();

        // Move a and b to where the caller sees position 3 (before d).
        h.client.queue_reorder_batch(&[0, 1], 3).await.unwrap();

        let snap = h.store.queue_load(QueueSlot::Current).unwrap().unwrap();
        assert_eq!(snap.song_uuids, vec!["c", "a", "b", "d", "e"]);
    }

    #[tokio::test]
    async fn offline_list_is_total_without_cache() {
        let h = harness(false);
        let view = h.client.queue_list().await.unwrap();
        assert!(view.songs.is_empty());
        assert_eq!(view.queue_index, 0);
        assert_eq!(view.play_mode, "sequential");
    }

    #[tokio::test]
    async fn preview_mutations_skip_pending_writes() {
        let h = harness(false);
        h.client.queue_add(&uuids(&["real"]), None).await.unwrap();
        assert_eq!(h.state.pending_write_count(), 1);

        h.client.begin_preview_queue(&uuids(&["p1", "p2"])).unwrap();
        let outcome = h.client.queue_add(&uuids(&["p3"]), None).await.unwrap();
        assert!(!outcome.queued);
        h.client.queue_remove(&[0]).await.unwrap();

        // Pending queue untouched by preview activity.
        assert_eq!(h.state.pending_write_count(), 1);

        // Preview snapshot mutated; live queue untouched.
        let temp = h.store.queue_load(QueueSlot::Temp).unwrap().unwrap();
        assert_eq!(temp.song_uuids, vec!["p2", "p3"]);
        let current = h.store.queue_load(QueueSlot::Current).unwrap().unwrap();
        assert_eq!(current.song_uuids, vec!["real"]);

        h.client.restore_preview_queue().unwrap();
        let temp = h.store.queue_load(QueueSlot::Temp).unwrap().unwrap();
        assert_eq!(temp.song_uuids, vec!["p1", "p2"]);

        h.client.end_preview_queue().unwrap();
        assert!(h.store.queue_load(QueueSlot::Temp).unwrap().is_none());
        let view = h.client.queue_list().await.unwrap();
        assert_eq!(view.songs.len(), 1);
    }

    #[tokio::test]
    async fn offline_sort_orders_locally_and_queues_same_sort() {
        let h = harness(false);
        for (uuid, title) in [("u1", "Cherry"), ("u2", "apple"), ("u3", "Banana")] {
            let mut s = SongRecord::stub(uuid);
            s.title = title.to_string();
            h.store.song_put(&s).unwrap();
        }
        h.client
            .queue_add(&uuids(&["u1", "u2", "u3"]), None)
            .await
            .unwrap();

        let outcome = h
            .client
            .queue_sort(SortKey::Title, SortOrder::Asc)
            .await
            .unwrap();
        assert!(outcome.queued);

        let snap = h.store.queue_load(QueueSlot::Current).unwrap().unwrap();
        assert_eq!(snap.song_uuids, vec!["u2", "u3", "u1"]);

        let pending = h.store.pending_all().unwrap();
        let sort_write = pending.last().unwrap();
        assert_eq!(sort_write.operation, "sort");
        assert_eq!(sort_write.payload["sortBy"], "title");
        assert_eq!(sort_write.payload["order"], "asc");
    }

    #[tokio::test]
    async fn offline_sort_follows_current_song_with_duplicates() {
        let h = harness(false);
        for (uuid, title) in [("a", "Alpha"), ("z", "Zed")] {
            let mut s = SongRecord::stub(uuid);
            s.title = title.to_string();
            h.store.song_put(&s).unwrap();
        }
        // Queue: z, a, z, playing the second z (index 2).
        h.client
            .queue_add(&uuids(&["z", "a", "z"]), None)
            .await
            .unwrap();
        h.client.queue_set_index(2).await.unwrap();

        h.client
            .queue_sort(SortKey::Title, SortOrder::Asc)
            .await
            .unwrap();

        let snap = h.store.queue_load(QueueSlot::Current).unwrap().unwrap();
        assert_eq!(snap.song_uuids, vec!["a", "z", "z"]);
        // Second occurrence of z is now at index 2.
        assert_eq!(snap.queue_index, 2);
    }

    #[tokio::test]
    async fn set_index_bumps_device_seq() {
        let h = harness(false);
        h.client.queue_add(&uuids(&["a", "b"]), None).await.unwrap();

        h.client.queue_set_index(1).await.unwrap();
        let snap = h.store.queue_load(QueueSlot::Current).unwrap().unwrap();
        assert_eq!(snap.queue_index, 1);
        assert_eq!(snap.device_seq, 1);
        assert!(snap.device_id.is_some());

        h.client.queue_set_index(0).await.unwrap();
        let snap = h.store.queue_load(QueueSlot::Current).unwrap().unwrap();
        assert_eq!(snap.device_seq, 2);
    }

    #[tokio::test]
    async fn add_by_playlist_offline_uses_placeholder_record() {
        let h = harness(false);
        let created = h
            .client
            .playlists_create("Mix", "")
            .await
            .unwrap();
        h.client
            .playlists_add_songs_batch(&created.id, &uuids(&["x", "y"]))
            .await
            .unwrap();

        let outcome = h
            .client
            .queue_add_by_playlist(&created.id, None, false)
            .await
            .unwrap();
        assert_eq!(outcome.added, 2);

        let snap = h.store.queue_load(QueueSlot::Current).unwrap().unwrap();
        assert_eq!(snap.song_uuids, vec!["x", "y"]);
    }

    #[tokio::test]
    async fn add_by_playlist_offline_without_cache_fails_descriptively() {
        let h = harness(false);
        let err = h
            .client
            .queue_add_by_playlist(&PlaylistId::Remote(404), None, false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not available offline"));
    }

    #[tokio::test]
    async fn add_by_playlist_offline_uses_favorites_set() {
        let h = harness(false);
        h.store.favorite_add("f2").unwrap();
        h.store.favorite_add("f1").unwrap();
        h.state
            .set_favorites_playlist_id(Some(PlaylistId::Remote(5)));

        let outcome = h
            .client
            .queue_add_by_playlist(&PlaylistId::Remote(5), None, false)
            .await
            .unwrap();
        assert_eq!(outcome.added, 2);

        let snap = h.store.queue_load(QueueSlot::Current).unwrap().unwrap();
        assert_eq!(snap.song_uuids, vec!["f1", "f2"]);
    }

    #[tokio::test]
    async fn add_by_path_offline_scans_cached_metadata() {
        let h = harness(false);
        for (uuid, file) in [
            ("u1", "/lib/jazz/a.flac"),
            ("u2", "/lib/rock/b.flac"),
            ("u3", "/lib/jazz/c.flac"),
        ] {
            let mut s = SongRecord::stub(uuid);
            s.file = Some(file.to_string());
            h.store.song_put(&s).unwrap();
        }

        let outcome = h.client.queue_add_by_path("/lib/jazz", None).await.unwrap();
        assert_eq!(outcome.added, 2);
        let snap = h.store.queue_load(QueueSlot::Current).unwrap().unwrap();
        assert_eq!(snap.song_uuids, vec!["u1", "u3"]);
    }

    #[tokio::test]
    async fn save_queue_as_playlist_offline_dedupes_and_queues_split_write() {
        let h = harness(false);
        h.client
            .queue_add(&uuids(&["a", "b", "a", "c"]), None)
            .await
            .unwrap();

        let saved = h
            .client
            .queue_save_as_playlist("Road Trip", "", false)
            .await
            .unwrap();
        assert!(saved.queued);
        assert!(saved.playlist_id.is_local());
        assert_eq!(saved.songs_added, 3);

        let record = h.store.playlist_get(&saved.playlist_id).unwrap().unwrap();
        assert_eq!(record.song_uuids, vec!["a", "b", "c"]);

        let pending = h.store.pending_all().unwrap();
        let write = pending.last().unwrap();
        assert_eq!(write.operation, "createFromQueue");
        assert_eq!(write.payload["tempId"], saved.playlist_id.as_key());
        assert_eq!(write.payload["songUuids"], json!(["a", "b", "c"]));
    }
}
