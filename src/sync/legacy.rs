//! Per-write sync mode.
//!
//! For servers without session/commit support: each pending write is
//! dispatched through its direct RPC method and applied immediately.
//! A failed write only retries itself (its counter is incremented and it
//! stays queued); successes are deleted as they land. Overall success
//! requires zero failures.

use anyhow::{anyhow, Result};
use chrono::Utc;
use serde_json::Value;

use super::{SyncManager, SyncOutcome};
use crate::events::ChangeEvent;
use crate::store::{PendingWrite, PlaylistId, Preferences, WriteDomain};

fn str_field(payload: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| payload.get(k))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn str_list(payload: &Value, keys: &[&str]) -> Vec<String> {
    keys.iter()
        .find_map(|k| payload.get(k))
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn usize_field(payload: &Value, keys: &[&str]) -> Option<usize> {
    keys.iter()
        .find_map(|k| payload.get(k))
        .and_then(Value::as_u64)
        .map(|n| n as usize)
}

fn usize_list(payload: &Value, keys: &[&str]) -> Vec<usize> {
    keys.iter()
        .find_map(|k| payload.get(k))
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(|v| v.as_u64().map(|n| n as usize))
                .collect()
        })
        .unwrap_or_default()
}

fn playlist_id_field(payload: &Value, keys: &[&str]) -> Result<PlaylistId> {
    let raw = keys
        .iter()
        .find_map(|k| payload.get(k))
        .ok_or_else(|| anyhow!("write payload is missing its playlist id"))?;
    Ok(serde_json::from_value(raw.clone())?)
}

impl SyncManager {
    pub(crate) async fn run_per_write(&self) -> SyncOutcome {
        let writes = match self.store.pending_all() {
            Ok(writes) => writes,
            Err(e) => return self.record_failure(&format!("cannot read pending writes: {e}")),
        };
        if writes.is_empty() {
            return SyncOutcome::NothingToSync;
        }

        let mut executed = 0u64;
        let mut errors: Vec<String> = Vec::new();

        for write in &writes {
            match self.apply_write_direct(write).await {
                Ok(()) => {
                    if let Err(e) = self.store.pending_delete_batch(&[write.id]) {
                        errors.push(format!("write {} applied but not cleared: {e}", write.id));
                        continue;
                    }
                    executed += 1;
                }
                Err(e) => {
                    tracing::warn!(id = write.id, error = %e, "per-write sync failed");
                    if let Err(bump_err) = self.store.pending_bump_retries(&[write.id]) {
                        tracing::warn!(error = %bump_err, "failed to bump retry counter");
                    }
                    errors.push(format!(
                        "{}.{}: {e}",
                        write.domain.as_str(),
                        write.operation
                    ));
                }
            }
        }

        let count = self.store.pending_count().unwrap_or(0);
        self.state.set_pending_write_count(count);

        if !errors.is_empty() {
            return self.record_failure(&errors.join("; "));
        }

        let now = Utc::now();
        if let Err(e) = self.store.set_last_sync_at(now) {
            tracing::warn!(error = %e, "failed to persist last sync time");
        }
        self.state.record_sync_success(now);
        self.events.emit(ChangeEvent::PlaylistsChanged);
        if let Err(e) = self.pull_remote_state().await {
            tracing::warn!(error = %e, "post-sync state pull failed");
        }
        SyncOutcome::Success { executed }
    }

    async fn apply_write_direct(&self, write: &PendingWrite) -> Result<()> {
        let p = &write.payload;
        match (write.domain, write.operation.as_str()) {
            (WriteDomain::Queue, "add") => {
                let uuids = str_list(p, &["songUuids", "song_uuids"]);
                let position = usize_field(p, &["position"]);
                self.remote.queue_add(&uuids, position).await?;
            }
            (WriteDomain::Queue, "remove") => {
                let positions = usize_list(p, &["positions"]);
                self.remote.queue_remove(&positions).await?;
            }
            (WriteDomain::Queue, "clear") => {
                self.remote.queue_clear().await?;
            }
            (WriteDomain::Queue, "setIndex") => {
                let index = usize_field(p, &["index", "queueIndex"]).unwrap_or(0);
                self.remote.queue_set_index(index, None, None).await?;
            }
            (WriteDomain::Queue, "reorder") => {
                let from = usize_field(p, &["fromPos", "from_pos"])
                    .ok_or_else(|| anyhow!("reorder write is missing fromPos"))?;
                let to = usize_field(p, &["toPos", "to_pos"])
                    .ok_or_else(|| anyhow!("reorder write is missing toPos"))?;
                self.remote.queue_reorder(from, to).await?;
            }
            (WriteDomain::Queue, "sort") => {
                let key = str_field(p, &["sortBy", "sort_by"])
                    .unwrap_or_else(|| "artist".to_string())
                    .parse()?;
                let order = str_field(p, &["order"])
                    .unwrap_or_else(|| "asc".to_string())
                    .parse()?;
                self.remote.queue_sort(key, order).await?;
            }
            (WriteDomain::Playlists, "create") => {
                let name = str_field(p, &["name"]).unwrap_or_default();
                let description = str_field(p, &["description"]).unwrap_or_default();
                let created = self.remote.playlists_create(&name, &description, false).await?;
                self.resolve_placeholder_now(p, created.id)?;
            }
            (WriteDomain::Playlists, "createFromQueue") => {
                let name = str_field(p, &["name"]).unwrap_or_default();
                let description = str_field(p, &["description"]).unwrap_or_default();
                let created = self.remote.playlists_create(&name, &description, false).await?;
                self.resolve_placeholder_now(p, created.id)?;
                let songs = str_list(p, &["songUuids", "song_uuids"]);
                if !songs.is_empty() {
                    self.remote
                        .playlists_add_songs(&PlaylistId::Remote(created.id), &songs)
                        .await?;
                }
            }
            (WriteDomain::Playlists, "delete") => {
                let id = self.require_remote_id(p)?;
                self.remote.playlists_delete(&id).await?;
            }
            (WriteDomain::Playlists, "addSong") => {
                let id = self.require_remote_id(p)?;
                let uuid = str_field(p, &["songUuid", "song_uuid"])
                    .ok_or_else(|| anyhow!("addSong write is missing songUuid"))?;
                self.remote.playlists_add_song(&id, &uuid).await?;
            }
            (WriteDomain::Playlists, "addSongsBatch") => {
                let id = self.require_remote_id(p)?;
                let uuids = str_list(p, &["songUuids", "song_uuids"]);
                self.remote.playlists_add_songs(&id, &uuids).await?;
            }
            (WriteDomain::Playlists, "removeSong") => {
                let id = self.require_remote_id(p)?;
                let uuid = str_field(p, &["songUuid", "song_uuid"])
                    .ok_or_else(|| anyhow!("removeSong write is missing songUuid"))?;
                self.remote.playlists_remove_song(&id, &uuid).await?;
            }
            (WriteDomain::Playlists, "removeSongs") => {
                let id = self.require_remote_id(p)?;
                let uuids = str_list(p, &["songUuids", "song_uuids"]);
                self.remote.playlists_remove_songs(&id, &uuids).await?;
            }
            (WriteDomain::Playlists, "reorder") => {
                let id = self.require_remote_id(p)?;
                let positions: Vec<(String, usize)> = p
                    .get("positions")
                    .and_then(Value::as_array)
                    .map(|a| {
                        a.iter()
                            .filter_map(|v| {
                                Some((
                                    v.get("uuid")?.as_str()?.to_string(),
                                    v.get("position")?.as_u64()? as usize,
                                ))
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                self.remote.playlists_reorder(&id, &positions).await?;
            }
            (WriteDomain::Playlists, "sort") => {
                let id = self.require_remote_id(p)?;
                let key = str_field(p, &["sortBy", "sort_by"])
                    .unwrap_or_else(|| "artist".to_string())
                    .parse()?;
                let order = str_field(p, &["order"])
                    .unwrap_or_else(|| "asc".to_string())
                    .parse()?;
                self.remote.playlists_sort(&id, key, order).await?;
            }
            (WriteDomain::Preferences, "set") => {
                let prefs: Preferences = serde_json::from_value(p.clone())?;
                self.remote.preferences_set(&prefs).await?;
            }
            (WriteDomain::EqPresets, "save") => {
                let preset = serde_json::from_value(p.clone())?;
                self.remote.eq_presets_save(&preset).await?;
            }
            (WriteDomain::EqPresets, "delete") => {
                let uuid = str_field(p, &["uuid"])
                    .ok_or_else(|| anyhow!("preset delete write is missing uuid"))?;
                self.remote.eq_presets_delete(&uuid).await?;
            }
            (WriteDomain::Playback, "setState") => {
                let index = usize_field(p, &["queueIndex", "queue_index"]);
                let sca = p
                    .get("scaEnabled")
                    .or_else(|| p.get("sca_enabled"))
                    .and_then(Value::as_bool);
                let mode = str_field(p, &["playMode", "play_mode"]);
                let volume = p.get("volume").and_then(Value::as_f64);
                self.remote
                    .playback_set_state(index, sca, mode.as_deref(), volume)
                    .await?;
            }
            (WriteDomain::History, "record") => {
                let uuid = str_field(p, &["songUuid", "song_uuid"])
                    .ok_or_else(|| anyhow!("history write is missing songUuid"))?;
                let duration = p
                    .get("durationSeconds")
                    .or_else(|| p.get("duration_seconds"))
                    .and_then(Value::as_u64)
                    .unwrap_or(0) as u32;
                let skipped = p.get("skipped").and_then(Value::as_bool).unwrap_or(false);
                let source = str_field(p, &["source"]);
                self.remote
                    .history_record(&uuid, duration, skipped, source.as_deref())
                    .await?;
            }
            (domain, op) => {
                return Err(anyhow!(
                    "unknown pending write operation {}.{op}",
                    domain.as_str()
                ))
            }
        }
        Ok(())
    }

    /// A mutation addressed to a playlist must reference a server id by the
    /// time it is applied; placeholders are rewritten as their creates
    /// land, so one still present means its create hasn't succeeded yet.
    fn require_remote_id(&self, payload: &Value) -> Result<PlaylistId> {
        match playlist_id_field(payload, &["playlistId", "playlist_id"])? {
            PlaylistId::Local(token) => Err(anyhow!(
                "playlist pending-{token} has not been created on the server yet"
            )),
            id => Ok(id),
        }
    }

    fn resolve_placeholder_now(&self, payload: &Value, server_id: i64) -> Result<()> {
        if let Some(temp) = str_field(payload, &["tempId", "temp_id"]) {
            if let Ok(PlaylistId::Local(token)) = temp.parse::<PlaylistId>() {
                self.store.playlist_resolve_placeholder(token, server_id)?;
                self.store
                    .pending_resolve_playlist_refs(&temp, server_id)?;
            }
        }
        Ok(())
    }
}
