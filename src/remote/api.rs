//! Typed adapter over the RPC transport.
//!
//! The remote is loose about shapes: some operations return bare arrays,
//! some `{items: [...]}`, some `{playlists: [...]}`; field names come in
//! both camelCase and snake_case. All of that is normalized here, at the
//! boundary, into one canonical struct per operation. Nothing downstream
//! branches on response shape.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Map, Value};

use crate::error::RemoteError;
use crate::sorting::{SortKey, SortOrder};
use crate::store::{
    AuthSnapshot, BrowseFilter, EqPreset, PlaylistId, PlaylistSummary, Preferences, SongRecord,
};

use super::RemoteTransport;

#[derive(Clone)]
pub struct RemoteApi {
    transport: Arc<dyn RemoteTransport>,
}

/// One page of a cursor-batched listing.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

/// Authoritative queue state as reported by the remote.
#[derive(Debug, Clone)]
pub struct QueueState {
    pub songs: Vec<SongRecord>,
    pub queue_index: usize,
    pub play_mode: String,
    pub sca_enabled: bool,
    pub volume: f64,
    pub active_device_id: Option<String>,
    pub active_device_seq: u64,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

#[derive(Debug, Clone, Default)]
pub struct AddResult {
    pub added: u64,
    pub queue_length: u64,
}

#[derive(Debug, Clone, Default)]
pub struct RemoveResult {
    pub removed: u64,
    pub queue_length: u64,
}

#[derive(Debug, Clone)]
pub struct SortResult {
    pub queue_length: u64,
    pub new_index: usize,
}

#[derive(Debug, Clone)]
pub struct CreatedPlaylist {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct SavedPlaylist {
    pub playlist_id: i64,
    pub name: String,
    pub songs_added: u64,
}

#[derive(Debug, Clone)]
pub struct PlaybackState {
    pub queue_index: usize,
    pub sca_enabled: bool,
    pub play_mode: String,
    pub volume: f64,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            queue_index: 0,
            sca_enabled: false,
            play_mode: "sequential".to_string(),
            volume: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RemotePreferences {
    pub prefs: Preferences,
    /// Server-side modification time; `None` when the remote omits it.
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct BrowseBucket {
    pub name: String,
    pub song_count: u64,
}

/// Directory listing under a library path.
#[derive(Debug, Clone, Default)]
pub struct PathListing {
    pub dirs: Vec<String>,
    pub songs: Vec<SongRecord>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

/// Acknowledgement of a pushed sync operation. Servers that resolve
/// placeholder ids eagerly return the created id here; servers that resolve
/// at commit time leave it empty.
#[derive(Debug, Clone, Default)]
pub struct PushAck {
    pub created_id: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct CommitResult {
    pub executed: u64,
    pub skipped: u64,
    pub failed_op: Option<String>,
    /// Placeholder token → server-assigned playlist id.
    pub created: HashMap<String, i64>,
}

#[derive(Debug, Clone, Default)]
pub struct SyncStatus {
    pub pending_count: u64,
    pub max_seq: u64,
}

// ── Value probing helpers ────────────────────────────────────────────

fn pick<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| value.get(k)).filter(|v| !v.is_null())
}

fn str_of(value: &Value, keys: &[&str]) -> Option<String> {
    pick(value, keys).and_then(Value::as_str).map(str::to_string)
}

fn u64_of(value: &Value, keys: &[&str]) -> Option<u64> {
    pick(value, keys).and_then(Value::as_u64)
}

fn i64_of(value: &Value, keys: &[&str]) -> Option<i64> {
    pick(value, keys).and_then(|v| {
        v.as_i64()
            .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
    })
}

fn f64_of(value: &Value, keys: &[&str]) -> Option<f64> {
    pick(value, keys).and_then(Value::as_f64)
}

fn bool_of(value: &Value, keys: &[&str]) -> Option<bool> {
    pick(value, keys).and_then(|v| match v {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        _ => None,
    })
}

/// Accept a bare array or an object wrapping the list under any of `keys`.
fn items_of(value: &Value, keys: &[&str]) -> Vec<Value> {
    if let Some(array) = value.as_array() {
        return array.clone();
    }
    for key in keys {
        if let Some(array) = value.get(key).and_then(Value::as_array) {
            return array.clone();
        }
    }
    Vec::new()
}

fn song_from_value(value: &Value) -> SongRecord {
    let uuid = str_of(value, &["uuid", "songUuid", "song_uuid", "id"]).unwrap_or_default();
    let mut song = SongRecord::stub(&uuid);
    if let Some(title) = str_of(value, &["title"]) {
        song.title = title;
    }
    song.artist = str_of(value, &["artist"]).unwrap_or_default();
    song.album = str_of(value, &["album"]).unwrap_or_default();
    song.album_artist = str_of(value, &["album_artist", "albumArtist"]);
    song.genre = str_of(value, &["genre"]);
    song.category = str_of(value, &["category", "type"]);
    song.track_number = u64_of(value, &["track_number", "trackNumber"]).map(|n| n as u32);
    song.disc_number = u64_of(value, &["disc_number", "discNumber"]).map(|n| n as u32);
    song.year = i64_of(value, &["year"]).map(|n| n as i32);
    song.duration_seconds =
        f64_of(value, &["duration_seconds", "durationSeconds"]).unwrap_or(0.0) as u32;
    song.file = str_of(value, &["file", "path"]);
    song.replay_gain_track = f64_of(value, &["replay_gain_track", "replayGainTrack"]);
    song.replay_gain_album = f64_of(value, &["replay_gain_album", "replayGainAlbum"]);
    song
}

fn playlist_summary_from_value(value: &Value) -> Option<PlaylistSummary> {
    let id: PlaylistId = serde_json::from_value(pick(value, &["id", "playlist_id", "playlistId"])?.clone()).ok()?;
    Some(PlaylistSummary {
        id,
        name: str_of(value, &["name", "title"]).unwrap_or_default(),
        description: str_of(value, &["description"]).unwrap_or_default(),
        song_count: u64_of(value, &["song_count", "songCount", "num_songs"]).unwrap_or(0) as u32,
        is_public: bool_of(value, &["is_public", "isPublic"]).unwrap_or(false),
        pending: false,
    })
}

fn bucket_from_value(value: &Value) -> Option<BrowseBucket> {
    match value {
        Value::String(name) => Some(BrowseBucket {
            name: name.clone(),
            song_count: 0,
        }),
        Value::Object(_) => Some(BrowseBucket {
            name: str_of(value, &["name", "artist", "album", "genre", "category"])?,
            song_count: u64_of(value, &["song_count", "songCount", "count"]).unwrap_or(0),
        }),
        _ => None,
    }
}

fn timestamp_of(value: &Value, keys: &[&str]) -> Option<DateTime<Utc>> {
    let raw = pick(value, keys)?;
    if let Some(s) = raw.as_str() {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    raw.as_f64()
        .and_then(|secs| Utc.timestamp_opt(secs as i64, 0).single())
}

fn cursor_fields(value: &Value) -> (Option<String>, bool) {
    let next = str_of(value, &["nextCursor", "next_cursor"]);
    let has_more = bool_of(value, &["hasMore", "has_more"]).unwrap_or(next.is_some());
    (next, has_more)
}

fn prune_nulls(mut kwargs: Map<String, Value>) -> Value {
    kwargs.retain(|_, v| !v.is_null());
    Value::Object(kwargs)
}

// ── Typed operations ─────────────────────────────────────────────────

impl RemoteApi {
    pub fn new(transport: Arc<dyn RemoteTransport>) -> Self {
        Self { transport }
    }

    async fn call(&self, method: &str, kwargs: Value) -> Result<Value, RemoteError> {
        self.transport.call(method, kwargs).await
    }

    // ── Queue ────────────────────────────────────────────────────────

    pub async fn queue_list(
        &self,
        cursor: Option<&str>,
        limit: Option<u64>,
    ) -> Result<QueueState, RemoteError> {
        let result = self
            .call(
                "queue_list",
                json!({ "cursor": cursor, "limit": limit }),
            )
            .await?;
        let songs = items_of(&result, &["items", "songs"])
            .iter()
            .map(song_from_value)
            .collect();
        let (next_cursor, has_more) = cursor_fields(&result);
        Ok(QueueState {
            songs,
            queue_index: u64_of(&result, &["queueIndex", "queue_index"]).unwrap_or(0) as usize,
            play_mode: str_of(&result, &["playMode", "play_mode"])
                .unwrap_or_else(|| "sequential".to_string()),
            sca_enabled: bool_of(&result, &["scaEnabled", "sca_enabled"]).unwrap_or(false),
            volume: f64_of(&result, &["volume"]).unwrap_or(1.0),
            active_device_id: str_of(&result, &["activeDeviceId", "active_device_id"]),
            active_device_seq: u64_of(&result, &["activeDeviceSeq", "active_device_seq"])
                .unwrap_or(0),
            next_cursor,
            has_more,
        })
    }

    pub async fn queue_add(
        &self,
        song_uuids: &[String],
        position: Option<usize>,
    ) -> Result<AddResult, RemoteError> {
        let result = self
            .call(
                "queue_add",
                json!({ "song_uuids": song_uuids, "position": position }),
            )
            .await?;
        Ok(AddResult {
            added: u64_of(&result, &["added"]).unwrap_or(0),
            queue_length: u64_of(&result, &["queueLength", "queue_length"]).unwrap_or(0),
        })
    }

    pub async fn queue_add_by_path(
        &self,
        path: &str,
        position: Option<usize>,
        limit: Option<u64>,
    ) -> Result<AddResult, RemoteError> {
        let result = self
            .call(
                "queue_add_by_path",
                json!({ "path": path, "position": position, "limit": limit }),
            )
            .await?;
        Ok(AddResult {
            added: u64_of(&result, &["added"]).unwrap_or(0),
            queue_length: u64_of(&result, &["queueLength", "queue_length"]).unwrap_or(0),
        })
    }

    pub async fn queue_add_by_filter(
        &self,
        filter: &BrowseFilter,
        position: Option<usize>,
        limit: Option<u64>,
    ) -> Result<AddResult, RemoteError> {
        let result = self
            .call(
                "queue_add_by_filter",
                json!({
                    "category": filter.category,
                    "genre": filter.genre,
                    "artist": filter.artist,
                    "album": filter.album,
                    "position": position,
                    "limit": limit,
                }),
            )
            .await?;
        Ok(AddResult {
            added: u64_of(&result, &["added"]).unwrap_or(0),
            queue_length: u64_of(&result, &["queueLength", "queue_length"]).unwrap_or(0),
        })
    }

    pub async fn queue_add_by_playlist(
        &self,
        playlist_id: &PlaylistId,
        position: Option<usize>,
        shuffle: bool,
    ) -> Result<AddResult, RemoteError> {
        let result = self
            .call(
                "queue_add_by_playlist",
                json!({ "playlist_id": playlist_id, "position": position, "shuffle": shuffle }),
            )
            .await?;
        Ok(AddResult {
            added: u64_of(&result, &["added"]).unwrap_or(0),
            queue_length: u64_of(&result, &["queueLength", "queue_length"]).unwrap_or(0),
        })
    }

    pub async fn queue_remove(&self, positions: &[usize]) -> Result<RemoveResult, RemoteError> {
        let result = self
            .call("queue_remove", json!({ "positions": positions }))
            .await?;
        Ok(RemoveResult {
            removed: u64_of(&result, &["removed"]).unwrap_or(0),
            queue_length: u64_of(&result, &["queueLength", "queue_length"]).unwrap_or(0),
        })
    }

    pub async fn queue_clear(&self) -> Result<u64, RemoteError> {
        let result = self.call("queue_clear", json!({})).await?;
        Ok(u64_of(&result, &["cleared"]).unwrap_or(0))
    }

    pub async fn queue_reorder(&self, from_pos: usize, to_pos: usize) -> Result<(), RemoteError> {
        self.call(
            "queue_reorder",
            json!({ "from_pos": from_pos, "to_pos": to_pos }),
        )
        .await?;
        Ok(())
    }

    pub async fn queue_reorder_batch(
        &self,
        from_positions: &[usize],
        to_position: usize,
    ) -> Result<(), RemoteError> {
        self.call(
            "queue_reorder_batch",
            json!({ "from_positions": from_positions, "to_position": to_position }),
        )
        .await?;
        Ok(())
    }

    /// Returns true when the server accepted the index (not a stale seq).
    pub async fn queue_set_index(
        &self,
        index: usize,
        device_id: Option<&str>,
        seq: Option<u64>,
    ) -> Result<bool, RemoteError> {
        let result = self
            .call(
                "queue_set_index",
                json!({ "index": index, "device_id": device_id, "seq": seq }),
            )
            .await?;
        Ok(!bool_of(&result, &["skipped"]).unwrap_or(false))
    }

    pub async fn queue_sort(
        &self,
        sort_by: SortKey,
        order: SortOrder,
    ) -> Result<SortResult, RemoteError> {
        let result = self
            .call(
                "queue_sort",
                json!({ "sort_by": sort_by.as_str(), "order": order.as_str() }),
            )
            .await?;
        Ok(SortResult {
            queue_length: u64_of(&result, &["queueLength", "queue_length"]).unwrap_or(0),
            new_index: u64_of(&result, &["newIndex", "new_index"]).unwrap_or(0) as usize,
        })
    }

    pub async fn queue_save_as_playlist(
        &self,
        name: &str,
        description: &str,
        is_public: bool,
    ) -> Result<SavedPlaylist, RemoteError> {
        let result = self
            .call(
                "queue_save_as_playlist",
                json!({ "name": name, "description": description, "is_public": is_public }),
            )
            .await?;
        let id = i64_of(&result, &["playlist_id", "playlistId", "id"]).ok_or_else(|| {
            RemoteError::Malformed("queue_save_as_playlist returned no playlist id".to_string())
        })?;
        Ok(SavedPlaylist {
            playlist_id: id,
            name: str_of(&result, &["name"]).unwrap_or_else(|| name.to_string()),
            songs_added: u64_of(&result, &["songs_added", "songsAdded"]).unwrap_or(0),
        })
    }

    // ── Playlists ────────────────────────────────────────────────────

    pub async fn playlists_list(&self) -> Result<Vec<PlaylistSummary>, RemoteError> {
        let result = self.call("playlists_list", json!({})).await?;
        Ok(items_of(&result, &["playlists", "items"])
            .iter()
            .filter_map(playlist_summary_from_value)
            .collect())
    }

    pub async fn playlists_get_songs(
        &self,
        playlist_id: &PlaylistId,
        cursor: Option<&str>,
        limit: Option<u64>,
    ) -> Result<Page<SongRecord>, RemoteError> {
        let result = self
            .call(
                "playlists_get_songs",
                json!({ "playlist_id": playlist_id, "cursor": cursor, "limit": limit }),
            )
            .await?;
        let (next_cursor, has_more) = cursor_fields(&result);
        Ok(Page {
            items: items_of(&result, &["items", "songs"])
                .iter()
                .map(song_from_value)
                .collect(),
            next_cursor,
            has_more,
        })
    }

    pub async fn playlists_create(
        &self,
        name: &str,
        description: &str,
        is_public: bool,
    ) -> Result<CreatedPlaylist, RemoteError> {
        let result = self
            .call(
                "playlists_create",
                json!({ "name": name, "description": description, "is_public": is_public }),
            )
            .await?;
        let id = i64_of(&result, &["id", "playlist_id", "playlistId"]).ok_or_else(|| {
            RemoteError::Malformed("playlists_create returned no id".to_string())
        })?;
        Ok(CreatedPlaylist {
            id,
            name: str_of(&result, &["name"]).unwrap_or_else(|| name.to_string()),
        })
    }

    pub async fn playlists_delete(&self, playlist_id: &PlaylistId) -> Result<(), RemoteError> {
        self.call("playlists_delete", json!({ "playlist_id": playlist_id }))
            .await?;
        Ok(())
    }

    pub async fn playlists_add_song(
        &self,
        playlist_id: &PlaylistId,
        song_uuid: &str,
    ) -> Result<(), RemoteError> {
        self.call(
            "playlists_add_song",
            json!({ "playlist_id": playlist_id, "song_uuid": song_uuid }),
        )
        .await?;
        Ok(())
    }

    pub async fn playlists_add_songs(
        &self,
        playlist_id: &PlaylistId,
        song_uuids: &[String],
    ) -> Result<u64, RemoteError> {
        let result = self
            .call(
                "playlists_add_songs",
                json!({ "playlist_id": playlist_id, "song_uuids": song_uuids }),
            )
            .await?;
        Ok(u64_of(&result, &["added", "songs_added", "songsAdded"])
            .unwrap_or(song_uuids.len() as u64))
    }

    pub async fn playlists_remove_song(
        &self,
        playlist_id: &PlaylistId,
        song_uuid: &str,
    ) -> Result<(), RemoteError> {
        self.call(
            "playlists_remove_song",
            json!({ "playlist_id": playlist_id, "song_uuid": song_uuid }),
        )
        .await?;
        Ok(())
    }

    pub async fn playlists_remove_songs(
        &self,
        playlist_id: &PlaylistId,
        song_uuids: &[String],
    ) -> Result<(), RemoteError> {
        self.call(
            "playlists_remove_songs",
            json!({ "playlist_id": playlist_id, "song_uuids": song_uuids }),
        )
        .await?;
        Ok(())
    }

    /// `positions` pairs each song uuid with its new position.
    pub async fn playlists_reorder(
        &self,
        playlist_id: &PlaylistId,
        positions: &[(String, usize)],
    ) -> Result<(), RemoteError> {
        let wire: Vec<Value> = positions
            .iter()
            .map(|(uuid, pos)| json!({ "uuid": uuid, "position": pos }))
            .collect();
        self.call(
            "playlists_reorder",
            json!({ "playlist_id": playlist_id, "positions": wire }),
        )
        .await?;
        Ok(())
    }

    pub async fn playlists_sort(
        &self,
        playlist_id: &PlaylistId,
        sort_by: SortKey,
        order: SortOrder,
    ) -> Result<(), RemoteError> {
        self.call(
            "playlists_sort",
            json!({
                "playlist_id": playlist_id,
                "sort_by": sort_by.as_str(),
                "order": order.as_str(),
            }),
        )
        .await?;
        Ok(())
    }

    // ── Browse ───────────────────────────────────────────────────────

    pub async fn browse_categories(&self) -> Result<Vec<BrowseBucket>, RemoteError> {
        let result = self.call("browse_categories", json!({})).await?;
        Ok(items_of(&result, &["items", "categories"])
            .iter()
            .filter_map(bucket_from_value)
            .collect())
    }

    pub async fn browse_genres(
        &self,
        category: Option<&str>,
    ) -> Result<Vec<BrowseBucket>, RemoteError> {
        let result = self
            .call("browse_genres", json!({ "category": category }))
            .await?;
        Ok(items_of(&result, &["items", "genres"])
            .iter()
            .filter_map(bucket_from_value)
            .collect())
    }

    pub async fn browse_artists(
        &self,
        filter: &BrowseFilter,
        cursor: Option<&str>,
        limit: Option<u64>,
    ) -> Result<Page<BrowseBucket>, RemoteError> {
        let result = self
            .call(
                "browse_artists",
                json!({
                    "category": filter.category,
                    "genre": filter.genre,
                    "cursor": cursor,
                    "limit": limit,
                }),
            )
            .await?;
        let (next_cursor, has_more) = cursor_fields(&result);
        Ok(Page {
            items: items_of(&result, &["items", "artists"])
                .iter()
                .filter_map(bucket_from_value)
                .collect(),
            next_cursor,
            has_more,
        })
    }

    pub async fn browse_albums(
        &self,
        filter: &BrowseFilter,
        cursor: Option<&str>,
        limit: Option<u64>,
    ) -> Result<Page<BrowseBucket>, RemoteError> {
        let result = self
            .call(
                "browse_albums",
                json!({
                    "artist": filter.artist,
                    "category": filter.category,
                    "genre": filter.genre,
                    "cursor": cursor,
                    "limit": limit,
                }),
            )
            .await?;
        let (next_cursor, has_more) = cursor_fields(&result);
        Ok(Page {
            items: items_of(&result, &["items", "albums"])
                .iter()
                .filter_map(bucket_from_value)
                .collect(),
            next_cursor,
            has_more,
        })
    }

    pub async fn browse_path(
        &self,
        path: &str,
        cursor: Option<&str>,
        limit: Option<u64>,
    ) -> Result<PathListing, RemoteError> {
        let result = self
            .call(
                "browse_path",
                json!({ "path": path, "cursor": cursor, "limit": limit }),
            )
            .await?;
        let (next_cursor, has_more) = cursor_fields(&result);
        let dirs = items_of(
            pick(&result, &["dirs", "directories"]).unwrap_or(&Value::Null),
            &[],
        )
        .iter()
        .filter_map(|v| {
            v.as_str()
                .map(str::to_string)
                .or_else(|| str_of(v, &["name", "path"]))
        })
        .collect();
        Ok(PathListing {
            dirs,
            songs: items_of(&result, &["items", "songs", "files"])
                .iter()
                .map(song_from_value)
                .collect(),
            next_cursor,
            has_more,
        })
    }

    // ── Preferences / EQ ─────────────────────────────────────────────

    pub async fn preferences_get(&self) -> Result<RemotePreferences, RemoteError> {
        let result = self.call("preferences_get", json!({})).await?;
        let prefs: Preferences = serde_json::from_value(result.clone())
            .map_err(|e| RemoteError::Malformed(format!("preferences: {e}")))?;
        Ok(RemotePreferences {
            prefs,
            last_modified: timestamp_of(&result, &["lastModified", "last_modified", "updated_at"]),
        })
    }

    pub async fn preferences_set(&self, prefs: &Preferences) -> Result<(), RemoteError> {
        let kwargs = serde_json::to_value(prefs)
            .map_err(|e| RemoteError::Malformed(e.to_string()))?;
        self.call("preferences_set", kwargs).await?;
        Ok(())
    }

    pub async fn eq_presets_list(&self) -> Result<Vec<EqPreset>, RemoteError> {
        let result = self.call("eq_presets_list", json!({})).await?;
        Ok(items_of(&result, &["items", "presets"])
            .iter()
            .filter_map(|v| serde_json::from_value(v.clone()).ok())
            .collect())
    }

    pub async fn eq_presets_save(&self, preset: &EqPreset) -> Result<(), RemoteError> {
        self.call(
            "eq_presets_save",
            json!({ "uuid": preset.uuid, "name": preset.name, "bands": preset.bands }),
        )
        .await?;
        Ok(())
    }

    pub async fn eq_presets_delete(&self, uuid: &str) -> Result<(), RemoteError> {
        self.call("eq_presets_delete", json!({ "uuid": uuid })).await?;
        Ok(())
    }

    // ── Playback ─────────────────────────────────────────────────────

    pub async fn playback_get_state(&self) -> Result<PlaybackState, RemoteError> {
        let result = self.call("playback_get_state", json!({})).await?;
        Ok(PlaybackState {
            queue_index: u64_of(&result, &["queueIndex", "queue_index"]).unwrap_or(0) as usize,
            sca_enabled: bool_of(&result, &["scaEnabled", "sca_enabled"]).unwrap_or(false),
            play_mode: str_of(&result, &["playMode", "play_mode"])
                .unwrap_or_else(|| "sequential".to_string()),
            volume: f64_of(&result, &["volume"]).unwrap_or(1.0),
        })
    }

    pub async fn playback_set_state(
        &self,
        queue_index: Option<usize>,
        sca_enabled: Option<bool>,
        play_mode: Option<&str>,
        volume: Option<f64>,
    ) -> Result<(), RemoteError> {
        let mut kwargs = Map::new();
        kwargs.insert("queue_index".into(), json!(queue_index));
        kwargs.insert("sca_enabled".into(), json!(sca_enabled));
        kwargs.insert("play_mode".into(), json!(play_mode));
        kwargs.insert("volume".into(), json!(volume));
        self.call("playback_set_state", prune_nulls(kwargs)).await?;
        Ok(())
    }

    // ── History / Auth ───────────────────────────────────────────────

    pub async fn history_record(
        &self,
        song_uuid: &str,
        duration_seconds: u32,
        skipped: bool,
        source: Option<&str>,
    ) -> Result<(), RemoteError> {
        self.call(
            "history_record",
            json!({
                "song_uuid": song_uuid,
                "duration_seconds": duration_seconds,
                "skipped": skipped,
                "source": source,
            }),
        )
        .await?;
        Ok(())
    }

    pub async fn check_user(&self) -> Result<AuthSnapshot, RemoteError> {
        let result = self.call("check_user", json!({})).await?;
        Ok(AuthSnapshot {
            authenticated: bool_of(&result, &["authenticated"]).unwrap_or(false),
            user: str_of(&result, &["user", "username"]),
            capabilities: items_of(
                pick(&result, &["capabilities"]).unwrap_or(&Value::Null),
                &[],
            )
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        })
    }

    // ── Sync sub-protocol ────────────────────────────────────────────

    pub async fn sync_push(
        &self,
        session_id: &str,
        seq: u64,
        op_type: &str,
        payload: &Value,
    ) -> Result<PushAck, RemoteError> {
        let result = self
            .call(
                "sync_push",
                json!({
                    "session_id": session_id,
                    "seq": seq,
                    "op_type": op_type,
                    "payload": payload,
                }),
            )
            .await?;
        Ok(PushAck {
            created_id: i64_of(&result, &["id", "playlist_id", "playlistId"]),
        })
    }

    pub async fn sync_commit(&self, session_id: &str) -> Result<CommitResult, RemoteError> {
        let result = self
            .call("sync_commit", json!({ "session_id": session_id }))
            .await?;

        let mut commit = CommitResult {
            executed: u64_of(&result, &["executed"]).unwrap_or(0),
            skipped: u64_of(&result, &["skipped"]).unwrap_or(0),
            failed_op: str_of(&result, &["failed_op", "failedOp"]),
            created: HashMap::new(),
        };

        // Older servers report an errors array instead of failed_op.
        if commit.failed_op.is_none() {
            let errors = items_of(
                pick(&result, &["errors"]).unwrap_or(&Value::Null),
                &[],
            );
            if let Some(first) = errors.first() {
                let op = str_of(first, &["op_type", "opType"]).unwrap_or_default();
                let msg = str_of(first, &["error", "message"]).unwrap_or_default();
                commit.failed_op = Some(format!("{op}: {msg}"));
            }
        }
        if bool_of(&result, &["success"]) == Some(false) && commit.failed_op.is_none() {
            commit.failed_op = Some("commit failed".to_string());
        }

        if let Some(created) = pick(&result, &["created", "tempIdMap", "temp_id_map"])
            .and_then(Value::as_object)
        {
            for (token, id) in created {
                if let Some(id) = id
                    .as_i64()
                    .or_else(|| id.as_str().and_then(|s| s.parse().ok()))
                {
                    commit.created.insert(token.clone(), id);
                }
            }
        }
        Ok(commit)
    }

    pub async fn sync_discard(&self, session_id: &str) -> Result<u64, RemoteError> {
        let result = self
            .call("sync_discard", json!({ "session_id": session_id }))
            .await?;
        Ok(u64_of(&result, &["discarded"]).unwrap_or(0))
    }

    pub async fn sync_status(&self, session_id: Option<&str>) -> Result<SyncStatus, RemoteError> {
        let result = self
            .call("sync_status", json!({ "session_id": session_id }))
            .await?;
        Ok(SyncStatus {
            pending_count: u64_of(&result, &["pendingCount", "pending_count"]).unwrap_or(0),
            max_seq: u64_of(&result, &["maxSeq", "max_seq"]).unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::mock::MockTransport;

    fn api(transport: &Arc<MockTransport>) -> RemoteApi {
        RemoteApi::new(transport.clone() as Arc<dyn RemoteTransport>)
    }

    #[tokio::test]
    async fn queue_list_normalizes_items_shape() {
        let transport = Arc::new(MockTransport::new());
        transport.push_ok(json!({
            "items": [
                {"uuid": "u1", "title": "One", "artist": "A", "duration_seconds": 180.0},
                {"uuid": "u2", "title": "Two", "artist": "B", "trackNumber": 3},
            ],
            "queueIndex": 1,
            "playMode": "shuffle",
            "volume": 0.5,
            "hasMore": false,
        }));

        let state = api(&transport).queue_list(None, None).await.unwrap();
        assert_eq!(state.songs.len(), 2);
        assert_eq!(state.songs[0].uuid, "u1");
        assert_eq!(state.songs[0].duration_seconds, 180);
        assert_eq!(state.songs[1].track_number, Some(3));
        assert_eq!(state.queue_index, 1);
        assert_eq!(state.play_mode, "shuffle");
        assert!(!state.has_more);
    }

    #[tokio::test]
    async fn playlists_list_accepts_bare_array_and_wrapped() {
        let transport = Arc::new(MockTransport::new());
        transport.push_ok(json!([{"id": 1, "name": "Mix"}]));
        transport.push_ok(json!({"playlists": [{"id": 2, "name": "Other", "song_count": 7}]}));

        let a = api(&transport).playlists_list().await.unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].id, PlaylistId::Remote(1));

        let b = api(&transport).playlists_list().await.unwrap();
        assert_eq!(b[0].song_count, 7);
    }

    #[tokio::test]
    async fn commit_result_normalization() {
        let transport = Arc::new(MockTransport::new());
        transport.push_ok(json!({
            "success": true,
            "executed": 2,
            "created": {"pending-1712000000000": 42},
        }));

        let commit = api(&transport).sync_commit("s1").await.unwrap();
        assert_eq!(commit.executed, 2);
        assert!(commit.failed_op.is_none());
        assert_eq!(commit.created["pending-1712000000000"], 42);
    }

    #[tokio::test]
    async fn commit_errors_array_becomes_failed_op() {
        let transport = Arc::new(MockTransport::new());
        transport.push_ok(json!({
            "success": false,
            "executed": 1,
            "errors": [{"op_type": "playlists.addSong", "error": "Playlist not found"}],
        }));

        let commit = api(&transport).sync_commit("s1").await.unwrap();
        assert_eq!(
            commit.failed_op.as_deref(),
            Some("playlists.addSong: Playlist not found")
        );
    }

    #[tokio::test]
    async fn push_ack_carries_optional_created_id() {
        let transport = Arc::new(MockTransport::new());
        transport.push_ok(json!({"success": true}));
        transport.push_ok(json!({"success": true, "id": 99}));

        let bare = api(&transport)
            .sync_push("s", 0, "queue.add", &json!({}))
            .await
            .unwrap();
        assert!(bare.created_id.is_none());

        let with_id = api(&transport)
            .sync_push("s", 1, "playlists.create", &json!({}))
            .await
            .unwrap();
        assert_eq!(with_id.created_id, Some(99));
    }

    #[tokio::test]
    async fn preferences_last_modified_both_formats() {
        let transport = Arc::new(MockTransport::new());
        transport.push_ok(json!({
            "volume": 0.8, "lastModified": "2026-01-02T03:04:05Z"
        }));
        transport.push_ok(json!({"volume": 0.8}));

        let with_ts = api(&transport).preferences_get().await.unwrap();
        assert!(with_ts.last_modified.is_some());
        assert_eq!(with_ts.prefs.volume, 0.8);
        // Defaults fill unspecified fields.
        assert_eq!(with_ts.prefs.repeat_mode, "none");

        let without_ts = api(&transport).preferences_get().await.unwrap();
        assert!(without_ts.last_modified.is_none());
    }

    #[tokio::test]
    async fn browse_buckets_accept_strings_and_objects() {
        let transport = Arc::new(MockTransport::new());
        transport.push_ok(json!({
            "items": ["Music", {"name": "Audiobooks", "song_count": 12}]
        }));

        let buckets = api(&transport).browse_categories().await.unwrap();
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].name, "Music");
        assert_eq!(buckets[1].song_count, 12);
    }

    #[tokio::test]
    async fn playlist_id_serializes_into_kwargs() {
        let transport = Arc::new(MockTransport::new());
        transport.push_ok(json!({}));

        api(&transport)
            .playlists_delete(&PlaylistId::Remote(7))
            .await
            .unwrap();
        assert_eq!(transport.kwargs_of(0)["playlist_id"], json!(7));
    }
}
