//! Persisted record types for the offline store.
//!
//! Everything here is plain serializable data: records are stored as JSON
//! bytes in redb and must survive process restarts, so no live references.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Playlist identity: either a server-assigned numeric id or a
/// client-generated placeholder for a playlist created while offline.
///
/// On the wire a `Remote` id is a JSON number and a `Local` placeholder is a
/// `"pending-<token>"` string, matching what the server expects to resolve.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PlaylistId {
    Remote(i64),
    Local(u64),
}

impl PlaylistId {
    pub fn is_local(&self) -> bool {
        matches!(self, PlaylistId::Local(_))
    }

    /// Storage key form, also used as the wire string where a string id is
    /// expected ("17" or "pending-1712345678901").
    pub fn as_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for PlaylistId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaylistId::Remote(id) => write!(f, "{id}"),
            PlaylistId::Local(token) => write!(f, "pending-{token}"),
        }
    }
}

impl FromStr for PlaylistId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(token) = s.strip_prefix("pending-") {
            return Ok(PlaylistId::Local(token.parse()?));
        }
        Ok(PlaylistId::Remote(s.parse()?))
    }
}

impl Serialize for PlaylistId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PlaylistId::Remote(id) => serializer.serialize_i64(*id),
            PlaylistId::Local(token) => serializer.collect_str(&format_args!("pending-{token}")),
        }
    }
}

impl<'de> Deserialize<'de> for PlaylistId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct IdVisitor;

        impl Visitor<'_> for IdVisitor {
            type Value = PlaylistId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a numeric playlist id or a \"pending-<token>\" string")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                Ok(PlaylistId::Remote(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(PlaylistId::Remote(v as i64))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                v.parse().map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self))
            }
        }

        deserializer.deserialize_any(IdVisitor)
    }
}

/// Entity domain of a pending write. Serialized names match the remote's
/// operation namespaces ("queue.add", "playlists.create", ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WriteDomain {
    #[serde(rename = "queue")]
    Queue,
    #[serde(rename = "playlists")]
    Playlists,
    #[serde(rename = "preferences")]
    Preferences,
    #[serde(rename = "eqPresets")]
    EqPresets,
    #[serde(rename = "playback")]
    Playback,
    #[serde(rename = "history")]
    History,
}

impl WriteDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteDomain::Queue => "queue",
            WriteDomain::Playlists => "playlists",
            WriteDomain::Preferences => "preferences",
            WriteDomain::EqPresets => "eqPresets",
            WriteDomain::Playback => "playback",
            WriteDomain::History => "history",
        }
    }
}

/// A queued, not-yet-acknowledged local mutation awaiting remote application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingWrite {
    pub id: u64,
    #[serde(rename = "type")]
    pub domain: WriteDomain,
    pub operation: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
}

/// Cached song metadata. Required to exist for every uuid referenced by the
/// cached queue, a cached playlist, or an offline folder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SongRecord {
    pub uuid: String,
    pub title: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub album: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album_artist: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disc_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default)]
    pub duration_seconds: u32,
    /// Library-relative file path, used for path browsing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replay_gain_track: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replay_gain_album: Option<f64>,
    /// Cached playlists that reference this song.
    #[serde(default)]
    pub playlist_ids: Vec<String>,
    /// Offline folders that reference this song.
    #[serde(default)]
    pub folder_ids: Vec<String>,
    /// Free-form provenance for individually-downloaded songs (browse path
    /// or originating playlist name); groups them in the UI and decides
    /// orphan eligibility.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_source: Option<String>,
}

impl SongRecord {
    /// Minimal placeholder metadata for a uuid we know nothing about yet.
    /// Keeps the metadata-exists invariant when a uuid enters a cached
    /// collection ahead of its full record.
    pub fn stub(uuid: &str) -> Self {
        Self {
            uuid: uuid.to_string(),
            title: uuid.to_string(),
            artist: String::new(),
            album: String::new(),
            album_artist: None,
            genre: None,
            category: None,
            track_number: None,
            disc_number: None,
            year: None,
            duration_seconds: 0,
            file: None,
            replay_gain_track: None,
            replay_gain_album: None,
            playlist_ids: Vec::new(),
            folder_ids: Vec::new(),
            download_source: None,
        }
    }
}

/// Offline/downloaded copy of a playlist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistRecord {
    pub id: PlaylistId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Member songs in playlist order.
    #[serde(default)]
    pub song_uuids: Vec<String>,
    #[serde(default)]
    pub downloaded_bytes: u64,
    #[serde(default)]
    pub downloaded_songs: u32,
    #[serde(default)]
    pub total_songs: u32,
    #[serde(default)]
    pub complete: bool,
}

/// Lightweight playlist listing entry, cached from the remote playlist list
/// and extended with optimistic placeholder entries created offline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistSummary {
    pub id: PlaylistId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub song_count: u32,
    #[serde(default)]
    pub is_public: bool,
    /// True for playlists created offline whose create has not committed.
    #[serde(default)]
    pub pending: bool,
}

/// Metadata for a stored audio blob. The raw bytes live in a separate table
/// keyed by the same uuid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobRecord {
    pub uuid: String,
    pub mime_type: String,
    pub size: u64,
    #[serde(default)]
    pub playlist_ids: Vec<String>,
    #[serde(default)]
    pub folder_ids: Vec<String>,
    pub downloaded_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_source: Option<String>,
}

impl BlobRecord {
    /// Disk-usage bucket this blob is accounted under. One category per
    /// blob, derived from how it was downloaded.
    pub fn usage_category(&self) -> String {
        if let Some(pid) = self.playlist_ids.first() {
            format!("playlist:{pid}")
        } else if let Some(fid) = self.folder_ids.first() {
            format!("folder:{fid}")
        } else {
            "individual".to_string()
        }
    }
}

/// Hierarchy filter used for filter-selected downloads and offline browse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowseFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
}

impl BrowseFilter {
    pub fn is_empty(&self) -> bool {
        *self == BrowseFilter::default()
    }
}

/// How an offline folder selects its songs. The derived id is the selector
/// itself, so re-downloading the same selection updates in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderSelector {
    Path(String),
    Filter(BrowseFilter),
}

impl FolderSelector {
    pub fn id(&self) -> String {
        match self {
            FolderSelector::Path(path) => format!("path:{path}"),
            // Struct field order makes the JSON form canonical.
            FolderSelector::Filter(filter) => {
                format!("filter:{}", serde_json::to_string(filter).unwrap_or_default())
            }
        }
    }

    pub fn display_name(&self) -> String {
        match self {
            FolderSelector::Path(path) => path.clone(),
            FolderSelector::Filter(filter) => {
                let mut parts = Vec::new();
                if let Some(c) = &filter.category {
                    parts.push(c.clone());
                }
                if let Some(g) = &filter.genre {
                    parts.push(g.clone());
                }
                if let Some(a) = &filter.artist {
                    parts.push(a.clone());
                }
                if let Some(a) = &filter.album {
                    parts.push(a.clone());
                }
                if parts.is_empty() {
                    "All songs".to_string()
                } else {
                    parts.join(" / ")
                }
            }
        }
    }
}

/// A named, persisted grouping of songs downloaded by path or by filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub song_uuids: Vec<String>,
    #[serde(default)]
    pub downloaded_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Which queue snapshot slot an operation addresses. `Current` is the live
/// queue; `Temp` and `TempSaved` are the never-synced preview pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueSlot {
    Current,
    Temp,
    TempSaved,
}

impl QueueSlot {
    pub fn key(&self) -> &'static str {
        match self {
            QueueSlot::Current => "current",
            QueueSlot::Temp => "temp",
            QueueSlot::TempSaved => "temp_saved",
        }
    }
}

/// Cached queue snapshot: ordered songs, play position, mode flags, and the
/// device/sequence markers used for last-write-wins index updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub song_uuids: Vec<String>,
    #[serde(default)]
    pub queue_index: usize,
    #[serde(default = "default_play_mode")]
    pub play_mode: String,
    #[serde(default)]
    pub sca_enabled: bool,
    #[serde(default = "default_volume")]
    pub volume: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default)]
    pub device_seq: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
}

fn default_play_mode() -> String {
    "sequential".to_string()
}

fn default_volume() -> f64 {
    1.0
}

impl Default for QueueSnapshot {
    fn default() -> Self {
        Self {
            song_uuids: Vec::new(),
            queue_index: 0,
            play_mode: default_play_mode(),
            sca_enabled: false,
            volume: 1.0,
            device_id: None,
            device_seq: 0,
            last_synced_at: None,
        }
    }
}

/// User preferences snapshot mirrored from the remote, with the local
/// modification timestamp used for last-write-wins reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default = "default_volume")]
    pub volume: f64,
    #[serde(default)]
    pub shuffle: bool,
    #[serde(default = "default_repeat_mode")]
    pub repeat_mode: String,
    #[serde(default = "default_true")]
    pub radio_eopp: bool,
    #[serde(default)]
    pub dark_mode: bool,
    #[serde(default = "default_rg_mode")]
    pub replay_gain_mode: String,
    #[serde(default)]
    pub replay_gain_preamp: f64,
    #[serde(default = "default_rg_fallback")]
    pub replay_gain_fallback: f64,
}

fn default_repeat_mode() -> String {
    "none".to_string()
}

fn default_true() -> bool {
    true
}

fn default_rg_mode() -> String {
    "off".to_string()
}

fn default_rg_fallback() -> f64 {
    -6.0
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            volume: 1.0,
            shuffle: false,
            repeat_mode: default_repeat_mode(),
            radio_eopp: true,
            dark_mode: false,
            replay_gain_mode: default_rg_mode(),
            replay_gain_preamp: 0.0,
            replay_gain_fallback: default_rg_fallback(),
        }
    }
}

/// Preferences as cached locally, with the modification timestamp used for
/// last-write-wins reconciliation against the remote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredPreferences {
    pub prefs: Preferences,
    pub updated_at: DateTime<Utc>,
}

/// Cached authentication snapshot served while offline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthSnapshot {
    #[serde(default)]
    pub authenticated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// A saved equalizer preset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EqPreset {
    pub uuid: String,
    pub name: String,
    pub bands: Vec<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playlist_id_wire_forms() {
        let remote = PlaylistId::Remote(42);
        assert_eq!(serde_json::to_string(&remote).unwrap(), "42");

        let local = PlaylistId::Local(1712345678901);
        assert_eq!(
            serde_json::to_string(&local).unwrap(),
            "\"pending-1712345678901\""
        );
    }

    #[test]
    fn playlist_id_roundtrip() {
        let remote: PlaylistId = serde_json::from_str("17").unwrap();
        assert_eq!(remote, PlaylistId::Remote(17));

        let local: PlaylistId = serde_json::from_str("\"pending-99\"").unwrap();
        assert_eq!(local, PlaylistId::Local(99));

        // Numeric ids sometimes arrive as strings
        let stringly: PlaylistId = serde_json::from_str("\"17\"").unwrap();
        assert_eq!(stringly, PlaylistId::Remote(17));
    }

    #[test]
    fn playlist_id_key_parses_back() {
        for id in [PlaylistId::Remote(5), PlaylistId::Local(123)] {
            let parsed: PlaylistId = id.as_key().parse().unwrap();
            assert_eq!(parsed, id);
        }
    }

    #[test]
    fn write_domain_names() {
        assert_eq!(WriteDomain::Queue.as_str(), "queue");
        assert_eq!(WriteDomain::EqPresets.as_str(), "eqPresets");
        let json = serde_json::to_string(&WriteDomain::Playlists).unwrap();
        assert_eq!(json, "\"playlists\"");
    }

    #[test]
    fn folder_selector_ids_are_deterministic() {
        let by_path = FolderSelector::Path("/music/ambient".into());
        assert_eq!(by_path.id(), "path:/music/ambient");

        let filter = BrowseFilter {
            genre: Some("Jazz".into()),
            ..Default::default()
        };
        let a = FolderSelector::Filter(filter.clone()).id();
        let b = FolderSelector::Filter(filter).id();
        assert_eq!(a, b);
        assert!(a.starts_with("filter:"));
    }

    #[test]
    fn song_stub_is_minimal_but_valid() {
        let stub = SongRecord::stub("abc-123");
        assert_eq!(stub.uuid, "abc-123");
        assert_eq!(stub.title, "abc-123");
        assert!(stub.playlist_ids.is_empty());
    }

    #[test]
    fn preferences_defaults_match_server() {
        let p = Preferences::default();
        assert_eq!(p.volume, 1.0);
        assert!(!p.shuffle);
        assert_eq!(p.repeat_mode, "none");
        assert!(p.radio_eopp);
        assert!(!p.dark_mode);
        assert_eq!(p.replay_gain_mode, "off");
        assert_eq!(p.replay_gain_preamp, 0.0);
        assert_eq!(p.replay_gain_fallback, -6.0);
    }

    #[test]
    fn queue_snapshot_defaults() {
        let q = QueueSnapshot::default();
        assert!(q.song_uuids.is_empty());
        assert_eq!(q.queue_index, 0);
        assert_eq!(q.play_mode, "sequential");
        assert_eq!(q.volume, 1.0);
    }
}
