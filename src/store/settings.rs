//! Generic key/value settings collection.
//!
//! Used for the preferences snapshot, the cached playlist list, per-playlist
//! song-list caches, the auth snapshot, the favorites-playlist id, and the
//! last-sync timestamp.

use anyhow::Result;
use chrono::{DateTime, Utc};
use redb::ReadableTable;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{decode, encode, OfflineStore, SETTINGS};

/// Preferences snapshot key; value is `{prefs, updated_at}`.
pub const KEY_PREFERENCES: &str = "preferences";
/// Cached lightweight playlist list (as last seen from the remote).
pub const KEY_PLAYLIST_LIST: &str = "playlists";
/// Per-playlist cached song-uuid list; suffix is the playlist key.
pub const KEY_PLAYLIST_SONGS_PREFIX: &str = "playlist_songs:";
/// Cached auth snapshot.
pub const KEY_AUTH: &str = "auth";
/// Server id of the favorites pseudo-playlist.
pub const KEY_FAVORITES_PLAYLIST_ID: &str = "favorites_playlist_id";
/// Completion time of the last successful sync.
pub const KEY_LAST_SYNC: &str = "last_sync_at";
/// Cached EQ preset list.
pub const KEY_EQ_PRESETS: &str = "eq_presets";

pub fn playlist_songs_key(playlist_key: &str) -> String {
    format!("{KEY_PLAYLIST_SONGS_PREFIX}{playlist_key}")
}

impl OfflineStore {
    pub fn setting_get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        match table.get(key)? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    pub fn setting_put<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let data = encode(value)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SETTINGS)?;
            table.insert(key, data.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn setting_delete(&self, key: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SETTINGS)?;
            table.remove(key)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn last_sync_at(&self) -> Result<Option<DateTime<Utc>>> {
        self.setting_get(KEY_LAST_SYNC)
    }

    pub fn set_last_sync_at(&self, at: DateTime<Utc>) -> Result<()> {
        self.setting_put(KEY_LAST_SYNC, &at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_util::open_temp;

    #[test]
    fn settings_roundtrip() {
        let (_dir, store) = open_temp();

        store.setting_put("volume", &0.7f64).unwrap();
        let volume: Option<f64> = store.setting_get("volume").unwrap();
        assert_eq!(volume, Some(0.7));

        store.setting_delete("volume").unwrap();
        let volume: Option<f64> = store.setting_get("volume").unwrap();
        assert_eq!(volume, None);
    }

    #[test]
    fn missing_setting_is_none_not_error() {
        let (_dir, store) = open_temp();
        let value: Option<String> = store.setting_get("never_written").unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn last_sync_roundtrip() {
        let (_dir, store) = open_temp();
        assert!(store.last_sync_at().unwrap().is_none());

        let now = Utc::now();
        store.set_last_sync_at(now).unwrap();
        assert_eq!(store.last_sync_at().unwrap(), Some(now));
    }

    #[test]
    fn playlist_songs_key_format() {
        assert_eq!(playlist_songs_key("pending-5"), "playlist_songs:pending-5");
        assert_eq!(playlist_songs_key("17"), "playlist_songs:17");
    }
}
