//! Cached playlist records and placeholder-identity resolution.
//!
//! Records are keyed by the string form of their [`PlaylistId`], so a
//! playlist created offline lives under its `pending-<token>` key until the
//! create commits, at which point `playlist_resolve_placeholder` rewrites
//! every cached reference to the server id in one transaction.

use anyhow::Result;
use redb::ReadableTable;

use super::settings::{playlist_songs_key, KEY_FAVORITES_PLAYLIST_ID, KEY_PLAYLIST_LIST};
use super::types::{BlobRecord, PlaylistId, PlaylistRecord, PlaylistSummary, SongRecord};
use super::{decode, encode, OfflineStore, BLOB_META, PLAYLISTS, SETTINGS, SONGS};

impl OfflineStore {
    pub fn playlist_get(&self, id: &PlaylistId) -> Result<Option<PlaylistRecord>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(PLAYLISTS)?;
        match table.get(id.as_key().as_str())? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    pub fn playlists_all(&self) -> Result<Vec<PlaylistRecord>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(PLAYLISTS)?;
        let mut records = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            records.push(decode(value.value())?);
        }
        Ok(records)
    }

    /// Upsert a playlist record. Member songs get metadata stubs and their
    /// membership lists updated in the same transaction.
    pub fn playlist_put(&self, record: &PlaylistRecord) -> Result<()> {
        let key = record.id.as_key();
        let data = encode(record)?;
        let txn = self.db.begin_write()?;
        {
            let mut playlists = txn.open_table(PLAYLISTS)?;
            playlists.insert(key.as_str(), data.as_slice())?;

            let mut songs = txn.open_table(SONGS)?;
            for uuid in &record.song_uuids {
                let mut song: SongRecord = match songs.get(uuid.as_str())? {
                    Some(existing) => decode(existing.value())?,
                    None => SongRecord::stub(uuid),
                };
                if !song.playlist_ids.contains(&key) {
                    song.playlist_ids.push(key.clone());
                }
                songs.insert(uuid.as_str(), encode(&song)?.as_slice())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Delete a cached playlist, removing membership references and the
    /// per-playlist song cache alongside the record itself.
    pub fn playlist_delete(&self, id: &PlaylistId) -> Result<()> {
        let key = id.as_key();
        let txn = self.db.begin_write()?;
        {
            let mut playlists = txn.open_table(PLAYLISTS)?;
            let member_uuids = match playlists.remove(key.as_str())? {
                Some(value) => {
                    let record: PlaylistRecord = decode(value.value())?;
                    record.song_uuids
                }
                None => Vec::new(),
            };

            let mut songs = txn.open_table(SONGS)?;
            for uuid in &member_uuids {
                let updated = match songs.get(uuid.as_str())? {
                    Some(existing) => {
                        let mut song: SongRecord = decode(existing.value())?;
                        song.playlist_ids.retain(|p| p != &key);
                        Some(encode(&song)?)
                    }
                    None => None,
                };
                if let Some(data) = updated {
                    songs.insert(uuid.as_str(), data.as_slice())?;
                }
            }

            let mut settings = txn.open_table(SETTINGS)?;
            settings.remove(playlist_songs_key(&key).as_str())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Rewrite every cached reference to a placeholder playlist id with the
    /// server-assigned id, in a single transaction: the playlist record's
    /// key, the cached playlist list, the per-playlist song cache key, song
    /// membership lists, blob references, and the favorites-playlist id.
    pub fn playlist_resolve_placeholder(&self, token: u64, server_id: i64) -> Result<()> {
        let old_key = PlaylistId::Local(token).as_key();
        let new_id = PlaylistId::Remote(server_id);
        let new_key = new_id.as_key();

        let txn = self.db.begin_write()?;
        {
            let mut playlists = txn.open_table(PLAYLISTS)?;
            let moved = match playlists.remove(old_key.as_str())? {
                Some(value) => {
                    let mut record: PlaylistRecord = decode(value.value())?;
                    record.id = new_id.clone();
                    Some(encode(&record)?)
                }
                None => None,
            };
            if let Some(data) = moved {
                playlists.insert(new_key.as_str(), data.as_slice())?;
            }

            let mut settings = txn.open_table(SETTINGS)?;
            let cached_songs = settings
                .remove(playlist_songs_key(&old_key).as_str())?
                .map(|value| value.value().to_vec());
            if let Some(cached) = cached_songs {
                settings.insert(playlist_songs_key(&new_key).as_str(), cached.as_slice())?;
            }

            let list_update = match settings.get(KEY_PLAYLIST_LIST)? {
                Some(value) => {
                    let mut list: Vec<PlaylistSummary> = decode(value.value())?;
                    let mut touched = false;
                    for entry in &mut list {
                        if entry.id == PlaylistId::Local(token) {
                            entry.id = new_id.clone();
                            entry.pending = false;
                            touched = true;
                        }
                    }
                    touched.then(|| encode(&list)).transpose()?
                }
                None => None,
            };
            if let Some(data) = list_update {
                settings.insert(KEY_PLAYLIST_LIST, data.as_slice())?;
            }

            let fav_update = match settings.get(KEY_FAVORITES_PLAYLIST_ID)? {
                Some(value) => {
                    let fav: PlaylistId = decode(value.value())?;
                    (fav == PlaylistId::Local(token))
                        .then(|| encode(&new_id))
                        .transpose()?
                }
                None => None,
            };
            if let Some(data) = fav_update {
                settings.insert(KEY_FAVORITES_PLAYLIST_ID, data.as_slice())?;
            }

            let mut songs = txn.open_table(SONGS)?;
            let mut song_updates = Vec::new();
            for entry in songs.iter()? {
                let (key, value) = entry?;
                let song: SongRecord = decode(value.value())?;
                if song.playlist_ids.iter().any(|p| p == &old_key) {
                    song_updates.push(key.value().to_string());
                }
            }
            for uuid in song_updates {
                let updated = match songs.get(uuid.as_str())? {
                    Some(value) => {
                        let mut song: SongRecord = decode(value.value())?;
                        for p in &mut song.playlist_ids {
                            if p == &old_key {
                                *p = new_key.clone();
                            }
                        }
                        Some(encode(&song)?)
                    }
                    None => None,
                };
                if let Some(data) = updated {
                    songs.insert(uuid.as_str(), data.as_slice())?;
                }
            }

            let mut blob_meta = txn.open_table(BLOB_META)?;
            let mut blob_updates = Vec::new();
            for entry in blob_meta.iter()? {
                let (key, value) = entry?;
                let blob: BlobRecord = decode(value.value())?;
                if blob.playlist_ids.iter().any(|p| p == &old_key) {
                    blob_updates.push(key.value().to_string());
                }
            }
            for uuid in blob_updates {
                let updated = match blob_meta.get(uuid.as_str())? {
                    Some(value) => {
                        let mut blob: BlobRecord = decode(value.value())?;
                        for p in &mut blob.playlist_ids {
                            if p == &old_key {
                                *p = new_key.clone();
                            }
                        }
                        Some(encode(&blob)?)
                    }
                    None => None,
                };
                if let Some(data) = updated {
                    blob_meta.insert(uuid.as_str(), data.as_slice())?;
                }
            }
        }
        txn.commit()?;
        Ok(())
    }
}
