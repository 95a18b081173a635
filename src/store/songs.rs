//! Song metadata collection and the favorites set.

use std::collections::HashSet;

use anyhow::Result;
use redb::{ReadableTable, ReadableTableMetadata};

use super::types::SongRecord;
use super::{decode, encode, OfflineStore, FAVORITES, SONGS};

impl OfflineStore {
    pub fn song_get(&self, uuid: &str) -> Result<Option<SongRecord>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SONGS)?;
        match table.get(uuid)? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    pub fn song_exists(&self, uuid: &str) -> Result<bool> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SONGS)?;
        Ok(table.get(uuid)?.is_some())
    }

    pub fn song_put(&self, record: &SongRecord) -> Result<()> {
        self.song_put_many(std::slice::from_ref(record))
    }

    /// Upsert a batch of records in one transaction, preserving local-only
    /// fields (membership lists, download source) when the incoming record
    /// doesn't carry them.
    pub fn song_put_many(&self, records: &[SongRecord]) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SONGS)?;
            for record in records {
                let merged = match table.get(record.uuid.as_str())? {
                    Some(existing) => {
                        let old: SongRecord = decode(existing.value())?;
                        let mut new = record.clone();
                        if new.playlist_ids.is_empty() {
                            new.playlist_ids = old.playlist_ids;
                        }
                        if new.folder_ids.is_empty() {
                            new.folder_ids = old.folder_ids;
                        }
                        if new.download_source.is_none() {
                            new.download_source = old.download_source;
                        }
                        new
                    }
                    None => record.clone(),
                };
                table.insert(record.uuid.as_str(), encode(&merged)?.as_slice())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    pub fn song_delete(&self, uuid: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SONGS)?;
            table.remove(uuid)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Full scan of cached metadata, used by offline browse and the derived
    /// browse-index recompute.
    pub fn songs_all(&self) -> Result<Vec<SongRecord>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SONGS)?;
        let mut songs = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            songs.push(decode(value.value())?);
        }
        Ok(songs)
    }

    pub fn song_count(&self) -> Result<u64> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SONGS)?;
        Ok(table.len()?)
    }

    // ── Favorites ────────────────────────────────────────────────────

    pub fn favorites(&self) -> Result<HashSet<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(FAVORITES)?;
        let mut set = HashSet::new();
        for entry in table.iter()? {
            let (key, _) = entry?;
            set.insert(key.value().to_string());
        }
        Ok(set)
    }

    pub fn favorite_add(&self, uuid: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(FAVORITES)?;
            table.insert(uuid, ())?;
            let mut songs = txn.open_table(SONGS)?;
            if songs.get(uuid)?.is_none() {
                let stub = encode(&SongRecord::stub(uuid))?;
                songs.insert(uuid, stub.as_slice())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    pub fn favorite_remove(&self, uuid: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(FAVORITES)?;
            table.remove(uuid)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Replace the whole favorites set (mirror of a fresh remote fetch).
    pub fn favorites_replace(&self, uuids: &[String]) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(FAVORITES)?;
            let mut old = Vec::new();
            for entry in table.iter()? {
                let (key, _) = entry?;
                old.push(key.value().to_string());
            }
            for key in old {
                table.remove(key.as_str())?;
            }
            let mut songs = txn.open_table(SONGS)?;
            for uuid in uuids {
                table.insert(uuid.as_str(), ())?;
                if songs.get(uuid.as_str())?.is_none() {
                    let stub = encode(&SongRecord::stub(uuid))?;
                    songs.insert(uuid.as_str(), stub.as_slice())?;
                }
            }
        }
        txn.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_util::open_temp;

    fn song(uuid: &str, title: &str, artist: &str) -> SongRecord {
        let mut s = SongRecord::stub(uuid);
        s.title = title.to_string();
        s.artist = artist.to_string();
        s
    }

    #[test]
    fn put_get_roundtrip() {
        let (_dir, store) = open_temp();

        store.song_put(&song("u1", "Song One", "Artist A")).unwrap();
        let loaded = store.song_get("u1").unwrap().unwrap();
        assert_eq!(loaded.title, "Song One");
        assert_eq!(loaded.artist, "Artist A");
        assert!(store.song_exists("u1").unwrap());
        assert!(!store.song_exists("u2").unwrap());
    }

    #[test]
    fn upsert_preserves_membership() {
        let (_dir, store) = open_temp();

        let mut cached = song("u1", "Old Title", "A");
        cached.playlist_ids = vec!["17".to_string()];
        cached.download_source = Some("browse:/ambient".to_string());
        store.song_put(&cached).unwrap();

        // A fresh remote mirror carries no local membership.
        store.song_put(&song("u1", "New Title", "A")).unwrap();

        let merged = store.song_get("u1").unwrap().unwrap();
        assert_eq!(merged.title, "New Title");
        assert_eq!(merged.playlist_ids, vec!["17"]);
        assert_eq!(merged.download_source.as_deref(), Some("browse:/ambient"));
    }

    #[test]
    fn songs_all_returns_everything() {
        let (_dir, store) = open_temp();

        for i in 0..4 {
            store
                .song_put(&song(&format!("u{i}"), &format!("T{i}"), "A"))
                .unwrap();
        }
        assert_eq!(store.songs_all().unwrap().len(), 4);
        assert_eq!(store.song_count().unwrap(), 4);
    }

    #[test]
    fn favorites_set_operations() {
        let (_dir, store) = open_temp();

        store.favorite_add("u1").unwrap();
        store.favorite_add("u2").unwrap();
        assert_eq!(store.favorites().unwrap().len(), 2);

        // Favoriting an unknown uuid creates its metadata stub.
        assert!(store.song_exists("u1").unwrap());

        store.favorite_remove("u1").unwrap();
        let favs = store.favorites().unwrap();
        assert!(!favs.contains("u1"));
        assert!(favs.contains("u2"));

        store
            .favorites_replace(&["u3".to_string(), "u4".to_string()])
            .unwrap();
        let favs = store.favorites().unwrap();
        assert_eq!(favs.len(), 2);
        assert!(favs.contains("u3") && favs.contains("u4"));
    }
}
