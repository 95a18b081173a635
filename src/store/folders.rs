//! Offline folder records.
//!
//! A folder is a named grouping of songs downloaded by filesystem path or
//! by hierarchy filter rather than by playlist. Its id is derived from the
//! selector, so re-downloading the same selection updates in place.

use anyhow::Result;
use chrono::Utc;
use redb::ReadableTable;

use super::types::{FolderRecord, FolderSelector, SongRecord};
use super::{decode, encode, OfflineStore, FOLDERS, SONGS};

impl OfflineStore {
    pub fn folder_get(&self, id: &str) -> Result<Option<FolderRecord>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(FOLDERS)?;
        match table.get(id)? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    pub fn folders_all(&self) -> Result<Vec<FolderRecord>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(FOLDERS)?;
        let mut records = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            records.push(decode(value.value())?);
        }
        Ok(records)
    }

    /// Create or update the folder for a selector, replacing its song set.
    /// Member songs get metadata stubs and folder membership in the same
    /// transaction.
    pub fn folder_upsert(
        &self,
        selector: &FolderSelector,
        song_uuids: &[String],
        downloaded_bytes: u64,
    ) -> Result<FolderRecord> {
        let id = selector.id();
        let now = Utc::now();
        let txn = self.db.begin_write()?;
        let record = {
            let mut folders = txn.open_table(FOLDERS)?;
            let record = match folders.get(id.as_str())? {
                Some(existing) => {
                    let mut record: FolderRecord = decode(existing.value())?;
                    record.song_uuids = song_uuids.to_vec();
                    record.downloaded_bytes = downloaded_bytes;
                    record.updated_at = now;
                    record
                }
                None => FolderRecord {
                    id: id.clone(),
                    name: selector.display_name(),
                    song_uuids: song_uuids.to_vec(),
                    downloaded_bytes,
                    created_at: now,
                    updated_at: now,
                },
            };
            folders.insert(id.as_str(), encode(&record)?.as_slice())?;

            let mut songs = txn.open_table(SONGS)?;
            for uuid in song_uuids {
                let updated = match songs.get(uuid.as_str())? {
                    Some(existing) => {
                        let mut song: SongRecord = decode(existing.value())?;
                        if !song.folder_ids.contains(&id) {
                            song.folder_ids.push(id.clone());
                        }
                        encode(&song)?
                    }
                    None => {
                        let mut stub = SongRecord::stub(uuid);
                        stub.folder_ids.push(id.clone());
                        encode(&stub)?
                    }
                };
                songs.insert(uuid.as_str(), updated.as_slice())?;
            }
            record
        };
        txn.commit()?;
        Ok(record)
    }

    /// Delete a folder record and clear folder membership on its songs.
    pub fn folder_delete(&self, id: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut folders = txn.open_table(FOLDERS)?;
            let member_uuids = match folders.remove(id)? {
                Some(value) => {
                    let record: FolderRecord = decode(value.value())?;
                    record.song_uuids
                }
                None => Vec::new(),
            };

            let mut songs = txn.open_table(SONGS)?;
            for uuid in &member_uuids {
                let updated = match songs.get(uuid.as_str())? {
                    Some(existing) => {
                        let mut song: SongRecord = decode(existing.value())?;
                        song.folder_ids.retain(|f| f != id);
                        Some(encode(&song)?)
                    }
                    None => None,
                };
                if let Some(data) = updated {
                    songs.insert(uuid.as_str(), data.as_slice())?;
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
    use crate::store::types::BrowseFilter;
    use crate::store::test_util::open_temp;

    #[test]
    fn upsert_creates_then_updates_in_place() {
        let (_dir, store) = open_temp();
        let selector = FolderSelector::Path("/music/jazz".into());

        let first = store
            .folder_upsert(&selector, &["a".into(), "b".into()], 100)
            .unwrap();
        assert_eq!(first.id, "path:/music/jazz");
        assert_eq!(first.name, "/music/jazz");

        // Re-downloading the same selector must not duplicate the record.
        let second = store
            .folder_upsert(&selector, &["a".into(), "b".into(), "c".into()], 150)
            .unwrap();
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(second.song_uuids.len(), 3);

        let all = store.folders_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].downloaded_bytes, 150);
    }

    #[test]
    fn filter_folders_are_keyed_by_canonical_selector() {
        let (_dir, store) = open_temp();
        let filter = BrowseFilter {
            genre: Some("Ambient".into()),
            ..Default::default()
        };

        store
            .folder_upsert(&FolderSelector::Filter(filter.clone()), &["x".into()], 10)
            .unwrap();
        store
            .folder_upsert(&FolderSelector::Filter(filter), &["x".into(), "y".into()], 20)
            .unwrap();

        assert_eq!(store.folders_all().unwrap().len(), 1);
    }

    #[test]
    fn membership_is_maintained() {
        let (_dir, store) = open_temp();
        let selector = FolderSelector::Path("/music".into());

        store.folder_upsert(&selector, &["a".into()], 5).unwrap();
        let song = store.song_get("a").unwrap().unwrap();
        assert_eq!(song.folder_ids, vec!["path:/music"]);

        store.folder_delete("path:/music").unwrap();
        assert!(store.folder_get("path:/music").unwrap().is_none());
        let song = store.song_get("a").unwrap().unwrap();
        assert!(song.folder_ids.is_empty());
    }
}
