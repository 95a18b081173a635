//! Queue cache slots.
//!
//! One live snapshot (`current`) plus the never-synced preview pair
//! (`temp` and its `temp_saved` backup). Saving a snapshot also inserts
//! metadata stubs for any unknown song uuid in the same transaction, so a
//! cached queue can never reference a song without a metadata record.

use anyhow::Result;
use redb::ReadableTable;

use super::types::{QueueSlot, QueueSnapshot, SongRecord};
use super::{decode, encode, OfflineStore, QUEUE, SONGS};

impl OfflineStore {
    pub fn queue_load(&self, slot: QueueSlot) -> Result<Option<QueueSnapshot>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(QUEUE)?;
        match table.get(slot.key())? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    pub fn queue_save(&self, slot: QueueSlot, snapshot: &QueueSnapshot) -> Result<()> {
        let data = encode(snapshot)?;
        let txn = self.db.begin_write()?;
        {
            let mut queue = txn.open_table(QUEUE)?;
            queue.insert(slot.key(), data.as_slice())?;

            let mut songs = txn.open_table(SONGS)?;
            for uuid in &snapshot.song_uuids {
                if songs.get(uuid.as_str())?.is_none() {
                    let stub = encode(&SongRecord::stub(uuid))?;
                    songs.insert(uuid.as_str(), stub.as_slice())?;
                }
            }
        }
        txn.commit()?;
        Ok(())
    }

    pub fn queue_clear_slot(&self, slot: QueueSlot) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut queue = txn.open_table(QUEUE)?;
            queue.remove(slot.key())?;
        }
        txn.commit()?;
        Ok(())
    }
}
