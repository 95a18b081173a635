//! Pending-write queue.
//!
//! Writes get a monotonically increasing id from a counter in the meta
//! table, so key order is creation order. A `(type, id)` index supports
//! by-domain queries.

use anyhow::Result;
use chrono::Utc;
use redb::{ReadableTable, ReadableTableMetadata};

use super::types::{PendingWrite, WriteDomain};
use super::{decode, encode, OfflineStore, META, PENDING, PENDING_BY_TYPE, PENDING_SEQ_KEY};

impl OfflineStore {
    /// Append a pending write, assigning the next id. Returns the stored
    /// record.
    pub fn pending_append(
        &self,
        domain: WriteDomain,
        operation: &str,
        payload: serde_json::Value,
    ) -> Result<PendingWrite> {
        let txn = self.db.begin_write()?;
        let write = {
            let mut meta = txn.open_table(META)?;
            let id = meta.get(PENDING_SEQ_KEY)?.map(|g| g.value()).unwrap_or(0) + 1;
            meta.insert(PENDING_SEQ_KEY, id)?;

            let write = PendingWrite {
                id,
                domain,
                operation: operation.to_string(),
                payload,
                created_at: Utc::now(),
                retry_count: 0,
            };

            let mut pending = txn.open_table(PENDING)?;
            pending.insert(id, encode(&write)?.as_slice())?;
            let mut by_type = txn.open_table(PENDING_BY_TYPE)?;
            by_type.insert((domain.as_str(), id), ())?;
            write
        };
        txn.commit()?;
        Ok(write)
    }

    /// All pending writes in creation order.
    pub fn pending_all(&self) -> Result<Vec<PendingWrite>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(PENDING)?;
        let mut writes = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            writes.push(decode(value.value())?);
        }
        Ok(writes)
    }

    pub fn pending_count(&self) -> Result<u64> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(PENDING)?;
        Ok(table.len()?)
    }

    /// Pending writes for one entity domain, in creation order.
    pub fn pending_by_domain(&self, domain: WriteDomain) -> Result<Vec<PendingWrite>> {
        let txn = self.db.begin_read()?;
        let by_type = txn.open_table(PENDING_BY_TYPE)?;
        let pending = txn.open_table(PENDING)?;

        let mut writes = Vec::new();
        let key = domain.as_str();
        for entry in by_type.range((key, 0)..=(key, u64::MAX))? {
            let (index_key, _) = entry?;
            let (_, id) = index_key.value();
            if let Some(value) = pending.get(id)? {
                writes.push(decode(value.value())?);
            }
        }
        Ok(writes)
    }

    /// Delete a committed batch in a single transaction.
    pub fn pending_delete_batch(&self, ids: &[u64]) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut pending = txn.open_table(PENDING)?;
            let mut by_type = txn.open_table(PENDING_BY_TYPE)?;
            for &id in ids {
                if let Some(value) = pending.remove(id)? {
                    let write: PendingWrite = decode(value.value())?;
                    by_type.remove((write.domain.as_str(), id))?;
                }
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Increment the retry counter of every write in a failed batch, in a
    /// single transaction. Each id is bumped exactly once per call.
    pub fn pending_bump_retries(&self, ids: &[u64]) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut pending = txn.open_table(PENDING)?;
            for &id in ids {
                let updated = match pending.get(id)? {
                    Some(value) => {
                        let mut write: PendingWrite = decode(value.value())?;
                        write.retry_count += 1;
                        Some(encode(&write)?)
                    }
                    None => None,
                };
                if let Some(data) = updated {
                    pending.insert(id, data.as_slice())?;
                }
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Rewrite queued payloads that still reference a placeholder playlist
    /// id with its resolved server id, in one transaction. The `tempId`
    /// correlation token is left untouched.
    pub fn pending_resolve_playlist_refs(
        &self,
        placeholder_key: &str,
        server_id: i64,
    ) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut pending = txn.open_table(PENDING)?;
            let mut updates = Vec::new();
            for entry in pending.iter()? {
                let (key, value) = entry?;
                let mut write: PendingWrite = decode(value.value())?;
                let mut touched = false;
                if let Some(obj) = write.payload.as_object_mut() {
                    for field in ["playlistId", "playlist_id"] {
                        if obj.get(field).and_then(serde_json::Value::as_str)
                            == Some(placeholder_key)
                        {
                            obj.insert(field.to_string(), serde_json::Value::from(server_id));
                            touched = true;
                        }
                    }
                }
                if touched {
                    updates.push((key.value(), encode(&write)?));
                }
            }
            for (id, data) in updates {
                pending.insert(id, data.as_slice())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Drop every pending write (explicit user discard). Returns how many
    /// were discarded.
    pub fn pending_discard_all(&self) -> Result<u64> {
        let txn = self.db.begin_write()?;
        let discarded = {
            let mut pending = txn.open_table(PENDING)?;
            let mut doomed = Vec::new();
            for entry in pending.iter()? {
                let (key, value) = entry?;
                let write: PendingWrite = decode(value.value())?;
                doomed.push((key.value(), write.domain));
            }
            let mut by_type = txn.open_table(PENDING_BY_TYPE)?;
            for (id, domain) in &doomed {
                pending.remove(*id)?;
                by_type.remove((domain.as_str(), *id))?;
            }
            doomed.len() as u64
        };
        txn.commit()?;
        Ok(discarded)
    }
}
