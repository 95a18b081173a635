//! Audio blob storage with incremental disk-usage accounting.
//!
//! Blob bytes and blob metadata live in sibling tables keyed by song uuid.
//! Every save/delete adjusts the per-category usage counters in the same
//! write transaction, so the counters always equal the sum over stored
//! blobs and can never go negative.

use anyhow::Result;
use chrono::Utc;
use redb::ReadableTable;

use super::types::BlobRecord;
use super::{decode, encode, OfflineStore, BLOBS, BLOB_META, DISK_USAGE};

impl OfflineStore {
    /// Store (or replace) a blob. Replacement first backs out the old
    /// blob's contribution to its category counters.
    pub fn blob_save(&self, record: &BlobRecord, bytes: &[u8]) -> Result<()> {
        let uuid = record.uuid.as_str();
        let txn = self.db.begin_write()?;
        {
            let mut meta = txn.open_table(BLOB_META)?;
            let old: Option<BlobRecord> = match meta.get(uuid)? {
                Some(value) => Some(decode(value.value())?),
                None => None,
            };

            let mut usage = txn.open_table(DISK_USAGE)?;
            if let Some(old) = &old {
                subtract_usage(&mut usage, &old.usage_category(), old.size)?;
            }
            add_usage(&mut usage, &record.usage_category(), record.size)?;

            meta.insert(uuid, encode(record)?.as_slice())?;
            let mut blobs = txn.open_table(BLOBS)?;
            blobs.insert(uuid, bytes)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn blob_meta(&self, uuid: &str) -> Result<Option<BlobRecord>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(BLOB_META)?;
        match table.get(uuid)? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    pub fn blob_metas_all(&self) -> Result<Vec<BlobRecord>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(BLOB_META)?;
        let mut records = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            records.push(decode(value.value())?);
        }
        Ok(records)
    }

    pub fn blob_exists(&self, uuid: &str) -> Result<bool> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(BLOB_META)?;
        Ok(table.get(uuid)?.is_some())
    }

    /// Read blob bytes together with their metadata.
    pub fn blob_get(&self, uuid: &str) -> Result<Option<(BlobRecord, Vec<u8>)>> {
        let txn = self.db.begin_read()?;
        let meta = txn.open_table(BLOB_META)?;
        let record: BlobRecord = match meta.get(uuid)? {
            Some(value) => decode(value.value())?,
            None => return Ok(None),
        };
        let blobs = txn.open_table(BLOBS)?;
        let bytes = match blobs.get(uuid)? {
            Some(value) => value.value().to_vec(),
            None => return Ok(None),
        };
        Ok(Some((record, bytes)))
    }

    /// Record a playback access, for cache-eviction bookkeeping.
    pub fn blob_touch(&self, uuid: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut meta = txn.open_table(BLOB_META)?;
            let updated = match meta.get(uuid)? {
                Some(value) => {
                    let mut record: BlobRecord = decode(value.value())?;
                    record.last_accessed_at = Utc::now();
                    Some(encode(&record)?)
                }
                None => None,
            };
            if let Some(data) = updated {
                meta.insert(uuid, data.as_slice())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Delete a blob and decrement its category counters by exactly the
    /// stored size. Returns whether a blob was deleted.
    pub fn blob_delete(&self, uuid: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let deleted = {
            let mut meta = txn.open_table(BLOB_META)?;
            let old: Option<BlobRecord> = meta
                .remove(uuid)?
                .map(|value| decode(value.value()))
                .transpose()?;

            let mut blobs = txn.open_table(BLOBS)?;
            blobs.remove(uuid)?;

            match old {
                Some(old) => {
                    let mut usage = txn.open_table(DISK_USAGE)?;
                    subtract_usage(&mut usage, &old.usage_category(), old.size)?;
                    true
                }
                None => false,
            }
        };
        txn.commit()?;
        Ok(deleted)
    }

    /// `(bytes, count)` for one usage category.
    pub fn disk_usage(&self, category: &str) -> Result<(u64, u64)> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(DISK_USAGE)?;
        Ok(table.get(category)?.map(|g| g.value()).unwrap_or((0, 0)))
    }

    pub fn disk_usage_all(&self) -> Result<Vec<(String, u64, u64)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(DISK_USAGE)?;
        let mut rows = Vec::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            let (bytes, count) = value.value();
            rows.push((key.value().to_string(), bytes, count));
        }
        Ok(rows)
    }

    pub fn disk_usage_total(&self) -> Result<(u64, u64)> {
        let mut bytes = 0;
        let mut count = 0;
        for (_, b, c) in self.disk_usage_all()? {
            bytes += b;
            count += c;
        }
        Ok((bytes, count))
    }
}

fn add_usage(
    table: &mut redb::Table<&str, (u64, u64)>,
    category: &str,
    size: u64,
) -> Result<()> {
    let (bytes, count) = table.get(category)?.map(|g| g.value()).unwrap_or((0, 0));
    table.insert(category, (bytes + size, count + 1))?;
    Ok(())
}

fn subtract_usage(
    table: &mut redb::Table<&str, (u64, u64)>,
    category: &str,
    size: u64,
) -> Result<()> {
    let (bytes, count) = table.get(category)?.map(|g| g.value()).unwrap_or((0, 0));
    table.insert(category, (bytes.saturating_sub(size), count.saturating_sub(1)))?;
    Ok(())
}
