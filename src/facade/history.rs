//! Playback history recording.

use anyhow::Result;
use serde_json::json;

use super::OfflineClient;
use crate::store::WriteDomain;

impl OfflineClient {
    /// Record a play. Offline plays are queued and reach the remote on the
    /// next sync; history is never read back from the cache.
    pub async fn history_record(
        &self,
        song_uuid: &str,
        duration_seconds: u32,
        skipped: bool,
        source: Option<&str>,
    ) -> Result<bool> {
        if self.offline() {
            return self.history_record_offline(song_uuid, duration_seconds, skipped, source);
        }
        match self
            .remote
            .history_record(song_uuid, duration_seconds, skipped, source)
            .await
        {
            Ok(()) => Ok(false),
            Err(e) if e.is_transport() => {
                self.note_transport_failure("history_record", &e);
                self.history_record_offline(song_uuid, duration_seconds, skipped, source)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn history_record_offline(
        &self,
        song_uuid: &str,
        duration_seconds: u32,
        skipped: bool,
        source: Option<&str>,
    ) -> Result<bool> {
        self.enqueue_write(
            WriteDomain::History,
            "record",
            json!({
                "songUuid": song_uuid,
                "durationSeconds": duration_seconds,
                "skipped": skipped,
                "source": source,
            }),
        )?;
        Ok(true)
    }
}
