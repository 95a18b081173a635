//! Post-sync state pull.
//!
//! After a successful write-sync the local state is never assumed
//! authoritative: the queue is re-pulled from the remote (batched by
//! cursor for large queues) and overwrites the local cache, and
//! preferences reconcile by last-write-wins.

use anyhow::Result;
use chrono::{DateTime, Utc};

use super::SyncManager;
use crate::events::ChangeEvent;
use crate::store::settings::KEY_PREFERENCES;
use crate::store::{QueueSlot, QueueSnapshot, StoredPreferences};

const PULL_BATCH: u64 = 200;

impl SyncManager {
    pub(crate) async fn pull_remote_state(&self) -> Result<()> {
        self.pull_queue().await?;
        self.reconcile_preferences().await?;
        Ok(())
    }

    /// Fetch the authoritative queue and overwrite the local cache with it.
    async fn pull_queue(&self) -> Result<()> {
        let mut songs = Vec::new();
        let mut cursor: Option<String> = None;
        let mut head: Option<crate::remote::api::QueueState> = None;

        loop {
            let state = self
                .remote
                .queue_list(cursor.as_deref(), Some(PULL_BATCH))
                .await?;
            songs.extend(state.songs.clone());
            let has_more = state.has_more;
            cursor = state.next_cursor.clone();
            if head.is_none() {
                head = Some(state);
            }
            if !has_more || cursor.is_none() {
                break;
            }
        }

        let head = head.expect("at least one page was fetched");
        self.store.song_put_many(&songs)?;
        let snapshot = QueueSnapshot {
            song_uuids: songs.iter().map(|s| s.uuid.clone()).collect(),
            queue_index: head.queue_index,
            play_mode: head.play_mode,
            sca_enabled: head.sca_enabled,
            volume: head.volume,
            device_id: head.active_device_id,
            device_seq: head.active_device_seq,
            last_synced_at: Some(Utc::now()),
        };
        self.store.queue_save(QueueSlot::Current, &snapshot)?;
        self.events.emit(ChangeEvent::QueueRestored);
        Ok(())
    }

    /// Last-write-wins between the cached preferences timestamp and the
    /// remote's reported modification time. A remote that omits the
    /// timestamp counts as the epoch and always loses to a local edit.
    async fn reconcile_preferences(&self) -> Result<()> {
        let remote = self.remote.preferences_get().await?;
        let remote_ts = remote.last_modified.unwrap_or(DateTime::UNIX_EPOCH);
        let local: Option<StoredPreferences> = self.store.setting_get(KEY_PREFERENCES)?;

        match local {
            Some(stored) if stored.updated_at > remote_ts => {
                self.remote.preferences_set(&stored.prefs).await?;
            }
            _ => {
                self.store.setting_put(
                    KEY_PREFERENCES,
                    &StoredPreferences {
                        prefs: remote.prefs,
                        updated_at: remote_ts,
                    },
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::store::Preferences;
    use crate::sync::test_util::sync_harness;
    use crate::sync::SyncMode;
    use chrono::Utc;
    use serde_json::json;

    #[tokio::test]
    async fn queue_pull_walks_cursors_and_overwrites_cache() {
        let s = sync_harness(SyncMode::Transactional);
        // Stale local queue to be replaced.
        s.h.client
            .queue_add(&["stale".to_string()], None)
            .await
            .unwrap();
        s.h.store.pending_discard_all().unwrap();

        s.h.transport.push_ok(json!({
            "success": true,
            "result": {
                "items": [{"uuid": "r1"}, {"uuid": "r2"}],
                "queueIndex": 1,
                "playMode": "shuffle",
                "nextCursor": "2",
                "hasMore": true,
            }
        }));
        s.h.transport.push_ok(json!({
            "success": true,
            "result": {"items": [{"uuid": "r3"}], "hasMore": false}
        }));
        s.h.transport.push_ok(json!({"success": true, "result": {"volume": 1.0}}));

        let mut rx = s.h.events.subscribe();
        s.manager.pull_remote_state().await.unwrap();

        let snap = s
            .h
            .store
            .queue_load(crate::store::QueueSlot::Current)
            .unwrap()
            .unwrap();
        assert_eq!(snap.song_uuids, vec!["r1", "r2", "r3"]);
        assert_eq!(snap.queue_index, 1);
        assert_eq!(snap.play_mode, "shuffle");
        assert!(snap.last_synced_at.is_some());

        // Pulled songs got metadata records.
        assert!(s.h.store.song_get("r3").unwrap().is_some());

        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(events.contains(&crate::events::ChangeEvent::QueueRestored));
    }

    #[tokio::test]
    async fn newer_local_preferences_win_and_push_upstream() {
        let s = sync_harness(SyncMode::Transactional);
        let mut prefs = Preferences::default();
        prefs.volume = 0.3;
        s.h.store
            .setting_put(
                crate::store::settings::KEY_PREFERENCES,
                &crate::store::StoredPreferences {
                    prefs: prefs.clone(),
                    updated_at: Utc::now(),
                },
            )
            .unwrap();

        // Empty queue page, then remote prefs with no lastModified: the
        // remote counts as epoch and loses.
        s.h.transport.push_ok(json!({
            "success": true,
            "result": {"items": [], "hasMore": false}
        }));
        s.h.transport.push_ok(json!({
            "success": true,
            "result": {"volume": 0.9}
        }));
        s.h.transport.push_ok(json!({"success": true, "result": {"success": true}}));

        s.manager.pull_remote_state().await.unwrap();

        let methods = s.h.transport.methods();
        assert_eq!(methods.last().unwrap(), "preferences_set");
        assert_eq!(
            s.h.transport.kwargs_of(methods.len() - 1)["volume"],
            json!(0.3)
        );
    }

    #[tokio::test]
    async fn newer_remote_preferences_overwrite_local() {
        let s = sync_harness(SyncMode::Transactional);
        let mut prefs = Preferences::default();
        prefs.volume = 0.3;
        s.h.store
            .setting_put(
                crate::store::settings::KEY_PREFERENCES,
                &crate::store::StoredPreferences {
                    prefs,
                    updated_at: Utc::now() - chrono::Duration::days(2),
                },
            )
            .unwrap();

        s.h.transport.push_ok(json!({
            "success": true,
            "result": {"items": [], "hasMore": false}
        }));
        let remote_ts = Utc::now().to_rfc3339();
        s.h.transport.push_ok(json!({
            "success": true,
            "result": {"volume": 0.9, "lastModified": remote_ts}
        }));

        s.manager.pull_remote_state().await.unwrap();

        let stored: crate::store::StoredPreferences = s
            .h
            .store
            .setting_get(crate::store::settings::KEY_PREFERENCES)
            .unwrap()
            .unwrap();
        assert_eq!(stored.prefs.volume, 0.9);

        // No upstream write happened.
        assert!(!s.h.transport.methods().contains(&"preferences_set".to_string()));
    }
}
