//! Sync manager.
//!
//! Drains the pending-write queue through a two-phase push/commit session
//! against the remote. At most one attempt runs at a time process-wide;
//! callers arriving while one is in flight await and return that attempt's
//! outcome. On commit success the batch is deleted and placeholder ids are
//! resolved everywhere; on failure the queue is preserved with retry
//! counters incremented. The entry point never returns an error: every
//! failure mode resolves to a [`SyncOutcome`] plus updated reactive state.

pub mod legacy;
pub mod pull;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::Utc;
use futures_util::FutureExt;
use serde_json::Value;
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

use crate::events::{ChangeEvent, EventBus};
use crate::remote::api::RemoteApi;
use crate::state::SharedState;
use crate::store::{OfflineStore, PendingWrite, PlaylistId, WriteDomain};

/// Which reconciliation protocol to run. Transactional is the default; the
/// per-write mode exists for servers without session/commit support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    #[default]
    Transactional,
    PerWrite,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Success { executed: u64 },
    NothingToSync,
    Failed { error: String },
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, SyncOutcome::Failed { .. })
    }
}

pub struct SyncManager {
    pub(crate) remote: RemoteApi,
    pub(crate) store: Arc<OfflineStore>,
    pub(crate) state: SharedState,
    pub(crate) events: EventBus,
    mode: SyncMode,
    /// Single-flight slot: holds a receiver for the in-flight attempt's
    /// outcome while one is running.
    inflight: Mutex<Option<watch::Receiver<Option<SyncOutcome>>>>,
}

impl SyncManager {
    pub fn new(
        remote: RemoteApi,
        store: Arc<OfflineStore>,
        state: SharedState,
        events: EventBus,
        mode: SyncMode,
    ) -> Self {
        Self {
            remote,
            store,
            state,
            events,
            mode,
            inflight: Mutex::new(None),
        }
    }

    /// Reconcile the pending queue with the remote. Concurrent callers
    /// share the in-flight attempt's outcome instead of starting a second
    /// session.
    pub async fn sync(&self) -> SyncOutcome {
        let tx = {
            let mut slot = self.inflight.lock().await;
            if let Some(rx) = slot.as_ref() {
                let mut rx = rx.clone();
                drop(slot);
                loop {
                    let settled = rx.borrow().clone();
                    if let Some(outcome) = settled {
                        return outcome;
                    }
                    if rx.changed().await.is_err() {
                        return SyncOutcome::Failed {
                            error: "sync attempt was dropped".to_string(),
                        };
                    }
                }
            }
            let (tx, rx) = watch::channel(None);
            *slot = Some(rx);
            tx
        };

        // The guard must be released on every path, panics included.
        let outcome = std::panic::AssertUnwindSafe(self.run_attempt())
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                let error = "sync attempt panicked".to_string();
                self.state.record_sync_failure(&error);
                SyncOutcome::Failed { error }
            });

        let _ = tx.send(Some(outcome.clone()));
        *self.inflight.lock().await = None;
        outcome
    }

    async fn run_attempt(&self) -> SyncOutcome {
        match self.mode {
            SyncMode::Transactional => self.run_transactional().await,
            SyncMode::PerWrite => self.run_per_write().await,
        }
    }

    async fn run_transactional(&self) -> SyncOutcome {
        let writes = match self.store.pending_all() {
            Ok(writes) => writes,
            Err(e) => return self.record_failure(&format!("cannot read pending writes: {e}")),
        };
        if writes.is_empty() {
            return SyncOutcome::NothingToSync;
        }

        let session_id = Uuid::new_v4().to_string();
        let batch_ids: Vec<u64> = writes.iter().map(|w| w.id).collect();

        // Session-scoped placeholder resolution, populated as creates are
        // pushed and consulted by later payload transforms. Rebuilt from
        // scratch every attempt.
        let mut session_map: HashMap<String, i64> = HashMap::new();
        let mut seq: u64 = 0;

        for write in &writes {
            let ops = match translate(write) {
                Ok(ops) => ops,
                Err(e) => return self.commit_failure(&batch_ids, &e.to_string()),
            };
            for (op_type, payload) in ops {
                let payload = resolve_placeholders(payload, &session_map);
                match self.remote.sync_push(&session_id, seq, &op_type, &payload).await {
                    Ok(ack) => {
                        if op_type == "playlists.create" {
                            if let (Some(token), Some(id)) = (
                                payload.get("tempId").and_then(Value::as_str),
                                ack.created_id,
                            ) {
                                session_map.insert(token.to_string(), id);
                            }
                        }
                        seq += 1;
                    }
                    Err(e) => {
                        // A rejected push aborts the whole attempt. The
                        // session is discarded server-side and the local
                        // queue stays untouched, so the same writes retry
                        // wholesale next time.
                        if let Err(discard_err) = self.remote.sync_discard(&session_id).await {
                            tracing::debug!(error = %discard_err, "session discard failed");
                        }
                        let error = format!("push of {op_type} rejected: {e}");
                        tracing::warn!(session_id = %session_id, seq, error = %error, "sync push aborted");
                        return self.record_failure(&error);
                    }
                }
            }
        }

        match self.remote.sync_commit(&session_id).await {
            Ok(commit) => match commit.failed_op {
                None => self.finish_success(&batch_ids, commit, session_map).await,
                Some(failed_op) => {
                    self.commit_failure(&batch_ids, &format!("commit failed at {failed_op}"))
                }
            },
            Err(e) => self.commit_failure(&batch_ids, &format!("commit failed: {e}")),
        }
    }

    async fn finish_success(
        &self,
        batch_ids: &[u64],
        commit: crate::remote::api::CommitResult,
        session_map: HashMap<String, i64>,
    ) -> SyncOutcome {
        // Durable placeholder resolution: rewrite every cached reference
        // now that the creates are committed.
        let mut resolved = commit.created.clone();
        for (token, id) in session_map {
            resolved.entry(token).or_insert(id);
        }
        for (token, server_id) in &resolved {
            match token.parse::<PlaylistId>() {
                Ok(PlaylistId::Local(t)) => {
                    if let Err(e) = self.store.playlist_resolve_placeholder(t, *server_id) {
                        tracing::warn!(token = %token, error = %e, "placeholder resolution failed");
                    }
                }
                _ => tracing::debug!(token = %token, "ignoring non-placeholder resolution token"),
            }
        }

        if let Err(e) = self.store.pending_delete_batch(batch_ids) {
            // The remote committed but the local queue couldn't be
            // cleared; surface as failure so the user can intervene.
            return self.record_failure(&format!("commit landed but queue cleanup failed: {e}"));
        }

        // Writes enqueued while this attempt was in flight may still
        // reference a placeholder we just resolved.
        for (token, server_id) in &resolved {
            if let Err(e) = self.store.pending_resolve_playlist_refs(token, *server_id) {
                tracing::warn!(token = %token, error = %e, "queued-write placeholder rewrite failed");
            }
        }

        let now = Utc::now();
        if let Err(e) = self.store.set_last_sync_at(now) {
            tracing::warn!(error = %e, "failed to persist last sync time");
        }
        let count = self.store.pending_count().unwrap_or(0);
        self.state.set_pending_write_count(count);
        self.state.record_sync_success(now);
        self.events.emit(ChangeEvent::PlaylistsChanged);

        // Local state is never assumed authoritative after a sync: re-pull
        // the queue and reconcile preferences. Pull problems don't demote
        // the committed sync to a failure.
        if let Err(e) = self.pull_remote_state().await {
            tracing::warn!(error = %e, "post-sync state pull failed");
        }

        SyncOutcome::Success {
            executed: commit.executed,
        }
    }

    /// Commit-shaped failure: the batch stays queued with retry counters
    /// incremented exactly once each.
    fn commit_failure(&self, batch_ids: &[u64], error: &str) -> SyncOutcome {
        if let Err(e) = self.store.pending_bump_retries(batch_ids) {
            tracing::warn!(error = %e, "failed to bump retry counters");
        }
        self.record_failure(error)
    }

    /// Failure that leaves the queue completely untouched.
    fn record_failure(&self, error: &str) -> SyncOutcome {
        self.state.record_sync_failure(error);
        SyncOutcome::Failed {
            error: error.to_string(),
        }
    }
}

/// Translate a pending write into the remote operation(s) it pushes.
///
/// The only one-to-many case is `createFromQueue`, which splits into a
/// create carrying the placeholder correlation token followed by a batch
/// add addressed to that same placeholder, so the remote can resolve the
/// placeholder before applying the add, all inside one atomic session.
pub(crate) fn translate(write: &PendingWrite) -> Result<Vec<(String, Value)>> {
    if write.domain == WriteDomain::Playlists && write.operation == "createFromQueue" {
        let payload = &write.payload;
        let temp_id = payload
            .get("tempId")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("createFromQueue write is missing its tempId"))?;
        let create = serde_json::json!({
            "tempId": temp_id,
            "name": payload.get("name").cloned().unwrap_or_default(),
            "description": payload.get("description").cloned().unwrap_or_default(),
            "isPublic": payload.get("isPublic").cloned().unwrap_or(Value::Bool(false)),
        });
        let mut ops = vec![("playlists.create".to_string(), create)];

        let songs = payload
            .get("songUuids")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if !songs.is_empty() {
            ops.push((
                "playlists.addSongsBatch".to_string(),
                serde_json::json!({ "playlistId": temp_id, "songUuids": songs }),
            ));
        }
        return Ok(ops);
    }

    let known = matches!(
        (write.domain, write.operation.as_str()),
        (WriteDomain::Queue, "add" | "remove" | "clear" | "setIndex" | "reorder" | "sort")
            | (
                WriteDomain::Playlists,
                "create"
                    | "delete"
                    | "addSong"
                    | "addSongsBatch"
                    | "removeSong"
                    | "removeSongs"
                    | "reorder"
                    | "sort"
            )
            | (WriteDomain::Preferences, "set")
            | (WriteDomain::EqPresets, "save" | "delete")
            | (WriteDomain::Playback, "setState")
            | (WriteDomain::History, "record")
    );
    if !known {
        return Err(anyhow!(
            "unknown pending write operation {}.{}",
            write.domain.as_str(),
            write.operation
        ));
    }
    Ok(vec![(
        format!("{}.{}", write.domain.as_str(), write.operation),
        write.payload.clone(),
    )])
}

/// Substitute placeholder playlist references already resolved earlier in
/// this session. The `tempId` correlation token is left alone; the server
/// resolves it at commit time.
pub(crate) fn resolve_placeholders(mut payload: Value, session_map: &HashMap<String, i64>) -> Value {
    if session_map.is_empty() {
        return payload;
    }
    if let Some(obj) = payload.as_object_mut() {
        for key in ["playlistId", "playlist_id"] {
            let resolved = obj
                .get(key)
                .and_then(Value::as_str)
                .filter(|s| s.starts_with("pending-"))
                .and_then(|s| session_map.get(s))
                .copied();
            if let Some(id) = resolved {
                obj.insert(key.to_string(), Value::from(id));
            }
        }
    }
    payload
}


#[cfg(test)]
mod tests {
    use super::test_util::{script_pull, sync_harness};
    use super::*;
    use serde_json::json;

    fn uuids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn empty_queue_is_trivial_success() {
        let s = sync_harness(SyncMode::Transactional);
        let outcome = s.manager.sync().await;
        assert_eq!(outcome, SyncOutcome::NothingToSync);
        assert_eq!(s.h.transport.call_count(), 0);
    }

    #[tokio::test]
    async fn successful_commit_clears_queue_and_resolves_placeholders() {
        let s = sync_harness(SyncMode::Transactional);

        // Offline: create a playlist, then add songs to it (Scenario B+C).
        let created = s.h.client.playlists_create("Road Trip", "").await.unwrap();
        s.h.client
            .playlists_add_songs_batch(&created.id, &uuids(&["uuidA", "uuidB"]))
            .await
            .unwrap();
        assert_eq!(s.h.state.pending_write_count(), 2);

        // Reconnect; the remote accepts both pushes and commits.
        s.h.state.set_online(true);
        s.h.transport.push_ok(json!({"success": true, "result": {"success": true}}));
        s.h.transport.push_ok(json!({"success": true, "result": {"success": true}}));
        let mut created_map = serde_json::Map::new();
        created_map.insert(created.id.as_key(), json!(42));
        s.h.transport.push_ok(json!({
            "success": true,
            "result": {"executed": 2, "failed_op": null, "created": created_map}
        }));
        script_pull(&s.h.transport, json!([{"uuid": "uuidA"}, {"uuid": "uuidB"}]));

        let outcome = s.manager.sync().await;
        assert_eq!(outcome, SyncOutcome::Success { executed: 2 });

        // Scenario D: queue drained, failure flag clear, placeholder
        // rewritten everywhere.
        assert_eq!(s.h.store.pending_count().unwrap(), 0);
        assert_eq!(s.h.state.pending_write_count(), 0);
        let snap = s.h.state.snapshot();
        assert!(!snap.sync_failed);
        assert!(snap.last_sync_at.is_some());

        assert!(s.h.store.playlist_get(&created.id).unwrap().is_none());
        let resolved = s
            .h
            .store
            .playlist_get(&PlaylistId::Remote(42))
            .unwrap()
            .unwrap();
        assert_eq!(resolved.song_uuids, vec!["uuidA", "uuidB"]);

        // The pushes went out in creation order with the right op names.
        let methods = s.h.transport.methods();
        assert_eq!(methods[0], "sync_push");
        assert_eq!(s.h.transport.kwargs_of(0)["op_type"], "playlists.create");
        assert_eq!(s.h.transport.kwargs_of(0)["seq"], 0);
        assert_eq!(s.h.transport.kwargs_of(1)["op_type"], "playlists.addSongsBatch");
        assert_eq!(s.h.transport.kwargs_of(1)["seq"], 1);
        assert_eq!(methods[2], "sync_commit");
    }

    #[tokio::test]
    async fn commit_failure_preserves_queue_and_bumps_retries_once() {
        let s = sync_harness(SyncMode::Transactional);
        s.h.client.queue_add(&uuids(&["u1"]), None).await.unwrap();
        s.h.client.queue_add(&uuids(&["u2"]), None).await.unwrap();

        s.h.state.set_online(true);
        s.h.transport.push_ok(json!({"success": true, "result": {"success": true}}));
        s.h.transport.push_ok(json!({"success": true, "result": {"success": true}}));
        s.h.transport
            .push_err(crate::error::RemoteError::Api("storage full".to_string()));

        let outcome = s.manager.sync().await;
        assert!(!outcome.is_success());

        // Scenario E: nothing deleted, every write bumped exactly once,
        // failure recorded with the returned error text.
        let writes = s.h.store.pending_all().unwrap();
        assert_eq!(writes.len(), 2);
        assert!(writes.iter().all(|w| w.retry_count == 1));

        let snap = s.h.state.snapshot();
        assert!(snap.sync_failed);
        assert!(snap.sync_error.as_deref().unwrap().contains("storage full"));
        assert!(snap.sync_failed_at.is_some());
    }

    #[tokio::test]
    async fn commit_failed_op_counts_as_commit_failure() {
        let s = sync_harness(SyncMode::Transactional);
        s.h.client.queue_add(&uuids(&["u1"]), None).await.unwrap();

        s.h.state.set_online(true);
        s.h.transport.push_ok(json!({"success": true, "result": {"success": true}}));
        s.h.transport.push_ok(json!({
            "success": true,
            "result": {"executed": 0, "failed_op": "queue.add"}
        }));

        let outcome = s.manager.sync().await;
        assert!(!outcome.is_success());
        let writes = s.h.store.pending_all().unwrap();
        assert_eq!(writes[0].retry_count, 1);
    }

    #[tokio::test]
    async fn push_rejection_aborts_without_touching_retries() {
        let s = sync_harness(SyncMode::Transactional);
        s.h.client.queue_add(&uuids(&["u1"]), None).await.unwrap();
        s.h.client.queue_add(&uuids(&["u2"]), None).await.unwrap();

        s.h.state.set_online(true);
        s.h.transport.push_ok(json!({"success": true, "result": {"success": true}}));
        s.h.transport
            .push_err(crate::error::RemoteError::Api("bad payload".to_string()));
        // discard answer
        s.h.transport.push_ok(json!({"success": true, "result": {"discarded": 2}}));

        let outcome = s.manager.sync().await;
        assert!(!outcome.is_success());

        // Queue untouched: same writes, no retry increments, so the whole
        // batch retries next attempt.
        let writes = s.h.store.pending_all().unwrap();
        assert_eq!(writes.len(), 2);
        assert!(writes.iter().all(|w| w.retry_count == 0));

        // The session was discarded, not committed.
        let methods = s.h.transport.methods();
        assert!(methods.contains(&"sync_discard".to_string()));
        assert!(!methods.contains(&"sync_commit".to_string()));
    }

    #[tokio::test]
    async fn concurrent_syncs_share_one_session() {
        let s = sync_harness(SyncMode::Transactional);
        s.h.client.queue_add(&uuids(&["u1"]), None).await.unwrap();

        s.h.state.set_online(true);
        s.h.transport.set_yield(3);
        s.h.transport.push_ok(json!({"success": true, "result": {"success": true}}));
        s.h.transport.push_ok(json!({
            "success": true,
            "result": {"executed": 1, "failed_op": null}
        }));
        script_pull(&s.h.transport, json!([]));

        let (a, b) = tokio::join!(s.manager.sync(), s.manager.sync());
        assert_eq!(a, b);
        assert!(a.is_success());

        // Exactly one commit, and every push used the same session id.
        let methods = s.h.transport.methods();
        let commits = methods.iter().filter(|m| *m == "sync_commit").count();
        assert_eq!(commits, 1);
        let calls = s.h.transport.calls.lock().unwrap();
        let session_ids: std::collections::HashSet<String> = calls
            .iter()
            .filter(|c| c.method.starts_with("sync_"))
            .map(|c| c.kwargs["session_id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(session_ids.len(), 1);
    }

    #[tokio::test]
    async fn replayed_queue_mutations_push_in_creation_order() {
        let s = sync_harness(SyncMode::Transactional);

        // A realistic offline editing session.
        s.h.client
            .queue_add(&uuids(&["a", "b", "c"]), None)
            .await
            .unwrap();
        s.h.client.queue_remove(&[1]).await.unwrap();
        s.h.client.queue_reorder(0, 1).await.unwrap();

        s.h.state.set_online(true);
        for _ in 0..3 {
            s.h.transport.push_ok(json!({"success": true, "result": {"success": true}}));
        }
        s.h.transport.push_ok(json!({
            "success": true,
            "result": {"executed": 3, "failed_op": null}
        }));
        script_pull(&s.h.transport, json!([{"uuid": "c"}, {"uuid": "a"}]));

        let outcome = s.manager.sync().await;
        assert!(outcome.is_success());

        // Replay order matches mutation order, seq strictly increasing.
        let ops: Vec<(String, u64)> = {
            let calls = s.h.transport.calls.lock().unwrap();
            calls
                .iter()
                .filter(|c| c.method == "sync_push")
                .map(|c| {
                    (
                        c.kwargs["op_type"].as_str().unwrap().to_string(),
                        c.kwargs["seq"].as_u64().unwrap(),
                    )
                })
                .collect()
        };
        assert_eq!(
            ops,
            vec![
                ("queue.add".to_string(), 0),
                ("queue.remove".to_string(), 1),
                ("queue.reorder".to_string(), 2),
            ]
        );

        // The authoritative pull overwrote the local cache.
        let snap = s
            .h
            .store
            .queue_load(crate::store::QueueSlot::Current)
            .unwrap()
            .unwrap();
        assert_eq!(snap.song_uuids, vec!["c", "a"]);
    }

    #[tokio::test]
    async fn session_map_resolves_references_between_pushes() {
        let s = sync_harness(SyncMode::Transactional);
        let created = s.h.client.playlists_create("Mix", "").await.unwrap();
        s.h.client
            .playlists_add_songs_batch(&created.id, &uuids(&["x"]))
            .await
            .unwrap();

        s.h.state.set_online(true);
        // This server resolves creates eagerly: the push ack carries the id.
        s.h.transport.push_ok(json!({"success": true, "result": {"success": true, "id": 7}}));
        s.h.transport.push_ok(json!({"success": true, "result": {"success": true}}));
        s.h.transport.push_ok(json!({
            "success": true,
            "result": {"executed": 2, "failed_op": null}
        }));
        script_pull(&s.h.transport, json!([]));

        let outcome = s.manager.sync().await;
        assert!(outcome.is_success());

        // The batch add was pushed with the resolved numeric id.
        assert_eq!(s.h.transport.kwargs_of(1)["payload"]["playlistId"], json!(7));

        // And the durable rewrite used the same resolution even though the
        // commit result carried no created map.
        assert!(s
            .h
            .store
            .playlist_get(&PlaylistId::Remote(7))
            .unwrap()
            .is_some());
    }

    #[test]
    fn translate_splits_create_from_queue() {
        let write = PendingWrite {
            id: 1,
            domain: WriteDomain::Playlists,
            operation: "createFromQueue".to_string(),
            payload: json!({
                "tempId": "pending-5",
                "name": "Mix",
                "description": "",
                "isPublic": false,
                "songUuids": ["a", "b"],
            }),
            created_at: Utc::now(),
            retry_count: 0,
        };

        let ops = translate(&write).unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].0, "playlists.create");
        assert_eq!(ops[0].1["tempId"], "pending-5");
        assert_eq!(ops[1].0, "playlists.addSongsBatch");
        assert_eq!(ops[1].1["playlistId"], "pending-5");
        assert_eq!(ops[1].1["songUuids"], json!(["a", "b"]));
    }

    #[test]
    fn translate_rejects_unknown_operations() {
        let write = PendingWrite {
            id: 1,
            domain: WriteDomain::Queue,
            operation: "frobnicate".to_string(),
            payload: json!({}),
            created_at: Utc::now(),
            retry_count: 0,
        };
        assert!(translate(&write).is_err());
    }

    #[test]
    fn placeholder_resolution_leaves_temp_id_alone() {
        let mut map = HashMap::new();
        map.insert("pending-5".to_string(), 42i64);

        let payload = resolve_placeholders(
            json!({"playlistId": "pending-5", "tempId": "pending-5"}),
            &map,
        );
        assert_eq!(payload["playlistId"], json!(42));
        assert_eq!(payload["tempId"], "pending-5");

        // Unresolved placeholders pass through for server-side resolution.
        let payload = resolve_placeholders(json!({"playlistId": "pending-9"}), &map);
        assert_eq!(payload["playlistId"], "pending-9");
    }
}
