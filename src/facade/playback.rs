//! Playback state (queue index, play mode, volume).
//!
//! The cached playback state lives on the queue snapshot, so offline reads
//! and writes go through the same record the queue operations maintain.

use anyhow::Result;
use serde_json::{json, Map, Value};

use super::OfflineClient;
use crate::remote::api::PlaybackState;
use crate::store::{QueueSlot, WriteDomain};

impl OfflineClient {
    pub async fn playback_get_state(&self) -> Result<PlaybackState> {
        if self.offline() {
            return self.playback_get_state_offline();
        }
        match self.remote.playback_get_state().await {
            Ok(state) => {
                let mut snap = self.store.queue_load(QueueSlot::Current)?.unwrap_or_default();
                snap.queue_index = state.queue_index;
                snap.sca_enabled = state.sca_enabled;
                snap.play_mode = state.play_mode.clone();
                snap.volume = state.volume;
                self.store.queue_save(QueueSlot::Current, &snap)?;
                Ok(state)
            }
            Err(e) if e.is_transport() => {
                self.note_transport_failure("playback_get_state", &e);
                self.playback_get_state_offline()
            }
            Err(e) => Err(e.into()),
        }
    }

    fn playback_get_state_offline(&self) -> Result<PlaybackState> {
        let snap = self.store.queue_load(self.queue_slot())?.unwrap_or_default();
        Ok(PlaybackState {
            queue_index: snap.queue_index,
            sca_enabled: snap.sca_enabled,
            play_mode: snap.play_mode,
            volume: snap.volume,
        })
    }

    /// Partial update: only the given fields change.
    pub async fn playback_set_state(
        &self,
        queue_index: Option<usize>,
        sca_enabled: Option<bool>,
        play_mode: Option<&str>,
        volume: Option<f64>,
    ) -> Result<bool> {
        if self.offline() {
            return self.playback_set_state_offline(queue_index, sca_enabled, play_mode, volume);
        }
        match self
            .remote
            .playback_set_state(queue_index, sca_enabled, play_mode, volume)
            .await
        {
            Ok(()) => {
                self.apply_playback_state(queue_index, sca_enabled, play_mode, volume)?;
                Ok(false)
            }
            Err(e) if e.is_transport() => {
                self.note_transport_failure("playback_set_state", &e);
                self.playback_set_state_offline(queue_index, sca_enabled, play_mode, volume)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn apply_playback_state(
        &self,
        queue_index: Option<usize>,
        sca_enabled: Option<bool>,
        play_mode: Option<&str>,
        volume: Option<f64>,
    ) -> Result<()> {
        let slot = self.queue_slot();
        let mut snap = self.store.queue_load(slot)?.unwrap_or_default();
        if let Some(index) = queue_index {
            snap.queue_index = index;
        }
        if let Some(sca) = sca_enabled {
            snap.sca_enabled = sca;
        }
        if let Some(mode) = play_mode {
            snap.play_mode = mode.to_string();
        }
        if let Some(volume) = volume {
            snap.volume = volume;
        }
        self.store.queue_save(slot, &snap)?;
        Ok(())
    }

    fn playback_set_state_offline(
        &self,
        queue_index: Option<usize>,
        sca_enabled: Option<bool>,
        play_mode: Option<&str>,
        volume: Option<f64>,
    ) -> Result<bool> {
        self.apply_playback_state(queue_index, sca_enabled, play_mode, volume)?;

        if !self.preview_active() {
            let mut payload = Map::new();
            if let Some(index) = queue_index {
                payload.insert("queueIndex".into(), json!(index));
            }
            if let Some(sca) = sca_enabled {
                payload.insert("scaEnabled".into(), json!(sca));
            }
            if let Some(mode) = play_mode {
                payload.insert("playMode".into(), json!(mode));
            }
            if let Some(volume) = volume {
                payload.insert("volume".into(), json!(volume));
            }
            self.enqueue_write(WriteDomain::Playback, "setState", Value::Object(payload))?;
            return Ok(true);
        }
        Ok(false)
    }
}
