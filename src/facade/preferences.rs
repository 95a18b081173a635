//! User preferences and EQ presets.

use anyhow::Result;
use chrono::Utc;
use serde_json::json;

use super::OfflineClient;
use crate::store::settings::{KEY_EQ_PRESETS, KEY_PREFERENCES};
use crate::store::{EqPreset, Preferences, StoredPreferences, WriteDomain};

#[derive(Debug, Clone)]
pub struct PreferencesOutcome {
    pub prefs: Preferences,
    pub queued: bool,
}

impl OfflineClient {
    pub(crate) fn cached_preferences(&self) -> Result<Option<StoredPreferences>> {
        self.store.setting_get(KEY_PREFERENCES)
    }

    /// Current preferences. Offline reads return the cached snapshot or the
    /// server defaults; absence is never an error.
    pub async fn preferences_get(&self) -> Result<Preferences> {
        if self.offline() {
            return self.preferences_get_offline();
        }
        match self.remote.preferences_get().await {
            Ok(remote) => {
                // Mirror with the remote's own modification time so
                // last-write-wins comparisons stay honest. A missing
                // timestamp counts as the epoch.
                let updated_at = remote.last_modified.unwrap_or(chrono::DateTime::UNIX_EPOCH);
                self.store.setting_put(
                    KEY_PREFERENCES,
                    &StoredPreferences {
                        prefs: remote.prefs.clone(),
                        updated_at,
                    },
                )?;
                Ok(remote.prefs)
            }
            Err(e) if e.is_transport() => {
                self.note_transport_failure("preferences_get", &e);
                self.preferences_get_offline()
            }
            Err(e) => Err(e.into()),
        }
    }

    fn preferences_get_offline(&self) -> Result<Preferences> {
        Ok(self
            .cached_preferences()?
            .map(|stored| stored.prefs)
            .unwrap_or_default())
    }

    pub async fn preferences_set(&self, prefs: &Preferences) -> Result<PreferencesOutcome> {
        if self.offline() {
            return self.preferences_set_offline(prefs);
        }
        match self.remote.preferences_set(prefs).await {
            Ok(()) => {
                self.store.setting_put(
                    KEY_PREFERENCES,
                    &StoredPreferences {
                        prefs: prefs.clone(),
                        updated_at: Utc::now(),
                    },
                )?;
                Ok(PreferencesOutcome {
                    prefs: prefs.clone(),
                    queued: false,
                })
            }
            Err(e) if e.is_transport() => {
                self.note_transport_failure("preferences_set", &e);
                self.preferences_set_offline(prefs)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn preferences_set_offline(&self, prefs: &Preferences) -> Result<PreferencesOutcome> {
        self.store.setting_put(
            KEY_PREFERENCES,
            &StoredPreferences {
                prefs: prefs.clone(),
                updated_at: Utc::now(),
            },
        )?;
        self.enqueue_write(
            WriteDomain::Preferences,
            "set",
            serde_json::to_value(prefs)?,
        )?;
        Ok(PreferencesOutcome {
            prefs: prefs.clone(),
            queued: true,
        })
    }

    // ── EQ presets ───────────────────────────────────────────────────

    fn cached_eq_presets(&self) -> Result<Vec<EqPreset>> {
        Ok(self.store.setting_get(KEY_EQ_PRESETS)?.unwrap_or_default())
    }

    pub async fn eq_presets_list(&self) -> Result<Vec<EqPreset>> {
        if self.offline() {
            return self.cached_eq_presets();
        }
        match self.remote.eq_presets_list().await {
            Ok(presets) => {
                self.store.setting_put(KEY_EQ_PRESETS, &presets)?;
                Ok(presets)
            }
            Err(e) if e.is_transport() => {
                self.note_transport_failure("eq_presets_list", &e);
                self.cached_eq_presets()
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn eq_presets_save(&self, preset: &EqPreset) -> Result<bool> {
        if self.offline() {
            return self.eq_presets_save_offline(preset);
        }
        match self.remote.eq_presets_save(preset).await {
            Ok(()) => {
                self.upsert_cached_preset(preset)?;
                Ok(false)
            }
            Err(e) if e.is_transport() => {
                self.note_transport_failure("eq_presets_save", &e);
                self.eq_presets_save_offline(preset)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn eq_presets_save_offline(&self, preset: &EqPreset) -> Result<bool> {
        self.upsert_cached_preset(preset)?;
        self.enqueue_write(
            WriteDomain::EqPresets,
            "save",
            json!({ "uuid": preset.uuid, "name": preset.name, "bands": preset.bands }),
        )?;
        Ok(true)
    }

    fn upsert_cached_preset(&self, preset: &EqPreset) -> Result<()> {
        let mut presets = self.cached_eq_presets()?;
        presets.retain(|p| p.uuid != preset.uuid);
        presets.push(preset.clone());
        self.store.setting_put(KEY_EQ_PRESETS, &presets)?;
        Ok(())
    }

    pub async fn eq_presets_delete(&self, uuid: &str) -> Result<bool> {
        if self.offline() {
            return self.eq_presets_delete_offline(uuid);
        }
        match self.remote.eq_presets_delete(uuid).await {
            Ok(()) => {
                self.remove_cached_preset(uuid)?;
                Ok(false)
            }
            Err(e) if e.is_transport() => {
                self.note_transport_failure("eq_presets_delete", &e);
                self.eq_presets_delete_offline(uuid)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn eq_presets_delete_offline(&self, uuid: &str) -> Result<bool> {
        self.remove_cached_preset(uuid)?;
        self.enqueue_write(WriteDomain::EqPresets, "delete", json!({ "uuid": uuid }))?;
        Ok(true)
    }

    fn remove_cached_preset(&self, uuid: &str) -> Result<()> {
        let mut presets = self.cached_eq_presets()?;
        presets.retain(|p| p.uuid != uuid);
        self.store.setting_put(KEY_EQ_PRESETS, &presets)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facade::test_util::harness;

    #[tokio::test]
    async fn offline_get_returns_defaults_without_cache() {
        let h = harness(false);
        let prefs = h.client.preferences_get().await.unwrap();
        assert_eq!(prefs, Preferences::default());
        assert_eq!(h.state.pending_write_count(), 0);
    }

    #[tokio::test]
    async fn offline_set_caches_and_queues() {
        let h = harness(false);
        let mut prefs = Preferences::default();
        prefs.volume = 0.4;
        prefs.dark_mode = true;

        let outcome = h.client.preferences_set(&prefs).await.unwrap();
        assert!(outcome.queued);

        // A subsequent offline read observes the update.
        let read_back = h.client.preferences_get().await.unwrap();
        assert_eq!(read_back.volume, 0.4);
        assert!(read_back.dark_mode);

        let pending = h.store.pending_all().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].domain, WriteDomain::Preferences);
        assert_eq!(pending[0].operation, "set");
        assert_eq!(pending[0].payload["volume"], 0.4);

        // The local timestamp is fresh, so a later LWW pass prefers it.
        let stored = h.client.cached_preferences().unwrap().unwrap();
        assert!(stored.updated_at > chrono::DateTime::UNIX_EPOCH);
    }

    #[tokio::test]
    async fn online_get_mirrors_with_remote_timestamp() {
        let h = harness(true);
        h.transport.push_ok(serde_json::json!({
            "success": true,
            "result": {"volume": 0.9, "lastModified": "2026-01-05T00:00:00Z"}
        }));

        let prefs = h.client.preferences_get().await.unwrap();
        assert_eq!(prefs.volume, 0.9);

        let stored = h.client.cached_preferences().unwrap().unwrap();
        assert_eq!(
            stored.updated_at,
            "2026-01-05T00:00:00Z".parse::<chrono::DateTime<Utc>>().unwrap()
        );
    }

    #[tokio::test]
    async fn eq_presets_offline_lifecycle() {
        let h = harness(false);
        assert!(h.client.eq_presets_list().await.unwrap().is_empty());

        let preset = EqPreset {
            uuid: "p1".to_string(),
            name: "Bass Boost".to_string(),
            bands: vec![6.0, 3.0, 0.0, 0.0, 0.0],
        };
        assert!(h.client.eq_presets_save(&preset).await.unwrap());

        let listed = h.client.eq_presets_list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "Bass Boost");

        assert!(h.client.eq_presets_delete("p1").await.unwrap());
        assert!(h.client.eq_presets_list().await.unwrap().is_empty());

        let ops: Vec<String> = h
            .store
            .pending_all()
            .unwrap()
            .iter()
            .map(|w| w.operation.clone())
            .collect();
        assert_eq!(ops, vec!["save", "delete"]);
    }
}
