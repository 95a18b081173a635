//! Authentication status.
//!
//! The core never performs login flows; it only checks and caches the
//! current session snapshot so the UI can render a sensible state offline.

use anyhow::Result;

use super::OfflineClient;
use crate::store::settings::KEY_AUTH;
use crate::store::AuthSnapshot;

impl OfflineClient {
    /// Current authentication snapshot. Offline returns the last cached
    /// snapshot, or an explicit "not authenticated" default, never an
    /// error.
    pub async fn auth_check(&self) -> Result<AuthSnapshot> {
        if self.offline() {
            return self.auth_check_offline();
        }
        match self.remote.check_user().await {
            Ok(snapshot) => {
                self.store.setting_put(KEY_AUTH, &snapshot)?;
                Ok(snapshot)
            }
            Err(e) if e.is_transport() => {
                self.note_transport_failure("auth_check", &e);
                self.auth_check_offline()
            }
            Err(e) => Err(e.into()),
        }
    }

    fn auth_check_offline(&self) -> Result<AuthSnapshot> {
        Ok(self.store.setting_get(KEY_AUTH)?.unwrap_or_default())
    }
}
