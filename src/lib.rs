//! offbeat — the offline-sync core of a personal music streaming client.
//!
//! A local cache plus a write-ahead queue: the client keeps working
//! (browse, queue, playlist edits, playback state) when the network is
//! gone, and reconciles the recorded mutations with the server when
//! connectivity returns.
//!
//! - [`store`]: embedded, versioned, multi-collection store (redb)
//! - [`state`]: observable connectivity/sync/cache-derived state
//! - [`facade`]: offline-aware routing layer, one method per operation
//! - [`sync`]: two-phase push/commit reconciliation of pending writes
//! - [`downloads`]: audio blob downloads with cooperative cancellation

pub mod config;
pub mod downloads;
pub mod error;
pub mod events;
pub mod facade;
pub mod remote;
pub mod sorting;
pub mod state;
pub mod store;
pub mod sync;

pub use config::{Config, WorkOfflineFlag};
pub use downloads::{BlobFetcher, CancelHandle, DownloadEvent, DownloadManager, HttpBlobFetcher};
pub use error::RemoteError;
pub use events::{ChangeEvent, EventBus};
pub use facade::OfflineClient;
pub use remote::api::RemoteApi;
pub use remote::{RemoteTransport, RpcClient};
pub use state::{AppState, SharedState};
pub use store::OfflineStore;
pub use sync::{SyncManager, SyncMode, SyncOutcome};

use std::sync::Arc;

use anyhow::Result;

/// Everything a client session needs, wired together from one config.
pub struct Session {
    pub client: OfflineClient,
    pub sync: SyncManager,
    pub downloads: DownloadManager,
    pub download_events: tokio::sync::mpsc::UnboundedReceiver<DownloadEvent>,
    pub state: SharedState,
    pub events: EventBus,
    pub store: Arc<OfflineStore>,
}

/// Open the store, hydrate reactive state, and wire the components the
/// way a client embeds them. Store-open failures are fatal here.
pub fn bootstrap(config: &Config) -> Result<Session> {
    let events = EventBus::new();
    let state = SharedState::new(events.clone());

    // Readable before the store opens, by design of the sidecar file.
    let flag = WorkOfflineFlag::at_default_location()?;

    let store = Arc::new(OfflineStore::open(&config.store_path()?)?);
    state.hydrate(&store, &flag)?;

    let remote = RemoteApi::new(Arc::new(RpcClient::new(&config.remote.api_base)));
    let client = OfflineClient::new(
        remote.clone(),
        store.clone(),
        state.clone(),
        events.clone(),
        flag,
    );
    let sync = SyncManager::new(
        remote.clone(),
        store.clone(),
        state.clone(),
        events.clone(),
        SyncMode::default(),
    );
    let fetcher = Arc::new(HttpBlobFetcher::new(&config.remote.stream_base));
    let (downloads, download_events) =
        DownloadManager::new(store.clone(), state.clone(), remote, fetcher);

    Ok(Session {
        client,
        sync,
        downloads,
        download_events,
        state,
        events,
        store,
    })
}
