//! Blob downloads for offline playback.
//!
//! Downloads are not part of the write-sync queue: cancelling one leaves
//! whatever already landed in the store coherent (a playlist record
//! updated for the songs downloaded so far is retained) and never creates
//! a pending write. Cancellation is cooperative, checked between songs and
//! between body chunks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use crate::remote::api::RemoteApi;
use crate::state::SharedState;
use crate::store::{
    BlobRecord, FolderRecord, FolderSelector, OfflineStore, PlaylistId, PlaylistRecord, SongRecord,
};

#[derive(Debug, Clone)]
pub enum DownloadEvent {
    Started { uuid: String, title: String },
    Progress { uuid: String, downloaded: u64, total: u64 },
    Completed { uuid: String, size: u64 },
    Failed { uuid: String, error: String },
    Cancelled { context: String },
    PlaylistProgress { playlist: String, downloaded: u32, total: u32 },
}

/// Cooperative cancellation flag shared with the caller.
#[derive(Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

pub struct FetchedBlob {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Transport seam for fetching raw audio bytes. Returns `Ok(None)` when
/// the fetch was aborted by the cancel handle.
#[async_trait]
pub trait BlobFetcher: Send + Sync {
    async fn fetch(
        &self,
        uuid: &str,
        cancel: &CancelHandle,
        progress: &(dyn Fn(u64, u64) + Send + Sync),
    ) -> Result<Option<FetchedBlob>>;
}

/// Streams blobs over HTTP from the configured streaming base path.
pub struct HttpBlobFetcher {
    http: reqwest::Client,
    stream_base: String,
}

impl HttpBlobFetcher {
    pub fn new(stream_base: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            stream_base: stream_base.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl BlobFetcher for HttpBlobFetcher {
    async fn fetch(
        &self,
        uuid: &str,
        cancel: &CancelHandle,
        progress: &(dyn Fn(u64, u64) + Send + Sync),
    ) -> Result<Option<FetchedBlob>> {
        let url = format!("{}/{uuid}", self.stream_base);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("failed to fetch {url}"))?
            .error_for_status()
            .context("stream endpoint rejected the request")?;

        let mime_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("audio/mpeg")
            .to_string();
        let total = resp.content_length().unwrap_or(0);

        let mut bytes = Vec::new();
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            // Dropping the stream aborts the in-flight fetch.
            if cancel.is_cancelled() {
                return Ok(None);
            }
            let chunk = chunk.context("stream read failed")?;
            bytes.extend_from_slice(&chunk);
            progress(bytes.len() as u64, total);
        }
        Ok(Some(FetchedBlob { bytes, mime_type }))
    }
}

pub struct DownloadManager {
    store: Arc<OfflineStore>,
    state: SharedState,
    remote: RemoteApi,
    fetcher: Arc<dyn BlobFetcher>,
    event_tx: mpsc::UnboundedSender<DownloadEvent>,
}

impl DownloadManager {
    pub fn new(
        store: Arc<OfflineStore>,
        state: SharedState,
        remote: RemoteApi,
        fetcher: Arc<dyn BlobFetcher>,
    ) -> (Self, mpsc::UnboundedReceiver<DownloadEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                store,
                state,
                remote,
                fetcher,
                event_tx,
            },
            event_rx,
        )
    }

    fn emit(&self, event: DownloadEvent) {
        let _ = self.event_tx.send(event);
    }

    fn refresh_offline_sets(&self) -> Result<()> {
        let uuids = self
            .store
            .blob_metas_all()?
            .into_iter()
            .map(|b| b.uuid)
            .collect();
        self.state.set_offline_song_uuids(uuids);
        self.state.set_offline_folders(self.store.folders_all()?);
        self.state.refresh_browse_index(&self.store.songs_all()?);
        Ok(())
    }

    /// Download one song's audio, tagged with its provenance. Returns
    /// false when cancelled before completion.
    pub async fn download_song(
        &self,
        song: &SongRecord,
        source: Option<&str>,
        cancel: &CancelHandle,
    ) -> Result<bool> {
        self.store.song_put(song)?;
        let done = self
            .fetch_and_store(song, &[], &[], source, cancel)
            .await?;
        if done {
            self.refresh_offline_sets()?;
        }
        Ok(done)
    }

    async fn fetch_and_store(
        &self,
        song: &SongRecord,
        playlist_ids: &[String],
        folder_ids: &[String],
        source: Option<&str>,
        cancel: &CancelHandle,
    ) -> Result<bool> {
        if cancel.is_cancelled() {
            self.emit(DownloadEvent::Cancelled {
                context: song.uuid.clone(),
            });
            return Ok(false);
        }

        self.emit(DownloadEvent::Started {
            uuid: song.uuid.clone(),
            title: song.title.clone(),
        });

        let uuid = song.uuid.clone();
        let tx = self.event_tx.clone();
        let progress = move |downloaded: u64, total: u64| {
            let _ = tx.send(DownloadEvent::Progress {
                uuid: uuid.clone(),
                downloaded,
                total,
            });
        };

        match self.fetcher.fetch(&song.uuid, cancel, &progress).await {
            Ok(Some(fetched)) => {
                let size = fetched.bytes.len() as u64;
                let now = Utc::now();
                let record = BlobRecord {
                    uuid: song.uuid.clone(),
                    mime_type: fetched.mime_type,
                    size,
                    playlist_ids: playlist_ids.to_vec(),
                    folder_ids: folder_ids.to_vec(),
                    downloaded_at: now,
                    last_accessed_at: now,
                    download_source: source.map(str::to_string),
                };
                self.store.blob_save(&record, &fetched.bytes)?;
                self.emit(DownloadEvent::Completed {
                    uuid: song.uuid.clone(),
                    size,
                });
                Ok(true)
            }
            Ok(None) => {
                self.emit(DownloadEvent::Cancelled {
                    context: song.uuid.clone(),
                });
                Ok(false)
            }
            Err(e) => {
                self.emit(DownloadEvent::Failed {
                    uuid: song.uuid.clone(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Download a playlist for offline playback. Cancellation keeps the
    /// record coherent for whatever already landed.
    pub async fn download_playlist(
        &self,
        id: &PlaylistId,
        cancel: &CancelHandle,
    ) -> Result<PlaylistRecord> {
        if self.state.should_use_offline() {
            return Err(anyhow!("cannot start a download while offline"));
        }

        // Resolve the full song list from the remote, batched by cursor.
        let mut songs = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .remote
                .playlists_get_songs(id, cursor.as_deref(), Some(200))
                .await
                .map_err(|e| anyhow!("cannot list playlist songs: {e}"))?;
            songs.extend(page.items);
            cursor = page.next_cursor.clone();
            if !page.has_more || cursor.is_none() {
                break;
            }
        }
        self.store.song_put_many(&songs)?;

        let name = self
            .state
            .snapshot()
            .offline_playlists
            .iter()
            .find(|p| p.id == *id)
            .map(|p| p.name.clone())
            .unwrap_or_else(|| id.to_string());

        let mut record = self.store.playlist_get(id)?.unwrap_or(PlaylistRecord {
            id: id.clone(),
            name,
            description: String::new(),
            song_uuids: Vec::new(),
            downloaded_bytes: 0,
            downloaded_songs: 0,
            total_songs: 0,
            complete: false,
        });
        record.song_uuids = songs.iter().map(|s| s.uuid.clone()).collect();
        record.total_songs = songs.len() as u32;
        record.downloaded_songs = 0;
        record.downloaded_bytes = 0;
        record.complete = false;
        self.store.playlist_put(&record)?;

        let key = id.as_key();
        for song in &songs {
            if cancel.is_cancelled() {
                self.emit(DownloadEvent::Cancelled {
                    context: key.clone(),
                });
                break;
            }

            let already = self.store.blob_meta(&song.uuid)?;
            let stored = match already {
                Some(meta) => {
                    record.downloaded_bytes += meta.size;
                    true
                }
                None => {
                    match self
                        .fetch_and_store(song, &[key.clone()], &[], None, cancel)
                        .await
                    {
                        Ok(true) => {
                            if let Some(meta) = self.store.blob_meta(&song.uuid)? {
                                record.downloaded_bytes += meta.size;
                            }
                            true
                        }
                        Ok(false) => break,
                        Err(e) => {
                            tracing::warn!(uuid = %song.uuid, error = %e, "song download failed");
                            false
                        }
                    }
                }
            };
            if stored {
                record.downloaded_songs += 1;
            }

            // Persist progress after every song so a cancelled or crashed
            // download leaves an accurate record behind.
            record.complete = record.downloaded_songs == record.total_songs;
            self.store.playlist_put(&record)?;
            self.emit(DownloadEvent::PlaylistProgress {
                playlist: key.clone(),
                downloaded: record.downloaded_songs,
                total: record.total_songs,
            });
        }

        self.refresh_offline_sets()?;
        Ok(record)
    }

    /// Download a set of songs as an offline folder (selected by path or
    /// by filter). Re-running the same selector updates the same folder.
    pub async fn download_folder(
        &self,
        selector: &FolderSelector,
        songs: &[SongRecord],
        cancel: &CancelHandle,
    ) -> Result<FolderRecord> {
        if self.state.should_use_offline() {
            return Err(anyhow!("cannot start a download while offline"));
        }
        self.store.song_put_many(songs)?;

        let folder_id = selector.id();
        let mut stored_uuids = Vec::new();
        let mut total_bytes = 0u64;

        for song in songs {
            if cancel.is_cancelled() {
                self.emit(DownloadEvent::Cancelled {
                    context: folder_id.clone(),
                });
                break;
            }
            let stored = match self.store.blob_meta(&song.uuid)? {
                Some(_) => true,
                None => {
                    match self
                        .fetch_and_store(song, &[], &[folder_id.clone()], None, cancel)
                        .await
                    {
                        Ok(done) => {
                            if !done {
                                break;
                            }
                            true
                        }
                        Err(e) => {
                            tracing::warn!(uuid = %song.uuid, error = %e, "song download failed");
                            false
                        }
                    }
                }
            };
            if stored {
                if let Some(meta) = self.store.blob_meta(&song.uuid)? {
                    total_bytes += meta.size;
                }
                stored_uuids.push(song.uuid.clone());
            }
        }

        let record = self
            .store
            .folder_upsert(selector, &stored_uuids, total_bytes)?;
        self.refresh_offline_sets()?;
        Ok(record)
    }

    /// Remove a downloaded blob and its disk accounting.
    pub fn delete_download(&self, uuid: &str) -> Result<bool> {
        let deleted = self.store.blob_delete(uuid)?;
        if deleted {
            self.refresh_offline_sets()?;
        }
        Ok(deleted)
    }
}
