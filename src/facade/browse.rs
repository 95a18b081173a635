//! Library browsing.
//!
//! Offline browsing is computed by a full scan of cached song metadata
//! with the requested filters applied. Missing artist/genre/category
//! becomes a synthetic `[Unknown X]` bucket inserted ahead of the real
//! entries. Pagination is an offset-style cursor over the filtered,
//! sorted in-memory list, because the source is an ad hoc filtered view, not a
//! stored collection.

use std::collections::BTreeMap;

use anyhow::Result;

use super::OfflineClient;
use crate::remote::api::{BrowseBucket, Page, PathListing};
use crate::store::{BrowseFilter, SongRecord};

pub const UNKNOWN_ARTIST: &str = "[Unknown Artist]";
pub const UNKNOWN_ALBUM: &str = "[Unknown Album]";
pub const UNKNOWN_GENRE: &str = "[Unknown Genre]";
pub const UNKNOWN_CATEGORY: &str = "[Unknown Category]";

const DEFAULT_PAGE: u64 = 100;

/// Apply field filters to a metadata scan. An `[Unknown X]` filter value
/// matches songs missing that field.
pub(crate) fn filter_songs(songs: Vec<SongRecord>, filter: &BrowseFilter) -> Vec<SongRecord> {
    songs
        .into_iter()
        .filter(|s| {
            field_matches(filter.category.as_deref(), s.category.as_deref(), UNKNOWN_CATEGORY)
                && field_matches(filter.genre.as_deref(), s.genre.as_deref(), UNKNOWN_GENRE)
                && field_matches(filter.artist.as_deref(), non_empty(&s.artist), UNKNOWN_ARTIST)
                && field_matches(filter.album.as_deref(), non_empty(&s.album), UNKNOWN_ALBUM)
        })
        .collect()
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn field_matches(wanted: Option<&str>, actual: Option<&str>, unknown: &str) -> bool {
    match wanted {
        None => true,
        Some(w) if w == unknown => actual.map(str::trim).filter(|s| !s.is_empty()).is_none(),
        Some(w) => actual.map(str::trim) == Some(w),
    }
}

/// Offset-cursor pagination over an in-memory list.
pub(crate) fn paginate<T>(items: Vec<T>, cursor: Option<&str>, limit: u64) -> Page<T> {
    let offset: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
    let limit = limit.max(1) as usize;
    let total = items.len();

    let page: Vec<T> = items.into_iter().skip(offset).take(limit).collect();
    let consumed = offset + page.len();
    let has_more = consumed < total;
    Page {
        items: page,
        next_cursor: has_more.then(|| consumed.to_string()),
        has_more,
    }
}

/// Count songs per bucket value, with the unknown bucket first.
fn bucketize(
    songs: &[SongRecord],
    value_of: impl Fn(&SongRecord) -> Option<String>,
    unknown_label: &str,
) -> Vec<BrowseBucket> {
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    let mut unknown = 0u64;
    for song in songs {
        match value_of(song) {
            Some(value) => *counts.entry(value).or_default() += 1,
            None => unknown += 1,
        }
    }

    let mut buckets = Vec::with_capacity(counts.len() + 1);
    if unknown > 0 {
        buckets.push(BrowseBucket {
            name: unknown_label.to_string(),
            song_count: unknown,
        });
    }
    buckets.extend(
        counts
            .into_iter()
            .map(|(name, song_count)| BrowseBucket { name, song_count }),
    );
    buckets
}

impl OfflineClient {
    pub async fn browse_categories(&self) -> Result<Vec<BrowseBucket>> {
        if self.offline() {
            return self.browse_categories_offline();
        }
        match self.remote.browse_categories().await {
            Ok(buckets) => Ok(buckets),
            Err(e) if e.is_transport() => {
                self.note_transport_failure("browse_categories", &e);
                self.browse_categories_offline()
            }
            Err(e) => Err(e.into()),
        }
    }

    fn browse_categories_offline(&self) -> Result<Vec<BrowseBucket>> {
        let songs = self.store.songs_all()?;
        Ok(bucketize(
            &songs,
            |s| s.category.as_deref().and_then(|c| non_empty(c).map(str::to_string)),
            UNKNOWN_CATEGORY,
        ))
    }

    pub async fn browse_genres(&self, category: Option<&str>) -> Result<Vec<BrowseBucket>> {
        if self.offline() {
            return self.browse_genres_offline(category);
        }
        match self.remote.browse_genres(category).await {
            Ok(buckets) => Ok(buckets),
            Err(e) if e.is_transport() => {
                self.note_transport_failure("browse_genres", &e);
                self.browse_genres_offline(category)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn browse_genres_offline(&self, category: Option<&str>) -> Result<Vec<BrowseBucket>> {
        let filter = BrowseFilter {
            category: category.map(str::to_string),
            ..Default::default()
        };
        let songs = filter_songs(self.store.songs_all()?, &filter);
        Ok(bucketize(
            &songs,
            |s| s.genre.as_deref().and_then(|g| non_empty(g).map(str::to_string)),
            UNKNOWN_GENRE,
        ))
    }

    pub async fn browse_artists(
        &self,
        filter: &BrowseFilter,
        cursor: Option<&str>,
        limit: Option<u64>,
    ) -> Result<Page<BrowseBucket>> {
        if self.offline() {
            return self.browse_artists_offline(filter, cursor, limit);
        }
        match self.remote.browse_artists(filter, cursor, limit).await {
            Ok(page) => Ok(page),
            Err(e) if e.is_transport() => {
                self.note_transport_failure("browse_artists", &e);
                self.browse_artists_offline(filter, cursor, limit)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn browse_artists_offline(
        &self,
        filter: &BrowseFilter,
        cursor: Option<&str>,
        limit: Option<u64>,
    ) -> Result<Page<BrowseBucket>> {
        let songs = filter_songs(self.store.songs_all()?, filter);
        let buckets = bucketize(
            &songs,
            |s| non_empty(&s.artist).map(str::to_string),
            UNKNOWN_ARTIST,
        );
        Ok(paginate(buckets, cursor, limit.unwrap_or(DEFAULT_PAGE)))
    }

    pub async fn browse_albums(
        &self,
        filter: &BrowseFilter,
        cursor: Option<&str>,
        limit: Option<u64>,
    ) -> Result<Page<BrowseBucket>> {
        if self.offline() {
            return self.browse_albums_offline(filter, cursor, limit);
        }
        match self.remote.browse_albums(filter, cursor, limit).await {
            Ok(page) => Ok(page),
            Err(e) if e.is_transport() => {
                self.note_transport_failure("browse_albums", &e);
                self.browse_albums_offline(filter, cursor, limit)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn browse_albums_offline(
        &self,
        filter: &BrowseFilter,
        cursor: Option<&str>,
        limit: Option<u64>,
    ) -> Result<Page<BrowseBucket>> {
        let songs = filter_songs(self.store.songs_all()?, filter);
        let buckets = bucketize(
            &songs,
            |s| non_empty(&s.album).map(str::to_string),
            UNKNOWN_ALBUM,
        );
        Ok(paginate(buckets, cursor, limit.unwrap_or(DEFAULT_PAGE)))
    }

    pub async fn browse_path(
        &self,
        path: &str,
        cursor: Option<&str>,
        limit: Option<u64>,
    ) -> Result<PathListing> {
        if self.offline() {
            return self.browse_path_offline(path, cursor, limit);
        }
        match self.remote.browse_path(path, cursor, limit).await {
            Ok(listing) => {
                // Mirror the metadata so these songs browse offline later.
                self.store.song_put_many(&listing.songs)?;
                self.refresh_derived_state()?;
                Ok(listing)
            }
            Err(e) if e.is_transport() => {
                self.note_transport_failure("browse_path", &e);
                self.browse_path_offline(path, cursor, limit)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn browse_path_offline(
        &self,
        path: &str,
        cursor: Option<&str>,
        limit: Option<u64>,
    ) -> Result<PathListing> {
        let prefix = if path.ends_with('/') {
            path.to_string()
        } else {
            format!("{path}/")
        };
        let prefix = if path == "/" { "/".to_string() } else { prefix };

        let mut dirs = std::collections::BTreeSet::new();
        let mut songs = Vec::new();
        for song in self.store.songs_all()? {
            let Some(file) = song.file.clone() else {
                continue;
            };
            let Some(rest) = file.strip_prefix(&prefix) else {
                continue;
            };
            match rest.find('/') {
                // A deeper entry contributes its first path component as a
                // child directory.
                Some(idx) => {
                    dirs.insert(format!("{prefix}{}", &rest[..idx]));
                }
                None => songs.push(song),
            }
        }
        songs.sort_by(|a, b| a.file.cmp(&b.file));

        let page = paginate(songs, cursor, limit.unwrap_or(DEFAULT_PAGE));
        Ok(PathListing {
            dirs: dirs.into_iter().collect(),
            songs: page.items,
            next_cursor: page.next_cursor,
            has_more: page.has_more,
        })
    }
}
