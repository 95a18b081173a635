//! Sort keys for queue and playlist ordering.
//!
//! Offline sorts apply these comparators locally; the same (key, order)
//! pair is queued for remote replay so the server-side sort is idempotent
//! with the order already shown.

use std::cmp::Ordering;
use std::str::FromStr;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::store::SongRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    Title,
    Artist,
    Album,
    Track,
    Year,
    Duration,
    Random,
}

impl SortKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortKey::Title => "title",
            SortKey::Artist => "artist",
            SortKey::Album => "album",
            SortKey::Track => "track",
            SortKey::Year => "year",
            SortKey::Duration => "duration",
            SortKey::Random => "random",
        }
    }
}

impl FromStr for SortKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "title" => Ok(SortKey::Title),
            "artist" => Ok(SortKey::Artist),
            "album" => Ok(SortKey::Album),
            "track" => Ok(SortKey::Track),
            "year" => Ok(SortKey::Year),
            "duration" => Ok(SortKey::Duration),
            "random" => Ok(SortKey::Random),
            other => Err(anyhow::anyhow!("unknown sort key: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

impl FromStr for SortOrder {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "desc" | "DESC" => Ok(SortOrder::Desc),
            _ => Ok(SortOrder::Asc),
        }
    }
}

/// Track position within an album: disc gets three digits of headroom so
/// disc 2 track 1 sorts after disc 1 track 999.
fn track_position(song: &SongRecord) -> u32 {
    song.disc_number.unwrap_or(0) * 1000 + song.track_number.unwrap_or(0)
}

fn compare(a: &SongRecord, b: &SongRecord, key: SortKey) -> Ordering {
    match key {
        SortKey::Title => a.title.to_lowercase().cmp(&b.title.to_lowercase()),
        SortKey::Artist => a
            .artist
            .to_lowercase()
            .cmp(&b.artist.to_lowercase())
            .then_with(|| a.album.to_lowercase().cmp(&b.album.to_lowercase()))
            .then_with(|| track_position(a).cmp(&track_position(b))),
        SortKey::Album => a
            .album
            .to_lowercase()
            .cmp(&b.album.to_lowercase())
            .then_with(|| track_position(a).cmp(&track_position(b))),
        SortKey::Track => a
            .artist
            .to_lowercase()
            .cmp(&b.artist.to_lowercase())
            .then_with(|| a.album.to_lowercase().cmp(&b.album.to_lowercase()))
            .then_with(|| track_position(a).cmp(&track_position(b))),
        SortKey::Year => a.year.unwrap_or(0).cmp(&b.year.unwrap_or(0)),
        SortKey::Duration => a.duration_seconds.cmp(&b.duration_seconds),
        SortKey::Random => Ordering::Equal,
    }
}

/// Sort songs in place. `Random` shuffles with an unbiased Fisher–Yates and
/// ignores the order argument.
pub fn sort_songs(songs: &mut [SongRecord], key: SortKey, order: SortOrder) {
    if key == SortKey::Random {
        songs.shuffle(&mut rand::thread_rng());
        return;
    }
    songs.sort_by(|a, b| {
        let ord = compare(a, b, key);
        match order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn song(title: &str, artist: &str, album: &str) -> SongRecord {
        let mut s = SongRecord::stub(title);
        s.title = title.to_string();
        s.artist = artist.to_string();
        s.album = album.to_string();
        s
    }

    #[test]
    fn title_sort_is_case_insensitive() {
        let mut songs = vec![
            song("banana", "X", "A"),
            song("Apple", "X", "A"),
            song("cherry", "X", "A"),
        ];
        sort_songs(&mut songs, SortKey::Title, SortOrder::Asc);
        let titles: Vec<&str> = songs.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Apple", "banana", "cherry"]);
    }

    #[test]
    fn artist_sort_falls_back_to_album_and_track() {
        let mut a1 = song("t1", "Artist", "Album B");
        a1.track_number = Some(1);
        let mut a2 = song("t2", "Artist", "Album A");
        a2.track_number = Some(2);
        let mut a3 = song("t3", "Artist", "Album A");
        a3.track_number = Some(1);

        let mut songs = vec![a1, a2, a3];
        sort_songs(&mut songs, SortKey::Artist, SortOrder::Asc);
        let titles: Vec<&str> = songs.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["t3", "t2", "t1"]);
    }

    #[test]
    fn track_sort_weights_disc_number() {
        let mut d1t999 = song("d1t999", "A", "X");
        d1t999.disc_number = Some(1);
        d1t999.track_number = Some(999);
        let mut d2t1 = song("d2t1", "A", "X");
        d2t1.disc_number = Some(2);
        d2t1.track_number = Some(1);

        let mut songs = vec![d2t1, d1t999];
        sort_songs(&mut songs, SortKey::Track, SortOrder::Asc);
        assert_eq!(songs[0].title, "d1t999");
        assert_eq!(songs[1].title, "d2t1");
    }

    #[test]
    fn numeric_sorts() {
        let mut a = song("old", "A", "X");
        a.year = Some(1971);
        a.duration_seconds = 300;
        let mut b = song("new", "A", "X");
        b.year = Some(2020);
        b.duration_seconds = 120;

        let mut songs = vec![a.clone(), b.clone()];
        sort_songs(&mut songs, SortKey::Year, SortOrder::Desc);
        assert_eq!(songs[0].title, "new");

        let mut songs = vec![a, b];
        sort_songs(&mut songs, SortKey::Duration, SortOrder::Asc);
        assert_eq!(songs[0].title, "new");
    }

    #[test]
    fn random_keeps_the_same_multiset() {
        let mut songs: Vec<SongRecord> = (0..20)
            .map(|i| song(&format!("t{i}"), "A", "X"))
            .collect();
        let mut before: Vec<String> = songs.iter().map(|s| s.title.clone()).collect();

        sort_songs(&mut songs, SortKey::Random, SortOrder::Asc);

        let mut after: Vec<String> = songs.iter().map(|s| s.title.clone()).collect();
        before.sort();
        after.sort();
        assert_eq!(before, after);
    }

    #[test]
    fn sort_key_parsing() {
        assert_eq!("artist".parse::<SortKey>().unwrap(), SortKey::Artist);
        assert_eq!("random".parse::<SortKey>().unwrap(), SortKey::Random);
        assert!("bogus".parse::<SortKey>().is_err());
        assert_eq!("desc".parse::<SortOrder>().unwrap(), SortOrder::Desc);
        // Anything else defaults to ascending, like the server.
        assert_eq!("".parse::<SortOrder>().unwrap(), SortOrder::Asc);
    }
}
