//! Data models shared by the trackfetch download pipeline.
//!
//! These types describe what is being downloaded (a [`DownloadItem`] of some
//! [`ItemCategory`]), the metadata the catalog service returns for it, and the
//! quality tiers a track can be delivered in. They carry no I/O.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use std::{
    collections::{BTreeMap, HashMap},
    hash::{Hash, Hasher},
};

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Tag keys understood by the tag writer and the filename templates.
pub mod tag {
    pub const TITLE: &str = "title";
    pub const ARTIST: &str = "artist";
    pub const ALBUM: &str = "album";
    pub const ALBUM_ARTIST: &str = "albumartist";
    pub const TRACK_NUMBER: &str = "tracknumber";
    pub const TRACK_TOTAL: &str = "tracktotal";
    pub const DISC_NUMBER: &str = "discnumber";
    pub const DATE: &str = "date";
    pub const GENRE: &str = "genre";
    pub const LABEL: &str = "label";
    pub const ISRC: &str = "isrc";
    pub const PLAYLIST: &str = "playlist";
    pub const PLAYLIST_TRACK: &str = "playlisttrack";
}

/// Ordered tag name to value map.
pub type TagMap = BTreeMap<String, String>;

/// The kind of thing a download request points at.
#[derive(
    Debug,
    Serialize,
    Deserialize,
    EnumString,
    AsRefStr,
    Display,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ItemCategory {
    Track,
    Album,
    Playlist,
    Artist,
    Audiobook,
    Podcast,
}

impl ItemCategory {
    /// Whether tracks of this category get their stream locators in one bulk
    /// request instead of one request per track.
    #[must_use]
    pub const fn uses_prefetched_streams(self) -> bool {
        matches!(self, Self::Audiobook | Self::Podcast)
    }
}

/// Identity of a [`DownloadItem`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemKey {
    pub category: ItemCategory,
    pub id: u64,
}

impl std::fmt::Display for ItemKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.category, self.id)
    }
}

/// A single top-level download request.
///
/// Two items are equal when their category and id match, regardless of the
/// URL they were parsed from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadItem {
    pub category: ItemCategory,
    pub url: String,
    pub id: u64,
}

impl DownloadItem {
    #[must_use]
    pub fn new(category: ItemCategory, id: u64, url: impl Into<String>) -> Self {
        Self {
            category,
            url: url.into(),
            id,
        }
    }

    #[must_use]
    pub const fn key(&self) -> ItemKey {
        ItemKey {
            category: self.category,
            id: self.id,
        }
    }
}

impl PartialEq for DownloadItem {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for DownloadItem {}

impl Hash for DownloadItem {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

/// Quality tiers the catalog service delivers, lowest first.
#[derive(
    Debug,
    Default,
    Serialize,
    Deserialize,
    EnumString,
    AsRefStr,
    Display,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum TrackQuality {
    /// 128 kbps MP3
    Standard,
    /// 320 kbps MP3
    High,
    /// FLAC
    #[default]
    Lossless,
}

impl TrackQuality {
    /// All tiers, highest first.
    pub const DESCENDING: [Self; 3] = [Self::Lossless, Self::High, Self::Standard];

    /// Parses the availability string the catalog reports for a track
    /// (`"flac"`, `"high"`, `"mid"`, ...).
    #[must_use]
    pub fn from_availability(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "flac" | "lossless" | "hifi" => Some(Self::Lossless),
            "high" => Some(Self::High),
            "mid" | "standard" | "low" => Some(Self::Standard),
            _ => None,
        }
    }

    /// File extension of a track delivered at this tier.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Standard | Self::High => "mp3",
            Self::Lossless => "flac",
        }
    }
}

/// Stream locators for every tier of one chapter or episode, fetched in bulk.
///
/// Empty strings are treated the same as missing locators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamLocators {
    pub lossless: Option<String>,
    pub high: Option<String>,
    pub standard: Option<String>,
}

impl StreamLocators {
    #[must_use]
    pub fn get(&self, quality: TrackQuality) -> Option<&str> {
        let locator = match quality {
            TrackQuality::Lossless => &self.lossless,
            TrackQuality::High => &self.high,
            TrackQuality::Standard => &self.standard,
        };

        locator.as_deref().filter(|x| !x.is_empty())
    }

    /// Highest tier with a non-empty locator.
    #[must_use]
    pub fn highest(&self) -> Option<TrackQuality> {
        TrackQuality::DESCENDING
            .into_iter()
            .find(|quality| self.get(*quality).is_some())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.highest().is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackMetadata {
    pub id: u64,
    pub title: String,
    pub artists: Vec<String>,
    pub album_id: Option<u64>,
    pub track_number: Option<u32>,
    pub disc_number: Option<u32>,
    /// Duration in seconds
    pub duration: u32,
    /// Raw availability string, e.g. `"flac"` or `"mid"`
    pub highest_quality: Option<String>,
    pub genres: Vec<String>,
    pub isrc: Option<String>,
    pub has_lyrics: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlbumMetadata {
    pub id: u64,
    pub title: String,
    pub artists: Vec<String>,
    pub label_id: Option<u64>,
    pub release_date: Option<String>,
    pub genres: Vec<String>,
    pub cover_url: Option<String>,
    pub track_count: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelMetadata {
    pub id: u64,
    pub name: String,
}

/// Track, album, and label lookups shared by every track of one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackBundle {
    pub tracks: HashMap<u64, TrackMetadata>,
    pub albums: HashMap<u64, AlbumMetadata>,
    pub labels: HashMap<u64, LabelMetadata>,
    /// Bulk-fetched locators for audiobook chapters and podcast episodes
    pub streams: Option<HashMap<u64, StreamLocators>>,
}

impl TrackBundle {
    #[must_use]
    pub fn track(&self, track_id: u64) -> Option<&TrackMetadata> {
        self.tracks.get(&track_id)
    }

    #[must_use]
    pub fn album_for(&self, track: &TrackMetadata) -> Option<&AlbumMetadata> {
        track.album_id.and_then(|id| self.albums.get(&id))
    }

    #[must_use]
    pub fn label_for(&self, album: &AlbumMetadata) -> Option<&LabelMetadata> {
        album.label_id.and_then(|id| self.labels.get(&id))
    }

    /// Tags derived from a track and, when present in the bundle, its album
    /// and label.
    #[must_use]
    pub fn track_tags(&self, track: &TrackMetadata) -> TagMap {
        let mut tags = TagMap::new();

        tags.insert(tag::TITLE.to_string(), track.title.clone());

        if !track.artists.is_empty() {
            tags.insert(tag::ARTIST.to_string(), track.artists.join(", "));
        }
        if let Some(number) = track.track_number {
            tags.insert(tag::TRACK_NUMBER.to_string(), number.to_string());
        }
        if let Some(number) = track.disc_number {
            tags.insert(tag::DISC_NUMBER.to_string(), number.to_string());
        }
        if !track.genres.is_empty() {
            tags.insert(tag::GENRE.to_string(), track.genres.join(", "));
        }
        if let Some(isrc) = &track.isrc {
            tags.insert(tag::ISRC.to_string(), isrc.clone());
        }

        if let Some(album) = self.album_for(track) {
            tags.insert(tag::ALBUM.to_string(), album.title.clone());

            if !album.artists.is_empty() {
                tags.insert(tag::ALBUM_ARTIST.to_string(), album.artists.join(", "));
            }
            if let Some(date) = &album.release_date {
                tags.insert(tag::DATE.to_string(), date.clone());
            }
            if let Some(count) = album.track_count {
                tags.insert(tag::TRACK_TOTAL.to_string(), count.to_string());
            }
            if !tags.contains_key(tag::GENRE) && !album.genres.is_empty() {
                tags.insert(tag::GENRE.to_string(), album.genres.join(", "));
            }
            if let Some(label) = self.label_for(album) {
                tags.insert(tag::LABEL.to_string(), label.name.clone());
            }
        }

        tags
    }
}

/// Descriptive data for the collection a set of tracks belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionInfo {
    pub title: String,
    pub tags: TagMap,
    pub cover_url: Option<String>,
    pub description: Option<String>,
}

/// Everything the catalog returns for one top-level item: its descriptive
/// data, the ordered track list, and the lookups needed to tag each track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionBundle {
    pub item: DownloadItem,
    pub info: CollectionInfo,
    pub track_ids: Vec<u64>,
    pub metadata: TrackBundle,
}

/// Lyrics returned by the catalog for a track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type", content = "text")]
pub enum Lyrics {
    /// LRC-formatted, time-synced lyrics
    Synced(String),
    Plain(String),
}

#[cfg(test)]
mod tests {
    use std::str::FromStr as _;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test_log::test]
    fn quality_tiers_order_lowest_first() {
        assert!(TrackQuality::Standard < TrackQuality::High);
        assert!(TrackQuality::High < TrackQuality::Lossless);
        assert_eq!(TrackQuality::DESCENDING[0], TrackQuality::Lossless);
    }

    #[test_log::test]
    fn parses_catalog_availability_strings() {
        assert_eq!(
            TrackQuality::from_availability("flac"),
            Some(TrackQuality::Lossless)
        );
        assert_eq!(
            TrackQuality::from_availability(" High "),
            Some(TrackQuality::High)
        );
        assert_eq!(
            TrackQuality::from_availability("mid"),
            Some(TrackQuality::Standard)
        );
        assert_eq!(TrackQuality::from_availability("ultra"), None);
    }

    #[test_log::test]
    fn quality_parses_case_insensitively() {
        assert_eq!(
            TrackQuality::from_str("LOSSLESS").unwrap(),
            TrackQuality::Lossless
        );
        assert_eq!(TrackQuality::High.as_ref(), "high");
    }

    #[test_log::test]
    fn download_item_identity_ignores_url() {
        let a = DownloadItem::new(ItemCategory::Album, 7, "https://example.com/release/7");
        let b = DownloadItem::new(ItemCategory::Album, 7, "https://example.com/release/7?x=1");
        let c = DownloadItem::new(ItemCategory::Playlist, 7, "https://example.com/playlist/7");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.key().to_string(), "album:7");
    }

    #[test_log::test]
    fn stream_locators_treat_empty_as_missing() {
        let locators = StreamLocators {
            lossless: Some(String::new()),
            high: Some("https://cdn/streamhq?id=1".into()),
            standard: None,
        };

        assert_eq!(locators.get(TrackQuality::Lossless), None);
        assert_eq!(locators.highest(), Some(TrackQuality::High));
        assert!(!locators.is_empty());
        assert!(StreamLocators::default().is_empty());
    }

    #[test_log::test]
    fn track_tags_merge_album_and_label() {
        let track = TrackMetadata {
            id: 1,
            title: "Intro".into(),
            artists: vec!["A".into(), "B".into()],
            album_id: Some(10),
            track_number: Some(1),
            ..Default::default()
        };
        let bundle = TrackBundle {
            tracks: HashMap::from([(1, track.clone())]),
            albums: HashMap::from([(
                10,
                AlbumMetadata {
                    id: 10,
                    title: "Record".into(),
                    artists: vec!["A".into()],
                    label_id: Some(3),
                    genres: vec!["Jazz".into()],
                    track_count: Some(9),
                    ..Default::default()
                },
            )]),
            labels: HashMap::from([(
                3,
                LabelMetadata {
                    id: 3,
                    name: "Label".into(),
                },
            )]),
            streams: None,
        };

        let tags = bundle.track_tags(&track);

        assert_eq!(tags.get(tag::ARTIST).map(String::as_str), Some("A, B"));
        assert_eq!(tags.get(tag::ALBUM).map(String::as_str), Some("Record"));
        assert_eq!(tags.get(tag::GENRE).map(String::as_str), Some("Jazz"));
        assert_eq!(tags.get(tag::LABEL).map(String::as_str), Some("Label"));
        assert_eq!(tags.get(tag::TRACK_TOTAL).map(String::as_str), Some("9"));
    }

    #[test_log::test]
    fn lyrics_serialize_with_type_tag() {
        let value = serde_json::to_value(Lyrics::Synced("[00:01.00]hi".into())).unwrap();

        assert_eq!(
            value,
            serde_json::json!({ "type": "synced", "text": "[00:01.00]hi" })
        );
    }
}
