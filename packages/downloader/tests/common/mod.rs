#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use trackfetch_downloader::{
    ApiError, ByteStreamResponse, CatalogApi,
    tags::{TagRequest, TagWriteError, TagWriter},
};
use trackfetch_downloader_models::{
    AlbumMetadata, CollectionBundle, CollectionInfo, DownloadItem, ItemCategory, ItemKey, Lyrics,
    StreamLocators, TagMap, TrackBundle, TrackMetadata, TrackQuality, tag,
};

pub const COVER_URL: &str = "https://img.test/cover.jpg";

/// In-memory catalog service.
#[derive(Default)]
pub struct FakeCatalog {
    pub collections: HashMap<ItemKey, CollectionBundle>,
    pub artist_releases: HashMap<u64, Vec<DownloadItem>>,
    pub chapter_locators: HashMap<u64, StreamLocators>,
    /// Declared sizes that differ from the delivered content
    pub declared_sizes: HashMap<u64, u64>,
    pub lyrics: HashMap<u64, Lyrics>,
    /// Tracks delivered at a lower tier than requested
    pub downgrades: HashMap<u64, TrackQuality>,
    pub delay: Duration,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub byte_requests: Mutex<Vec<String>>,
    pub locator_requests: Mutex<Vec<(u64, TrackQuality)>>,
    pub collection_requests: AtomicUsize,
}

impl FakeCatalog {
    #[must_use]
    pub fn with_collection(mut self, bundle: CollectionBundle) -> Self {
        self.collections.insert(bundle.item.key(), bundle);
        self
    }

    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn byte_requests(&self) -> Vec<String> {
        self.byte_requests.lock().unwrap().clone()
    }
}

pub fn content(track_id: u64) -> Vec<u8> {
    format!("audio-bytes-of-track-{track_id}").into_bytes()
}

fn track_id_from_locator(locator: &str) -> Option<u64> {
    locator
        .split("track=")
        .nth(1)
        .and_then(|x| x.split('&').next())
        .and_then(|x| x.parse().ok())
}

pub fn locator(track_id: u64, quality: TrackQuality) -> String {
    let path = match quality {
        TrackQuality::Lossless => "streamfl",
        TrackQuality::High => "streamhq",
        TrackQuality::Standard => "stream",
    };

    format!("https://cdn.test/{path}?track={track_id}")
}

#[async_trait]
impl CatalogApi for FakeCatalog {
    async fn fetch_collection(&self, item: &DownloadItem) -> Result<CollectionBundle, ApiError> {
        self.collection_requests.fetch_add(1, Ordering::SeqCst);

        self.collections
            .get(&item.key())
            .cloned()
            .ok_or_else(|| ApiError::NotFound(item.key().to_string()))
    }

    async fn fetch_artist_releases(&self, artist_id: u64) -> Result<Vec<DownloadItem>, ApiError> {
        self.artist_releases
            .get(&artist_id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("artist:{artist_id}")))
    }

    async fn fetch_stream_locator(
        &self,
        track_id: u64,
        quality: TrackQuality,
    ) -> Result<String, ApiError> {
        self.locator_requests
            .lock()
            .unwrap()
            .push((track_id, quality));

        let delivered = self
            .downgrades
            .get(&track_id)
            .map_or(quality, |x| quality.min(*x));

        Ok(locator(track_id, delivered))
    }

    async fn fetch_chapter_locators(
        &self,
        ids: &[u64],
    ) -> Result<HashMap<u64, StreamLocators>, ApiError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.chapter_locators.get(id).map(|x| (*id, x.clone())))
            .collect())
    }

    async fn fetch_bytes(&self, locator: &str) -> Result<ByteStreamResponse, ApiError> {
        self.byte_requests.lock().unwrap().push(locator.to_string());

        if locator == COVER_URL {
            let data = Bytes::from_static(b"cover-image");
            return Ok(ByteStreamResponse {
                size: data.len() as u64,
                stream: Box::pin(futures::stream::iter(vec![Ok::<_, std::io::Error>(data)])),
            });
        }

        let track_id = track_id_from_locator(locator)
            .ok_or_else(|| ApiError::NotFound(locator.to_string()))?;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let data = Bytes::from(content(track_id));
        let size = self
            .declared_sizes
            .get(&track_id)
            .copied()
            .unwrap_or(data.len() as u64);
        let (first, second) = data.split_at(data.len() / 2);

        Ok(ByteStreamResponse {
            size,
            stream: Box::pin(futures::stream::iter(vec![
                Ok::<_, std::io::Error>(Bytes::copy_from_slice(first)),
                Ok(Bytes::copy_from_slice(second)),
            ])),
        })
    }

    async fn fetch_lyrics(&self, track_id: u64) -> Result<Option<Lyrics>, ApiError> {
        Ok(self.lyrics.get(&track_id).cloned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagCall {
    pub file_name: String,
    pub title: Option<String>,
    pub quality: TrackQuality,
    pub cover: Option<PathBuf>,
    pub has_lyrics: bool,
}

/// Records tag requests instead of encoding tags.
#[derive(Default)]
pub struct RecordingTagWriter {
    pub calls: Mutex<Vec<TagCall>>,
    pub fail_titles: HashSet<String>,
}

impl RecordingTagWriter {
    pub fn calls(&self) -> Vec<TagCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl TagWriter for RecordingTagWriter {
    fn write_tags(&self, request: &TagRequest<'_>) -> Result<(), TagWriteError> {
        assert!(request.path.to_string_lossy().ends_with(".part"));

        let title = request.tags.get(tag::TITLE).cloned();

        self.calls.lock().unwrap().push(TagCall {
            file_name: request
                .path
                .file_name()
                .map(|x| x.to_string_lossy().into_owned())
                .unwrap_or_default(),
            title: title.clone(),
            quality: request.quality,
            cover: request.cover.map(Path::to_path_buf),
            has_lyrics: request.lyrics.is_some(),
        });

        if title.is_some_and(|x| self.fail_titles.contains(&x)) {
            return Err(TagWriteError::Other("refusing to tag".into()));
        }

        Ok(())
    }
}

pub fn track(id: u64, number: u32, album_id: u64, duration: u32, quality: &str) -> TrackMetadata {
    TrackMetadata {
        id,
        title: format!("Track {number}"),
        artists: vec!["Artist".into()],
        album_id: Some(album_id),
        track_number: Some(number),
        duration,
        highest_quality: Some(quality.into()),
        ..Default::default()
    }
}

/// An album whose tracks have ids `album_id * 100 + n`.
pub fn album(album_id: u64, tracks: &[(u32, &str)]) -> CollectionBundle {
    let track_ids = (1..=tracks.len() as u64)
        .map(|n| album_id * 100 + n)
        .collect::<Vec<_>>();

    let tracks = track_ids
        .iter()
        .zip(tracks)
        .enumerate()
        .map(|(i, (id, (duration, quality)))| {
            (
                *id,
                track(*id, u32::try_from(i + 1).unwrap(), album_id, *duration, quality),
            )
        })
        .collect();

    let title = format!("Album {album_id}");

    CollectionBundle {
        item: DownloadItem::new(
            ItemCategory::Album,
            album_id,
            format!("https://catalog.test/album/{album_id}"),
        ),
        info: CollectionInfo {
            title: title.clone(),
            tags: TagMap::from([
                (tag::ALBUM.to_string(), title.clone()),
                (tag::ALBUM_ARTIST.to_string(), "Artist".to_string()),
            ]),
            cover_url: Some(COVER_URL.into()),
            description: Some(format!("About album {album_id}")),
        },
        track_ids,
        metadata: TrackBundle {
            tracks,
            albums: HashMap::from([(
                album_id,
                AlbumMetadata {
                    id: album_id,
                    title,
                    artists: vec!["Artist".into()],
                    ..Default::default()
                },
            )]),
            ..Default::default()
        },
    }
}

pub fn lossless_album(album_id: u64, count: usize) -> CollectionBundle {
    album(album_id, &vec![(180, "flac"); count])
}

/// Lists every file below `dir`, relative to it, sorted.
pub fn files_in(dir: &Path) -> Vec<String> {
    fn walk(root: &Path, dir: &Path, out: &mut Vec<String>) {
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(root, &path, out);
            } else {
                out.push(
                    path.strip_prefix(root)
                        .unwrap()
                        .to_string_lossy()
                        .into_owned(),
                );
            }
        }
    }

    let mut out = vec![];
    if dir.exists() {
        walk(dir, dir, &mut out);
    }
    out.sort();
    out
}

pub fn part_files_in(dir: &Path) -> Vec<String> {
    files_in(dir)
        .into_iter()
        .filter(|x| x.ends_with(".part"))
        .collect()
}

pub fn tag_writer() -> Arc<RecordingTagWriter> {
    Arc::new(RecordingTagWriter::default())
}
