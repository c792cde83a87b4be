//! The catalog service seam.
//!
//! Everything the download pipeline needs from the remote service goes
//! through [`CatalogApi`]. Implementations own the wire protocol, retries for
//! transient status codes, and request timeouts.

use std::{collections::HashMap, pin::Pin};

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use thiserror::Error;
use trackfetch_downloader_models::{
    CollectionBundle, DownloadItem, Lyrics, StreamLocators, TrackQuality,
};

use crate::Cancellable;

pub type BytesStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// A byte stream together with the total size the service declared for it.
pub struct ByteStreamResponse {
    pub stream: BytesStream,
    /// Declared total size in bytes. A download is only complete when exactly
    /// this many bytes were written.
    pub size: u64,
}

impl std::fmt::Debug for ByteStreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteStreamResponse")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Cancelled")]
    Cancelled,
    #[error("Request failed: (error {status}) {message}")]
    RequestFailed { status: u16, message: String },
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl Cancellable for ApiError {
    fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[async_trait]
pub trait CatalogApi: Send + Sync {
    /// Fetches a top-level item's descriptive data, ordered track list, and
    /// the track/album/label lookups needed to tag its tracks.
    async fn fetch_collection(&self, item: &DownloadItem) -> Result<CollectionBundle, ApiError>;

    /// Lists the releases of an artist as downloadable items.
    async fn fetch_artist_releases(&self, artist_id: u64) -> Result<Vec<DownloadItem>, ApiError>;

    /// Requests a stream locator for a track at the given quality.
    ///
    /// The service may deliver a lower tier than requested; callers derive the
    /// actual tier from the shape of the returned locator.
    async fn fetch_stream_locator(
        &self,
        track_id: u64,
        quality: TrackQuality,
    ) -> Result<String, ApiError>;

    /// Fetches the locators of every tier for a batch of audiobook chapters or
    /// podcast episodes.
    async fn fetch_chapter_locators(
        &self,
        ids: &[u64],
    ) -> Result<HashMap<u64, StreamLocators>, ApiError>;

    async fn fetch_bytes(&self, locator: &str) -> Result<ByteStreamResponse, ApiError>;

    /// Size of the resource behind a locator without downloading it.
    async fn fetch_content_length(&self, locator: &str) -> Result<u64, ApiError> {
        Ok(self.fetch_bytes(locator).await?.size)
    }

    async fn fetch_lyrics(&self, _track_id: u64) -> Result<Option<Lyrics>, ApiError> {
        Ok(None)
    }
}
