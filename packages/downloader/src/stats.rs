//! Run-wide counters and error records.
//!
//! One [`StatsAggregator`] is shared by every worker of a run. Each recording
//! method is a single critical section, so the counters always satisfy
//! `processed == downloaded + skipped + failed`.

use std::{
    sync::{Mutex, PoisonError},
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use trackfetch_downloader_models::{DownloadItem, ItemCategory, ItemKey};

use crate::filter::SkipReason;

/// Where in the pipeline an error happened.
#[derive(
    Debug, Serialize, Deserialize, EnumString, AsRefStr, Display, Clone, Copy, PartialEq, Eq, Hash,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DownloadPhase {
    Metadata,
    Collection,
    Filter,
    Resolve,
    Download,
    Tag,
    Publish,
    Finalize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentCollection {
    pub key: ItemKey,
    pub title: String,
    pub url: String,
}

/// A failed (or filtered) item and, for tracks, the collection it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadError {
    pub category: ItemCategory,
    pub item_id: u64,
    pub title: Option<String>,
    pub url: Option<String>,
    pub phase: DownloadPhase,
    pub parent: Option<ParentCollection>,
    pub message: String,
    /// Set when the record describes a filtered track rather than a failure
    pub skip: Option<SkipReason>,
}

impl DownloadError {
    /// An error of a top-level item.
    #[must_use]
    pub fn for_item(item: &DownloadItem, phase: DownloadPhase, message: impl Into<String>) -> Self {
        Self {
            category: item.category,
            item_id: item.id,
            title: None,
            url: Some(item.url.clone()),
            phase,
            parent: None,
            message: message.into(),
            skip: None,
        }
    }

    /// An error of a track inside a collection.
    #[must_use]
    pub fn for_track(
        track_id: u64,
        title: Option<String>,
        parent: ParentCollection,
        phase: DownloadPhase,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category: ItemCategory::Track,
            item_id: track_id,
            title,
            url: None,
            phase,
            parent: Some(parent),
            message: message.into(),
            skip: None,
        }
    }

    #[must_use]
    pub const fn with_skip(mut self, reason: SkipReason) -> Self {
        self.skip = Some(reason);
        self
    }

    /// Whether this is an error of a top-level item rather than of a track
    /// within one.
    #[must_use]
    pub const fn is_collection_level(&self) -> bool {
        self.parent.is_none()
    }
}

impl std::fmt::Display for DownloadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {} {}", self.phase, self.category, self.item_id)?;

        if let Some(title) = &self.title {
            write!(f, " ({title})")?;
        }

        write!(f, ": {}", self.message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadStatistics {
    pub processed: u64,
    pub downloaded: u64,
    pub skipped: u64,
    pub skipped_exists: u64,
    pub skipped_quality: u64,
    pub skipped_duration: u64,
    pub failed: u64,
    pub bytes: u64,
    pub lyrics: u64,
    pub covers: u64,
    pub started_at: Option<Instant>,
    pub finished_at: Option<Instant>,
    pub dry_run: bool,
    pub interrupted: bool,
    pub errors: Vec<DownloadError>,
}

impl DownloadStatistics {
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => end.saturating_duration_since(start),
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        }
    }

    /// Records of tracks that failed, excluding filtered tracks.
    pub fn failures(&self) -> impl Iterator<Item = &DownloadError> {
        self.errors.iter().filter(|x| x.skip.is_none())
    }

    /// Records of tracks excluded by a filter.
    pub fn skips(&self) -> impl Iterator<Item = &DownloadError> {
        self.errors.iter().filter(|x| x.skip.is_some())
    }
}

#[derive(Debug, Default)]
pub struct StatsAggregator {
    inner: Mutex<DownloadStatistics>,
}

impl StatsAggregator {
    #[must_use]
    pub fn new(dry_run: bool) -> Self {
        Self {
            inner: Mutex::new(DownloadStatistics {
                dry_run,
                ..Default::default()
            }),
        }
    }

    fn update<T>(&self, f: impl FnOnce(&mut DownloadStatistics) -> T) -> T {
        let mut stats = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut stats)
    }

    pub fn start(&self) {
        self.update(|stats| {
            stats.started_at = Some(Instant::now());
            stats.finished_at = None;
        });
    }

    pub fn finish(&self) {
        self.update(|stats| stats.finished_at = Some(Instant::now()));
    }

    pub fn record_downloaded(&self, bytes: u64) {
        self.update(|stats| {
            stats.processed += 1;
            stats.downloaded += 1;
            stats.bytes += bytes;
        });
    }

    pub fn record_skipped(&self, reason: SkipReason, record: Option<DownloadError>) {
        self.update(|stats| {
            stats.processed += 1;
            stats.skipped += 1;

            match reason {
                SkipReason::Exists => stats.skipped_exists += 1,
                SkipReason::Quality => stats.skipped_quality += 1,
                SkipReason::Duration => stats.skipped_duration += 1,
            }

            if let Some(record) = record {
                stats.errors.push(record.with_skip(reason));
            }
        });
    }

    pub fn record_failed(&self, error: DownloadError) {
        log::error!("{error}");

        self.update(|stats| {
            stats.processed += 1;
            stats.failed += 1;
            stats.errors.push(error);
        });
    }

    /// Records an error without touching the track counters.
    pub fn record_error(&self, error: DownloadError) {
        log::error!("{error}");

        self.update(|stats| stats.errors.push(error));
    }

    pub fn record_lyrics(&self) {
        self.update(|stats| stats.lyrics += 1);
    }

    pub fn record_cover(&self) {
        self.update(|stats| stats.covers += 1);
    }

    pub fn mark_interrupted(&self) {
        self.update(|stats| stats.interrupted = true);
    }

    #[must_use]
    pub fn snapshot(&self) -> DownloadStatistics {
        self.update(|stats| stats.clone())
    }
}
