//! Concurrent track download pipeline.
//!
//! A [`Downloader`] takes top-level [`DownloadItem`]s (tracks, albums,
//! playlists, artists, audiobooks, podcasts), fetches each collection's
//! metadata through a [`CatalogApi`], and drives its tracks through filtering,
//! quality resolution, an atomic `.part` download, tagging, and publishing.
//! Everything that happens is counted in a shared [`StatsAggregator`] and
//! summarized in a [`DownloadReport`].

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use std::{path::PathBuf, sync::Arc};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use trackfetch_downloader_models::{CollectionBundle, DownloadItem, ItemCategory};

pub mod atomic;
pub mod catalog;
pub mod context;
pub mod filter;
pub mod orchestrator;
pub mod pool;
pub mod progress;
pub mod quality;
pub mod registry;
pub mod report;
pub mod settings;
pub mod stats;
pub mod tags;
pub mod template;
pub mod throttle;
pub mod track;

pub use catalog::{ApiError, ByteStreamResponse, CatalogApi};
pub use context::DownloadContext;
pub use orchestrator::CompletedTrack;
pub use progress::{ProgressEvent, ProgressListener};
pub use registry::{CollectionRegistry, RegisterCollectionError};
pub use report::DownloadReport;
pub use settings::DownloadSettings;
pub use stats::{DownloadError, DownloadPhase, DownloadStatistics, StatsAggregator};
pub use tags::{AudiotagsWriter, TagWriter};
pub use template::{DefaultNameTemplates, NameTemplates};
pub use track::TrackOutcome;

/// Errors that can stand for a user-initiated interruption.
///
/// Cancelled errors are neither logged as errors nor recorded as failures.
pub trait Cancellable {
    fn is_cancelled(&self) -> bool;
}

impl Cancellable for trackfetch_config::file::ConfigError {
    fn is_cancelled(&self) -> bool {
        false
    }
}

impl Cancellable for trackfetch_logging::InitError {
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Failures that abort the whole run.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("Failed to create output directory {path:?}: {source}")]
    OutputDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl Cancellable for SetupError {
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Failures of one top-level item. Other items of the run are unaffected.
#[derive(Debug, Error)]
pub enum DownloadItemError {
    #[error(transparent)]
    Metadata(#[from] ApiError),
    #[error(transparent)]
    Register(#[from] RegisterCollectionError),
    #[error("Cancelled")]
    Cancelled,
}

impl DownloadItemError {
    #[must_use]
    pub const fn phase(&self) -> DownloadPhase {
        match self {
            Self::Metadata(_) | Self::Cancelled => DownloadPhase::Metadata,
            Self::Register(_) => DownloadPhase::Collection,
        }
    }
}

impl Cancellable for DownloadItemError {
    fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Metadata(e) => e.is_cancelled(),
            Self::Register(e) => e.is_cancelled(),
        }
    }
}

pub struct Downloader {
    api: Arc<dyn CatalogApi>,
    tag_writer: Arc<dyn TagWriter>,
    templates: Arc<dyn NameTemplates>,
    settings: Arc<DownloadSettings>,
    cancel: CancellationToken,
    progress_listeners: Vec<ProgressListener>,
    stats: Arc<StatsAggregator>,
    registry: Arc<CollectionRegistry>,
}

impl std::fmt::Debug for Downloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Downloader")
            .field("settings", &self.settings)
            .field("progress_listeners", &self.progress_listeners.len())
            .finish_non_exhaustive()
    }
}

impl Downloader {
    #[must_use]
    pub fn new(api: Arc<dyn CatalogApi>) -> Self {
        let settings = DownloadSettings::default();

        Self {
            api,
            tag_writer: Arc::new(AudiotagsWriter),
            templates: Arc::new(DefaultNameTemplates),
            stats: Arc::new(StatsAggregator::new(settings.dry_run)),
            settings: Arc::new(settings),
            cancel: CancellationToken::new(),
            progress_listeners: vec![],
            registry: Arc::new(CollectionRegistry::new()),
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: DownloadSettings) -> Self {
        self.stats = Arc::new(StatsAggregator::new(settings.dry_run));
        self.settings = Arc::new(settings);
        self
    }

    #[must_use]
    pub fn with_tag_writer(mut self, tag_writer: Arc<dyn TagWriter>) -> Self {
        self.tag_writer = tag_writer;
        self
    }

    #[must_use]
    pub fn with_templates(mut self, templates: Arc<dyn NameTemplates>) -> Self {
        self.templates = templates;
        self
    }

    #[must_use]
    pub fn with_cancellation_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Listeners only receive events when tracks are downloaded sequentially.
    #[must_use]
    pub fn add_progress_listener(mut self, listener: ProgressListener) -> Self {
        self.progress_listeners.push(listener);
        self
    }

    #[must_use]
    pub fn settings(&self) -> &DownloadSettings {
        &self.settings
    }

    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[must_use]
    pub fn statistics(&self) -> DownloadStatistics {
        self.stats.snapshot()
    }

    #[must_use]
    pub fn context(&self) -> DownloadContext {
        let progress_listeners: Arc<[ProgressListener]> = if self.settings.is_concurrent() {
            Arc::new([])
        } else {
            self.progress_listeners.clone().into()
        };

        DownloadContext {
            api: self.api.clone(),
            tag_writer: self.tag_writer.clone(),
            templates: self.templates.clone(),
            settings: self.settings.clone(),
            stats: self.stats.clone(),
            registry: self.registry.clone(),
            cancel: self.cancel.clone(),
            progress_listeners,
        }
    }

    /// Downloads every item and reports on the run.
    ///
    /// Items are processed in order. An item already seen in this run is
    /// skipped, and artists are expanded into their releases. A failing item
    /// is recorded in the report without affecting the others.
    ///
    /// # Errors
    ///
    /// * If the output directory cannot be created
    pub async fn download_items(
        &self,
        items: &[DownloadItem],
    ) -> Result<DownloadReport, SetupError> {
        if !self.settings.dry_run {
            let path = self.settings.output_dir.clone();
            tokio::fs::create_dir_all(&path)
                .await
                .map_err(|source| SetupError::OutputDir { path, source })?;
        }

        let ctx = self.context();

        self.stats.start();

        'items: for item in items {
            if self.cancel.is_cancelled() {
                log::debug!("Cancelled before {}", item.key());
                self.stats.mark_interrupted();
                break;
            }

            if item.category != ItemCategory::Artist {
                self.process_item(&ctx, item).await;
                continue;
            }

            if !self.registry.claim(item.key()) {
                continue;
            }

            let releases = match self
                .cancel
                .run_until_cancelled(self.api.fetch_artist_releases(item.id))
                .await
            {
                Some(Ok(releases)) => releases,
                Some(Err(e)) if e.is_cancelled() => {
                    self.stats.mark_interrupted();
                    break;
                }
                Some(Err(e)) => {
                    self.stats.record_error(DownloadError::for_item(
                        item,
                        DownloadPhase::Metadata,
                        e.to_string(),
                    ));
                    continue;
                }
                None => {
                    self.stats.mark_interrupted();
                    break;
                }
            };

            log::debug!("Artist {} has {} releases", item.id, releases.len());

            for release in releases
                .iter()
                .filter(|x| x.category != ItemCategory::Artist)
            {
                if self.cancel.is_cancelled() {
                    self.stats.mark_interrupted();
                    break 'items;
                }

                self.process_item(&ctx, release).await;
            }
        }

        self.stats.finish();

        let report = DownloadReport::new(self.stats.snapshot(), &self.settings.retry_command);

        log::debug!("Download finished: {report}");

        Ok(report)
    }

    async fn process_item(&self, ctx: &DownloadContext, item: &DownloadItem) {
        if !self.registry.claim(item.key()) {
            log::debug!("Skipping {}: already downloaded in this run", item.key());
            return;
        }

        match download_item(ctx, item).await {
            Ok(completed) => {
                log::debug!("Finished {} ({} tracks)", item.key(), completed.len());
            }
            Err(e) if e.is_cancelled() => {
                self.stats.mark_interrupted();
            }
            Err(e) => {
                self.stats
                    .record_error(DownloadError::for_item(item, e.phase(), e.to_string()));
            }
        }
    }

    /// Downloads the tracks of an already fetched collection.
    ///
    /// # Errors
    ///
    /// * If the collection cannot be registered
    pub async fn download_collection(
        &self,
        bundle: CollectionBundle,
    ) -> Result<Vec<CompletedTrack>, DownloadItemError> {
        download_bundle(&self.context(), bundle).await
    }
}

/// Fetches one top-level item and downloads its tracks.
///
/// # Errors
///
/// * If the item's metadata or stream locators cannot be fetched
/// * If the collection cannot be registered
/// * If the run is cancelled while fetching
pub async fn download_item(
    ctx: &DownloadContext,
    item: &DownloadItem,
) -> Result<Vec<CompletedTrack>, DownloadItemError> {
    let mut bundle = ctx
        .cancel
        .run_until_cancelled(ctx.api.fetch_collection(item))
        .await
        .ok_or(DownloadItemError::Cancelled)??;

    if item.category.uses_prefetched_streams() && bundle.metadata.streams.is_none() {
        let locators = ctx
            .cancel
            .run_until_cancelled(ctx.api.fetch_chapter_locators(&bundle.track_ids))
            .await
            .ok_or(DownloadItemError::Cancelled)??;

        bundle.metadata.streams = Some(locators);
    }

    download_bundle(ctx, bundle).await
}

async fn download_bundle(
    ctx: &DownloadContext,
    bundle: CollectionBundle,
) -> Result<Vec<CompletedTrack>, DownloadItemError> {
    let key = bundle.item.key();

    let (collection, _) = ctx
        .registry
        .get_or_register(key, || async {
            Ok(registry::build_collection(ctx, &bundle))
        })
        .await?;

    Ok(orchestrator::download_collection_tracks(ctx, &collection, Arc::new(bundle.metadata)).await)
}
