//! The per-track workflow: filter, resolve, download, tag, publish, finalize.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use thiserror::Error;
use trackfetch_downloader_models::{Lyrics, TagMap, TrackBundle, TrackMetadata, TrackQuality, tag};

use crate::{
    Cancellable,
    atomic::{
        AtomicTrackDownloader, DownloadFileError, DownloadOutcome, PartFile, PublishError,
        append_extension,
    },
    context::DownloadContext,
    filter::{FilterEngine, Skip, SkipReason},
    progress::ProgressListener,
    quality::{QualityResolution, QualityResolver, ResolveQualityError},
    registry::{AudioCollection, RegisterCollectionError},
    stats::{DownloadError, DownloadPhase},
    tags::{TagRequest, TagWriteError},
    template::sanitize_filename,
    throttle::RateLimit,
};

/// One track of a collection, numbered from 1 in track-list order.
#[derive(Debug, Clone)]
pub struct DownloadTrackRequest {
    pub index: usize,
    pub track_id: u64,
    pub metadata: Arc<TrackBundle>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackOutcome {
    /// In dry-run mode `bytes` is the size estimate and nothing was written
    Downloaded { bytes: u64, path: PathBuf },
    Skipped(Skip),
}

impl TrackOutcome {
    /// Whether the track's file is in place, either just published or left
    /// from an earlier run.
    #[must_use]
    pub fn has_file(&self) -> bool {
        match self {
            Self::Downloaded { .. } => true,
            Self::Skipped(skip) => skip.reason == SkipReason::Exists,
        }
    }
}

#[derive(Debug, Error)]
pub enum DownloadTrackError {
    #[error("Track {0} not found in collection metadata")]
    NotFound(u64),
    #[error(transparent)]
    Resolve(#[from] ResolveQualityError),
    #[error(transparent)]
    Collection(#[from] RegisterCollectionError),
    #[error(transparent)]
    DownloadFile(#[from] DownloadFileError),
    #[error(transparent)]
    TagWrite(#[from] TagWriteError),
    #[error(transparent)]
    Publish(#[from] PublishError),
    #[error("Cancelled")]
    Cancelled,
}

impl DownloadTrackError {
    #[must_use]
    pub const fn phase(&self) -> DownloadPhase {
        match self {
            Self::NotFound(_) => DownloadPhase::Metadata,
            Self::Resolve(_) => DownloadPhase::Resolve,
            Self::Collection(_) => DownloadPhase::Collection,
            Self::DownloadFile(_) | Self::Cancelled => DownloadPhase::Download,
            Self::TagWrite(_) => DownloadPhase::Tag,
            Self::Publish(_) => DownloadPhase::Publish,
        }
    }
}

impl Cancellable for DownloadTrackError {
    fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Resolve(e) => e.is_cancelled(),
            Self::Collection(e) => e.is_cancelled(),
            Self::DownloadFile(e) => e.is_cancelled(),
            Self::Publish(e) => e.is_cancelled(),
            Self::NotFound(_) | Self::TagWrite(_) => false,
        }
    }
}

fn track_tags(
    collection: &AudioCollection,
    metadata: &TrackBundle,
    track: &TrackMetadata,
    index: usize,
) -> TagMap {
    let mut tags = metadata.track_tags(track);

    for (key, value) in &collection.tags {
        if key != tag::TITLE {
            tags.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }

    if collection.is_playlist() {
        tags.insert(tag::PLAYLIST.to_string(), collection.title.clone());
        tags.insert(tag::PLAYLIST_TRACK.to_string(), index.to_string());
    }

    tags
}

async fn fetch_lyrics(ctx: &DownloadContext, track: &TrackMetadata) -> Option<Lyrics> {
    if !ctx.settings.download_lyrics || !track.has_lyrics {
        return None;
    }

    match ctx
        .cancel
        .run_until_cancelled(ctx.api.fetch_lyrics(track.id))
        .await
    {
        Some(Ok(lyrics)) => lyrics,
        Some(Err(e)) => {
            if !e.is_cancelled() {
                log::warn!("Failed to fetch lyrics for track {}: {e:?}", track.id);
            }
            None
        }
        None => None,
    }
}

async fn save_lyrics_sidecar(path: PathBuf, lyrics: &Lyrics) {
    let Lyrics::Synced(text) = lyrics else {
        return;
    };

    if let Err(e) = tokio::fs::write(&path, text).await {
        log::warn!("Failed to save lyrics to {}: {e:?}", path.display());
    }
}

async fn tag_and_publish(
    ctx: &DownloadContext,
    collection: &AudioCollection,
    mut part: PartFile,
    quality: TrackQuality,
    tags: &TagMap,
    lyrics: Option<&Lyrics>,
) -> Result<(u64, PathBuf), DownloadTrackError> {
    let embed_cover = ctx.settings.embed_cover;
    let cover = match collection.cover() {
        Some(cover) if embed_cover => Some(cover.read().await),
        _ => None,
    };

    part.tag(|path| {
        ctx.tag_writer.write_tags(&TagRequest {
            path,
            cover: cover.as_ref().map(|x| x.path.as_path()),
            quality,
            tags,
            lyrics,
            embed_cover,
        })
    })?;

    drop(cover);

    let bytes = part.bytes_written();
    let path = part.publish().await?;

    Ok((bytes, path))
}

/// Downloads one track into its collection's folder.
///
/// # Errors
///
/// * If the track is missing from the collection's metadata
/// * If quality resolution, the download, tagging, or publishing fails
pub async fn download_track(
    ctx: &DownloadContext,
    collection: &AudioCollection,
    resolver: &QualityResolver,
    request: &DownloadTrackRequest,
    listeners: &[ProgressListener],
) -> Result<TrackOutcome, DownloadTrackError> {
    let settings = &ctx.settings;

    let track = request
        .metadata
        .track(request.track_id)
        .ok_or(DownloadTrackError::NotFound(request.track_id))?;

    if let Some(skip) = FilterEngine::from_settings(settings).evaluate(track) {
        return Ok(TrackOutcome::Skipped(skip));
    }

    let resolution = ctx
        .cancel
        .run_until_cancelled(resolver.resolve(
            ctx.api.as_ref(),
            track,
            settings.quality,
            settings.min_quality,
        ))
        .await
        .ok_or(DownloadTrackError::Cancelled)??;

    let (quality, locator) = match resolution {
        QualityResolution::Resolved { quality, locator } => (quality, locator),
        QualityResolution::Skip { skip, .. } => return Ok(TrackOutcome::Skipped(skip)),
    };

    let tags = track_tags(collection, &request.metadata, track, request.index);
    let stem = track_stem(ctx, collection, &tags);
    let final_path = collection
        .folder
        .join(append_extension(Path::new(&stem), quality.extension()));

    log::debug!(
        "Downloading track {} ({}/{}) at {quality} to {}",
        track.id,
        request.index,
        collection.total_tracks,
        final_path.display()
    );

    collection.prepare(ctx, &stem).await?;

    let downloader = AtomicTrackDownloader {
        api: ctx.api.as_ref(),
        overwrite: settings.overwrite,
        dry_run: settings.dry_run,
        rate_limit: settings.rate_limit.and_then(RateLimit::bytes_per_second),
        cancel: &ctx.cancel,
    };

    let part = match downloader
        .download(&locator, &final_path, track.id, listeners)
        .await?
    {
        DownloadOutcome::AlreadyExists => {
            return Ok(TrackOutcome::Skipped(Skip::new(
                SkipReason::Exists,
                format!("{} already exists", final_path.display()),
            )));
        }
        DownloadOutcome::DryRun { size } => {
            return Ok(TrackOutcome::Downloaded {
                bytes: size.unwrap_or(0),
                path: final_path,
            });
        }
        DownloadOutcome::Staged(part) => part,
    };

    let lyrics = fetch_lyrics(ctx, track).await;

    let (bytes, path) =
        tag_and_publish(ctx, collection, part, quality, &tags, lyrics.as_ref()).await?;

    if let Some(lyrics) = &lyrics {
        save_lyrics_sidecar(append_extension(&collection.folder.join(&stem), "lrc"), lyrics)
            .await;
        ctx.stats.record_lyrics();
    }

    Ok(TrackOutcome::Downloaded { bytes, path })
}

fn track_stem(ctx: &DownloadContext, collection: &AudioCollection, tags: &TagMap) -> String {
    sanitize_filename(&ctx.templates.track_filename(
        collection.is_playlist(),
        tags,
        collection.total_tracks,
    ))
}

async fn finalize_assets(
    ctx: &DownloadContext,
    collection: &AudioCollection,
    request: &DownloadTrackRequest,
    stem: &str,
) {
    let overwrite = ctx.settings.overwrite;

    let results = [
        collection
            .finalize_cover(request.index, stem, overwrite)
            .await,
        collection
            .finalize_description(request.index, stem, overwrite)
            .await,
    ];

    for e in results.into_iter().filter_map(Result::err) {
        ctx.stats.record_error(DownloadError::for_track(
            request.track_id,
            None,
            collection.parent(),
            DownloadPhase::Finalize,
            e.to_string(),
        ));
    }
}

/// Runs [`download_track`] and records its outcome in the run statistics.
///
/// Returns `None` when the track failed or was cancelled.
pub async fn process_track(
    ctx: &DownloadContext,
    collection: &AudioCollection,
    resolver: &QualityResolver,
    request: &DownloadTrackRequest,
    listeners: &[ProgressListener],
) -> Option<TrackOutcome> {
    let result = download_track(ctx, collection, resolver, request, listeners).await;
    let track = request.metadata.track(request.track_id);
    let title = track.map(|x| x.title.clone());

    match result {
        Ok(outcome) => {
            if let Some(track) = track {
                let tags = track_tags(collection, &request.metadata, track, request.index);
                let stem = track_stem(ctx, collection, &tags);
                finalize_assets(ctx, collection, request, &stem).await;
            }

            match &outcome {
                TrackOutcome::Downloaded { bytes, .. } => ctx.stats.record_downloaded(*bytes),
                TrackOutcome::Skipped(skip) => {
                    let record = (skip.reason != SkipReason::Exists).then(|| {
                        DownloadError::for_track(
                            request.track_id,
                            title,
                            collection.parent(),
                            DownloadPhase::Filter,
                            skip.message.clone(),
                        )
                    });
                    log::info!("Skipping track {}: {skip}", request.track_id);
                    ctx.stats.record_skipped(skip.reason, record);
                }
            }

            Some(outcome)
        }
        Err(e) if e.is_cancelled() => {
            log::debug!("Track {} cancelled", request.track_id);
            ctx.stats.mark_interrupted();
            None
        }
        Err(e) => {
            ctx.stats.record_failed(DownloadError::for_track(
                request.track_id,
                title,
                collection.parent(),
                e.phase(),
                e.to_string(),
            ));
            None
        }
    }
}
