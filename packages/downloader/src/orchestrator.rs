//! Drives every track of a collection through the per-track workflow.
//!
//! With a concurrency of one, tracks run in list order on the calling task and
//! progress listeners are attached. Otherwise each track is submitted to a
//! [`TaskPool`] and no progress events are emitted.

use std::{sync::Arc, time::Duration};

use rand::Rng as _;
use trackfetch_downloader_models::TrackBundle;

use crate::{
    context::DownloadContext,
    pool::{SubmitError, TaskPool},
    quality::QualityResolver,
    registry::AudioCollection,
    stats::{DownloadError, DownloadPhase},
    track::{DownloadTrackRequest, TrackOutcome, process_track},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedTrack {
    pub index: usize,
    pub track_id: u64,
    /// `None` when the track failed or was cancelled
    pub outcome: Option<TrackOutcome>,
}

/// Sleeps for a random duration up to the configured maximum pause.
async fn random_pause(ctx: &DownloadContext) {
    let max = ctx.settings.max_pause;

    if max.is_zero() {
        return;
    }

    let max_millis = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    let millis = rand::rng().random_range(0..=max_millis);

    log::trace!("Pausing for {millis}ms");

    ctx.cancel
        .run_until_cancelled(tokio::time::sleep(Duration::from_millis(millis)))
        .await;
}

fn requests(
    collection: &AudioCollection,
    metadata: &Arc<TrackBundle>,
) -> impl Iterator<Item = DownloadTrackRequest> {
    collection
        .track_ids
        .iter()
        .enumerate()
        .map(|(i, track_id)| DownloadTrackRequest {
            index: i + 1,
            track_id: *track_id,
            metadata: metadata.clone(),
        })
}

async fn run_sequential(
    ctx: &DownloadContext,
    collection: &AudioCollection,
    resolver: &QualityResolver,
    metadata: &Arc<TrackBundle>,
) -> Vec<CompletedTrack> {
    let mut completed = Vec::with_capacity(collection.total_tracks);

    for request in requests(collection, metadata) {
        if request.index > 1 {
            random_pause(ctx).await;
        }

        if ctx.cancel.is_cancelled() {
            log::debug!("Cancelled before track {}", request.track_id);
            ctx.stats.mark_interrupted();
            break;
        }

        let outcome = process_track(
            ctx,
            collection,
            resolver,
            &request,
            &ctx.progress_listeners,
        )
        .await;

        completed.push(CompletedTrack {
            index: request.index,
            track_id: request.track_id,
            outcome,
        });
    }

    completed
}

async fn run_concurrent(
    ctx: &DownloadContext,
    collection: &Arc<AudioCollection>,
    resolver: &QualityResolver,
    metadata: &Arc<TrackBundle>,
) -> Vec<CompletedTrack> {
    let mut pool = TaskPool::new(ctx.settings.max_concurrency, ctx.cancel.clone());

    for request in requests(collection, metadata) {
        if ctx.cancel.is_cancelled() {
            log::debug!("Cancelled before dispatching track {}", request.track_id);
            ctx.stats.mark_interrupted();
            break;
        }

        let task_ctx = ctx.clone();
        let task_collection = collection.clone();
        let task_resolver = resolver.clone();

        let submitted = pool
            .submit(async move {
                let outcome = process_track(
                    &task_ctx,
                    &task_collection,
                    &task_resolver,
                    &request,
                    &[],
                )
                .await;

                random_pause(&task_ctx).await;

                CompletedTrack {
                    index: request.index,
                    track_id: request.track_id,
                    outcome,
                }
            })
            .await;

        match submitted {
            Ok(()) => {}
            Err(SubmitError::Cancelled) => {
                ctx.stats.mark_interrupted();
                break;
            }
            Err(e) => {
                log::error!("Failed to dispatch track: {e:?}");
                break;
            }
        }
    }

    let mut completed = Vec::with_capacity(pool.len());

    for result in pool.join_all().await {
        match result {
            Ok(track) => completed.push(track),
            Err(e) => log::error!("Track task failed: {e:?}"),
        }
    }

    completed
}

/// Processes every track of `collection` exactly once.
///
/// Returns the processed tracks in completion order. Cover and description
/// files whose trigger track never completed are settled before returning.
pub async fn download_collection_tracks(
    ctx: &DownloadContext,
    collection: &Arc<AudioCollection>,
    metadata: Arc<TrackBundle>,
) -> Vec<CompletedTrack> {
    let resolver = QualityResolver::for_collection(collection.item.category, &metadata);

    log::debug!(
        "Downloading {} tracks of {} ({}) with concurrency {}",
        collection.total_tracks,
        collection.item.key(),
        collection.title,
        ctx.settings.max_concurrency
    );

    let completed = if ctx.settings.is_concurrent() {
        run_concurrent(ctx, collection, &resolver, &metadata).await
    } else {
        run_sequential(ctx, collection, &resolver, &metadata).await
    };

    let published = completed
        .iter()
        .any(|x| x.outcome.as_ref().is_some_and(TrackOutcome::has_file));

    for e in collection.settle_assets(published, ctx.settings.overwrite).await {
        ctx.stats.record_error(DownloadError::for_item(
            &collection.item,
            DownloadPhase::Finalize,
            e.to_string(),
        ));
    }

    completed
}
