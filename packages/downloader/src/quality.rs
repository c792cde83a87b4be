//! Quality negotiation.
//!
//! The catalog may deliver a lower tier than requested, so the tier is always
//! re-derived from the shape of the returned locator.

use std::{collections::HashMap, sync::Arc};

use thiserror::Error;
use trackfetch_downloader_models::{
    ItemCategory, StreamLocators, TrackBundle, TrackMetadata, TrackQuality,
};

use crate::{
    Cancellable,
    catalog::{ApiError, CatalogApi},
    filter::{Skip, check_min_quality},
};

/// Derives the delivered tier from a stream locator.
///
/// Returns `None` when the locator does not match a known shape.
#[must_use]
pub fn quality_from_locator(locator: &str) -> Option<TrackQuality> {
    if locator.contains("/streamfl?") || locator.contains("/streamhls?") {
        Some(TrackQuality::Lossless)
    } else if locator.contains("/streamhq?") {
        Some(TrackQuality::High)
    } else if locator.contains("/stream?") {
        Some(TrackQuality::Standard)
    } else {
        None
    }
}

fn rederive(previous: TrackQuality, locator: &str) -> TrackQuality {
    let derived = quality_from_locator(locator).unwrap_or(previous);

    if derived != previous {
        log::debug!("Locator delivered {derived} instead of requested {previous}");
    }

    derived
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QualityResolution {
    Resolved {
        quality: TrackQuality,
        locator: String,
    },
    Skip {
        quality: TrackQuality,
        skip: Skip,
    },
}

impl QualityResolution {
    #[must_use]
    pub const fn quality(&self) -> TrackQuality {
        match self {
            Self::Resolved { quality, .. } | Self::Skip { quality, .. } => *quality,
        }
    }
}

#[derive(Debug, Error)]
pub enum ResolveQualityError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("No stream locators for track {0}")]
    NoLocators(u64),
}

impl Cancellable for ResolveQualityError {
    fn is_cancelled(&self) -> bool {
        match self {
            Self::Api(e) => e.is_cancelled(),
            Self::NoLocators(_) => false,
        }
    }
}

/// Resolution strategy, chosen once per collection.
#[derive(Debug, Clone)]
pub enum QualityResolver {
    /// One locator request per track
    Direct,
    /// Locators of every tier were fetched in bulk up front
    Prefetched(Arc<HashMap<u64, StreamLocators>>),
}

impl QualityResolver {
    #[must_use]
    pub fn for_collection(category: ItemCategory, metadata: &TrackBundle) -> Self {
        match &metadata.streams {
            Some(streams) if category.uses_prefetched_streams() => {
                Self::Prefetched(Arc::new(streams.clone()))
            }
            _ => Self::Direct,
        }
    }

    /// # Errors
    ///
    /// * If a prefetched track has no usable locators
    /// * If the locator request fails
    pub async fn resolve(
        &self,
        api: &dyn CatalogApi,
        track: &TrackMetadata,
        desired: TrackQuality,
        min: Option<TrackQuality>,
    ) -> Result<QualityResolution, ResolveQualityError> {
        match self {
            Self::Direct => resolve_direct(api, track, desired, min).await,
            Self::Prefetched(streams) => {
                let locators = streams
                    .get(&track.id)
                    .ok_or(ResolveQualityError::NoLocators(track.id))?;
                resolve_prefetched(track.id, locators, desired, min)
            }
        }
    }
}

async fn resolve_direct(
    api: &dyn CatalogApi,
    track: &TrackMetadata,
    desired: TrackQuality,
    min: Option<TrackQuality>,
) -> Result<QualityResolution, ResolveQualityError> {
    let available = track
        .highest_quality
        .as_deref()
        .and_then(TrackQuality::from_availability)
        .unwrap_or_else(|| {
            log::warn!(
                "Unrecognized quality {:?} for track {}, assuming {}",
                track.highest_quality,
                track.id,
                TrackQuality::Standard
            );
            TrackQuality::Standard
        });

    let capped = desired.min(available);

    if let Some(skip) = check_min_quality(capped, min) {
        return Ok(QualityResolution::Skip {
            quality: capped,
            skip,
        });
    }

    let locator = api.fetch_stream_locator(track.id, capped).await?;
    let quality = rederive(capped, &locator);

    Ok(QualityResolution::Resolved { quality, locator })
}

fn resolve_prefetched(
    track_id: u64,
    locators: &StreamLocators,
    desired: TrackQuality,
    min: Option<TrackQuality>,
) -> Result<QualityResolution, ResolveQualityError> {
    let available = locators
        .highest()
        .ok_or(ResolveQualityError::NoLocators(track_id))?;

    if let Some(skip) = check_min_quality(available, min) {
        return Ok(QualityResolution::Skip {
            quality: available,
            skip,
        });
    }

    let chosen = TrackQuality::DESCENDING
        .into_iter()
        .filter(|x| *x <= desired)
        .find(|x| locators.get(*x).is_some())
        .unwrap_or(available);

    let locator = locators
        .get(chosen)
        .ok_or(ResolveQualityError::NoLocators(track_id))?
        .to_string();
    let quality = rederive(chosen, &locator);

    Ok(QualityResolution::Resolved { quality, locator })
}
