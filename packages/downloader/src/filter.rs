//! Inclusion filters evaluated before any stream is requested.
//!
//! Nothing here performs I/O. A failing check produces a [`Skip`], which the
//! pipeline counts separately from failures.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use trackfetch_downloader_models::{TrackMetadata, TrackQuality};

use crate::DownloadSettings;

#[derive(
    Debug, Serialize, Deserialize, EnumString, AsRefStr, Display, Clone, Copy, PartialEq, Eq, Hash,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SkipReason {
    /// The final file is already on disk and overwrite is disabled
    Exists,
    Quality,
    Duration,
}

/// A policy-driven exclusion of one track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skip {
    pub reason: SkipReason,
    pub message: String,
}

impl Skip {
    #[must_use]
    pub fn new(reason: SkipReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Skip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Checks a duration in seconds against inclusive bounds.
#[must_use]
pub fn check_duration(duration: u32, min: Option<u32>, max: Option<u32>) -> Option<Skip> {
    if let Some(min) = min
        && duration < min
    {
        return Some(Skip::new(
            SkipReason::Duration,
            format!("duration below minimum threshold ({duration}s < {min}s)"),
        ));
    }

    if let Some(max) = max
        && duration > max
    {
        return Some(Skip::new(
            SkipReason::Duration,
            format!("duration above maximum threshold ({duration}s > {max}s)"),
        ));
    }

    None
}

#[must_use]
pub fn check_min_quality(quality: TrackQuality, min: Option<TrackQuality>) -> Option<Skip> {
    let min = min?;

    (quality < min).then(|| {
        Skip::new(
            SkipReason::Quality,
            format!("quality below minimum threshold ({quality} < {min})"),
        )
    })
}

/// The metadata-only checks configured for a run.
///
/// The minimum-quality check needs a resolved quality and is applied by the
/// quality resolver through [`check_min_quality`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterEngine {
    pub min_duration: Option<u32>,
    pub max_duration: Option<u32>,
}

impl FilterEngine {
    #[must_use]
    pub const fn from_settings(settings: &DownloadSettings) -> Self {
        Self {
            min_duration: settings.min_duration,
            max_duration: settings.max_duration,
        }
    }

    #[must_use]
    pub fn evaluate(&self, track: &TrackMetadata) -> Option<Skip> {
        check_duration(track.duration, self.min_duration, self.max_duration)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test_log::test]
    fn duration_bounds_are_inclusive() {
        assert_eq!(check_duration(30, Some(30), Some(60)), None);
        assert_eq!(check_duration(60, Some(30), Some(60)), None);
        assert_eq!(check_duration(0, None, None), None);
    }

    #[test_log::test]
    fn duration_below_minimum_is_skipped() {
        let skip = check_duration(15, Some(30), None).unwrap();

        assert_eq!(skip.reason, SkipReason::Duration);
        assert_eq!(skip.message, "duration below minimum threshold (15s < 30s)");
    }

    #[test_log::test]
    fn duration_above_maximum_is_skipped() {
        let skip = check_duration(61, None, Some(60)).unwrap();

        assert_eq!(skip.message, "duration above maximum threshold (61s > 60s)");
    }

    #[test_log::test]
    fn quality_below_minimum_is_skipped() {
        let skip = check_min_quality(TrackQuality::Standard, Some(TrackQuality::Lossless)).unwrap();

        assert_eq!(skip.reason, SkipReason::Quality);
        assert_eq!(
            skip.message,
            "quality below minimum threshold (standard < lossless)"
        );
        assert_eq!(check_min_quality(TrackQuality::High, Some(TrackQuality::High)), None);
        assert_eq!(check_min_quality(TrackQuality::Standard, None), None);
    }

    #[test_log::test]
    fn engine_uses_raw_track_duration() {
        let engine = FilterEngine {
            min_duration: Some(30),
            max_duration: None,
        };
        let track = TrackMetadata {
            duration: 29,
            ..Default::default()
        };

        assert_eq!(engine.evaluate(&track).map(|x| x.reason), Some(SkipReason::Duration));
    }

    #[test_log::test]
    fn skip_reasons_use_lowercase_names() {
        assert_eq!(SkipReason::Exists.to_string(), "exists");
        assert_eq!(SkipReason::Quality.as_ref(), "quality");
    }
}
