use std::{path::PathBuf, time::Duration};

use trackfetch_config::file::DownloadConfig;
use trackfetch_downloader_models::TrackQuality;

pub const DEFAULT_RETRY_COMMAND: &str = "trackfetch";

/// Fully resolved settings for one download run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSettings {
    pub output_dir: PathBuf,
    pub quality: TrackQuality,
    pub min_quality: Option<TrackQuality>,
    /// Seconds, inclusive
    pub min_duration: Option<u32>,
    /// Seconds, inclusive
    pub max_duration: Option<u32>,
    pub max_concurrency: usize,
    pub max_pause: Duration,
    /// Bytes per second
    pub rate_limit: Option<u64>,
    pub overwrite: bool,
    pub dry_run: bool,
    pub create_folder_for_singles: bool,
    pub embed_cover: bool,
    pub download_lyrics: bool,
    pub save_description: bool,
    pub retry_command: String,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            output_dir: trackfetch_config::get_default_download_dir_path()
                .unwrap_or_else(|| PathBuf::from("downloads")),
            quality: TrackQuality::Lossless,
            min_quality: None,
            min_duration: None,
            max_duration: None,
            max_concurrency: 1,
            max_pause: Duration::ZERO,
            rate_limit: None,
            overwrite: false,
            dry_run: false,
            create_folder_for_singles: false,
            embed_cover: true,
            download_lyrics: false,
            save_description: true,
            retry_command: DEFAULT_RETRY_COMMAND.to_string(),
        }
    }
}

impl DownloadSettings {
    #[must_use]
    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = output_dir.into();
        self
    }

    #[must_use]
    pub const fn with_quality(mut self, quality: TrackQuality) -> Self {
        self.quality = quality;
        self
    }

    #[must_use]
    pub const fn with_min_quality(mut self, min_quality: Option<TrackQuality>) -> Self {
        self.min_quality = min_quality;
        self
    }

    #[must_use]
    pub const fn with_min_duration(mut self, seconds: Option<u32>) -> Self {
        self.min_duration = seconds;
        self
    }

    #[must_use]
    pub const fn with_max_duration(mut self, seconds: Option<u32>) -> Self {
        self.max_duration = seconds;
        self
    }

    /// Values below `1` are treated as `1`.
    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    #[must_use]
    pub const fn with_max_pause(mut self, max_pause: Duration) -> Self {
        self.max_pause = max_pause;
        self
    }

    /// `Some(0)` means unlimited.
    #[must_use]
    pub fn with_rate_limit(mut self, bytes_per_second: Option<u64>) -> Self {
        self.rate_limit = bytes_per_second.filter(|x| *x > 0);
        self
    }

    #[must_use]
    pub const fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    #[must_use]
    pub const fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    #[must_use]
    pub const fn with_create_folder_for_singles(mut self, create: bool) -> Self {
        self.create_folder_for_singles = create;
        self
    }

    #[must_use]
    pub const fn with_embed_cover(mut self, embed_cover: bool) -> Self {
        self.embed_cover = embed_cover;
        self
    }

    #[must_use]
    pub const fn with_download_lyrics(mut self, download_lyrics: bool) -> Self {
        self.download_lyrics = download_lyrics;
        self
    }

    #[must_use]
    pub const fn with_save_description(mut self, save_description: bool) -> Self {
        self.save_description = save_description;
        self
    }

    #[must_use]
    pub fn with_retry_command(mut self, retry_command: impl Into<String>) -> Self {
        self.retry_command = retry_command.into();
        self
    }

    #[must_use]
    pub const fn is_concurrent(&self) -> bool {
        self.max_concurrency > 1
    }
}

impl From<DownloadConfig> for DownloadSettings {
    fn from(config: DownloadConfig) -> Self {
        let defaults = Self::default();

        Self {
            output_dir: config.output_dir.unwrap_or(defaults.output_dir),
            quality: config.quality.unwrap_or(defaults.quality),
            min_quality: config.min_quality,
            min_duration: config.min_duration,
            max_duration: config.max_duration,
            max_concurrency: config
                .max_concurrency
                .map_or(defaults.max_concurrency, |x| x.max(1)),
            max_pause: config
                .max_pause_millis
                .map_or(defaults.max_pause, Duration::from_millis),
            rate_limit: config.rate_limit.filter(|x| *x > 0),
            overwrite: config.overwrite.unwrap_or(defaults.overwrite),
            dry_run: config.dry_run.unwrap_or(defaults.dry_run),
            create_folder_for_singles: config
                .create_folder_for_singles
                .unwrap_or(defaults.create_folder_for_singles),
            embed_cover: config.embed_cover.unwrap_or(defaults.embed_cover),
            download_lyrics: config.download_lyrics.unwrap_or(defaults.download_lyrics),
            save_description: config.save_description.unwrap_or(defaults.save_description),
            retry_command: config.retry_command.unwrap_or(defaults.retry_command),
        }
    }
}
