use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use trackfetch_downloader_models::TrackQuality;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] json5::Error),
    #[error("Config directory not found")]
    ConfigDirNotFound,
}

/// Download settings as written in `config.json5`.
///
/// Every field is optional; unset fields fall back to the downloader's
/// defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DownloadConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,

    /// Desired quality tier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<TrackQuality>,

    /// Tracks that cannot be fetched at this tier or better are skipped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_quality: Option<TrackQuality>,

    /// Seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_duration: Option<u32>,

    /// Seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_duration: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,

    /// Upper bound of the random pause between tracks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_pause_millis: Option<u64>,

    /// Bytes per second, `0` for unlimited
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub overwrite: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_folder_for_singles: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub embed_cover: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_lyrics: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub save_description: Option<bool>,

    /// Program name used when printing the retry command
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_command: Option<String>,
}

/// Get the path to a config file, preferring .json5 but also checking .json
fn get_config_file_path(dir: &Path, filename: &str) -> Option<PathBuf> {
    let json5_path = dir.join(format!("{filename}.json5"));
    if json5_path.exists() {
        return Some(json5_path);
    }

    let json_path = dir.join(format!("{filename}.json"));
    if json_path.exists() {
        return Some(json_path);
    }

    None
}

fn load_config_file<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config = json5::from_str(&content)?;
    Ok(config)
}

/// Load the download configuration from the config directory.
///
/// # Errors
///
/// * If the config directory cannot be found
/// * If the config file cannot be read
/// * If the config file is malformed
pub fn load_download_config() -> Result<DownloadConfig, ConfigError> {
    let config_dir = crate::get_config_dir_path().ok_or(ConfigError::ConfigDirNotFound)?;

    load_download_config_in(&config_dir)
}

/// Load the download configuration from `config.json5`/`config.json` in `dir`.
///
/// A missing file yields the default configuration.
///
/// # Errors
///
/// * If the config file cannot be read
/// * If the config file is malformed
pub fn load_download_config_in(dir: &Path) -> Result<DownloadConfig, ConfigError> {
    if let Some(path) = get_config_file_path(dir, "config") {
        log::debug!("Loading download config from {}", path.display());
        load_config_file(&path)
    } else {
        Ok(DownloadConfig::default())
    }
}

/// Load the download configuration from an explicit file.
///
/// # Errors
///
/// * If the config file cannot be read
/// * If the config file is malformed
pub fn load_download_config_from(path: &Path) -> Result<DownloadConfig, ConfigError> {
    load_config_file(path)
}
