//! Configuration directory resolution and config-file loading for trackfetch.
//!
//! The configuration root defaults to `~/.local/trackfetch` and can be
//! overridden with [`set_root_dir`], which tests use to point everything at a
//! temporary directory.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use std::{
    path::PathBuf,
    sync::{LazyLock, Mutex, PoisonError},
};

#[cfg(feature = "file")]
pub mod file;

static ROOT_DIR: LazyLock<Mutex<Option<PathBuf>>> = LazyLock::new(|| Mutex::new(None));

/// Sets the root directory for trackfetch configuration.
///
/// By default, the root directory is `~/.local/trackfetch`.
pub fn set_root_dir(path: PathBuf) {
    *ROOT_DIR.lock().unwrap_or_else(PoisonError::into_inner) = Some(path);
}

#[must_use]
fn get_root_dir() -> Option<PathBuf> {
    let mut root_dir = ROOT_DIR.lock().unwrap_or_else(PoisonError::into_inner);

    if root_dir.is_some() {
        return root_dir.clone();
    }

    *root_dir = home::home_dir().map(|home| home.join(".local").join("trackfetch"));

    root_dir.clone()
}

/// Returns the path to the trackfetch configuration directory.
///
/// Defaults to `~/.local/trackfetch` unless overridden with [`set_root_dir`].
#[must_use]
pub fn get_config_dir_path() -> Option<PathBuf> {
    get_root_dir()
}

/// Returns the directory downloads land in when no output directory is
/// configured: `~/.local/trackfetch/downloads`.
#[must_use]
pub fn get_default_download_dir_path() -> Option<PathBuf> {
    get_config_dir_path().map(|config| config.join("downloads"))
}

/// Returns the path to the configuration directory, creating it if it doesn't exist.
///
/// Returns `None` if the directory cannot be created or the path cannot be determined.
#[must_use]
pub fn make_config_dir_path() -> Option<PathBuf> {
    if let Some(path) = get_config_dir_path()
        && (path.is_dir() || std::fs::create_dir_all(&path).is_ok())
    {
        return Some(path);
    }

    log::debug!("Could not create config directory");

    None
}
