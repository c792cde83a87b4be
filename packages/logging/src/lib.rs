//! Logger initialisation shared by trackfetch binaries and tests.
//!
//! The filter is taken from, in order: the explicit argument to [`init`], the
//! `TRACKFETCH_LOG` environment variable, `RUST_LOG`, and finally a compiled
//! default.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

pub use log;
use thiserror::Error;

#[cfg(feature = "macros")]
mod macros;

#[cfg(debug_assertions)]
const DEFAULT_LOG_LEVEL: &str = "trackfetch=trace";
#[cfg(not(debug_assertions))]
const DEFAULT_LOG_LEVEL: &str = "trackfetch=info";

#[derive(Debug, Error)]
pub enum InitError {
    #[error(transparent)]
    SetLogger(#[from] log::SetLoggerError),
}

fn resolve_filter(
    filter: Option<&str>,
    trackfetch_log: Option<String>,
    rust_log: Option<String>,
) -> String {
    filter
        .map(ToString::to_string)
        .or(trackfetch_log)
        .or(rust_log)
        .filter(|x| !x.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string())
}

/// Installs the global logger.
///
/// # Errors
///
/// * If a global logger has already been installed
pub fn init(filter: Option<&str>) -> Result<(), InitError> {
    let filter = resolve_filter(
        filter,
        std::env::var("TRACKFETCH_LOG").ok(),
        std::env::var("RUST_LOG").ok(),
    );

    env_logger::Builder::new()
        .parse_filters(&filter)
        .format_timestamp_millis()
        .try_init()?;

    log::debug!("Initialized logging with filter '{filter}'");

    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test_log::test]
    fn explicit_filter_wins() {
        assert_eq!(
            resolve_filter(Some("debug"), Some("warn".into()), Some("error".into())),
            "debug"
        );
    }

    #[test_log::test]
    fn trackfetch_log_precedes_rust_log() {
        assert_eq!(
            resolve_filter(None, Some("warn".into()), Some("error".into())),
            "warn"
        );
        assert_eq!(resolve_filter(None, None, Some("error".into())), "error");
    }

    #[test_log::test]
    fn falls_back_to_default_level() {
        assert_eq!(resolve_filter(None, None, None), DEFAULT_LOG_LEVEL);
        assert_eq!(resolve_filter(None, Some("  ".into()), None), DEFAULT_LOG_LEVEL);
    }
}
