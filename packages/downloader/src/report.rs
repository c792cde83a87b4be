//! End-of-run summary.

use std::{fmt::Write as _, time::Duration};

use bytesize::ByteSize;

use crate::stats::{DownloadError, DownloadPhase, DownloadStatistics, ParentCollection};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    pub statistics: DownloadStatistics,
    pub elapsed: Duration,
    /// Command line re-running only the failed top-level items
    pub retry_command: Option<String>,
}

impl DownloadReport {
    #[must_use]
    pub fn new(statistics: DownloadStatistics, program: &str) -> Self {
        let elapsed = statistics.elapsed();
        let urls = failed_urls(&statistics);

        let retry_command =
            (!urls.is_empty()).then(|| format!("{program} {}", shell_words::join(&urls)));

        Self {
            statistics,
            elapsed,
            retry_command,
        }
    }

    /// Bytes per second over the whole run.
    #[must_use]
    pub fn throughput(&self) -> Option<u64> {
        let secs = self.elapsed.as_secs_f64();

        if secs <= 0.0 {
            return None;
        }

        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        let throughput = (self.statistics.bytes as f64 / secs) as u64;

        Some(throughput)
    }

    /// Failures of top-level items, such as a collection whose metadata could
    /// not be fetched.
    pub fn collection_errors(&self) -> impl Iterator<Item = &DownloadError> {
        self.statistics
            .failures()
            .filter(|x| x.is_collection_level())
    }

    /// Track failures grouped by the collection they belong to, in first-seen
    /// order.
    #[must_use]
    pub fn track_errors_by_parent(&self) -> Vec<(&ParentCollection, Vec<&DownloadError>)> {
        let mut groups: Vec<(&ParentCollection, Vec<&DownloadError>)> = vec![];

        for error in self.statistics.failures() {
            let Some(parent) = &error.parent else {
                continue;
            };

            if let Some((_, errors)) = groups.iter_mut().find(|(x, _)| x.key == parent.key) {
                errors.push(error);
            } else {
                groups.push((parent, vec![error]));
            }
        }

        groups
    }

    /// Whether nothing failed and the run was not interrupted.
    #[must_use]
    pub fn is_success(&self) -> bool {
        !self.statistics.interrupted && self.statistics.failures().next().is_none()
    }
}

/// Distinct URLs of failed top-level items, in first-seen order.
///
/// Failed tracks are listed in the report but do not put their collection on
/// the retry command.
fn failed_urls(statistics: &DownloadStatistics) -> Vec<&str> {
    let mut urls: Vec<&str> = vec![];

    for error in statistics
        .failures()
        .filter(|x| x.is_collection_level() && x.phase != DownloadPhase::Finalize)
    {
        if let Some(url) = error.url.as_deref()
            && !urls.contains(&url)
        {
            urls.push(url);
        }
    }

    urls
}

impl std::fmt::Display for DownloadReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = &self.statistics;
        let mut out = String::new();

        if stats.dry_run {
            writeln!(out, "Download summary (dry run)")?;
        } else {
            writeln!(out, "Download summary")?;
        }

        writeln!(out, "  Processed:  {}", stats.processed)?;
        write!(
            out,
            "  Downloaded: {} ({}",
            stats.downloaded,
            ByteSize::b(stats.bytes)
        )?;
        if let Some(throughput) = self.throughput() {
            write!(out, ", {}/s", ByteSize::b(throughput))?;
        }
        writeln!(out, ")")?;
        writeln!(
            out,
            "  Skipped:    {} (exists: {}, quality: {}, duration: {})",
            stats.skipped, stats.skipped_exists, stats.skipped_quality, stats.skipped_duration
        )?;
        writeln!(out, "  Failed:     {}", stats.failed)?;
        writeln!(out, "  Lyrics:     {}", stats.lyrics)?;
        writeln!(out, "  Covers:     {}", stats.covers)?;
        writeln!(out, "  Elapsed:    {:.1}s", self.elapsed.as_secs_f64())?;

        if stats.interrupted {
            writeln!(out, "  Interrupted before all items were processed")?;
        }

        let collection_errors = self.collection_errors().collect::<Vec<_>>();
        if !collection_errors.is_empty() {
            writeln!(out, "\nCollection errors:")?;
            for error in collection_errors {
                write!(out, "  {error}")?;
                if let Some(url) = &error.url {
                    write!(out, " <{url}>")?;
                }
                writeln!(out)?;
            }
        }

        let track_errors = self.track_errors_by_parent();
        if !track_errors.is_empty() {
            writeln!(out, "\nTrack errors:")?;
            for (parent, errors) in track_errors {
                writeln!(out, "  {} ({}) <{}>", parent.title, parent.key, parent.url)?;
                for error in errors {
                    writeln!(out, "    {error}")?;
                }
            }
        }

        let skips = stats.skips().collect::<Vec<_>>();
        if !skips.is_empty() {
            writeln!(out, "\nSkipped tracks:")?;
            for skip in skips {
                writeln!(out, "  {skip}")?;
            }
        }

        if let Some(command) = &self.retry_command {
            writeln!(out, "\nRetry failed items with:\n  {command}")?;
        }

        f.write_str(out.trim_end())
    }
}
