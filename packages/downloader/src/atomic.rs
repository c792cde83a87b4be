//! Staged track files.
//!
//! A track is written to `<final>.part`, verified against the declared size,
//! tagged, and only then renamed to its final name. A [`PartFile`] walks
//! through [`CommitState`] and removes the `.part` file on every failed
//! transition, so a half-written file is never visible under its final name.

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

use futures::{Stream, StreamExt as _};
use thiserror::Error;
use tokio::{
    fs::File,
    io::{AsyncWriteExt as _, BufWriter},
};
use tokio_util::sync::CancellationToken;
use trackfetch_logging::debug_or_trace;

use crate::{
    Cancellable,
    catalog::{ApiError, BytesStream, CatalogApi},
    progress::{ProgressListener, ProgressReporter},
    tags::TagWriteError,
    throttle::{RateLimit, Throttled},
};

/// Appends `.{extension}` to the full file name.
///
/// Unlike [`Path::with_extension`] this never replaces an existing extension.
#[must_use]
pub fn append_extension(path: &Path, extension: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

#[must_use]
pub fn part_path(final_path: &Path) -> PathBuf {
    append_extension(final_path, "part")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitState {
    Fetching,
    Verifying,
    Tagging,
    Publishing,
    Done,
    Failed,
}

#[derive(Debug, Error)]
pub enum DownloadFileError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error("Failed to read stream after {bytes_read} bytes: {source}")]
    Read {
        bytes_read: u64,
        source: std::io::Error,
    },
    #[error("Failed to write after {bytes_read} bytes: {source}")]
    Write {
        bytes_read: u64,
        source: std::io::Error,
    },
    #[error("Size mismatch: expected {expected} bytes, wrote {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
    #[error("Invalid part file state: {0:?}")]
    InvalidState(CommitState),
    #[error("Cancelled")]
    Cancelled,
}

impl Cancellable for DownloadFileError {
    fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Api(e) => e.is_cancelled(),
            Self::IO(_)
            | Self::Read { .. }
            | Self::Write { .. }
            | Self::SizeMismatch { .. }
            | Self::InvalidState(_) => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error("Invalid part file state: {0:?}")]
    InvalidState(CommitState),
}

impl Cancellable for PublishError {
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// A `.part` file on its way to becoming a final track file.
#[derive(Debug)]
pub struct PartFile {
    part_path: PathBuf,
    final_path: PathBuf,
    file: Option<File>,
    state: CommitState,
    bytes_written: u64,
}

impl PartFile {
    /// Creates `<final_path>.part`, truncating any stale file left behind by
    /// an earlier run.
    ///
    /// # Errors
    ///
    /// * If the parent directory or the file cannot be created
    pub async fn create(final_path: &Path) -> Result<Self, DownloadFileError> {
        if let Some(parent) = final_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let part_path = part_path(final_path);

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&part_path)
            .await?;

        Ok(Self {
            part_path,
            final_path: final_path.to_path_buf(),
            file: Some(file),
            state: CommitState::Fetching,
            bytes_written: 0,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.part_path
    }

    #[must_use]
    pub const fn state(&self) -> CommitState {
        self.state
    }

    #[must_use]
    pub const fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    fn expect_state(&mut self, state: CommitState) -> Result<(), CommitState> {
        if self.state == state {
            Ok(())
        } else {
            let actual = self.state;
            self.fail();
            Err(actual)
        }
    }

    /// Copies `stream` into the file.
    ///
    /// # Errors
    ///
    /// * If the stream yields an error
    /// * If writing to the file fails
    pub async fn write_stream<S: Stream<Item = Result<bytes::Bytes, std::io::Error>>>(
        &mut self,
        stream: S,
        mut on_chunk: impl FnMut(usize, u64),
    ) -> Result<u64, DownloadFileError> {
        self.expect_state(CommitState::Fetching)
            .map_err(DownloadFileError::InvalidState)?;

        let result = self.copy(stream, &mut on_chunk).await;

        match result {
            Ok(()) => {
                self.state = CommitState::Verifying;
                Ok(self.bytes_written)
            }
            Err(e) => {
                self.fail();
                Err(e)
            }
        }
    }

    async fn copy<S: Stream<Item = Result<bytes::Bytes, std::io::Error>>>(
        &mut self,
        stream: S,
        on_chunk: &mut impl FnMut(usize, u64),
    ) -> Result<(), DownloadFileError> {
        let file = self
            .file
            .take()
            .ok_or(DownloadFileError::InvalidState(self.state))?;
        let mut writer = BufWriter::new(file);

        futures::pin_mut!(stream);

        while let Some(bytes) = stream.next().await {
            let bytes = bytes.map_err(|source| DownloadFileError::Read {
                bytes_read: self.bytes_written,
                source,
            })?;

            let len = bytes.len();
            self.bytes_written += len as u64;

            debug_or_trace!(
                ("Writing bytes to {:?}: {len}", self.part_path),
                (
                    "Writing bytes to {:?}: {len} ({} total)",
                    self.part_path,
                    self.bytes_written
                )
            );

            writer
                .write_all(&bytes)
                .await
                .map_err(|source| DownloadFileError::Write {
                    bytes_read: self.bytes_written,
                    source,
                })?;

            on_chunk(len, self.bytes_written);
        }

        writer.flush().await?;

        Ok(())
    }

    /// The declared size is the contract; reaching EOF early is a failure.
    ///
    /// # Errors
    ///
    /// * If the number of bytes written differs from `declared`
    pub fn verify(&mut self, declared: u64) -> Result<(), DownloadFileError> {
        self.expect_state(CommitState::Verifying)
            .map_err(DownloadFileError::InvalidState)?;

        if self.bytes_written != declared {
            self.fail();
            return Err(DownloadFileError::SizeMismatch {
                expected: declared,
                actual: self.bytes_written,
            });
        }

        self.state = CommitState::Tagging;

        Ok(())
    }

    /// Runs `write_tags` against the `.part` path.
    ///
    /// # Errors
    ///
    /// * If `write_tags` fails
    pub fn tag(
        &mut self,
        write_tags: impl FnOnce(&Path) -> Result<(), TagWriteError>,
    ) -> Result<(), TagWriteError> {
        if let Err(state) = self.expect_state(CommitState::Tagging) {
            return Err(TagWriteError::Other(format!(
                "Cannot tag a part file in state {state:?}"
            )));
        }

        if let Err(e) = write_tags(&self.part_path) {
            self.fail();
            return Err(e);
        }

        self.state = CommitState::Publishing;

        Ok(())
    }

    /// Renames the `.part` file to its final name.
    ///
    /// # Errors
    ///
    /// * If the rename fails
    pub async fn publish(mut self) -> Result<PathBuf, PublishError> {
        self.expect_state(CommitState::Publishing)
            .map_err(PublishError::InvalidState)?;

        if let Err(e) = tokio::fs::rename(&self.part_path, &self.final_path).await {
            self.fail();
            return Err(e.into());
        }

        self.state = CommitState::Done;

        Ok(self.final_path.clone())
    }

    /// Removes the `.part` file without publishing it.
    pub fn discard(mut self) {
        self.fail();
    }

    fn fail(&mut self) {
        self.file.take();

        if matches!(self.state, CommitState::Done | CommitState::Failed) {
            return;
        }

        self.state = CommitState::Failed;

        remove_part_file(&self.part_path);
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        self.fail();
    }
}

/// Best-effort removal. Failures are logged, never escalated.
fn remove_part_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => log::debug!("Removed part file {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Failed to remove part file {}: {e:?}", path.display()),
    }
}

#[derive(Debug)]
pub enum DownloadOutcome {
    /// The final file exists and overwrite is disabled
    AlreadyExists,
    /// Nothing was written
    DryRun { size: Option<u64> },
    /// Bytes are written and verified; the file still needs tags and a rename
    Staged(PartFile),
}

/// Fetches one track's bytes into a verified [`PartFile`].
pub struct AtomicTrackDownloader<'a> {
    pub api: &'a dyn CatalogApi,
    pub overwrite: bool,
    pub dry_run: bool,
    pub rate_limit: Option<RateLimit>,
    pub cancel: &'a CancellationToken,
}

impl AtomicTrackDownloader<'_> {
    /// # Errors
    ///
    /// * If the byte stream cannot be requested
    /// * If the file cannot be written
    /// * If fewer or more bytes arrive than were declared
    /// * If the request is cancelled
    pub async fn download(
        &self,
        locator: &str,
        final_path: &Path,
        track_id: u64,
        listeners: &[ProgressListener],
    ) -> Result<DownloadOutcome, DownloadFileError> {
        if !self.overwrite && final_path.exists() {
            log::debug!("Track {track_id} already exists at {}", final_path.display());
            return Ok(DownloadOutcome::AlreadyExists);
        }

        if self.dry_run {
            let size = match self
                .cancel
                .run_until_cancelled(self.api.fetch_content_length(locator))
                .await
            {
                None => return Err(DownloadFileError::Cancelled),
                Some(Ok(size)) => Some(size),
                Some(Err(e)) if e.is_cancelled() => return Err(DownloadFileError::Cancelled),
                Some(Err(e)) => {
                    log::warn!("Failed to get size of track {track_id}: {e:?}");
                    None
                }
            };

            return Ok(DownloadOutcome::DryRun { size });
        }

        let mut part = PartFile::create(final_path).await?;

        let response = match self
            .cancel
            .run_until_cancelled(self.api.fetch_bytes(locator))
            .await
        {
            Some(Ok(response)) => response,
            Some(Err(e)) => {
                part.discard();
                return Err(e.into());
            }
            None => {
                part.discard();
                return Err(DownloadFileError::Cancelled);
            }
        };

        let declared = response.size;

        log::debug!(
            "Downloading track {track_id} ({declared} bytes) to {}",
            part.path().display()
        );

        let stream: BytesStream = match self.rate_limit {
            Some(limit) => Box::pin(Throttled::new(response.stream, limit)),
            None => response.stream,
        };

        let mut reporter = ProgressReporter::new(track_id, declared, listeners);

        part.write_stream(stream, |len, read| reporter.on_chunk(len, read))
            .await?;
        part.verify(declared)?;

        Ok(DownloadOutcome::Staged(part))
    }
}
