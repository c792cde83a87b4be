use std::path::{Path, PathBuf};

use moosicbox_audiotags::{MimeType, Picture, Tag, TagType};
use thiserror::Error;
use trackfetch_downloader_models::{Lyrics, TagMap, TrackQuality, tag};

/// Everything needed to tag one staged track file.
#[derive(Debug, Clone, Copy)]
pub struct TagRequest<'a> {
    /// The `.part` file being tagged
    pub path: &'a Path,
    pub cover: Option<&'a Path>,
    pub quality: TrackQuality,
    pub tags: &'a TagMap,
    pub lyrics: Option<&'a Lyrics>,
    pub embed_cover: bool,
}

#[derive(Debug, Error)]
pub enum TagWriteError {
    #[error(transparent)]
    Tag(#[from] moosicbox_audiotags::Error),
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error("Invalid path: {0:?}")]
    InvalidPath(PathBuf),
    #[error("{0}")]
    Other(String),
}

impl crate::Cancellable for TagWriteError {
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Writes metadata into a downloaded track before it is published.
pub trait TagWriter: Send + Sync {
    /// # Errors
    ///
    /// * If the file cannot be read or written
    /// * If the tags cannot be encoded
    fn write_tags(&self, request: &TagRequest<'_>) -> Result<(), TagWriteError>;
}

/// [`TagWriter`] backed by `moosicbox_audiotags`.
///
/// The tag type is chosen from the resolved quality since the file being
/// tagged still carries its `.part` extension.
#[derive(Debug, Default, Clone, Copy)]
pub struct AudiotagsWriter;

const fn tag_type(quality: TrackQuality) -> TagType {
    match quality {
        TrackQuality::Lossless => TagType::Flac,
        TrackQuality::High | TrackQuality::Standard => TagType::Id3v2,
    }
}

fn cover_mime_type(path: &Path) -> MimeType {
    match path
        .extension()
        .and_then(|x| x.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => MimeType::Png,
        Some("gif") => MimeType::Gif,
        Some("bmp") => MimeType::Bmp,
        Some("tif" | "tiff") => MimeType::Tiff,
        _ => MimeType::Jpeg,
    }
}

/// Parses the leading number of values like `"3"` or `"3/12"`.
fn parse_number(value: &str) -> Option<u16> {
    value.split('/').next()?.trim().parse().ok()
}

impl TagWriter for AudiotagsWriter {
    fn write_tags(&self, request: &TagRequest<'_>) -> Result<(), TagWriteError> {
        let path = request
            .path
            .to_str()
            .ok_or_else(|| TagWriteError::InvalidPath(request.path.to_path_buf()))?;

        log::debug!("Adding tags to path={path:?} quality={}", request.quality);

        let mut tags = Tag::new()
            .with_tag_type(tag_type(request.quality))
            .read_from_path(path)?;

        if let Some(title) = request.tags.get(tag::TITLE) {
            tags.set_title(title);
        }
        if let Some(artist) = request.tags.get(tag::ARTIST) {
            tags.set_artist(artist);
        }
        if let Some(album) = request.tags.get(tag::ALBUM) {
            tags.set_album_title(album);
        }
        if let Some(album_artist) = request.tags.get(tag::ALBUM_ARTIST) {
            tags.set_album_artist(album_artist);
        }
        if let Some(number) = request
            .tags
            .get(tag::TRACK_NUMBER)
            .and_then(|x| parse_number(x))
        {
            tags.set_track_number(number);
        }
        if let Some(total) = request
            .tags
            .get(tag::TRACK_TOTAL)
            .and_then(|x| parse_number(x))
        {
            tags.set_total_tracks(total);
        }
        if let Some(disc) = request
            .tags
            .get(tag::DISC_NUMBER)
            .and_then(|x| parse_number(x))
        {
            tags.set_disc_number(disc);
        }
        if let Some(genre) = request.tags.get(tag::GENRE) {
            tags.set_genre(genre);
        }
        if let Some(year) = request
            .tags
            .get(tag::DATE)
            .and_then(|x| x.get(..4))
            .and_then(|x| x.parse::<i32>().ok())
        {
            tags.set_year(year);
        }

        if request.embed_cover
            && let Some(cover) = request.cover
        {
            let data = std::fs::read(cover)?;
            tags.set_album_cover(Picture::new(&data, cover_mime_type(cover)));
        }

        tags.write_to_path(path)?;

        Ok(())
    }
}
