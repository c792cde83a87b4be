use std::sync::LazyLock;

use regex::{Captures, Regex};
use trackfetch_downloader_models::{TagMap, tag};

static UNSAFE_FILENAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1F]"#).expect("Invalid Regex"));

static PLACEHOLDER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([^{}:]+)(?::(\d+))?\}").expect("Invalid Regex"));

const UNKNOWN: &str = "Unknown";

/// Makes a rendered name safe to use as a single path component.
#[must_use]
pub fn sanitize_filename(string: &str) -> String {
    let sanitized = UNSAFE_FILENAME_REGEX.replace_all(string, "_");
    let trimmed = sanitized.trim().trim_end_matches(['.', ' ']);

    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Renders `{key}`, `{first|fallback}` and zero-padded `{key:width}`
/// placeholders from `tags`.
#[must_use]
pub fn render(template: &str, tags: &TagMap) -> String {
    PLACEHOLDER_REGEX
        .replace_all(template, |caps: &Captures<'_>| {
            let value = caps[1]
                .split('|')
                .filter_map(|key| tags.get(key.trim()))
                .find(|x| !x.is_empty())
                .map_or(UNKNOWN, String::as_str);

            let width = caps
                .get(2)
                .and_then(|x| x.as_str().parse::<usize>().ok());

            match width {
                Some(width) if value.chars().all(|c| c.is_ascii_digit()) => {
                    format!("{value:0>width$}")
                }
                _ => value.to_string(),
            }
        })
        .into_owned()
}

pub trait NameTemplates: Send + Sync {
    /// File name of a track, without extension.
    fn track_filename(&self, is_playlist: bool, tags: &TagMap, track_count: usize) -> String;

    fn collection_folder(&self, tags: &TagMap) -> String;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultNameTemplates;

fn number_width(track_count: usize) -> usize {
    track_count.to_string().len().max(2)
}

impl NameTemplates for DefaultNameTemplates {
    fn track_filename(&self, is_playlist: bool, tags: &TagMap, track_count: usize) -> String {
        let width = number_width(track_count);

        let template = if is_playlist {
            format!(
                "{{{}:{width}}} - {{{}}} - {{{}}}",
                tag::PLAYLIST_TRACK,
                tag::ARTIST,
                tag::TITLE
            )
        } else if track_count > 1 {
            format!("{{{}:{width}}} - {{{}}}", tag::TRACK_NUMBER, tag::TITLE)
        } else {
            format!("{{{}}} - {{{}}}", tag::ARTIST, tag::TITLE)
        };

        render(&template, tags)
    }

    fn collection_folder(&self, tags: &TagMap) -> String {
        render(
            &format!(
                "{{{}|{}}} - {{{}|{}}}",
                tag::ALBUM_ARTIST,
                tag::ARTIST,
                tag::ALBUM,
                tag::TITLE
            ),
            tags,
        )
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn tags(entries: &[(&str, &str)]) -> TagMap {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test_log::test]
    fn sanitize_replaces_unsafe_characters() {
        assert_eq!(sanitize_filename("AC/DC: Live?"), "AC_DC_ Live_");
        assert_eq!(sanitize_filename("Mr. Blue. "), "Mr. Blue");
        assert_eq!(sanitize_filename(" ..."), "_");
    }

    #[test_log::test]
    fn render_pads_and_falls_back() {
        let tags = tags(&[("tracknumber", "3"), ("artist", "A"), ("title", "")]);

        assert_eq!(render("{tracknumber:3}", &tags), "003");
        assert_eq!(render("{albumartist|artist}", &tags), "A");
        assert_eq!(render("{title}", &tags), "Unknown");
    }

    #[test_log::test]
    fn default_templates_by_context() {
        let tags = tags(&[
            ("tracknumber", "4"),
            ("playlisttrack", "12"),
            ("artist", "Artist"),
            ("title", "Song"),
            ("album", "Record"),
        ]);
        let templates = DefaultNameTemplates;

        assert_eq!(templates.track_filename(false, &tags, 9), "04 - Song");
        assert_eq!(
            templates.track_filename(true, &tags, 120),
            "012 - Artist - Song"
        );
        assert_eq!(templates.track_filename(false, &tags, 1), "Artist - Song");
        assert_eq!(templates.collection_folder(&tags), "Artist - Record");
    }
}
