//! Embedded tag reading with lofty

use crate::types::{AttributeReader, TrackTags};
use lofty::prelude::*;
use lofty::probe::Probe;
use lofty::tag::{ItemKey, Tag};
use std::path::Path;

/// [`AttributeReader`] backed by lofty
///
/// Any probe or parse error yields empty tags.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoftyTagReader;

impl AttributeReader for LoftyTagReader {
    fn read_tags(&self, track: &Path) -> TrackTags {
        let tagged_file = match Probe::open(track).and_then(|probe| probe.read()) {
            Ok(file) => file,
            Err(e) => {
                tracing::debug!(file = %track.display(), error = %e, "No readable tags");
                return TrackTags::default();
            }
        };

        match tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
            Some(tag) => tags_from(tag),
            None => TrackTags::default(),
        }
    }
}

fn tags_from(tag: &Tag) -> TrackTags {
    let date = tag
        .get_string(&ItemKey::RecordingDate)
        .map(str::to_string)
        .or_else(|| tag.year().map(|y| y.to_string()));

    TrackTags {
        artist: non_empty(tag.artist().map(|s| s.to_string())),
        albumartist: non_empty(tag.get_string(&ItemKey::AlbumArtist).map(str::to_string)),
        album: non_empty(tag.album().map(|s| s.to_string())),
        date: non_empty(date),
        genre: non_empty(tag.genre().map(|s| s.to_string())),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lofty::tag::TagType;
    use std::io::Write;

    #[test]
    fn test_unreadable_files_yield_empty_tags() {
        let mut file = tempfile::Builder::new().suffix(".flac").tempfile().unwrap();
        file.write_all(b"definitely not audio").unwrap();

        assert_eq!(LoftyTagReader.read_tags(file.path()), TrackTags::default());
        assert_eq!(
            LoftyTagReader.read_tags(Path::new("/nonexistent/track.mp3")),
            TrackTags::default()
        );
    }

    #[test]
    fn test_tag_fields_are_trimmed() {
        let mut tag = Tag::new(TagType::Id3v2);
        tag.set_artist("  Miles Davis ".to_string());
        tag.set_album("Kind of Blue".to_string());
        tag.set_genre("".to_string());
        tag.insert_text(ItemKey::AlbumArtist, "Miles Davis".to_string());
        tag.insert_text(ItemKey::RecordingDate, "1959".to_string());

        let tags = tags_from(&tag);
        assert_eq!(tags.artist.as_deref(), Some("Miles Davis"));
        assert_eq!(tags.albumartist.as_deref(), Some("Miles Davis"));
        assert_eq!(tags.album.as_deref(), Some("Kind of Blue"));
        assert_eq!(tags.date.as_deref(), Some("1959"));
        assert_eq!(tags.genre, None);
    }
}
