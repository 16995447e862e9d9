//! Triage: local checks before any remote work

use crate::error::StageError;
use crate::models::{AlbumInput, SampledTags, TriageOutput};
use crate::types::{AttributeReader, TrackTags};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

/// Tracks whose tags are sampled
pub const TAG_SAMPLE_SIZE: usize = 3;

/// Check that the album has playable tracks and sample its tags
///
/// `extensions` are lowercase with a leading dot (`.flac`).
pub fn triage(
    input: &AlbumInput,
    reader: &dyn AttributeReader,
    extensions: &[String],
) -> Result<TriageOutput, StageError> {
    let mut tracks = Vec::new();
    let mut formats = BTreeSet::new();
    let mut skipped_files = 0u32;

    for file in &input.files {
        match supported_extension(file, extensions) {
            Some(ext) => {
                formats.insert(ext);
                tracks.push(file.as_path());
            }
            None => skipped_files += 1,
        }
    }

    if tracks.is_empty() {
        return Err(StageError::UnsupportedInput(format!(
            "no supported audio files among {} files in {}",
            input.files.len(),
            input.folder_name
        )));
    }

    let samples: Vec<TrackTags> = tracks
        .iter()
        .take(TAG_SAMPLE_SIZE)
        .map(|track| reader.read_tags(track))
        .collect();

    Ok(TriageOutput {
        track_count: tracks.len() as u32,
        disc_count: input.disc_count.max(1),
        formats: formats.into_iter().collect(),
        skipped_files,
        tags: sample_tags(&samples),
    })
}

fn supported_extension(file: &Path, extensions: &[String]) -> Option<String> {
    let ext = format!(".{}", file.extension()?.to_string_lossy().to_lowercase());
    extensions.iter().any(|e| *e == ext).then(|| ext.trim_start_matches('.').to_string())
}

/// Most common non-empty value per field; ties go to the earliest track
fn sample_tags(samples: &[TrackTags]) -> SampledTags {
    SampledTags {
        artist: most_common(samples.iter().map(|t| t.artist.as_deref())),
        albumartist: most_common(samples.iter().map(|t| t.albumartist.as_deref())),
        album: most_common(samples.iter().map(|t| t.album.as_deref())),
        date: most_common(samples.iter().map(|t| t.date.as_deref())),
        genre: most_common(samples.iter().map(|t| t.genre.as_deref())),
    }
}

fn most_common<'a>(values: impl Iterator<Item = Option<&'a str>>) -> Option<String> {
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    for (position, value) in values.enumerate() {
        let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
            continue;
        };
        counts.entry(value).or_insert((0, position)).0 += 1;
    }
    counts
        .into_iter()
        .max_by(|(_, (count_a, pos_a)), (_, (count_b, pos_b))| count_a.cmp(count_b).then(pos_b.cmp(pos_a)))
        .map(|(value, _)| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NoTags;
    use std::collections::HashMap;
    use std::path::PathBuf;

    struct FixedTags(HashMap<PathBuf, TrackTags>);

    impl AttributeReader for FixedTags {
        fn read_tags(&self, track: &Path) -> TrackTags {
            self.0.get(track).cloned().unwrap_or_default()
        }
    }

    fn extensions() -> Vec<String> {
        vec![".flac".to_string(), ".mp3".to_string()]
    }

    fn album(files: &[&str]) -> AlbumInput {
        AlbumInput {
            path: PathBuf::from("/music/Album"),
            folder_name: "Album".to_string(),
            parent_dirs: vec![],
            files: files.iter().map(|f| PathBuf::from("/music/Album").join(f)).collect(),
            disc_count: 1,
        }
    }

    #[test]
    fn test_counts_tracks_and_formats() {
        let input = album(&["01.flac", "02.FLAC", "03.mp3", "cover.jpg", "notes.txt"]);
        let output = triage(&input, &NoTags, &extensions()).unwrap();
        assert_eq!(output.track_count, 3);
        assert_eq!(output.formats, vec!["flac".to_string(), "mp3".to_string()]);
        assert_eq!(output.skipped_files, 2);
        assert!(output.tags.is_empty());
    }

    #[test]
    fn test_no_supported_tracks_is_unsupported_input() {
        let input = album(&["cover.jpg", "track.xyz"]);
        let result = triage(&input, &NoTags, &extensions());
        assert!(matches!(result, Err(StageError::UnsupportedInput(_))));
    }

    #[test]
    fn test_samples_most_common_tag_values() {
        let input = album(&["01.flac", "02.flac", "03.flac", "04.flac"]);
        let tags = |artist: &str, genre: Option<&str>| TrackTags {
            artist: Some(artist.to_string()),
            album: Some("Kind of Blue".to_string()),
            genre: genre.map(str::to_string),
            ..Default::default()
        };
        let reader = FixedTags(HashMap::from([
            (input.files[0].clone(), tags("Miles Davis", None)),
            (input.files[1].clone(), tags("Miles Davis & John Coltrane", Some("Jazz"))),
            (input.files[2].clone(), tags("Miles Davis", Some("Jazz"))),
            // Beyond the sample window
            (input.files[3].clone(), tags("Someone Else", Some("Rock"))),
        ]));

        let output = triage(&input, &reader, &extensions()).unwrap();
        assert_eq!(output.tags.artist.as_deref(), Some("Miles Davis"));
        assert_eq!(output.tags.album.as_deref(), Some("Kind of Blue"));
        assert_eq!(output.tags.genre.as_deref(), Some("Jazz"));
        assert_eq!(output.tags.date, None);
    }

    #[test]
    fn test_ties_prefer_earliest_track() {
        let values = [Some("B"), Some("A"), None];
        assert_eq!(most_common(values.into_iter()), Some("B".to_string()));
    }
}
