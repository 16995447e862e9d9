//! Extraction: core identification fields from folder names and tags

use super::normalization::{normalize_artist, normalize_title};
use crate::models::{AlbumInput, ExtractionOutput, TriageOutput};
use crate::services::remote_client::{CompletionRequest, ResponseShape};

/// Bump when the prompt or the response schema changes
pub const PROMPT_VERSION: u32 = 1;

const SYSTEM_PROMPT: &str = "You identify music albums from folder names and embedded tags. \
Reply with a single JSON object and no other text.";

const MAX_TOKENS: u32 = 300;

impl ResponseShape for ExtractionOutput {
    fn validate(&self) -> Result<(), String> {
        if self.artist.trim().is_empty() {
            return Err("artist is empty".to_string());
        }
        if self.album_title.trim().is_empty() {
            return Err("album_title is empty".to_string());
        }
        if let Some(year) = self.year {
            if !(1800..=2100).contains(&year) {
                return Err(format!("year {} out of range", year));
            }
        }
        Ok(())
    }
}

pub fn request(model: &str, input: &AlbumInput, triage: &TriageOutput) -> CompletionRequest {
    let mut prompt = String::new();
    prompt.push_str("Identify this album.\n\n");
    prompt.push_str(&format!("Folder: {}\n", input.folder_name));
    if !input.parent_dirs.is_empty() {
        prompt.push_str(&format!("Parent folders: {}\n", input.parent_dirs.join(" / ")));
    }
    prompt.push_str(&format!(
        "Tracks: {} ({}), discs: {}\n",
        triage.track_count,
        triage.formats.join(", "),
        triage.disc_count
    ));
    for (key, value) in triage.tags.fields() {
        prompt.push_str(&format!("Tag {}: {}\n", key, value));
    }
    prompt.push_str(
        "\nReturn JSON with keys: \"artist\" (primary performer, or composer for classical works), \
         \"album_title\" (without format or edition noise), \"year\" (original release year or null), \
         \"total_tracks\" (number or null), \"disc_count\" (number or null).",
    );

    CompletionRequest {
        model: model.to_string(),
        system: SYSTEM_PROMPT.to_string(),
        prompt,
        temperature: 0.1,
        max_tokens: MAX_TOKENS,
    }
}

/// Alias and title cleanup on a validated answer
pub fn normalize(raw: ExtractionOutput) -> ExtractionOutput {
    ExtractionOutput {
        artist: normalize_artist(&raw.artist),
        album_title: normalize_title(&raw.album_title),
        ..raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SampledTags;
    use std::path::PathBuf;

    fn input() -> AlbumInput {
        AlbumInput {
            path: PathBuf::from("/music/Classical/JS Bach - Goldberg Variations (1981)"),
            folder_name: "JS Bach - Goldberg Variations (1981)".to_string(),
            parent_dirs: vec!["Classical".to_string()],
            files: vec![],
            disc_count: 1,
        }
    }

    fn triage() -> TriageOutput {
        TriageOutput {
            track_count: 32,
            disc_count: 1,
            formats: vec!["flac".to_string()],
            skipped_files: 0,
            tags: SampledTags {
                artist: Some("Glenn Gould".to_string()),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_request_carries_folder_and_tags() {
        let req = request("fast-model", &input(), &triage());
        assert_eq!(req.model, "fast-model");
        assert!(req.prompt.contains("Folder: JS Bach - Goldberg Variations (1981)"));
        assert!(req.prompt.contains("Parent folders: Classical"));
        assert!(req.prompt.contains("Tag artist: Glenn Gould"));
        assert!(req.prompt.contains("Tracks: 32 (flac)"));
    }

    #[test]
    fn test_request_is_deterministic() {
        assert_eq!(request("m", &input(), &triage()), request("m", &input(), &triage()));
    }

    #[test]
    fn test_validation() {
        let good: ExtractionOutput =
            serde_json::from_str(r#"{"artist":"Glenn Gould","album_title":"Goldberg Variations","year":"1981"}"#)
                .unwrap();
        assert!(good.validate().is_ok());

        let empty: ExtractionOutput = serde_json::from_str(r#"{"artist":" ","album_title":"X"}"#).unwrap();
        assert!(empty.validate().is_err());

        let bad_year: ExtractionOutput =
            serde_json::from_str(r#"{"artist":"A","album_title":"X","year":42}"#).unwrap();
        assert!(bad_year.validate().is_err());
    }

    #[test]
    fn test_normalize() {
        let out = normalize(ExtractionOutput {
            artist: "JS Bach".to_string(),
            album_title: "Goldberg_Variations [FLAC]".to_string(),
            year: Some(1981),
            total_tracks: None,
            disc_count: None,
        });
        assert_eq!(out.artist, "Johann Sebastian Bach");
        assert_eq!(out.album_title, "Goldberg Variations");
        assert_eq!(out.year, Some(1981));
    }
}
