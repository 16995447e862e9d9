//! Enrichment: genres, moods and style from the identified album

use super::normalization::collapse_whitespace;
use crate::models::{AlbumInput, EnrichmentOutput, ExtractionOutput, TriageOutput};
use crate::services::remote_client::{CompletionRequest, ResponseShape};

pub const PROMPT_VERSION: u32 = 1;

const SYSTEM_PROMPT: &str = "You are a music librarian. Describe albums with concise, widely used \
genre and mood labels. Reply with a single JSON object and no other text.";

const MAX_TOKENS: u32 = 500;
const MAX_LABELS: usize = 5;

impl ResponseShape for EnrichmentOutput {
    fn validate(&self) -> Result<(), String> {
        if self.genres.iter().all(|g| g.trim().is_empty()) {
            return Err("genres is empty".to_string());
        }
        if let Some(energy) = self.energy_level {
            if !(1..=5).contains(&energy) {
                return Err(format!("energy_level {} not in 1-5", energy));
            }
        }
        Ok(())
    }
}

pub fn request(model: &str, input: &AlbumInput, triage: &TriageOutput, extraction: &ExtractionOutput) -> CompletionRequest {
    let mut prompt = String::new();
    prompt.push_str(&format!("Artist: {}\n", extraction.artist));
    prompt.push_str(&format!("Album: {}\n", extraction.album_title));
    if let Some(year) = extraction.year {
        prompt.push_str(&format!("Year: {}\n", year));
    }
    prompt.push_str(&format!("Folder: {}\n", input.folder_name));
    if !input.parent_dirs.is_empty() {
        prompt.push_str(&format!("Parent folders: {}\n", input.parent_dirs.join(" / ")));
    }
    if let Some(genre) = &triage.tags.genre {
        prompt.push_str(&format!("Genre tag: {}\n", genre));
    }
    if let Some(albumartist) = &triage.tags.albumartist {
        prompt.push_str(&format!("Album artist tag: {}\n", albumartist));
    }
    prompt.push_str(
        "\nReturn JSON with keys: \"genres\" (1-3 labels, most specific first), \"moods\" (up to 3), \
         \"style_tags\" (up to 5, e.g. soundtrack, live, audiophile), \"target_audience\" (string or null), \
         \"energy_level\" (1-5), \"is_compilation\" (true for various-artists or sampler releases).",
    );

    CompletionRequest {
        model: model.to_string(),
        system: SYSTEM_PROMPT.to_string(),
        prompt,
        temperature: 0.2,
        max_tokens: MAX_TOKENS,
    }
}

/// Trim, de-duplicate (case-insensitively) and cap label lists
pub fn normalize(raw: EnrichmentOutput) -> EnrichmentOutput {
    EnrichmentOutput {
        genres: clean_labels(raw.genres),
        moods: clean_labels(raw.moods),
        style_tags: clean_labels(raw.style_tags),
        target_audience: raw
            .target_audience
            .map(|a| collapse_whitespace(&a))
            .filter(|a| !a.is_empty()),
        ..raw
    }
}

fn clean_labels(labels: Vec<String>) -> Vec<String> {
    let mut seen = Vec::new();
    let mut cleaned = Vec::new();
    for label in labels {
        let label = collapse_whitespace(&label);
        if label.is_empty() || seen.contains(&label.to_lowercase()) {
            continue;
        }
        seen.push(label.to_lowercase());
        cleaned.push(label);
        if cleaned.len() == MAX_LABELS {
            break;
        }
    }
    cleaned
}
