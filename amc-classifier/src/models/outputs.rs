//! Stage output shapes
//!
//! Remote responses are decoded into these structs at the client boundary;
//! nothing untyped flows past Extraction or Enrichment.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Best-effort tags sampled from the first few tracks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampledTags {
    pub artist: Option<String>,
    pub albumartist: Option<String>,
    pub album: Option<String>,
    pub date: Option<String>,
    pub genre: Option<String>,
}

impl SampledTags {
    pub fn is_empty(&self) -> bool {
        self.artist.is_none()
            && self.albumartist.is_none()
            && self.album.is_none()
            && self.date.is_none()
            && self.genre.is_none()
    }

    /// Non-empty fields in a stable order, for prompts
    pub fn fields(&self) -> BTreeMap<&'static str, &str> {
        let mut map = BTreeMap::new();
        for (key, value) in [
            ("album", &self.album),
            ("albumartist", &self.albumartist),
            ("artist", &self.artist),
            ("date", &self.date),
            ("genre", &self.genre),
        ] {
            if let Some(v) = value.as_deref() {
                map.insert(key, v);
            }
        }
        map
    }
}

/// Triage: local facts about the album
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriageOutput {
    /// Tracks with a supported audio extension
    pub track_count: u32,
    pub disc_count: u32,
    /// Distinct supported extensions, sorted
    pub formats: Vec<String>,
    /// Files skipped as unsupported
    pub skipped_files: u32,
    pub tags: SampledTags,
}

/// Extraction: core identification fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionOutput {
    pub artist: String,
    pub album_title: String,
    #[serde(default, deserialize_with = "lenient_opt_u32")]
    pub year: Option<u32>,
    #[serde(default, deserialize_with = "lenient_opt_u32")]
    pub total_tracks: Option<u32>,
    #[serde(default, deserialize_with = "lenient_opt_u32")]
    pub disc_count: Option<u32>,
}

/// Enrichment: semantic attributes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentOutput {
    pub genres: Vec<String>,
    #[serde(default)]
    pub moods: Vec<String>,
    #[serde(default)]
    pub style_tags: Vec<String>,
    #[serde(default)]
    pub target_audience: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_u32")]
    pub energy_level: Option<u32>,
    #[serde(default)]
    pub is_compilation: bool,
}

/// Canonicalization: the final structured record for an album
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub artist: String,
    pub album_title: String,
    pub year: Option<u32>,
    pub top_category: String,
    pub sub_category: Option<String>,
    /// Composer for composer-first classical albums
    pub composer: Option<String>,
    pub genres: Vec<String>,
    pub moods: Vec<String>,
    pub is_compilation: bool,
    pub format_tags: Vec<String>,
    /// Relative path suggestion, `/` separated
    pub suggested_path: String,
    pub confidence: f32,
    /// `None` when verification is disabled or could not run
    pub verified: Option<bool>,
    pub notes: Vec<String>,
}

/// Accept `1999`, `"1999"`, `"1999-05-01"`, `null` or an empty string
fn lenient_opt_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    let parsed = match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .and_then(|n| u32::try_from(n).ok()),
        Some(serde_json::Value::String(s)) => {
            let digits: String = s.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
            if digits.is_empty() {
                None
            } else {
                digits.parse().ok()
            }
        }
        Some(other) => {
            return Err(serde::de::Error::custom(format!(
                "expected number or numeric string, got {}",
                other
            )))
        }
    };
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extraction_accepts_loose_numbers() {
        let out: ExtractionOutput = serde_json::from_str(
            r#"{"artist":"Adele","album_title":"25","year":"2015-11-20","total_tracks":11.0}"#,
        )
        .unwrap();
        assert_eq!(out.year, Some(2015));
        assert_eq!(out.total_tracks, Some(11));
        assert_eq!(out.disc_count, None);
    }

    #[test]
    fn test_extraction_rejects_structured_year() {
        let result: Result<ExtractionOutput, _> = serde_json::from_str(
            r#"{"artist":"A","album_title":"B","year":{"value":1999}}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_enrichment_defaults() {
        let out: EnrichmentOutput = serde_json::from_str(r#"{"genres":["Jazz"]}"#).unwrap();
        assert!(out.moods.is_empty());
        assert!(!out.is_compilation);
        assert_eq!(out.energy_level, None);
    }

    #[test]
    fn test_sampled_tag_fields_skip_missing() {
        let tags = SampledTags {
            artist: Some("Miles Davis".into()),
            genre: Some("Jazz".into()),
            ..Default::default()
        };
        let fields = tags.fields();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields.get("artist"), Some(&"Miles Davis"));
        assert!(!tags.is_empty());
        assert!(SampledTags::default().is_empty());
    }
}
