//! Canonicalization: the final record and suggested library path
//!
//! Category decision tree, checked in order:
//! Soundtracks → Classical → Jazz → Electronic → Compilations & VA → Library.
//! A few quality gates then correct well-known misfiles (stage musicals,
//! Disney, Ghibli, game scores, rock bands with "symphonic" albums).

use super::normalization::{canonical_composer, collapse_whitespace, fold, normalize_artist, normalize_title};
use crate::models::{AlbumInput, CanonicalRecord, EnrichmentOutput, ExtractionOutput, TriageOutput};
use crate::services::remote_client::{CompletionRequest, ResponseShape};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Prompt version of the verification call
pub const PROMPT_VERSION: u32 = 1;

pub const BASE_CONFIDENCE: f32 = 0.85;
pub const REJECTED_CONFIDENCE: f32 = 0.5;

const MAX_SEGMENT_CHARS: usize = 200;

pub const SOUNDTRACKS: &str = "Soundtracks";
pub const CLASSICAL: &str = "Classical";
pub const JAZZ: &str = "Jazz";
pub const ELECTRONIC: &str = "Electronic";
pub const COMPILATIONS: &str = "Compilations & VA";
pub const LIBRARY: &str = "Library";

const STAGE_AND_MUSICALS: &str = "Stage & Musicals";
const FILM: &str = "Film";
const GAME: &str = "Game";
const TV: &str = "TV";
const RECITALS: &str = "Recitals";

const FILM_COMPOSERS: &[&str] = &[
    "Alan Menken", "Hans Zimmer", "Joe Hisaishi", "Ennio Morricone", "Michael Nyman", "Gabriel Yared",
    "Ramin Djawadi", "James Newton Howard", "Daniel Pemberton", "Henry Mancini", "Jérôme Rebotier",
    "Yuji Nomi", "Katsu Hoshi", "Martin O'Donnell", "Michael Salvatori", "John Williams", "Howard Shore",
    "James Horner", "Alexandre Desplat", "Thomas Newman",
];

const CLASSICAL_COMPOSERS: &[&str] = &[
    "Johann Sebastian Bach", "Wolfgang Amadeus Mozart", "Ludwig van Beethoven", "Antonio Vivaldi",
    "Pyotr Ilyich Tchaikovsky", "Johannes Brahms", "Frédéric Chopin", "Franz Schubert", "Joseph Haydn",
    "George Frideric Handel", "Carl Orff", "Béla Bartók", "Claude Debussy", "Maurice Ravel",
    "Sergei Rachmaninoff", "Igor Stravinsky", "Antonín Dvořák", "Gustav Mahler", "Richard Wagner",
    "Giuseppe Verdi", "Giacomo Puccini", "Hector Berlioz", "Felix Mendelssohn", "Robert Schumann",
    "Franz Liszt", "Joaquín Rodrigo", "Manuel de Falla", "Isaac Albéniz", "Enrique Granados",
    "Heitor Villa-Lobos",
];

const SOUNDTRACK_INDICATORS: &[&str] = &[
    "soundtrack", "score", "film music", "game music", "ost", "original motion picture", "music from",
    "original soundtrack",
];
const STAGE_INDICATORS: &[&str] = &[
    "musical", "broadway", "cast recording", "royal albert hall", "staged concert", "les miserables",
    "cirque du soleil",
];
/// Stage indicators strong enough to mark a soundtrack on their own
const STAGE_TRIGGERS: &[&str] = &["musical", "broadway", "cast recording"];
const GAME_INDICATORS: &[&str] = &["game", "video game", "halo", "zelda", "nintendo"];
const TV_INDICATORS: &[&str] = &["tv", "television", "hbo", "netflix", "season"];

const CLASSICAL_INDICATORS: &[&str] = &[
    "classical", "symphony", "symphonic", "concerto", "opera", "chamber", "orchestral", "baroque", "romantic",
    "modern classical", "sonata", "suite", "overture", "requiem", "mass", "cantata", "fugue",
];
const JAZZ_INDICATORS: &[&str] = &[
    "jazz", "blues", "swing", "bebop", "fusion", "smooth jazz", "cool jazz", "free jazz", "hard bop",
    "latin jazz",
];
const ELECTRONIC_INDICATORS: &[&str] = &[
    "electronic", "techno", "house", "ambient", "edm", "synth", "electro", "trance", "dubstep",
    "drum and bass", "dnb", "breakbeat", "downtempo", "chillout", "idm",
];
const COMPILATION_INDICATORS: &[&str] = &[
    "greatest hits", "best of", "sampler", "reference", "various artists", "audiophile", "label sampler",
    "collection", "anthology",
];

const DISNEY_TITLES: &[&str] = &[
    "aladdin", "little mermaid", "lion king", "beauty and the beast", "frozen", "moana", "tangled",
];
const POP_ROCK_ARTISTS: &[&str] = &[
    "beach boys", "emerson lake palmer", "elp", "yes", "genesis", "pink floyd", "led zeppelin", "queen",
    "beatles", "rolling stones", "adele", "santana", "muse", "dire straits", "steely dan",
];

/// (series folder, pattern)
const SERIES: &[(&str, &str)] = &[
    ("Best Audiophile Voices", "best audiophile voices"),
    ("Audiophile Reference", "audiophile reference"),
    ("Super Analog Sound", "super analog sound"),
    ("XRCD Sampler", "xrcd sampler"),
    ("Test CDs", "test cd"),
    ("Demo Discs", "demo disc"),
];

static CATALOGUE_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bOp\.\s*\d+|\bBWV\s*\d+|\bK\.\s*\d+|\bKV\s*\d+|\bRV\s*\d+|No\.\s*\d+").expect("static pattern")
});

static BEST_OF_SERIES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)the best of\s+\w+").expect("static pattern"));

static VOLUME: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        Regex::new(r"[Vv]ol(?:ume)?\.?\s*(\d+|[IVX]+)\b").expect("static pattern"),
        Regex::new(r"[Pp]art\s*(\d+|[IVX]+)\b").expect("static pattern"),
        Regex::new(r"\b(\d{1,3}|[IVX]+)\s*$").expect("static pattern"),
    ]
});

/// (tag, pattern), in display order
static FORMAT_TAGS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("XRCD24", r"(?i)\bXRCD\s*24\b"),
        ("XRCD", r"(?i)\bXRCD(?:\s*2)?\b"),
        ("K2HD", r"(?i)\bK2\s*HD\b"),
        ("SHM-CD", r"(?i)\bSHM-?CD\b"),
        ("MFSL", r"(?i)\bMFSL\b|mobile fidelity"),
        ("SACD", r"(?i)\bSACD\b"),
        ("DSD", r"(?i)\bDSD\d*\b"),
        ("24-96", r"\b24[-/]96\b"),
        ("24-88", r"\b24[-/]88(?:\.2)?\b"),
        ("24-192", r"\b24[-/]192\b"),
    ]
    .into_iter()
    .map(|(tag, pattern)| (tag, Regex::new(pattern).expect("static pattern")))
    .collect()
});

/// Answer of the optional verification call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationOutput {
    pub confirmed: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

impl ResponseShape for VerificationOutput {}

pub fn verification_request(model: &str, input: &AlbumInput, record: &CanonicalRecord) -> CompletionRequest {
    CompletionRequest {
        model: model.to_string(),
        system: "You check music library metadata. Reply with a single JSON object and no other text."
            .to_string(),
        prompt: format!(
            "Folder: {}\nProposed artist: {}\nProposed album: {}\nProposed year: {}\n\n\
             Is this identification correct? Return JSON with keys \"confirmed\" (true or false) \
             and \"reason\" (short string).",
            input.folder_name,
            record.artist,
            record.album_title,
            record.year.map(|y| y.to_string()).unwrap_or_else(|| "unknown".to_string()),
        ),
        temperature: 0.0,
        max_tokens: 150,
    }
}

/// Fold a verification answer into the record
pub fn apply_verification(record: &mut CanonicalRecord, verification: &VerificationOutput) {
    record.verified = Some(verification.confirmed);
    if !verification.confirmed {
        record.confidence = record.confidence.min(REJECTED_CONFIDENCE);
        let reason = verification.reason.as_deref().unwrap_or("no reason given");
        record.notes.push(format!("Verification rejected: {}", reason));
    }
}

/// Lowercased, accent-folded text searched for indicator words
struct Haystack {
    text: String,
}

impl Haystack {
    fn new<'a>(parts: impl IntoIterator<Item = &'a str>) -> Self {
        let text = parts.into_iter().map(fold).collect::<Vec<_>>().join(" | ");
        Self { text }
    }

    fn has(&self, needle: &str) -> bool {
        contains_word(&self.text, needle)
    }

    fn any(&self, needles: &[&str]) -> bool {
        needles.iter().any(|n| self.has(n))
    }
}

/// Whole-word, case-sensitive containment (`text` is already folded)
fn contains_word(text: &str, needle: &str) -> bool {
    text.match_indices(needle).any(|(start, _)| {
        let end = start + needle.len();
        let before = text[..start].chars().next_back();
        let after = text[end..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

fn same_name(a: &str, b: &str) -> bool {
    let strip = |s: &str| {
        let folded = fold(s);
        let folded = folded.strip_prefix("the ").map(str::to_string).unwrap_or(folded);
        folded.chars().filter(|c| c.is_alphanumeric()).collect::<String>()
    };
    strip(a) == strip(b)
}

fn film_composer(artist: &str) -> Option<&'static str> {
    FILM_COMPOSERS.iter().copied().find(|c| same_name(c, artist))
}

fn classical_composer(name: &str) -> Option<&'static str> {
    canonical_composer(name).or_else(|| CLASSICAL_COMPOSERS.iter().copied().find(|c| same_name(c, name)))
}

/// Composer of a classical album, from the artist or the title
fn identify_composer(artist: &str, title: &str) -> Option<&'static str> {
    if let Some(composer) = classical_composer(artist) {
        return Some(composer);
    }

    if let Some((prefix, _)) = title.split_once(':') {
        if let Some(composer) = classical_composer(prefix.trim()) {
            return Some(composer);
        }
    }

    let folded_title = fold(title);
    for composer in CLASSICAL_COMPOSERS {
        let folded = fold(composer);
        if contains_word(&folded_title, &folded) {
            return Some(composer);
        }
        if let Some(last) = folded.split_whitespace().last() {
            if last.chars().count() > 4 && contains_word(&folded_title, last) {
                return Some(composer);
            }
        }
    }
    None
}

fn soundtrack_subcategory(hay: &Haystack) -> &'static str {
    if hay.any(STAGE_INDICATORS) || hay.has("les mis") {
        STAGE_AND_MUSICALS
    } else if hay.any(GAME_INDICATORS) {
        GAME
    } else if hay.any(TV_INDICATORS) {
        TV
    } else {
        FILM
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Category {
    top: &'static str,
    sub: Option<String>,
    composer: Option<&'static str>,
}

impl Category {
    fn new(top: &'static str, sub: Option<&str>) -> Self {
        Self {
            top,
            sub: sub.map(str::to_string),
            composer: None,
        }
    }
}

fn classify(hay: &Haystack, artist: &str, title: &str, is_compilation: bool) -> Category {
    if hay.any(SOUNDTRACK_INDICATORS) || hay.any(STAGE_TRIGGERS) || film_composer(artist).is_some() {
        return Category::new(SOUNDTRACKS, Some(soundtrack_subcategory(hay)));
    }

    let artist_is_composer = classical_composer(artist).is_some();
    if artist_is_composer || hay.any(CLASSICAL_INDICATORS) || CATALOGUE_NUMBER.is_match(title) {
        return match identify_composer(artist, title) {
            Some(composer) => Category {
                top: CLASSICAL,
                sub: Some(composer.to_string()),
                composer: Some(composer),
            },
            None => Category::new(CLASSICAL, Some(RECITALS)),
        };
    }

    if hay.any(JAZZ_INDICATORS) {
        return Category::new(JAZZ, None);
    }
    if hay.any(ELECTRONIC_INDICATORS) {
        return Category::new(ELECTRONIC, None);
    }
    if is_compilation || hay.any(COMPILATION_INDICATORS) {
        return Category::new(COMPILATIONS, None);
    }
    Category::new(LIBRARY, None)
}

/// Known misfiles, first match wins
fn apply_quality_gates(category: Category, hay: &Haystack, artist: &str) -> Category {
    let soundtrack = |sub| Category::new(SOUNDTRACKS, Some(sub));

    if hay.has("les miserables") || hay.has("les mis") {
        return soundtrack(STAGE_AND_MUSICALS);
    }
    if hay.has("cirque du soleil") || same_name(artist, "Cirque du Soleil") {
        return soundtrack(STAGE_AND_MUSICALS);
    }
    let disney_title = category.top == SOUNDTRACKS && hay.any(DISNEY_TITLES);
    if hay.has("disney") || disney_title {
        return if hay.has("broadway") || hay.has("cast") {
            soundtrack(STAGE_AND_MUSICALS)
        } else {
            soundtrack(FILM)
        };
    }
    if category.top == CLASSICAL && POP_ROCK_ARTISTS.iter().any(|p| same_name(p, artist)) {
        return Category::new(LIBRARY, None);
    }
    if hay.any(&["ghibli", "totoro", "mononoke"]) {
        return soundtrack(FILM);
    }
    let franchise = hay.any(&["zelda", "final fantasy", "pokemon", "nintendo"]);
    if franchise || (category.top == SOUNDTRACKS && hay.any(&["halo", "mario"])) {
        return soundtrack(GAME);
    }
    category
}

/// Release-format tags found in the folder name or title
pub fn detect_format_tags(folder_name: &str, title: &str) -> Vec<String> {
    let text = format!("{} {}", folder_name, title);
    let mut tags: Vec<String> = Vec::new();
    for (tag, pattern) in FORMAT_TAGS.iter() {
        if *tag == "XRCD" && tags.iter().any(|t| t == "XRCD24") {
            continue;
        }
        if pattern.is_match(&text) {
            tags.push(tag.to_string());
        }
    }
    tags
}

fn roman_to_number(roman: &str) -> Option<u32> {
    let mut total = 0u32;
    let mut previous = 0u32;
    for c in roman.chars().rev() {
        let value = match c {
            'I' => 1,
            'V' => 5,
            'X' => 10,
            _ => return None,
        };
        if value < previous {
            total = total.checked_sub(value)?;
        } else {
            total += value;
            previous = value;
        }
    }
    (total > 0).then_some(total)
}

/// `Volume N` from `Vol. 3`, `Part II`, or a trailing number
fn extract_volume(title: &str) -> Option<String> {
    VOLUME.iter().find_map(|pattern| {
        let raw = pattern.captures(title)?.get(1)?.as_str();
        let number = raw.parse::<u32>().ok().or_else(|| roman_to_number(raw))?;
        Some(format!("Volume {}", number))
    })
}

fn series_folder(title: &str) -> Option<String> {
    let folded = fold(title);
    if let Some((name, _)) = SERIES.iter().find(|(_, pattern)| folded.contains(pattern)) {
        return Some(name.to_string());
    }
    BEST_OF_SERIES.find(title).map(|m| title_case(m.as_str()))
}

/// Make one path segment safe on common filesystems
pub fn sanitize_segment(name: &str) -> String {
    let replaced: String = name
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            other => other,
        })
        .collect();
    let trimmed = collapse_whitespace(&replaced)
        .trim_matches(|c: char| c == '.' || c.is_whitespace())
        .to_string();

    if trimmed.is_empty() {
        return "unknown_album".to_string();
    }
    if trimmed.chars().count() > MAX_SEGMENT_CHARS {
        let head: String = trimmed.chars().take(MAX_SEGMENT_CHARS - 4).collect();
        return format!("{}...", head.trim_end());
    }
    trimmed
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Normalized artist, title-cased when it arrived in a single case
pub fn canonical_artist(raw: &str) -> String {
    let artist = normalize_artist(raw);
    let has_letters = artist.chars().any(char::is_alphabetic);
    let all_lower = !artist.chars().any(char::is_uppercase);
    let all_upper = !artist.chars().any(char::is_lowercase);
    if has_letters && (all_lower || all_upper) {
        title_case(&artist)
    } else {
        artist
    }
}

fn leaf_name(name: &str, year: Option<u32>, tags: &[String]) -> String {
    let mut leaf = name.to_string();
    if let Some(year) = year {
        leaf.push_str(&format!(" - {}", year));
    }
    if !tags.is_empty() {
        let rendered: Vec<String> = tags.iter().map(|t| format!("[{}]", t)).collect();
        leaf.push(' ');
        leaf.push_str(&rendered.join(" "));
    }
    leaf
}

fn join_path(segments: &[&str]) -> String {
    segments.iter().map(|s| sanitize_segment(s)).collect::<Vec<_>>().join("/")
}

/// Build the final record; a pure function of the earlier stage outputs
pub fn canonicalize(
    input: &AlbumInput,
    triage: &TriageOutput,
    extraction: &ExtractionOutput,
    enrichment: &EnrichmentOutput,
) -> CanonicalRecord {
    let artist = canonical_artist(&extraction.artist);
    let album_title = normalize_title(&extraction.album_title);
    let year = extraction.year;
    let format_tags = detect_format_tags(&input.folder_name, &extraction.album_title);

    let mut hay_parts: Vec<&str> = vec![album_title.as_str(), input.folder_name.as_str(), artist.as_str()];
    hay_parts.extend(input.parent_dirs.iter().map(String::as_str));
    hay_parts.extend(enrichment.genres.iter().map(String::as_str));
    hay_parts.extend(enrichment.style_tags.iter().map(String::as_str));
    if let Some(genre) = &triage.tags.genre {
        hay_parts.push(genre);
    }
    let hay = Haystack::new(hay_parts);

    let category = classify(&hay, &artist, &album_title, enrichment.is_compilation);
    let category = apply_quality_gates(category, &hay, &artist);

    let suggested_path = match (category.top, category.composer) {
        (CLASSICAL, Some(composer)) => {
            let work = album_title
                .split_once(':')
                .filter(|(prefix, _)| classical_composer(prefix.trim()) == Some(composer))
                .map(|(_, work)| work.trim().to_string())
                .unwrap_or_else(|| album_title.clone());
            let name = if same_name(&artist, composer) {
                work
            } else {
                format!("{} - {}", work, artist)
            };
            let leaf = leaf_name(&name, year, &format_tags);
            join_path(&[CLASSICAL, composer, leaf.as_str()])
        }
        (CLASSICAL, None) => {
            let leaf = leaf_name(&album_title, year, &format_tags);
            join_path(&[CLASSICAL, RECITALS, artist.as_str(), leaf.as_str()])
        }
        (SOUNDTRACKS, _) => {
            let sub = category.sub.as_deref().unwrap_or(FILM);
            let leaf = leaf_name(&album_title, year, &format_tags);
            join_path(&[SOUNDTRACKS, sub, leaf.as_str()])
        }
        (COMPILATIONS, _) => match series_folder(&album_title) {
            Some(series) => {
                let volume = extract_volume(&album_title).unwrap_or_else(|| album_title.clone());
                let leaf = leaf_name(&volume, year, &format_tags);
                join_path(&[COMPILATIONS, series.as_str(), leaf.as_str()])
            }
            None => {
                let leaf = leaf_name(&album_title, year, &format_tags);
                join_path(&[COMPILATIONS, leaf.as_str()])
            }
        },
        (top, _) => {
            let leaf = leaf_name(&album_title, year, &format_tags);
            if enrichment.is_compilation {
                join_path(&[top, leaf.as_str()])
            } else {
                join_path(&[top, artist.as_str(), leaf.as_str()])
            }
        }
    };

    let mut notes = vec![format!("Processed as complete album ({} tracks)", triage.track_count)];
    if let Some(composer) = category.composer {
        notes.push(format!("Composer: {}", composer));
    } else if let Some(sub) = &category.sub {
        notes.push(format!("Sub-category: {}", sub));
    }
    if enrichment.is_compilation {
        notes.push("Compilation".to_string());
    }
    if triage.disc_count > 1 {
        notes.push(format!("Multi-disc ({} discs)", triage.disc_count));
    }

    CanonicalRecord {
        artist,
        album_title,
        year,
        top_category: category.top.to_string(),
        sub_category: category.sub,
        composer: category.composer.map(str::to_string),
        genres: enrichment.genres.clone(),
        moods: enrichment.moods.clone(),
        is_compilation: enrichment.is_compilation,
        format_tags,
        suggested_path,
        confidence: BASE_CONFIDENCE,
        verified: None,
        notes,
    }
}
