//! Name and title normalization
//!
//! Composer and orchestra aliases resolve to one canonical spelling so that
//! `J.S. Bach`, `Bach` and `Johann Sebastian Bach` file under the same folder.

use regex::Regex;
use std::sync::LazyLock;

/// (canonical, aliases)
type AliasTable = [(&'static str, &'static [&'static str])];

pub const COMPOSER_ALIASES: &AliasTable = &[
    ("Johann Sebastian Bach", &["Bach", "J.S. Bach", "JS Bach", "J. S. Bach"]),
    ("Béla Bartók", &["Bela Bartok", "Bartok", "B. Bartok"]),
    (
        "Claude-Michel Schönberg",
        &["Claude Michel Schonberg", "Claude-Michel Schonberg", "Schonberg"],
    ),
    ("Manuel de Falla", &["de Falla", "Falla", "M. de Falla"]),
    ("Wolfgang Amadeus Mozart", &["Mozart", "W.A. Mozart", "WA Mozart", "W. A. Mozart"]),
    ("Ludwig van Beethoven", &["Beethoven", "L. van Beethoven", "L.v. Beethoven"]),
    ("Pyotr Ilyich Tchaikovsky", &["Tchaikovsky", "P.I. Tchaikovsky", "PI Tchaikovsky"]),
    ("Antonio Vivaldi", &["Vivaldi", "A. Vivaldi"]),
    ("Carl Orff", &["Orff", "C. Orff"]),
    ("Joaquín Rodrigo", &["Rodrigo", "J. Rodrigo"]),
    ("Hector Berlioz", &["Berlioz", "H. Berlioz"]),
    ("Gioachino Rossini", &["Rossini", "G. Rossini"]),
    ("Giuseppe Verdi", &["Verdi", "G. Verdi"]),
    ("Antonín Dvořák", &["Dvorak", "A. Dvorak", "A. Dvořák"]),
    ("Nikolai Rimsky-Korsakov", &["Rimsky-Korsakov", "N. Rimsky-Korsakov"]),
];

pub const ORCHESTRA_ALIASES: &AliasTable = &[
    ("London Symphony Orchestra", &["LSO", "London Symphony", "London SO"]),
    ("Boston Symphony Orchestra", &["BSO", "Boston Symphony", "Boston SO"]),
    ("Chicago Symphony Orchestra", &["CSO", "Chicago Symphony", "Chicago SO"]),
    ("New York Philharmonic", &["NYP", "NY Philharmonic", "New York Phil"]),
    ("Berlin Philharmonic", &["BPO", "Berliner Philharmoniker", "Berlin Phil"]),
    ("Vienna Philharmonic", &["VPO", "Wiener Philharmoniker", "Vienna Phil"]),
];

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("static pattern"));

static ARTIST_SEPARATOR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*[,/]\s*").expect("static pattern"));

static BRACKETED_FORMAT_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\s*[\[(]\s*(?:FLAC|MP3|WAV|ALAC|XRCD\s*\d*|K2HD|SACD|DSD|MFSL|24[-/]\d+(?:\.\d)?|SHM-?CD)\b[^\])]*[\])]",
    )
    .expect("static pattern")
});

static TRAILING_FORMAT_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s*[-_]\s*(?:FLAC|MP3|WAV|ALAC|XRCD\s*\d*|K2HD|SACD|DSD|MFSL|24[-/]\d+|SHM-?CD)\s*$")
        .expect("static pattern")
});

pub fn collapse_whitespace(text: &str) -> String {
    WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

/// Lowercase and strip the accents that show up in composer names
pub fn fold(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ä' | 'ã' | 'å' | 'Á' | 'À' | 'Â' | 'Ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' | 'ě' | 'É' | 'È' | 'Ê' | 'Ě' => 'e',
            'í' | 'ì' | 'î' | 'ï' | 'Í' | 'Î' => 'i',
            'ó' | 'ò' | 'ô' | 'ö' | 'õ' | 'Ó' | 'Ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' | 'ů' | 'Ú' | 'Ü' => 'u',
            'ñ' | 'Ñ' => 'n',
            'ç' | 'č' | 'Č' => 'c',
            'ř' | 'Ř' => 'r',
            'š' | 'Š' => 's',
            'ž' | 'Ž' => 'z',
            'ý' | 'Ý' => 'y',
            other => other,
        })
        .collect::<String>()
        .to_lowercase()
}

fn lookup(table: &'static AliasTable, name: &str) -> Option<&'static str> {
    let key = fold(&collapse_whitespace(name));
    table
        .iter()
        .find(|(canonical, aliases)| fold(canonical) == key || aliases.iter().any(|a| fold(a) == key))
        .map(|(canonical, _)| *canonical)
}

pub fn canonical_composer(name: &str) -> Option<&'static str> {
    lookup(COMPOSER_ALIASES, name)
}

pub fn canonical_orchestra(name: &str) -> Option<&'static str> {
    lookup(ORCHESTRA_ALIASES, name)
}

/// Alias resolution, then separator unification (`A, B` / `A/B` → `A & B`)
pub fn normalize_artist(raw: &str) -> String {
    if let Some(composer) = canonical_composer(raw) {
        return composer.to_string();
    }
    if let Some(orchestra) = canonical_orchestra(raw) {
        return orchestra.to_string();
    }
    let collapsed = collapse_whitespace(raw);
    ARTIST_SEPARATOR.replace_all(&collapsed, " & ").into_owned()
}

/// Strip release-format noise such as `[FLAC]`, `(24-96)` or `- SACD`
pub fn normalize_title(raw: &str) -> String {
    let without_brackets = BRACKETED_FORMAT_TAG.replace_all(raw, "");
    let without_trailing = TRAILING_FORMAT_TAG.replace(&without_brackets, "");
    collapse_whitespace(&without_trailing.replace('_', " "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composer_aliases() {
        assert_eq!(canonical_composer("J.S. Bach"), Some("Johann Sebastian Bach"));
        assert_eq!(canonical_composer("  bach "), Some("Johann Sebastian Bach"));
        assert_eq!(canonical_composer("Antonín Dvořák"), Some("Antonín Dvořák"));
        assert_eq!(canonical_composer("dvorak"), Some("Antonín Dvořák"));
        assert_eq!(canonical_composer("Miles Davis"), None);
    }

    #[test]
    fn test_normalize_artist() {
        assert_eq!(normalize_artist("LSO"), "London Symphony Orchestra");
        assert_eq!(normalize_artist("Berliner Philharmoniker"), "Berlin Philharmonic");
        assert_eq!(normalize_artist("W.A. Mozart"), "Wolfgang Amadeus Mozart");
        assert_eq!(normalize_artist("Simon,  Garfunkel"), "Simon & Garfunkel");
        assert_eq!(normalize_artist("Chick Corea/Gary Burton"), "Chick Corea & Gary Burton");
    }

    #[test]
    fn test_normalize_title() {
        assert_eq!(normalize_title("Kind of Blue [FLAC]"), "Kind of Blue");
        assert_eq!(normalize_title("Jazz at the Pawnshop (XRCD24)"), "Jazz at the Pawnshop");
        assert_eq!(normalize_title("Aja (24-96 remaster)"), "Aja");
        assert_eq!(normalize_title("Brothers_in_Arms - SACD"), "Brothers in Arms");
        assert_eq!(normalize_title("Symphony No. 9 (Live)"), "Symphony No. 9 (Live)");
    }

    #[test]
    fn test_fold() {
        assert_eq!(fold("Béla Bartók"), "bela bartok");
        assert_eq!(fold("Dvořák"), "dvorak");
    }
}
