//! Referee name normalization for identity matching. The display form is
//! always preserved elsewhere; this module only produces the matching key.

const HONORIFICS: &[&str] = &[
    "dr", "prof", "professor", "mr", "mrs", "ms", "mx", "sir", "dame",
];

/// Case-fold a display name, strip honorifics and trailing degree suffixes,
/// collapse whitespace. "Dr. A. B. Daudin " and "daudin, a b" normalize to
/// comparable forms but no attempt is made at full bibliographic matching.
pub fn normalize_name(display: &str) -> String {
    let lowered = display.to_lowercase();
    let cleaned: String = lowered
        .chars()
        .map(|c| if c == ',' || c == ';' { ' ' } else { c })
        .collect();

    let words: Vec<&str> = cleaned
        .split_whitespace()
        .map(|w| w.trim_matches('.'))
        .filter(|w| !w.is_empty())
        .filter(|w| !HONORIFICS.contains(w))
        .filter(|w| !is_degree_suffix(w))
        .collect();

    words.join(" ")
}

fn is_degree_suffix(w: &str) -> bool {
    matches!(w, "phd" | "md" | "dsc" | "jr" | "sr" | "ii" | "iii")
}

/// Tokens of a normalized name usable for loose containment matching
/// (initials and one-letter particles are excluded).
pub fn name_tokens(normalized: &str) -> Vec<&str> {
    normalized.split_whitespace().filter(|t| t.len() >= 3).collect()
}
