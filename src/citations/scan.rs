//! Fallback source extraction from raw answer text.
//!
//! When annotations come back empty or a file lookup fails, the text
//! itself often still names its sources in a recognizable shape:
//! "[Herman Bavinck (1854-1921)]" or "John Calvin (1509-1564)". A fixed
//! ordered list of patterns pulls those out; names outside the known
//! author table must additionally look like a person's name.

use std::cmp::Reverse;
use std::sync::OnceLock;

use regex::Regex;

use crate::localize;

struct ScanRule {
    /// Captures the name in group 1 and the year span in group 2.
    pattern: &'static str,
    regex: OnceLock<Regex>,
}

impl ScanRule {
    const fn new(pattern: &'static str) -> Self {
        Self {
            pattern,
            regex: OnceLock::new(),
        }
    }

    fn regex(&self) -> &Regex {
        self.regex.get_or_init(|| {
            Regex::new(self.pattern).unwrap_or_else(|e| panic!("scan pattern {:?}: {e}", self.pattern))
        })
    }
}

/// Evaluated in order; earlier rules rank their candidates first.
static RULES: [ScanRule; 2] = [
    // Bracketed author with a year span: [Herman Bavinck (1854-1921)]
    ScanRule::new(r"\[([^\[\]()]{2,60}?)\s*\(\s*(\d{3,4}\s*[-–—]\s*\d{2,4})\s*\)\s*\]"),
    // Bare author with a year span: Herman Bavinck (1854-1921)
    ScanRule::new(r"([A-Z][A-Za-zÀ-ÿ.'\- ]{1,60}?)\s*\(\s*(\d{3,4}\s*[-–—]\s*\d{2,4})\s*\)"),
];

/// Display names for every author citation found in the text, in rule
/// precedence order and text order within a rule, deduplicated.
pub(crate) fn scan_sources(text: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for rule in &RULES {
        for caps in rule.regex().captures_iter(text) {
            let (Some(name), Some(years)) = (caps.get(1), caps.get(2)) else {
                continue;
            };
            let name = name.as_str().trim();
            if !plausible_author(name) {
                continue;
            }
            let display = format!("{name} ({})", flatten_span(years.as_str()));
            if !found.iter().any(|seen| seen.eq_ignore_ascii_case(&display)) {
                found.push(display);
            }
        }
    }
    found
}

/// The first known author named in the text; full-name matches beat
/// surname-only matches, earlier positions beat later ones.
pub(crate) fn author_signature(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    let full = localize::known_author_names()
        .filter_map(|name| lower.find(&name.to_lowercase()).map(|pos| (pos, name)))
        .min_by_key(|&(pos, name)| (pos, Reverse(name.len())));
    if let Some((_, name)) = full {
        return Some(name.to_string());
    }
    localize::known_author_names()
        .filter_map(|name| {
            let surname = name.rsplit(' ').next()?;
            if surname.len() < 4 {
                return None;
            }
            lower.find(&surname.to_lowercase()).map(|pos| (pos, name))
        })
        .min_by_key(|&(pos, name)| (pos, Reverse(name.len())))
        .map(|(_, name)| name.to_string())
}

fn flatten_span(years: &str) -> String {
    years.split_whitespace().collect()
}

fn plausible_author(name: &str) -> bool {
    if localize::is_known_author(name) {
        return true;
    }
    let words: Vec<&str> = name.split_whitespace().collect();
    if words.is_empty() || words.len() > 5 {
        return false;
    }
    words.iter().any(|w| titlecase(w))
        && words
            .iter()
            .all(|w| titlecase(w) || initial(w) || particle(w))
}

/// "Bavinck", "McCheyne": starts uppercase, contains lowercase, letters only.
fn titlecase(word: &str) -> bool {
    let mut chars = word.chars();
    chars.next().is_some_and(char::is_uppercase)
        && word.chars().any(char::is_lowercase)
        && word.chars().all(|c| c.is_alphabetic() || matches!(c, '\'' | '’' | '-'))
}

/// "J.", "B.": an abbreviated given name.
fn initial(word: &str) -> bool {
    word.len() <= 3
        && word.ends_with('.')
        && word.chars().next().is_some_and(char::is_uppercase)
}

fn particle(word: &str) -> bool {
    matches!(
        word.to_lowercase().as_str(),
        "of" | "van" | "von" | "de" | "der" | "den" | "du" | "la" | "le" | "à" | "a" | "ten" | "ter"
    )
}
