//! Korean display forms for the author names that appear in answers.
//!
//! Three match levels per author, most specific first: a bracketed name
//! with a year span, a bare name with a year span, then the bare name.
//! Each level substitutes only the name, so brackets and years survive,
//! and a substituted occurrence can never match a later level again.

pub(crate) mod table;

use std::sync::OnceLock;

use regex::Regex;

use crate::engine::Lang;

/// Year spans as the source texts print them: "1854-1921", "1509–1564".
const YEAR_SPAN: &str = r"\d{3,4}\s*[-–—]\s*\d{2,4}";

struct AuthorMatcher {
    bracketed: Regex,
    dated: Regex,
    bare: Regex,
    localized: &'static str,
}

static MATCHERS: OnceLock<Vec<AuthorMatcher>> = OnceLock::new();

fn matchers() -> &'static [AuthorMatcher] {
    MATCHERS.get_or_init(|| {
        let mut entries: Vec<(&str, &str)> = table::AUTHORS
            .iter()
            .map(|&(key, localized)| (bare_name(key), localized))
            .collect();
        // Longest name first so "Augustine of Hippo" is consumed before
        // "Augustine" gets a chance at the remainder.
        entries.sort_by_key(|(name, _)| std::cmp::Reverse(name.len()));
        entries
            .into_iter()
            .map(|(name, localized)| {
                let name = regex::escape(name);
                AuthorMatcher {
                    bracketed: compile(&format!(
                        r"\[\s*{name}\s*\(\s*({YEAR_SPAN})\s*\)\s*\]"
                    )),
                    dated: compile(&format!(r"\b{name}\s*\(\s*({YEAR_SPAN})\s*\)")),
                    bare: compile(&format!(r"\b{name}\b")),
                    localized,
                }
            })
            .collect()
    })
}

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("author pattern {pattern:?}: {e}"))
}

/// Strips a trailing parenthetical year span from a table key.
fn bare_name(key: &str) -> &str {
    match key.find('(') {
        Some(pos) if key[pos..].chars().any(|c| c.is_ascii_digit()) => key[..pos].trim_end(),
        _ => key.trim(),
    }
}

/// Rewrites recognized author names into their Korean display forms.
/// Returns the text untouched unless `lang` localizes; never touches the
/// `[n]` citation markers, which match no author pattern.
pub(crate) fn localize(text: &str, lang: Lang) -> String {
    if !lang.localizes_authors() {
        return text.to_string();
    }
    let mut out = text.to_string();
    for m in matchers() {
        out = m
            .bracketed
            .replace_all(&out, format!("[{} ($1)]", m.localized))
            .into_owned();
        out = m
            .dated
            .replace_all(&out, format!("{} ($1)", m.localized))
            .into_owned();
        out = m.bare.replace_all(&out, m.localized).into_owned();
    }
    out
}

/// Canonical source-language author names, for signature scanning.
pub(crate) fn known_author_names() -> impl Iterator<Item = &'static str> {
    table::AUTHORS.iter().map(|&(key, _)| bare_name(key))
}

pub(crate) fn is_known_author(name: &str) -> bool {
    let name = name.trim();
    known_author_names().any(|known| known.eq_ignore_ascii_case(name))
}
