//! Citation reconciliation for finished answers.
//!
//! Annotations arrive as literal marker spans in the text plus a file
//! handle each. Handles are resolved to display names once per unique
//! file, indices are assigned by first appearance in the text, and the
//! markers are rewritten into bracketed `[n]` references. Everything in
//! here degrades instead of failing: an answer without resolvable
//! citations is still an answer.

mod scan;
mod textfmt;

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::engine::{Lang, Source};
use crate::localize;
use crate::openai::AssistantsApi;
use crate::openai::types::Annotation;

/// The rewritten answer text and its numbered source list.
pub(crate) struct Resolved {
    pub text: String,
    pub sources: Vec<Source>,
}

struct Cited<'a> {
    file_id: &'a str,
    marker: &'a str,
    quote: Option<&'a str>,
    position: usize,
}

pub(crate) async fn resolve<A: AssistantsApi>(
    api: &A,
    text: &str,
    annotations: &[Annotation],
    lang: Lang,
) -> Resolved {
    let mut cited: Vec<Cited> = annotations
        .iter()
        .filter_map(|a| {
            let file = a.file_citation.as_ref()?;
            Some(Cited {
                file_id: file.file_id.as_str(),
                marker: a.text.as_str(),
                quote: file.quote.as_deref().filter(|q| !q.trim().is_empty()),
                position: position_of(a, text),
            })
        })
        .collect();
    cited.sort_by_key(|c| c.position);

    // First quote seen per file doubles as the excerpt and as the fallback
    // scan input when the file lookup fails.
    let mut quotes: HashMap<&str, &str> = HashMap::new();
    for c in &cited {
        if let Some(quote) = c.quote {
            quotes.entry(c.file_id).or_insert(quote);
        }
    }

    // One lookup per unique handle, concurrently.
    let mut order: Vec<&str> = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    for c in &cited {
        if seen.insert(c.file_id) {
            order.push(c.file_id);
        }
    }
    let lookups = order
        .iter()
        .map(|id| lookup_name(api, id, quotes.get(id).copied()));
    let names: HashMap<&str, Option<String>> =
        order.iter().copied().zip(join_all(lookups).await).collect();

    let mut sources: Vec<Source> = Vec::new();
    let mut index_of: HashMap<&str, usize> = HashMap::new();
    let mut markers: Vec<(&str, usize)> = Vec::new();
    for c in &cited {
        let Some(Some(name)) = names.get(c.file_id) else {
            continue;
        };
        let index = *index_of.entry(c.file_id).or_insert_with(|| {
            sources.push(Source {
                index: sources.len() + 1,
                name: name.clone(),
                excerpt: quotes.get(c.file_id).map(|q| flatten(q)),
                file_id: Some(c.file_id.to_string()),
            });
            sources.len()
        });
        if c.position != usize::MAX && !c.marker.is_empty() {
            markers.push((c.marker, index));
        }
    }

    let marked = apply_markers(text, &markers);
    let tidied = textfmt::tidy(&marked);

    // Authors the text itself names are appended unless an annotation
    // already accounts for them.
    for name in scan::scan_sources(&tidied) {
        if sources.iter().any(|s| near_duplicate(&s.name, &name)) {
            continue;
        }
        sources.push(Source {
            index: sources.len() + 1,
            name,
            excerpt: None,
            file_id: None,
        });
    }
    debug!(
        annotations = annotations.len(),
        sources = sources.len(),
        "citations resolved"
    );

    let text = localize::localize(&tidied, lang);
    for source in &mut sources {
        source.name = localize::localize(&source.name, lang);
    }
    Resolved { text, sources }
}

async fn lookup_name<A: AssistantsApi>(
    api: &A,
    file_id: &str,
    quote: Option<&str>,
) -> Option<String> {
    match api.retrieve_file(file_id).await {
        Ok(meta) => Some(display_name(&meta.filename)),
        Err(err) => {
            warn!(file_id, error = %err, "file lookup failed; scanning the quote instead");
            quote.and_then(scan::author_signature)
        }
    }
}

fn position_of(annotation: &Annotation, text: &str) -> usize {
    if let Some(start) = annotation.start_index {
        return start as usize;
    }
    if !annotation.text.is_empty()
        && let Some(pos) = text.find(&annotation.text)
    {
        return pos;
    }
    usize::MAX
}

/// Appends `[n]` after each marker occurrence, walking left to right so a
/// marker string reused by several annotations tags distinct occurrences.
fn apply_markers(text: &str, markers: &[(&str, usize)]) -> String {
    let mut out = String::with_capacity(text.len() + markers.len() * 4);
    let mut rest = text;
    for (marker, index) in markers {
        if let Some(pos) = rest.find(marker) {
            let cut = pos + marker.len();
            out.push_str(&rest[..cut]);
            let _ = write!(out, "[{index}]");
            rest = &rest[cut..];
        }
    }
    out.push_str(rest);
    out
}

/// "reformed_dogmatics_v1.pdf" -> "reformed dogmatics v1"
fn display_name(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let stem = match base.rfind('.') {
        Some(pos)
            if pos > 0
                && !base[pos + 1..].is_empty()
                && base[pos + 1..].len() <= 5
                && base[pos + 1..].chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            &base[..pos]
        }
        _ => base,
    };
    let cleaned = flatten(&stem.replace('_', " "));
    if cleaned.is_empty() {
        filename.trim().to_string()
    } else {
        cleaned
    }
}

fn flatten(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn near_duplicate(existing: &str, candidate: &str) -> bool {
    let a = existing.to_lowercase();
    let b = candidate.to_lowercase();
    a.contains(&b) || b.contains(&a)
}
