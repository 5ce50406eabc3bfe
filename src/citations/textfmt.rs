//! Final cleanup of answer text after citation markers are placed.
//!
//! The whole pass is idempotent: every step either removes something that
//! cannot reappear or rewrites into a form it leaves alone on a second
//! run. Callers rely on that to re-render an answer without drift.

use std::sync::OnceLock;

use regex::Regex;

fn artifact_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // The raw 【4:0†source】 spans the model leaves in its text.
    RE.get_or_init(|| Regex::new(r"【[^【】]*】").unwrap())
}

fn marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[(\d+)\]").unwrap())
}

fn list_item_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // A sentence boundary (or citation marker) directly followed, on the
    // same line, by a short enumeration head like "2." or "3)".
    RE.get_or_init(|| Regex::new(r"([.!?:;。！？\]])[ \t]+(\d{1,2}[.)][ \t])").unwrap())
}

fn space_run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[ \t]{2,}").unwrap())
}

fn line_tail_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[ \t]+\n").unwrap())
}

fn blank_run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").unwrap())
}

/// Strips leftover citation markup, collapses repeated markers, promotes
/// inline enumerations to their own paragraphs, and normalizes whitespace.
pub(crate) fn tidy(text: &str) -> String {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let text = artifact_re().replace_all(&text, "");
    let text = collapse_repeated_markers(&text);
    let text = list_item_re().replace_all(&text, "$1\n\n$2");
    let text = space_run_re().replace_all(&text, " ");
    let text = line_tail_re().replace_all(&text, "\n");
    let text = blank_run_re().replace_all(&text, "\n\n");
    text.trim().to_string()
}

/// Collapses `[1] [1]` runs left behind by overlapping annotations into a
/// single marker. Only same-index markers with nothing but spaces between
/// them collapse; `[1][2]` and markers split across lines stay.
fn collapse_repeated_markers(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut tail = 0;
    let mut previous: Option<&str> = None;
    for caps in marker_re().captures_iter(text) {
        let (Some(whole), Some(digits)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let between = &text[tail..whole.start()];
        let repeated = previous == Some(digits.as_str())
            && between.chars().all(|c| c == ' ' || c == '\t');
        if !repeated {
            out.push_str(between);
            out.push_str(whole.as_str());
        }
        previous = Some(digits.as_str());
        tail = whole.end();
    }
    out.push_str(&text[tail..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_raw_citation_spans() {
        let out = tidy("Faith precedes understanding【4:0†source】[1], always.");
        assert_eq!(out, "Faith precedes understanding[1], always.");
    }

    #[test]
    fn collapses_repeated_markers_from_overlaps() {
        assert_eq!(tidy("one claim[1][1], see."), "one claim[1], see.");
        assert_eq!(tidy("one claim[1] [1], see."), "one claim[1], see.");
    }

    #[test]
    fn distinct_markers_are_kept() {
        assert_eq!(tidy("both say so[1][2]."), "both say so[1][2].");
    }

    #[test]
    fn markers_on_separate_lines_are_kept() {
        let out = tidy("first point[1]\n\n[1] is cited again");
        assert_eq!(out, "first point[1]\n\n[1] is cited again");
    }

    #[test]
    fn promotes_inline_enumerations() {
        let out = tidy("Three uses of the law: 1. To restrain evil. 2. To convict. 3. To guide.");
        assert_eq!(
            out,
            "Three uses of the law:\n\n1. To restrain evil.\n\n2. To convict.\n\n3. To guide."
        );
    }

    #[test]
    fn enumeration_after_a_marker_is_promoted() {
        let out = tidy("as argued[1] 2. The second point follows.");
        assert_eq!(out, "as argued[1]\n\n2. The second point follows.");
    }

    #[test]
    fn squeezes_whitespace_and_blank_runs() {
        let out = tidy("wide  gaps\t\there  \n\n\n\nand beyond\r\n");
        assert_eq!(out, "wide gaps here\n\nand beyond");
    }

    #[test]
    fn tidy_is_idempotent() {
        let messy =
            "Summary【9:2†source】[1][1] holds: 1. First  claim. 2. Second claim【9:3†source】[2].\n\n\nEnd.  ";
        let once = tidy(messy);
        assert_eq!(tidy(&once), once);
    }
}
