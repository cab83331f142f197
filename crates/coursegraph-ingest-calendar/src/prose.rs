//! Prerequisite prose extraction from calendar cell text.

use std::sync::LazyLock;

use regex::Regex;

static PREREQ_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bprereq").expect("prereq pattern"));

/// `Prereq:`, `Prerequisite:`, `Prerequisites:`, `Prerequisite(s):`.
static LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(prereq(?:uisite(?:\(s\))?s?)?)\s*:\s*").expect("label pattern")
});

static STOP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(coreq|co-?requisite|antireq|anti-?requisite|notes?)\b").expect("stop pattern")
});

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(coreq|corequisite|corequisites|antireq|antirequisite|antirequisites|notes?|restrictions?)\b",
    )
    .expect("section pattern")
});

/// `"CS 335 prerequisites"` heading lines.
static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[A-Z]{2,5}\s*\d{2,3}[A-Z]?\s+prerequisites[ \t]*\n?").expect("heading pattern")
});

/// The prerequisite text of the first paragraph mentioning one, without its
/// label and cut before any co-/anti-requisite or note. Empty when no
/// paragraph qualifies.
pub fn extract_prereq_text<S: AsRef<str>>(paragraphs: &[S]) -> String {
    let Some(para) = paragraphs
        .iter()
        .map(AsRef::<str>::as_ref)
        .find(|p| PREREQ_RE.is_match(p))
    else {
        return String::new();
    };

    let text = LABEL_RE.replace(para, "");
    let text = match STOP_RE.find(&text) {
        Some(m) => &text[..m.start()],
        None => &text[..],
    };
    text.trim().to_string()
}

/// Keep only the prerequisite part of a longer block: cut at the first
/// co-/anti-requisite, note or restriction heading, drop `"XX 123
/// prerequisites"` heading lines, and keep the first paragraph.
pub fn trim_prereq_only(text: &str) -> String {
    let text = text.replace('\r', "");
    let text = match SECTION_RE.find(&text) {
        Some(m) => &text[..m.start()],
        None => &text[..],
    };
    let text = HEADING_RE.replace_all(text, "");

    text.split("\n\n")
        .map(str::trim)
        .find(|para| !para.is_empty())
        .unwrap_or_else(|| text.trim())
        .to_string()
}
