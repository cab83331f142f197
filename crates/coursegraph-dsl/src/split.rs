//! Parenthesis-aware clause splitting.
//!
//! Prerequisite prose nests alternatives in parentheses
//! (`"(One of CS 116, CS 136), MATH 135"`). Separators only split at depth 0;
//! anything inside a parenthesized group stays with its group.

use std::ops::Range;

/// What to split on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Separator<'a> {
    /// A single character such as `;` or `,`.
    Char(char),
    /// A literal word such as `" and "`, matched ASCII-case-insensitively.
    Word(&'a str),
}

impl From<char> for Separator<'_> {
    fn from(c: char) -> Self {
        Separator::Char(c)
    }
}

impl<'a> From<&'a str> for Separator<'a> {
    fn from(word: &'a str) -> Self {
        Separator::Word(word)
    }
}

/// Split `text` on `sep` wherever the parenthesis depth is zero.
///
/// Depth increments on `(` and decrements (floored at 0) on `)`. Parts are
/// trimmed and empty parts dropped; trailing content after the last separator
/// is emitted as the final part.
pub fn split_outside_parens<'a>(text: &str, sep: impl Into<Separator<'a>>) -> Vec<String> {
    let sep = sep.into();
    let mut parts = Vec::new();
    let mut buf = String::new();
    let mut depth = 0usize;
    let mut i = 0;

    while let Some(ch) = text[i..].chars().next() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ => {}
        }

        if depth == 0 {
            if let Some(skip) = separator_len_at(text, i, sep) {
                push_part(&mut parts, &buf);
                buf.clear();
                i += skip;
                continue;
            }
        }

        buf.push(ch);
        i += ch.len_utf8();
    }

    push_part(&mut parts, &buf);
    parts
}

fn separator_len_at(text: &str, at: usize, sep: Separator<'_>) -> Option<usize> {
    match sep {
        Separator::Char(c) => text[at..].starts_with(c).then(|| c.len_utf8()),
        Separator::Word(word) if !word.is_empty() => text
            .get(at..at + word.len())
            .filter(|candidate| candidate.eq_ignore_ascii_case(word))
            .map(|_| word.len()),
        Separator::Word(_) => None,
    }
}

fn push_part(parts: &mut Vec<String>, buf: &str) {
    let part = buf.trim();
    if !part.is_empty() {
        parts.push(part.to_string());
    }
}

/// Byte ranges of the top-level parenthesized segments, parentheses included.
///
/// Unbalanced openers never close a segment; stray closers are ignored.
pub fn top_level_segments(text: &str) -> Vec<Range<usize>> {
    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut start = None;

    for (i, ch) in text.char_indices() {
        match ch {
            '(' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            ')' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        segments.push(s..i + 1);
                    }
                }
            }
            _ => {}
        }
    }

    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comma_inside_parens_never_splits() {
        assert_eq!(split_outside_parens("(A, B), C", ','), vec!["(A, B)", "C"]);
    }

    #[test]
    fn semicolons_trim_and_drop_empty_parts() {
        assert_eq!(
            split_outside_parens(" CS 135 ;; MATH 135; ", ';'),
            vec!["CS 135", "MATH 135"]
        );
    }

    #[test]
    fn unterminated_tail_is_kept() {
        assert_eq!(
            split_outside_parens("A; (B; C", ';'),
            vec!["A", "(B; C"]
        );
    }

    #[test]
    fn stray_closer_does_not_go_negative() {
        assert_eq!(split_outside_parens("A), B, C", ','), vec!["A)", "B", "C"]);
    }

    #[test]
    fn word_separator_is_case_insensitive_and_depth_aware() {
        let parts = split_outside_parens("MATH 137 AND (STAT 220 and STAT 230) and CS 115", " and ");
        assert_eq!(parts, vec!["MATH 137", "(STAT 220 and STAT 230)", "CS 115"]);
    }

    #[test]
    fn word_separator_survives_multibyte_text() {
        let parts = split_outside_parens("Über CS 135 and CS 136 – ok", " and ");
        assert_eq!(parts, vec!["Über CS 135", "CS 136 – ok"]);
    }

    #[test]
    fn top_level_segments_skip_nested_groups() {
        let text = "(a (b)) or (c); d";
        let segs = top_level_segments(text);
        assert_eq!(segs.len(), 2);
        assert_eq!(&text[segs[0].clone()], "(a (b))");
        assert_eq!(&text[segs[1].clone()], "(c)");
    }

    #[test]
    fn unclosed_segment_is_not_reported() {
        assert!(top_level_segments("(a, b").is_empty());
    }
}
