//! Heuristic prose → CNF parser.
//!
//! Calendar phrasing is regular enough that separators carry most of the
//! structure:
//!
//! 1. `;` outside parentheses separates required clauses;
//! 2. failing that, `,` outside parentheses;
//! 3. failing that, the word `and` outside parentheses.
//!
//! Every course code found inside one clause is an alternative of that clause.
//! A special case handles `"(A, B) or (C; D)"`, which distributes into
//! `(A ∨ B ∨ C) ∧ (A ∨ B ∨ D)`.
//!
//! An empty expression means "no structure found" and is not an error.

use crate::cnf::{grade_from_int, PrereqClause, PrereqExpression, PrereqItem};
use crate::code::find_codes;
use crate::split::{split_outside_parens, top_level_segments};
use regex::Regex;
use std::sync::LazyLock;

/// How far past a code (in characters) a grade phrase may start.
pub const GRADE_LOOKAHEAD_CHARS: usize = 90;

static GRADE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)with (?:a )?grade of at least\s*(\d{1,3})\s*%|with at least\s*(\d{1,3})\s*%",
    )
    .expect("grade pattern")
});

static OR_WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bor\b").expect("or pattern"));

static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern"));

/// Parse prerequisite prose into CNF clauses.
pub fn parse_heuristic(text: &str) -> PrereqExpression {
    let text = normalize_text(text);
    if text.is_empty() {
        return PrereqExpression::new();
    }

    if let Some(expr) = distribute_alternative_groups(&text) {
        return expr;
    }

    split_clauses(&text)
        .iter()
        .map(|part| clause_from_text(part))
        .collect()
}

/// Collapse whitespace runs and drop trailing periods.
fn normalize_text(text: &str) -> String {
    WHITESPACE_RE
        .replace_all(text, " ")
        .trim()
        .trim_end_matches('.')
        .trim_end()
        .to_string()
}

/// Top-level clause candidates: the first separator that yields more than one
/// part wins; otherwise the whole text is one candidate.
fn split_clauses(text: &str) -> Vec<String> {
    let mut parts = split_outside_parens(text, ';');
    if parts.len() <= 1 {
        parts = split_outside_parens(text, ',');
    }
    if parts.len() <= 1 {
        parts = split_outside_parens(text, " and ");
    }
    parts
}

/// `(LEFT) or (RIGHT) tail`: LEFT becomes one OR-clause that is distributed
/// over every clause of RIGHT; the tail is parsed on its own and appended.
///
/// Returns `None` when the pattern does not apply or produces nothing.
fn distribute_alternative_groups(text: &str) -> Option<PrereqExpression> {
    let segments = top_level_segments(text);
    let (first, second) = match segments.as_slice() {
        [first, second, ..] => (first.clone(), second.clone()),
        _ => return None,
    };

    if !OR_WORD_RE.is_match(&text[first.end..second.start]) {
        return None;
    }

    let left_text = &text[first.start + 1..first.end - 1];
    let right_text = &text[second.start + 1..second.end - 1];

    let left: PrereqClause = parse_heuristic(left_text)
        .iter()
        .flat_map(|clause| clause.iter().cloned())
        .collect();
    let right = parse_heuristic(right_text);

    let mut expr = PrereqExpression::new();
    if !left.is_empty() {
        for clause in &right {
            let mut combined = left.clone();
            combined.extend(clause.iter().cloned());
            expr.push(combined);
        }
    }

    for part in split_clauses(&text[second.end..]) {
        expr.push(clause_from_text(&part));
    }

    (!expr.is_empty()).then_some(expr)
}

/// Collect every code in a clause candidate with any grade that follows it.
///
/// A grade phrase binds to the nearest preceding code only: the lookahead
/// window stops at the next code. Repeated codes keep their first position
/// and the stricter grade.
fn clause_from_text(text: &str) -> PrereqClause {
    let matches: Vec<_> = find_codes(text).collect();
    let mut clause = PrereqClause::new();

    for (i, m) in matches.iter().enumerate() {
        let window_end = matches.get(i + 1).map_or(text.len(), |next| next.start);
        let window = char_prefix(&text[m.end..window_end], GRADE_LOOKAHEAD_CHARS);
        clause.push(PrereqItem {
            code: m.code.clone(),
            min_grade: grade_in(window),
        });
    }

    clause
}

fn grade_in(window: &str) -> Option<u8> {
    let cap = GRADE_RE.captures(window)?;
    let digits = cap.get(1).or_else(|| cap.get(2))?;
    digits.as_str().parse::<i64>().ok().and_then(grade_from_int)
}

fn char_prefix(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cnf::ClauseKind;

    fn codes(expr: &PrereqExpression) -> Vec<Vec<(String, Option<u8>)>> {
        expr.iter()
            .map(|c| {
                c.iter()
                    .map(|it| (it.code.to_string(), it.min_grade))
                    .collect()
            })
            .collect()
    }

    fn item(code: &str, grade: Option<u8>) -> (String, Option<u8>) {
        (code.to_string(), grade)
    }

    #[test]
    fn semicolon_clauses_with_or_alternatives() {
        let expr = parse_heuristic("CS 245 or CS 240; MATH 239 or MATH 249");
        assert_eq!(
            codes(&expr),
            vec![
                vec![item("CS245", None), item("CS240", None)],
                vec![item("MATH239", None), item("MATH249", None)],
            ]
        );
        let kinds: Vec<_> = expr.iter().map(|c| c.kind()).collect();
        assert_eq!(kinds, vec![ClauseKind::Or, ClauseKind::Or]);
    }

    #[test]
    fn distribution_over_second_group() {
        let expr = parse_heuristic(
            "(One of CS116, CS136) or (CS114 with at least 60%; CS115)",
        );
        assert_eq!(
            codes(&expr),
            vec![
                vec![item("CS116", None), item("CS136", None), item("CS114", Some(60))],
                vec![item("CS116", None), item("CS136", None), item("CS115", None)],
            ]
        );
    }

    #[test]
    fn distribution_appends_tail_clauses() {
        let expr = parse_heuristic(
            "(One of CS 116, CS 136, CS 138, CS 146) or (CS 114 with at least 60%; CS 115 or CS 135); \
             One of MATH 106 with at least 70%, MATH 136 or MATH 146; MATH 237 or MATH 247.",
        );
        assert_eq!(expr.len(), 4);
        assert_eq!(
            codes(&expr)[2],
            vec![item("MATH106", Some(70)), item("MATH136", None), item("MATH146", None)]
        );
        assert_eq!(codes(&expr)[3], vec![item("MATH237", None), item("MATH247", None)]);
        assert!(expr.clauses()[1].contains(&"CS135".parse().unwrap()));
    }

    #[test]
    fn two_groups_without_or_use_plain_splitting() {
        let expr = parse_heuristic("(CS 135 or CS 145) and (MATH 135 or MATH 145)");
        assert_eq!(
            codes(&expr),
            vec![
                vec![item("CS135", None), item("CS145", None)],
                vec![item("MATH135", None), item("MATH145", None)],
            ]
        );
    }

    #[test]
    fn comma_fallback_then_and_fallback() {
        let expr = parse_heuristic("AMATH 242, CS 230");
        assert_eq!(expr.len(), 2);

        let expr = parse_heuristic("CS 136/CS 146 and MATH 239");
        assert_eq!(
            codes(&expr),
            vec![vec![item("CS136", None), item("CS146", None)], vec![item("MATH239", None)]]
        );
    }

    #[test]
    fn grade_binds_to_nearest_preceding_code_only() {
        let expr = parse_heuristic("CS 114 or CS 115 with a grade of at least 65%");
        assert_eq!(
            codes(&expr),
            vec![vec![item("CS114", None), item("CS115", Some(65))]]
        );
    }

    #[test]
    fn grade_outside_lookahead_is_ignored() {
        let filler = "x".repeat(GRADE_LOOKAHEAD_CHARS);
        let text = format!("CS 135 {filler} with at least 60%");
        let expr = parse_heuristic(&text);
        assert_eq!(codes(&expr), vec![vec![item("CS135", None)]]);
    }

    #[test]
    fn duplicate_codes_collapse_within_clause() {
        let expr = parse_heuristic("CS 135 (or CS135 with at least 80%)");
        assert_eq!(codes(&expr), vec![vec![item("CS135", Some(80))]]);
        assert_eq!(expr.clauses()[0].kind(), ClauseKind::And);
    }

    #[test]
    fn codeless_candidates_are_dropped() {
        let expr = parse_heuristic("Level at least 3A; Honours Mathematics students only; CS 240");
        assert_eq!(codes(&expr), vec![vec![item("CS240", None)]]);
    }

    #[test]
    fn empty_and_codeless_text_yield_empty_expression() {
        assert!(parse_heuristic("").is_empty());
        assert!(parse_heuristic("   .").is_empty());
        assert!(parse_heuristic("Instructor consent required.").is_empty());
    }

    #[test]
    fn whitespace_is_collapsed_before_matching() {
        let expr = parse_heuristic("CS\n135 with at\n least   70%;\tMATH 135");
        assert_eq!(
            codes(&expr),
            vec![vec![item("CS135", Some(70))], vec![item("MATH135", None)]]
        );
    }
}
