//! Prerequisite expressions in conjunctive normal form.
//!
//! An expression is an AND across clauses; each clause is an OR across
//! interchangeable courses, each optionally carrying a minimum grade.
//!
//! ```text
//! (CS245 ∨ CS240) ∧ (MATH239 ∨ MATH249)
//!   └── clause 1 ──┘   └──── clause 2 ───┘
//! ```
//!
//! JSON shape (shared with the structuring model and the audit log):
//! `[[{"code": "CS245", "min_grade": null}, ...], ...]`.

use crate::code::CourseCode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Minimum percentage grade attached to a single alternative.
pub type GradeConstraint = Option<u8>;

/// Highest grade a constraint may carry.
pub const MAX_GRADE: u8 = 100;

/// Keep the stricter of two grade constraints. Presence beats absence.
pub fn stricter(a: GradeConstraint, b: GradeConstraint) -> GradeConstraint {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (Some(x), None) | (None, Some(x)) => Some(x),
        (None, None) => None,
    }
}

/// Interpret an integer as a grade; values outside `0..=100` carry no constraint.
pub fn grade_from_int(value: i64) -> GradeConstraint {
    u8::try_from(value).ok().filter(|g| *g <= MAX_GRADE)
}

// ============================================================================
// Items and clauses
// ============================================================================

/// One prerequisite alternative.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrereqItem {
    pub code: CourseCode,
    #[serde(default)]
    pub min_grade: GradeConstraint,
}

impl PrereqItem {
    pub fn new(code: CourseCode) -> Self {
        Self {
            code,
            min_grade: None,
        }
    }

    pub fn with_grade(code: CourseCode, min_grade: u8) -> Self {
        Self {
            code,
            min_grade: grade_from_int(i64::from(min_grade)),
        }
    }
}

/// Label for a clause, derived from how many alternatives it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClauseKind {
    /// Exactly one course: it is simply required.
    And,
    /// Several courses: any one satisfies the clause.
    Or,
}

impl fmt::Display for ClauseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClauseKind::And => f.write_str("AND"),
            ClauseKind::Or => f.write_str("OR"),
        }
    }
}

/// An OR-group of alternatives. Codes are unique within a clause.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<PrereqItem>", into = "Vec<PrereqItem>")]
pub struct PrereqClause {
    items: Vec<PrereqItem>,
}

impl PrereqClause {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an alternative. A repeated code keeps its first position and the
    /// stricter of the two grades.
    pub fn push(&mut self, item: PrereqItem) {
        match self.items.iter_mut().find(|it| it.code == item.code) {
            Some(existing) => existing.min_grade = stricter(existing.min_grade, item.min_grade),
            None => self.items.push(item),
        }
    }

    pub fn kind(&self) -> ClauseKind {
        if self.items.len() > 1 {
            ClauseKind::Or
        } else {
            ClauseKind::And
        }
    }

    pub fn items(&self) -> &[PrereqItem] {
        &self.items
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PrereqItem> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, code: &CourseCode) -> bool {
        self.items.iter().any(|it| &it.code == code)
    }
}

impl FromIterator<PrereqItem> for PrereqClause {
    fn from_iter<T: IntoIterator<Item = PrereqItem>>(iter: T) -> Self {
        let mut clause = PrereqClause::new();
        for item in iter {
            clause.push(item);
        }
        clause
    }
}

impl Extend<PrereqItem> for PrereqClause {
    fn extend<T: IntoIterator<Item = PrereqItem>>(&mut self, iter: T) {
        for item in iter {
            self.push(item);
        }
    }
}

impl From<Vec<PrereqItem>> for PrereqClause {
    fn from(items: Vec<PrereqItem>) -> Self {
        items.into_iter().collect()
    }
}

impl From<PrereqClause> for Vec<PrereqItem> {
    fn from(clause: PrereqClause) -> Self {
        clause.items
    }
}

impl<'a> IntoIterator for &'a PrereqClause {
    type Item = &'a PrereqItem;
    type IntoIter = std::slice::Iter<'a, PrereqItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

// ============================================================================
// Expressions
// ============================================================================

/// Sorted, order-free form of an expression used for equality checks.
pub type NormalizedGroups = Vec<Vec<(CourseCode, GradeConstraint)>>;

/// AND across clauses. Empty clauses are never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<PrereqClause>", into = "Vec<PrereqClause>")]
pub struct PrereqExpression {
    clauses: Vec<PrereqClause>,
}

impl PrereqExpression {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a clause; empty clauses are dropped.
    pub fn push(&mut self, clause: PrereqClause) {
        if !clause.is_empty() {
            self.clauses.push(clause);
        }
    }

    pub fn clauses(&self) -> &[PrereqClause] {
        &self.clauses
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PrereqClause> {
        self.clauses.iter()
    }

    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Distinct codes across all clauses, in first-seen order.
    pub fn codes(&self) -> Vec<CourseCode> {
        let mut out: Vec<CourseCode> = Vec::new();
        for item in self.clauses.iter().flat_map(PrereqClause::iter) {
            if !out.contains(&item.code) {
                out.push(item.code.clone());
            }
        }
        out
    }

    /// Each clause sorted by (code, grade), then the clauses sorted.
    pub fn normalized(&self) -> NormalizedGroups {
        let mut groups: NormalizedGroups = self
            .clauses
            .iter()
            .map(|clause| {
                let mut items: Vec<_> = clause
                    .iter()
                    .map(|it| (it.code.clone(), it.min_grade))
                    .collect();
                items.sort();
                items
            })
            .collect();
        groups.sort();
        groups
    }
}

impl FromIterator<PrereqClause> for PrereqExpression {
    fn from_iter<T: IntoIterator<Item = PrereqClause>>(iter: T) -> Self {
        let mut expr = PrereqExpression::new();
        for clause in iter {
            expr.push(clause);
        }
        expr
    }
}

impl From<Vec<PrereqClause>> for PrereqExpression {
    fn from(clauses: Vec<PrereqClause>) -> Self {
        clauses.into_iter().collect()
    }
}

impl From<PrereqExpression> for Vec<PrereqClause> {
    fn from(expr: PrereqExpression) -> Self {
        expr.clauses
    }
}

impl<'a> IntoIterator for &'a PrereqExpression {
    type Item = &'a PrereqClause;
    type IntoIter = std::slice::Iter<'a, PrereqClause>;

    fn into_iter(self) -> Self::IntoIter {
        self.clauses.iter()
    }
}

// ============================================================================
// Parse results
// ============================================================================

/// Marker constraint attached when the structuring model's output could not
/// be decoded.
pub const INVALID_JSON_MARKER: &str = "invalid_json";

/// Outcome of one parse attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseResult {
    pub groups: PrereqExpression,
    /// Non-course conditions ("Honours Mathematics students only").
    #[serde(default)]
    pub constraints: Vec<String>,
    pub confidence: f64,
}

impl ParseResult {
    pub fn new(groups: PrereqExpression, constraints: Vec<String>, confidence: f64) -> Self {
        Self {
            groups,
            constraints,
            confidence: clamp_confidence(confidence),
        }
    }

    pub fn empty() -> Self {
        Self::new(PrereqExpression::new(), Vec::new(), 0.0)
    }

    /// Result for undecodable model output.
    pub fn invalid_json() -> Self {
        Self::new(
            PrereqExpression::new(),
            vec![INVALID_JSON_MARKER.to_string()],
            0.0,
        )
    }

    pub fn is_invalid_json(&self) -> bool {
        self.groups.is_empty() && self.constraints.iter().any(|c| c == INVALID_JSON_MARKER)
    }
}

/// Clamp into `[0, 1]`; NaN becomes 0.
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::canonicalize;

    fn code(s: &str) -> CourseCode {
        canonicalize(s).unwrap()
    }

    #[test]
    fn duplicate_codes_keep_stricter_grade_and_first_position() {
        let mut clause = PrereqClause::new();
        clause.push(PrereqItem::new(code("CS135")));
        clause.push(PrereqItem::new(code("CS145")));
        clause.push(PrereqItem::with_grade(code("CS135"), 60));
        clause.push(PrereqItem::with_grade(code("CS135"), 50));

        assert_eq!(clause.len(), 2);
        assert_eq!(clause.items()[0].code.as_str(), "CS135");
        assert_eq!(clause.items()[0].min_grade, Some(60));
    }

    #[test]
    fn kind_follows_cardinality() {
        let single: PrereqClause = [PrereqItem::new(code("CS135"))].into_iter().collect();
        assert_eq!(single.kind(), ClauseKind::And);

        let pair: PrereqClause = [
            PrereqItem::new(code("CS135")),
            PrereqItem::new(code("CS145")),
        ]
        .into_iter()
        .collect();
        assert_eq!(pair.kind(), ClauseKind::Or);

        // Collapsing a duplicate turns an apparent pair back into a singleton.
        let dup: PrereqClause = [
            PrereqItem::new(code("CS135")),
            PrereqItem::new(code("cs 135")),
        ]
        .into_iter()
        .collect();
        assert_eq!(dup.kind(), ClauseKind::And);
    }

    #[test]
    fn expression_drops_empty_clauses() {
        let mut expr = PrereqExpression::new();
        expr.push(PrereqClause::new());
        assert!(expr.is_empty());
    }

    #[test]
    fn grade_bounds() {
        assert_eq!(grade_from_int(60), Some(60));
        assert_eq!(grade_from_int(100), Some(100));
        assert_eq!(grade_from_int(101), None);
        assert_eq!(grade_from_int(-1), None);
        assert_eq!(stricter(None, Some(70)), Some(70));
        assert_eq!(stricter(Some(80), Some(70)), Some(80));
    }

    #[test]
    fn json_shape_matches_model_schema() {
        let expr: PrereqExpression = serde_json::from_str(
            r#"[[{"code":"CS114","min_grade":60},{"code":"CS115"}],[{"code":"MATH135"}]]"#,
        )
        .unwrap();
        assert_eq!(expr.len(), 2);
        assert_eq!(expr.clauses()[0].items()[0].min_grade, Some(60));
        assert_eq!(expr.clauses()[0].items()[1].min_grade, None);

        let json = serde_json::to_value(&expr).unwrap();
        assert_eq!(json[1][0]["code"], "MATH135");
        assert!(json[1][0]["min_grade"].is_null());
    }

    #[test]
    fn deserialization_restores_invariants() {
        let expr: PrereqExpression = serde_json::from_str(
            r#"[[], [{"code":"CS135"},{"code":"cs 135","min_grade":70}]]"#,
        )
        .unwrap();
        assert_eq!(expr.len(), 1);
        assert_eq!(expr.clauses()[0].len(), 1);
        assert_eq!(expr.clauses()[0].items()[0].min_grade, Some(70));
    }

    #[test]
    fn parse_result_clamps_confidence() {
        assert_eq!(ParseResult::new(PrereqExpression::new(), vec![], 1.7).confidence, 1.0);
        assert_eq!(ParseResult::new(PrereqExpression::new(), vec![], f64::NAN).confidence, 0.0);
        assert!(ParseResult::invalid_json().is_invalid_json());
        assert!(!ParseResult::empty().is_invalid_json());
    }
}
