//! Coursegraph prerequisite vocabulary.
//!
//! This crate owns the types every other crate speaks: canonical course codes,
//! prerequisite expressions in conjunctive normal form, and the heuristic
//! parser that turns calendar prose into those expressions without any
//! network access.
//!
//! Storage, model-assisted structuring and calendar ingestion live in their
//! own crates and depend on this one.

pub mod cnf;
pub mod code;
pub mod heuristic;
pub mod split;

pub use cnf::{
    clamp_confidence, stricter, ClauseKind, GradeConstraint, NormalizedGroups, ParseResult,
    PrereqClause, PrereqExpression, PrereqItem, INVALID_JSON_MARKER, MAX_GRADE,
};
pub use code::{canonicalize, extract, find_codes, CodeError, CodeMatch, CourseCode};
pub use heuristic::parse_heuristic;
pub use split::{split_outside_parens, top_level_segments, Separator};
