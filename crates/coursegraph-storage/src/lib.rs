//! Coursegraph relationship storage
//!
//! Prerequisites persist as flat rows, one per (course, prereq, clause):
//!
//! ```text
//! ┌────────────┐   resolve    ┌──────────────┐   plan/apply   ┌───────────────┐
//! │  prose     │─────────────►│ Prereq       │───────────────►│ Relationship  │
//! │  (calendar)│              │ Expression   │   reconcile    │ Store (rows)  │
//! └────────────┘              └──────────────┘                └──────┬────────┘
//!                                                                    │ reads
//!                                                      ┌─────────────┴─────────┐
//!                                                      │ graph: backward_tree  │
//!                                                      │        forward_tree   │
//!                                                      └───────────────────────┘
//! ```
//!
//! Rows are only ever written through [`reconcile`]. The graph builders are
//! pure reads and tolerate a store that is mid-update.
//!
//! Two reference stores ship here: [`MemoryStore`] and the JSON-backed
//! [`FileStore`]. Any engine that implements [`RelationshipStore`] plugs in.

pub mod error;
pub mod graph;
pub mod memory;
pub mod persistence;
pub mod reconcile;


use chrono::{DateTime, Utc};
use coursegraph_dsl::{CourseCode, GradeConstraint, ParseResult, PrereqClause, PrereqExpression, PrereqItem};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use error::{ConflictKind, StoreError};
pub use graph::{
    backward_tree, collect_codes, course_tree, forward_tree, prereq_groups, CourseTree,
    DepthError, FutureNode, GraphError, GroupCourse, PrereqGroup, PrereqNode,
};
pub use memory::MemoryStore;
pub use persistence::FileStore;
pub use reconcile::{
    apply, groups_equal, plan, reconcile, ReconcilePlan, ReconcileReport, RetryPolicy,
    RowOperation, SkippedRow,
};

pub type StoreResult<T> = Result<T, StoreError>;

// ============================================================================
// Row types
// ============================================================================

/// Identity of one stored relationship row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowKey {
    pub course: CourseCode,
    pub prereq: CourseCode,
    /// 1-based clause position within the course's expression.
    pub group_index: u32,
}

/// Durable form of one prerequisite alternative.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StoredRelationship {
    pub course: CourseCode,
    pub prereq: CourseCode,
    pub group_index: u32,
    #[serde(default)]
    pub min_grade: GradeConstraint,
}

impl StoredRelationship {
    pub fn key(&self) -> RowKey {
        RowKey {
            course: self.course.clone(),
            prereq: self.prereq.clone(),
            group_index: self.group_index,
        }
    }
}

/// Rebuild the stored expression for one course: rows grouped by clause
/// index, each clause ordered by prereq code.
pub fn expression_from_rows(rows: &[StoredRelationship]) -> PrereqExpression {
    let mut by_group: BTreeMap<u32, Vec<&StoredRelationship>> = BTreeMap::new();
    for row in rows {
        by_group.entry(row.group_index).or_default().push(row);
    }

    by_group
        .into_values()
        .map(|mut group| {
            group.sort_by(|a, b| a.prereq.cmp(&b.prereq));
            group
                .into_iter()
                .map(|row| PrereqItem {
                    code: row.prereq.clone(),
                    min_grade: row.min_grade,
                })
                .collect::<PrereqClause>()
        })
        .collect()
}

/// Last prose seen for a course and what it parsed to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrereqSnapshot {
    pub raw_text: String,
    pub result: ParseResult,
    pub parsed_at: DateTime<Utc>,
}

impl PrereqSnapshot {
    pub fn new(raw_text: impl Into<String>, result: ParseResult) -> Self {
        Self {
            raw_text: raw_text.into(),
            result,
            parsed_at: Utc::now(),
        }
    }
}

// ============================================================================
// Store contract
// ============================================================================

/// Everything reconciliation and the graph builders need from a backend.
///
/// Each write is its own unit: a failed delete or upsert leaves every other
/// row untouched. Implementations report retryable lock conflicts as
/// [`StoreError::Conflict`].
pub trait RelationshipStore: Send + Sync {
    /// All rows whose `course` is `course`.
    fn rows_for(&self, course: &CourseCode) -> StoreResult<Vec<StoredRelationship>>;

    /// Rows for several courses at once. Courses with no rows map to an
    /// empty list.
    fn rows_for_many(
        &self,
        courses: &[CourseCode],
    ) -> StoreResult<BTreeMap<CourseCode, Vec<StoredRelationship>>> {
        courses
            .iter()
            .map(|course| Ok((course.clone(), self.rows_for(course)?)))
            .collect()
    }

    /// Every registered course, sorted. Used as the structuring whitelist.
    fn known_courses(&self) -> StoreResult<Vec<CourseCode>>;

    /// Distinct courses that list `code` as a prerequisite, sorted.
    fn dependents_of(&self, code: &CourseCode) -> StoreResult<Vec<CourseCode>>;

    /// True if `code` is a known course or appears on either side of a row.
    fn course_exists(&self, code: &CourseCode) -> StoreResult<bool>;

    /// Create bare placeholder courses for unknown codes. Returns how many
    /// were created.
    fn ensure_courses(&self, codes: &[CourseCode]) -> StoreResult<usize>;

    /// Delete one row. Deleting an absent row is not an error.
    fn delete_row(&self, key: &RowKey) -> StoreResult<()>;

    /// Insert or update one row. Both courses must already exist.
    fn upsert_row(&self, row: &StoredRelationship) -> StoreResult<()>;

    fn snapshot(&self, course: &CourseCode) -> StoreResult<Option<PrereqSnapshot>>;

    fn put_snapshot(&self, course: &CourseCode, snapshot: PrereqSnapshot) -> StoreResult<()>;
}

impl<S: RelationshipStore + ?Sized> RelationshipStore for std::sync::Arc<S> {
    fn rows_for(&self, course: &CourseCode) -> StoreResult<Vec<StoredRelationship>> {
        (**self).rows_for(course)
    }

    fn rows_for_many(
        &self,
        courses: &[CourseCode],
    ) -> StoreResult<BTreeMap<CourseCode, Vec<StoredRelationship>>> {
        (**self).rows_for_many(courses)
    }

    fn known_courses(&self) -> StoreResult<Vec<CourseCode>> {
        (**self).known_courses()
    }

    fn dependents_of(&self, code: &CourseCode) -> StoreResult<Vec<CourseCode>> {
        (**self).dependents_of(code)
    }

    fn course_exists(&self, code: &CourseCode) -> StoreResult<bool> {
        (**self).course_exists(code)
    }

    fn ensure_courses(&self, codes: &[CourseCode]) -> StoreResult<usize> {
        (**self).ensure_courses(codes)
    }

    fn delete_row(&self, key: &RowKey) -> StoreResult<()> {
        (**self).delete_row(key)
    }

    fn upsert_row(&self, row: &StoredRelationship) -> StoreResult<()> {
        (**self).upsert_row(row)
    }

    fn snapshot(&self, course: &CourseCode) -> StoreResult<Option<PrereqSnapshot>> {
        (**self).snapshot(course)
    }

    fn put_snapshot(&self, course: &CourseCode, snapshot: PrereqSnapshot) -> StoreResult<()> {
        (**self).put_snapshot(course, snapshot)
    }
}
