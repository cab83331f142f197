//! Reconciliation engine
//!
//! Turns a desired [`PrereqExpression`] for one course into the minimal set of
//! row mutations against what is stored:
//!
//! ```text
//! desired  (course, prereq, clause) -> strictest grade
//! stored   (course, prereq, clause) -> grade
//!
//! deletes = stored keys  - desired keys
//! upserts = desired keys - stored keys, plus keys whose grade changed
//! ```
//!
//! Applying a plan and planning again against the result yields an empty plan.
//! Each row is written independently: a row that keeps hitting lock conflicts
//! is skipped and reported, and the remaining rows still go through.

use crate::{RelationshipStore, RowKey, StoreError, StoreResult, StoredRelationship};
use coursegraph_dsl::{stricter, CourseCode, GradeConstraint, PrereqExpression};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

// ============================================================================
// Equality
// ============================================================================

/// Order-insensitive comparison: membership and grades matter, clause order
/// and within-clause order do not.
pub fn groups_equal(a: &PrereqExpression, b: &PrereqExpression) -> bool {
    a.normalized() == b.normalized()
}

// ============================================================================
// Planning
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilePlan {
    pub course: Option<CourseCode>,
    pub deletes: Vec<RowKey>,
    pub upserts: Vec<StoredRelationship>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty() && self.upserts.is_empty()
    }

    /// Every code an upsert references, the course itself included.
    pub fn referenced_codes(&self) -> Vec<CourseCode> {
        let mut codes: Vec<CourseCode> = self.course.iter().cloned().collect();
        for row in &self.upserts {
            for code in [&row.course, &row.prereq] {
                if !codes.contains(code) {
                    codes.push(code.clone());
                }
            }
        }
        codes
    }
}

/// Diff `expr` against `stored` for `course`.
///
/// Clause indices are 1-based positions in `expr`. A course never lists
/// itself as a prerequisite; such items are ignored. Rows in `stored` that
/// belong to other courses are ignored.
pub fn plan(
    course: &CourseCode,
    expr: &PrereqExpression,
    stored: &[StoredRelationship],
) -> ReconcilePlan {
    let mut desired: BTreeMap<(CourseCode, u32), GradeConstraint> = BTreeMap::new();
    for (idx, clause) in expr.iter().enumerate() {
        let group_index = idx as u32 + 1;
        for item in clause {
            if &item.code == course {
                continue;
            }
            desired
                .entry((item.code.clone(), group_index))
                .and_modify(|grade| *grade = stricter(*grade, item.min_grade))
                .or_insert(item.min_grade);
        }
    }

    let current: BTreeMap<(CourseCode, u32), GradeConstraint> = stored
        .iter()
        .filter(|row| &row.course == course)
        .map(|row| ((row.prereq.clone(), row.group_index), row.min_grade))
        .collect();

    let deletes = current
        .keys()
        .filter(|key| !desired.contains_key(*key))
        .map(|(prereq, group_index)| RowKey {
            course: course.clone(),
            prereq: prereq.clone(),
            group_index: *group_index,
        })
        .collect();

    let upserts = desired
        .iter()
        .filter(|(key, grade)| current.get(*key) != Some(*grade))
        .map(|((prereq, group_index), grade)| StoredRelationship {
            course: course.clone(),
            prereq: prereq.clone(),
            group_index: *group_index,
            min_grade: *grade,
        })
        .collect();

    ReconcilePlan {
        course: Some(course.clone()),
        deletes,
        upserts,
    }
}

// ============================================================================
// Applying
// ============================================================================

/// Per-row retry schedule for transient conflicts. Backoff is linear:
/// `base_delay * attempt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(with = "millis")]
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Retries without sleeping.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
        }
    }

    /// Sleep after the `attempt`-th failure (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }

    fn run<T>(&self, what: &str, mut op: impl FnMut() -> StoreResult<T>) -> Result<T, (u32, StoreError)> {
        let max = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < max => {
                    let delay = self.delay_after(attempt);
                    tracing::warn!(
                        operation = what,
                        attempt,
                        max_attempts = max,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient store conflict, retrying"
                    );
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                }
                Err(err) => return Err((attempt, err)),
            }
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowOperation {
    Delete,
    Upsert,
}

/// A row that could not be written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRow {
    pub operation: RowOperation,
    pub key: RowKey,
    pub attempts: u32,
    /// True when the last failure was a lock conflict.
    pub transient: bool,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub course: Option<CourseCode>,
    pub deleted: Vec<RowKey>,
    pub upserted: Vec<StoredRelationship>,
    pub skipped: Vec<SkippedRow>,
    pub courses_created: usize,
}

impl ReconcileReport {
    /// Every planned mutation was written.
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }

    pub fn changed(&self) -> bool {
        !self.deleted.is_empty() || !self.upserted.is_empty()
    }
}

/// Execute `plan` row by row.
///
/// Placeholder courses for every referenced code are created first; if that
/// fails the error is returned and no row is touched.
pub fn apply<S: RelationshipStore + ?Sized>(
    store: &S,
    plan: &ReconcilePlan,
    policy: &RetryPolicy,
) -> StoreResult<ReconcileReport> {
    let mut report = ReconcileReport {
        course: plan.course.clone(),
        ..ReconcileReport::default()
    };
    if plan.is_empty() {
        return Ok(report);
    }

    if !plan.upserts.is_empty() {
        let codes = plan.referenced_codes();
        report.courses_created = policy
            .run("ensure_courses", || store.ensure_courses(&codes))
            .map_err(|(_, err)| err)?;
    }

    for key in &plan.deletes {
        match policy.run("delete", || store.delete_row(key)) {
            Ok(()) => report.deleted.push(key.clone()),
            Err((attempts, err)) => {
                report.skipped.push(skip(RowOperation::Delete, key.clone(), attempts, &err));
            }
        }
    }

    for row in &plan.upserts {
        match policy.run("upsert", || store.upsert_row(row)) {
            Ok(()) => report.upserted.push(row.clone()),
            Err((attempts, err)) => {
                report.skipped.push(skip(RowOperation::Upsert, row.key(), attempts, &err));
            }
        }
    }

    tracing::debug!(
        course = ?plan.course.as_ref().map(CourseCode::as_str),
        deleted = report.deleted.len(),
        upserted = report.upserted.len(),
        skipped = report.skipped.len(),
        "applied reconcile plan"
    );
    Ok(report)
}

fn skip(operation: RowOperation, key: RowKey, attempts: u32, err: &StoreError) -> SkippedRow {
    tracing::warn!(
        course = %key.course,
        prereq = %key.prereq,
        group = key.group_index,
        ?operation,
        attempts,
        error = %err,
        "skipping row after failed write"
    );
    SkippedRow {
        operation,
        key,
        attempts,
        transient: err.is_transient(),
        error: err.to_string(),
    }
}

/// Read the stored rows for `course`, plan against `expr`, and apply.
pub fn reconcile<S: RelationshipStore + ?Sized>(
    store: &S,
    course: &CourseCode,
    expr: &PrereqExpression,
    policy: &RetryPolicy,
) -> StoreResult<ReconcileReport> {
    let stored = store.rows_for(course)?;
    let plan = plan(course, expr, &stored);
    apply(store, &plan, policy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use coursegraph_dsl::{canonicalize, parse_heuristic, PrereqClause, PrereqItem};

    fn code(s: &str) -> CourseCode {
        canonicalize(s).unwrap()
    }

    fn row(course: &str, prereq: &str, group: u32, grade: Option<u8>) -> StoredRelationship {
        StoredRelationship {
            course: code(course),
            prereq: code(prereq),
            group_index: group,
            min_grade: grade,
        }
    }

    #[test]
    fn groups_equal_ignores_order_but_not_grades() {
        let a = parse_heuristic("CS 245 or CS 240; MATH 239 or MATH 249");
        let b = parse_heuristic("MATH 249 or MATH 239; CS 240 or CS 245");
        assert!(groups_equal(&a, &b));
        assert!(groups_equal(&b, &a));
        assert!(groups_equal(&a, &a));

        let plain: PrereqExpression = vec![PrereqClause::from(vec![PrereqItem::new(code("CS135"))])].into();
        let graded: PrereqExpression =
            vec![PrereqClause::from(vec![PrereqItem::with_grade(code("CS135"), 70)])].into();
        assert!(!groups_equal(&plain, &graded));
    }

    #[test]
    fn plan_against_empty_store_upserts_everything() {
        let expr = parse_heuristic("CS 245 or CS 240; MATH 239 with at least 60%");
        let plan = plan(&code("CS341"), &expr, &[]);

        assert!(plan.deletes.is_empty());
        assert_eq!(
            plan.upserts,
            vec![
                row("CS341", "CS240", 1, None),
                row("CS341", "CS245", 1, None),
                row("CS341", "MATH239", 2, Some(60)),
            ]
        );
    }

    #[test]
    fn plan_deletes_stale_and_updates_changed_grades() {
        let stored = vec![
            row("CS341", "CS240", 1, None),
            row("CS341", "CS245", 1, None),
            row("CS341", "MATH239", 2, None),
            row("CS341", "STAT230", 3, None),
            row("CS350", "CS241", 1, None),
        ];
        let expr = parse_heuristic("CS 245 or CS 240; MATH 239 with at least 60%");
        let plan = plan(&code("CS341"), &expr, &stored);

        assert_eq!(
            plan.deletes,
            vec![RowKey {
                course: code("CS341"),
                prereq: code("STAT230"),
                group_index: 3
            }]
        );
        assert_eq!(plan.upserts, vec![row("CS341", "MATH239", 2, Some(60))]);
    }

    #[test]
    fn plan_skips_self_reference() {
        let expr = parse_heuristic("CS 135 or CS 145");
        let plan = plan(&code("CS145"), &expr, &[]);
        assert_eq!(plan.upserts, vec![row("CS145", "CS135", 1, None)]);
    }

    #[test]
    fn clause_moving_position_is_delete_plus_upsert() {
        let stored = vec![row("CS350", "CS241", 1, None), row("CS350", "CS251", 2, None)];
        let expr = parse_heuristic("CS 251; CS 241");
        let plan = plan(&code("CS350"), &expr, &stored);
        assert_eq!(plan.deletes.len(), 2);
        assert_eq!(plan.upserts.len(), 2);
    }

    #[test]
    fn apply_creates_placeholders_then_plan_is_idempotent() {
        let store = MemoryStore::new();
        let course = code("CS341");
        let expr = parse_heuristic("CS 245 or CS 240; MATH 239");

        let report = reconcile(&store, &course, &expr, &RetryPolicy::immediate(1)).unwrap();
        assert!(report.is_complete());
        assert_eq!(report.upserted.len(), 3);
        assert_eq!(report.courses_created, 4);

        let again = reconcile(&store, &course, &expr, &RetryPolicy::immediate(1)).unwrap();
        assert!(!again.changed());
        assert_eq!(again.courses_created, 0);
    }

    #[test]
    fn retry_delay_is_linear() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_millis(250));
        assert_eq!(policy.delay_after(3), Duration::from_millis(750));
    }

    #[test]
    fn retry_policy_serializes_millis() {
        let json = serde_json::to_value(RetryPolicy::default()).unwrap();
        assert_eq!(json["base_delay"], 250);
        assert_eq!(json["max_attempts"], 5);
    }
}
