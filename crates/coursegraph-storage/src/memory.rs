//! In-memory relationship store.

use crate::{PrereqSnapshot, RelationshipStore, RowKey, StoreError, StoreResult, StoredRelationship};
use coursegraph_dsl::{CourseCode, GradeConstraint};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Serializable image of a store, also the on-disk format of
/// [`crate::FileStore`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreDocument {
    #[serde(default)]
    pub courses: BTreeSet<CourseCode>,
    #[serde(default)]
    pub relationships: Vec<StoredRelationship>,
    #[serde(default)]
    pub snapshots: BTreeMap<CourseCode, PrereqSnapshot>,
}

type GroupedRows = BTreeMap<(u32, CourseCode), GradeConstraint>;

#[derive(Debug, Default)]
struct StoreState {
    courses: BTreeSet<CourseCode>,
    /// course -> (group_index, prereq) -> min_grade
    rows: BTreeMap<CourseCode, GroupedRows>,
    snapshots: BTreeMap<CourseCode, PrereqSnapshot>,
}

/// `RwLock`-guarded maps. Cheap to construct; used directly in tests and as
/// the working set behind the file store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store holding `rows`; every course they mention is registered.
    pub fn with_rows(rows: impl IntoIterator<Item = StoredRelationship>) -> Self {
        let store = Self::new();
        {
            let mut state = store.state.write();
            for row in rows {
                state.courses.insert(row.course.clone());
                state.courses.insert(row.prereq.clone());
                state
                    .rows
                    .entry(row.course)
                    .or_default()
                    .insert((row.group_index, row.prereq), row.min_grade);
            }
        }
        store
    }

    pub fn from_document(doc: StoreDocument) -> Self {
        let store = Self::with_rows(doc.relationships);
        {
            let mut state = store.state.write();
            state.courses.extend(doc.courses);
            state.snapshots = doc.snapshots;
        }
        store
    }

    pub fn to_document(&self) -> StoreDocument {
        let state = self.state.read();
        StoreDocument {
            courses: state.courses.clone(),
            relationships: all_rows(&state),
            snapshots: state.snapshots.clone(),
        }
    }

    /// Replace the whole state with `doc`.
    pub fn replace(&self, doc: StoreDocument) {
        let fresh = Self::from_document(doc).state.into_inner();
        *self.state.write() = fresh;
    }

    /// Every row, ordered by (course, group, prereq).
    pub fn all_rows(&self) -> Vec<StoredRelationship> {
        all_rows(&self.state.read())
    }

    pub fn course_count(&self) -> usize {
        self.state.read().courses.len()
    }
}

fn all_rows(state: &StoreState) -> Vec<StoredRelationship> {
    state
        .rows
        .iter()
        .flat_map(|(course, groups)| {
            groups
                .iter()
                .map(move |((group_index, prereq), min_grade)| StoredRelationship {
                    course: course.clone(),
                    prereq: prereq.clone(),
                    group_index: *group_index,
                    min_grade: *min_grade,
                })
        })
        .collect()
}

impl RelationshipStore for MemoryStore {
    fn rows_for(&self, course: &CourseCode) -> StoreResult<Vec<StoredRelationship>> {
        let state = self.state.read();
        let rows = state
            .rows
            .get(course)
            .map(|groups| {
                groups
                    .iter()
                    .map(|((group_index, prereq), min_grade)| StoredRelationship {
                        course: course.clone(),
                        prereq: prereq.clone(),
                        group_index: *group_index,
                        min_grade: *min_grade,
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(rows)
    }

    fn known_courses(&self) -> StoreResult<Vec<CourseCode>> {
        Ok(self.state.read().courses.iter().cloned().collect())
    }

    fn dependents_of(&self, code: &CourseCode) -> StoreResult<Vec<CourseCode>> {
        let state = self.state.read();
        Ok(state
            .rows
            .iter()
            .filter(|(_, groups)| groups.keys().any(|(_, prereq)| prereq == code))
            .map(|(course, _)| course.clone())
            .collect())
    }

    fn course_exists(&self, code: &CourseCode) -> StoreResult<bool> {
        let state = self.state.read();
        let known = state.courses.contains(code)
            || state.rows.get(code).is_some_and(|groups| !groups.is_empty())
            || state
                .rows
                .values()
                .any(|groups| groups.keys().any(|(_, prereq)| prereq == code));
        Ok(known)
    }

    fn ensure_courses(&self, codes: &[CourseCode]) -> StoreResult<usize> {
        let mut state = self.state.write();
        Ok(codes
            .iter()
            .filter(|code| state.courses.insert((*code).clone()))
            .count())
    }

    fn delete_row(&self, key: &RowKey) -> StoreResult<()> {
        let mut state = self.state.write();
        if let Some(groups) = state.rows.get_mut(&key.course) {
            groups.remove(&(key.group_index, key.prereq.clone()));
            if groups.is_empty() {
                state.rows.remove(&key.course);
            }
        }
        Ok(())
    }

    fn upsert_row(&self, row: &StoredRelationship) -> StoreResult<()> {
        let mut state = self.state.write();
        for code in [&row.course, &row.prereq] {
            if !state.courses.contains(code) {
                return Err(StoreError::UnknownCourse(code.clone()));
            }
        }
        state
            .rows
            .entry(row.course.clone())
            .or_default()
            .insert((row.group_index, row.prereq.clone()), row.min_grade);
        Ok(())
    }

    fn snapshot(&self, course: &CourseCode) -> StoreResult<Option<PrereqSnapshot>> {
        Ok(self.state.read().snapshots.get(course).cloned())
    }

    fn put_snapshot(&self, course: &CourseCode, snapshot: PrereqSnapshot) -> StoreResult<()> {
        self.state.write().snapshots.insert(course.clone(), snapshot);
        Ok(())
    }
}
