//! Dependency trees over stored relationships.
//!
//! Both walks share one visited set for the whole traversal, so a course
//! reachable along several paths (or through a cycle) is expanded once and
//! re-emitted as a leaf everywhere else.
//!
//! Children come out in stored order: clause index, then prereq code for the
//! backward tree; dependent code for the forward tree. Identical stores give
//! identical trees.

use crate::{RelationshipStore, StoreError, StoreResult};
use coursegraph_dsl::{ClauseKind, CourseCode, GradeConstraint};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::ops::RangeInclusive;

/// Accepted `max_depth` for [`backward_tree`].
pub const PREREQ_DEPTH_RANGE: RangeInclusive<u32> = 1..=100;
/// Accepted `max_depth` for [`forward_tree`].
pub const FUTURE_DEPTH_RANGE: RangeInclusive<u32> = 0..=6;

pub const DEFAULT_PREREQ_DEPTH: u32 = 99;
pub const DEFAULT_FUTURE_DEPTH: u32 = 2;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DepthError {
    #[error("prereq_depth must be between 1 and 100 (got {0})")]
    Prereq(u32),

    #[error("future_depth must be between 0 and 6 (got {0})")]
    Future(u32),
}

impl DepthError {
    pub fn check_prereq(depth: u32) -> Result<u32, Self> {
        if PREREQ_DEPTH_RANGE.contains(&depth) {
            Ok(depth)
        } else {
            Err(DepthError::Prereq(depth))
        }
    }

    pub fn check_future(depth: u32) -> Result<u32, Self> {
        if FUTURE_DEPTH_RANGE.contains(&depth) {
            Ok(depth)
        } else {
            Err(DepthError::Future(depth))
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error(transparent)]
    Depth(#[from] DepthError),

    #[error("course '{0}' not found")]
    NotFound(CourseCode),

    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// Grouped view
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCourse {
    pub course_id: CourseCode,
    pub min_grade: GradeConstraint,
}

/// One stored clause with its derived label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrereqGroup {
    pub group: u32,
    #[serde(rename = "type")]
    pub kind: ClauseKind,
    pub courses: Vec<GroupCourse>,
}

/// Rows for `course` grouped by clause index, ordered by group then code.
pub fn prereq_groups<S: RelationshipStore + ?Sized>(
    store: &S,
    course: &CourseCode,
) -> StoreResult<Vec<PrereqGroup>> {
    let mut by_group: BTreeMap<u32, Vec<GroupCourse>> = BTreeMap::new();
    for row in store.rows_for(course)? {
        by_group.entry(row.group_index).or_default().push(GroupCourse {
            course_id: row.prereq,
            min_grade: row.min_grade,
        });
    }

    Ok(by_group
        .into_iter()
        .map(|(group, mut courses)| {
            courses.sort_by(|a, b| a.course_id.cmp(&b.course_id));
            let kind = if courses.len() > 1 {
                ClauseKind::Or
            } else {
                ClauseKind::And
            };
            PrereqGroup {
                group,
                kind,
                courses,
            }
        })
        .collect())
}

// ============================================================================
// Backward (prerequisite) tree
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrereqNode {
    pub id: CourseCode,
    /// Grade on the edge that reached this node; `None` at the root.
    pub min_grade: GradeConstraint,
    /// Empty on leaves.
    pub groups: Vec<PrereqGroup>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<PrereqNode>,
}

impl PrereqNode {
    fn leaf(id: CourseCode, min_grade: GradeConstraint) -> Self {
        Self {
            id,
            min_grade,
            groups: Vec::new(),
            children: Vec::new(),
        }
    }
}

/// Expand prerequisites of `root` depth-first. Nodes at `max_depth`, and
/// courses already expanded elsewhere in the tree, are leaves.
pub fn backward_tree<S: RelationshipStore + ?Sized>(
    store: &S,
    root: &CourseCode,
    max_depth: u32,
) -> StoreResult<PrereqNode> {
    let mut visited = HashSet::new();
    expand_backward(store, root.clone(), 0, None, max_depth, &mut visited)
}

fn expand_backward<S: RelationshipStore + ?Sized>(
    store: &S,
    id: CourseCode,
    depth: u32,
    min_grade: GradeConstraint,
    max_depth: u32,
    visited: &mut HashSet<CourseCode>,
) -> StoreResult<PrereqNode> {
    if depth >= max_depth || !visited.insert(id.clone()) {
        return Ok(PrereqNode::leaf(id, min_grade));
    }

    let groups = prereq_groups(store, &id)?;
    let mut children = Vec::new();
    for group in &groups {
        for item in &group.courses {
            children.push(expand_backward(
                store,
                item.course_id.clone(),
                depth + 1,
                item.min_grade,
                max_depth,
                visited,
            )?);
        }
    }

    Ok(PrereqNode {
        id,
        min_grade,
        groups,
        children,
    })
}

// ============================================================================
// Forward (dependents) tree
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FutureNode {
    pub id: CourseCode,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FutureNode>,
}

/// Expand courses that depend on `root`. The root sits at depth 1; nodes
/// deeper than `max_depth` are leaves. The root is never its own child.
pub fn forward_tree<S: RelationshipStore + ?Sized>(
    store: &S,
    root: &CourseCode,
    max_depth: u32,
) -> StoreResult<FutureNode> {
    let mut visited = HashSet::from([root.clone()]);
    expand_forward(store, root.clone(), 1, max_depth, &mut visited)
}

fn expand_forward<S: RelationshipStore + ?Sized>(
    store: &S,
    id: CourseCode,
    depth: u32,
    max_depth: u32,
    visited: &mut HashSet<CourseCode>,
) -> StoreResult<FutureNode> {
    if depth > max_depth {
        return Ok(FutureNode {
            id,
            children: Vec::new(),
        });
    }

    let mut dependents = store.dependents_of(&id)?;
    dependents.sort();
    dependents.dedup();

    let mut children = Vec::new();
    for next in dependents {
        if !visited.insert(next.clone()) {
            continue;
        }
        children.push(expand_forward(store, next, depth + 1, max_depth, visited)?);
    }

    Ok(FutureNode { id, children })
}

// ============================================================================
// Combined view
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseTree {
    pub course: CourseCode,
    pub prereq_tree: PrereqNode,
    pub future_tree: FutureNode,
}

/// Both trees for a known course, with depth bounds checked first.
pub fn course_tree<S: RelationshipStore + ?Sized>(
    store: &S,
    course: &CourseCode,
    prereq_depth: u32,
    future_depth: u32,
) -> Result<CourseTree, GraphError> {
    let prereq_depth = DepthError::check_prereq(prereq_depth)?;
    let future_depth = DepthError::check_future(future_depth)?;

    if !store.course_exists(course)? {
        return Err(GraphError::NotFound(course.clone()));
    }

    Ok(CourseTree {
        course: course.clone(),
        prereq_tree: backward_tree(store, course, prereq_depth)?,
        future_tree: forward_tree(store, course, future_depth)?,
    })
}

/// Every course id that appears anywhere in either tree.
pub fn collect_codes(tree: &CourseTree) -> BTreeSet<CourseCode> {
    fn walk_prereq(node: &PrereqNode, acc: &mut BTreeSet<CourseCode>) {
        acc.insert(node.id.clone());
        for child in &node.children {
            walk_prereq(child, acc);
        }
    }

    fn walk_future(node: &FutureNode, acc: &mut BTreeSet<CourseCode>) {
        acc.insert(node.id.clone());
        for child in &node.children {
            walk_future(child, acc);
        }
    }

    let mut acc = BTreeSet::new();
    walk_prereq(&tree.prereq_tree, &mut acc);
    walk_future(&tree.future_tree, &mut acc);
    acc
}
