//! Store error taxonomy.

use coursegraph_dsl::CourseCode;
use std::fmt;

/// Transient write conflicts a backend may report. Both are worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    Deadlock,
    LockWait,
}

impl ConflictKind {
    /// Map a MySQL-compatible server error number (1213, 1205).
    pub fn from_error_code(code: u16) -> Option<Self> {
        match code {
            1213 => Some(ConflictKind::Deadlock),
            1205 => Some(ConflictKind::LockWait),
            _ => None,
        }
    }
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictKind::Deadlock => f.write_str("deadlock"),
            ConflictKind::LockWait => f.write_str("lock wait timeout"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} during {operation}")]
    Conflict {
        kind: ConflictKind,
        operation: String,
    },

    #[error("unknown course: {0}")]
    UnknownCourse(CourseCode),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn conflict(kind: ConflictKind, operation: impl Into<String>) -> Self {
        StoreError::Conflict {
            kind,
            operation: operation.into(),
        }
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_conflicts_are_transient() {
        assert!(StoreError::conflict(ConflictKind::Deadlock, "upsert").is_transient());
        assert!(!StoreError::Backend("disk full".into()).is_transient());
        assert!(!StoreError::UnknownCourse("CS135".parse().unwrap()).is_transient());
    }

    #[test]
    fn server_error_codes() {
        assert_eq!(ConflictKind::from_error_code(1213), Some(ConflictKind::Deadlock));
        assert_eq!(ConflictKind::from_error_code(1205), Some(ConflictKind::LockWait));
        assert_eq!(ConflictKind::from_error_code(1062), None);
    }
}
