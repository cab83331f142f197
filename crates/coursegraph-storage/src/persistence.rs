//! JSON-file persistence
//!
//! A [`MemoryStore`] working set mirrored to a single JSON document. Every
//! successful mutation rewrites the document atomically:
//!
//! 1. serialize the full [`StoreDocument`];
//! 2. write it to a temp file in the same directory;
//! 3. rename the temp file over the target.
//!
//! Readers of the file therefore see either the old or the new document,
//! never a torn write. A mutation is staged on a copy of the working set and
//! only becomes visible in memory once its document is on disk, so a failed
//! write leaves both unchanged.

use crate::memory::{MemoryStore, StoreDocument};
use crate::{PrereqSnapshot, RelationshipStore, RowKey, StoreResult, StoredRelationship};
use coursegraph_dsl::CourseCode;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct FileStore {
    path: PathBuf,
    inner: MemoryStore,
    /// Serializes stage/write/commit so concurrent writers never interleave.
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open `path`, creating an empty store file when it does not exist.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();

        let inner = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            let doc: StoreDocument = if contents.trim().is_empty() {
                StoreDocument::default()
            } else {
                serde_json::from_str(&contents)?
            };
            MemoryStore::from_document(doc)
        } else {
            MemoryStore::new()
        };

        let store = Self {
            path,
            inner,
            write_lock: Mutex::new(()),
        };
        if !store.path.exists() {
            store.flush()?;
        }

        tracing::debug!(
            path = %store.path.display(),
            courses = store.inner.course_count(),
            "opened file store"
        );
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The in-memory working set.
    pub fn memory(&self) -> &MemoryStore {
        &self.inner
    }

    /// Write the current state to disk.
    pub fn flush(&self) -> StoreResult<()> {
        let _guard = self.write_lock.lock();
        self.write_document(&self.inner.to_document())
    }

    fn write_document(&self, doc: &StoreDocument) -> StoreResult<()> {
        let json = serde_json::to_vec_pretty(doc)?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|err| err.error)?;
        Ok(())
    }

    /// Apply `mutate` to a staged copy, persist it, then swap it in.
    /// Unchanged documents are not rewritten.
    fn commit<T>(&self, mutate: impl FnOnce(&MemoryStore) -> StoreResult<T>) -> StoreResult<T> {
        let _guard = self.write_lock.lock();
        let before = self.inner.to_document();
        let staged = MemoryStore::from_document(before.clone());
        let out = mutate(&staged)?;

        let after = staged.to_document();
        if after != before {
            self.write_document(&after)?;
            self.inner.replace(after);
        }
        Ok(out)
    }
}

impl RelationshipStore for FileStore {
    fn rows_for(&self, course: &CourseCode) -> StoreResult<Vec<StoredRelationship>> {
        self.inner.rows_for(course)
    }

    fn rows_for_many(
        &self,
        courses: &[CourseCode],
    ) -> StoreResult<BTreeMap<CourseCode, Vec<StoredRelationship>>> {
        self.inner.rows_for_many(courses)
    }

    fn known_courses(&self) -> StoreResult<Vec<CourseCode>> {
        self.inner.known_courses()
    }

    fn dependents_of(&self, code: &CourseCode) -> StoreResult<Vec<CourseCode>> {
        self.inner.dependents_of(code)
    }

    fn course_exists(&self, code: &CourseCode) -> StoreResult<bool> {
        self.inner.course_exists(code)
    }

    fn ensure_courses(&self, codes: &[CourseCode]) -> StoreResult<usize> {
        self.commit(|staged| staged.ensure_courses(codes))
    }

    fn delete_row(&self, key: &RowKey) -> StoreResult<()> {
        self.commit(|staged| staged.delete_row(key))
    }

    fn upsert_row(&self, row: &StoredRelationship) -> StoreResult<()> {
        self.commit(|staged| staged.upsert_row(row))
    }

    fn snapshot(&self, course: &CourseCode) -> StoreResult<Option<PrereqSnapshot>> {
        self.inner.snapshot(course)
    }

    fn put_snapshot(&self, course: &CourseCode, snapshot: PrereqSnapshot) -> StoreResult<()> {
        self.commit(|staged| staged.put_snapshot(course, snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coursegraph_dsl::canonicalize;

    fn code(s: &str) -> CourseCode {
        canonicalize(s).unwrap()
    }

    #[test]
    fn open_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");

        let store = FileStore::open(&path).unwrap();
        assert!(path.exists());
        assert!(store.memory().all_rows().is_empty());
    }

    #[test]
    fn mutations_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        {
            let store = FileStore::open(&path).unwrap();
            store.ensure_courses(&[code("CS240"), code("CS136")]).unwrap();
            store
                .upsert_row(&StoredRelationship {
                    course: code("CS240"),
                    prereq: code("CS136"),
                    group_index: 1,
                    min_grade: Some(60),
                })
                .unwrap();
        }

        let reopened = FileStore::open(&path).unwrap();
        let rows = reopened.rows_for(&code("CS240")).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].min_grade, Some(60));
        assert!(reopened.course_exists(&code("CS136")).unwrap());
    }

    fn row(course: &str, prereq: &str, group_index: u32) -> StoredRelationship {
        StoredRelationship {
            course: code(course),
            prereq: code(prereq),
            group_index,
            min_grade: None,
        }
    }

    /// Puts a non-empty directory where the store file goes, so every
    /// rename onto the path fails.
    fn block_path(path: &Path) {
        std::fs::remove_file(path).unwrap();
        std::fs::create_dir(path).unwrap();
        std::fs::write(path.join("occupied"), "x").unwrap();
    }

    fn unblock_path(path: &Path) {
        std::fs::remove_dir_all(path).unwrap();
    }

    #[test]
    fn failed_write_leaves_memory_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = FileStore::open(&path).unwrap();
        store.ensure_courses(&[code("CS240"), code("CS136"), code("CS135")]).unwrap();

        block_path(&path);
        assert!(store.upsert_row(&row("CS240", "CS136", 1)).is_err());
        assert!(store.rows_for(&code("CS240")).unwrap().is_empty());
        assert!(store.ensure_courses(&[code("MATH135")]).is_err());
        assert!(!store.course_exists(&code("MATH135")).unwrap());

        // the next successful write does not carry the failed one along
        unblock_path(&path);
        store.upsert_row(&row("CS240", "CS135", 2)).unwrap();
        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.rows_for(&code("CS240")).unwrap(), vec![row("CS240", "CS135", 2)]);
        assert!(!reopened.course_exists(&code("MATH135")).unwrap());
    }

    #[test]
    fn rows_skipped_by_reconcile_stay_pending() {
        use crate::{reconcile, RetryPolicy};
        use coursegraph_dsl::parse_heuristic;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = FileStore::open(&path).unwrap();
        store.ensure_courses(&[code("CS240"), code("CS136")]).unwrap();

        block_path(&path);
        let expr = parse_heuristic("CS 136");
        let report = reconcile(&store, &code("CS240"), &expr, &RetryPolicy::immediate(2)).unwrap();
        assert!(report.upserted.is_empty());
        assert_eq!(report.skipped.len(), 1);
        assert!(store.rows_for(&code("CS240")).unwrap().is_empty());

        unblock_path(&path);
        let report = reconcile(&store, &code("CS240"), &expr, &RetryPolicy::immediate(2)).unwrap();
        assert_eq!(report.upserted.len(), 1);
        assert!(report.is_complete());
    }

    #[test]
    fn unchanged_mutation_skips_the_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = FileStore::open(&path).unwrap();
        store.ensure_courses(&[code("CS240")]).unwrap();

        block_path(&path);
        assert_eq!(store.ensure_courses(&[code("CS240")]).unwrap(), 0);
    }

    #[test]
    fn empty_file_opens_as_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "").unwrap();

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.memory().course_count(), 0);
    }

    #[test]
    fn corrupt_file_is_a_serde_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            FileStore::open(&path),
            Err(crate::StoreError::Serde(_))
        ));
    }
}
