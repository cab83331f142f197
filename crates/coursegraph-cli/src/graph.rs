//! `coursegraph prereqs` and `coursegraph tree`

use anyhow::{anyhow, bail, Context, Result};
use coursegraph_dsl::{canonicalize, CourseCode};
use coursegraph_storage::{course_tree, prereq_groups, FileStore, RelationshipStore};
use std::path::Path;

fn open_store(path: &Path) -> Result<FileStore> {
    if !path.exists() {
        bail!("store file {} does not exist", path.display());
    }
    FileStore::open(path).with_context(|| format!("failed to open store {}", path.display()))
}

fn course_code(raw: &str) -> Result<CourseCode> {
    canonicalize(raw).ok_or_else(|| anyhow!("not a course code: {raw}"))
}

pub fn prereqs_json(store: &dyn RelationshipStore, course: &CourseCode) -> Result<serde_json::Value> {
    if !store.course_exists(course)? {
        bail!("course '{course}' not found");
    }
    let groups = prereq_groups(store, course)?;
    Ok(serde_json::json!({
        "course": course,
        "groups": groups,
    }))
}

pub fn cmd_prereqs(store_path: &Path, course: &str) -> Result<()> {
    let store = open_store(store_path)?;
    let course = course_code(course)?;
    let json = prereqs_json(&store, &course)?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

pub fn cmd_tree(store_path: &Path, course: &str, prereq_depth: u32, future_depth: u32) -> Result<()> {
    let store = open_store(store_path)?;
    let course = course_code(course)?;
    let tree = course_tree(&store, &course, prereq_depth, future_depth)?;
    println!("{}", serde_json::to_string_pretty(&tree)?);
    Ok(())
}
