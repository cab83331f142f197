//! Course calendar ingestion
//!
//! Turns a department's calendar page into `course → prerequisite prose`:
//!
//! ```text
//! HTML ──► extract_course_blocks ──► [CourseBlock { code, cells }]
//!                                          │
//!                        extract_prereq_text + trim_prereq_only
//!                                          ▼
//!                          BTreeMap<CourseCode, String>
//! ```
//!
//! Courses without a prerequisite paragraph map to an empty string so the
//! verifier can report them.

pub mod fetch;
pub mod html;
pub mod prose;

use coursegraph_dsl::CourseCode;
use std::collections::BTreeMap;

pub use fetch::{CalendarClient, CALENDAR_BASE_URL, DEFAULT_CALENDAR_YEAR};
pub use html::{extract_course_blocks, CourseBlock};
pub use prose::{extract_prereq_text, trim_prereq_only};

#[derive(Debug, thiserror::Error)]
pub enum CalendarError {
    #[error("failed to fetch {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("calendar page not found: {0}")]
    NotFound(String),

    #[error("invalid selector '{0}'")]
    Selector(String),
}

/// Prerequisite prose for every course block on a calendar page. A code
/// that appears in several blocks keeps the last one.
pub fn parse_calendar(html: &str) -> Result<BTreeMap<CourseCode, String>, CalendarError> {
    let mut courses = BTreeMap::new();
    for block in extract_course_blocks(html)? {
        let raw = trim_prereq_only(&extract_prereq_text(&block.cells));
        courses.insert(block.code, raw);
    }
    tracing::debug!(courses = courses.len(), "parsed calendar page");
    Ok(courses)
}
