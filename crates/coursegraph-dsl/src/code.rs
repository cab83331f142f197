//! Course code lexicon.
//!
//! Calendar prose spells the same course many ways (`CS 135`, `cs135`,
//! `CS-135`). Everything downstream keys on one canonical spelling:
//! uppercase, no whitespace, no hyphens.
//!
//! Two entry points with different strictness:
//!
//! - [`canonicalize`] normalizes a string that is already *just* a code
//!   (whitelists, stored rows, model output).
//! - [`extract`] pulls the first `DEPT NNN[X]` occurrence out of free text
//!   (calendar headers such as `"CS 136 LAB,LEC,TST 0.50"`).

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

/// Department letters (2–5) + level digits (2–3) + optional suffix letter.
static CODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Z]{2,5})\s*-?\s*(\d{2,3}[A-Z]?)\b").expect("course code pattern")
});

/// Shape check applied after whitespace/hyphen stripping.
static CANONICAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]+[0-9]+[A-Z0-9]*$").expect("canonical code pattern"));

// ============================================================================
// CourseCode
// ============================================================================

/// Canonical course identifier (`"CS135"`, `"MATH239"`, `"PHYS121L"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CourseCode(String);

impl CourseCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading department letters (`"MATH"` for `MATH239`).
    pub fn department(&self) -> &str {
        let end = self
            .0
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(self.0.len());
        &self.0[..end]
    }

    /// Everything after the department letters (`"239"`, `"121L"`).
    pub fn number(&self) -> &str {
        &self.0[self.department().len()..]
    }

    /// Numeric course level, if the number part starts with digits.
    pub fn level(&self) -> Option<u32> {
        let digits: String = self
            .number()
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        digits.parse().ok()
    }
}

impl fmt::Display for CourseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CourseCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// Ordering and hashing come from the inner string alone.
impl Borrow<str> for CourseCode {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<CourseCode> for String {
    fn from(code: CourseCode) -> Self {
        code.0
    }
}

impl TryFrom<String> for CourseCode {
    type Error = CodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        canonicalize(&value).ok_or(CodeError::NotACode(value))
    }
}

impl FromStr for CourseCode {
    type Err = CodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        canonicalize(s).ok_or_else(|| CodeError::NotACode(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodeError {
    #[error("not a course code: {0:?}")]
    NotACode(String),
}

// ============================================================================
// Lexicon operations
// ============================================================================

/// Normalize a bare code: uppercase, strip all whitespace and hyphens.
///
/// Returns `None` when what remains is not department letters followed by a
/// number.
pub fn canonicalize(text: &str) -> Option<CourseCode> {
    let canonical: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .flat_map(char::to_uppercase)
        .collect();

    CANONICAL_RE
        .is_match(&canonical)
        .then_some(CourseCode(canonical))
}

/// First course code occurring in `text`, if any.
///
/// Only the first match is considered; trailing text (credit weights, section
/// lists) is ignored.
pub fn extract(text: &str) -> Option<CourseCode> {
    CODE_RE.captures(text).map(|cap| join_parts(&cap))
}

/// A code occurrence inside a larger string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeMatch {
    pub code: CourseCode,
    /// Byte offset of the first character of the match.
    pub start: usize,
    /// Byte offset just past the match.
    pub end: usize,
}

/// Every code occurrence in `text`, left to right (duplicates included).
pub fn find_codes(text: &str) -> impl Iterator<Item = CodeMatch> + '_ {
    CODE_RE.captures_iter(text).filter_map(|cap| {
        let whole = cap.get(0)?;
        Some(CodeMatch {
            code: join_parts(&cap),
            start: whole.start(),
            end: whole.end(),
        })
    })
}

fn join_parts(cap: &regex::Captures<'_>) -> CourseCode {
    CourseCode(format!("{}{}", &cap[1], &cap[2]).to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn sets_of_codes_look_up_by_str() {
        let set: BTreeSet<CourseCode> = ["CS240", "MATH239"].iter().map(|c| canonicalize(c).unwrap()).collect();
        assert_eq!(set.get("MATH239").map(CourseCode::as_str), Some("MATH239"));
        assert!(set.get("MATH 239").is_none());
    }

    #[test]
    fn canonicalize_collapses_spellings() {
        let a = canonicalize("cs 135").unwrap();
        let b = canonicalize("CS-135").unwrap();
        let c = canonicalize(" Cs\t135 ").unwrap();
        assert_eq!(a.as_str(), "CS135");
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn canonicalize_rejects_non_codes() {
        assert!(canonicalize("").is_none());
        assert!(canonicalize("one of").is_none());
        assert!(canonicalize("135").is_none());
    }

    #[test]
    fn extract_takes_first_code_from_header() {
        let code = extract("CS 136 LAB,LEC,TST 0.50").unwrap();
        assert_eq!(code.as_str(), "CS136");

        let code = extract("PHYS 121L Mechanics Lab; see also PHYS 122").unwrap();
        assert_eq!(code.as_str(), "PHYS121L");
    }

    #[test]
    fn extract_enforces_length_bounds() {
        // Six department letters or four digits are not codes.
        assert!(extract("ABCDEF 101").is_none());
        assert!(extract("CS 1350").is_none());
        assert_eq!(extract("CS-240E").unwrap().as_str(), "CS240E");
    }

    #[test]
    fn department_and_level_accessors() {
        let code = canonicalize("math 239").unwrap();
        assert_eq!(code.department(), "MATH");
        assert_eq!(code.number(), "239");
        assert_eq!(code.level(), Some(239));

        let lab = canonicalize("PHYS121L").unwrap();
        assert_eq!(lab.number(), "121L");
        assert_eq!(lab.level(), Some(121));
    }

    #[test]
    fn find_codes_reports_offsets() {
        let text = "CS 245 or CS 240";
        let found: Vec<_> = find_codes(text).collect();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].code.as_str(), "CS245");
        assert_eq!(&text[found[1].start..found[1].end], "CS 240");
    }

    #[test]
    fn serde_uses_canonical_string() {
        let code: CourseCode = serde_json::from_str("\"cs 135\"").unwrap();
        assert_eq!(code.as_str(), "CS135");
        assert_eq!(serde_json::to_string(&code).unwrap(), "\"CS135\"");
        assert!(serde_json::from_str::<CourseCode>("\"none\"").is_err());
    }
}
