//! `coursegraph parse`

use anyhow::{anyhow, Result};
use coursegraph_dsl::{canonicalize, find_codes, CourseCode};
use coursegraph_llm_sync::{arbiter_from_env, Arbiter, ArbiterConfig};
use std::collections::BTreeSet;

/// Whitelist from `--known`, or every code mentioned in the text.
pub fn whitelist(text: &str, known: &[String]) -> Result<BTreeSet<CourseCode>> {
    if known.is_empty() {
        return Ok(find_codes(text).map(|m| m.code).collect());
    }
    known
        .iter()
        .filter(|raw| !raw.trim().is_empty())
        .map(|raw| canonicalize(raw).ok_or_else(|| anyhow!("not a course code: {raw}")))
        .collect()
}

pub async fn cmd_parse(text: &str, known: &[String], heuristic_only: bool, threshold: f64) -> Result<()> {
    let whitelist = whitelist(text, known)?;
    let arbiter = if heuristic_only {
        Arbiter::heuristic_only()
    } else {
        arbiter_from_env(ArbiterConfig::default())?
    };

    let resolution = arbiter.resolve(text, &whitelist, threshold).await;
    println!("{}", serde_json::to_string_pretty(&resolution)?);
    Ok(())
}
