//! Parse arbitration
//!
//! Combines the heuristic parser and the structuring model into one answer.
//! The heuristic always runs; the model result wins only when it found
//! structure with at least `min_structured_confidence`. Otherwise a non-empty
//! heuristic result is used with its confidence floored at
//! `heuristic_confidence_floor`.

use crate::structuring::Structurer;
use coursegraph_dsl::{parse_heuristic, CourseCode, ParseResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbiterConfig {
    pub structuring_enabled: bool,
    pub min_structured_confidence: f64,
    pub heuristic_confidence_floor: f64,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            structuring_enabled: true,
            min_structured_confidence: 0.1,
            heuristic_confidence_floor: 0.82,
        }
    }
}

/// Which parser produced the final groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseSource {
    Structured,
    Heuristic,
    /// Neither parser found any course.
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub result: ParseResult,
    pub source: ParseSource,
    /// Non-empty and at or above the caller's threshold.
    pub accepted: bool,
    /// Set when the structuring service could not be reached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_error: Option<String>,
}

pub struct Arbiter {
    structurer: Option<Structurer>,
    config: ArbiterConfig,
}

impl Arbiter {
    pub fn new(structurer: Structurer, config: ArbiterConfig) -> Self {
        Self {
            structurer: Some(structurer),
            config,
        }
    }

    /// An arbiter that never calls a model.
    pub fn heuristic_only() -> Self {
        Self::without_structuring(ArbiterConfig::default())
    }

    pub fn without_structuring(config: ArbiterConfig) -> Self {
        Self {
            structurer: None,
            config: ArbiterConfig {
                structuring_enabled: false,
                ..config
            },
        }
    }

    pub fn config(&self) -> &ArbiterConfig {
        &self.config
    }

    fn active_structurer(&self) -> Option<&Structurer> {
        self.structurer.as_ref().filter(|_| self.config.structuring_enabled)
    }

    pub async fn resolve(&self, raw: &str, known: &BTreeSet<CourseCode>, threshold: f64) -> Resolution {
        let heuristic = parse_heuristic(raw);

        let mut service_error = None;
        let structured = match self.active_structurer() {
            Some(structurer) => match structurer.structure_with_model(raw, known).await {
                Ok(result) => Some(result),
                Err(err) => {
                    tracing::warn!(error = %err, "structuring unavailable, using heuristic parse");
                    service_error = Some(err.to_string());
                    None
                }
            },
            None => None,
        };

        let (result, source) = self.choose(structured, heuristic);
        let accepted = !result.groups.is_empty() && result.confidence >= threshold;

        tracing::debug!(
            ?source,
            clauses = result.groups.len(),
            confidence = result.confidence,
            accepted,
            "resolved prerequisite text"
        );

        Resolution {
            result,
            source,
            accepted,
            service_error,
        }
    }

    fn choose(
        &self,
        structured: Option<ParseResult>,
        heuristic: coursegraph_dsl::PrereqExpression,
    ) -> (ParseResult, ParseSource) {
        // a service failure counts as an empty zero-confidence answer
        let structured_present = structured.is_some();
        let structured = structured.unwrap_or_else(ParseResult::empty);

        let trusted = !structured.groups.is_empty()
            && structured.confidence >= self.config.min_structured_confidence;
        if trusted {
            return (structured, ParseSource::Structured);
        }

        if !heuristic.is_empty() {
            if structured_present {
                tracing::debug!(
                    model_confidence = structured.confidence,
                    model_clauses = structured.groups.len(),
                    "falling back to heuristic parse"
                );
            }
            let confidence = structured.confidence.max(self.config.heuristic_confidence_floor);
            let result = ParseResult::new(heuristic, structured.constraints, confidence);
            return (result, ParseSource::Heuristic);
        }

        let source = if structured.groups.is_empty() {
            ParseSource::None
        } else {
            ParseSource::Structured
        };
        (structured, source)
    }
}
