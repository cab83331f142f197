//! Model-assisted structuring
//!
//! Sends prerequisite prose to a chat model and turns whatever comes back into
//! a [`ParseResult`] restricted to known course codes:
//!
//! ```text
//! prose + whitelist ──► [system, few-shot pairs, user] ──► model
//!                                                            │
//!        ┌──────────── decode JSON? ◄─────────────────────────┘
//!        │ no                       │ yes
//!        ▼                          ▼
//!   strict retry ──► decode? ──► sanitize (flatten, whitelist, grades)
//!        │ no
//!        ▼
//!   ParseResult::invalid_json()
//! ```
//!
//! Undecodable output never escapes as an error. Only a failure to reach the
//! service does, as [`StructuringError::ServiceUnavailable`].

use crate::llm::{CompletionRequest, FinishReason, LLMError, LLMProvider, Message};
use coursegraph_dsl::cnf::grade_from_int;
use coursegraph_dsl::{CourseCode, GradeConstraint, ParseResult, PrereqClause, PrereqExpression, PrereqItem};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Longest whitelist hint sent to the model, in characters.
pub const WHITELIST_HINT_LIMIT: usize = 4000;

/// Confidence assumed when the model omits one or sends anything other
/// than a number in `[0, 1]`.
pub const DEFAULT_MODEL_CONFIDENCE: f64 = 0.5;

/// Reply budget per request. A CNF answer for one course fits well inside.
pub const MAX_RESPONSE_TOKENS: usize = 1024;

pub const SYSTEM_PROMPT: &str = "You are a data normalizer. Convert prerequisite prose into CNF: an AND of OR-clauses. \
Return JSON only. Schema: {\"groups\": [[{\"code\": \"CS136\", \"min_grade\": 60}]], \"constraints\": [\"...\"], \"confidence\": 0.0}. \
Each inner list is one OR-clause; the outer list is AND across clauses. \
Rules: (1) use only codes from the provided Codes list, written without spaces; \
(2) parentheses and 'one of' lists are OR-clauses; \
(3) 'and' and semicolons separate AND-clauses; \
(4) 'with at least N%' or 'with a grade of at least N%' sets min_grade on the nearest preceding course only; \
(5) conditions that are not courses (program, level or standing restrictions) go into constraints as short strings. \
confidence is your certainty between 0 and 1.";

pub const STRICT_SUFFIX: &str = "\n\nReturn VALID JSON only. If uncertain, return {\"groups\":[],\"constraints\":[],\"confidence\":0.3}.";

/// Worked examples: (prose, whitelist, expected answer). The first one is
/// also used on the strict retry.
const FEW_SHOTS: &[(&str, &[&str], &str)] = &[
    (
        "(One of CS 116, CS 136, CS 146) or (CS 114 with at least 60%; CS 115); MATH 135 or MATH 145",
        &["CS114", "CS115", "CS116", "CS136", "CS146", "MATH135", "MATH145"],
        r#"{"groups":[[{"code":"CS116"},{"code":"CS136"},{"code":"CS146"},{"code":"CS114","min_grade":60}],[{"code":"CS116"},{"code":"CS136"},{"code":"CS146"},{"code":"CS115"}],[{"code":"MATH135"},{"code":"MATH145"}]],"constraints":[],"confidence":0.9}"#,
    ),
    (
        "CS 240 with a grade of at least 70%; Honours Mathematics students only.",
        &["CS240", "CS241"],
        r#"{"groups":[[{"code":"CS240","min_grade":70}]],"constraints":["Honours Mathematics students only"],"confidence":0.85}"#,
    ),
    (
        "One of STAT 230, STAT 240 and one of STAT 231, STAT 241",
        &["STAT230", "STAT231", "STAT240", "STAT241"],
        r#"{"groups":[[{"code":"STAT230"},{"code":"STAT240"}],[{"code":"STAT231"},{"code":"STAT241"}]],"constraints":[],"confidence":0.85}"#,
    ),
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StructuringError {
    #[error("structuring service unavailable: {0}")]
    ServiceUnavailable(#[from] LLMError),
}

// ============================================================================
// Prompt
// ============================================================================

/// Sorted codes joined by `", "`, cut at [`WHITELIST_HINT_LIMIT`] characters.
pub fn whitelist_hint<'a>(known: impl IntoIterator<Item = &'a CourseCode>) -> String {
    let codes: BTreeSet<&str> = known.into_iter().map(CourseCode::as_str).collect();
    let joined = codes.into_iter().collect::<Vec<_>>().join(", ");
    joined.chars().take(WHITELIST_HINT_LIMIT).collect()
}

fn user_message(raw: &str, hint: &str) -> Message {
    Message::user(format!("Text:\n{raw}\n\nCodes:\n{hint}\n\nReturn JSON only."))
}

fn push_example(messages: &mut Vec<Message>, (text, codes, answer): &(&str, &[&str], &str)) {
    messages.push(user_message(text, &codes.join(", ")));
    messages.push(Message::assistant(*answer));
}

pub fn build_messages(raw: &str, known: &BTreeSet<CourseCode>) -> Vec<Message> {
    let mut messages = vec![Message::system(SYSTEM_PROMPT)];
    for example in FEW_SHOTS {
        push_example(&mut messages, example);
    }
    messages.push(user_message(raw, &whitelist_hint(known)));
    messages
}

/// Shorter prompt for the second attempt: strict instruction, one example.
pub fn build_strict_messages(raw: &str, known: &BTreeSet<CourseCode>) -> Vec<Message> {
    let mut messages = vec![Message::system(format!("{SYSTEM_PROMPT}{STRICT_SUFFIX}"))];
    push_example(&mut messages, &FEW_SHOTS[0]);
    messages.push(user_message(raw, &whitelist_hint(known)));
    messages
}

// ============================================================================
// Decoding
// ============================================================================

/// Drop a surrounding markdown code fence, if any.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // skip the language tag line
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Decode a model reply into a JSON object. Falls back to the outermost
/// `{...}` span when the reply has prose around the object.
pub fn decode_response(text: &str) -> Option<Map<String, Value>> {
    let body = strip_code_fences(text);
    if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(body) {
        return Some(obj);
    }

    let start = body.find('{')?;
    let end = body.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&body[start..=end]) {
        Ok(Value::Object(obj)) => Some(obj),
        _ => None,
    }
}

// ============================================================================
// Sanitizing
// ============================================================================

/// Normalize a decoded reply against the whitelist.
///
/// Nested arrays inside a clause are flattened; items whose code is not in
/// `known` (exact match after trimming and upper-casing) are dropped, as are
/// clauses left empty. A missing, non-numeric or out-of-range confidence becomes
/// [`DEFAULT_MODEL_CONFIDENCE`].
pub fn sanitize(obj: &Map<String, Value>, known: &BTreeSet<CourseCode>) -> ParseResult {
    let mut groups = PrereqExpression::new();
    if let Some(Value::Array(raw_groups)) = obj.get("groups") {
        for raw_clause in raw_groups {
            let mut objects = Vec::new();
            flatten_items(raw_clause, &mut objects);

            let clause: PrereqClause = objects
                .into_iter()
                .filter_map(|item| whitelisted_item(item, known))
                .collect();
            groups.push(clause);
        }
    }

    let constraints = match obj.get("constraints") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };

    let confidence = obj
        .get("confidence")
        .and_then(number_like)
        .filter(|c| (0.0..=1.0).contains(c))
        .unwrap_or(DEFAULT_MODEL_CONFIDENCE);

    ParseResult::new(groups, constraints, confidence)
}

fn flatten_items<'a>(value: &'a Value, out: &mut Vec<&'a Map<String, Value>>) {
    match value {
        Value::Array(values) => {
            for v in values {
                flatten_items(v, out);
            }
        }
        Value::Object(obj) => out.push(obj),
        _ => {}
    }
}

fn whitelisted_item(item: &Map<String, Value>, known: &BTreeSet<CourseCode>) -> Option<PrereqItem> {
    let wanted = item.get("code")?.as_str()?.trim().to_uppercase();
    let code = known.get(wanted.as_str())?.clone();
    Some(PrereqItem {
        code,
        min_grade: item.get("min_grade").and_then(coerce_grade),
    })
}

fn coerce_grade(value: &Value) -> GradeConstraint {
    number_like(value).and_then(|n| {
        if n.is_finite() {
            grade_from_int(n.trunc() as i64)
        } else {
            None
        }
    })
}

/// Numbers, and strings holding a number.
fn number_like(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').parse().ok(),
        _ => None,
    }
}

// ============================================================================
// Client
// ============================================================================

/// Structuring front-end over any [`LLMProvider`].
#[derive(Clone)]
pub struct Structurer {
    provider: Arc<dyn LLMProvider>,
}

impl Structurer {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    async fn ask(&self, messages: Vec<Message>) -> Result<String, StructuringError> {
        let request = CompletionRequest::new(messages)
            .with_temperature(0.0)
            .with_max_tokens(MAX_RESPONSE_TOKENS);
        let response = self.provider.complete(&request).await?;

        tracing::debug!(
            model = %response.model,
            prompt_tokens = response.usage.prompt_tokens,
            completion_tokens = response.usage.completion_tokens,
            "model reply received"
        );
        if response.finish_reason != FinishReason::Stop {
            tracing::warn!(
                model = %response.model,
                finish_reason = ?response.finish_reason,
                "model reply was cut short"
            );
        }
        Ok(response.content)
    }

    /// Structure `raw` into CNF over `known` codes.
    pub async fn structure_with_model(
        &self,
        raw: &str,
        known: &BTreeSet<CourseCode>,
    ) -> Result<ParseResult, StructuringError> {
        let reply = self.ask(build_messages(raw, known)).await?;
        if let Some(obj) = decode_response(&reply) {
            return Ok(sanitize(&obj, known));
        }

        tracing::warn!(
            model = self.model_name(),
            reply_len = reply.len(),
            "model reply was not JSON, retrying with strict prompt"
        );
        let reply = self.ask(build_strict_messages(raw, known)).await?;
        match decode_response(&reply) {
            Some(obj) => Ok(sanitize(&obj, known)),
            None => {
                tracing::warn!(model = self.model_name(), "strict retry still not JSON");
                Ok(ParseResult::invalid_json())
            }
        }
    }
}
