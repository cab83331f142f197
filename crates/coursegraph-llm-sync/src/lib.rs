//! Coursegraph LLM sync: prose → model → store
//!
//! This crate turns calendar prerequisite prose into stored relationships,
//! consulting a chat model when one is configured and falling back to the
//! heuristic parser when it is not (or when it misbehaves).
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                     PREREQUISITE SYNC PIPELINE                       │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                                                                      │
//! │  ┌──────────┐    ┌────────────┐    ┌──────────┐    ┌─────────────┐   │
//! │  │ calendar │───►│  Arbiter   │───►│ Verifier │───►│ Relationship│   │
//! │  │  prose   │    │            │    │          │    │ Store       │   │
//! │  └──────────┘    │ heuristic  │    │ compare, │    └─────────────┘   │
//! │                  │     +      │    │ gate,    │                      │
//! │                  │ Structurer │    │ reconcile│───► DecisionSink     │
//! │                  └─────┬──────┘    └──────────┘     (NDJSON audit)   │
//! │                        │                                             │
//! │                  ┌─────▼──────┐                                      │
//! │                  │ LLMProvider│  Perplexity / OpenAI / local         │
//! │                  └────────────┘                                      │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Guarantees
//! - Model failures degrade to the heuristic parse; they never abort a run
//! - The model call for a course completes before that course's writes begin
//! - Each decision is appended to the audit sink, whose failures are ignored

pub mod arbiter;
pub mod diagnostics;
pub mod llm;
pub mod structuring;
pub mod sync;

pub use arbiter::{Arbiter, ArbiterConfig, ParseSource, Resolution};
pub use diagnostics::{DecisionRecord, DecisionSink, IssueKind, MemorySink, NdjsonSink, NullSink};
pub use llm::providers::{BackoffPolicy, ChatClient, ConfigError, LLMConfig, Provider, RetryingProvider};
pub use llm::{CompletionRequest, CompletionResponse, LLMError, LLMProvider, Message, Role};
pub use structuring::{Structurer, StructuringError};
pub use sync::{CourseOutcome, Verifier, VerifyConfig, VerifyStats};

use std::sync::Arc;

/// Build an arbiter from the environment's model settings, or a
/// heuristic-only one when no provider is configured.
pub fn arbiter_from_env(config: ArbiterConfig) -> Result<Arbiter, ConfigError> {
    if !config.structuring_enabled {
        return Ok(Arbiter::without_structuring(config));
    }
    match LLMConfig::from_env() {
        Ok(llm) => {
            let policy = BackoffPolicy {
                max_attempts: llm.max_retries,
                ..BackoffPolicy::default()
            };
            let client = ChatClient::new(llm)?;
            tracing::info!(model = client.config().model.as_str(), "structuring enabled");
            let provider = RetryingProvider::new(client, policy);
            Ok(Arbiter::new(Structurer::new(Arc::new(provider)), config))
        }
        Err(ConfigError::NoProviderConfigured) => {
            tracing::info!("no model provider configured, using heuristic parsing only");
            Ok(Arbiter::without_structuring(config))
        }
        Err(err) => Err(err),
    }
}
