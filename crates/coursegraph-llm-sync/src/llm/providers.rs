//! Chat-completion providers
//!
//! Perplexity, OpenAI and local servers all speak the same
//! `/chat/completions` dialect, so one [`ChatClient`] covers them; the
//! provider only changes the base URL, auth and a couple of body fields.

use super::*;
use reqwest::{Client, StatusCode};
use std::time::Duration;

pub const PERPLEXITY_BASE_URL: &str = "https://api.perplexity.ai";
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_PERPLEXITY_MODEL: &str = "sonar-pro";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_TIMEOUT_SECS: u64 = 45;
pub const DEFAULT_MAX_RETRIES: u32 = 3;

// ============================================================================
// Configuration
// ============================================================================

/// Connection settings for one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LLMConfig {
    pub provider: Provider,
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Perplexity,
    OpenAI,
    Local,
}

impl LLMConfig {
    /// Load from environment variables: Perplexity, then OpenAI, then a
    /// local server.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// [`Self::from_env`] against an arbitrary variable source.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |name: &str| var(name).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty("PPLX_API_KEY") {
            let model = non_empty("PPLX_MODEL").unwrap_or_else(|| DEFAULT_PERPLEXITY_MODEL.to_string());
            return Ok(Self::perplexity(&key, &model));
        }

        if let Some(key) = non_empty("OPENAI_API_KEY") {
            let model = non_empty("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string());
            let mut config = Self::openai(&key, &model);
            config.base_url = non_empty("OPENAI_BASE_URL");
            return Ok(config);
        }

        if let Some(url) = non_empty("LOCAL_LLM_URL") {
            let model = non_empty("LOCAL_LLM_MODEL").unwrap_or_else(|| "default".to_string());
            return Ok(Self::local(&url, &model));
        }

        Err(ConfigError::NoProviderConfigured)
    }

    pub fn perplexity(api_key: &str, model: &str) -> Self {
        Self {
            provider: Provider::Perplexity,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn openai(api_key: &str, model: &str) -> Self {
        Self {
            provider: Provider::OpenAI,
            ..Self::perplexity(api_key, model)
        }
    }

    pub fn local(url: &str, model: &str) -> Self {
        Self {
            provider: Provider::Local,
            api_key: String::new(),
            model: model.to_string(),
            base_url: Some(url.to_string()),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// `{base}/chat/completions` for the configured provider.
    pub fn completions_url(&self) -> String {
        let base = match (&self.base_url, self.provider) {
            (Some(url), _) => url.as_str(),
            (None, Provider::Perplexity) => PERPLEXITY_BASE_URL,
            (None, Provider::OpenAI) => OPENAI_BASE_URL,
            (None, Provider::Local) => "http://localhost:8080/v1",
        };
        format!("{}/chat/completions", base.trim_end_matches('/'))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No LLM provider configured. Set PPLX_API_KEY, OPENAI_API_KEY, or LOCAL_LLM_URL")]
    NoProviderConfigured,
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Chat Client
// ============================================================================

pub struct ChatClient {
    client: Client,
    config: LLMConfig,
}

impl ChatClient {
    pub fn new(config: LLMConfig) -> Result<Self, ConfigError> {
        if config.provider != Provider::Local && config.api_key.trim().is_empty() {
            return Err(ConfigError::Invalid("api key is empty".to_string()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ConfigError::Invalid(format!("http client: {e}")))?;

        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::new(LLMConfig::from_env()?)
    }

    pub fn config(&self) -> &LLMConfig {
        &self.config
    }

    fn request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": request.messages,
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if let Some(temp) = request.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if self.config.provider == Provider::Perplexity {
            body["response_format"] = serde_json::json!({"type": "text"});
        }
        body
    }
}

#[async_trait]
impl LLMProvider for ChatClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LLMError> {
        let url = self.config.completions_url();
        let body = self.request_body(request);

        let mut builder = self.client.post(&url).json(&body);
        if !self.config.api_key.is_empty() {
            builder = builder.bearer_auth(&self.config.api_key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                LLMError::Timeout(self.config.timeout_secs)
            } else {
                LLMError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .unwrap_or(60);
            return Err(LLMError::RateLimited {
                retry_after_ms: retry_after * 1000,
            });
        }

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LLMError::Auth(error_text));
        }

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LLMError::Api {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LLMError::InvalidResponse(e.to_string()))?;

        parse_completion(&data, &self.config.model)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// Pull the first choice out of a chat-completions response body.
pub fn parse_completion(data: &serde_json::Value, model: &str) -> Result<CompletionResponse, LLMError> {
    let content = data["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| LLMError::InvalidResponse("missing choices[0].message.content".to_string()))?
        .to_string();

    let finish_reason = match data["choices"][0]["finish_reason"].as_str() {
        Some("length") => FinishReason::Length,
        Some("content_filter") => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    };

    Ok(CompletionResponse {
        content,
        finish_reason,
        usage: Usage {
            prompt_tokens: data["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as usize,
            completion_tokens: data["usage"]["completion_tokens"].as_u64().unwrap_or(0) as usize,
        },
        model: data["model"].as_str().unwrap_or(model).to_string(),
    })
}

// ============================================================================
// Retry
// ============================================================================

/// Exponential backoff for model requests: `base * 2^(attempt - 1)`, or the
/// server's retry-after hint when that is longer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(1500),
        }
    }
}

impl BackoffPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    pub fn delay_after(&self, attempt: u32, error: &LLMError) -> Duration {
        let exp = self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1));
        match error {
            LLMError::RateLimited { retry_after_ms } => exp.max(Duration::from_millis(*retry_after_ms)),
            _ => exp,
        }
    }
}

/// Wraps a provider and retries retryable failures.
pub struct RetryingProvider<P> {
    inner: P,
    policy: BackoffPolicy,
}

impl<P: LLMProvider> RetryingProvider<P> {
    pub fn new(inner: P, policy: BackoffPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<P: LLMProvider> LLMProvider for RetryingProvider<P> {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LLMError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.inner.complete(request).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = self.policy.delay_after(attempt, &err);
                    tracing::warn!(
                        model = self.inner.model_name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "model request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

// ============================================================================
// Tests
// ============================================================================
