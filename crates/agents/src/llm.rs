use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::prompt::{self, PromptTemplate};
use crate::retry::RetryPolicy;

/// Token counts reported by the backend for one or more calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

impl std::ops::AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.input_tokens += rhs.input_tokens;
        self.output_tokens += rhs.output_tokens;
    }
}

/// Raw result of one backend round trip. `output` is `None` when the model
/// produced nothing usable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendResponse {
    pub output: Option<Value>,
    pub usage: Option<TokenUsage>,
}

/// A generative text backend: typed prompt plus input record in, JSON out.
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn invoke(&self, template: PromptTemplate, input: &Value) -> Result<BackendResponse>;
}

#[derive(Clone)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
    format: String, // "json" for structured output
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

impl OllamaResponse {
    fn usage(&self) -> Option<TokenUsage> {
        match (self.prompt_eval_count, self.eval_count) {
            (None, None) => None,
            (input, output) => Some(TokenUsage::new(input.unwrap_or(0), output.unwrap_or(0))),
        }
    }
}

impl OllamaClient {
    pub fn new(
        base_url: String,
        model: String,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            base_url,
            model,
            client,
            retry,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn generate(&self, prompt: &str) -> Result<OllamaResponse> {
        let url = format!("{}/api/generate", self.base_url);

        let request = OllamaRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            stream: false,
            format: "json".to_string(), // Force JSON output
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send request to Ollama")?;

        if !response.status().is_success() {
            anyhow::bail!("Ollama request failed: {}", response.status());
        }

        response
            .json()
            .await
            .context("Failed to parse Ollama response")
    }
}

#[async_trait]
impl GenerativeBackend for OllamaClient {
    fn name(&self) -> &'static str {
        "ollama"
    }

    /// Generate JSON for `template`, with one repair round for invalid JSON.
    async fn invoke(&self, template: PromptTemplate, input: &Value) -> Result<BackendResponse> {
        let prompt = prompt::build_prompt(template, input);

        let first = self
            .retry
            .retry(template.id(), || self.generate(&prompt))
            .await
            .with_context(|| format!("{} call failed", template))?;
        let mut usage = first.usage();

        if let Ok(value) = serde_json::from_str::<Value>(&first.response) {
            return Ok(BackendResponse {
                output: Some(value),
                usage,
            });
        }

        debug!(template = template.id(), "Backend returned invalid JSON, requesting repair");
        let repair_prompt = prompt::build_retry_prompt(&first.response);
        let repaired = self
            .retry
            .retry(template.id(), || self.generate(&repair_prompt))
            .await
            .with_context(|| format!("{} repair call failed", template))?;

        if let Some(extra) = repaired.usage() {
            *usage.get_or_insert_with(TokenUsage::default) += extra;
        }

        let output = match serde_json::from_str::<Value>(&repaired.response) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(template = template.id(), error = %e, "Backend JSON still invalid after repair");
                None
            }
        };

        Ok(BackendResponse { output, usage })
    }
}
