//! Language-model transport. Workers are black boxes behind `LlmProvider`:
//! a static, heavily cached system prompt plus a dynamic user prompt in, raw
//! text (expected to be JSON) out. The HTTP backend talks to an
//! OpenAI-compatible gateway; the fixture backend replays recorded outputs
//! for tests and resume verification.

use std::collections::VecDeque;
use std::env;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::json;

use research_core::trace::WorkerKind;

use crate::error::{AgentError, AgentResult};

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub worker: WorkerKind,
    pub system: String,
    pub user: String,
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub text: String,
    pub cost_usd: f64,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> AgentResult<CompletionResponse>;

    fn backend_name(&self) -> &'static str;
}

/// HTTP-backed provider against an OpenAI-compatible chat completions API.
pub struct HttpLlmProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    input_cost_per_1k: f64,
    output_cost_per_1k: f64,
}

impl HttpLlmProvider {
    pub fn new(base_url: String, api_key: String, model: String) -> AgentResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(600))
            .pool_max_idle_per_host(8)
            .build()
            .map_err(|e| AgentError::RequestFailed(e.to_string()))?;
        Ok(Self {
            client,
            base_url,
            api_key,
            model,
            input_cost_per_1k: 0.003,
            output_cost_per_1k: 0.015,
        })
    }

    pub fn from_env() -> AgentResult<Self> {
        let base_url = env::var("LLM_GATEWAY_URL")
            .unwrap_or_else(|_| "http://localhost:8100".to_string());
        let api_key = env::var("LLM_API_KEY").unwrap_or_default();
        let model =
            env::var("LLM_MODEL").unwrap_or_else(|_| "research-large".to_string());
        let mut provider = Self::new(base_url, api_key, model)?;
        if let Ok(v) = env::var("LLM_INPUT_COST_PER_1K") {
            provider.input_cost_per_1k = v.parse().unwrap_or(provider.input_cost_per_1k);
        }
        if let Ok(v) = env::var("LLM_OUTPUT_COST_PER_1K") {
            provider.output_cost_per_1k = v.parse().unwrap_or(provider.output_cost_per_1k);
        }
        Ok(provider)
    }
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Deserialize, Default)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[async_trait]
impl LlmProvider for HttpLlmProvider {
    async fn complete(&self, request: &CompletionRequest) -> AgentResult<CompletionResponse> {
        let body = json!({
            "model": self.model,
            "temperature": 0.0,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user },
            ],
        });

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AgentError::RequestFailed(format!(
                "gateway returned {} for {}",
                response.status(),
                request.worker.as_str()
            )));
        }

        let parsed: ChatResponse = response.json().await?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| AgentError::RequestFailed("empty choices".to_string()))?;

        let usage = parsed.usage.unwrap_or_default();
        let cost_usd = usage.prompt_tokens as f64 / 1000.0 * self.input_cost_per_1k
            + usage.completion_tokens as f64 / 1000.0 * self.output_cost_per_1k;

        Ok(CompletionResponse { text, cost_usd })
    }

    fn backend_name(&self) -> &'static str {
        "http"
    }
}

/// Replays recorded worker outputs in order, per worker kind. Used by tests
/// and by resume verification, where worker outputs are treated as fixtures.
#[derive(Default)]
pub struct FixtureProvider {
    scripts: DashMap<&'static str, VecDeque<String>>,
    cost_per_call: f64,
}

impl FixtureProvider {
    pub fn new() -> Self {
        Self {
            scripts: DashMap::new(),
            cost_per_call: 0.05,
        }
    }

    pub fn with_cost_per_call(mut self, cost: f64) -> Self {
        self.cost_per_call = cost;
        self
    }

    /// Queue one recorded response for a worker kind.
    pub fn push(&self, worker: WorkerKind, text: impl Into<String>) {
        self.scripts
            .entry(worker.as_str())
            .or_default()
            .push_back(text.into());
    }

    pub fn push_json(&self, worker: WorkerKind, value: &serde_json::Value) {
        self.push(worker, value.to_string());
    }

    pub fn remaining(&self, worker: WorkerKind) -> usize {
        self.scripts
            .get(worker.as_str())
            .map(|q| q.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl LlmProvider for FixtureProvider {
    async fn complete(&self, request: &CompletionRequest) -> AgentResult<CompletionResponse> {
        let text = self
            .scripts
            .get_mut(request.worker.as_str())
            .and_then(|mut q| q.pop_front())
            .ok_or_else(|| AgentError::FixtureExhausted(request.worker.as_str().to_string()))?;
        Ok(CompletionResponse {
            text,
            cost_usd: self.cost_per_call,
        })
    }

    fn backend_name(&self) -> &'static str {
        "fixture"
    }
}

/// Extract the JSON body from a worker reply, tolerating a fenced code block
/// or prose around the object.
pub fn extract_json(text: &str) -> AgentResult<serde_json::Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }
    let start = trimmed.find('{');
    let end = trimmed.rfind('}');
    if let (Some(start), Some(end)) = (start, end) {
        if start < end {
            if let Ok(value) = serde_json::from_str(&trimmed[start..=end]) {
                return Ok(value);
            }
        }
    }
    Err(AgentError::SchemaViolation(
        "response is not valid JSON".to_string(),
    ))
}
