//! LLM client trait and provider implementations.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::error::{Error, Result};

use super::types::{
    ChatMessage, ChatRole, CompletionRequest, CompletionResponse, CostTracker, ModelSpec,
    Provider, StopReason, TokenUsage,
};

/// LLM client trait for making completions.
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Complete a prompt.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;

    /// Get the provider for this client.
    fn provider(&self) -> Provider;

    /// List known models.
    fn available_models(&self) -> Vec<ModelSpec>;
}

/// Configuration for LLM clients.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_key: String,
    /// Base URL override
    pub base_url: Option<String>,
    /// Model used when a request names none
    pub default_model: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            default_model: None,
            timeout_secs: 120,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// Build a client for `provider` behind the trait object the stages share.
pub fn client_for(provider: Provider, config: ClientConfig) -> Result<Arc<dyn LLMClient>> {
    Ok(match provider {
        Provider::Anthropic => Arc::new(AnthropicClient::new(config)?),
        Provider::OpenAI => Arc::new(OpenAIClient::new(config)?),
    })
}

fn build_http_client(timeout_secs: u64) -> Result<Client> {
    let timeout = Duration::from_secs(timeout_secs);

    // Proxy auto-detection can panic in some sandboxed environments.
    // Fall back to no-proxy in that case.
    match catch_unwind(AssertUnwindSafe(|| {
        Client::builder().timeout(timeout).build()
    })) {
        Ok(Ok(client)) => Ok(client),
        Ok(Err(_)) | Err(_) => Client::builder()
            .no_proxy()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e))),
    }
}

fn trim_base_url(url: &str) -> &str {
    url.trim_end_matches('/')
}

/// Anthropic Claude client.
pub struct AnthropicClient {
    config: ClientConfig,
    http: Client,
}

impl AnthropicClient {
    const DEFAULT_BASE_URL: &'static str = "https://api.anthropic.com";
    const API_VERSION: &'static str = "2023-06-01";

    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = build_http_client(config.timeout_secs)?;
        Ok(Self { config, http })
    }

    fn base_url(&self) -> &str {
        trim_base_url(
            self.config
                .base_url
                .as_deref()
                .unwrap_or(Self::DEFAULT_BASE_URL),
        )
    }
}

// Anthropic API types
#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    id: String,
    model: String,
    content: Vec<AnthropicContent>,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorDetail,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: String,
}

/// Move system turns into the top-level field; the messages API rejects them inline.
fn split_system(
    mut system: Option<String>,
    chat: Vec<ChatMessage>,
) -> (Option<String>, Vec<WireMessage>) {
    let mut messages = Vec::with_capacity(chat.len());
    for m in chat {
        if m.role == ChatRole::System {
            system = Some(match system {
                Some(s) => format!("{}\n\n{}", s, m.content),
                None => m.content,
            });
        } else {
            messages.push(WireMessage {
                role: m.role.as_str().to_string(),
                content: m.content,
            });
        }
    }
    (system, messages)
}

#[async_trait]
impl LLMClient for AnthropicClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let model = request
            .model
            .or(self.config.default_model.clone())
            .unwrap_or_else(|| ModelSpec::claude_sonnet().id);

        let (system, messages) = split_system(request.system, request.messages);

        let api_request = AnthropicRequest {
            model: model.clone(),
            messages,
            max_tokens: request.max_tokens.unwrap_or(4096),
            system,
            temperature: request.temperature.map(|t| t.min(1.0)),
            stop_sequences: request.stop,
        };

        let url = format!("{}/v1/messages", self.base_url());

        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", Self::API_VERSION)
            .header("content-type", "application/json")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::LLM(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::LLM(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<AnthropicError>(&body) {
                return Err(Error::llm_api(
                    "anthropic",
                    format!("{}: {}", error.error.error_type, error.error.message),
                ));
            }
            return Err(Error::llm_api("anthropic", format!("{}: {}", status, body)));
        }

        let api_response: AnthropicResponse = serde_json::from_str(&body)
            .map_err(|e| Error::LLM(format!("Failed to parse response: {}", e)))?;

        let content = api_response
            .content
            .iter()
            .filter_map(|c| c.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        let stop_reason = api_response.stop_reason.as_deref().map(|r| match r {
            "max_tokens" => StopReason::MaxTokens,
            "stop_sequence" => StopReason::StopSequence,
            "tool_use" => StopReason::ToolUse,
            _ => StopReason::EndTurn,
        });

        let usage = TokenUsage {
            input_tokens: api_response.usage.input_tokens,
            output_tokens: api_response.usage.output_tokens,
        };

        let cost = self
            .available_models()
            .into_iter()
            .find(|m| m.id == model)
            .map(|m| m.calculate_cost(usage.input_tokens, usage.output_tokens));

        Ok(CompletionResponse {
            id: api_response.id,
            model: api_response.model,
            content,
            stop_reason,
            usage,
            timestamp: Utc::now(),
            cost,
        })
    }

    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    fn available_models(&self) -> Vec<ModelSpec> {
        vec![ModelSpec::claude_sonnet(), ModelSpec::claude_haiku()]
    }
}

/// OpenAI (or OpenAI-compatible) chat completions client.
pub struct OpenAIClient {
    config: ClientConfig,
    http: Client,
}

impl OpenAIClient {
    const DEFAULT_BASE_URL: &'static str = "https://api.openai.com";

    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = build_http_client(config.timeout_secs)?;
        Ok(Self { config, http })
    }

    fn base_url(&self) -> &str {
        trim_base_url(
            self.config
                .base_url
                .as_deref()
                .unwrap_or(Self::DEFAULT_BASE_URL),
        )
    }
}

// OpenAI API types
#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    id: String,
    model: String,
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct OpenAIError {
    error: OpenAIErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorDetail {
    message: String,
}

#[async_trait]
impl LLMClient for OpenAIClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let model = request
            .model
            .or(self.config.default_model.clone())
            .unwrap_or_else(|| ModelSpec::gpt4o().id);

        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = request.system {
            messages.push(WireMessage {
                role: "system".to_string(),
                content: system,
            });
        }
        for m in request.messages {
            messages.push(WireMessage {
                role: m.role.as_str().to_string(),
                content: m.content,
            });
        }

        let api_request = OpenAIRequest {
            model: model.clone(),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stop: request.stop,
        };

        let url = format!("{}/v1/chat/completions", self.base_url());

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("content-type", "application/json")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::LLM(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::LLM(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<OpenAIError>(&body) {
                return Err(Error::llm_api("openai", error.error.message));
            }
            return Err(Error::llm_api("openai", format!("{}: {}", status, body)));
        }

        let api_response: OpenAIResponse = serde_json::from_str(&body)
            .map_err(|e| Error::LLM(format!("Failed to parse response: {}", e)))?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::LLM("No choices in response".to_string()))?;

        let stop_reason = choice.finish_reason.as_deref().map(|r| match r {
            "length" => StopReason::MaxTokens,
            "tool_calls" => StopReason::ToolUse,
            _ => StopReason::EndTurn,
        });

        let usage = api_response
            .usage
            .map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default();

        let cost = self
            .available_models()
            .into_iter()
            .find(|m| m.id == model || model.starts_with(&m.id))
            .map(|m| m.calculate_cost(usage.input_tokens, usage.output_tokens));

        Ok(CompletionResponse {
            id: api_response.id,
            model: api_response.model,
            content: choice.message.content.unwrap_or_default(),
            stop_reason,
            usage,
            timestamp: Utc::now(),
            cost,
        })
    }

    fn provider(&self) -> Provider {
        Provider::OpenAI
    }

    fn available_models(&self) -> Vec<ModelSpec> {
        // Most specific id first so prefix matching picks the right price.
        vec![ModelSpec::gpt4o_mini(), ModelSpec::gpt4o()]
    }
}

/// Client wrapper that records token usage and cost of every completion.
pub struct TrackedClient {
    inner: Arc<dyn LLMClient>,
    costs: Arc<RwLock<CostTracker>>,
}

impl TrackedClient {
    pub fn new(client: Arc<dyn LLMClient>) -> Self {
        Self {
            inner: client,
            costs: Arc::new(RwLock::new(CostTracker::new())),
        }
    }

    /// Get current cost summary.
    pub async fn costs(&self) -> CostTracker {
        self.costs.read().await.clone()
    }

    /// Reset cost tracking.
    pub async fn reset_costs(&self) {
        *self.costs.write().await = CostTracker::new();
    }
}

#[async_trait]
impl LLMClient for TrackedClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let response = self.inner.complete(request).await?;

        tracing::debug!(
            model = %response.model,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "LLM completion"
        );
        self.costs
            .write()
            .await
            .record(&response.model, &response.usage, response.cost);

        Ok(response)
    }

    fn provider(&self) -> Provider {
        self.inner.provider()
    }

    fn available_models(&self) -> Vec<ModelSpec> {
        self.inner.available_models()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted client for stage tests.

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// Replays canned responses and records every request.
    pub struct MockLLMClient {
        responses: Mutex<VecDeque<Result<String>>>,
        pub requests: Mutex<Vec<CompletionRequest>>,
    }

    impl MockLLMClient {
        pub fn new(response: impl Into<String>) -> Self {
            Self::scripted(vec![Ok(response.into())])
        }

        pub fn scripted(responses: Vec<Result<String>>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().collect()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn last_request(&self) -> Option<CompletionRequest> {
            self.requests.lock().unwrap().last().cloned()
        }
    }

    #[async_trait]
    impl LLMClient for MockLLMClient {
        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
            let model = request.model.clone().unwrap_or_else(|| "test-model".to_string());
            self.requests.lock().unwrap().push(request);
            let content = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Error::LLM("no scripted response".to_string())))?;
            Ok(CompletionResponse {
                id: "test".to_string(),
                model,
                content,
                stop_reason: Some(StopReason::EndTurn),
                usage: TokenUsage {
                    input_tokens: 100,
                    output_tokens: 20,
                },
                timestamp: Utc::now(),
                cost: Some(0.001),
            })
        }

        fn provider(&self) -> Provider {
            Provider::OpenAI
        }

        fn available_models(&self) -> Vec<ModelSpec> {
            vec![]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MockLLMClient;
    use super::*;

    #[test]
    fn test_client_config_builder() {
        let config = ClientConfig::new("test-key")
            .with_base_url("https://custom.api.com")
            .with_default_model("gpt-4o-mini")
            .with_timeout(60);

        assert_eq!(config.api_key, "test-key");
        assert_eq!(config.base_url, Some("https://custom.api.com".to_string()));
        assert_eq!(config.default_model, Some("gpt-4o-mini".to_string()));
        assert_eq!(config.timeout_secs, 60);
    }

    #[test]
    fn test_system_turns_move_to_top_level() {
        let chat = vec![
            ChatMessage {
                role: ChatRole::System,
                content: "Answer in Lean 4.".to_string(),
            },
            ChatMessage::user("Prove 1 + 1 = 2"),
        ];

        let (system, messages) = split_system(Some("You are a prover.".to_string()), chat);

        assert_eq!(
            system.as_deref(),
            Some("You are a prover.\n\nAnswer in Lean 4.")
        );
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, "user");
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client =
            OpenAIClient::new(ClientConfig::new("k").with_base_url("http://localhost:8000/"))
                .unwrap();
        assert_eq!(client.base_url(), "http://localhost:8000");

        let client = AnthropicClient::new(ClientConfig::new("k")).unwrap();
        assert_eq!(client.base_url(), "https://api.anthropic.com");
    }

    #[test]
    fn test_client_for_provider() {
        let client = client_for(Provider::Anthropic, ClientConfig::new("k")).unwrap();
        assert_eq!(client.provider(), Provider::Anthropic);
        assert!(client
            .available_models()
            .iter()
            .any(|m| m.id.contains("sonnet")));

        let client = client_for(Provider::OpenAI, ClientConfig::new("k")).unwrap();
        assert_eq!(client.provider(), Provider::OpenAI);
        assert!(client.available_models().iter().any(|m| m.id == "gpt-4o"));
    }

    #[tokio::test]
    async fn test_tracked_client_records_costs() {
        let mock = Arc::new(MockLLMClient::scripted(vec![
            Ok("one".to_string()),
            Ok("two".to_string()),
        ]));
        let tracked = TrackedClient::new(mock);

        for _ in 0..2 {
            let request = CompletionRequest::new()
                .with_model("gpt-4o")
                .with_message(ChatMessage::user("hi"));
            tracked.complete(request).await.unwrap();
        }

        let costs = tracked.costs().await;
        assert_eq!(costs.request_count, 2);
        assert_eq!(costs.total_input_tokens, 200);
        assert_eq!(costs.by_model["gpt-4o"].output_tokens, 40);

        tracked.reset_costs().await;
        assert_eq!(tracked.costs().await.request_count, 0);
    }

    #[tokio::test]
    async fn test_tracked_client_passes_errors_through() {
        let mock = Arc::new(MockLLMClient::scripted(vec![Err(Error::llm_api(
            "openai", "rate limited",
        ))]));
        let tracked = TrackedClient::new(mock);

        let err = tracked.complete(CompletionRequest::new()).await.unwrap_err();
        assert!(err.to_string().contains("rate limited"));
        assert_eq!(tracked.costs().await.request_count, 0);
    }
}
