//! LLM client abstraction.
//!
//! A single [`LLMClient`] trait with OpenAI and Anthropic implementations over
//! `reqwest`. The LLM-backed stages hold an `Arc<dyn LLMClient>`; wrap it in a
//! [`TrackedClient`] to account tokens and cost across a run.
//!
//! ## Example
//!
//! ```rust,ignore
//! use proof_loop::llm::{ChatMessage, ClientConfig, CompletionRequest, LLMClient, OpenAIClient};
//!
//! let client = OpenAIClient::new(ClientConfig::new("your-api-key").with_default_model("gpt-4o"))?;
//!
//! let request = CompletionRequest::new()
//!     .with_system("You are a Lean 4 proof assistant.")
//!     .with_message(ChatMessage::user("Prove `theorem t : 1 + 1 = 2`."));
//!
//! let response = client.complete(request).await?;
//! ```

mod client;
mod types;

#[cfg(test)]
pub(crate) use client::testing;
pub use client::{
    client_for, AnthropicClient, ClientConfig, LLMClient, OpenAIClient, TrackedClient,
};
pub use types::{
    ChatMessage, ChatRole, CompletionRequest, CompletionResponse, CostTracker, ModelCosts,
    ModelSpec, Provider, StopReason, TokenUsage,
};
