//! LLM-backed stage implementations.
//!
//! [`LlmPlanner`], [`LlmProver`] and [`LlmCritic`] share one
//! `Arc<dyn LLMClient>` and each carry their own [`StageModelConfig`]. Every
//! stage asks the model for a JSON object with a single field and falls back
//! to the raw response text when none is found. [`CheckerVerifier`] plugs the
//! Lean checker into the [`Verifier`](crate::stage::Verifier) seam.

mod critic;
pub mod output;
mod planner;
pub mod prompts;
mod prover;
mod verifier;

pub use critic::LlmCritic;
pub use planner::LlmPlanner;
pub use prover::LlmProver;
pub use verifier::CheckerVerifier;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::llm::{ChatMessage, CompletionRequest, LLMClient};
use crate::stage::{StageKind, Stages};

/// Model settings for one LLM-backed stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageModelConfig {
    pub model_name: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for StageModelConfig {
    fn default() -> Self {
        Self {
            model_name: "gpt-4o".to_string(),
            temperature: 0.2,
            max_tokens: 2048,
        }
    }
}

impl StageModelConfig {
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            ..Default::default()
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Send one system + user exchange and return the response text.
async fn complete_text(
    client: &dyn LLMClient,
    config: &StageModelConfig,
    stage: StageKind,
    system: &str,
    prompt: String,
) -> Result<String> {
    let request = CompletionRequest::new()
        .with_model(config.model_name.clone())
        .with_system(system)
        .with_message(ChatMessage::user(prompt))
        .with_max_tokens(config.max_tokens)
        .with_temperature(config.temperature)
        .with_metadata("stage", stage.to_string());

    let response = client
        .complete(request)
        .await
        .map_err(|e| Error::stage(stage, e))?;

    tracing::debug!(
        %stage,
        model = %response.model,
        output_tokens = response.usage.output_tokens,
        "Model responded"
    );
    Ok(response.content)
}

/// Assemble LLM-backed stages around a shared client and a verifier.
pub fn llm_stages(
    client: Arc<dyn LLMClient>,
    planner: StageModelConfig,
    prover: StageModelConfig,
    critic: StageModelConfig,
    verifier: Arc<CheckerVerifier>,
) -> Stages {
    Stages::new(
        Arc::new(LlmPlanner::new(client.clone(), planner)),
        Arc::new(LlmProver::new(client.clone(), prover)),
        verifier,
        Arc::new(LlmCritic::new(client, critic)),
    )
}
