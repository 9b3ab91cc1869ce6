use std::sync::Arc;

use async_trait::async_trait;

use super::output::field_or_raw;
use super::prompts::{critic_prompt, CRITIC_SYSTEM};
use super::{complete_text, StageModelConfig};
use crate::error::Result;
use crate::llm::LLMClient;
use crate::stage::{Critic, CritiqueInput, StageKind};

/// Critic that asks a language model to diagnose a rejected candidate.
pub struct LlmCritic {
    client: Arc<dyn LLMClient>,
    config: StageModelConfig,
}

impl LlmCritic {
    pub fn new(client: Arc<dyn LLMClient>, config: StageModelConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl Critic for LlmCritic {
    async fn critique(&self, input: CritiqueInput) -> Result<String> {
        let content = complete_text(
            self.client.as_ref(),
            &self.config,
            StageKind::Critique,
            CRITIC_SYSTEM,
            critic_prompt(&input),
        )
        .await?;
        Ok(field_or_raw(&content, "critique"))
    }
}
