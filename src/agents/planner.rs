use std::sync::Arc;

use async_trait::async_trait;

use super::output::field_or_raw;
use super::prompts::{planner_prompt, PLANNER_SYSTEM};
use super::{complete_text, StageModelConfig};
use crate::error::Result;
use crate::llm::LLMClient;
use crate::stage::{PlanInput, Planner, StageKind};

/// Planner that asks a language model for a step-by-step proof plan.
pub struct LlmPlanner {
    client: Arc<dyn LLMClient>,
    config: StageModelConfig,
}

impl LlmPlanner {
    pub fn new(client: Arc<dyn LLMClient>, config: StageModelConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn plan(&self, input: PlanInput) -> Result<String> {
        let content = complete_text(
            self.client.as_ref(),
            &self.config,
            StageKind::Plan,
            PLANNER_SYSTEM,
            planner_prompt(&input),
        )
        .await?;
        Ok(field_or_raw(&content, "plan"))
    }
}
