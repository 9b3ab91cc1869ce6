use std::sync::Arc;

use async_trait::async_trait;

use super::output::{field_or_raw, strip_code_fences};
use super::prompts::{prover_prompt, PROVER_SYSTEM};
use super::{complete_text, StageModelConfig};
use crate::error::{Error, Result};
use crate::llm::LLMClient;
use crate::stage::{ProveInput, Prover, StageKind};

/// Prover that asks a language model for a complete Lean 4 file.
pub struct LlmProver {
    client: Arc<dyn LLMClient>,
    config: StageModelConfig,
}

impl LlmProver {
    pub fn new(client: Arc<dyn LLMClient>, config: StageModelConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl Prover for LlmProver {
    async fn prove(&self, input: ProveInput) -> Result<String> {
        let content = complete_text(
            self.client.as_ref(),
            &self.config,
            StageKind::Prove,
            PROVER_SYSTEM,
            prover_prompt(&input),
        )
        .await?;

        let candidate = strip_code_fences(&field_or_raw(&content, "lean_code"));
        // An empty file type-checks, so it must never reach the checker.
        if candidate.is_empty() {
            return Err(Error::stage_message(
                StageKind::Prove,
                "model returned an empty proof",
            ));
        }
        Ok(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::MockLLMClient;
    use pretty_assertions::assert_eq;

    fn input(hint: Option<&str>) -> ProveInput {
        ProveInput {
            formal_statement: "theorem t : 2 + 2 = 4".to_string(),
            plan: "norm_num".to_string(),
            critic_hint: hint.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_prove_from_json_with_fenced_code() {
        let client = Arc::new(MockLLMClient::new(
            r#"{"lean_code": "```lean\ntheorem t : 2 + 2 = 4 := by norm_num\n```"}"#,
        ));
        let prover = LlmProver::new(client, StageModelConfig::default());

        let candidate = prover.prove(input(None)).await.unwrap();
        assert_eq!(candidate, "theorem t : 2 + 2 = 4 := by norm_num");
    }

    #[tokio::test]
    async fn test_prove_from_raw_fenced_text() {
        let client = Arc::new(MockLLMClient::new(
            "Here is the proof:\n```lean4\nimport Mathlib\n\ntheorem t : 2 + 2 = 4 := by\n  norm_num\n```\n",
        ));
        let prover = LlmProver::new(client, StageModelConfig::default());

        let candidate = prover.prove(input(None)).await.unwrap();
        assert_eq!(candidate, "import Mathlib\n\ntheorem t : 2 + 2 = 4 := by\n  norm_num");
    }

    #[tokio::test]
    async fn test_critic_hint_reaches_prompt() {
        let client = Arc::new(MockLLMClient::new(r#"{"lean_code": "theorem t : 2 + 2 = 4 := rfl"}"#));
        let prover = LlmProver::new(client.clone(), StageModelConfig::default());

        prover.prove(input(Some("use rfl"))).await.unwrap();

        let request = client.last_request().unwrap();
        assert!(request.messages[0].content.contains("Critic Feedback\nuse rfl"));
    }

    #[tokio::test]
    async fn test_empty_proof_is_rejected() {
        let client = Arc::new(MockLLMClient::new(r#"{"lean_code": "   "}"#));
        let prover = LlmProver::new(client, StageModelConfig::default());

        let err = prover.prove(input(None)).await.unwrap_err();
        assert_eq!(err.failed_stage(), Some(StageKind::Prove));
    }
}
