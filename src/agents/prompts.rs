//! Prompt templates for the LLM-backed stages.

use crate::stage::{CritiqueInput, PlanInput, ProveInput};

pub const PLANNER_SYSTEM: &str = "You are a mathematical planning assistant for formal proofs in Lean 4. \
Given an informal mathematical statement and its Lean 4 formalization, you produce a high-level proof plan.";

pub const PROVER_SYSTEM: &str = "You are a Lean 4 proof assistant. \
You write complete Lean 4 proofs, including all necessary imports, that compile without errors.";

pub const CRITIC_SYSTEM: &str = "You are a Lean 4 proof critic. \
You analyze proofs that failed verification and give specific, actionable feedback to fix them.";

/// Build the planner prompt.
pub fn planner_prompt(input: &PlanInput) -> String {
    format!(
        r#"## Informal Statement
{informal}

## Lean 4 Statement
{formal}

Provide a step-by-step plan for proving this theorem. Focus on:
1. Key lemmas or tactics to use
2. The overall proof strategy
3. Any edge cases to consider

Respond with a JSON object of the form {{"plan": "<your plan>"}}."#,
        informal = input.informal_statement,
        formal = input.formal_statement,
    )
}

/// Build the prover prompt; adds a feedback section when a critic hint exists.
pub fn prover_prompt(input: &ProveInput) -> String {
    let mut prompt = format!(
        "## Lean 4 Statement\n{}\n\n## Plan Hint\n{}\n",
        input.formal_statement, input.plan
    );

    if let Some(hint) = input.critic_hint.as_deref().filter(|h| !h.is_empty()) {
        prompt.push_str(&format!(
            "\n## Critic Feedback\n{}\n\nPlease address the feedback above.\n",
            hint
        ));
    }

    prompt.push_str(
        "\nWrite a complete Lean 4 proof. Include all necessary imports and restate the theorem \
exactly as given.\n\nRespond with a JSON object of the form {\"lean_code\": \"<complete Lean 4 file>\"}.",
    );
    prompt
}

/// Build the critic prompt.
pub fn critic_prompt(input: &CritiqueInput) -> String {
    format!(
        r#"The following Lean 4 proof candidate failed verification.

## Lean 4 Code
{candidate}

## Verification Log
{log}

## Original Plan
{plan}

Analyze the error and provide specific, actionable feedback to fix the proof. Focus on:
1. What went wrong
2. Suggested fixes
3. Alternative tactics or approaches

Respond with a JSON object of the form {{"critique": "<your feedback>"}}."#,
        candidate = input.candidate,
        log = input.verify_log,
        plan = input.plan,
    )
}
