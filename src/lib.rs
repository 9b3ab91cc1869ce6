//! # proof-loop
//!
//! An iterative plan → prove → verify → critique loop that turns a theorem
//! statement into a Lean 4 proof accepted by the Lean checker.
//!
//! ## Core Components
//!
//! - **State**: the per-session record stages read from and write to
//! - **Stage**: the four stage capabilities and their input contracts
//! - **Orchestrator**: the bounded control loop
//! - **Lean**: the external checker adapter
//! - **Agents**: LLM-backed planner, prover and critic
//! - **Runner**: session and batch entry points
//! - **Trajectory**: observable execution events
//!
//! ## Example
//!
//! ```rust,ignore
//! use proof_loop::{config::LoopConfig, runner::SessionRunner};
//!
//! let config = LoopConfig::load("proof-loop.toml")?;
//! let client = config.build_client()?;
//! let runner = SessionRunner::new(config.build_stages(client, None)?);
//!
//! let state = runner
//!     .run("1 + 1 = 2", "theorem one_add_one : 1 + 1 = 2", 5)
//!     .await?;
//! if state.verify_success {
//!     println!("{}", state.candidate);
//! }
//! ```

pub mod agents;
pub mod config;
pub mod error;
pub mod lean;
pub mod llm;
pub mod orchestrator;
pub mod problem;
pub mod runner;
pub mod stage;
pub mod state;
pub mod trajectory;

// Re-exports for convenience
pub use agents::{CheckerVerifier, LlmCritic, LlmPlanner, LlmProver, StageModelConfig};
pub use config::LoopConfig;
pub use error::{Error, Result};
pub use lean::{CheckOutcome, CheckStatus, CheckerConfig, LeanChecker};
pub use llm::{
    AnthropicClient, ClientConfig, CompletionRequest, CompletionResponse, CostTracker, LLMClient,
    OpenAIClient, Provider, TrackedClient,
};
pub use orchestrator::{next_after_verify, Phase, ProofLoop};
pub use problem::{group_by_tag, load_problems, Problem};
pub use runner::{BatchEntry, BatchResults, BatchRunner, BatchSummary, SessionReport, SessionRunner};
pub use stage::{
    Critic, CritiqueInput, PlanInput, Planner, ProveInput, Prover, StageKind, Stages,
    Verification, Verifier,
};
pub use state::{SessionOutcome, SessionState, StateUpdate};
pub use trajectory::{
    BroadcastEmitter, CollectingEmitter, LogEmitter, NullEmitter, TrajectoryEmitter,
    TrajectoryEvent, TrajectoryEventType,
};
