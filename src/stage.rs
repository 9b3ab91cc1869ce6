//! Stage capabilities used by the proof loop.
//!
//! Each stage is a single-purpose async capability with a fixed input and
//! output contract. The orchestrator assembles the inputs from session state
//! and merges the output back; stages never see the rest of the state.
//!
//! - [`Planner`]: statements → plan
//! - [`Prover`]: formal statement + plan (+ critic hint) → candidate
//! - [`Verifier`]: candidate → [`Verification`]
//! - [`Critic`]: candidate + verify log + plan → critic hint

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Identifies a stage in logs, events and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Plan,
    Prove,
    Verify,
    Critique,
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plan => write!(f, "plan"),
            Self::Prove => write!(f, "prove"),
            Self::Verify => write!(f, "verify"),
            Self::Critique => write!(f, "critique"),
        }
    }
}

/// Inputs to the Plan stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanInput {
    pub informal_statement: String,
    pub formal_statement: String,
}

/// Inputs to the Prove stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProveInput {
    pub formal_statement: String,
    pub plan: String,
    /// Feedback from the previous failed attempt; `None` on the first one.
    pub critic_hint: Option<String>,
}

/// Inputs to the Critique stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CritiqueInput {
    pub candidate: String,
    pub verify_log: String,
    pub plan: String,
}

/// Result of verifying one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    pub success: bool,
    pub log: String,
    /// The checker was killed before it finished; `log` holds a fixed diagnostic.
    #[serde(default)]
    pub timed_out: bool,
}

impl Verification {
    pub fn passed(log: impl Into<String>) -> Self {
        Self {
            success: true,
            log: log.into(),
            timed_out: false,
        }
    }

    pub fn failed(log: impl Into<String>) -> Self {
        Self {
            success: false,
            log: log.into(),
            timed_out: false,
        }
    }

    pub fn timed_out(log: impl Into<String>) -> Self {
        Self {
            success: false,
            log: log.into(),
            timed_out: true,
        }
    }
}

/// Produces a proof plan.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, input: PlanInput) -> Result<String>;
}

/// Produces a full proof candidate.
#[async_trait]
pub trait Prover: Send + Sync {
    async fn prove(&self, input: ProveInput) -> Result<String>;
}

/// Checks a proof candidate.
///
/// A rejected candidate is a successful call returning
/// `Verification { success: false, .. }`. `Err` is reserved for
/// infrastructure failures where the check could not be attempted.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self, candidate: &str) -> Result<Verification>;
}

/// Produces feedback on a failed candidate.
#[async_trait]
pub trait Critic: Send + Sync {
    async fn critique(&self, input: CritiqueInput) -> Result<String>;
}

/// The four stage capabilities a proof loop is built from.
///
/// Constructed once and shared by reference; cloning only bumps the `Arc`s.
#[derive(Clone)]
pub struct Stages {
    pub planner: Arc<dyn Planner>,
    pub prover: Arc<dyn Prover>,
    pub verifier: Arc<dyn Verifier>,
    pub critic: Arc<dyn Critic>,
}

impl Stages {
    pub fn new(
        planner: Arc<dyn Planner>,
        prover: Arc<dyn Prover>,
        verifier: Arc<dyn Verifier>,
        critic: Arc<dyn Critic>,
    ) -> Self {
        Self {
            planner,
            prover,
            verifier,
            critic,
        }
    }

    /// Same generative stages with a different verifier.
    ///
    /// Used to give each concurrent session its own checker instance.
    pub fn with_verifier(&self, verifier: Arc<dyn Verifier>) -> Self {
        Self {
            verifier,
            ..self.clone()
        }
    }
}

impl std::fmt::Debug for Stages {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stages").finish_non_exhaustive()
    }
}
