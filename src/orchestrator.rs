//! Proof loop orchestrator.
//!
//! The orchestrator drives one session through the stage state machine:
//!
//! ```text
//! PLAN -> PROVE -> VERIFY -+-> DONE_SUCCESS            (verified)
//!           ^              +-> DONE_EXHAUSTED          (count >= limit)
//!           |              +-> CRITIQUE --+            (otherwise)
//!           +-----------------------------+
//! ```
//!
//! `PLAN` runs once. The limit check happens *before* critiquing and the
//! counter is incremented *inside* the critique step, so a limit of `N`
//! allows `N` critiques and `N + 1` prove/verify cycles.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::stage::{CritiqueInput, PlanInput, ProveInput, StageKind, Stages};
use crate::state::{SessionOutcome, SessionState, StateUpdate};
use crate::trajectory::{NullEmitter, TrajectoryEmitter, TrajectoryEvent};

/// State of the proof loop state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Plan,
    Prove,
    Verify,
    Critique,
    DoneSuccess,
    DoneExhausted,
}

impl Phase {
    /// Whether the loop stops in this phase.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::DoneSuccess | Self::DoneExhausted)
    }

    /// Stage executed in this phase, if any.
    pub fn stage(&self) -> Option<StageKind> {
        match self {
            Self::Plan => Some(StageKind::Plan),
            Self::Prove => Some(StageKind::Prove),
            Self::Verify => Some(StageKind::Verify),
            Self::Critique => Some(StageKind::Critique),
            Self::DoneSuccess | Self::DoneExhausted => None,
        }
    }

    /// Session outcome for terminal phases.
    pub fn outcome(&self) -> Option<SessionOutcome> {
        match self {
            Self::DoneSuccess => Some(SessionOutcome::Verified),
            Self::DoneExhausted => Some(SessionOutcome::Exhausted),
            _ => None,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plan => write!(f, "plan"),
            Self::Prove => write!(f, "prove"),
            Self::Verify => write!(f, "verify"),
            Self::Critique => write!(f, "critique"),
            Self::DoneSuccess => write!(f, "done_success"),
            Self::DoneExhausted => write!(f, "done_exhausted"),
        }
    }
}

/// Transition out of `VERIFY`.
pub fn next_after_verify(state: &SessionState) -> Phase {
    if state.verify_success {
        Phase::DoneSuccess
    } else if state.iteration_count >= state.iteration_limit {
        Phase::DoneExhausted
    } else {
        Phase::Critique
    }
}

/// Drives a [`SessionState`] through the stage state machine.
///
/// Holds the injected stages and an event emitter; owns no session data, so
/// one instance can run any number of sessions one after another.
pub struct ProofLoop {
    stages: Stages,
    emitter: Arc<dyn TrajectoryEmitter>,
}

impl ProofLoop {
    /// Create a loop over the given stages with events discarded.
    pub fn new(stages: Stages) -> Self {
        Self {
            stages,
            emitter: Arc::new(NullEmitter),
        }
    }

    /// Route trajectory events to `emitter`.
    pub fn with_emitter(mut self, emitter: Arc<dyn TrajectoryEmitter>) -> Self {
        self.emitter = emitter;
        self
    }

    pub fn stages(&self) -> &Stages {
        &self.stages
    }

    /// Execute the stage for `phase`, merge its output, and return the next phase.
    ///
    /// Terminal phases are returned unchanged without touching the state.
    pub async fn step(&self, state: &mut SessionState, phase: Phase) -> Result<Phase> {
        match phase {
            Phase::Plan => {
                let input = PlanInput {
                    informal_statement: state.informal_statement.clone(),
                    formal_statement: state.formal_statement.clone(),
                };
                let plan = self
                    .stages
                    .planner
                    .plan(input)
                    .await
                    .map_err(|e| self.stage_failed(state, StageKind::Plan, e))?;
                tracing::debug!(plan_len = plan.len(), "Plan stage complete");
                self.emitter.emit(TrajectoryEvent::plan_complete(plan.as_str()));
                state.apply(StateUpdate::plan(plan));
                Ok(Phase::Prove)
            }
            Phase::Prove => {
                let input = ProveInput {
                    formal_statement: state.formal_statement.clone(),
                    plan: state.plan.clone(),
                    critic_hint: state.critic_hint().map(str::to_string),
                };
                let candidate = self
                    .stages
                    .prover
                    .prove(input)
                    .await
                    .map_err(|e| self.stage_failed(state, StageKind::Prove, e))?;
                tracing::debug!(
                    iteration = state.iteration_count,
                    candidate_len = candidate.len(),
                    "Prove stage complete"
                );
                self.emitter.emit(TrajectoryEvent::prove_complete(
                    state.iteration_count,
                    candidate.as_str(),
                ));
                state.apply(StateUpdate::candidate(candidate));
                Ok(Phase::Verify)
            }
            Phase::Verify => {
                let verification = self
                    .stages
                    .verifier
                    .verify(&state.candidate)
                    .await
                    .map_err(|e| self.stage_failed(state, StageKind::Verify, e))?;
                tracing::debug!(
                    iteration = state.iteration_count,
                    success = verification.success,
                    timed_out = verification.timed_out,
                    log_len = verification.log.len(),
                    "Verify stage complete"
                );
                self.emitter.emit(TrajectoryEvent::verify_result(
                    state.iteration_count,
                    &verification,
                ));
                state.apply(StateUpdate::verification(verification));

                let next = next_after_verify(state);
                match next {
                    Phase::DoneSuccess => self.emitter.emit(TrajectoryEvent::final_candidate(
                        state.iteration_count,
                        state.candidate.as_str(),
                    )),
                    Phase::DoneExhausted => self.emitter.emit(TrajectoryEvent::exhausted(
                        state.iteration_count,
                        state.verify_log.as_str(),
                    )),
                    _ => {}
                }
                Ok(next)
            }
            Phase::Critique => {
                let input = CritiqueInput {
                    candidate: state.candidate.clone(),
                    verify_log: state.verify_log.clone(),
                    plan: state.plan.clone(),
                };
                let hint = self
                    .stages
                    .critic
                    .critique(input)
                    .await
                    .map_err(|e| self.stage_failed(state, StageKind::Critique, e))?;
                let iteration = state.iteration_count + 1;
                tracing::debug!(iteration, hint_len = hint.len(), "Critique stage complete");
                self.emitter
                    .emit(TrajectoryEvent::critique_complete(iteration, hint.as_str()));
                state.apply(StateUpdate::critique(hint, iteration));
                Ok(Phase::Prove)
            }
            Phase::DoneSuccess | Phase::DoneExhausted => Ok(phase),
        }
    }

    /// Run a fresh session from `PLAN` to a terminal phase.
    pub async fn drive(&self, state: &mut SessionState) -> Result<SessionOutcome> {
        let started = Instant::now();
        let mut phase = Phase::Plan;

        while !phase.is_terminal() {
            tracing::trace!(%phase, iteration = state.iteration_count, "Entering phase");
            phase = self.step(state, phase).await?;
        }

        let outcome = phase
            .outcome()
            .ok_or_else(|| Error::Internal(format!("phase {} is not terminal", phase)))?;
        tracing::info!(
            %outcome,
            iterations = state.iteration_count,
            limit = state.iteration_limit,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Proof loop finished"
        );
        Ok(outcome)
    }

    fn stage_failed(&self, state: &SessionState, stage: StageKind, err: Error) -> Error {
        let err = Error::stage(stage, err);
        tracing::error!(%stage, iteration = state.iteration_count, error = %err, "Stage failed");
        self.emitter.emit(TrajectoryEvent::error(
            state.iteration_count,
            stage,
            err.to_string(),
        ));
        err
    }
}

impl std::fmt::Debug for ProofLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProofLoop")
            .field("stages", &self.stages)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted stages shared by orchestrator and runner tests.

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use crate::error::{Error, Result};
    use crate::stage::{
        Critic, CritiqueInput, PlanInput, Planner, ProveInput, Prover, Stages, Verification,
        Verifier,
    };

    /// Records every call and answers from a script.
    #[derive(Default)]
    pub struct ScriptedStages {
        pub plan_calls: AtomicUsize,
        pub prove_calls: AtomicUsize,
        pub verify_calls: AtomicUsize,
        pub critique_calls: AtomicUsize,
        pub prove_inputs: Mutex<Vec<ProveInput>>,
        pub verified: Mutex<Vec<String>>,
        pub critique_inputs: Mutex<Vec<CritiqueInput>>,
        /// Verify outcomes by cycle; once drained, `default_success` applies.
        pub outcomes: Mutex<VecDeque<bool>>,
        pub default_success: bool,
        pub fail_stage: Option<&'static str>,
        /// Critic answers with whitespace only.
        pub blank_hints: bool,
    }

    impl ScriptedStages {
        pub fn always(success: bool) -> Arc<Self> {
            Arc::new(Self {
                default_success: success,
                ..Default::default()
            })
        }

        pub fn sequence(outcomes: &[bool], default_success: bool) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.iter().copied().collect()),
                default_success,
                ..Default::default()
            })
        }

        pub fn failing(stage: &'static str) -> Arc<Self> {
            Arc::new(Self {
                fail_stage: Some(stage),
                ..Default::default()
            })
        }

        pub fn count(counter: &AtomicUsize) -> usize {
            counter.load(Ordering::SeqCst)
        }

        fn maybe_fail(&self, stage: &str) -> Result<()> {
            if self.fail_stage == Some(stage) {
                return Err(Error::LLM(format!("{} backend unavailable", stage)));
            }
            Ok(())
        }
    }

    pub fn stages(script: &Arc<ScriptedStages>) -> Stages {
        Stages::new(script.clone(), script.clone(), script.clone(), script.clone())
    }

    #[async_trait]
    impl Planner for ScriptedStages {
        async fn plan(&self, input: PlanInput) -> Result<String> {
            self.maybe_fail("plan")?;
            self.plan_calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("plan for {}", input.formal_statement))
        }
    }

    #[async_trait]
    impl Prover for ScriptedStages {
        async fn prove(&self, input: ProveInput) -> Result<String> {
            self.maybe_fail("prove")?;
            let n = self.prove_calls.fetch_add(1, Ordering::SeqCst);
            self.prove_inputs.lock().unwrap().push(input);
            Ok(format!("candidate {}", n))
        }
    }

    #[async_trait]
    impl Verifier for ScriptedStages {
        async fn verify(&self, candidate: &str) -> Result<Verification> {
            self.maybe_fail("verify")?;
            self.verify_calls.fetch_add(1, Ordering::SeqCst);
            self.verified.lock().unwrap().push(candidate.to_string());
            let success = self
                .outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(self.default_success);
            let log = format!("log for {}", candidate);
            Ok(if success {
                Verification::passed(log)
            } else {
                Verification::failed(log)
            })
        }
    }

    #[async_trait]
    impl Critic for ScriptedStages {
        async fn critique(&self, input: CritiqueInput) -> Result<String> {
            self.maybe_fail("critique")?;
            let n = self.critique_calls.fetch_add(1, Ordering::SeqCst);
            self.critique_inputs.lock().unwrap().push(input);
            if self.blank_hints {
                return Ok(" \n".to_string());
            }
            Ok(format!("hint {}", n))
        }
    }
}
