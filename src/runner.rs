//! Session and batch runners.
//!
//! [`SessionRunner`] is the entry point for one proof session: it builds the
//! initial state, drives the [`ProofLoop`] and reports the result.
//! [`BatchRunner`] schedules many sessions over a fixed set of runners, one per
//! worker slot, so that no two concurrent sessions share a checker.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::Instrument;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::orchestrator::ProofLoop;
use crate::problem::Problem;
use crate::stage::Stages;
use crate::state::{SessionOutcome, SessionState};
use crate::trajectory::{NullEmitter, TrajectoryEmitter, TrajectoryEvent};

/// Result of one completed session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub outcome: SessionOutcome,
    /// Number of Prove/Verify cycles executed.
    pub prove_cycles: u32,
    pub elapsed_ms: u64,
    pub state: SessionState,
}

impl SessionReport {
    pub fn verified(&self) -> bool {
        self.outcome == SessionOutcome::Verified
    }
}

/// Runs proof sessions over a fixed set of stages.
pub struct SessionRunner {
    proof_loop: ProofLoop,
    emitter: Arc<dyn TrajectoryEmitter>,
}

impl SessionRunner {
    pub fn new(stages: Stages) -> Self {
        Self {
            proof_loop: ProofLoop::new(stages),
            emitter: Arc::new(NullEmitter),
        }
    }

    /// Route trajectory events of every session to `emitter`.
    pub fn with_emitter(self, emitter: Arc<dyn TrajectoryEmitter>) -> Self {
        Self {
            proof_loop: self.proof_loop.with_emitter(emitter.clone()),
            emitter,
        }
    }

    pub fn stages(&self) -> &Stages {
        self.proof_loop.stages()
    }

    /// Run one session and return its final state.
    pub async fn run(
        &self,
        informal_statement: &str,
        formal_statement: &str,
        iteration_limit: u32,
    ) -> Result<SessionState> {
        self.run_report(informal_statement, formal_statement, iteration_limit)
            .await
            .map(|report| report.state)
    }

    /// Run one session and return its final state with timing and outcome.
    pub async fn run_report(
        &self,
        informal_statement: &str,
        formal_statement: &str,
        iteration_limit: u32,
    ) -> Result<SessionReport> {
        let session_id = Uuid::new_v4();
        let span = tracing::info_span!("session", %session_id);

        async {
            let started = Instant::now();
            let mut state =
                SessionState::new(informal_statement, formal_statement, iteration_limit);

            tracing::info!(iteration_limit, "Session started");
            self.emitter.emit(TrajectoryEvent::session_start(
                session_id.to_string(),
                iteration_limit,
            ));

            let outcome = self.proof_loop.drive(&mut state).await?;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            tracing::info!(
                %outcome,
                iteration = state.iteration_count,
                elapsed_ms,
                "Session finished"
            );

            Ok(SessionReport {
                session_id,
                outcome,
                prove_cycles: state.prove_cycles(),
                elapsed_ms,
                state,
            })
        }
        .instrument(span)
        .await
    }

    /// Run a dataset problem.
    pub async fn run_problem(&self, problem: &Problem, iteration_limit: u32) -> Result<SessionReport> {
        self.run_report(
            &problem.informal_statement,
            &problem.lean4_statement,
            iteration_limit,
        )
        .await
    }
}

impl std::fmt::Debug for SessionRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRunner")
            .field("proof_loop", &self.proof_loop)
            .finish_non_exhaustive()
    }
}

/// One problem's result within a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEntry {
    /// Position of the problem in the input.
    pub index: usize,
    pub problem_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<SessionReport>,
    /// Set when the session aborted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchEntry {
    fn from_result(index: usize, problem_id: String, result: Result<SessionReport>) -> Self {
        match result {
            Ok(report) => Self {
                index,
                problem_id,
                report: Some(report),
                error: None,
            },
            Err(e) => Self {
                index,
                problem_id,
                report: None,
                error: Some(e.to_string()),
            },
        }
    }

    pub fn outcome(&self) -> Option<SessionOutcome> {
        self.report.as_ref().map(|r| r.outcome)
    }
}

/// Batch counts by terminal outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub verified: usize,
    pub exhausted: usize,
    pub failed: usize,
}

/// Results of a batch, in input order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResults {
    pub entries: Vec<BatchEntry>,
    pub summary: BatchSummary,
}

impl BatchResults {
    fn from_entries(mut entries: Vec<BatchEntry>) -> Self {
        entries.sort_by_key(|e| e.index);
        let mut summary = BatchSummary {
            total: entries.len(),
            ..Default::default()
        };
        for entry in &entries {
            match entry.outcome() {
                Some(SessionOutcome::Verified) => summary.verified += 1,
                Some(SessionOutcome::Exhausted) => summary.exhausted += 1,
                None => summary.failed += 1,
            }
        }
        Self { entries, summary }
    }

    pub fn verified(&self) -> impl Iterator<Item = &BatchEntry> {
        self.entries
            .iter()
            .filter(|e| e.outcome() == Some(SessionOutcome::Verified))
    }

    pub fn failures(&self) -> impl Iterator<Item = &BatchEntry> {
        self.entries.iter().filter(|e| e.error.is_some())
    }
}

/// Runs many sessions in parallel, one per worker slot.
pub struct BatchRunner {
    slots: Vec<SessionRunner>,
}

impl BatchRunner {
    /// Create a batch runner; each runner must own its own verifier.
    pub fn new(slots: Vec<SessionRunner>) -> Result<Self> {
        if slots.is_empty() {
            return Err(Error::config("batch runner needs at least one worker slot"));
        }
        Ok(Self { slots })
    }

    pub fn workers(&self) -> usize {
        self.slots.len()
    }

    /// Run every problem; failed sessions are recorded and do not stop the batch.
    pub async fn run(&self, problems: &[Problem], iteration_limit: u32) -> BatchResults {
        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.slots.len()));
        let free_slots = Arc::new(Mutex::new((0..self.slots.len()).rev().collect::<Vec<_>>()));

        tracing::info!(
            problems = problems.len(),
            workers = self.slots.len(),
            "Batch started"
        );

        let tasks = problems.iter().enumerate().map(|(index, problem)| {
            let semaphore = Arc::clone(&semaphore);
            let free_slots = Arc::clone(&free_slots);
            async move {
                let result = match semaphore.acquire().await {
                    Ok(_permit) => {
                        // Permits equal slots, so a slot is free while a permit is held.
                        let slot = free_slots
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .pop();
                        match slot {
                            Some(slot) => {
                                tracing::debug!(index, slot, problem = %problem.problem_id, "Problem scheduled");
                                let result =
                                    self.slots[slot].run_problem(problem, iteration_limit).await;
                                free_slots
                                    .lock()
                                    .unwrap_or_else(PoisonError::into_inner)
                                    .push(slot);
                                result
                            }
                            None => Err(Error::Internal("no free worker slot".to_string())),
                        }
                    }
                    Err(e) => Err(Error::Internal(format!("batch scheduler closed: {}", e))),
                };

                if let Err(e) = &result {
                    tracing::warn!(index, problem = %problem.problem_id, error = %e, "Session aborted");
                }
                BatchEntry::from_result(index, problem.problem_id.clone(), result)
            }
        });

        let results = BatchResults::from_entries(join_all(tasks).await);
        tracing::info!(
            verified = results.summary.verified,
            exhausted = results.summary.exhausted,
            failed = results.summary.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Batch finished"
        );
        results
    }
}
