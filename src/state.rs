//! Session state threaded through the proof loop.
//!
//! A [`SessionState`] is created once per problem, owned by the orchestrator
//! while the loop runs, and handed back to the caller at termination. Stages
//! never touch it directly: the orchestrator turns each stage's output into a
//! [`StateUpdate`] restricted to the fields that stage is allowed to write,
//! and merges it with [`SessionState::apply`].

use serde::{Deserialize, Serialize};

use crate::stage::Verification;

/// Hint recorded when the critic returns no feedback.
pub const EMPTY_CRITIQUE_HINT: &str =
    "The previous proof failed verification. The critic gave no specific feedback.";

/// Terminal outcome of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    /// The checker accepted the current candidate.
    Verified,
    /// The retry budget ran out; the state carries the last failing attempt.
    Exhausted,
}

impl std::fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Verified => write!(f, "verified"),
            Self::Exhausted => write!(f, "exhausted"),
        }
    }
}

/// Mutable record of one proof attempt sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    /// Natural-language problem statement.
    pub informal_statement: String,
    /// Formal (Lean 4) theorem statement.
    pub formal_statement: String,
    /// Proof plan; written once by the Plan stage.
    pub plan: String,
    /// Most recent proof candidate.
    pub candidate: String,
    /// Whether the checker accepted `candidate`.
    pub verify_success: bool,
    /// Checker diagnostics for `candidate`.
    pub verify_log: String,
    /// Feedback from the most recent critique.
    pub critic_hint: String,
    /// Number of completed critique invocations.
    pub iteration_count: u32,
    /// Maximum number of critique invocations.
    pub iteration_limit: u32,
}

impl SessionState {
    /// Create a fresh session with every mutable field empty.
    pub fn new(
        informal_statement: impl Into<String>,
        formal_statement: impl Into<String>,
        iteration_limit: u32,
    ) -> Self {
        Self {
            informal_statement: informal_statement.into(),
            formal_statement: formal_statement.into(),
            plan: String::new(),
            candidate: String::new(),
            verify_success: false,
            verify_log: String::new(),
            critic_hint: String::new(),
            iteration_count: 0,
            iteration_limit,
        }
    }

    /// Merge a partial update. Fields absent from the update are left as-is.
    pub fn apply(&mut self, update: StateUpdate) {
        if let Some(plan) = update.plan {
            self.plan = plan;
        }
        if let Some(candidate) = update.candidate {
            self.candidate = candidate;
        }
        if let Some(success) = update.verify_success {
            self.verify_success = success;
        }
        if let Some(log) = update.verify_log {
            self.verify_log = log;
        }
        if let Some(hint) = update.critic_hint {
            self.critic_hint = hint;
        }
        if let Some(count) = update.iteration_count {
            self.iteration_count = count;
        }
    }

    /// Critic hint to forward to the prover, `None` before the first critique.
    pub fn critic_hint(&self) -> Option<&str> {
        if self.critic_hint.is_empty() {
            None
        } else {
            Some(&self.critic_hint)
        }
    }

    /// Whether another critique is allowed under the iteration limit.
    pub fn has_retries_left(&self) -> bool {
        self.iteration_count < self.iteration_limit
    }

    /// Number of prove/verify cycles a terminated session has performed.
    pub fn prove_cycles(&self) -> u32 {
        self.iteration_count + 1
    }

    /// Outcome implied by the current fields.
    ///
    /// Only meaningful once the loop has terminated; mid-loop a failing
    /// state with retries left reports `None`.
    pub fn outcome(&self) -> Option<SessionOutcome> {
        if self.verify_success {
            Some(SessionOutcome::Verified)
        } else if !self.candidate.is_empty() && !self.has_retries_left() {
            Some(SessionOutcome::Exhausted)
        } else {
            None
        }
    }
}

/// Typed partial update to a [`SessionState`].
///
/// Each slot is optional; `None` leaves the field unchanged. The per-stage
/// constructors fix which fields a stage may write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateUpdate {
    pub plan: Option<String>,
    pub candidate: Option<String>,
    pub verify_success: Option<bool>,
    pub verify_log: Option<String>,
    pub critic_hint: Option<String>,
    pub iteration_count: Option<u32>,
}

impl StateUpdate {
    /// Plan stage output.
    pub fn plan(plan: impl Into<String>) -> Self {
        Self {
            plan: Some(plan.into()),
            ..Self::default()
        }
    }

    /// Prove stage output.
    ///
    /// A new candidate invalidates the previous verification, so the update
    /// also resets `verify_success` and `verify_log`.
    pub fn candidate(candidate: impl Into<String>) -> Self {
        Self {
            candidate: Some(candidate.into()),
            verify_success: Some(false),
            verify_log: Some(String::new()),
            ..Self::default()
        }
    }

    /// Verify stage output.
    pub fn verification(verification: Verification) -> Self {
        Self {
            verify_success: Some(verification.success),
            verify_log: Some(verification.log),
            ..Self::default()
        }
    }

    /// Critique stage output along with the advanced iteration counter.
    ///
    /// A blank hint is replaced by [`EMPTY_CRITIQUE_HINT`] so the next prove
    /// attempt still reads as a retry.
    pub fn critique(critic_hint: impl Into<String>, iteration_count: u32) -> Self {
        let hint = critic_hint.into();
        let hint = if hint.trim().is_empty() {
            EMPTY_CRITIQUE_HINT.to_string()
        } else {
            hint
        };
        Self {
            critic_hint: Some(hint),
            iteration_count: Some(iteration_count),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> SessionState {
        SessionState::new("1 + 1 = 2", "theorem t : 1 + 1 = 2 := by sorry", 3)
    }

    #[test]
    fn test_new_state_is_empty() {
        let state = sample();

        assert_eq!(state.plan, "");
        assert_eq!(state.candidate, "");
        assert!(!state.verify_success);
        assert_eq!(state.verify_log, "");
        assert_eq!(state.critic_hint, "");
        assert_eq!(state.iteration_count, 0);
        assert_eq!(state.iteration_limit, 3);
        assert_eq!(state.critic_hint(), None);
        assert_eq!(state.outcome(), None);
    }

    #[test]
    fn test_apply_only_touches_present_fields() {
        let mut state = sample();
        state.apply(StateUpdate::plan("use norm_num"));
        state.apply(StateUpdate::critique("try simp", 1));

        let mut expected = sample();
        expected.plan = "use norm_num".to_string();
        expected.critic_hint = "try simp".to_string();
        expected.iteration_count = 1;
        assert_eq!(state, expected);
    }

    #[test]
    fn test_apply_is_last_writer_wins() {
        let mut state = sample();
        state.apply(StateUpdate::candidate("a"));
        state.apply(StateUpdate::candidate("c"));

        assert_eq!(state.candidate, "c");
    }

    #[test]
    fn test_empty_update_is_noop() {
        let mut state = sample();
        state.apply(StateUpdate::default());
        assert_eq!(state, sample());
    }

    #[test]
    fn test_candidate_update_resets_verification() {
        let mut state = sample();
        state.apply(StateUpdate::candidate("by rfl"));
        state.apply(StateUpdate::verification(Verification::failed("type mismatch")));
        assert_eq!(state.verify_log, "type mismatch");

        state.apply(StateUpdate::candidate("by norm_num"));
        assert_eq!(state.candidate, "by norm_num");
        assert!(!state.verify_success);
        assert_eq!(state.verify_log, "");
    }

    #[test]
    fn test_critique_update_advances_counter() {
        let mut state = sample();
        state.apply(StateUpdate::critique("missing import", 1));

        assert_eq!(state.critic_hint(), Some("missing import"));
        assert_eq!(state.iteration_count, 1);
        assert!(state.has_retries_left());
    }

    #[test]
    fn test_blank_critique_still_marks_retry() {
        let mut state = sample();
        state.apply(StateUpdate::critique("  \n", 1));

        assert_eq!(state.critic_hint(), Some(EMPTY_CRITIQUE_HINT));
        assert_eq!(state.iteration_count, 1);
    }

    #[test]
    fn test_outcome_after_termination() {
        let mut verified = sample();
        verified.apply(StateUpdate::candidate("by norm_num"));
        verified.apply(StateUpdate::verification(Verification::passed("")));
        assert_eq!(verified.outcome(), Some(SessionOutcome::Verified));

        let mut exhausted = SessionState::new("p", "q", 0);
        exhausted.apply(StateUpdate::candidate("by sorry"));
        exhausted.apply(StateUpdate::verification(Verification::failed("error")));
        assert_eq!(exhausted.outcome(), Some(SessionOutcome::Exhausted));
        assert_eq!(exhausted.prove_cycles(), 1);
    }

    #[test]
    fn test_state_serde_roundtrip() {
        let mut state = sample();
        state.apply(StateUpdate::plan("plan"));
        let json = serde_json::to_string(&state).unwrap();
        let back: SessionState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
