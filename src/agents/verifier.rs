use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::lean::{CheckerConfig, LeanChecker};
use crate::stage::{Verification, Verifier};

/// Verifier backed by the external Lean checker.
pub struct CheckerVerifier {
    checker: Arc<LeanChecker>,
}

impl CheckerVerifier {
    pub fn new(checker: Arc<LeanChecker>) -> Self {
        Self { checker }
    }

    /// Validate `config` and build a verifier owning its own checker.
    pub fn from_config(config: CheckerConfig) -> Result<Self> {
        Ok(Self::new(Arc::new(LeanChecker::new(config)?)))
    }

    pub fn checker(&self) -> &LeanChecker {
        &self.checker
    }
}

#[async_trait]
impl Verifier for CheckerVerifier {
    async fn verify(&self, candidate: &str) -> Result<Verification> {
        let outcome = self.checker.check(candidate).await?;
        tracing::debug!(
            status = ?outcome.status,
            elapsed_ms = outcome.elapsed_ms,
            "Checker finished"
        );
        Ok(outcome.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::testing::{stages, ScriptedStages};
    use crate::orchestrator::ProofLoop;
    use crate::state::{SessionOutcome, SessionState};
    use std::time::Duration;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_verify_runs_checker() {
        let dir = tempdir().unwrap();
        let config = CheckerConfig::with_workspace(dir.path())
            .with_scratch_file("TmpCheck.sh")
            .with_command(["sh"])
            .with_timeout(Duration::from_secs(10));
        let verifier = CheckerVerifier::from_config(config).unwrap();

        let passed = verifier.verify("echo ok").await.unwrap();
        assert!(passed.success);
        assert_eq!(passed.log, "ok\n");

        let rejected = verifier.verify("echo bad >&2; exit 1").await.unwrap();
        assert!(!rejected.success);
        assert_eq!(rejected.log, "bad\n");
    }

    #[tokio::test]
    async fn test_absent_checker_drives_critique_path() {
        let dir = tempdir().unwrap();
        let config = CheckerConfig::with_workspace(dir.path())
            .with_command(["proof-loop-no-such-checker-binary"]);
        let verifier = Arc::new(CheckerVerifier::from_config(config).unwrap());

        let script = ScriptedStages::always(true);
        let proof_loop = ProofLoop::new(stages(&script).with_verifier(verifier));
        let mut state = SessionState::new("informal", "theorem t : True", 1);

        let outcome = proof_loop.drive(&mut state).await.unwrap();

        assert_eq!(outcome, SessionOutcome::Exhausted);
        assert!(!state.verify_success);
        assert!(state.verify_log.starts_with(crate::lean::LAUNCH_ERROR_LOG_PREFIX));
        assert_eq!(ScriptedStages::count(&script.critique_calls), 1);
        assert_eq!(state.iteration_count, 1);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = CheckerConfig::with_workspace("/definitely/not/a/workspace");
        assert!(CheckerVerifier::from_config(config).is_err());
    }
}
