//! External Lean checker invoked as a subprocess.
//!
//! Each check writes the candidate into a single scratch file inside the Lean
//! workspace and runs `lake env lean <scratch>` (configurable) against it with
//! a wall-clock timeout. Checker-side failures (rejection, timeout, missing
//! binary) are reported as a failed [`CheckOutcome`], never as an error.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::stage::Verification;

/// Prefix of the log produced when the checker does not finish in time.
///
/// A checked program can print this text too, so tell timeouts apart by
/// [`CheckOutcome::status`] or [`Verification::timed_out`], not by the log.
pub const TIMEOUT_LOG_PREFIX: &str = "Timeout: checker did not finish within";

/// Prefix of the log produced when the checker process cannot be started.
pub const LAUNCH_ERROR_LOG_PREFIX: &str = "Error launching checker";

/// Configuration for the Lean checker subprocess.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckerConfig {
    /// Lean project root (containing the lakefile); working directory of the checker.
    pub workspace_root: PathBuf,
    /// Scratch file the candidate is written to, relative to the workspace
    /// unless absolute.
    pub scratch_file: PathBuf,
    /// Checker command; the scratch file path is appended as the last argument.
    pub command: Vec<String>,
    /// Wall-clock limit for one check.
    pub timeout: Duration,
    /// Strip common indentation and surrounding whitespace before writing.
    pub normalize_source: bool,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("lean_workspace"),
            scratch_file: PathBuf::from("TmpCheck.lean"),
            command: vec!["lake".to_string(), "env".to_string(), "lean".to_string()],
            timeout: Duration::from_secs(60),
            normalize_source: true,
        }
    }
}

impl CheckerConfig {
    /// Create a config rooted at a Lean workspace.
    pub fn with_workspace(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            ..Default::default()
        }
    }

    /// Set the scratch file.
    pub fn with_scratch_file(mut self, scratch_file: impl Into<PathBuf>) -> Self {
        self.scratch_file = scratch_file.into();
        self
    }

    /// Set the checker command.
    pub fn with_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    /// Set the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enable or disable source normalization.
    pub fn with_normalize_source(mut self, normalize: bool) -> Self {
        self.normalize_source = normalize;
        self
    }

    /// Derive a config with a scratch file private to one worker slot.
    ///
    /// `TmpCheck.lean` becomes `TmpCheck_3.lean` for slot 3.
    pub fn for_slot(&self, slot: usize) -> Self {
        let stem = self
            .scratch_file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "TmpCheck".to_string());
        let file_name = match self.scratch_file.extension() {
            Some(ext) => format!("{}_{}.{}", stem, slot, ext.to_string_lossy()),
            None => format!("{}_{}", stem, slot),
        };
        Self {
            scratch_file: self.scratch_file.with_file_name(file_name),
            ..self.clone()
        }
    }

    /// Absolute-or-workspace-relative scratch path.
    pub fn scratch_path(&self) -> PathBuf {
        if self.scratch_file.is_absolute() {
            self.scratch_file.clone()
        } else {
            self.workspace_root.join(&self.scratch_file)
        }
    }

    /// Check the configuration without touching the scratch file.
    pub fn validate(&self) -> Result<()> {
        if self.command.is_empty() || self.command[0].trim().is_empty() {
            return Err(Error::config("checker command must not be empty"));
        }
        if self.timeout.is_zero() {
            return Err(Error::config("checker timeout must be greater than zero"));
        }
        if !self.workspace_root.is_dir() {
            return Err(Error::config(format!(
                "checker workspace {} is not a directory",
                self.workspace_root.display()
            )));
        }
        if self.scratch_file.as_os_str().is_empty() {
            return Err(Error::config("checker scratch file must not be empty"));
        }
        Ok(())
    }
}

/// How a check ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum CheckStatus {
    /// Checker exited with status 0.
    Passed,
    /// Checker exited with a non-zero status (or was killed by a signal).
    Rejected { exit_code: Option<i32> },
    /// Checker did not finish before the timeout and was killed.
    TimedOut,
    /// Checker process could not be started.
    LaunchFailed,
    /// Checker started but its output could not be collected.
    ProcessError,
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::Rejected {
                exit_code: Some(code),
            } => write!(f, "rejected(exit {})", code),
            Self::Rejected { exit_code: None } => write!(f, "rejected(signal)"),
            Self::TimedOut => write!(f, "timed_out"),
            Self::LaunchFailed => write!(f, "launch_failed"),
            Self::ProcessError => write!(f, "process_error"),
        }
    }
}

/// Result of one checker run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub status: CheckStatus,
    /// Combined stdout and stderr, or a fixed diagnostic for timeout/launch failures.
    pub log: String,
    pub elapsed_ms: u64,
}

impl CheckOutcome {
    /// Whether the checker accepted the source.
    pub fn success(&self) -> bool {
        self.status == CheckStatus::Passed
    }

    /// Whether the checker was killed for exceeding the timeout.
    pub fn is_timeout(&self) -> bool {
        self.status == CheckStatus::TimedOut
    }
}

impl From<CheckOutcome> for Verification {
    fn from(outcome: CheckOutcome) -> Self {
        Verification {
            success: outcome.success(),
            timed_out: outcome.is_timeout(),
            log: outcome.log,
        }
    }
}

/// Lean checker bound to one scratch file.
///
/// At most one check is in flight per instance; concurrent callers queue on
/// the scratch slot. Concurrent sessions should use separate instances
/// (see [`CheckerConfig::for_slot`]).
#[derive(Debug)]
pub struct LeanChecker {
    config: CheckerConfig,
    slot: Mutex<()>,
}

impl LeanChecker {
    /// Create a checker, validating the configuration up front.
    pub fn new(config: CheckerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            slot: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &CheckerConfig {
        &self.config
    }

    pub fn scratch_path(&self) -> PathBuf {
        self.config.scratch_path()
    }

    /// Write `source` to the scratch file and run the checker on it.
    ///
    /// Returns `Err` only when the scratch file cannot be prepared.
    pub async fn check(&self, source: &str) -> Result<CheckOutcome> {
        let _slot = self.slot.lock().await;

        let scratch = self.scratch_path();
        if let Some(parent) = scratch.parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                return Err(Error::config(format!(
                    "scratch directory {} does not exist",
                    parent.display()
                )));
            }
        }

        let text = if self.config.normalize_source {
            normalize_source(source)
        } else {
            source.to_string()
        };
        tokio::fs::write(&scratch, text.as_bytes()).await?;

        Ok(self.run_checker(&scratch).await)
    }

    async fn run_checker(&self, scratch: &Path) -> CheckOutcome {
        let started = Instant::now();
        let program = &self.config.command[0];

        tracing::debug!(
            program = %program,
            scratch = %scratch.display(),
            timeout_secs = self.config.timeout.as_secs_f64(),
            "Running Lean checker"
        );

        let spawned = Command::new(program)
            .args(&self.config.command[1..])
            .arg(scratch)
            .current_dir(&self.config.workspace_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match spawned {
            Ok(child) => child,
            Err(e) => {
                let log = launch_error_message(program, &e);
                tracing::warn!(program = %program, error = %e, "Failed to launch checker");
                return finish(CheckStatus::LaunchFailed, log, started);
            }
        };

        // Dropping the wait future on timeout drops the child, which kills it.
        match timeout(self.config.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let mut log = String::from_utf8_lossy(&output.stdout).into_owned();
                log.push_str(&String::from_utf8_lossy(&output.stderr));
                let status = if output.status.success() {
                    CheckStatus::Passed
                } else {
                    CheckStatus::Rejected {
                        exit_code: output.status.code(),
                    }
                };
                finish(status, log, started)
            }
            Ok(Err(e)) => {
                tracing::warn!(program = %program, error = %e, "Checker process failed");
                finish(
                    CheckStatus::ProcessError,
                    format!("Error running checker `{}`: {}", program, e),
                    started,
                )
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.config.timeout.as_secs_f64(),
                    "Checker timed out"
                );
                finish(
                    CheckStatus::TimedOut,
                    timeout_message(self.config.timeout),
                    started,
                )
            }
        }
    }
}

fn finish(status: CheckStatus, log: String, started: Instant) -> CheckOutcome {
    CheckOutcome {
        status,
        log,
        elapsed_ms: started.elapsed().as_millis() as u64,
    }
}

/// Fixed diagnostic for a checker that exceeded its timeout.
pub fn timeout_message(limit: Duration) -> String {
    let secs = limit.as_secs_f64();
    if secs.fract() == 0.0 {
        format!("{} {} seconds", TIMEOUT_LOG_PREFIX, limit.as_secs())
    } else {
        format!("{} {:.3} seconds", TIMEOUT_LOG_PREFIX, secs)
    }
}

fn launch_error_message(program: &str, err: &std::io::Error) -> String {
    let mut message = format!("{} `{}`: {}", LAUNCH_ERROR_LOG_PREFIX, program, err);
    let bare_name = !program.contains(std::path::MAIN_SEPARATOR) && !program.contains('/');
    if bare_name && which::which(program).is_err() {
        message.push_str(&format!(" (`{}` was not found in PATH)", program));
    }
    message
}

/// Remove common leading indentation and surrounding blank space.
pub fn normalize_source(source: &str) -> String {
    textwrap::dedent(source).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    fn sh_checker(dir: &TempDir, timeout: Duration) -> LeanChecker {
        let config = CheckerConfig::with_workspace(dir.path())
            .with_scratch_file("TmpCheck.sh")
            .with_command(["sh"])
            .with_timeout(timeout);
        LeanChecker::new(config).unwrap()
    }

    #[test]
    fn test_config_defaults() {
        let config = CheckerConfig::default();
        assert_eq!(config.command, vec!["lake", "env", "lean"]);
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.scratch_file, PathBuf::from("TmpCheck.lean"));
        assert!(config.normalize_source);
    }

    #[test]
    fn test_for_slot_gives_distinct_scratch_files() {
        let config = CheckerConfig::with_workspace("/ws").with_scratch_file("tmp/TmpCheck.lean");

        assert_eq!(
            config.for_slot(0).scratch_path(),
            PathBuf::from("/ws/tmp/TmpCheck_0.lean")
        );
        assert_eq!(
            config.for_slot(7).scratch_path(),
            PathBuf::from("/ws/tmp/TmpCheck_7.lean")
        );
        assert_eq!(config.for_slot(7).workspace_root, config.workspace_root);
    }

    #[test]
    fn test_validate_rejects_bad_setup() {
        let dir = tempdir().unwrap();

        let missing = CheckerConfig::with_workspace(dir.path().join("nope"));
        assert!(matches!(missing.validate(), Err(Error::Config(_))));

        let empty_cmd = CheckerConfig::with_workspace(dir.path()).with_command(Vec::<String>::new());
        assert!(matches!(empty_cmd.validate(), Err(Error::Config(_))));

        let zero_timeout = CheckerConfig::with_workspace(dir.path()).with_timeout(Duration::ZERO);
        assert!(matches!(LeanChecker::new(zero_timeout), Err(Error::Config(_))));

        assert!(CheckerConfig::with_workspace(dir.path()).validate().is_ok());
    }

    #[test]
    fn test_normalize_source() {
        let source = "\n    theorem t : 1 = 1 := by\n      rfl\n    ";
        assert_eq!(normalize_source(source), "theorem t : 1 = 1 := by\n  rfl");
    }

    #[test]
    fn test_timeout_message_is_fixed_text() {
        assert_eq!(
            timeout_message(Duration::from_secs(60)),
            "Timeout: checker did not finish within 60 seconds"
        );
        assert!(timeout_message(Duration::from_millis(250)).starts_with(TIMEOUT_LOG_PREFIX));
    }

    #[tokio::test]
    async fn test_check_passes_on_zero_exit() {
        let dir = tempdir().unwrap();
        let checker = sh_checker(&dir, Duration::from_secs(10));

        let outcome = checker.check("echo 'no errors'\nexit 0").await.unwrap();

        assert!(outcome.success());
        assert_eq!(outcome.status, CheckStatus::Passed);
        assert!(outcome.log.contains("no errors"));
    }

    #[tokio::test]
    async fn test_check_rejects_and_combines_streams() {
        let dir = tempdir().unwrap();
        let checker = sh_checker(&dir, Duration::from_secs(10));

        let outcome = checker
            .check("echo 'from stdout'\necho 'from stderr' >&2\nexit 1")
            .await
            .unwrap();

        assert!(!outcome.success());
        assert_eq!(outcome.status, CheckStatus::Rejected { exit_code: Some(1) });
        let stdout_at = outcome.log.find("from stdout").unwrap();
        let stderr_at = outcome.log.find("from stderr").unwrap();
        assert!(stdout_at < stderr_at);
        assert!(!outcome.log.starts_with(TIMEOUT_LOG_PREFIX));
    }

    #[tokio::test]
    async fn test_check_writes_normalized_source_to_scratch() {
        let dir = tempdir().unwrap();
        let checker = sh_checker(&dir, Duration::from_secs(10));

        checker.check("\n    exit 0\n    ").await.unwrap();

        let written = std::fs::read_to_string(checker.scratch_path()).unwrap();
        assert_eq!(written, "exit 0");
    }

    #[tokio::test]
    async fn test_check_times_out_with_fixed_diagnostic() {
        let dir = tempdir().unwrap();
        let checker = sh_checker(&dir, Duration::from_millis(200));

        let outcome = checker
            .check("echo 'Timeout: checker did not finish'\nsleep 5")
            .await
            .unwrap();

        assert!(!outcome.success());
        assert!(outcome.is_timeout());
        assert_eq!(outcome.log, timeout_message(Duration::from_millis(200)));
        assert!(outcome.elapsed_ms < 5_000);
    }

    #[tokio::test]
    async fn test_missing_binary_is_failed_check_not_error() {
        let dir = tempdir().unwrap();
        let config = CheckerConfig::with_workspace(dir.path())
            .with_command(["proof-loop-no-such-checker-binary"]);
        let checker = LeanChecker::new(config).unwrap();

        let outcome = checker.check("theorem t : True := trivial").await.unwrap();

        assert!(!outcome.success());
        assert_eq!(outcome.status, CheckStatus::LaunchFailed);
        assert!(outcome.log.starts_with(LAUNCH_ERROR_LOG_PREFIX));
        assert!(outcome.log.contains("proof-loop-no-such-checker-binary"));
    }

    #[tokio::test]
    async fn test_missing_scratch_directory_is_config_error() {
        let dir = tempdir().unwrap();
        let config = CheckerConfig::with_workspace(dir.path())
            .with_scratch_file("missing/TmpCheck.lean")
            .with_command(["sh"]);
        let checker = LeanChecker::new(config).unwrap();

        let result = checker.check("exit 0").await;

        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_check_is_idempotent() {
        let dir = tempdir().unwrap();
        let checker = sh_checker(&dir, Duration::from_secs(10));
        let source = "test -f TmpCheck.sh || exit 3\nexit 2";

        let first = checker.check(source).await.unwrap();
        let second = checker.check(source).await.unwrap();

        assert_eq!(first.success(), second.success());
        assert_eq!(first.status, second.status);
        assert_eq!(first.status, CheckStatus::Rejected { exit_code: Some(2) });
    }

    #[tokio::test]
    async fn test_outcome_converts_to_verification() {
        let dir = tempdir().unwrap();
        let checker = sh_checker(&dir, Duration::from_secs(10));

        let verification: Verification = checker.check("echo ok").await.unwrap().into();

        assert!(verification.success);
        assert!(!verification.timed_out);
        assert!(verification.log.contains("ok"));
    }

    #[tokio::test]
    async fn test_printed_timeout_text_is_not_a_timeout() {
        let dir = tempdir().unwrap();
        let limit = Duration::from_millis(200);
        let checker = sh_checker(&dir, limit);
        let fake = format!("printf '%s' '{}'\nexit 1", timeout_message(limit));

        let real: Verification = checker.check("sleep 5").await.unwrap().into();
        let printed: Verification = checker.check(&fake).await.unwrap().into();

        assert!(real.timed_out);
        assert!(!printed.timed_out);
        assert!(!real.success && !printed.success);
        assert!(printed.log.starts_with(TIMEOUT_LOG_PREFIX));
        assert_ne!(real, printed);
    }
}
