//! Lean 4 integration for formal verification.
//!
//! Candidates are checked by running the Lean toolchain on a scratch file
//! inside a Lake workspace.
//!
//! ## Components
//!
//! - **checker**: subprocess adapter with timeout and output normalization

pub mod checker;

pub use checker::{
    normalize_source, timeout_message, CheckOutcome, CheckStatus, CheckerConfig, LeanChecker,
    LAUNCH_ERROR_LOG_PREFIX, TIMEOUT_LOG_PREFIX,
};
