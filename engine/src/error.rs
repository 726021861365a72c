//! Unified error taxonomy for the engine.
//!
//! `EngineError` is the surface every node-level operation returns. Transient LLM errors
//! live in a separate [`crate::llm::InvokeError`] so the retry loop's match arms stay
//! exhaustive without bleeding into fatal/gate-error handling here.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

/// The cooperative interrupt a node raises to pause the workflow (§4.2, §4.6).
///
/// This is distinguished from every other error: returning normally from a node marks it
/// complete in the checkpoint sense, so "save and exit" can never be expressed as a plain
/// `Ok(())` return. Callers that catch `EngineError::Paused` must NOT advance `next_node`.
#[derive(Debug, Clone, Serialize)]
pub struct PauseSignal {
    pub node: String,
    pub reason: String,
}

#[derive(Error, Debug)]
pub enum EngineError {
    /// The cooperative pause signal (§4.2). Not a failure; unwinds the current node only.
    #[error("workflow paused at {node}: {reason}")]
    Paused { node: String, reason: String },

    #[error("lineage directory not found: {path}")]
    LineageDirMissing { path: PathBuf },

    #[error("lineage write failed for {kind} in {dir}: {message}")]
    LineageWriteFailed {
        dir: PathBuf,
        kind: String,
        message: String,
    },

    #[error("checkpoint store error: {message}")]
    CheckpointError { message: String },

    #[error("all credentials exhausted, no retry remaining")]
    CredentialsExhausted,

    #[error("missing reviewer prompt file: {path}")]
    MissingPromptFile { path: PathBuf },

    #[error("maximum iterations ({max}) reached without approval")]
    MaxIterationsReached { max: u32 },

    #[error("operator aborted the workflow")]
    UserAbort,

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("empty input content at ingest")]
    EmptyInput,

    #[error("filer operation failed: {message}")]
    FilerFailed { message: String },

    /// Surfaced from C3 once an `api_error`'s single retry is also exhausted (§4.3, §7);
    /// kept separate from `CredentialsExhausted` since the credential pool itself may
    /// still have unexhausted entries.
    #[error("llm invocation failed: {message}")]
    LlmInvocationFailed { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// A single-line remediation hint, never a stack trace (§7).
    pub fn remediation_hint(&self) -> String {
        match self {
            EngineError::CredentialsExhausted => {
                "auth: all configured credentials are exhausted; add a credential or wait for reset".to_string()
            }
            EngineError::MissingPromptFile { path } => {
                format!("config: reviewer prompt file missing at {}", path.display())
            }
            EngineError::MaxIterationsReached { max } => {
                format!("review: {max} iterations reached without approval; inspect the lineage and restart or abandon")
            }
            EngineError::UserAbort => "operator aborted; lineage left under active/".to_string(),
            EngineError::LlmInvocationFailed { .. } => {
                "llm: invocation failed after retry; inspect the llm-api log".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Short machine-readable reason code for the audit `error` event's `details.reason`.
    pub fn reason_code(&self) -> &'static str {
        match self {
            EngineError::Paused { .. } => "paused",
            EngineError::LineageDirMissing { .. } => "lineage_dir_missing",
            EngineError::LineageWriteFailed { .. } => "lineage_write_failed",
            EngineError::CheckpointError { .. } => "checkpoint_error",
            EngineError::CredentialsExhausted => "credentials_exhausted",
            EngineError::MissingPromptFile { .. } => "missing_prompt_file",
            EngineError::MaxIterationsReached { .. } => "max_iterations",
            EngineError::UserAbort => "user_abort",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::EmptyInput => "empty_input",
            EngineError::FilerFailed { .. } => "filer_failed",
            EngineError::LlmInvocationFailed { .. } => "llm_invocation_failed",
            EngineError::Io(_) => "io_error",
            EngineError::Json(_) => "json_error",
        }
    }
}
