//! Governance Workflow Engine
//!
//! A durable, resumable state machine that drives software artifacts (GitHub issue
//! drafts, Low-Level Designs) through iterative rounds of generation, adversarial
//! review, and human gating until an approved terminal state is reached.
//!
//! # Components
//!
//! - [`lineage`]: append-only ordered artifact directory + structured audit log
//! - [`checkpoint`]: durable per-workflow state snapshots keyed by thread id
//! - [`llm`]: credential selection, rotation, retry, and output-shape coercion
//! - [`verdict`]: converts reviewer free-form output into a structured verdict
//! - [`graph`]: the node graph — drafter, reviewer, human gate, filer, finalizer
//! - [`human_gate`]: interactive prompt / auto-mode policy / checkpoint-preserving pause
//! - [`filer`]: publishes an approved artifact to an external issue tracker
//! - [`config`]: environment-driven configuration and logging initialization

#![allow(clippy::uninlined_format_args)]

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod filer;
pub mod graph;
pub mod human_gate;
pub mod lineage;
pub mod llm;
pub mod model;
pub mod verdict;

// Re-export error types
pub use error::{EngineError, EngineResult, PauseSignal};

// Re-export core data model types
pub use model::{AuditEvent, AuditLogEntry, Decision, Terminal, Verdict, WorkflowState, WorkflowType};

// Re-export configuration types
pub use config::{init_logging, EngineConfig};

// Re-export lineage store types
pub use lineage::{ArtifactKind, LineageStore};

// Re-export checkpoint store types
pub use checkpoint::CheckpointStore;

// Re-export LLM invoker types
pub use llm::{
    classify, BackoffConfig, CommandRunner, Credential, CredentialKind, CredentialPool,
    CredentialRegistry, ExhaustionRegistry, InvokeError, InvokeErrorClass, InvokeOutcome,
    InvokeRequest, LlmInvoker, NoopSleeper, OutputShape, RealSleeper, Sleeper, SubprocessOutcome,
    SubprocessRunner,
};

// Re-export verdict parser entry point
pub use verdict::parse_verdict;

// Re-export workflow graph types
pub use graph::{Drafter, FilerPort, HumanGatePort, LlmDrafter, LlmReviewer, Node, Orchestrator, ReviewOutcome, Reviewer, Transition};

// Re-export human gate types
pub use human_gate::{AutoDecision, GateChoice, HumanGate, Prompter, RouteDecision, ScriptedPrompter, StdioPrompter};

// Re-export filer adapter types
pub use filer::{CommandTrackerRunner, FilerAdapter, TrackerRunner};
