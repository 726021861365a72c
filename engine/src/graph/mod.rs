//! Workflow Graph (C5): node set, edge table, and the driving orchestrator.

pub mod node;
pub mod orchestrator;

pub use node::{Node, Transition};
pub use orchestrator::{Drafter, FilerPort, HumanGatePort, LlmDrafter, LlmReviewer, Orchestrator, ReviewOutcome, Reviewer};
