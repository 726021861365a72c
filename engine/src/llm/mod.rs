//! LLM Invoker (C3).

pub mod backoff;
pub mod credential;
pub mod invoker;

pub use backoff::BackoffConfig;
pub use credential::{Credential, CredentialKind, CredentialPool, CredentialRegistry, ExhaustionRegistry};
pub use invoker::{
    classify, CommandRunner, InvokeError, InvokeErrorClass, InvokeOutcome, InvokeRequest, LlmInvoker,
    NoopSleeper, OutputShape, RealSleeper, Sleeper, SubprocessOutcome, SubprocessRunner,
};
