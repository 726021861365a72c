//! LLM Invoker (C3): the single-call primitive hiding credential rotation, retry, and
//! output-shape coercion behind one function.
//!
//! §4.3's error taxonomy is classified "from the external tool's stderr and exit code,"
//! which is a subprocess contract rather than an HTTP one; this implementation wraps an
//! external CLI tool via `std::process::Command`, following the list-form,
//! never-via-shell invocation style used elsewhere in this crate for subprocess calls.

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use super::backoff::BackoffConfig;
use super::credential::{Credential, CredentialPool};

/// §4.3's error taxonomy, classified from subprocess stderr + exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeErrorClass {
    CapacityExhausted,
    QuotaExhausted,
    RateLimited,
    AuthError,
    ModelDowngrade,
    ApiError,
}

/// Transient/fatal errors internal to the invocation loop. Kept separate from
/// [`crate::error::EngineError`] so the taxonomy here can stay exhaustive; only
/// [`InvokeError::AllCredentialsExhausted`] and [`InvokeError::Fatal`] ever escape C3.
#[derive(Error, Debug)]
pub enum InvokeError {
    #[error("all credentials exhausted")]
    AllCredentialsExhausted,
    #[error("fatal invocation error: {0}")]
    Fatal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputShape {
    Text,
    Json,
}

pub struct InvokeRequest<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub shape: OutputShape,
}

#[derive(Debug, Clone)]
pub struct InvokeOutcome {
    pub text: String,
    pub model_used: String,
    pub credential_used: String,
    /// Set when structured output was requested but neither attempt produced valid JSON
    /// (§4.3); the caller (C4) decides how to fail closed.
    pub parse_failure: bool,
}

/// Raw result of one subprocess invocation, before classification.
#[derive(Debug, Clone)]
pub struct SubprocessOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// The model identity the tool claims to have used, if it reports one.
    pub reported_model: Option<String>,
}

/// Abstraction over the actual subprocess call so the retry/rotation logic is testable
/// without spawning a real external tool.
pub trait SubprocessRunner {
    fn run(&self, credential: &Credential, model: &str, prompt: &str) -> std::io::Result<SubprocessOutcome>;
}

/// Runs the configured tracker-CLI-style binary with list-form arguments (never a shell),
/// mirroring the subprocess-invocation convention used by the Filer Adapter.
pub struct CommandRunner {
    pub program: String,
    pub extra_args: Vec<String>,
}

impl SubprocessRunner for CommandRunner {
    fn run(&self, credential: &Credential, model: &str, prompt: &str) -> std::io::Result<SubprocessOutcome> {
        let mut command = std::process::Command::new(&self.program);
        command
            .args(&self.extra_args)
            .arg("--model")
            .arg(model)
            .arg("--credential")
            .arg(&credential.name)
            .arg("--prompt")
            .arg(prompt);
        let output = command.output()?;
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let reported_model = parse_reported_model(&stderr);
        Ok(SubprocessOutcome {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr,
            exit_code: output.status.code().unwrap_or(-1),
            reported_model,
        })
    }
}

/// Extracts the model identity the tool claims to have used from a `model=<name>` line on
/// stderr, so §4.3's model-identity verification has something to check on the success
/// path too (keeping stdout free for the raw response text/JSON).
fn parse_reported_model(stderr: &str) -> Option<String> {
    stderr.lines().find_map(|line| {
        let line = line.trim();
        line.strip_prefix("model=")
            .or_else(|| line.strip_prefix("MODEL="))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

/// Abstraction over waiting, so backoff sleeps are instant in tests.
pub trait Sleeper {
    fn sleep(&self, duration: std::time::Duration);
}

pub struct RealSleeper;
impl Sleeper for RealSleeper {
    fn sleep(&self, duration: std::time::Duration) {
        std::thread::sleep(duration);
    }
}

pub struct NoopSleeper;
impl Sleeper for NoopSleeper {
    fn sleep(&self, _duration: std::time::Duration) {}
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
enum ObservabilityEvent {
    Attempt,
    Success,
    QuotaExhausted,
    CapacityExhausted,
    RateLimited,
    CredentialRotated,
    AuthError,
    AllExhausted,
}

#[derive(Debug, Clone, Serialize)]
struct LogRecord {
    timestamp: chrono::DateTime<Utc>,
    event: ObservabilityEvent,
    credential: String,
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reset_time: Option<chrono::DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

pub struct LlmInvoker<R: SubprocessRunner, S: Sleeper> {
    pool: CredentialPool,
    runner: R,
    sleeper: S,
    backoff: BackoffConfig,
    log_path: Option<PathBuf>,
}

impl<R: SubprocessRunner, S: Sleeper> LlmInvoker<R, S> {
    pub fn new(pool: CredentialPool, runner: R, sleeper: S, log_path: Option<PathBuf>) -> Self {
        Self {
            pool,
            runner,
            sleeper,
            backoff: BackoffConfig::default(),
            log_path,
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn invoke(&mut self, request: InvokeRequest<'_>) -> Result<InvokeOutcome, InvokeError> {
        // Credentials that already failed to produce a usable response during this single
        // `invoke()` call. `next_available` alone is stateless across calls — without this,
        // a rotation decision that doesn't also mark the credential exhausted (`auth_error`,
        // `model_downgrade`, capacity exhaustion past max attempts) would keep re-selecting
        // the same credential forever instead of advancing or failing fast (§4.3).
        let mut tried = std::collections::HashSet::new();

        loop {
            let now = Utc::now();
            let credential = match self.pool.next_available_excluding(now, &tried) {
                Some(c) => c.clone(),
                None => {
                    self.log(ObservabilityEvent::AllExhausted, "none", request.model, None, None);
                    return Err(InvokeError::AllCredentialsExhausted);
                }
            };

            match self.invoke_with_credential(&credential, &request) {
                CredentialOutcome::Success(outcome) => return Ok(outcome),
                CredentialOutcome::RotateCredential => {
                    tried.insert(credential.name.clone());
                    continue;
                }
                CredentialOutcome::Fatal(message) => return Err(InvokeError::Fatal(message)),
            }
        }
    }

    fn invoke_with_credential(
        &mut self,
        credential: &Credential,
        request: &InvokeRequest<'_>,
    ) -> CredentialOutcome {
        let mut capacity_attempts = 0u32;
        let mut api_error_retried = false;
        let mut effective_prompt = self.prompt_for_shape(request);
        let mut reminder_sent = false;

        loop {
            self.log(ObservabilityEvent::Attempt, &credential.name, request.model, None, None);
            let result = self.runner.run(credential, request.model, &effective_prompt);

            let subprocess = match result {
                Ok(s) => s,
                Err(err) => return CredentialOutcome::Fatal(err.to_string()),
            };

            if subprocess.exit_code == 0 {
                if let Some(reported) = &subprocess.reported_model {
                    if reported != request.model {
                        self.log(
                            ObservabilityEvent::CredentialRotated,
                            &credential.name,
                            request.model,
                            None,
                            Some("model_downgrade".to_string()),
                        );
                        return CredentialOutcome::RotateCredential;
                    }
                }

                if request.shape == OutputShape::Json && !is_valid_json(&subprocess.stdout) {
                    if !reminder_sent {
                        reminder_sent = true;
                        effective_prompt =
                            format!("{effective_prompt}\n\nReminder: respond with valid JSON only.");
                        continue;
                    }
                    self.log(ObservabilityEvent::Success, &credential.name, request.model, None, None);
                    return CredentialOutcome::Success(InvokeOutcome {
                        text: subprocess.stdout,
                        model_used: request.model.to_string(),
                        credential_used: credential.name.clone(),
                        parse_failure: true,
                    });
                }

                self.log(ObservabilityEvent::Success, &credential.name, request.model, None, None);
                return CredentialOutcome::Success(InvokeOutcome {
                    text: subprocess.stdout,
                    model_used: request.model.to_string(),
                    credential_used: credential.name.clone(),
                    parse_failure: false,
                });
            }

            match classify(&subprocess.stderr, subprocess.exit_code) {
                InvokeErrorClass::CapacityExhausted => {
                    capacity_attempts += 1;
                    self.log(
                        ObservabilityEvent::CapacityExhausted,
                        &credential.name,
                        request.model,
                        None,
                        None,
                    );
                    if capacity_attempts >= self.backoff.max_attempts {
                        warn!(credential = %credential.name, "capacity exhausted beyond max attempts; rotating");
                        return CredentialOutcome::RotateCredential;
                    }
                    let delay = self.backoff.delay_for_attempt_rng(capacity_attempts);
                    self.sleeper.sleep(delay);
                }
                InvokeErrorClass::QuotaExhausted => {
                    let reset = next_midnight_utc();
                    self.pool.mark_exhausted(&credential.name, reset);
                    self.log(
                        ObservabilityEvent::QuotaExhausted,
                        &credential.name,
                        request.model,
                        Some(reset),
                        None,
                    );
                    self.log(
                        ObservabilityEvent::CredentialRotated,
                        &credential.name,
                        request.model,
                        None,
                        None,
                    );
                    return CredentialOutcome::RotateCredential;
                }
                InvokeErrorClass::RateLimited => {
                    self.log(ObservabilityEvent::RateLimited, &credential.name, request.model, None, None);
                    self.sleeper.sleep(std::time::Duration::from_secs(60));
                }
                InvokeErrorClass::AuthError => {
                    self.log(ObservabilityEvent::AuthError, &credential.name, request.model, None, None);
                    return CredentialOutcome::RotateCredential;
                }
                InvokeErrorClass::ModelDowngrade => {
                    self.log(
                        ObservabilityEvent::CredentialRotated,
                        &credential.name,
                        request.model,
                        None,
                        Some("model_downgrade".to_string()),
                    );
                    return CredentialOutcome::RotateCredential;
                }
                InvokeErrorClass::ApiError => {
                    if !api_error_retried {
                        api_error_retried = true;
                        continue;
                    }
                    return CredentialOutcome::Fatal(format!(
                        "api_error: {}",
                        subprocess.stderr.trim()
                    ));
                }
            }
        }
    }

    fn prompt_for_shape(&self, request: &InvokeRequest<'_>) -> String {
        match request.shape {
            OutputShape::Text => request.prompt.to_string(),
            OutputShape::Json => format!("{}\n\nRespond with a single JSON object only.", request.prompt),
        }
    }

    fn log(
        &self,
        event: ObservabilityEvent,
        credential: &str,
        model: &str,
        reset_time: Option<chrono::DateTime<Utc>>,
        reason: Option<String>,
    ) {
        info!(event = ?event, credential, model, "llm invoker event");
        let Some(path) = &self.log_path else { return };
        let record = LogRecord {
            timestamp: Utc::now(),
            event,
            credential: credential.to_string(),
            model: model.to_string(),
            reset_time,
            reason,
        };
        let Ok(line) = serde_json::to_string(&record) else { return };
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{line}");
        }
    }
}

enum CredentialOutcome {
    Success(InvokeOutcome),
    RotateCredential,
    Fatal(String),
}

fn is_valid_json(text: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(text.trim()).is_ok()
}

fn next_midnight_utc() -> chrono::DateTime<Utc> {
    let now = Utc::now();
    (now + chrono::Duration::days(1))
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_utc()
}

/// Classifies a subprocess failure from its stderr text and exit code (§4.3). This is a
/// conservative keyword classifier: anything unrecognized falls through to `api_error`.
pub fn classify(stderr: &str, exit_code: i32) -> InvokeErrorClass {
    let lower = stderr.to_lowercase();
    if lower.contains("529") || lower.contains("capacity") || lower.contains("overloaded") {
        InvokeErrorClass::CapacityExhausted
    } else if lower.contains("quota") {
        InvokeErrorClass::QuotaExhausted
    } else if lower.contains("rate limit") || lower.contains("rate-limit") || lower.contains("429") {
        InvokeErrorClass::RateLimited
    } else if lower.contains("auth") || lower.contains("unauthorized") || lower.contains("401") {
        InvokeErrorClass::AuthError
    } else if lower.contains("model_downgrade") || lower.contains("unexpected model") {
        InvokeErrorClass::ModelDowngrade
    } else {
        let _ = exit_code;
        InvokeErrorClass::ApiError
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::credential::{CredentialKind, CredentialRegistry, ExhaustionRegistry};
    use std::cell::RefCell;

    fn pool_with(names: &[&str]) -> CredentialPool {
        let credentials = names
            .iter()
            .map(|n| Credential {
                name: n.to_string(),
                kind: CredentialKind::Oauth,
                enabled: true,
                account_label: n.to_string(),
                key: None,
            })
            .collect();
        CredentialPool::new(CredentialRegistry { credentials }, ExhaustionRegistry::default())
    }

    struct ScriptedRunner {
        responses: RefCell<Vec<std::io::Result<SubprocessOutcome>>>,
    }

    impl SubprocessRunner for ScriptedRunner {
        fn run(&self, _credential: &Credential, _model: &str, _prompt: &str) -> std::io::Result<SubprocessOutcome> {
            self.responses.borrow_mut().remove(0)
        }
    }

    fn ok(stdout: &str) -> std::io::Result<SubprocessOutcome> {
        Ok(SubprocessOutcome {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code: 0,
            reported_model: None,
        })
    }

    fn err(stderr: &str) -> std::io::Result<SubprocessOutcome> {
        Ok(SubprocessOutcome {
            stdout: String::new(),
            stderr: stderr.to_string(),
            exit_code: 1,
            reported_model: None,
        })
    }

    #[test]
    fn classify_recognizes_every_taxonomy_class() {
        assert_eq!(classify("529 overloaded", 1), InvokeErrorClass::CapacityExhausted);
        assert_eq!(classify("daily quota exceeded", 1), InvokeErrorClass::QuotaExhausted);
        assert_eq!(classify("429 rate limit hit", 1), InvokeErrorClass::RateLimited);
        assert_eq!(classify("401 unauthorized", 1), InvokeErrorClass::AuthError);
        assert_eq!(classify("unexpected model in response", 1), InvokeErrorClass::ModelDowngrade);
        assert_eq!(classify("connection reset", 1), InvokeErrorClass::ApiError);
    }

    #[test]
    fn successful_call_returns_text_without_rotating() {
        let runner = ScriptedRunner {
            responses: RefCell::new(vec![ok("hello")]),
        };
        let mut invoker = LlmInvoker::new(pool_with(&["A"]), runner, NoopSleeper, None);
        let outcome = invoker
            .invoke(InvokeRequest { model: "m", prompt: "p", shape: OutputShape::Text })
            .unwrap();
        assert_eq!(outcome.text, "hello");
        assert_eq!(outcome.credential_used, "A");
        assert!(!outcome.parse_failure);
    }

    #[test]
    fn quota_exhausted_rotates_to_next_credential() {
        let runner = ScriptedRunner {
            responses: RefCell::new(vec![err("quota exceeded"), ok("from B")]),
        };
        let mut invoker = LlmInvoker::new(pool_with(&["A", "B"]), runner, NoopSleeper, None);
        let outcome = invoker
            .invoke(InvokeRequest { model: "m", prompt: "p", shape: OutputShape::Text })
            .unwrap();
        assert_eq!(outcome.credential_used, "B");
    }

    #[test]
    fn auth_error_fails_fast_when_no_credential_remains() {
        let runner = ScriptedRunner {
            responses: RefCell::new(vec![err("401 unauthorized")]),
        };
        let mut invoker = LlmInvoker::new(pool_with(&["A"]), runner, NoopSleeper, None);
        let err = invoker
            .invoke(InvokeRequest { model: "m", prompt: "p", shape: OutputShape::Text })
            .unwrap_err();
        assert!(matches!(err, InvokeError::AllCredentialsExhausted));
    }

    #[test]
    fn auth_error_rotates_past_bad_credential_to_a_working_one() {
        let runner = ScriptedRunner {
            responses: RefCell::new(vec![err("401 unauthorized"), ok("from B")]),
        };
        let mut invoker = LlmInvoker::new(pool_with(&["A", "B"]), runner, NoopSleeper, None);
        let outcome = invoker
            .invoke(InvokeRequest { model: "m", prompt: "p", shape: OutputShape::Text })
            .unwrap();
        assert_eq!(outcome.credential_used, "B");
    }

    #[test]
    fn model_downgrade_on_success_path_rotates_to_next_credential() {
        let runner = ScriptedRunner {
            responses: RefCell::new(vec![
                Ok(SubprocessOutcome {
                    stdout: "wrong model response".to_string(),
                    stderr: String::new(),
                    exit_code: 0,
                    reported_model: Some("smaller-model".to_string()),
                }),
                ok("from B"),
            ]),
        };
        let mut invoker = LlmInvoker::new(pool_with(&["A", "B"]), runner, NoopSleeper, None);
        let outcome = invoker
            .invoke(InvokeRequest { model: "m", prompt: "p", shape: OutputShape::Text })
            .unwrap();
        assert_eq!(outcome.credential_used, "B");
        assert_eq!(outcome.text, "from B");
    }

    #[test]
    fn command_runner_parses_reported_model_from_stderr() {
        assert_eq!(parse_reported_model("model=claude-3-opus\n"), Some("claude-3-opus".to_string()));
        assert_eq!(
            parse_reported_model("some warning\nMODEL=claude-3-haiku\n"),
            Some("claude-3-haiku".to_string())
        );
        assert_eq!(parse_reported_model("no model line here"), None);
    }

    #[test]
    fn api_error_gets_one_retry_then_fails() {
        let runner = ScriptedRunner {
            responses: RefCell::new(vec![err("boom"), err("boom again")]),
        };
        let mut invoker = LlmInvoker::new(pool_with(&["A"]), runner, NoopSleeper, None);
        let err = invoker
            .invoke(InvokeRequest { model: "m", prompt: "p", shape: OutputShape::Text })
            .unwrap_err();
        assert!(matches!(err, InvokeError::Fatal(_)));
    }

    #[test]
    fn json_shape_retries_once_then_reports_parse_failure() {
        let runner = ScriptedRunner {
            responses: RefCell::new(vec![ok("not json"), ok("still not json")]),
        };
        let mut invoker = LlmInvoker::new(pool_with(&["A"]), runner, NoopSleeper, None);
        let outcome = invoker
            .invoke(InvokeRequest { model: "m", prompt: "p", shape: OutputShape::Json })
            .unwrap();
        assert!(outcome.parse_failure);
    }

    #[test]
    fn capacity_exhausted_retries_same_credential_until_success() {
        let runner = ScriptedRunner {
            responses: RefCell::new(vec![err("529 overloaded"), ok("recovered")]),
        };
        let mut invoker = LlmInvoker::new(pool_with(&["A"]), runner, NoopSleeper, None);
        let outcome = invoker
            .invoke(InvokeRequest { model: "m", prompt: "p", shape: OutputShape::Text })
            .unwrap();
        assert_eq!(outcome.credential_used, "A");
        assert_eq!(outcome.text, "recovered");
    }
}
