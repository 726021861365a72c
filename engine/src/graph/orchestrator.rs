//! Workflow Graph (C5): the node-execution loop (§4.5), tying together the Lineage
//! Store, Checkpoint Store, LLM Invoker, Verdict Parser, Human Gate, and Filer Adapter.
//!
//! The driving loop guarantees a checkpoint is persisted before every node begins and,
//! critically, only after a node *returns normally* (§4.2, §4.6, §5) — a node that raises
//! [`EngineError::Paused`] unwinds before the post-node save, leaving the pre-node
//! checkpoint authoritative.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{error, info};

use crate::checkpoint::CheckpointStore;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::human_gate::{AutoDecision, RouteDecision};
use crate::lineage::{ArtifactKind, LineageStore};
use crate::llm::{InvokeError, InvokeRequest, LlmInvoker, OutputShape, Sleeper, SubprocessRunner};
use crate::model::{AuditEvent, Decision, Terminal, Verdict, WorkflowState, WorkflowType};
use crate::verdict;

use super::node::{Node, Transition};

/// The Drafter role (§4.5 `N1_Draft`): produces the next draft text given the standing
/// state.
pub trait Drafter {
    fn draft(&mut self, state: &WorkflowState) -> EngineResult<String>;
}

/// The Reviewer role (§4.5 `N2_Review`): returns the raw reviewer output and the model
/// identity that produced it, plus whether C3 already gave up trying to coerce JSON.
pub trait Reviewer {
    fn review(&mut self, state: &WorkflowState, draft: &str) -> EngineResult<ReviewOutcome>;
}

pub struct ReviewOutcome {
    pub raw_text: String,
    pub reviewer_model: String,
    pub parse_failure: bool,
}

/// The Filer role (§4.7), abstracted so the orchestrator doesn't depend on a concrete
/// tracker runner type.
pub trait FilerPort {
    fn ensure_labels(&mut self, repo: &Path, labels: &[String]) -> EngineResult<()>;
    #[allow(clippy::too_many_arguments)]
    fn file(
        &mut self,
        repo: &Path,
        body: &str,
        labels: &[String],
        decision: &str,
        reviewer_model: &str,
        review_rounds: u32,
        filed_on: chrono::DateTime<Utc>,
    ) -> EngineResult<(u64, String)>;
}

impl<R: crate::filer::TrackerRunner> FilerPort for crate::filer::FilerAdapter<R> {
    fn ensure_labels(&mut self, repo: &Path, labels: &[String]) -> EngineResult<()> {
        crate::filer::FilerAdapter::ensure_labels(self, repo, labels)
    }

    fn file(
        &mut self,
        repo: &Path,
        body: &str,
        labels: &[String],
        decision: &str,
        reviewer_model: &str,
        review_rounds: u32,
        filed_on: chrono::DateTime<Utc>,
    ) -> EngineResult<(u64, String)> {
        crate::filer::FilerAdapter::create_issue(self, repo, body, labels, decision, reviewer_model, review_rounds, filed_on)
    }
}

/// The Human Gate role (§4.6), abstracted over the concrete prompter.
pub trait HumanGatePort {
    fn is_auto_mode(&self) -> bool;
    fn auto_decision(&self, decision: Decision) -> AutoDecision;
    fn present(&mut self, node: &str, artifact_path: &Path) -> EngineResult<RouteDecision>;
}

impl<P: crate::human_gate::Prompter> HumanGatePort for crate::human_gate::HumanGate<P> {
    fn is_auto_mode(&self) -> bool {
        self.auto_mode
    }

    fn auto_decision(&self, decision: Decision) -> AutoDecision {
        crate::human_gate::HumanGate::auto_decision(self, decision)
    }

    fn present(&mut self, node: &str, artifact_path: &Path) -> EngineResult<RouteDecision> {
        crate::human_gate::HumanGate::present(self, node, artifact_path)
    }
}

/// Default labels attached to filed issues. Not fixed by the spec; kept minimal.
const DEFAULT_LABELS: &[&str] = &["governance"];

fn invoke_error_to_engine_error(e: InvokeError) -> EngineError {
    match e {
        InvokeError::AllCredentialsExhausted => EngineError::CredentialsExhausted,
        InvokeError::Fatal(message) => EngineError::LlmInvocationFailed { message },
    }
}

/// Drafter backed by the LLM Invoker (§4.3, §4.5 "Drafter prompt composition").
pub struct LlmDrafter<R: SubprocessRunner, S: Sleeper> {
    invoker: LlmInvoker<R, S>,
    model: String,
}

impl<R: SubprocessRunner, S: Sleeper> LlmDrafter<R, S> {
    pub fn new(invoker: LlmInvoker<R, S>, model: impl Into<String>) -> Self {
        Self { invoker, model: model.into() }
    }
}

impl<R: SubprocessRunner, S: Sleeper> Drafter for LlmDrafter<R, S> {
    fn draft(&mut self, state: &WorkflowState) -> EngineResult<String> {
        let prompt = compose_draft_prompt(state);
        let outcome = self
            .invoker
            .invoke(InvokeRequest { model: &self.model, prompt: &prompt, shape: OutputShape::Text })
            .map_err(invoke_error_to_engine_error)?;
        Ok(outcome.text)
    }
}

/// Reviewer backed by the LLM Invoker, loading its system prompt from a repository-
/// internal file identified by a stable role id (§4.5 "Reviewer prompt composition").
pub struct LlmReviewer<R: SubprocessRunner, S: Sleeper> {
    invoker: LlmInvoker<R, S>,
    model: String,
    prompt_path: PathBuf,
}

impl<R: SubprocessRunner, S: Sleeper> LlmReviewer<R, S> {
    pub fn new(invoker: LlmInvoker<R, S>, model: impl Into<String>, prompt_path: impl Into<PathBuf>) -> Self {
        Self { invoker, model: model.into(), prompt_path: prompt_path.into() }
    }
}

impl<R: SubprocessRunner, S: Sleeper> Reviewer for LlmReviewer<R, S> {
    fn review(&mut self, _state: &WorkflowState, draft: &str) -> EngineResult<ReviewOutcome> {
        let system_prompt = std::fs::read_to_string(&self.prompt_path)
            .map_err(|_| EngineError::MissingPromptFile { path: self.prompt_path.clone() })?;
        let prompt = format!("{system_prompt}\n\n---\n\n{draft}");
        let outcome = self
            .invoker
            .invoke(InvokeRequest { model: &self.model, prompt: &prompt, shape: OutputShape::Json })
            .map_err(invoke_error_to_engine_error)?;
        Ok(ReviewOutcome {
            raw_text: outcome.text,
            reviewer_model: outcome.model_used,
            parse_failure: outcome.parse_failure,
        })
    }
}

fn compose_draft_prompt(state: &WorkflowState) -> String {
    let mut prompt = String::new();
    prompt.push_str(&state.input_content);

    if !state.accumulated_requirements.is_empty() {
        prompt.push_str("\n\nStanding requirements (MUST address, do not regress):\n");
        for (i, requirement) in state.accumulated_requirements.iter().enumerate() {
            prompt.push_str(&format!("{}. {}\n", i + 1, requirement));
        }
    }

    if let Some(verdict) = &state.current_verdict {
        prompt.push_str("\nMost recent reviewer verdict:\n");
        prompt.push_str(&verdict.raw_text);
    }

    prompt.push_str("\nPreserve any template sections the verdicts above did not critique.\n");
    prompt
}

fn route_on_approval(workflow_type: WorkflowType) -> Node {
    match workflow_type {
        WorkflowType::Issue => Node::N4File,
        WorkflowType::Lld => Node::N5Finalize,
    }
}

/// Drives one [`WorkflowState`] through the node graph until it pauses or reaches a
/// terminal node.
pub struct Orchestrator<'a, D: Drafter, V: Reviewer, F: FilerPort, G: HumanGatePort> {
    lineage: LineageStore,
    checkpoint: &'a CheckpointStore,
    drafter: D,
    reviewer: V,
    filer: F,
    gate: G,
    config: EngineConfig,
}

impl<'a, D: Drafter, V: Reviewer, F: FilerPort, G: HumanGatePort> Orchestrator<'a, D, V, F, G> {
    pub fn new(
        target_repo: impl Into<PathBuf>,
        checkpoint: &'a CheckpointStore,
        drafter: D,
        reviewer: V,
        filer: F,
        gate: G,
        config: EngineConfig,
    ) -> Self {
        let target_repo = target_repo.into();
        Self {
            lineage: LineageStore::new(target_repo),
            checkpoint,
            drafter,
            reviewer,
            filer,
            gate,
            config,
        }
    }

    fn max_iterations(&self, workflow_type: WorkflowType) -> u32 {
        match workflow_type {
            WorkflowType::Lld => self.config.max_iterations_lld,
            WorkflowType::Issue => self.config.max_iterations_issue,
        }
    }

    fn audit(&self, state: &WorkflowState, event: AuditEvent, details: serde_json::Value) {
        self.lineage.append_audit(state.workflow_type, &state.target_id, &state.target_repo, event, details);
    }

    /// Runs `state` from whatever `next_node` names until it pauses ([`EngineError::Paused`]
    /// or [`EngineError::UserAbort`]), reaches a terminal node, or hits a fatal error.
    pub fn run(&mut self, mut state: WorkflowState) -> EngineResult<WorkflowState> {
        // §3: the checkpoint for a done workflow is retained but ignored by the engine —
        // a forensic artifact only. Re-entering here would re-run N5_Finalize/N_Error,
        // emit a second `complete`/`error` audit event (violating I4), and fail
        // `promote_to_done` since the done directory already exists (violating R1).
        if state.terminal.is_some() {
            return Ok(state);
        }

        let mut transitions: Vec<Transition> = self
            .checkpoint
            .load_transitions(&state.thread_id)
            .unwrap_or_default();

        if state.next_node == "N0_Ingest" && state.iteration_count == 0 && state.draft_count == 0 {
            self.audit(&state, AuditEvent::Start, serde_json::json!({}));
        } else {
            self.audit(&state, AuditEvent::Resume, serde_json::json!({"next_node": state.next_node}));
        }

        loop {
            let current = Node::parse(&state.next_node).ok_or_else(|| EngineError::InvalidTransition {
                from: state.next_node.clone(),
                to: "<unknown>".to_string(),
            })?;

            self.checkpoint.save(&state.thread_id, &state).map_err(|e| {
                error!(error = %e, "pre-node checkpoint save failed");
                e
            })?;

            if current.is_terminal() {
                self.enter_terminal(current, &mut state)?;
                self.checkpoint.save(&state.thread_id, &state)?;
                return Ok(state);
            }

            match self.execute_node(current, &mut state) {
                Ok(next) => {
                    if !current.can_transition_to(next) {
                        return Err(EngineError::InvalidTransition {
                            from: current.to_string(),
                            to: next.to_string(),
                        });
                    }
                    transitions.push(Transition {
                        from: current,
                        to: next,
                        timestamp: Utc::now(),
                        reason: String::new(),
                    });
                    self.checkpoint.save_transitions(&state.thread_id, &transitions)?;
                    state.next_node = next.as_str().to_string();
                    state.error_message = None;
                    self.checkpoint.save(&state.thread_id, &state)?;
                    info!(from = %current, to = %next, "transitioned");
                }
                Err(EngineError::Paused { node, reason }) => {
                    self.audit(&state, AuditEvent::HumanPause, serde_json::json!({"node": node, "reason": reason}));
                    return Err(EngineError::Paused { node, reason });
                }
                Err(EngineError::UserAbort) => {
                    state.terminal = Some(Terminal::UserAbort);
                    state.error_message = Some(EngineError::UserAbort.remediation_hint());
                    self.audit(&state, AuditEvent::Error, serde_json::json!({"reason": "user_abort"}));
                    let _ = self.checkpoint.save(&state.thread_id, &state);
                    return Err(EngineError::UserAbort);
                }
                Err(other) => {
                    state.error_message = Some(other.remediation_hint());
                    self.audit(&state, AuditEvent::Error, serde_json::json!({"reason": other.reason_code()}));
                    let _ = self.checkpoint.save(&state.thread_id, &state);
                    return Err(other);
                }
            }
        }
    }

    fn execute_node(&mut self, node: Node, state: &mut WorkflowState) -> EngineResult<Node> {
        match node {
            Node::N0Ingest => self.run_ingest(state),
            Node::N1Draft => self.run_draft(state),
            Node::N2Review => self.run_review(state),
            Node::N3HumanEdit => self.run_human_edit(state),
            Node::N4File => self.run_file(state),
            Node::N5Finalize | Node::NError => unreachable!("terminal nodes are handled by enter_terminal"),
        }
    }

    fn run_ingest(&mut self, state: &mut WorkflowState) -> EngineResult<Node> {
        if state.input_content.trim().is_empty() {
            return Err(EngineError::EmptyInput);
        }
        let lineage_dir = self.lineage.ensure_active_dir(&state.thread_id)?;
        let kind = match state.workflow_type {
            WorkflowType::Issue => ArtifactKind::Brief,
            WorkflowType::Lld => ArtifactKind::Issue,
        };
        self.lineage.write_artifact(&lineage_dir, kind, &state.input_content)?;
        Ok(Node::N1Draft)
    }

    fn run_draft(&mut self, state: &mut WorkflowState) -> EngineResult<Node> {
        let draft_text = self.drafter.draft(state)?;
        let lineage_dir = self.lineage.active_dir(&state.thread_id);
        self.lineage.write_artifact(&lineage_dir, ArtifactKind::Draft, &draft_text)?;
        state.draft_count += 1;
        state.current_draft = Some(draft_text);
        self.audit(state, AuditEvent::Draft, serde_json::json!({"draft_count": state.draft_count}));
        Ok(Node::N2Review)
    }

    fn run_review(&mut self, state: &mut WorkflowState) -> EngineResult<Node> {
        let draft = state
            .current_draft
            .clone()
            .ok_or_else(|| EngineError::InvalidTransition {
                from: Node::N2Review.to_string(),
                to: "<no draft to review>".to_string(),
            })?;

        let review = self.reviewer.review(state, &draft)?;
        let parsed = verdict::parse_verdict(&review.raw_text, &review.reviewer_model);

        let lineage_dir = self.lineage.active_dir(&state.thread_id);
        self.lineage.write_artifact(&lineage_dir, ArtifactKind::Verdict, &parsed.raw_text)?;

        state.merge_requirements(&parsed.blocking_issues);
        state.verdict_count += 1;
        state.iteration_count += 1;

        let effective = parsed.effective_decision();
        self.audit(
            state,
            AuditEvent::Review,
            serde_json::json!({
                "decision": effective.to_string(),
                "blocking_issues": parsed.blocking_issues.len(),
                "raw_response_parse_failure": review.parse_failure,
            }),
        );
        state.current_verdict = Some(parsed);

        match effective {
            Decision::Approved | Decision::Discuss => Ok(Node::N3HumanEdit),
            Decision::Block => {
                let max = self.max_iterations(state.workflow_type);
                if state.iteration_count >= max {
                    state.terminal = Some(Terminal::MaxIterations);
                    Ok(Node::NError)
                } else {
                    Ok(Node::N1Draft)
                }
            }
        }
    }

    fn run_human_edit(&mut self, state: &mut WorkflowState) -> EngineResult<Node> {
        let decision = state
            .current_verdict
            .as_ref()
            .map(Verdict::effective_decision)
            .unwrap_or(Decision::Block);

        if self.gate.is_auto_mode() {
            return match self.gate.auto_decision(decision) {
                AutoDecision::ProceedToGateEquivalent => Ok(route_on_approval(state.workflow_type)),
                AutoDecision::BackToDraft => Ok(Node::N1Draft),
                AutoDecision::EscalateAsAbort => {
                    state.terminal = Some(Terminal::UserAbort);
                    state.error_message = Some(EngineError::UserAbort.remediation_hint());
                    Ok(Node::NError)
                }
            };
        }

        let lineage_dir = self.lineage.active_dir(&state.thread_id);
        let route = self.gate.present(Node::N3HumanEdit.as_str(), &lineage_dir)?;
        self.audit(state, AuditEvent::HumanEdit, serde_json::json!({"route": format!("{route:?}")}));
        match route {
            RouteDecision::Approve => Ok(route_on_approval(state.workflow_type)),
            RouteDecision::Revise => Ok(Node::N1Draft),
            RouteDecision::SaveAndExit | RouteDecision::Abort => {
                unreachable!("HumanGate::present never returns these as Ok")
            }
        }
    }

    fn run_file(&mut self, state: &mut WorkflowState) -> EngineResult<Node> {
        let draft = state.current_draft.clone().unwrap_or_default();
        let verdict = state.current_verdict.clone();
        let decision = verdict.as_ref().map(Verdict::effective_decision).unwrap_or(Decision::Approved);
        let reviewer_model = verdict.as_ref().map(|v| v.reviewer_model.clone()).unwrap_or_default();

        let labels: Vec<String> = DEFAULT_LABELS.iter().map(|s| s.to_string()).collect();
        let repo = PathBuf::from(&state.target_repo);

        self.filer.ensure_labels(&repo, &labels)?;
        let (number, url) = self.filer.file(
            &repo,
            &draft,
            &labels,
            &decision.to_string(),
            &reviewer_model,
            state.verdict_count,
            Utc::now(),
        )?;
        state.external_id = Some(url.clone());
        self.audit(state, AuditEvent::File, serde_json::json!({"number": number, "url": url}));
        Ok(Node::N5Finalize)
    }

    fn enter_terminal(&mut self, node: Node, state: &mut WorkflowState) -> EngineResult<()> {
        match node {
            Node::N5Finalize => {
                let metadata = serde_json::json!({
                    "thread_id": state.thread_id,
                    "decision": state.current_verdict.as_ref().map(Verdict::effective_decision).map(|d| d.to_string()),
                    "draft_count": state.draft_count,
                    "verdict_count": state.verdict_count,
                    "iteration_count": state.iteration_count,
                    "external_id": state.external_id,
                });
                let lineage_dir = self.lineage.active_dir(&state.thread_id);
                self.lineage
                    .write_artifact(&lineage_dir, ArtifactKind::Metadata, &metadata.to_string())?;
                state.terminal = Some(Terminal::ApprovedFiled);
                self.audit(state, AuditEvent::Complete, serde_json::json!({}));
                self.lineage.promote_to_done(&state.thread_id)?;
                Ok(())
            }
            Node::NError => {
                let reason = state.terminal.map(terminal_reason_code).unwrap_or("fatal");
                self.audit(state, AuditEvent::Error, serde_json::json!({"reason": reason}));
                if state.terminal.is_none() {
                    state.terminal = Some(Terminal::Fatal);
                }
                Ok(())
            }
            _ => unreachable!("enter_terminal only called for terminal nodes"),
        }
    }
}

fn terminal_reason_code(terminal: Terminal) -> &'static str {
    match terminal {
        Terminal::ApprovedFiled => "approved_filed",
        Terminal::UserAbort => "user_abort",
        Terminal::MaxIterations => "max_iterations",
        Terminal::Fatal => "fatal",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointStore;
    use crate::human_gate::{GateChoice, HumanGate, ScriptedPrompter};
    use std::cell::RefCell;
    use tempfile::tempdir;

    struct StubDrafter {
        responses: RefCell<Vec<String>>,
    }
    impl Drafter for StubDrafter {
        fn draft(&mut self, _state: &WorkflowState) -> EngineResult<String> {
            Ok(self.responses.get_mut().remove(0))
        }
    }

    struct StubReviewer {
        responses: RefCell<Vec<String>>,
    }
    impl Reviewer for StubReviewer {
        fn review(&mut self, _state: &WorkflowState, _draft: &str) -> EngineResult<ReviewOutcome> {
            Ok(ReviewOutcome {
                raw_text: self.responses.get_mut().remove(0),
                reviewer_model: "stub-model".to_string(),
                parse_failure: false,
            })
        }
    }

    struct StubFiler;
    impl FilerPort for StubFiler {
        fn ensure_labels(&mut self, _repo: &Path, _labels: &[String]) -> EngineResult<()> {
            Ok(())
        }
        fn file(
            &mut self,
            _repo: &Path,
            _body: &str,
            _labels: &[String],
            _decision: &str,
            _reviewer_model: &str,
            _review_rounds: u32,
            _filed_on: chrono::DateTime<Utc>,
        ) -> EngineResult<(u64, String)> {
            Ok((1, "https://example.invalid/issues/1".to_string()))
        }
    }

    fn approved_json() -> String {
        r#"{"decision":"approved","blocking_issues":[]}"#.to_string()
    }

    fn block_json(issue: &str) -> String {
        format!(r#"{{"decision":"block","blocking_issues":["{issue}"]}}"#)
    }

    #[test]
    fn happy_path_issue_auto_mode_files_and_finalizes() {
        let dir = tempdir().unwrap();
        let checkpoint = CheckpointStore::open(dir.path().join("db")).unwrap();
        let gate = HumanGate::new(true, ScriptedPrompter::new(GateChoice::Approve));
        let mut orchestrator = Orchestrator::new(
            dir.path(),
            &checkpoint,
            StubDrafter { responses: RefCell::new(vec!["draft one".to_string()]) },
            StubReviewer { responses: RefCell::new(vec![approved_json()]) },
            StubFiler,
            gate,
            EngineConfig::default(),
        );

        let state = WorkflowState::new(WorkflowType::Issue, "1", dir.path().to_str().unwrap(), "a valid brief", "add-x");
        let result = orchestrator.run(state).unwrap();

        assert_eq!(result.terminal, Some(Terminal::ApprovedFiled));
        assert_eq!(result.draft_count, 1);
        assert_eq!(result.verdict_count, 1);
        assert!(result.external_id.is_some());

        let done_dir = dir.path().join("docs/lineage/done").join(&result.thread_id);
        assert!(done_dir.join("001-brief.md").exists());
        assert!(done_dir.join("002-draft.md").exists());
        assert!(done_dir.join("003-verdict.md").exists());
        assert!(done_dir.join("004-metadata.json").exists());
    }

    #[test]
    fn block_then_approve_accumulates_requirements() {
        let dir = tempdir().unwrap();
        let checkpoint = CheckpointStore::open(dir.path().join("db")).unwrap();
        let gate = HumanGate::new(true, ScriptedPrompter::new(GateChoice::Approve));
        let mut orchestrator = Orchestrator::new(
            dir.path(),
            &checkpoint,
            StubDrafter { responses: RefCell::new(vec!["draft one".to_string(), "draft two".to_string()]) },
            StubReviewer {
                responses: RefCell::new(vec![block_json("define worktree scope"), approved_json()]),
            },
            StubFiler,
            gate,
            EngineConfig::default(),
        );

        let state = WorkflowState::new(WorkflowType::Lld, "62", dir.path().to_str().unwrap(), "issue #62 add X", "add-x");
        let result = orchestrator.run(state).unwrap();

        assert_eq!(result.iteration_count, 2);
        assert_eq!(result.draft_count, 2);
        assert_eq!(result.verdict_count, 2);
        assert!(result.accumulated_requirements.contains(&"define worktree scope".to_string()));
        assert_eq!(result.terminal, Some(Terminal::ApprovedFiled));
    }

    #[test]
    fn max_iterations_routes_to_error_terminal() {
        let dir = tempdir().unwrap();
        let checkpoint = CheckpointStore::open(dir.path().join("db")).unwrap();
        let gate = HumanGate::new(true, ScriptedPrompter::new(GateChoice::Approve));
        let mut config = EngineConfig::default();
        config.max_iterations_lld = 2;

        let drafts = vec!["d1".to_string(), "d2".to_string()];
        let verdicts = vec![block_json("x"), block_json("x")];

        let mut orchestrator = Orchestrator::new(
            dir.path(),
            &checkpoint,
            StubDrafter { responses: RefCell::new(drafts) },
            StubReviewer { responses: RefCell::new(verdicts) },
            StubFiler,
            gate,
            config,
        );

        let state = WorkflowState::new(WorkflowType::Lld, "62", dir.path().to_str().unwrap(), "issue #62 add X", "add-x");
        let result = orchestrator.run(state).unwrap();
        assert_eq!(result.terminal, Some(Terminal::MaxIterations));
        assert_eq!(result.iteration_count, 2);

        let active_dir = dir.path().join("docs/lineage/active").join(&result.thread_id);
        assert!(active_dir.exists(), "lineage must remain under active/ for max-iterations termination");
    }

    #[test]
    fn empty_input_fails_at_ingest_without_panicking() {
        let dir = tempdir().unwrap();
        let checkpoint = CheckpointStore::open(dir.path().join("db")).unwrap();
        let gate = HumanGate::new(true, ScriptedPrompter::new(GateChoice::Approve));
        let mut orchestrator = Orchestrator::new(
            dir.path(),
            &checkpoint,
            StubDrafter { responses: RefCell::new(vec![]) },
            StubReviewer { responses: RefCell::new(vec![]) },
            StubFiler,
            gate,
            EngineConfig::default(),
        );
        let state = WorkflowState::new(WorkflowType::Issue, "1", dir.path().to_str().unwrap(), "   ", "slug");
        let err = orchestrator.run(state).unwrap_err();
        assert!(matches!(err, EngineError::EmptyInput));
    }

    #[test]
    fn unparseable_verdict_fails_closed_and_routes_back_to_draft() {
        let dir = tempdir().unwrap();
        let checkpoint = CheckpointStore::open(dir.path().join("db")).unwrap();
        let gate = HumanGate::new(true, ScriptedPrompter::new(GateChoice::Approve));
        let mut orchestrator = Orchestrator::new(
            dir.path(),
            &checkpoint,
            StubDrafter { responses: RefCell::new(vec!["d1".to_string(), "d2".to_string()]) },
            StubReviewer {
                responses: RefCell::new(vec!["no json, no headings".to_string(), approved_json()]),
            },
            StubFiler,
            gate,
            EngineConfig::default(),
        );
        let state = WorkflowState::new(WorkflowType::Issue, "1", dir.path().to_str().unwrap(), "body", "slug");
        let result = orchestrator.run(state).unwrap();
        assert_eq!(result.terminal, Some(Terminal::ApprovedFiled));
        assert!(result
            .accumulated_requirements
            .iter()
            .any(|r| r.contains("Verdict could not be parsed")));
    }

    #[test]
    fn save_and_exit_pauses_without_marking_terminal() {
        let dir = tempdir().unwrap();
        let checkpoint = CheckpointStore::open(dir.path().join("db")).unwrap();
        let gate = HumanGate::new(false, ScriptedPrompter::new(GateChoice::SaveAndExit));
        let mut orchestrator = Orchestrator::new(
            dir.path(),
            &checkpoint,
            StubDrafter { responses: RefCell::new(vec!["d1".to_string()]) },
            StubReviewer { responses: RefCell::new(vec![approved_json()]) },
            StubFiler,
            gate,
            EngineConfig::default(),
        );
        let state = WorkflowState::new(WorkflowType::Issue, "1", dir.path().to_str().unwrap(), "body", "slug");
        let err = orchestrator.run(state).unwrap_err();
        assert!(matches!(err, EngineError::Paused { .. }));

        let loaded = checkpoint.load("issue-1-slug").unwrap().unwrap();
        assert!(loaded.is_active());
        assert_eq!(loaded.next_node, "N3_HumanEdit");
    }

    #[test]
    fn resuming_a_done_workflow_is_a_no_op() {
        let dir = tempdir().unwrap();
        let checkpoint = CheckpointStore::open(dir.path().join("db")).unwrap();
        let gate = HumanGate::new(true, ScriptedPrompter::new(GateChoice::Approve));
        let mut orchestrator = Orchestrator::new(
            dir.path(),
            &checkpoint,
            StubDrafter { responses: RefCell::new(vec!["draft one".to_string()]) },
            StubReviewer { responses: RefCell::new(vec![approved_json()]) },
            StubFiler,
            gate,
            EngineConfig::default(),
        );
        let state = WorkflowState::new(WorkflowType::Issue, "1", dir.path().to_str().unwrap(), "a valid brief", "add-x");
        let done = orchestrator.run(state).unwrap();
        assert_eq!(done.terminal, Some(Terminal::ApprovedFiled));

        // Re-running the already-terminal state must be a pure no-op: no new writes, no
        // panics from re-entering N5_Finalize against an already-promoted lineage dir.
        let gate2 = HumanGate::new(true, ScriptedPrompter::new(GateChoice::Approve));
        let mut orchestrator2 = Orchestrator::new(
            dir.path(),
            &checkpoint,
            StubDrafter { responses: RefCell::new(vec![]) },
            StubReviewer { responses: RefCell::new(vec![]) },
            StubFiler,
            gate2,
            EngineConfig::default(),
        );
        let resumed = orchestrator2.run(done.clone()).unwrap();
        assert_eq!(resumed.terminal, done.terminal);
        assert_eq!(resumed.draft_count, done.draft_count);
        assert_eq!(resumed.verdict_count, done.verdict_count);
    }
}
