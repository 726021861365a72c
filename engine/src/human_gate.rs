//! Human Gate (C6): mediates between the automated review loop and a human operator
//! without corrupting the checkpoint.

use crate::error::{EngineError, EngineResult};
use crate::model::Decision;

/// The fixed option set presented at the gate (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateChoice {
    SendToReviewer,
    ReviseWithFileEdits,
    WriteRevisionWithComments,
    Approve,
    SaveAndExit,
    Abort,
}

impl GateChoice {
    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'S' => Some(GateChoice::SendToReviewer),
            'R' => Some(GateChoice::ReviseWithFileEdits),
            'W' => Some(GateChoice::WriteRevisionWithComments),
            'A' => Some(GateChoice::Approve),
            'M' => Some(GateChoice::SaveAndExit),
            'X' => Some(GateChoice::Abort),
            _ => None,
        }
    }
}

/// §4.5's edge table only names four outcomes from `N3_HumanEdit`; `SendToReviewer` and
/// `WriteRevisionWithComments` differ from `ReviseWithFileEdits` only in what accompanies
/// the next draft request, not in where the workflow routes, so all three collapse to
/// `Revise` here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    Approve,
    Revise,
    SaveAndExit,
    Abort,
}

impl GateChoice {
    pub fn route(self) -> RouteDecision {
        match self {
            GateChoice::Approve => RouteDecision::Approve,
            GateChoice::SaveAndExit => RouteDecision::SaveAndExit,
            GateChoice::Abort => RouteDecision::Abort,
            GateChoice::SendToReviewer
            | GateChoice::ReviseWithFileEdits
            | GateChoice::WriteRevisionWithComments => RouteDecision::Revise,
        }
    }
}

/// What the Human Gate's auto-mode policy decides for a verdict without any human
/// interaction (§4.6 Auto mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoDecision {
    ProceedToGateEquivalent,
    BackToDraft,
    EscalateAsAbort,
}

/// Abstraction over presenting the fixed option set to an operator. Production code reads
/// a line from stdin; tests supply a scripted sequence.
pub trait Prompter {
    /// Opens the blocking external editor on the artifact at `path`, if not suppressed.
    fn launch_editor(&mut self, path: &std::path::Path);
    fn prompt(&mut self, message: &str) -> GateChoice;
}

/// Production prompter: launches a real editor unless `test_mode` suppresses it, and
/// reads one line of stdin for the choice character.
pub struct StdioPrompter {
    pub test_mode: bool,
    pub editor_command: String,
}

impl Prompter for StdioPrompter {
    fn launch_editor(&mut self, path: &std::path::Path) {
        if self.test_mode {
            // TEST_MODE: editor launch becomes a no-op that returns immediately (§4.6).
            return;
        }
        let _ = std::process::Command::new(&self.editor_command).arg(path).status();
    }

    fn prompt(&mut self, message: &str) -> GateChoice {
        use std::io::Write as _;
        print!("{message}");
        let _ = std::io::stdout().flush();
        let mut line = String::new();
        let _ = std::io::stdin().read_line(&mut line);
        line.trim()
            .chars()
            .next()
            .and_then(GateChoice::from_char)
            .unwrap_or(GateChoice::SaveAndExit)
    }
}

/// Test/TEST_MODE prompter: every prompt auto-responds with the same predetermined
/// choice, and editor launch never runs a real process (§4.6 test-mode choke point).
pub struct ScriptedPrompter {
    pub response: GateChoice,
    pub editor_launches: usize,
}

impl ScriptedPrompter {
    pub fn new(response: GateChoice) -> Self {
        Self {
            response,
            editor_launches: 0,
        }
    }
}

impl Prompter for ScriptedPrompter {
    fn launch_editor(&mut self, _path: &std::path::Path) {
        self.editor_launches += 1;
    }

    fn prompt(&mut self, _message: &str) -> GateChoice {
        self.response
    }
}

pub struct HumanGate<P: Prompter> {
    pub auto_mode: bool,
    prompter: P,
}

impl<P: Prompter> HumanGate<P> {
    pub fn new(auto_mode: bool, prompter: P) -> Self {
        Self { auto_mode, prompter }
    }

    /// §4.6 Auto mode policy, applied without ever touching the prompter.
    pub fn auto_decision(&self, decision: Decision) -> AutoDecision {
        match decision {
            Decision::Approved => AutoDecision::ProceedToGateEquivalent,
            Decision::Block => AutoDecision::BackToDraft,
            Decision::Discuss => AutoDecision::EscalateAsAbort,
        }
    }

    /// Interactive path: opens the editor on `artifact_path`, then prompts with the fixed
    /// option set and returns the resulting route. Callers MUST treat `SaveAndExit` as the
    /// cooperative pause signal, never as a normal return (§4.6's critical contract) — that
    /// unwinding happens here: this function returns `Err(EngineError::Paused { .. })`
    /// rather than `Ok(RouteDecision::SaveAndExit)` so a caller cannot accidentally let the
    /// node return normally.
    pub fn present(&mut self, node: &str, artifact_path: &std::path::Path) -> EngineResult<RouteDecision> {
        self.prompter.launch_editor(artifact_path);
        let choice = self.prompter.prompt(
            "[S]end to reviewer  [R]evise  [W]rite revision with comments  [A]pprove/file  [M]save and exit  [X] abort: ",
        );
        match choice.route() {
            RouteDecision::SaveAndExit => Err(EngineError::Paused {
                node: node.to_string(),
                reason: "save and exit".to_string(),
            }),
            RouteDecision::Abort => Err(EngineError::UserAbort),
            other => Ok(other),
        }
    }
}
