//! Core data model: Workflow State, Verdict, audit records (§3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    Issue,
    Lld,
}

impl WorkflowType {
    /// §4.5: LLDs cap at 20 iterations, issues at 25.
    pub fn default_max_iterations(self) -> u32 {
        match self {
            WorkflowType::Lld => 20,
            WorkflowType::Issue => 25,
        }
    }
}

impl std::fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowType::Issue => write!(f, "issue"),
            WorkflowType::Lld => write!(f, "lld"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Approved,
    Block,
    Discuss,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Approved => write!(f, "APPROVED"),
            Decision::Block => write!(f, "BLOCK"),
            Decision::Discuss => write!(f, "DISCUSS"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Terminal {
    ApprovedFiled,
    UserAbort,
    MaxIterations,
    Fatal,
}

/// The structured result of one review (§3, §4.4).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Verdict {
    pub decision: Decision,
    pub blocking_issues: Vec<String>,
    pub high_priority_issues: Vec<String>,
    pub suggestions: Vec<String>,
    pub reviewer_model: String,
    pub raw_text: String,
}

impl Verdict {
    /// B3 / §4.5 routing tie-break: an APPROVED verdict carrying blocking issues is
    /// self-contradictory and is treated as BLOCK, fail-closed.
    pub fn effective_decision(&self) -> Decision {
        if self.decision == Decision::Approved && !self.blocking_issues.is_empty() {
            Decision::Block
        } else {
            self.decision
        }
    }
}

/// One line of the append-only per-repo audit log (§3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub timestamp: DateTime<Utc>,
    pub workflow_type: WorkflowType,
    pub target_id: String,
    pub target_repo: String,
    pub event: AuditEvent,
    #[serde(default)]
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    Start,
    Draft,
    Review,
    HumanEdit,
    HumanPause,
    Resume,
    File,
    Complete,
    Error,
}

/// The single mutable object threaded through every node (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub thread_id: String,
    pub workflow_type: WorkflowType,
    pub target_id: String,
    pub target_repo: String,
    pub input_content: String,
    pub current_draft: Option<String>,
    pub current_verdict: Option<Verdict>,
    pub accumulated_requirements: Vec<String>,
    pub iteration_count: u32,
    pub draft_count: u32,
    pub verdict_count: u32,
    pub next_node: String,
    pub error_message: Option<String>,
    pub terminal: Option<Terminal>,
    /// The identifier returned by the Filer (issue number/url), set at `N4_File` (§4.5).
    #[serde(default)]
    pub external_id: Option<String>,
}

impl WorkflowState {
    pub fn new(
        workflow_type: WorkflowType,
        target_id: impl Into<String>,
        target_repo: impl Into<String>,
        input_content: impl Into<String>,
        slug: impl Into<String>,
    ) -> Self {
        let target_id = target_id.into();
        let slug = slug.into();
        let thread_id = format!("{workflow_type}-{target_id}-{slug}");
        Self {
            thread_id,
            workflow_type,
            target_id,
            target_repo: target_repo.into(),
            input_content: input_content.into(),
            current_draft: None,
            current_verdict: None,
            accumulated_requirements: Vec::new(),
            iteration_count: 0,
            draft_count: 0,
            verdict_count: 0,
            next_node: "N0_Ingest".to_string(),
            error_message: None,
            terminal: None,
            external_id: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.terminal.is_none()
    }

    /// §4.4: merge new blocking issues into the standing requirements list, deduplicating
    /// by normalized (lower-case, whitespace-collapsed) text. Requirements are never
    /// removed (I3).
    pub fn merge_requirements(&mut self, blocking_issues: &[String]) {
        for issue in blocking_issues {
            let normalized = normalize(issue);
            let already_present = self
                .accumulated_requirements
                .iter()
                .any(|existing| normalize(existing) == normalized);
            if !already_present {
                self.accumulated_requirements.push(issue.clone());
            }
        }
    }
}

pub(crate) fn normalize(s: &str) -> String {
    s.trim().to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_id_composition() {
        let state = WorkflowState::new(WorkflowType::Issue, "42", "/repo", "body", "add-x");
        assert_eq!(state.thread_id, "issue-42-add-x");
    }

    #[test]
    fn effective_decision_flips_contradictory_approve() {
        let v = Verdict {
            decision: Decision::Approved,
            blocking_issues: vec!["fix scope".into()],
            high_priority_issues: vec![],
            suggestions: vec![],
            reviewer_model: "m".into(),
            raw_text: String::new(),
        };
        assert_eq!(v.effective_decision(), Decision::Block);
    }

    #[test]
    fn effective_decision_respects_clean_approve() {
        let v = Verdict {
            decision: Decision::Approved,
            blocking_issues: vec![],
            high_priority_issues: vec![],
            suggestions: vec![],
            reviewer_model: "m".into(),
            raw_text: String::new(),
        };
        assert_eq!(v.effective_decision(), Decision::Approved);
    }

    #[test]
    fn merge_requirements_dedupes_case_and_whitespace() {
        let mut state = WorkflowState::new(WorkflowType::Lld, "62", "/repo", "body", "add-x");
        state.merge_requirements(&["Define  worktree scope".to_string()]);
        state.merge_requirements(&["define worktree   scope".to_string()]);
        assert_eq!(state.accumulated_requirements.len(), 1);
    }

    #[test]
    fn merge_requirements_never_shrinks() {
        let mut state = WorkflowState::new(WorkflowType::Lld, "62", "/repo", "body", "add-x");
        state.merge_requirements(&["a".to_string(), "b".to_string()]);
        state.merge_requirements(&["c".to_string()]);
        assert_eq!(state.accumulated_requirements.len(), 3);
        assert!(state.accumulated_requirements.contains(&"a".to_string()));
    }
}
