//! Filer Adapter (C7): publishes an approved draft to the external issue tracker.
//!
//! Issue-flow only (§4.7). Invokes the tracker CLI with list-form arguments, mirroring the
//! never-via-shell convention already used by the LLM Invoker's `CommandRunner`.

use std::path::Path;

use crate::error::{EngineError, EngineResult};

/// A small deterministic colour map, keyed by label category, so labels created by this
/// adapter are visually consistent across runs.
fn label_colour(label: &str) -> &'static str {
    match label.to_lowercase().as_str() {
        l if l.contains("bug") => "d73a4a",
        l if l.contains("feature") => "a2eeef",
        l if l.contains("governance") => "5319e7",
        l if l.contains("lld") => "0e8a16",
        _ => "ededed",
    }
}

/// Abstraction over the tracker CLI invocation so filing is testable without a real
/// external tool.
pub trait TrackerRunner {
    fn label_exists(&mut self, repo: &Path, label: &str) -> EngineResult<bool>;
    fn create_label(&mut self, repo: &Path, label: &str, colour: &str) -> EngineResult<()>;
    fn create_issue(&mut self, repo: &Path, title: &str, body: &str, labels: &[String]) -> EngineResult<(u64, String)>;
}

/// Invokes a configured tracker CLI binary via `std::process::Command`, list-form only.
pub struct CommandTrackerRunner {
    pub program: String,
}

impl TrackerRunner for CommandTrackerRunner {
    fn label_exists(&mut self, repo: &Path, label: &str) -> EngineResult<bool> {
        let output = std::process::Command::new(&self.program)
            .args(["label", "view", label])
            .current_dir(repo)
            .output()
            .map_err(|e| EngineError::FilerFailed { message: e.to_string() })?;
        Ok(output.status.success())
    }

    fn create_label(&mut self, repo: &Path, label: &str, colour: &str) -> EngineResult<()> {
        let status = std::process::Command::new(&self.program)
            .args(["label", "create", label, "--color", colour])
            .current_dir(repo)
            .status()
            .map_err(|e| EngineError::FilerFailed { message: e.to_string() })?;
        if !status.success() {
            return Err(EngineError::FilerFailed {
                message: format!("label creation failed for {label}"),
            });
        }
        Ok(())
    }

    fn create_issue(&mut self, repo: &Path, title: &str, body: &str, labels: &[String]) -> EngineResult<(u64, String)> {
        let mut command = std::process::Command::new(&self.program);
        command.args(["issue", "create", "--title", title, "--body", body]);
        for label in labels {
            command.args(["--label", label]);
        }
        command.current_dir(repo);
        let output = command
            .output()
            .map_err(|e| EngineError::FilerFailed { message: e.to_string() })?;
        if !output.status.success() {
            return Err(EngineError::FilerFailed {
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let url = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let number = url
            .rsplit('/')
            .next()
            .and_then(|n| n.parse::<u64>().ok())
            .ok_or_else(|| EngineError::FilerFailed {
                message: format!("could not parse issue number from tracker output: {url}"),
            })?;
        Ok((number, url))
    }
}

pub struct FilerAdapter<R: TrackerRunner> {
    runner: R,
}

impl<R: TrackerRunner> FilerAdapter<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    /// Creates any label in `labels` that does not already exist in `repo` (§4.7).
    /// Creation failures are fatal, per spec.
    pub fn ensure_labels(&mut self, repo: &Path, labels: &[String]) -> EngineResult<()> {
        for label in labels {
            if !self.runner.label_exists(repo, label)? {
                self.runner.create_label(repo, label, label_colour(label))?;
            }
        }
        Ok(())
    }

    /// Reads the title from the body's first `# ` heading, appends the metadata footer,
    /// and files the issue (§4.7).
    pub fn create_issue(
        &mut self,
        repo: &Path,
        body: &str,
        labels: &[String],
        decision: &str,
        reviewer_model: &str,
        review_rounds: u32,
        filed_on: chrono::DateTime<chrono::Utc>,
    ) -> EngineResult<(u64, String)> {
        let title = extract_title(body)?;
        let body_with_footer = append_metadata_footer(body, decision, reviewer_model, review_rounds, filed_on);
        self.runner.create_issue(repo, &title, &body_with_footer, labels)
    }
}

fn extract_title(body: &str) -> EngineResult<String> {
    body.lines()
        .find_map(|line| line.strip_prefix("# ").map(|t| t.trim().to_string()))
        .ok_or_else(|| EngineError::FilerFailed {
            message: "body has no `# ` title heading".to_string(),
        })
}

fn append_metadata_footer(
    body: &str,
    decision: &str,
    reviewer_model: &str,
    review_rounds: u32,
    filed_on: chrono::DateTime<chrono::Utc>,
) -> String {
    format!(
        "{}\n\n---\n_Reviewer decision: {decision} · Model: {reviewer_model} · Filed: {} · Review rounds: {review_rounds}_\n",
        body.trim_end(),
        filed_on.format("%Y-%m-%d"),
    )
}
