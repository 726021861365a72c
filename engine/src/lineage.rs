//! Lineage Store (C1): ordered artifact directory + append-only audit log.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::warn;

use crate::error::{EngineError, EngineResult};
use crate::model::{AuditEvent, AuditLogEntry, WorkflowType};

const AUDIT_LOG_RELATIVE_PATH: &str = "docs/lineage/workflow-audit.jsonl";

/// Kinds of lineage artifacts named in §3 / §4.5. `Issue` and `Brief` share a `.md`
/// extension; only `Metadata` is JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Issue,
    Brief,
    Draft,
    Verdict,
    Metadata,
}

impl ArtifactKind {
    fn tag(self) -> &'static str {
        match self {
            ArtifactKind::Issue => "issue",
            ArtifactKind::Brief => "brief",
            ArtifactKind::Draft => "draft",
            ArtifactKind::Verdict => "verdict",
            ArtifactKind::Metadata => "metadata",
        }
    }

    fn extension(self) -> &'static str {
        match self {
            ArtifactKind::Metadata => "json",
            _ => "md",
        }
    }
}

/// Root of the lineage tree inside a target repo: `docs/lineage/{active,done}/{thread_id}`.
pub struct LineageStore {
    target_repo: PathBuf,
}

impl LineageStore {
    pub fn new(target_repo: impl Into<PathBuf>) -> Self {
        Self {
            target_repo: target_repo.into(),
        }
    }

    pub fn active_dir(&self, thread_id: &str) -> PathBuf {
        self.target_repo.join("docs/lineage/active").join(thread_id)
    }

    pub fn done_dir(&self, thread_id: &str) -> PathBuf {
        self.target_repo.join("docs/lineage/done").join(thread_id)
    }

    /// Creates `docs/lineage/active/{thread_id}` if absent. Idempotent.
    pub fn ensure_active_dir(&self, thread_id: &str) -> EngineResult<PathBuf> {
        let dir = self.active_dir(thread_id);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Returns `1 + max(existing three-digit prefixes)`, or `1` if the directory is empty
    /// or absent. Stable under process restart because it derives purely from on-disk
    /// filenames, never from an in-memory counter.
    pub fn next_sequence_number(lineage_dir: &Path) -> EngineResult<u32> {
        if !lineage_dir.exists() {
            return Ok(1);
        }
        let mut max_seen = 0u32;
        for entry in fs::read_dir(lineage_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(prefix) = name.get(0..3) {
                if let Ok(n) = prefix.parse::<u32>() {
                    max_seen = max_seen.max(n);
                }
            }
        }
        Ok(max_seen + 1)
    }

    /// Writes `NNN-{kind}.{ext}` atomically: write to a temp sibling, fsync, rename into
    /// place. Returns the allocated sequence number. On any failure the partial file is
    /// removed and the call reports failure (§4.1 failure semantics).
    pub fn write_artifact(
        &self,
        lineage_dir: &Path,
        kind: ArtifactKind,
        payload: &str,
    ) -> EngineResult<u32> {
        fs::create_dir_all(lineage_dir)?;
        let seq = Self::next_sequence_number(lineage_dir)?;
        let filename = format!("{:03}-{}.{}", seq, kind.tag(), kind.extension());
        let final_path = lineage_dir.join(&filename);
        let tmp_path = lineage_dir.join(format!(".{filename}.tmp"));

        let result = (|| -> EngineResult<()> {
            let mut file = File::create(&tmp_path)?;
            file.write_all(payload.as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp_path, &final_path)?;
            Ok(())
        })();

        if let Err(err) = result {
            let _ = fs::remove_file(&tmp_path);
            return Err(EngineError::LineageWriteFailed {
                dir: lineage_dir.to_path_buf(),
                kind: kind.tag().to_string(),
                message: err.to_string(),
            });
        }

        Ok(seq)
    }

    /// Atomically renames `active/{thread_id}` to `done/{thread_id}` (§4.1, §4.5 N5_Finalize).
    pub fn promote_to_done(&self, thread_id: &str) -> EngineResult<PathBuf> {
        let active = self.active_dir(thread_id);
        let done_parent = self
            .target_repo
            .join("docs/lineage/done");
        fs::create_dir_all(&done_parent)?;
        let done = self.done_dir(thread_id);
        if !active.exists() {
            return Err(EngineError::LineageDirMissing { path: active });
        }
        fs::rename(&active, &done)?;
        Ok(done)
    }

    /// Appends one JSON line to `docs/lineage/workflow-audit.jsonl`. Best-effort: the audit
    /// log is observability, not a correctness mechanism, so failures are logged via
    /// `tracing::warn!` and swallowed rather than propagated (§4.1).
    pub fn append_audit(
        &self,
        workflow_type: WorkflowType,
        target_id: &str,
        target_repo: &str,
        event: AuditEvent,
        details: serde_json::Value,
    ) {
        let entry = AuditLogEntry {
            timestamp: Utc::now(),
            workflow_type,
            target_id: target_id.to_string(),
            target_repo: target_repo.to_string(),
            event,
            details,
        };
        if let Err(err) = self.append_audit_entry(&entry) {
            warn!(error = %err, "audit log append failed; continuing (best-effort log)");
        }
    }

    fn append_audit_entry(&self, entry: &AuditLogEntry) -> EngineResult<()> {
        let path = self.target_repo.join(AUDIT_LOG_RELATIVE_PATH);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let line = serde_json::to_string(entry)?;
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "{line}")?;
        file.flush()?;
        Ok(())
    }

    /// Reads back every audit entry for this repo, in file order. Used by tests and by
    /// the resume driver to check R1/P4.
    pub fn read_audit_log(&self) -> EngineResult<Vec<AuditLogEntry>> {
        let path = self.target_repo.join(AUDIT_LOG_RELATIVE_PATH);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(path)?;
        let mut entries = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(line)?);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn sequence_numbers_are_stable_under_restart() {
        let dir = tempdir().unwrap();
        let store = LineageStore::new(dir.path());
        let lineage_dir = store.ensure_active_dir("issue-1-x").unwrap();

        let seq1 = store
            .write_artifact(&lineage_dir, ArtifactKind::Brief, "brief")
            .unwrap();
        assert_eq!(seq1, 1);

        // Simulate a fresh process: a new LineageStore handle, same directory.
        let store2 = LineageStore::new(dir.path());
        let seq2 = store2
            .write_artifact(&lineage_dir, ArtifactKind::Draft, "draft")
            .unwrap();
        assert_eq!(seq2, 2);
    }

    #[test]
    fn write_artifact_chooses_extension_by_kind() {
        let dir = tempdir().unwrap();
        let store = LineageStore::new(dir.path());
        let lineage_dir = store.ensure_active_dir("lld-62-add-x").unwrap();
        store
            .write_artifact(&lineage_dir, ArtifactKind::Metadata, "{}")
            .unwrap();
        assert!(lineage_dir.join("001-metadata.json").exists());
    }

    #[test]
    fn promote_to_done_moves_the_whole_directory() {
        let dir = tempdir().unwrap();
        let store = LineageStore::new(dir.path());
        let lineage_dir = store.ensure_active_dir("issue-1-x").unwrap();
        store
            .write_artifact(&lineage_dir, ArtifactKind::Brief, "brief")
            .unwrap();

        let done = store.promote_to_done("issue-1-x").unwrap();
        assert!(done.join("001-brief.md").exists());
        assert!(!store.active_dir("issue-1-x").exists());
    }

    #[test]
    fn promote_to_done_fails_when_active_dir_missing() {
        let dir = tempdir().unwrap();
        let store = LineageStore::new(dir.path());
        let err = store.promote_to_done("never-created").unwrap_err();
        assert!(matches!(err, EngineError::LineageDirMissing { .. }));
    }

    #[test]
    fn audit_log_round_trips_in_order() {
        let dir = tempdir().unwrap();
        let store = LineageStore::new(dir.path());
        store.append_audit(
            WorkflowType::Issue,
            "1",
            dir.path().to_str().unwrap(),
            AuditEvent::Start,
            serde_json::json!({}),
        );
        store.append_audit(
            WorkflowType::Issue,
            "1",
            dir.path().to_str().unwrap(),
            AuditEvent::Draft,
            serde_json::json!({"n": 1}),
        );

        let entries = store.read_audit_log().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].event, AuditEvent::Start);
        assert_eq!(entries[1].event, AuditEvent::Draft);
    }

    #[test]
    fn audit_log_tolerates_missing_file_on_read() {
        let dir = tempdir().unwrap();
        let store = LineageStore::new(dir.path());
        assert_eq!(store.read_audit_log().unwrap().len(), 0);
    }
}
