//! Column families and key layout for the checkpoint store.

/// Durable per-workflow state snapshots, keyed by `thread_id`.
pub const CF_CHECKPOINTS: &str = "checkpoints";
/// Transition history kept alongside each checkpoint, for forensic replay (§4.5).
pub const CF_TRANSITIONS: &str = "transitions";

pub const ALL_CFS: &[&str] = &[CF_CHECKPOINTS, CF_TRANSITIONS];

pub mod keys {
    /// The checkpoint key is the thread id itself; no composition needed since the store
    /// is one database per repository (§4.2, §5).
    pub fn checkpoint(thread_id: &str) -> String {
        thread_id.to_string()
    }

    pub fn transitions(thread_id: &str) -> String {
        thread_id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_key_is_thread_id() {
        assert_eq!(keys::checkpoint("issue-1-x"), "issue-1-x");
    }
}
