//! Environment-driven configuration (§4.8), resolved once at process start.

use std::env;
use std::path::PathBuf;

/// Resolved engine configuration. Construct via [`EngineConfig::from_env`] in the driver;
/// unit tests should use [`Default`] so they never touch the process environment.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Overrides the checkpoint database path (`WORKFLOW_DB`). When `None`, the path is
    /// derived from `target_repo` by the caller.
    pub workflow_db: Option<PathBuf>,
    /// `AUTO_MODE`: disables interactive prompting in the Human Gate.
    pub auto_mode: bool,
    /// `TEST_MODE`: forces deterministic gate responses, suppresses editor launches.
    pub test_mode: bool,
    /// Override for the LLD iteration bound (defaults to 20 per §4.5).
    pub max_iterations_lld: u32,
    /// Override for the issue iteration bound (defaults to 25 per §4.5).
    pub max_iterations_issue: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workflow_db: None,
            auto_mode: false,
            test_mode: false,
            max_iterations_lld: 20,
            max_iterations_issue: 25,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = env::var("WORKFLOW_DB") {
            if !path.is_empty() {
                config.workflow_db = Some(PathBuf::from(path));
            }
        }
        config.auto_mode = env_truthy("AUTO_MODE");
        config.test_mode = env_truthy("TEST_MODE");

        if let Some(v) = env_u32("MAX_ITERATIONS_LLD") {
            config.max_iterations_lld = v;
        }
        if let Some(v) = env_u32("MAX_ITERATIONS_ISSUE") {
            config.max_iterations_issue = v;
        }

        config
    }
}

fn env_truthy(key: &str) -> bool {
    match env::var(key) {
        Ok(v) => !matches!(v.as_str(), "" | "0" | "false" | "FALSE" | "no" | "NO"),
        Err(_) => false,
    }
}

fn env_u32(key: &str) -> Option<u32> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Initialize `tracing` with an `EnvFilter` seeded from `RUST_LOG`, writing to stderr
/// (§4.8). Idempotent-safe to call once at process start; calling twice in the same
/// process will panic, matching `tracing_subscriber`'s own global-subscriber contract.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
}
