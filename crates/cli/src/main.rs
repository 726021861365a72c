//! Thin CLI driver for the governance workflow engine (§4.9, §6). Not a design surface:
//! it exists so the engine is runnable, wiring arguments to `EngineConfig` and the graph
//! orchestrator and translating the result into the documented exit codes.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use governance_engine::{
    CheckpointStore, CommandRunner, CommandTrackerRunner, CredentialPool, CredentialRegistry,
    EngineConfig, EngineError, ExhaustionRegistry, FilerAdapter, GateChoice, HumanGate, LlmDrafter,
    LlmInvoker, LlmReviewer, Orchestrator, Prompter, RealSleeper, ScriptedPrompter, StdioPrompter,
    Terminal, WorkflowState, WorkflowType,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Drives drafts through adversarial review and human gating")]
struct Args {
    /// Select the LLD flow against an existing issue number (content supplied via --brief).
    #[arg(long)]
    issue: Option<u64>,

    /// Path to the seed content: a brief (issue flow) or an issue snapshot (LLD flow), or
    /// (with --all) a directory of such files processed one at a time.
    #[arg(long)]
    brief: Option<PathBuf>,

    /// Repository that will own the lineage, checkpoint, and filed artifacts.
    #[arg(long)]
    repo: PathBuf,

    /// Disable interactive prompting; gates auto-respond per §4.6.
    #[arg(long)]
    auto: bool,

    /// Use an in-process mock Drafter/Reviewer/Filer instead of real subprocess tools.
    #[arg(long)]
    mock: bool,

    /// Resume the workflow named by --brief's thread id slug from its last checkpoint.
    #[arg(long)]
    resume: bool,

    /// Process every `*.md` file under the directory named by --brief, serially (§9).
    #[arg(long)]
    all: bool,
}

fn main() -> ExitCode {
    governance_engine::init_logging();
    let args = Args::parse();
    match run(args) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("fatal: {err:#}");
            ExitCode::from(1)
        }
    }
}

fn run(args: Args) -> Result<u8> {
    let mut config = EngineConfig::from_env();
    if args.auto {
        config.auto_mode = true;
    }

    if args.all {
        let dir = args.brief.clone().context("--all requires --brief <directory>")?;
        let mut worst = 0u8;
        for entry in std::fs::read_dir(&dir).with_context(|| format!("reading {}", dir.display()))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let code = run_one(&args, &config, &path)?;
            worst = worst.max(code);
        }
        return Ok(worst);
    }

    let brief = args.brief.clone().context("either --brief or --all is required")?;
    run_one(&args, &config, &brief)
}

fn run_one(args: &Args, config: &EngineConfig, brief: &Path) -> Result<u8> {
    let input_content = std::fs::read_to_string(brief).with_context(|| format!("reading {}", brief.display()))?;
    let slug = brief
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("workflow")
        .to_string();

    let (workflow_type, target_id) = match args.issue {
        Some(n) => (WorkflowType::Lld, n.to_string()),
        None => (WorkflowType::Issue, slug.clone()),
    };

    let repo = args.repo.to_string_lossy().to_string();
    let checkpoint_path = config
        .workflow_db
        .clone()
        .unwrap_or_else(|| args.repo.join(".governance").join("checkpoints"));
    let checkpoint = CheckpointStore::open(&checkpoint_path).context("opening checkpoint store")?;

    let thread_id = format!("{workflow_type}-{target_id}-{slug}");
    let state = if args.resume {
        checkpoint
            .load(&thread_id)?
            .with_context(|| format!("no checkpoint found for {thread_id}"))?
    } else {
        WorkflowState::new(workflow_type, target_id, repo.clone(), input_content, slug)
    };

    let result = if args.mock {
        run_with_mock(args, config, &checkpoint, state, &repo)
    } else {
        run_with_subprocess(args, config, &checkpoint, state, &repo)
    };

    match result {
        Ok(final_state) => Ok(exit_code_for(&final_state)),
        Err(EngineError::Paused { .. }) => Ok(2),
        Err(err) => {
            eprintln!("{}", err.remediation_hint());
            Ok(1)
        }
    }
}

fn exit_code_for(state: &WorkflowState) -> u8 {
    match state.terminal {
        Some(Terminal::ApprovedFiled) => 0,
        Some(_) | None => 1,
    }
}

fn run_with_subprocess(
    args: &Args,
    config: &EngineConfig,
    checkpoint: &CheckpointStore,
    state: WorkflowState,
    repo: &str,
) -> Result<WorkflowState, EngineError> {
    let registry = CredentialRegistry::load(&credentials_path())?;
    let exhaustion = ExhaustionRegistry::load(&exhaustion_path())?;

    let drafter_pool = CredentialPool::new(registry.clone(), exhaustion.clone()).with_persistence(exhaustion_path());
    let reviewer_pool = CredentialPool::new(registry, exhaustion).with_persistence(exhaustion_path());

    let drafter_invoker = LlmInvoker::new(
        drafter_pool,
        CommandRunner { program: "governance-drafter".to_string(), extra_args: vec![] },
        RealSleeper,
        Some(llm_log_path()),
    );
    let reviewer_invoker = LlmInvoker::new(
        reviewer_pool,
        CommandRunner { program: "governance-reviewer".to_string(), extra_args: vec![] },
        RealSleeper,
        Some(llm_log_path()),
    );

    let drafter = LlmDrafter::new(drafter_invoker, "drafter-default");
    let reviewer = LlmReviewer::new(reviewer_invoker, "reviewer-default", Path::new(repo).join("reviewer/lld-v2.md"));
    let filer = FilerAdapter::new(CommandTrackerRunner { program: "gh".to_string() });
    let gate = build_gate(args, config);

    let mut orchestrator = Orchestrator::new(repo, checkpoint, drafter, reviewer, filer, gate, config.clone());
    orchestrator.run(state)
}

fn run_with_mock(
    args: &Args,
    config: &EngineConfig,
    checkpoint: &CheckpointStore,
    state: WorkflowState,
    repo: &str,
) -> Result<WorkflowState, EngineError> {
    let drafter = mock::MockDrafter;
    let reviewer = mock::MockReviewer;
    let filer = mock::MockFiler;
    let gate = build_gate(args, config);

    let mut orchestrator = Orchestrator::new(repo, checkpoint, drafter, reviewer, filer, gate, config.clone());
    orchestrator.run(state)
}

/// Either prompter a real run might need, behind one concrete type so `HumanGate` doesn't
/// need a trait object.
enum CliPrompter {
    Scripted(ScriptedPrompter),
    Stdio(StdioPrompter),
}

impl Prompter for CliPrompter {
    fn launch_editor(&mut self, path: &Path) {
        match self {
            CliPrompter::Scripted(p) => p.launch_editor(path),
            CliPrompter::Stdio(p) => p.launch_editor(path),
        }
    }

    fn prompt(&mut self, message: &str) -> GateChoice {
        match self {
            CliPrompter::Scripted(p) => p.prompt(message),
            CliPrompter::Stdio(p) => p.prompt(message),
        }
    }
}

fn build_gate(args: &Args, config: &EngineConfig) -> HumanGate<CliPrompter> {
    let prompter = if config.test_mode {
        CliPrompter::Scripted(ScriptedPrompter::new(GateChoice::Approve))
    } else {
        CliPrompter::Stdio(StdioPrompter { test_mode: config.test_mode, editor_command: editor_command() })
    };
    HumanGate::new(args.auto || config.auto_mode, prompter)
}

fn editor_command() -> String {
    std::env::var("EDITOR").unwrap_or_else(|_| "vi".to_string())
}

fn credentials_path() -> PathBuf {
    app_state_dir().join("credentials.json")
}

fn exhaustion_path() -> PathBuf {
    app_state_dir().join("exhaustion.json")
}

fn llm_log_path() -> PathBuf {
    app_state_dir().join("llm-api.jsonl")
}

fn app_state_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".governance-engine")
}

mod mock {
    use chrono::{DateTime, Utc};
    use governance_engine::{Drafter, EngineResult, FilerPort, ReviewOutcome, Reviewer, WorkflowState};
    use std::path::Path;

    /// Always-approve stand-ins used by `--mock` so the CLI is runnable end-to-end without
    /// real subprocess tools.
    pub struct MockDrafter;
    impl Drafter for MockDrafter {
        fn draft(&mut self, state: &WorkflowState) -> EngineResult<String> {
            Ok(format!("# {}\n\nMock draft for {}.\n", state.target_id, state.thread_id))
        }
    }

    pub struct MockReviewer;
    impl Reviewer for MockReviewer {
        fn review(&mut self, _state: &WorkflowState, _draft: &str) -> EngineResult<ReviewOutcome> {
            Ok(ReviewOutcome {
                raw_text: r#"{"decision":"approved","blocking_issues":[]}"#.to_string(),
                reviewer_model: "mock-reviewer".to_string(),
                parse_failure: false,
            })
        }
    }

    pub struct MockFiler;
    impl FilerPort for MockFiler {
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
            _filed_on: DateTime<Utc>,
        ) -> EngineResult<(u64, String)> {
            Ok((0, "mock://filed/0".to_string()))
        }
    }
}
