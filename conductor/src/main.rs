//! Phase-driven agent workflow conductor.
//!
//! Task records live under `.conductor/tasks/<slug>.json`; each `run` drives
//! one task through its phases and leaves a JSONL log and a Markdown summary
//! under `.conductor/logs/`.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use conductor::core::blocks::Corpus;
use conductor::create::{create_task, init_workspace};
use conductor::exit_codes;
use conductor::io::config::{ConductorConfig, load_config};
use conductor::io::executor::{AgentExecutor, CliExecutor, DryRunExecutor};
use conductor::io::knowledge::KnowledgeBase;
use conductor::io::paths::WorkspacePaths;
use conductor::io::task_store::NewTask;
use conductor::logging;
use conductor::orchestrator::{Orchestrator, RunOutcome, RunStop};

#[derive(Parser)]
#[command(
    name = "conductor",
    version,
    about = "Phase-driven agent workflow conductor"
)]
struct Cli {
    /// Project root containing `.conductor/`.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.conductor/`, the knowledge store and a default config if missing.
    Init,
    /// Write a new task record at status `plan`.
    Create {
        /// Human-readable task name; the slug is derived from it.
        name: String,
        #[arg(long)]
        requirements: Option<String>,
        #[arg(long)]
        design_url: Option<String>,
        #[arg(long = "ticket")]
        ticket_id: Option<String>,
    },
    /// Drive a task through its phases until it completes or escalates.
    Run {
        slug: String,
        /// Print prompts instead of launching agents.
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        max_iterations: Option<u32>,
        #[arg(long)]
        phase_delay_ms: Option<u64>,
    },
    /// Inspect or extend the knowledge store.
    Knowledge {
        #[command(subcommand)]
        command: KnowledgeCommand,
    },
}

#[derive(Subcommand)]
enum KnowledgeCommand {
    /// Print the knowledge context a phase prompt would receive for `name`.
    Context { name: String },
    /// Append a rendered block from `file` to a corpus.
    Append { corpus: CorpusArg, file: PathBuf },
}

#[derive(Clone, Copy, ValueEnum)]
enum CorpusArg {
    Pattern,
    AntiPattern,
    Insight,
}

impl From<CorpusArg> for Corpus {
    fn from(arg: CorpusArg) -> Self {
        match arg {
            CorpusArg::Pattern => Corpus::Patterns,
            CorpusArg::AntiPattern => Corpus::AntiPatterns,
            CorpusArg::Insight => Corpus::Insights,
        }
    }
}

fn main() -> ExitCode {
    logging::init();
    let cli = Cli::parse();
    match dispatch(&cli) {
        Ok(code) => exit_code(code),
        Err(err) => {
            eprintln!("{err:#}");
            exit_code(exit_codes::INVALID)
        }
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

fn dispatch(cli: &Cli) -> Result<i32> {
    let root = cli.root.as_path();
    match &cli.command {
        Command::Init => cmd_init(root),
        Command::Create {
            name,
            requirements,
            design_url,
            ticket_id,
        } => cmd_create(
            root,
            name,
            NewTask {
                requirements: requirements.clone(),
                design_url: design_url.clone(),
                ticket_id: ticket_id.clone(),
            },
        ),
        Command::Run {
            slug,
            dry_run,
            max_iterations,
            phase_delay_ms,
        } => cmd_run(root, slug, *dry_run, *max_iterations, *phase_delay_ms),
        Command::Knowledge { command } => match command {
            KnowledgeCommand::Context { name } => cmd_knowledge_context(root, name),
            KnowledgeCommand::Append { corpus, file } => {
                cmd_knowledge_append(root, (*corpus).into(), file)
            }
        },
    }
}

fn cmd_init(root: &Path) -> Result<i32> {
    let paths = init_workspace(root)?;
    println!("initialized {}", paths.conductor_dir.display());
    Ok(exit_codes::OK)
}

fn cmd_create(root: &Path, name: &str, extra: NewTask) -> Result<i32> {
    let outcome = create_task(root, name, extra)?;
    println!("{}", outcome.slug);
    println!("task record: {}", outcome.task_path.display());
    Ok(exit_codes::OK)
}

fn cmd_run(
    root: &Path,
    slug: &str,
    dry_run: bool,
    max_iterations: Option<u32>,
    phase_delay_ms: Option<u64>,
) -> Result<i32> {
    let paths = WorkspacePaths::new(root);
    let mut cfg = load_config(&paths.config_path)?;
    if let Some(max) = max_iterations {
        cfg.max_iterations = max;
    }
    if let Some(delay) = phase_delay_ms {
        cfg.phase_delay_ms = delay;
    }

    let outcome = if dry_run {
        run_with(root, cfg, slug, &DryRunExecutor)?
    } else {
        let executor = CliExecutor::new(&cfg.executor);
        run_with(root, cfg, slug, &executor)?
    };
    report(&outcome);
    Ok(outcome.exit_code())
}

fn run_with<E: AgentExecutor>(
    root: &Path,
    cfg: ConductorConfig,
    slug: &str,
    executor: &E,
) -> Result<RunOutcome> {
    Orchestrator::new(root, cfg, executor)?.run(slug)
}

fn report(outcome: &RunOutcome) {
    match &outcome.stop {
        RunStop::Completed => println!("completed after {} phase(s)", outcome.iterations),
        RunStop::Escalated { reason } => println!("escalated: {reason}"),
        RunStop::SafetyValve {
            iterations,
            max_iterations,
        } => println!(
            "stopped: {iterations} of {max_iterations} iterations used, task still open"
        ),
    }
    let status = outcome
        .final_status
        .map_or("unknown", |status| status.as_str());
    println!("final status: {status}");
    println!("session log: {}", outcome.log_path.display());
    println!("summary: {}", outcome.summary_path.display());
}

fn knowledge_base(root: &Path) -> Result<KnowledgeBase> {
    let base = WorkspacePaths::new(root);
    let cfg = load_config(&base.config_path)?;
    let paths = base.with_knowledge_root(cfg.knowledge_dir.as_deref());
    Ok(KnowledgeBase::new(paths.knowledge_root))
}

fn cmd_knowledge_context(root: &Path, name: &str) -> Result<i32> {
    println!("{}", knowledge_base(root)?.knowledge_context(name));
    Ok(exit_codes::OK)
}

fn cmd_knowledge_append(root: &Path, corpus: Corpus, file: &Path) -> Result<i32> {
    let text = fs::read_to_string(file).with_context(|| format!("read {}", file.display()))?;
    let kb = knowledge_base(root)?;
    kb.initialize()?;
    kb.append_raw(corpus, &text)?;
    println!("appended to {}", kb.corpus_path(corpus).display());
    Ok(exit_codes::OK)
}
