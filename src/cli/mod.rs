//! Command-line façade.
//!
//! A thin one-shot wrapper over [`ExecutionEngine`]: build a session from
//! flags, execute a snippet or a mounted app entry file, stream output
//! live, clean up, and exit with the user code's exit code.

use crate::{
    ContainerConfig, ExecutionEngine, ExecutionOptions, MountSpec, PlacementStrategy,
    SessionConfig, StreamOutput, Verbosity,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub mod config;

pub use config::CliConfig;

#[derive(Debug, Parser)]
#[command(
    name = "codebox",
    version,
    about = "Run untrusted code snippets in disposable containers"
)]
pub struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Promote per-phase progress logging to info level
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Execute a snippet or a mounted app entry file
    Run(RunArgs),
    /// List registered languages
    Languages,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StrategyArg {
    /// Fresh container per run
    PerExecution,
    /// One container kept for the session
    PerSession,
    /// Borrow from the warm pool
    Pool,
}

impl From<StrategyArg> for PlacementStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::PerExecution => PlacementStrategy::PerExecution,
            StrategyArg::PerSession => PlacementStrategy::PerSession,
            StrategyArg::Pool => PlacementStrategy::Pool,
        }
    }
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Language to execute (see `codebox languages`)
    #[arg(short, long)]
    pub language: String,

    /// Inline code snippet
    #[arg(short, long, conflicts_with = "file")]
    pub code: Option<String>,

    /// Read the snippet from a local file
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Dependency tokens, repeatable (interpreted by the language plugin)
    #[arg(short = 'd', long = "dep")]
    pub dependencies: Vec<String>,

    /// Container placement strategy
    #[arg(long, value_enum, default_value_t = StrategyArg::PerExecution)]
    pub strategy: StrategyArg,

    /// Image override; the language default applies when omitted
    #[arg(long)]
    pub image: Option<String>,

    /// Bind mount as kind:source:target with kind in {file,dir,zip}
    #[arg(long = "mount")]
    pub mounts: Vec<String>,

    /// Environment variable as KEY=VALUE, repeatable
    #[arg(long = "env")]
    pub env: Vec<String>,

    /// Memory cap (512m, 1g, 512k, or bytes)
    #[arg(long)]
    pub memory: Option<String>,

    /// Fractional CPU allowance, e.g. 0.5
    #[arg(long)]
    pub cpus: Option<f64>,

    /// Kill the execution after this many seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Keep generated files on disk after cleanup
    #[arg(long)]
    pub keep_generated: bool,

    /// Run an existing entry file instead of inline code
    #[arg(long, requires = "app_cwd")]
    pub app_entry: Option<String>,

    /// Working directory of the app; must equal a mount target
    #[arg(long, requires = "app_entry")]
    pub app_cwd: Option<String>,
}

/// Dispatch a parsed command line. Returns the process exit code.
pub async fn run(cli: Cli) -> anyhow::Result<i32> {
    match cli.command {
        Command::Languages => {
            for name in crate::language::names() {
                println!("{}", name);
            }
            Ok(0)
        }
        Command::Run(args) => run_once(cli.config.as_deref(), cli.verbose, args).await,
    }
}

async fn run_once(
    config_path: Option<&std::path::Path>,
    verbose: bool,
    args: RunArgs,
) -> anyhow::Result<i32> {
    let cli_config = CliConfig::discover(config_path)?;
    let engine = ExecutionEngine::with_config(cli_config.to_engine_config()).await?;
    if verbose {
        engine.set_verbosity(Verbosity::Debug);
    }

    let strategy: PlacementStrategy = args.strategy.into();
    let container = ContainerConfig {
        image: args.image.clone(),
        mounts: parse_mounts(&args.mounts)?,
        env: args.env.clone(),
        ..Default::default()
    };

    let session_id = engine.create_session(SessionConfig {
        strategy,
        container,
        session_id: None,
        enforce_new_session: false,
    })?;

    let mut options = ExecutionOptions::new(&args.language)
        .with_dependencies(args.dependencies.clone())
        .with_streams(stdio_streams());
    options.keep_generated_files = args.keep_generated;

    if let Some(entry) = &args.app_entry {
        let cwd = args.app_cwd.as_deref().unwrap_or_default();
        options = options.with_run_app(entry, cwd);
    } else {
        let code = match (&args.code, &args.file) {
            (Some(code), _) => code.clone(),
            (None, Some(path)) => std::fs::read_to_string(path)?,
            (None, None) => anyhow::bail!("either --code, --file, or --app-entry is required"),
        };
        options = options.with_code(code);
    }

    if let Some(memory) = &args.memory {
        options = options.with_memory_limit(memory);
    }
    if let Some(cpus) = args.cpus {
        options = options.with_cpu_limit(cpus);
    }
    if let Some(secs) = args.timeout_secs {
        options = options.with_timeout(Duration::from_secs(secs));
    }

    let outcome = engine.execute_code(&session_id, options).await;

    // Per-execution sessions clean up after themselves.
    if strategy != PlacementStrategy::PerExecution {
        if let Err(e) = engine.cleanup_session(&session_id, args.keep_generated).await {
            tracing::warn!("Session cleanup failed: {}", e);
        }
    }

    let result = outcome?;

    if args.keep_generated && !result.generated_files.is_empty() {
        eprintln!("Generated files kept under {}:", result.workspace_dir.display());
        for file in &result.generated_files {
            eprintln!("  {}", file.display());
        }
    }

    Ok(result.exit_code.clamp(i32::MIN as i64, i32::MAX as i64) as i32)
}

/// Live sinks writing chunks straight to this process's stdio.
fn stdio_streams() -> StreamOutput {
    StreamOutput {
        stdout: Some(Arc::new(|chunk: &[u8]| {
            let mut out = std::io::stdout().lock();
            let _ = out.write_all(chunk);
            let _ = out.flush();
        })),
        stderr: Some(Arc::new(|chunk: &[u8]| {
            let mut err = std::io::stderr().lock();
            let _ = err.write_all(chunk);
            let _ = err.flush();
        })),
        dependency_stdout: None,
        dependency_stderr: None,
    }
}

/// Parse `kind:source:target` mount flags.
fn parse_mounts(specs: &[String]) -> anyhow::Result<Vec<MountSpec>> {
    let mut mounts = Vec::with_capacity(specs.len());
    for spec in specs {
        let mut parts = spec.splitn(3, ':');
        let (kind, source, target) = match (parts.next(), parts.next(), parts.next()) {
            (Some(kind), Some(source), Some(target)) => (kind, source, target),
            _ => anyhow::bail!("invalid mount spec {:?}, expected kind:source:target", spec),
        };

        let source = PathBuf::from(source);
        let target = target.to_string();
        let mount = match kind {
            "file" => MountSpec::File { source, target },
            "dir" | "directory" => MountSpec::Directory { source, target },
            "zip" => MountSpec::Zip { source, target },
            other => anyhow::bail!("unknown mount kind {:?}, expected file, dir, or zip", other),
        };
        mounts.push(mount);
    }
    Ok(mounts)
}
