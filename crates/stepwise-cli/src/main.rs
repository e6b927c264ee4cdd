mod cmd_deps;
mod cmd_editor;
mod cmd_step;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use stepwise::v1::shell_quote;
use stepwise_git::{Orchestrator, Project, load_config};
use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(name = "stepwise", version)]
#[command(about = "Write tutorials as git histories of numbered steps")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Run as if started in this directory
    #[arg(short = 'C', long = "repo", global = true, default_value = ".")]
    repo: PathBuf,

    /// Config file (default: .stepwise/config.json in the project)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (sets log level to DEBUG)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(flatten)]
    Step(cmd_step::StepCommand),
    /// Rewrite history to update the package manifest
    Deps {
        #[command(subcommand)]
        op: cmd_deps::DepsOp,
    },
    /// Sequence editor for rewrites started by this tool
    #[command(hide = true)]
    Editor {
        #[command(subcommand)]
        mode: cmd_editor::EditorArgs,
    },
    /// Helpers run from inside a rewrite
    #[command(hide = true)]
    Rebase {
        #[command(subcommand)]
        helper: cmd_editor::RebaseHelper,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG in the environment always takes precedence; --verbose falls back to DEBUG.
    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::WARN.into())
    };
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init();

    let orchestrator = open(&cli.repo, cli.config.as_deref())?;

    match cli.command {
        Commands::Step(cmd) => cmd_step::run(&orchestrator, cmd),
        Commands::Deps { op } => cmd_deps::run(&orchestrator, op),
        Commands::Editor { mode } => cmd_editor::run_editor(&orchestrator, mode),
        Commands::Rebase { helper } => cmd_editor::run_helper(&orchestrator, helper),
    }
}

/// The orchestrator for the project at `repo`. Rewrites call back into this
/// same executable, pinned to the same project and config.
fn open(repo: &Path, config_path: Option<&Path>) -> Result<Orchestrator> {
    let project = Project::discover(repo)?;
    let config = load_config(&project, config_path)?;

    let exe = std::env::current_exe().context("Failed to locate the stepwise executable")?;
    let mut program = format!(
        "{} -C {}",
        shell_quote(&exe.to_string_lossy()),
        shell_quote(&project.root().to_string_lossy())
    );
    if let Some(path) = config_path {
        let path = std::path::absolute(path)
            .with_context(|| format!("Failed to resolve {}", path.display()))?;
        program.push_str(" --config ");
        program.push_str(&shell_quote(&path.to_string_lossy()));
    }

    Ok(Orchestrator::new(project, config, program))
}
