use anyhow::{Context, Result};
use clap::Subcommand;
use std::path::PathBuf;
use stepwise::v1::{SortScope, StepId};
use stepwise_git::{EditorMode, Orchestrator, editor};

/// `GIT_SEQUENCE_EDITOR` entry points. git appends the instruction file.
#[derive(Subcommand, Debug)]
pub enum EditorArgs {
    /// Mark steps `edit`
    Edit {
        /// Steps to pause at, followed by the instruction file
        #[arg(required = true, num_args = 1..)]
        args: Vec<String>,
    },
    /// Renumber steps by position
    Sort { scope: SortScope, todo: PathBuf },
    /// Reword the first commit
    Reword {
        #[arg(short, long)]
        message: Option<String>,
        todo: PathBuf,
    },
    /// Restore the instruction list of the current pause
    ResetTodo { todo: PathBuf },
}

/// Commands scheduled as `exec` lines inside a rewrite.
#[derive(Subcommand, Debug)]
pub enum RebaseHelper {
    /// Record the pause about to happen
    StashState,
    /// Amend HEAD's message, renumbering it by position
    Reword {
        #[arg(short, long)]
        message: Option<String>,

        #[arg(long)]
        keep_number: bool,
    },
    /// Rebuild step branches and publish the step map
    Finalize,
    /// Replay a super-step under its new number
    SuperPick { hash: String },
}

pub fn run_editor(orchestrator: &Orchestrator, args: EditorArgs) -> Result<()> {
    let (mode, todo) = match args {
        EditorArgs::Edit { mut args } => {
            let todo = args.pop().map(PathBuf::from).context("Missing todo file")?;
            let steps = args
                .iter()
                .map(|s| s.parse::<StepId>())
                .collect::<Result<Vec<_>, _>>()?;
            (EditorMode::Edit { steps }, todo)
        }
        EditorArgs::Sort { scope, todo } => (EditorMode::Sort { scope }, todo),
        EditorArgs::Reword { message, todo } => (EditorMode::Reword { message }, todo),
        EditorArgs::ResetTodo { todo } => (EditorMode::ResetTodo, todo),
    };

    editor::run(
        &mode,
        &todo,
        &orchestrator.helpers(),
        &orchestrator.rebase_states(),
    )
}

pub fn run_helper(orchestrator: &Orchestrator, helper: RebaseHelper) -> Result<()> {
    match helper {
        RebaseHelper::StashState => orchestrator.stash_state(),
        RebaseHelper::Reword {
            message,
            keep_number,
        } => orchestrator.reword_recent(message.as_deref(), keep_number),
        RebaseHelper::Finalize => orchestrator.finalize(),
        RebaseHelper::SuperPick { hash } => orchestrator.super_pick(&hash),
    }
}
