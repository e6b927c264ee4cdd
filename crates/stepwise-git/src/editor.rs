//! The sequence editor: the program git runs on the instruction list of
//! every rewrite this crate starts.
//!
//! Each mode is a pure transformation of the list (see [`transform`]); only
//! `reset-todo` reads outside state, the snapshot of a recorded pause.

use crate::rebase_state::RebaseStateStore;
use anyhow::{Context, Result};
use std::path::Path;
use stepwise::v1::{HelperCommands, SortScope, StepId, TodoList, shell_quote};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorMode {
    /// Mark the given steps `edit`.
    Edit { steps: Vec<StepId> },
    /// Renumber the steps in scope by position.
    Sort { scope: SortScope },
    /// Change the message of the first commit.
    Reword { message: Option<String> },
    /// Replace the list with the one recorded at the restored pause.
    ResetTodo,
}

impl EditorMode {
    pub fn name(&self) -> &'static str {
        match self {
            EditorMode::Edit { .. } => "edit",
            EditorMode::Sort { .. } => "sort",
            EditorMode::Reword { .. } => "reword",
            EditorMode::ResetTodo => "reset-todo",
        }
    }

    /// Shell command for `GIT_SEQUENCE_EDITOR`; git appends the list's path.
    pub fn command(&self, program: &str) -> String {
        let mut command = format!("{} editor {}", program, self.name());
        match self {
            EditorMode::Edit { steps } => {
                for step in steps {
                    command.push(' ');
                    command.push_str(&step.to_string());
                }
            }
            EditorMode::Sort { scope } => {
                command.push(' ');
                command.push_str(&scope.to_string());
            }
            EditorMode::Reword {
                message: Some(message),
            } => {
                command.push_str(" -m ");
                command.push_str(&shell_quote(message));
            }
            EditorMode::Reword { message: None } | EditorMode::ResetTodo => {}
        }
        command
    }
}

/// Apply `mode` to an instruction list. `None` for modes that do not
/// derive the new list from the old one.
pub fn transform(mode: &EditorMode, content: &str, helpers: &HelperCommands) -> Option<String> {
    let mut todo = TodoList::parse(content);
    match mode {
        EditorMode::Edit { steps } => todo.mark_edits(steps, helpers),
        EditorMode::Sort { scope } => todo.renumber(*scope, helpers),
        EditorMode::Reword { message } => todo.reword_first(message.as_deref(), helpers),
        EditorMode::ResetTodo => return None,
    }
    Some(todo.render())
}

/// Rewrite the instruction file at `todo_file` in place.
pub fn run(
    mode: &EditorMode,
    todo_file: &Path,
    helpers: &HelperCommands,
    states: &RebaseStateStore,
) -> Result<()> {
    let content = std::fs::read_to_string(todo_file)
        .with_context(|| format!("Failed to read {}", todo_file.display()))?;

    let rewritten = match transform(mode, &content, helpers) {
        Some(rewritten) => rewritten,
        None => states.current()?.todo,
    };

    debug!(mode = mode.name(), "{}", rewritten);
    std::fs::write(todo_file, rewritten)
        .with_context(|| format!("Failed to write {}", todo_file.display()))
}
