//! Automatic resolution of conflicts confined to the tracked manifest.
//!
//! [`update_dependencies`] pauses at every commit that touches the manifest,
//! rewrites the file there with the override table applied, and keeps the
//! rewrite going for as long as every conflict it meets is one only the
//! manifest is involved in.

use crate::config::ManualsConfig;
use crate::error::Error;
use crate::history::History;
use crate::project::Project;
use crate::rebase::{EditOptions, Orchestrator, RewriteState};
use anyhow::{Context, Result};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;
use stepwise::v1::manifest::{Overrides, resolve_manifest};
use stepwise::v1::{StepId, StepNumber, TodoList};
use tracing::{debug, info, warn};

/// Re-renders the manuals of a super-step after its commit was replayed.
pub trait ManualRenderer {
    fn render(&self, project: &Project, step: &StepNumber) -> Result<()>;
}

/// Renders nothing.
pub struct NoopRenderer;

impl ManualRenderer for NoopRenderer {
    fn render(&self, _project: &Project, step: &StepNumber) -> Result<()> {
        debug!(step = %step, "no manual renderer configured");
        Ok(())
    }
}

/// Runs a shell command with `STEPWISE_STEP` set, then stages the views.
pub struct CommandRenderer {
    command: String,
    views_dir: PathBuf,
}

impl CommandRenderer {
    pub fn new(command: impl Into<String>, views_dir: impl Into<PathBuf>) -> Self {
        CommandRenderer {
            command: command.into(),
            views_dir: views_dir.into(),
        }
    }

    pub fn from_config(manuals: &ManualsConfig) -> Option<Self> {
        manuals
            .render_command
            .as_ref()
            .map(|command| CommandRenderer::new(command, &manuals.views_dir))
    }
}

impl ManualRenderer for CommandRenderer {
    fn render(&self, project: &Project, step: &StepNumber) -> Result<()> {
        debug!(step = %step, command = %self.command, "rendering manuals");
        let status = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(project.root())
            .env("STEPWISE_STEP", step.to_string())
            .status()
            .with_context(|| format!("Failed to run render command `{}`", self.command))?;

        if !status.success() {
            anyhow::bail!("Render command `{}` failed ({})", self.command, status);
        }

        if project.root().join(&self.views_dir).exists() {
            project
                .git()
                .run([OsStr::new("add"), self.views_dir.as_os_str()])?;
        }
        Ok(())
    }
}

/// Whether a failed resume left modified only the tracked file. git may
/// list an unmerged path once per side.
pub fn is_confined_conflict(paths: &[String], tracked: &Path) -> bool {
    !paths.is_empty() && paths.iter().all(|p| Path::new(p) == tracked)
}

/// Steps whose replay may need the manifest merged: those touching it, every
/// super-step from the earliest numbered one of them on, and `root` if it
/// touches it.
pub fn dependency_steps(history: &History, manifest: &Path) -> Result<Vec<StepId>> {
    let touching = history.steps_touching(manifest)?;
    let min_super = touching
        .iter()
        .filter_map(StepId::number)
        .map(|n| n.super_number)
        .min();

    let mut steps = touching;
    if let Some(min_super) = min_super {
        for commit in history.step_commits()? {
            let number = commit.descriptor.number;
            if number.is_super() && number.super_number >= min_super {
                steps.push(StepId::Step(number));
            }
        }
    }
    Ok(stepwise::v1::sort_selection(steps))
}

/// Merge the manifest in the working tree and stage it. Returns whether
/// there was a manifest to merge.
pub fn resolve_manifest_file(
    project: &Project,
    manifest: &Path,
    sections: &[String],
    overrides: &Overrides,
) -> Result<bool> {
    let file = project.root().join(manifest);
    if !file.is_file() {
        return Ok(false);
    }

    let content = std::fs::read_to_string(&file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let merged = resolve_manifest(&content, sections, overrides)
        .with_context(|| format!("Failed to merge {}", manifest.display()))?;

    if merged != content {
        std::fs::write(&file, &merged)
            .with_context(|| format!("Failed to write {}", file.display()))?;
    }
    project.git().run([OsStr::new("add"), manifest.as_os_str()])?;
    Ok(true)
}

/// Apply `overrides` to the manifest across the whole history.
pub fn update_dependencies(
    orchestrator: &Orchestrator,
    overrides: &Overrides,
    renderer: &dyn ManualRenderer,
) -> Result<RewriteState> {
    let manifest = &orchestrator.config().manifest.path;
    let steps = dependency_steps(&orchestrator.project().history()?, manifest)?;
    if steps.is_empty() {
        info!(manifest = %manifest.display(), "no step touches the manifest");
        return Ok(RewriteState::NotStarted);
    }

    let mut session = orchestrator.session()?;
    let hooks_were_disabled = session.hooks_disabled;
    session.hooks_disabled = true;
    orchestrator.save_session(&session)?;

    let result = resolve_loop(orchestrator, steps, overrides, renderer);

    let mut session = orchestrator.session()?;
    session.hooks_disabled = hooks_were_disabled;
    orchestrator.save_session(&session)?;

    result
}

fn resolve_loop(
    orchestrator: &Orchestrator,
    steps: Vec<StepId>,
    overrides: &Overrides,
    renderer: &dyn ManualRenderer,
) -> Result<RewriteState> {
    let project = orchestrator.project();
    let manifest = &orchestrator.config().manifest;

    let state = orchestrator.edit_steps(steps, &EditOptions::default())?;
    if state == RewriteState::Completed {
        return Ok(state);
    }

    let todo = std::fs::read_to_string(project.rebase_todo_file()).unwrap_or_default();
    let cap = TodoList::parse(&todo).pending_count() + 1;

    for round in 0..cap {
        let history = project.history()?;
        if !history.is_rebasing() {
            info!(rounds = round, "dependencies updated");
            return Ok(RewriteState::Completed);
        }

        resolve_manifest_file(project, &manifest.path, &manifest.sections, overrides)?;

        let head = history.head_oid()?.context("No HEAD during rewrite")?;
        if let Some(step) = history.step_at(head)?
            && step.number.is_super()
            && project.git().staged_files()?.is_empty()
        {
            renderer.render(project, &step.number)?;
        }
        drop(history);

        let git = project.git().env("GIT_EDITOR", "true");
        if !git.print(["rebase", "--continue"])? {
            let modified = git.modified_files()?;
            if is_confined_conflict(&modified, &manifest.path) {
                debug!(round, "manifest conflict, resolving again");
                continue;
            }
            warn!(files = ?modified, "conflict outside the manifest");
            return Err(Error::UnexpectedConflict(modified).into());
        }
    }

    if project.history()?.is_rebasing() {
        return Err(Error::ResolveLoopExhausted(cap).into());
    }
    Ok(RewriteState::Completed)
}
