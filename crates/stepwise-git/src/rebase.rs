use crate::config::Config;
use crate::editor::EditorMode;
use crate::error::Error;
use crate::history::History;
use crate::project::Project;
use crate::rebase_state::{PauseInfo, RebaseStateStore, Snapshot};
use crate::step_map::StepMapStore;
use crate::storage::SessionState;
use anyhow::{Context, Result};
use git2::{BranchType, Oid};
use regex::Regex;
use std::ffi::OsStr;
use std::path::Path;
use stepwise::v1::{
    Action, HelperCommands, Instruction, STEP_PREFIX, StepDescriptor, StepId, StepMap,
    StepMapState, SortScope, StepMapUpdate, StepNumber, StepSelector, TodoList,
    earliest_in_history, expand_range, remap_diff_step_references, shift_manual_files,
    sort_selection,
};
use tracing::{debug, info, warn};

/// Environment variable naming the submodule a parent project drives.
pub const SUBMODULE_CWD_ENV: &str = "STEPWISE_SUBMODULE_CWD";

/// Where a rewrite stands, as observed from the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteState {
    NotStarted,
    /// Rewriting, stopped neither at an `edit` nor on a conflict.
    InProgress,
    /// Stopped at an `edit` instruction.
    Paused,
    Conflicted,
    Completed,
    Aborted,
}

#[derive(Debug, Clone, Default)]
pub struct EditOptions {
    /// Track renumbering in a pending step map for other projects to consume.
    pub track_step_map: bool,
}

/// Runs every history-changing operation on one project.
///
/// Rewrites are git's interactive rebase with this program as sequence
/// editor; per-commit work is scheduled as `exec` lines that call back into
/// `program` (see [`HelperCommands`]).
pub struct Orchestrator {
    project: Project,
    config: Config,
    program: String,
}

impl Orchestrator {
    /// `program` is the shell-ready invocation of this binary.
    pub fn new(project: Project, config: Config, program: impl Into<String>) -> Self {
        Orchestrator {
            project,
            config,
            program: program.into(),
        }
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn helpers(&self) -> HelperCommands {
        HelperCommands::new(self.program.clone())
    }

    pub fn step_map(&self) -> StepMapStore {
        StepMapStore::new(self.project.storage())
    }

    pub fn rebase_states(&self) -> RebaseStateStore {
        RebaseStateStore::new(self.project.rebase_states_dir())
    }

    pub fn session(&self) -> Result<SessionState> {
        SessionState::load(&self.project.storage())
    }

    pub fn save_session(&self, session: &SessionState) -> Result<()> {
        session.save(&self.project.storage())
    }

    fn history(&self) -> Result<History> {
        self.project.history()
    }

    // ========================================================================
    // Appending and removing steps
    // ========================================================================

    /// Commit the staged changes as the next step.
    pub fn push(&self, message: Option<&str>, allow_empty: bool) -> Result<StepNumber> {
        let step = self.history()?.next_step(0)?;
        self.commit_step(&step, message, allow_empty)?;

        let mut session = self.session()?;
        session.new_step = Some(step.to_string());
        self.save_session(&session)?;

        info!(step = %step, "pushed step");
        Ok(step)
    }

    /// Drop HEAD. Returns the removed step, if HEAD was one.
    pub fn pop(&self) -> Result<Option<StepNumber>> {
        let history = self.history()?;
        let head = history.head_oid()?.ok_or(Error::RootRemoval)?;
        if head == history.root_oid()? {
            return Err(Error::RootRemoval.into());
        }

        let removed = history.step_at(head)?;
        let rebasing = history.is_rebasing();
        let branch = history.active_branch_name().ok();
        drop(history);

        self.project.git().run(["reset", "--hard", "HEAD~1"])?;

        let Some(removed) = removed else {
            warn!("Removed commit was not a step");
            return Ok(None);
        };

        let mut session = self.session()?;
        session.new_step = Some(self.history()?.current_step()?.to_string());
        self.save_session(&session)?;

        self.step_map().update(&StepMapUpdate::Remove {
            step: removed.number,
        })?;

        // While rewriting, branches are rebuilt in bulk once the rewrite completes.
        if removed.number.is_super()
            && !rebasing
            && let Some(branch) = branch
        {
            self.delete_branch(&step_branch(&branch, removed.number.super_number))?;
        }

        info!(step = %removed.number, "popped step");
        Ok(Some(removed.number))
    }

    /// Close the current super-step with a commit of its own.
    pub fn tag(&self, message: Option<&str>) -> Result<StepNumber> {
        let history = self.history()?;
        let step = history.next_super_step(0)?;
        let rebasing = history.is_rebasing();
        drop(history);

        let root = self.project.root();
        let manuals = &self.config.manuals;
        for dir in [&manuals.templates_dir, &manuals.views_dir] {
            std::fs::create_dir_all(root.join(dir))
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }

        let template = manuals.template_path(step.super_number);
        let template_file = root.join(&template);
        if !template_file.exists() {
            std::fs::write(&template_file, "")
                .with_context(|| format!("Failed to create {}", template_file.display()))?;
        }
        self.project
            .git()
            .run([OsStr::new("add"), template.as_os_str()])?;

        self.commit_step(&step, message, false)?;

        if !rebasing {
            let history = self.history()?;
            let branch = history.active_branch_name()?;
            let head = history
                .head_oid()?
                .context("HEAD vanished after committing")?;
            let commit = history.repo().find_commit(head)?;
            history
                .repo()
                .branch(&step_branch(&branch, step.super_number), &commit, false)
                .context("Failed to create step branch")?;
        }

        let mut session = self.session()?;
        session.new_step = Some(step.to_string());
        self.save_session(&session)?;

        info!(step = %step, "tagged super-step");
        Ok(step)
    }

    fn commit_step(&self, step: &StepNumber, message: Option<&str>, allow_empty: bool) -> Result<()> {
        let mut session = self.session()?;
        session.hook_step = Some(step.to_string());
        self.save_session(&session)?;

        let git = self.project.git();
        let mut args: Vec<String> = vec!["commit".into()];
        if allow_empty {
            args.push("--allow-empty".into());
        }
        let result = match message {
            Some(message) => {
                args.extend(["-m".into(), StepDescriptor::new(*step, message).format()]);
                git.run(&args).map(|_| ())
            }
            None => {
                args.extend(["-e".into(), "-m".into(), format!("{}{}: ", STEP_PREFIX, step)]);
                git.print_checked(&args)
            }
        };

        if let Err(e) = result {
            session.hook_step = None;
            self.save_session(&session)?;
            return Err(e);
        }
        Ok(())
    }

    // ========================================================================
    // Rewrites
    // ========================================================================

    /// Resolve `edit` arguments to the steps they name, sorted, root first.
    /// No selectors means the current step.
    pub fn resolve_selectors(
        &self,
        history: &History,
        selectors: &[StepSelector],
    ) -> Result<Vec<StepId>> {
        let all = history.all_steps()?;
        let mut steps = Vec::new();

        for selector in selectors {
            match selector {
                StepSelector::Root => steps.push(StepId::Root),
                StepSelector::Step(number) => {
                    let id = StepId::Step(*number);
                    if !all.contains(&id) {
                        return Err(Error::StepNotFound(number.to_string()).into());
                    }
                    steps.push(id);
                }
                StepSelector::Range { start, end } => {
                    let expanded = expand_range(&all, *start, *end).ok_or_else(|| {
                        let show = |id: &Option<StepId>| id.map(|i| i.to_string()).unwrap_or_default();
                        Error::StepNotFound(format!("{}..{}", show(start), show(end)))
                    })?;
                    steps.extend(expanded);
                }
                StepSelector::Revision(revision) => {
                    steps.push(history.resolve_revision(revision)?);
                }
            }
        }

        if steps.is_empty() {
            steps.push(history.current_step()?);
        }
        Ok(sort_selection(steps))
    }

    /// Pause the rewrite at each selected step.
    pub fn edit(&self, selectors: &[StepSelector], options: &EditOptions) -> Result<RewriteState> {
        let steps = self.resolve_selectors(&self.history()?, selectors)?;
        self.edit_steps(steps, options)
    }

    /// [`Orchestrator::edit`] over already resolved steps.
    pub fn edit_steps(&self, steps: Vec<StepId>, options: &EditOptions) -> Result<RewriteState> {
        let history = self.history()?;
        if history.is_rebasing() {
            return Err(Error::RewriteInProgress.into());
        }
        let earliest = earliest_in_history(&steps).unwrap_or(StepId::Root);
        let base = history.step_base(&earliest)?;

        self.prepare_session(None, None)?;

        if options.track_step_map {
            self.step_map().initialize(&history, true)?;
        } else {
            self.step_map().dispose()?;
        }
        drop(history);

        self.rebase_states().reinitialize()?;

        let labels: Vec<String> = steps.iter().map(|s| s.to_string()).collect();
        info!(steps = %labels.join(" "), "editing");
        self.launch(base, &EditorMode::Edit { steps })
    }

    /// Renumber the steps of one super-step, or of the whole history for
    /// `root`, by position. Defaults to the current step.
    pub fn sort(&self, step: Option<StepId>) -> Result<RewriteState> {
        let history = self.history()?;
        if history.is_rebasing() {
            return Err(Error::RewriteInProgress.into());
        }
        let step = match step {
            Some(step) => step,
            None => history.current_step()?,
        };

        let (scope, base, old_step, new_step) = match step {
            StepId::Root => (
                SortScope::All,
                None,
                "root".to_string(),
                "1".to_string(),
            ),
            StepId::Step(number) => {
                let n = number.super_number;
                let first = history
                    .step_commits()?
                    .into_iter()
                    .find(|c| c.descriptor.number.super_number == n)
                    .ok_or_else(|| Error::StepNotFound(n.to_string()))?;
                let base = history
                    .repo()
                    .find_commit(first.oid)?
                    .parent_ids()
                    .next();
                let old_step = if n > 1 {
                    (n - 1).to_string()
                } else {
                    "root".to_string()
                };
                (
                    SortScope::Super(n),
                    base,
                    old_step,
                    StepNumber::sub_step(n, 1).to_string(),
                )
            }
        };

        self.prepare_session(Some(old_step), Some(new_step))?;
        self.step_map().initialize(&history, true)?;
        drop(history);

        info!(scope = %scope, "sorting");
        self.launch(base, &EditorMode::Sort { scope })
    }

    /// Change the message of one step, keeping its number.
    pub fn reword(&self, step: Option<StepId>, message: Option<&str>) -> Result<RewriteState> {
        let history = self.history()?;
        if history.is_rebasing() {
            return Err(Error::RewriteInProgress.into());
        }
        let step = match step {
            Some(step) => step,
            None => history.current_step()?,
        };
        let base = history.step_base(&step)?;
        drop(history);

        info!(step = %step, "rewording");
        self.launch(
            base,
            &EditorMode::Reword {
                message: message.map(str::to_string),
            },
        )
    }

    /// Go back to a previous pause of the running rewrite.
    pub fn back(&self, target: Option<&str>) -> Result<RewriteState> {
        if !self.history()?.is_rebasing() {
            return Err(Error::NoRebaseInProgress.into());
        }

        let states = self.rebase_states();
        let pause = states.resolve_target(target)?;
        let snapshot = states.restore(&pause)?;

        let git = self.project.git();
        git.run(["reset", "--hard", snapshot.head.as_str()])?;

        let mut session = self.session()?;
        session.old_step = Some(snapshot.old_step.clone());
        session.new_step = Some(snapshot.new_step.clone());
        session.hooks_disabled = false;
        self.save_session(&session)?;

        git.env(
            "GIT_SEQUENCE_EDITOR",
            EditorMode::ResetTodo.command(&self.program),
        )
        .run(["rebase", "--edit-todo"])?;

        info!(step = %pause.step, "stepped back");
        self.print_stop_notice()?;
        Ok(RewriteState::Paused)
    }

    /// Pauses `back` can return to, most recent first.
    pub fn previous_pauses(&self) -> Result<Vec<PauseInfo>> {
        if !self.history()?.is_rebasing() {
            return Err(Error::NoRebaseInProgress.into());
        }
        self.rebase_states().list_pauses()
    }

    /// Abandon the running rewrite; HEAD returns to where it started.
    pub fn abort(&self) -> Result<RewriteState> {
        if !self.history()?.is_rebasing() {
            return Err(Error::NoRebaseInProgress.into());
        }

        if let Err(e) = self.project.git().run(["rebase", "--abort"]) {
            let head = self
                .history()
                .and_then(|h| h.head_summary())
                .map(|(short, subject)| format!("{} {}", short, subject))
                .unwrap_or_else(|_| "unknown HEAD".to_string());
            return Err(Error::RewriteAbortFailure {
                head,
                reason: e.to_string(),
            }
            .into());
        }

        let mut session = self.session()?;
        session.clear_rewrite();
        session.hooks_disabled = false;
        self.save_session(&session)?;

        let step_map = self.step_map();
        if step_map.state() == StepMapState::Pending {
            step_map.dispose()?;
        }

        info!("aborted rewrite");
        Ok(RewriteState::Aborted)
    }

    /// Session values the exec helpers of the coming rewrite read.
    fn prepare_session(&self, old_step: Option<String>, new_step: Option<String>) -> Result<()> {
        let mut session = self.session()?;
        session.old_step = old_step;
        session.new_step = new_step;
        session.submodule_cwd = std::env::var(SUBMODULE_CWD_ENV).ok();
        self.save_session(&session)
    }

    /// Start `git rebase -i` from `base` (`None` for `--root`) with this
    /// program editing the instruction list in `mode`.
    ///
    /// When git refuses to start, the session values and pending step map set
    /// up for the rewrite are dropped again.
    fn launch(&self, base: Option<Oid>, mode: &EditorMode) -> Result<RewriteState> {
        let result = self.run_rebase(base, mode);
        let started = self.history().map(|h| h.is_rebasing()).unwrap_or(true);
        if result.is_err() && !started {
            let mut session = self.session()?;
            session.clear_rewrite();
            self.save_session(&session)?;

            let step_map = self.step_map();
            if step_map.state() == StepMapState::Pending {
                step_map.dispose()?;
            }
            debug!("rewrite did not start, discarded its session");
        }
        result
    }

    fn run_rebase(&self, base: Option<Oid>, mode: &EditorMode) -> Result<RewriteState> {
        let base = base.map_or_else(|| "--root".to_string(), |oid| oid.to_string());
        let editor = mode.command(&self.program);
        debug!(%base, %editor, "launching rewrite");

        let args = ["rebase", "-i", base.as_str(), "--keep-empty"];
        let succeeded = self
            .project
            .git()
            .env("GIT_SEQUENCE_EDITOR", &editor)
            .print(args)?;

        let state = match self.current_state()? {
            RewriteState::NotStarted if succeeded => RewriteState::Completed,
            RewriteState::NotStarted => {
                return Err(Error::GitCommand {
                    command: args.join(" "),
                    status: "non-zero exit".to_string(),
                    stderr: String::new(),
                }
                .into());
            }
            state => state,
        };

        match state {
            RewriteState::Paused | RewriteState::Conflicted => self.print_stop_notice()?,
            _ => info!(?state, "rewrite finished"),
        }
        Ok(state)
    }

    /// Observe the rewrite from disk. Outside a rewrite this is `NotStarted`.
    pub fn current_state(&self) -> Result<RewriteState> {
        let history = self.history()?;
        if !history.is_rebasing() {
            return Ok(RewriteState::NotStarted);
        }
        if history.has_conflicts()? {
            return Ok(RewriteState::Conflicted);
        }

        let done = std::fs::read_to_string(self.project.rebase_merge_dir().join("done"))
            .unwrap_or_default();
        let last = TodoList::parse(&done)
            .instructions
            .into_iter()
            .rev()
            .find(|i| !matches!(i, Instruction::Other(_)));

        Ok(match last {
            Some(Instruction::Commit {
                action: Action::Edit,
                ..
            }) => RewriteState::Paused,
            _ => RewriteState::InProgress,
        })
    }

    fn print_stop_notice(&self) -> Result<()> {
        let (short, subject) = self.history()?.head_summary()?;
        println!("Stopped at {}...  {}", short, subject);
        println!("You can amend the commit now, with");
        println!();
        println!("  git commit --amend");
        println!();
        println!("Once you are satisfied with your changes, run");
        println!();
        println!("  git rebase --continue");
        println!();
        println!("or give up on the rewrite with");
        println!();
        println!("  git rebase --abort");
        Ok(())
    }

    // ========================================================================
    // Helpers run from inside a rewrite
    // ========================================================================

    /// Record the pause the next instruction is about to create.
    pub fn stash_state(&self) -> Result<()> {
        let todo_file = self.project.rebase_todo_file();
        let content = std::fs::read_to_string(&todo_file)
            .with_context(|| format!("Failed to read {}", todo_file.display()))?;
        let todo = TodoList::parse(&content);

        let Some((
            Instruction::Commit {
                action: Action::Edit,
                hash,
                ..
            },
            remaining,
        )) = todo.split_first()
        else {
            debug!("next instruction is not an edit, nothing to stash");
            return Ok(());
        };

        let history = self.history()?;
        let commit = history
            .repo()
            .revparse_single(hash)
            .and_then(|o| o.peel_to_commit())
            .with_context(|| format!("Failed to resolve {}", hash))?;

        let label = match history.step_at(commit.id())? {
            Some(step) => step.number.to_string(),
            None if commit.parent_count() == 0 => StepId::Root.to_string(),
            None => {
                debug!(%hash, "edited commit is not a step, nothing to stash");
                return Ok(());
            }
        };

        let session = self.session()?;
        let snapshot = Snapshot {
            todo: remaining.render(),
            head: commit.id().to_string(),
            old_step: session.old_step.unwrap_or_else(|| label.clone()),
            new_step: session.new_step.unwrap_or_else(|| label.clone()),
        };

        let states = self.rebase_states();
        if !states.dir().join(".git").exists() {
            states.reinitialize()?;
        }
        states.snapshot(&label, &snapshot)?;
        Ok(())
    }

    /// Amend HEAD's message. Unless `keep_number`, the step number is
    /// recomputed from the commits before it.
    pub fn reword_recent(&self, message: Option<&str>, keep_number: bool) -> Result<()> {
        let history = self.history()?;
        let head = history.head_oid()?.context("No commit to reword")?;
        let git = self.project.git();

        let Some(current) = history.step_at(head)? else {
            match message {
                Some(message) => {
                    git.run(["commit", "--amend", "--allow-empty", "-m", message])?;
                }
                None if keep_number => git.print_checked(["commit", "--amend", "--allow-empty"])?,
                None => {}
            }
            return Ok(());
        };

        let number = if keep_number {
            current.number
        } else if current.number.is_super() {
            history.next_super_step(1)?
        } else {
            history.next_step(1)?
        };
        drop(history);

        let reworded = StepDescriptor::new(number, message.unwrap_or(&current.message)).format();

        let mut session = self.session()?;
        session.hook_step = Some(number.to_string());
        self.save_session(&session)?;

        self.step_map().update(&StepMapUpdate::Reset {
            old: current.number,
            new: number,
        })?;

        if message.is_none() && keep_number {
            git.print_checked(["commit", "--amend", "--allow-empty", "-e", "-m", reworded.as_str()])?;
            return Ok(());
        }

        if reworded == current.format() {
            debug!(step = %number, "message unchanged");
            return Ok(());
        }

        debug!(old = %current.number, new = %number, "rewording");
        git.run(["commit", "--amend", "--allow-empty", "-m", reworded.as_str()])?;
        Ok(())
    }

    /// Last instruction of every rewrite: rebuild reference branches and
    /// publish the step map.
    pub fn finalize(&self) -> Result<()> {
        self.rebranch_super_steps()?;

        let step_map = self.step_map();
        if step_map.state() == StepMapState::Pending {
            step_map.commit()?;
        }

        let mut session = self.session()?;
        session.clear_rewrite();
        self.save_session(&session)?;

        info!("rewrite complete");
        Ok(())
    }

    /// Point `<branch>-root` at the root commit and `<branch>-step<N>` at
    /// every super-step, dropping stale step branches.
    pub fn rebranch_super_steps(&self) -> Result<()> {
        let history = self.history()?;
        let repo = history.repo();
        let branch = history.active_branch_name()?;
        let root_branch = format!("{}-root", branch);
        let pattern = Regex::new(&format!(r"^{}-step\d+$", regex::escape(&branch)))?;

        let mut stale = Vec::new();
        for entry in repo.branches(Some(BranchType::Local))? {
            let (b, _) = entry?;
            if let Some(name) = b.name()?
                && (name == root_branch || pattern.is_match(name))
            {
                stale.push(name.to_string());
            }
        }
        for name in &stale {
            repo.find_branch(name, BranchType::Local)?.delete()?;
        }

        let root = repo.find_commit(history.root_oid()?)?;
        repo.branch(&root_branch, &root, true)?;

        for step in history.step_commits()? {
            if step.descriptor.number.is_super() {
                let commit = repo.find_commit(step.oid)?;
                repo.branch(
                    &step_branch(&branch, step.descriptor.number.super_number),
                    &commit,
                    true,
                )?;
            }
        }

        debug!(%branch, "rebuilt step branches");
        Ok(())
    }

    /// Replay super-step `hash` on top of HEAD under the super number it
    /// lands on.
    ///
    /// Its manual files are renamed by the change in number, and when the
    /// rewrite is driven for a submodule, `{{diffStep}}` references into that
    /// submodule follow its committed step map. A commit the fixups leave
    /// untouched is cherry-picked instead, so an unchanged history keeps its
    /// hashes.
    pub fn super_pick(&self, hash: &str) -> Result<()> {
        let history = self.history()?;
        let (oid, old, empty) = {
            let commit = history
                .repo()
                .revparse_single(hash)
                .and_then(|o| o.peel_to_commit())
                .with_context(|| format!("Failed to resolve {}", hash))?;
            let step = history
                .step_at(commit.id())?
                .filter(|s| s.number.is_super())
                .ok_or_else(|| Error::StepNotFound(hash.to_string()))?;
            let empty = commit
                .parent(0)
                .map(|p| p.tree_id() == commit.tree_id())
                .unwrap_or(false);
            (commit.id().to_string(), step.number, empty)
        };
        let new = history.next_super_step(0)?;
        drop(history);

        let git = self.project.git();
        let delta = i64::from(new.super_number) - i64::from(old.super_number);

        if !empty {
            let patch = git.run(["format-patch", "-1", oid.as_str(), "--stdout"])? + "\n";
            let mut fixed = shift_manual_files(&patch, delta);
            if let Some((map, submodule)) = self.submodule_step_map()? {
                fixed = remap_diff_step_references(&fixed, &map, &submodule);
            }

            if fixed != patch {
                debug!(%old, %new, "applying rewritten super-step patch");
                git.run_with_input(["am"], Some(&fixed))?;
                return Ok(());
            }
        }

        debug!(%old, %new, "super-step unchanged, picking");
        git.run(["cherry-pick", "--ff", "--allow-empty", oid.as_str()])?;
        Ok(())
    }

    /// The committed step map of the submodule this rewrite is driven for,
    /// with the name `{{diffStep module=...}}` helpers refer to it by.
    fn submodule_step_map(&self) -> Result<Option<(StepMap, String)>> {
        let Some(cwd) = self.session()?.submodule_cwd else {
            return Ok(None);
        };
        let path = self.project.root().join(&cwd);
        let submodule = Project::discover(&path)?;
        let name = Path::new(&cwd)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let map = StepMapStore::new(submodule.storage()).load_committed()?;
        if map.is_none() {
            debug!(submodule = %name, "submodule has no committed step map");
        }
        Ok(map.map(|m| (m, name)))
    }

    fn delete_branch(&self, name: &str) -> Result<()> {
        let repo = self.project.open_repo()?;
        match repo.find_branch(name, BranchType::Local) {
            Ok(mut branch) => branch
                .delete()
                .with_context(|| format!("Failed to delete branch {}", name)),
            Err(_) => {
                warn!(branch = name, "step branch not found");
                Ok(())
            }
        }
    }
}

fn step_branch(branch: &str, super_number: u32) -> String {
    format!("{}-step{}", branch, super_number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Repository;

    fn init_temp_repo() -> (tempfile::TempDir, Orchestrator) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "Test User").unwrap();
        config.set_str("user.email", "test@example.com").unwrap();

        let project = Project::discover(dir.path()).unwrap();
        let orchestrator = Orchestrator::new(project, Config::default(), "stepwise");
        (dir, orchestrator)
    }

    fn commit_file(orch: &Orchestrator, file: &str, content: &str, message: &str) {
        std::fs::write(orch.project().root().join(file), content).unwrap();
        let git = orch.project().git();
        git.run(["add", file]).unwrap();
        git.run(["commit", "-q", "-m", message]).unwrap();
    }

    fn stage(orch: &Orchestrator, file: &str, content: &str) {
        std::fs::write(orch.project().root().join(file), content).unwrap();
        orch.project().git().run(["add", file]).unwrap();
    }

    fn head_subject(orch: &Orchestrator) -> String {
        orch.project().history().unwrap().head_summary().unwrap().1
    }

    fn branches(orch: &Orchestrator) -> Vec<String> {
        let repo = orch.project().open_repo().unwrap();
        let mut names: Vec<String> = repo
            .branches(Some(BranchType::Local))
            .unwrap()
            .map(|b| b.unwrap().0.name().unwrap().unwrap().to_string())
            .collect();
        names.sort();
        names
    }

    fn main_branch(orch: &Orchestrator) -> String {
        orch.project()
            .history()
            .unwrap()
            .active_branch_name()
            .unwrap()
    }

    // ── push / tag / pop ───────────────────────────────────────────────

    #[test]
    fn test_push_numbers_steps() {
        let (_dir, orch) = init_temp_repo();
        commit_file(&orch, "README.md", "hi", "Initial commit");

        stage(&orch, "a.txt", "a");
        assert_eq!(orch.push(Some("Add a"), false).unwrap().to_string(), "1.1");
        assert_eq!(head_subject(&orch), "Step 1.1: Add a");

        assert_eq!(orch.push(Some("Nothing"), true).unwrap().to_string(), "1.2");

        let session = orch.session().unwrap();
        assert_eq!(session.hook_step.as_deref(), Some("1.2"));
        assert_eq!(session.new_step.as_deref(), Some("1.2"));
    }

    #[test]
    fn test_push_failure_clears_hook_step() {
        let (_dir, orch) = init_temp_repo();
        commit_file(&orch, "README.md", "hi", "Initial commit");

        assert!(orch.push(Some("nothing staged"), false).is_err());
        assert_eq!(orch.session().unwrap().hook_step, None);
    }

    #[test]
    fn test_tag_creates_template_and_branch() {
        let (_dir, orch) = init_temp_repo();
        commit_file(&orch, "README.md", "hi", "Initial commit");
        stage(&orch, "a.txt", "a");
        orch.push(Some("Add a"), false).unwrap();

        let step = orch.tag(Some("Finish")).unwrap();
        assert_eq!(step.to_string(), "1");
        assert_eq!(head_subject(&orch), "Step 1: Finish");

        let template = orch
            .project()
            .root()
            .join(orch.config().manuals.template_path(1));
        assert!(template.is_file());
        assert!(
            orch.project()
                .root()
                .join(&orch.config().manuals.views_dir)
                .is_dir()
        );

        let branch = main_branch(&orch);
        assert!(branches(&orch).contains(&format!("{}-step1", branch)));
    }

    #[test]
    fn test_pop_at_root_fails_and_keeps_head() {
        let (_dir, orch) = init_temp_repo();
        commit_file(&orch, "README.md", "hi", "Initial commit");
        let before = orch.project().history().unwrap().head_oid().unwrap();

        let err = orch.pop().unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::RootRemoval)));
        assert_eq!(orch.project().history().unwrap().head_oid().unwrap(), before);
    }

    #[test]
    fn test_pop_super_step_removes_branch_and_map_entry() {
        let (_dir, orch) = init_temp_repo();
        commit_file(&orch, "README.md", "hi", "Initial commit");
        stage(&orch, "a.txt", "a");
        orch.push(Some("Add a"), false).unwrap();
        orch.tag(Some("Finish")).unwrap();
        orch.step_map()
            .initialize(&orch.project().history().unwrap(), false)
            .unwrap();

        let removed = orch.pop().unwrap();
        assert_eq!(removed.map(|n| n.to_string()).as_deref(), Some("1"));
        assert_eq!(head_subject(&orch), "Step 1.1: Add a");

        let branch = main_branch(&orch);
        assert!(!branches(&orch).contains(&format!("{}-step1", branch)));

        let map = orch.step_map().load().unwrap().unwrap();
        assert_eq!(map.get("1"), None);
        assert_eq!(map.get("1.1"), Some("1.1"));
        assert_eq!(orch.session().unwrap().new_step.as_deref(), Some("1.1"));
    }

    #[test]
    fn test_pop_non_step_commit() {
        let (_dir, orch) = init_temp_repo();
        commit_file(&orch, "README.md", "hi", "Initial commit");
        commit_file(&orch, "b.txt", "b", "Some fixup");
        assert_eq!(orch.pop().unwrap(), None);
        assert_eq!(head_subject(&orch), "Initial commit");
    }

    // ── selectors ──────────────────────────────────────────────────────

    fn tutorial(orch: &Orchestrator) {
        commit_file(orch, "README.md", "hi", "Initial commit");
        for (file, message) in [
            ("a", "Step 1.1: a"),
            ("b", "Step 1: b"),
            ("c", "Step 2: c"),
            ("d", "Step 3.1: d"),
            ("e", "Step 3: e"),
        ] {
            commit_file(orch, file, file, message);
        }
    }

    fn ids(steps: &[StepId]) -> Vec<String> {
        steps.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_resolve_range_selector() {
        let (_dir, orch) = init_temp_repo();
        tutorial(&orch);
        let history = orch.project().history().unwrap();

        let steps = orch
            .resolve_selectors(&history, &[StepSelector::parse("2..3").unwrap()])
            .unwrap();
        assert_eq!(ids(&steps), ["2", "3", "3.1"]);
    }

    #[test]
    fn test_resolve_mixed_selectors() {
        let (_dir, orch) = init_temp_repo();
        tutorial(&orch);
        let history = orch.project().history().unwrap();

        let selectors: Vec<StepSelector> = ["3.1", "HEAD~4", "root", "1.1"]
            .iter()
            .map(|s| StepSelector::parse(s).unwrap())
            .collect();
        let steps = orch.resolve_selectors(&history, &selectors).unwrap();
        assert_eq!(ids(&steps), ["root", "1", "1.1", "3.1"]);
    }

    #[test]
    fn test_resolve_defaults_to_current_step() {
        let (_dir, orch) = init_temp_repo();
        tutorial(&orch);
        let history = orch.project().history().unwrap();
        assert_eq!(ids(&orch.resolve_selectors(&history, &[]).unwrap()), ["3"]);
    }

    #[test]
    fn test_resolve_unknown_step() {
        let (_dir, orch) = init_temp_repo();
        tutorial(&orch);
        let history = orch.project().history().unwrap();

        for selector in ["4.1", "1..9"] {
            let err = orch
                .resolve_selectors(&history, &[StepSelector::parse(selector).unwrap()])
                .unwrap_err();
            assert!(matches!(err.downcast_ref::<Error>(), Some(Error::StepNotFound(_))));
        }
    }

    // ── helpers run inside a rewrite ───────────────────────────────────

    #[test]
    fn test_reword_recent_renumbers_by_position() {
        let (_dir, orch) = init_temp_repo();
        commit_file(&orch, "README.md", "hi", "Initial commit");
        commit_file(&orch, "a", "a", "Step 1.1: a");
        commit_file(&orch, "b", "b", "Step 1.3: b");

        orch.step_map()
            .initialize(&orch.project().history().unwrap(), true)
            .unwrap();
        orch.reword_recent(None, false).unwrap();

        assert_eq!(head_subject(&orch), "Step 1.2: b");
        let map = orch.step_map().load().unwrap().unwrap();
        assert_eq!(map.get("1.3"), Some("1.2"));
    }

    #[test]
    fn test_reword_recent_super_step_uses_lookahead() {
        let (_dir, orch) = init_temp_repo();
        commit_file(&orch, "README.md", "hi", "Initial commit");
        commit_file(&orch, "a", "a", "Step 1.1: a");
        commit_file(&orch, "b", "b", "Step 1: b");
        commit_file(&orch, "c", "c", "Step 2.1: c");
        commit_file(&orch, "d", "d", "Step 4: d");

        orch.reword_recent(None, false).unwrap();
        assert_eq!(head_subject(&orch), "Step 2: d");
    }

    #[test]
    fn test_reword_recent_unchanged_keeps_commit() {
        let (_dir, orch) = init_temp_repo();
        commit_file(&orch, "README.md", "hi", "Initial commit");
        commit_file(&orch, "a", "a", "Step 1.1: a");
        let before = orch.project().history().unwrap().head_oid().unwrap();

        orch.reword_recent(None, false).unwrap();
        assert_eq!(orch.project().history().unwrap().head_oid().unwrap(), before);
    }

    #[test]
    fn test_reword_recent_with_message_keeps_number() {
        let (_dir, orch) = init_temp_repo();
        commit_file(&orch, "README.md", "hi", "Initial commit");
        commit_file(&orch, "a", "a", "Step 1.4: a");

        orch.reword_recent(Some("Better title"), true).unwrap();
        assert_eq!(head_subject(&orch), "Step 1.4: Better title");
    }

    #[test]
    fn test_stash_state_records_next_edit() {
        let (_dir, orch) = init_temp_repo();
        commit_file(&orch, "README.md", "hi", "Initial commit");
        commit_file(&orch, "a", "a", "Step 1.1: a");
        commit_file(&orch, "b", "b", "Step 1.2: b");

        let history = orch.project().history().unwrap();
        let target = history.step_commit(&"1.2".parse().unwrap()).unwrap();
        drop(history);

        let merge_dir = orch.project().rebase_merge_dir();
        std::fs::create_dir_all(&merge_dir).unwrap();
        std::fs::write(
            orch.project().rebase_todo_file(),
            format!("edit {} Step 1.2: b\nexec stepwise rebase finalize\n", target),
        )
        .unwrap();

        orch.rebase_states().reinitialize().unwrap();
        orch.stash_state().unwrap();
        std::fs::remove_dir_all(&merge_dir).unwrap();

        let snapshot = orch.rebase_states().current().unwrap();
        assert_eq!(snapshot.head, target.to_string());
        assert_eq!(snapshot.todo, "exec stepwise rebase finalize\n");
        assert_eq!(snapshot.old_step, "1.2");
        assert_eq!(snapshot.new_step, "1.2");
    }

    #[test]
    fn test_stash_state_ignores_picks() {
        let (_dir, orch) = init_temp_repo();
        commit_file(&orch, "README.md", "hi", "Initial commit");

        let merge_dir = orch.project().rebase_merge_dir();
        std::fs::create_dir_all(&merge_dir).unwrap();
        std::fs::write(orch.project().rebase_todo_file(), "pick abc Step 1.1: x\n").unwrap();

        orch.stash_state().unwrap();
        std::fs::remove_dir_all(&merge_dir).unwrap();
        assert!(!orch.rebase_states().dir().exists());
    }

    #[test]
    fn test_rebranch_super_steps() {
        let (_dir, orch) = init_temp_repo();
        tutorial(&orch);
        let branch = main_branch(&orch);

        let repo = orch.project().open_repo().unwrap();
        let head = repo.head().unwrap().peel_to_commit().unwrap();
        repo.branch(&format!("{}-step9", branch), &head, false).unwrap();
        drop(head);
        drop(repo);

        orch.rebranch_super_steps().unwrap();

        let mut expected = vec![
            branch.clone(),
            format!("{}-root", branch),
            format!("{}-step1", branch),
            format!("{}-step2", branch),
            format!("{}-step3", branch),
        ];
        expected.sort();
        assert_eq!(branches(&orch), expected);
    }

    #[test]
    fn test_finalize_commits_pending_map() {
        let (_dir, orch) = init_temp_repo();
        tutorial(&orch);
        orch.step_map()
            .initialize(&orch.project().history().unwrap(), true)
            .unwrap();

        orch.finalize().unwrap();
        assert_eq!(orch.step_map().state(), StepMapState::Committed);
        assert!(orch.step_map().load_committed().unwrap().is_some());
    }

    // ── super-pick ─────────────────────────────────────────────────────

    fn template(n: u32) -> String {
        format!(".stepwise/manuals/templates/step{}.tmpl", n)
    }

    /// Commit a super-step holding its manual template, then step back before it.
    fn super_step_to_pick(orch: &Orchestrator, n: u32, content: &str) -> Oid {
        let root = orch.project().root();
        std::fs::create_dir_all(root.join(".stepwise/manuals/templates")).unwrap();
        commit_file(orch, &template(n), content, &format!("Step {}: manual", n));

        let picked = orch.project().history().unwrap().head_oid().unwrap().unwrap();
        orch.project()
            .git()
            .run(["reset", "-q", "--hard", "HEAD~1"])
            .unwrap();
        picked
    }

    fn head(orch: &Orchestrator) -> Oid {
        orch.project().history().unwrap().head_oid().unwrap().unwrap()
    }

    #[test]
    fn test_super_pick_renames_manual_files() {
        let (_dir, orch) = init_temp_repo();
        commit_file(&orch, "README.md", "hi", "Initial commit");
        commit_file(&orch, "a", "a", "Step 1.1: a");
        let picked = super_step_to_pick(&orch, 3, "# Three\n");

        orch.super_pick(&picked.to_string()).unwrap();

        let root = orch.project().root();
        assert_eq!(
            std::fs::read_to_string(root.join(template(1))).unwrap(),
            "# Three\n"
        );
        assert!(!root.join(template(3)).exists());
        assert_eq!(head_subject(&orch), "Step 3: manual");
        assert_ne!(head(&orch), picked);
    }

    #[test]
    fn test_super_pick_unchanged_keeps_commit() {
        let (_dir, orch) = init_temp_repo();
        commit_file(&orch, "README.md", "hi", "Initial commit");
        commit_file(&orch, "a", "a", "Step 1.1: a");
        let picked = super_step_to_pick(&orch, 1, "# One\n");

        orch.super_pick(&picked.to_string()).unwrap();
        assert_eq!(head(&orch), picked);
    }

    #[test]
    fn test_super_pick_follows_submodule_step_map() {
        let (sub_dir, sub) = init_temp_repo();
        commit_file(&sub, "README.md", "hi", "Initial commit");
        commit_file(&sub, "x", "x", "Step 1.1: x");
        commit_file(&sub, "y", "y", "Step 1.2: y");
        let sub_map = sub.step_map();
        sub_map
            .initialize(&sub.project().history().unwrap(), false)
            .unwrap();
        sub_map
            .update(&StepMapUpdate::Reset {
                old: "1.2".parse().unwrap(),
                new: "1.1".parse().unwrap(),
            })
            .unwrap();
        let name = sub_dir
            .path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .into_owned();

        let (_dir, orch) = init_temp_repo();
        commit_file(&orch, "README.md", "hi", "Initial commit");
        commit_file(&orch, "a", "a", "Step 1.1: a");
        let manual = format!(
            "{{{{diffStep \"1.2\" module=\"{}\"}}}}\n{{{{diffStep \"1.2\"}}}}\n",
            name
        );
        let picked = super_step_to_pick(&orch, 1, &manual);

        let mut session = orch.session().unwrap();
        session.submodule_cwd = Some(sub_dir.path().to_string_lossy().into_owned());
        orch.save_session(&session).unwrap();

        orch.super_pick(&picked.to_string()).unwrap();

        let content = std::fs::read_to_string(orch.project().root().join(template(1))).unwrap();
        assert_eq!(
            content,
            format!(
                "{{{{diffStep \"1.1\" module=\"{}\"}}}}\n{{{{diffStep \"1.2\"}}}}\n",
                name
            )
        );
        assert_ne!(head(&orch), picked);
    }

    #[test]
    fn test_super_pick_rejects_sub_steps() {
        let (_dir, orch) = init_temp_repo();
        commit_file(&orch, "README.md", "hi", "Initial commit");
        commit_file(&orch, "a", "a", "Step 1.1: a");

        let err = orch.super_pick("HEAD").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::StepNotFound(_))
        ));
    }

    // ── state ──────────────────────────────────────────────────────────

    #[test]
    fn test_commands_requiring_a_rewrite() {
        let (_dir, orch) = init_temp_repo();
        commit_file(&orch, "README.md", "hi", "Initial commit");

        assert_eq!(orch.current_state().unwrap(), RewriteState::NotStarted);
        for err in [
            orch.abort().unwrap_err(),
            orch.back(None).unwrap_err(),
            orch.previous_pauses().unwrap_err(),
        ] {
            assert!(matches!(
                err.downcast_ref::<Error>(),
                Some(Error::NoRebaseInProgress)
            ));
        }
    }

    #[test]
    fn test_rewrite_refused_while_rebasing() {
        let (_dir, orch) = init_temp_repo();
        tutorial(&orch);
        orch.rebase_states().reinitialize().unwrap();
        std::fs::create_dir_all(orch.project().rebase_merge_dir()).unwrap();

        for err in [
            orch.edit_steps(vec![StepId::Root], &EditOptions::default())
                .unwrap_err(),
            orch.sort(None).unwrap_err(),
            orch.reword(None, Some("x")).unwrap_err(),
        ] {
            assert!(matches!(
                err.downcast_ref::<Error>(),
                Some(Error::RewriteInProgress)
            ));
        }
        assert!(orch.rebase_states().dir().join(".git").exists());
    }

    #[test]
    fn test_failed_launch_discards_rewrite_session() {
        let (_dir, orch) = init_temp_repo();
        tutorial(&orch);
        std::fs::write(orch.project().root().join("a"), "dirty").unwrap();

        assert!(orch.sort(Some(StepId::Root)).is_err());

        let session = orch.session().unwrap();
        assert_eq!(session.old_step, None);
        assert_eq!(session.new_step, None);
        assert_eq!(orch.step_map().state(), StepMapState::Absent);
        assert!(!orch.project().history().unwrap().is_rebasing());
    }

    #[test]
    fn test_step_branch_name() {
        assert_eq!(step_branch("master", 3), "master-step3");
    }
}
