use crate::error::Error;
use anyhow::{Context, Result};
use git2::{Commit, DiffOptions, Oid, Repository, RepositoryState};
use std::path::Path;
use stepwise::v1::{StepDescriptor, StepId, StepNumber};

/// Which step commits a query is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepFilter {
    /// `^Step [0-9]+`
    Any,
    /// `^Step [0-9]+:`
    Super,
    /// `^Step [0-9]+\.[0-9]+:`
    Sub,
}

impl StepFilter {
    fn matches(&self, descriptor: &StepDescriptor) -> bool {
        match self {
            StepFilter::Any => true,
            StepFilter::Super => descriptor.number.is_super(),
            StepFilter::Sub => !descriptor.number.is_super(),
        }
    }
}

/// A commit whose message is a step message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepCommit {
    pub oid: Oid,
    pub descriptor: StepDescriptor,
}

/// Read-only, point-in-time queries over the first-parent history of HEAD.
///
/// Nothing is cached across calls beyond the open repository handle; open a
/// new `History` after any command that moves HEAD.
pub struct History {
    repo: Repository,
}

impl History {
    pub fn new(repo: Repository) -> Self {
        History { repo }
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    /// `None` on an unborn branch.
    pub fn head_oid(&self) -> Result<Option<Oid>> {
        match self.repo.head() {
            Ok(head) => Ok(Some(
                head.peel_to_commit().context("HEAD is not a commit")?.id(),
            )),
            Err(e)
                if matches!(
                    e.code(),
                    git2::ErrorCode::UnbornBranch | git2::ErrorCode::NotFound
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(e).context("Failed to read HEAD"),
        }
    }

    /// HEAD, HEAD~1, HEAD~2, ... down to the root commit.
    fn first_parent_chain(&self) -> Result<Vec<Oid>> {
        let Some(head) = self.head_oid()? else {
            return Ok(Vec::new());
        };

        let mut walker = self.repo.revwalk()?;
        walker.push(head)?;
        walker.simplify_first_parent()?;

        let mut chain = Vec::new();
        for oid in walker {
            chain.push(oid?);
        }
        Ok(chain)
    }

    /// Step descriptor of `oid`, if its message is a step message.
    pub fn step_at(&self, oid: Oid) -> Result<Option<StepDescriptor>> {
        let commit = self.repo.find_commit(oid)?;
        Ok(describe(&commit))
    }

    /// The most recent step commit at or below `HEAD~offset`.
    pub fn recent_step_commit(
        &self,
        offset: usize,
        filter: StepFilter,
    ) -> Result<Option<StepCommit>> {
        for oid in self.first_parent_chain()?.into_iter().skip(offset) {
            if let Some(descriptor) = self.step_at(oid)?
                && filter.matches(&descriptor)
            {
                return Ok(Some(StepCommit { oid, descriptor }));
            }
        }
        Ok(None)
    }

    /// Most recent step, or root when there are none.
    pub fn current_step(&self) -> Result<StepId> {
        Ok(self
            .recent_step_commit(0, StepFilter::Any)?
            .map_or(StepId::Root, |c| StepId::Step(c.descriptor.number)))
    }

    pub fn current_super_step(&self) -> Result<StepId> {
        Ok(self
            .recent_step_commit(0, StepFilter::Super)?
            .map_or(StepId::Root, |c| StepId::Step(c.descriptor.number)))
    }

    /// Number of the step that follows the most recent one at `HEAD~offset`.
    ///
    /// With a non-zero offset the step found from `HEAD~(offset-1)` is used as
    /// lookahead: it tells whether the commit after `current` was a super-step.
    pub fn next_step(&self, offset: usize) -> Result<StepNumber> {
        let current = self.recent_step_commit(offset, StepFilter::Any)?;
        let lookahead = if offset > 0 && current.is_some() {
            self.recent_step_commit(offset - 1, StepFilter::Any)?
        } else {
            None
        };

        Ok(stepwise::v1::next_step(
            current.as_ref().map(|c| &c.descriptor.number),
            lookahead.as_ref().map(|c| &c.descriptor.number),
        )?)
    }

    pub fn next_super_step(&self, offset: usize) -> Result<StepNumber> {
        Ok(self.next_step(offset)?.super_part())
    }

    /// Every step commit from the root to HEAD, oldest first.
    pub fn step_commits(&self) -> Result<Vec<StepCommit>> {
        let mut commits = Vec::new();
        for oid in self.first_parent_chain()?.into_iter().rev() {
            if let Some(descriptor) = self.step_at(oid)? {
                commits.push(StepCommit { oid, descriptor });
            }
        }
        Ok(commits)
    }

    /// `root` followed by every step number, in history order.
    pub fn all_steps(&self) -> Result<Vec<StepId>> {
        let mut steps = vec![StepId::Root];
        steps.extend(
            self.step_commits()?
                .into_iter()
                .map(|c| StepId::Step(c.descriptor.number)),
        );
        Ok(steps)
    }

    pub fn root_oid(&self) -> Result<Oid> {
        self.first_parent_chain()?
            .last()
            .copied()
            .ok_or_else(|| Error::StepNotFound("root".to_string()).into())
    }

    /// Commit carrying `id`; the most recent one if the label repeats.
    pub fn step_commit(&self, id: &StepId) -> Result<Oid> {
        let number = match id {
            StepId::Root => return self.root_oid(),
            StepId::Step(number) => number,
        };

        for oid in self.first_parent_chain()? {
            if let Some(descriptor) = self.step_at(oid)?
                && descriptor.number == *number
            {
                return Ok(oid);
            }
        }
        Err(Error::StepNotFound(id.to_string()).into())
    }

    /// Map any revision to the step it names. The root commit is `root`
    /// whatever its message says.
    pub fn resolve_revision(&self, revision: &str) -> Result<StepId> {
        let not_found = || Error::StepNotFound(revision.to_string());

        let commit = self
            .repo
            .revparse_single(revision)
            .and_then(|obj| obj.peel_to_commit())
            .map_err(|_| not_found())?;

        if commit.id() == self.root_oid()? {
            return Ok(StepId::Root);
        }

        describe(&commit)
            .map(|d| StepId::Step(d.number))
            .ok_or_else(|| not_found().into())
    }

    /// Commit a rewrite over `id` must start from; `None` means `--root`.
    pub fn step_base(&self, id: &StepId) -> Result<Option<Oid>> {
        if id.is_root() {
            return Ok(None);
        }

        let oid = self.step_commit(id)?;
        let commit = self.repo.find_commit(oid)?;
        Ok(commit.parent_ids().next())
    }

    pub fn is_rebasing(&self) -> bool {
        matches!(
            self.repo.state(),
            RepositoryState::Rebase
                | RepositoryState::RebaseInteractive
                | RepositoryState::RebaseMerge
        )
    }

    /// Whether the index holds unmerged entries.
    pub fn has_conflicts(&self) -> Result<bool> {
        let index = self.repo.index().context("Failed to read index")?;
        Ok(index.has_conflicts())
    }

    /// Branch being worked on; while rewriting, the branch the rewrite will
    /// update rather than the detached HEAD.
    pub fn active_branch_name(&self) -> Result<String> {
        if self.is_rebasing() {
            let head_name = self.repo.path().join("rebase-merge").join("head-name");
            if let Ok(name) = std::fs::read_to_string(&head_name) {
                let name = name.trim();
                return Ok(name.strip_prefix("refs/heads/").unwrap_or(name).to_string());
            }
        }

        let head = self.repo.head().context("Failed to read HEAD")?;
        head.shorthand()
            .map(str::to_string)
            .context("HEAD has no branch name")
    }

    /// Whether `oid` changed `path` relative to its first parent.
    pub fn commit_touches(&self, oid: Oid, path: &Path) -> Result<bool> {
        let commit = self.repo.find_commit(oid)?;
        let tree = commit.tree()?;
        let parent_tree = match commit.parents().next() {
            Some(parent) => Some(parent.tree()?),
            None => None,
        };

        let mut opts = DiffOptions::new();
        opts.pathspec(path);
        let diff = self
            .repo
            .diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), Some(&mut opts))?;
        Ok(diff.deltas().len() > 0)
    }

    /// Steps whose commit changed `path`, oldest first; `root` leads when the
    /// root commit did.
    pub fn steps_touching(&self, path: &Path) -> Result<Vec<StepId>> {
        let mut steps = Vec::new();
        if self.head_oid()?.is_none() {
            return Ok(steps);
        }

        let root = self.root_oid()?;
        if self.commit_touches(root, path)? {
            steps.push(StepId::Root);
        }
        for commit in self.step_commits()? {
            if commit.oid != root && self.commit_touches(commit.oid, path)? {
                steps.push(StepId::Step(commit.descriptor.number));
            }
        }
        Ok(steps)
    }

    /// Abbreviated hash and subject of HEAD.
    pub fn head_summary(&self) -> Result<(String, String)> {
        let commit = self
            .repo
            .head()
            .and_then(|h| h.peel_to_commit())
            .context("Failed to read HEAD")?;
        let short = commit.as_object().short_id()?;
        Ok((
            short.as_str().unwrap_or_default().to_string(),
            commit.summary().unwrap_or_default().to_string(),
        ))
    }
}

fn describe(commit: &Commit) -> Option<StepDescriptor> {
    commit
        .message()
        .and_then(|m| StepDescriptor::parse(m.trim_end()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_temp_repo() -> (tempfile::TempDir, Repository) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();

        let mut config = repo.config().unwrap();
        config.set_str("user.name", "Test User").unwrap();
        config.set_str("user.email", "test@example.com").unwrap();

        (dir, repo)
    }

    fn create_commit(repo: &Repository, message: &str, file_name: &str, content: &str) -> Oid {
        let mut index = repo.index().unwrap();
        let file_path = repo.workdir().unwrap().join(file_name);
        std::fs::write(&file_path, content).unwrap();
        index.add_path(Path::new(file_name)).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = repo.signature().unwrap();
        let parent = repo.head().ok().map(|h| h.peel_to_commit().unwrap());
        let parents: Vec<&Commit> = parent.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .unwrap()
    }

    /// root, 1.1, 1.2, 1, 2.1
    fn tutorial_repo() -> (tempfile::TempDir, History) {
        let (dir, repo) = init_temp_repo();
        create_commit(&repo, "Initial commit", "package.json", "{}\n");
        create_commit(&repo, "Step 1.1: Add server", "server.rs", "a");
        create_commit(&repo, "Step 1.2: Add router", "router.rs", "b");
        create_commit(&repo, "Step 1: Server", "manual.md", "c");
        create_commit(&repo, "Step 2.1: Add client", "package.json", "{\"a\":1}\n");
        (dir, History::new(repo))
    }

    fn id(s: &str) -> StepId {
        s.parse().unwrap()
    }

    fn n(s: &str) -> StepNumber {
        s.parse().unwrap()
    }

    // ── recent / current ───────────────────────────────────────────────

    #[test]
    fn test_current_step_on_empty_history() {
        let (_dir, repo) = init_temp_repo();
        let history = History::new(repo);
        assert_eq!(history.current_step().unwrap(), StepId::Root);
        assert!(history.all_steps().unwrap() == vec![StepId::Root]);
    }

    #[test]
    fn test_current_step_and_super_step() {
        let (_dir, history) = tutorial_repo();
        assert_eq!(history.current_step().unwrap(), id("2.1"));
        assert_eq!(history.current_super_step().unwrap(), id("1"));
    }

    #[test]
    fn test_recent_step_commit_filters() {
        let (_dir, history) = tutorial_repo();
        let sub = history.recent_step_commit(0, StepFilter::Sub).unwrap().unwrap();
        assert_eq!(sub.descriptor.number, n("2.1"));

        let older = history.recent_step_commit(2, StepFilter::Sub).unwrap().unwrap();
        assert_eq!(older.descriptor.number, n("1.2"));

        assert!(history.recent_step_commit(10, StepFilter::Any).unwrap().is_none());
    }

    // ── next ───────────────────────────────────────────────────────────

    #[test]
    fn test_next_step_without_offset() {
        let (_dir, history) = tutorial_repo();
        assert_eq!(history.next_step(0).unwrap(), n("2.2"));
        assert_eq!(history.next_super_step(0).unwrap(), n("2"));
    }

    #[test]
    fn test_next_step_after_super_step() {
        let (_dir, repo) = init_temp_repo();
        create_commit(&repo, "Initial commit", "a", "a");
        create_commit(&repo, "Step 1.1: x", "b", "b");
        create_commit(&repo, "Step 1: y", "c", "c");
        let history = History::new(repo);
        assert_eq!(history.next_step(0).unwrap(), n("2.1"));
    }

    #[test]
    fn test_next_step_with_super_lookahead() {
        let (_dir, history) = tutorial_repo();
        // From HEAD~2 the current step is 1.2, and the commit after it is super-step 1.
        assert_eq!(history.next_step(2).unwrap(), n("1"));
        // From HEAD~1 the current step is super-step 1, followed by sub-step 2.1.
        assert_eq!(history.next_step(1).unwrap(), n("2.1"));
    }

    #[test]
    fn test_next_step_on_empty_history() {
        let (_dir, repo) = init_temp_repo();
        create_commit(&repo, "Initial commit", "a", "a");
        let history = History::new(repo);
        assert_eq!(history.next_step(0).unwrap(), n("1.1"));
    }

    #[test]
    fn test_next_step_past_largest_number_is_an_error() {
        let (_dir, repo) = init_temp_repo();
        create_commit(&repo, "Initial commit", "a", "a");
        create_commit(&repo, "Step 4294967295: big", "b", "b");
        let history = History::new(repo);
        let err = history.next_step(0).unwrap_err();
        assert!(err.to_string().contains("no step follows 4294967295"));
    }

    // ── all_steps / lookup ─────────────────────────────────────────────

    #[test]
    fn test_all_steps_in_history_order() {
        let (_dir, history) = tutorial_repo();
        let steps: Vec<String> = history
            .all_steps()
            .unwrap()
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(steps, ["root", "1.1", "1.2", "1", "2.1"]);
    }

    #[test]
    fn test_step_commit_and_base() {
        let (_dir, history) = tutorial_repo();
        let one = history.step_commit(&id("1")).unwrap();
        let twelve = history.step_commit(&id("1.2")).unwrap();
        assert_eq!(history.step_base(&id("1")).unwrap(), Some(twelve));
        assert_ne!(one, twelve);
        assert_eq!(history.step_base(&StepId::Root).unwrap(), None);
    }

    #[test]
    fn test_step_commit_not_found() {
        let (_dir, history) = tutorial_repo();
        let err = history.step_commit(&id("7")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::StepNotFound(s)) if s == "7"
        ));
    }

    #[test]
    fn test_resolve_revision() {
        let (_dir, history) = tutorial_repo();
        assert_eq!(history.resolve_revision("HEAD").unwrap(), id("2.1"));
        assert_eq!(history.resolve_revision("HEAD~1").unwrap(), id("1"));
        assert_eq!(history.resolve_revision("HEAD~4").unwrap(), StepId::Root);
        assert!(history.resolve_revision("no-such-branch").is_err());
    }

    // ── repository state ───────────────────────────────────────────────

    #[test]
    fn test_not_rebasing_and_branch_name() {
        let (_dir, history) = tutorial_repo();
        assert!(!history.is_rebasing());
        assert!(!history.has_conflicts().unwrap());
        let branch = history.active_branch_name().unwrap();
        assert!(branch == "master" || branch == "main");
    }

    #[test]
    fn test_steps_touching() {
        let (_dir, history) = tutorial_repo();
        let steps = history.steps_touching(Path::new("package.json")).unwrap();
        assert_eq!(steps, vec![StepId::Root, id("2.1")]);
    }

    #[test]
    fn test_head_summary() {
        let (_dir, history) = tutorial_repo();
        let (short, subject) = history.head_summary().unwrap();
        assert!(short.len() >= 7);
        assert_eq!(subject, "Step 2.1: Add client");
    }
}
