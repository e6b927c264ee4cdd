use crate::error::Error;
use crate::storage::{REBASE_NEW_STEP, REBASE_OLD_STEP, Storage};
use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use git2::{IndexAddOption, Oid, Repository, ResetType, Signature};
use std::path::{Path, PathBuf};
use tracing::debug;

const HEAD: &str = "HEAD";
const TODO: &str = "TODO";
const INIT_MESSAGE: &str = "init";

/// What a pause needs to be re-entered later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Instructions still pending once the paused commit is applied.
    pub todo: String,
    /// Commit to reset the project to.
    pub head: String,
    pub old_step: String,
    pub new_step: String,
}

/// One recorded pause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PauseInfo {
    pub step: String,
    pub oid: Oid,
    pub time: DateTime<Utc>,
}

/// A throwaway repository holding one commit per pause of the running
/// rewrite. Its working tree is a key-value store (`HEAD`, `TODO`,
/// `REBASE_OLD_STEP`, `REBASE_NEW_STEP`) and each commit message is the
/// step paused at.
#[derive(Debug, Clone)]
pub struct RebaseStateStore {
    dir: PathBuf,
}

impl RebaseStateStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        RebaseStateStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn open(&self) -> Result<Repository> {
        Repository::open(&self.dir)
            .with_context(|| format!("No rebase state repository at {}", self.dir.display()))
    }

    fn kv(&self) -> Storage {
        Storage::new(&self.dir)
    }

    /// Wipe every recorded pause and start over from a single `init` commit.
    pub fn reinitialize(&self) -> Result<()> {
        if self.dir.exists() {
            std::fs::remove_dir_all(&self.dir)
                .with_context(|| format!("Failed to remove {}", self.dir.display()))?;
        }
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let repo = Repository::init(&self.dir)
            .with_context(|| format!("Failed to init {}", self.dir.display()))?;
        commit_all(&repo, INIT_MESSAGE)?;
        debug!(dir = %self.dir.display(), "reinitialized rebase states");
        Ok(())
    }

    /// Record a pause at `step`.
    pub fn snapshot(&self, step: &str, snapshot: &Snapshot) -> Result<Oid> {
        let repo = self.open()?;
        let kv = self.kv();
        kv.set_item(REBASE_OLD_STEP, &snapshot.old_step)?;
        kv.set_item(REBASE_NEW_STEP, &snapshot.new_step)?;
        kv.set_item(HEAD, &snapshot.head)?;
        kv.set_item(TODO, &snapshot.todo)?;

        let oid = commit_all(&repo, step)?;
        debug!(step, %oid, "stashed rebase state");
        Ok(oid)
    }

    /// Every pause before the current one, most recent first. The current
    /// pause and the `init` commit are not listed.
    pub fn list_pauses(&self) -> Result<Vec<PauseInfo>> {
        let repo = self.open()?;
        let mut walker = repo.revwalk()?;
        walker.push_head()?;
        walker.simplify_first_parent()?;

        let mut pauses = Vec::new();
        for oid in walker {
            let commit = repo.find_commit(oid?)?;
            if commit.parent_count() == 0 {
                break;
            }
            let time = Utc
                .timestamp_opt(commit.time().seconds(), 0)
                .single()
                .unwrap_or_default();
            pauses.push(PauseInfo {
                step: commit.message().unwrap_or_default().trim().to_string(),
                oid: commit.id(),
                time,
            });
        }

        if !pauses.is_empty() {
            pauses.remove(0);
        }
        Ok(pauses)
    }

    /// Pick the pause `target` names: a step number, `xN` for the Nth most
    /// recent pause, or nothing for the most recent one.
    pub fn resolve_target(&self, target: Option<&str>) -> Result<PauseInfo> {
        let pauses = self.list_pauses()?;
        if pauses.is_empty() {
            return Err(Error::NoPreviousSteps.into());
        }

        let Some(target) = target else {
            return Ok(pauses[0].clone());
        };

        if let Some(times) = target.strip_prefix('x') {
            let times: usize = times
                .parse()
                .map_err(|_| Error::InvalidBackTarget(target.to_string()))?;
            return times
                .checked_sub(1)
                .and_then(|i| pauses.get(i))
                .cloned()
                .ok_or_else(|| Error::StepNotEdited(target.to_string()).into());
        }

        if target != "root" && target.parse::<stepwise::v1::StepNumber>().is_err() {
            return Err(Error::InvalidBackTarget(target.to_string()).into());
        }

        pauses
            .into_iter()
            .find(|p| p.step == target)
            .ok_or_else(|| Error::StepNotEdited(target.to_string()).into())
    }

    /// Reset the store to `pause` and return what it recorded.
    pub fn restore(&self, pause: &PauseInfo) -> Result<Snapshot> {
        let repo = self.open()?;
        let commit = repo.find_commit(pause.oid)?;
        repo.reset(commit.as_object(), ResetType::Hard, None)
            .with_context(|| format!("Failed to reset rebase states to {}", pause.step))?;
        debug!(step = %pause.step, "restored rebase state");
        self.current()
    }

    /// The snapshot at the top of the store.
    pub fn current(&self) -> Result<Snapshot> {
        let kv = self.kv();
        let get = |key: &str| -> Result<String> {
            kv.get_item(key)?
                .with_context(|| format!("Rebase state is missing {}", key))
        };
        Ok(Snapshot {
            todo: get(TODO)?,
            head: get(HEAD)?,
            old_step: get(REBASE_OLD_STEP)?,
            new_step: get(REBASE_NEW_STEP)?,
        })
    }
}

fn commit_all(repo: &Repository, message: &str) -> Result<Oid> {
    let mut index = repo.index()?;
    index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
    index.update_all(["*"].iter(), None)?;
    index.write()?;
    let tree = repo.find_tree(index.write_tree()?)?;

    let sig = Signature::now("stepwise", "stepwise@localhost")?;
    let parent = match repo.head() {
        Ok(head) => Some(head.peel_to_commit()?),
        Err(_) => None,
    };
    let parents: Vec<&git2::Commit> = parent.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
        .with_context(|| format!("Failed to record rebase state {}", message))
}
