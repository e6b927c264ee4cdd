use crate::git::Git;
use crate::history::History;
use crate::storage::Storage;
use anyhow::{Context, Result};
use git2::Repository;
use std::path::{Path, PathBuf};

/// Locations of everything the engine reads or writes for one project.
///
/// A submodule is a project of its own: discovering from inside it yields
/// its own git directory and therefore its own session store.
#[derive(Debug, Clone)]
pub struct Project {
    root: PathBuf,
    git_dir: PathBuf,
}

impl Project {
    /// Find the repository containing `path`.
    pub fn discover<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let repo = Repository::discover(path)
            .with_context(|| format!("Failed to open repository at {:?}", path))?;
        let root = repo
            .workdir()
            .with_context(|| format!("Repository at {:?} has no working tree", path))?
            .to_path_buf();

        Ok(Project {
            root,
            git_dir: repo.path().to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Engine state lives inside the git directory, out of the working tree.
    pub fn stepwise_dir(&self) -> PathBuf {
        self.git_dir.join("stepwise")
    }

    pub fn storage_dir(&self) -> PathBuf {
        self.stepwise_dir().join("storage")
    }

    pub fn rebase_states_dir(&self) -> PathBuf {
        self.stepwise_dir().join("rebase-states")
    }

    pub fn rebase_merge_dir(&self) -> PathBuf {
        self.git_dir.join("rebase-merge")
    }

    pub fn rebase_todo_file(&self) -> PathBuf {
        self.rebase_merge_dir().join("git-rebase-todo")
    }

    /// The config file `load_config` falls back to.
    pub fn config_file(&self) -> PathBuf {
        self.root.join(".stepwise").join("config.json")
    }

    pub fn open_repo(&self) -> Result<Repository> {
        Repository::open(&self.root)
            .with_context(|| format!("Failed to open repository at {:?}", self.root))
    }

    /// A fresh view of history; re-open after any command that moves HEAD.
    pub fn history(&self) -> Result<History> {
        Ok(History::new(self.open_repo()?))
    }

    pub fn storage(&self) -> Storage {
        Storage::new(self.storage_dir())
    }

    pub fn git(&self) -> Git {
        Git::new(&self.root)
    }
}
