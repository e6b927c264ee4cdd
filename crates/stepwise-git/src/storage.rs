use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Step a commit-message hook should stamp on the next commit.
pub const HOOK_STEP: &str = "HOOK_STEP";
/// Step being renamed by an in-flight rewrite.
pub const REBASE_OLD_STEP: &str = "REBASE_OLD_STEP";
/// Step it is being renamed to.
pub const REBASE_NEW_STEP: &str = "REBASE_NEW_STEP";
pub const SUBMODULE_CWD: &str = "SUBMODULE_CWD";
/// Set while the engine runs a rewrite that hooks must not interfere with.
pub const REBASE_HOOKS_DISABLED: &str = "REBASE_HOOKS_DISABLED";
pub const STEP_MAP: &str = "STEP_MAP";
pub const STEP_MAP_PENDING: &str = "STEP_MAP_PENDING";

/// Directory-backed key-value store: one file per key.
///
/// Each write goes through a temp file in the same directory and is
/// persisted over the key's file, so a process killed mid-write never
/// leaves a truncated value behind.
#[derive(Debug, Clone)]
pub struct Storage {
    dir: PathBuf,
}

impl Storage {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Storage { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    pub fn get_item(&self, key: &str) -> Result<Option<String>> {
        let path = self.path(key);
        match std::fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
        }
    }

    pub fn has_item(&self, key: &str) -> bool {
        self.path(key).is_file()
    }

    pub fn set_item(&self, key: &str, value: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;

        let path = self.path(key);
        let tmp = tempfile::NamedTempFile::new_in(&self.dir)
            .context("failed to create temp file for atomic write")?;
        std::fs::write(tmp.path(), value)
            .with_context(|| format!("failed to write value for {}", key))?;
        tmp.persist(&path)
            .with_context(|| format!("failed to persist {}", path.display()))?;
        Ok(())
    }

    /// Removing a missing key is not an error.
    pub fn remove_item(&self, key: &str) -> Result<()> {
        let path = self.path(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("failed to remove {}", path.display())),
        }
    }

    fn set_or_remove(&self, key: &str, value: Option<&str>) -> Result<()> {
        match value {
            Some(value) => self.set_item(key, value),
            None => self.remove_item(key),
        }
    }
}

/// The session variables shared between the orchestrator, the exec helpers
/// it schedules inside a rewrite, and commit-message hooks.
///
/// Loaded at the start of an operation and saved back whenever it changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub hook_step: Option<String>,
    pub old_step: Option<String>,
    pub new_step: Option<String>,
    pub submodule_cwd: Option<String>,
    pub hooks_disabled: bool,
}

impl SessionState {
    pub fn load(storage: &Storage) -> Result<Self> {
        Ok(SessionState {
            hook_step: storage.get_item(HOOK_STEP)?,
            old_step: storage.get_item(REBASE_OLD_STEP)?,
            new_step: storage.get_item(REBASE_NEW_STEP)?,
            submodule_cwd: storage.get_item(SUBMODULE_CWD)?,
            hooks_disabled: storage.has_item(REBASE_HOOKS_DISABLED),
        })
    }

    pub fn save(&self, storage: &Storage) -> Result<()> {
        storage.set_or_remove(HOOK_STEP, self.hook_step.as_deref())?;
        storage.set_or_remove(REBASE_OLD_STEP, self.old_step.as_deref())?;
        storage.set_or_remove(REBASE_NEW_STEP, self.new_step.as_deref())?;
        storage.set_or_remove(SUBMODULE_CWD, self.submodule_cwd.as_deref())?;
        storage.set_or_remove(REBASE_HOOKS_DISABLED, self.hooks_disabled.then_some("1"))?;
        Ok(())
    }

    /// Forget what a finished rewrite left behind.
    pub fn clear_rewrite(&mut self) {
        self.old_step = None;
        self.new_step = None;
        self.submodule_cwd = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> (tempfile::TempDir, Storage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::new(dir.path().join("storage"));
        (dir, storage)
    }

    // ── Storage ────────────────────────────────────────────────────────

    #[test]
    fn test_get_missing_item() {
        let (_dir, storage) = storage();
        assert_eq!(storage.get_item(HOOK_STEP).unwrap(), None);
        assert!(!storage.has_item(HOOK_STEP));
    }

    #[test]
    fn test_set_get_overwrite() {
        let (_dir, storage) = storage();
        storage.set_item(HOOK_STEP, "1.1").unwrap();
        assert_eq!(storage.get_item(HOOK_STEP).unwrap().as_deref(), Some("1.1"));
        storage.set_item(HOOK_STEP, "2").unwrap();
        assert_eq!(storage.get_item(HOOK_STEP).unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn test_remove_item_is_idempotent() {
        let (_dir, storage) = storage();
        storage.set_item(STEP_MAP, "{}").unwrap();
        storage.remove_item(STEP_MAP).unwrap();
        storage.remove_item(STEP_MAP).unwrap();
        assert!(!storage.has_item(STEP_MAP));
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let (_dir, storage) = storage();
        storage.set_item(HOOK_STEP, "1").unwrap();
        storage.set_item(REBASE_NEW_STEP, "2").unwrap();
        let names: Vec<_> = std::fs::read_dir(storage.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names.len(), 2);
    }

    // ── SessionState ───────────────────────────────────────────────────

    #[test]
    fn test_session_roundtrip() {
        let (_dir, storage) = storage();
        let state = SessionState {
            hook_step: Some("1.2".into()),
            old_step: Some("1".into()),
            new_step: Some("2.1".into()),
            submodule_cwd: None,
            hooks_disabled: true,
        };
        state.save(&storage).unwrap();
        assert_eq!(SessionState::load(&storage).unwrap(), state);
    }

    #[test]
    fn test_session_save_removes_cleared_fields() {
        let (_dir, storage) = storage();
        let mut state = SessionState {
            old_step: Some("root".into()),
            new_step: Some("1".into()),
            submodule_cwd: Some("vendor/lib".into()),
            hooks_disabled: true,
            ..Default::default()
        };
        state.save(&storage).unwrap();

        state.clear_rewrite();
        state.hooks_disabled = false;
        state.save(&storage).unwrap();

        assert!(!storage.has_item(REBASE_OLD_STEP));
        assert!(!storage.has_item(REBASE_NEW_STEP));
        assert!(!storage.has_item(SUBMODULE_CWD));
        assert!(!storage.has_item(REBASE_HOOKS_DISABLED));
        assert_eq!(SessionState::load(&storage).unwrap(), SessionState::default());
    }
}
