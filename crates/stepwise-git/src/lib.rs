#![doc = include_str!("../README.md")]

pub mod config;
pub mod editor;
mod error;
pub mod git;
pub mod history;
pub mod project;
pub mod rebase;
pub mod rebase_state;
pub mod resolver;
pub mod step_map;
pub mod storage;

pub use config::{Config, ManifestConfig, ManualsConfig, load_config};
pub use editor::EditorMode;
pub use error::Error;
pub use git::Git;
pub use history::{History, StepCommit, StepFilter};
pub use project::Project;
pub use rebase::{EditOptions, Orchestrator, RewriteState, SUBMODULE_CWD_ENV};
pub use rebase_state::{PauseInfo, RebaseStateStore, Snapshot};
pub use resolver::{CommandRenderer, ManualRenderer, NoopRenderer, update_dependencies};
pub use step_map::StepMapStore;
pub use storage::{SessionState, Storage};
