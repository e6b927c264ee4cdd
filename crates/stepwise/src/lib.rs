#![doc = include_str!("../README.md")]

mod error;
mod manifest;
mod selector;
mod step;
mod step_map;
mod todo;

pub mod v1 {
    //! Versioned public API for the step model.
    //!
    //! # Step identity
    //!
    //! - [`StepNumber`]: `N` or `N.M`, ordered super number first
    //! - [`StepId`]: the root commit or a numbered step
    //! - [`StepDescriptor`]: a view of a `"Step <number>: <message>"` commit
    //! - [`next_step`], [`next_super_step`]: numbering of the following commit
    //!
    //! # Selection
    //!
    //! - [`StepSelector`]: one `edit` argument: root, step, range or revision
    //! - [`expand_range`], [`sort_selection`], [`earliest_in_history`]
    //!
    //! # Rewrite instructions
    //!
    //! - [`TodoList`] / [`Instruction`]: the pending instruction list
    //! - [`HelperCommands`]: `exec` lines that call back into the binary
    //! - [`SortScope`]: what `sort` renumbers
    //!
    //! # Step map
    //!
    //! - [`StepMap`], [`StepMapUpdate`], [`StepMapState`]
    //! - [`remap_diff_step_references`], [`shift_manual_files`]: patch fixups
    //!   for a replayed super-step
    //!
    //! # Example: number the commit after a super-step
    //!
    //! ```
    //! use stepwise::v1::*;
    //!
    //! let last = StepDescriptor::parse("Step 2: Wrap up the server").unwrap();
    //! let next = next_step(Some(&last.number), None).unwrap();
    //! let commit = StepDescriptor::new(next, "Add a client");
    //! assert_eq!(commit.format(), "Step 3.1: Add a client");
    //! ```

    /// Conflict splitting and merge rules for the tracked metadata file.
    pub mod manifest {
        pub use crate::manifest::{
            ConflictSides, DEFAULT_SECTIONS, Overrides, merge_manifest, render_manifest,
            resolve_manifest, sniff_indent, split_conflict,
        };
    }
    pub use crate::error::{Result, StepError};
    pub use crate::selector::{
        StepSelector, earliest_in_history, expand_range, history_key, sort_selection,
    };
    pub use crate::step::{
        STEP_PREFIX, StepDescriptor, StepId, StepKind, StepNumber, next_step, next_super_step,
    };
    pub use crate::step_map::{
        REMOVED_STEP, StepMap, StepMapState, StepMapUpdate, remap_diff_step_references,
        shift_manual_files,
    };
    pub use crate::todo::{Action, HelperCommands, Instruction, SortScope, TodoList, shell_quote};
}
