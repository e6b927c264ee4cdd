use thiserror::Error;

/// Failures the engine reports to its caller.
///
/// Functions in this crate return `anyhow::Result`; these values travel
/// inside it and can be recovered with `err.downcast_ref::<Error>()`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("step not found: {0}")]
    StepNotFound(String),

    #[error("can't remove root")]
    RootRemoval,

    #[error("no rebase in progress")]
    NoRebaseInProgress,

    #[error("a rewrite is already in progress")]
    RewriteInProgress,

    #[error("no previous steps found")]
    NoPreviousSteps,

    #[error("provided target step {0} was not edited")]
    StepNotEdited(String),

    #[error("provided argument is neither a step nor a multiplier: {0}")]
    InvalidBackTarget(String),

    #[error("unexpected conflict in: {}", .0.join(", "))]
    UnexpectedConflict(Vec<String>),

    #[error("failed to abort rewrite at {head}: {reason}")]
    RewriteAbortFailure { head: String, reason: String },

    #[error("`git {command}` failed ({status}): {stderr}")]
    GitCommand {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("conflict resolution did not finish after {0} rounds")]
    ResolveLoopExhausted(usize),
}
