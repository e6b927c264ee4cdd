use anyhow::Result;
use clap::Subcommand;
use stepwise::v1::{StepId, StepSelector};
use stepwise_git::{EditOptions, Orchestrator, RewriteState};

#[derive(Subcommand, Debug)]
pub enum StepCommand {
    /// Commit the staged changes as the next step
    Push {
        /// Step message (opens the editor when omitted)
        #[arg(short, long)]
        message: Option<String>,

        /// Allow a step without changes
        #[arg(long)]
        allow_empty: bool,
    },
    /// Remove the most recent commit
    Pop,
    /// Close the current super-step
    Tag {
        /// Step message (opens the editor when omitted)
        #[arg(short, long)]
        message: Option<String>,
    },
    /// Rewrite history, pausing at the given steps
    Edit {
        /// Step numbers, `root`, ranges (`A..B`) or git revisions
        selectors: Vec<String>,

        /// Track renumbered steps so other projects can update their references
        #[arg(long)]
        udiff: bool,
    },
    /// Renumber the steps of a super-step (`root` for the whole history)
    Sort {
        /// Defaults to the current step
        step: Option<String>,
    },
    /// Change the message of a step, keeping its number
    Reword {
        /// Defaults to the current step
        step: Option<String>,

        /// New message (opens the editor when omitted)
        #[arg(short, long)]
        message: Option<String>,
    },
    /// Go back to an earlier pause of the running rewrite
    Back {
        /// Step paused at, or `xN` for the Nth previous pause
        target: Option<String>,

        /// List the pauses that can be returned to
        #[arg(long)]
        list: bool,
    },
    /// Abandon the running rewrite
    Abort,
}

pub fn run(orchestrator: &Orchestrator, cmd: StepCommand) -> Result<()> {
    match cmd {
        StepCommand::Push {
            message,
            allow_empty,
        } => {
            let step = orchestrator.push(message.as_deref(), allow_empty)?;
            println!("Step {}", step);
            Ok(())
        }
        StepCommand::Pop => {
            match orchestrator.pop()? {
                Some(step) => println!("Removed step {}", step),
                None => println!("Removed commit"),
            }
            Ok(())
        }
        StepCommand::Tag { message } => {
            let step = orchestrator.tag(message.as_deref())?;
            println!("Step {}", step);
            Ok(())
        }
        StepCommand::Edit { selectors, udiff } => {
            let selectors = selectors
                .iter()
                .map(|s| StepSelector::parse(s))
                .collect::<Result<Vec<_>, _>>()?;
            let options = EditOptions {
                track_step_map: udiff,
            };
            report(orchestrator.edit(&selectors, &options)?)
        }
        StepCommand::Sort { step } => {
            let step = parse_step(step.as_deref())?;
            report(orchestrator.sort(step)?)
        }
        StepCommand::Reword { step, message } => {
            let step = parse_step(step.as_deref())?;
            report(orchestrator.reword(step, message.as_deref())?)
        }
        StepCommand::Back { target, list } => {
            if list {
                return list_pauses(orchestrator);
            }
            report(orchestrator.back(target.as_deref())?)
        }
        StepCommand::Abort => report(orchestrator.abort()?),
    }
}

fn parse_step(step: Option<&str>) -> Result<Option<StepId>> {
    Ok(step.map(str::parse).transpose()?)
}

fn list_pauses(orchestrator: &Orchestrator) -> Result<()> {
    let pauses = orchestrator.previous_pauses()?;
    if pauses.is_empty() {
        println!("No previous pauses");
        return Ok(());
    }
    for (i, pause) in pauses.iter().enumerate() {
        println!(
            "x{:<3} {:<8} {}",
            i + 1,
            pause.step,
            pause.time.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

/// Stop notices are printed by the orchestrator; only terminal states are reported here.
fn report(state: RewriteState) -> Result<()> {
    match state {
        RewriteState::Completed => println!("Rewrite complete"),
        RewriteState::Aborted => println!("Rewrite aborted"),
        RewriteState::InProgress => println!("Rewrite in progress"),
        RewriteState::NotStarted | RewriteState::Paused | RewriteState::Conflicted => {}
    }
    Ok(())
}
