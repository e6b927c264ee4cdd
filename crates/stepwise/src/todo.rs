//! The interactive rewrite's instruction list and the transformations the
//! sequence-editor callback applies to it.
//!
//! Every transformation is a pure function of the list and its arguments:
//! the callback process reads the file, applies one of these, writes it back
//! and exits.

use crate::error::{Result, StepError};
use crate::step::{StepDescriptor, StepId};
use std::fmt;
use std::str::FromStr;

/// Verb of a commit instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Pick,
    Reword,
    Edit,
    Squash,
    Fixup,
    Drop,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Pick => "pick",
            Action::Reword => "reword",
            Action::Edit => "edit",
            Action::Squash => "squash",
            Action::Fixup => "fixup",
            Action::Drop => "drop",
        }
    }
}

impl FromStr for Action {
    type Err = StepError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pick" | "p" => Ok(Action::Pick),
            "reword" | "r" => Ok(Action::Reword),
            "edit" | "e" => Ok(Action::Edit),
            "squash" | "s" => Ok(Action::Squash),
            "fixup" | "f" => Ok(Action::Fixup),
            "drop" | "d" => Ok(Action::Drop),
            other => Err(StepError::MalformedTodo(other.to_string())),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of the instruction list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// `<action> <hash> <original subject>`
    Commit {
        action: Action,
        hash: String,
        subject: String,
    },
    /// `exec <shell command>`
    Exec(String),
    /// Comments, blank lines and verbs this engine never rewrites; kept verbatim.
    Other(String),
}

impl Instruction {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return Instruction::Other(line.to_string());
        }

        let (verb, rest) = trimmed.split_once(char::is_whitespace).unwrap_or((trimmed, ""));
        let rest = rest.trim_start();

        if verb == "exec" || verb == "x" {
            return Instruction::Exec(rest.to_string());
        }

        match verb.parse::<Action>() {
            // `fixup -C <hash>` and friends carry flags; leave them alone
            Ok(action) if !rest.starts_with('-') && !rest.is_empty() => {
                let (hash, subject) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                Instruction::Commit {
                    action,
                    hash: hash.to_string(),
                    subject: subject.trim_start().to_string(),
                }
            }
            _ => Instruction::Other(line.to_string()),
        }
    }

    pub fn render(&self) -> String {
        match self {
            Instruction::Commit {
                action,
                hash,
                subject,
            } => {
                if subject.is_empty() {
                    format!("{} {}", action, hash)
                } else {
                    format!("{} {} {}", action, hash, subject)
                }
            }
            Instruction::Exec(command) => format!("exec {}", command),
            Instruction::Other(line) => line.clone(),
        }
    }

    /// Step descriptor of a commit instruction, if its subject is a step.
    pub fn step(&self) -> Option<StepDescriptor> {
        match self {
            Instruction::Commit { subject, .. } => StepDescriptor::parse(subject),
            _ => None,
        }
    }

    pub fn is_commit(&self) -> bool {
        matches!(self, Instruction::Commit { .. })
    }
}

/// Which part of history `sort` renumbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortScope {
    /// Everything from the root commit.
    All,
    /// The sub-steps of one super-step, up to and including the super-step commit.
    Super(u32),
}

impl fmt::Display for SortScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortScope::All => write!(f, "root"),
            SortScope::Super(n) => write!(f, "{}", n),
        }
    }
}

impl FromStr for SortScope {
    type Err = StepError;

    fn from_str(s: &str) -> Result<Self> {
        match s.parse::<StepId>()? {
            StepId::Root => Ok(SortScope::All),
            StepId::Step(n) => Ok(SortScope::Super(n.super_number)),
        }
    }
}

/// Shell commands the rewrite runs back into this program.
#[derive(Debug, Clone)]
pub struct HelperCommands {
    program: String,
}

impl HelperCommands {
    /// `program` is the already-quoted invocation prefix (binary plus any global flags).
    pub fn new(program: impl Into<String>) -> Self {
        HelperCommands {
            program: program.into(),
        }
    }

    pub fn stash_state(&self) -> String {
        format!("{} rebase stash-state", self.program)
    }

    pub fn reword(&self, message: Option<&str>, keep_number: bool) -> String {
        let mut command = format!("{} rebase reword", self.program);
        if keep_number {
            command.push_str(" --keep-number");
        }
        if let Some(message) = message {
            command.push_str(" -m ");
            command.push_str(&shell_quote(message));
        }
        command
    }

    pub fn finalize(&self) -> String {
        format!("{} rebase finalize", self.program)
    }

    pub fn super_pick(&self, hash: &str) -> String {
        format!("{} rebase super-pick {}", self.program, shell_quote(hash))
    }
}

/// Quote `s` for a POSIX shell.
///
/// ```
/// use stepwise::v1::shell_quote;
///
/// assert_eq!(shell_quote("plain"), "plain");
/// assert_eq!(shell_quote("two words"), "'two words'");
/// assert_eq!(shell_quote("it's"), r#"'it'\''s'"#);
/// ```
pub fn shell_quote(s: &str) -> String {
    let safe = !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@+,".contains(c));
    if safe {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r#"'\''"#))
    }
}

/// The pending instruction list of a rewrite.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TodoList {
    pub instructions: Vec<Instruction>,
}

impl TodoList {
    pub fn parse(content: &str) -> Self {
        TodoList {
            instructions: content.lines().map(Instruction::parse).collect(),
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for instruction in &self.instructions {
            out.push_str(&instruction.render());
            out.push('\n');
        }
        out
    }

    /// Instructions that still do work (commits and execs).
    pub fn pending_count(&self) -> usize {
        self.instructions
            .iter()
            .filter(|i| !matches!(i, Instruction::Other(_)))
            .count()
    }

    pub fn commits(&self) -> impl Iterator<Item = &Instruction> {
        self.instructions.iter().filter(|i| i.is_commit())
    }

    /// Mark the selected commits `edit` and everything else `pick`.
    ///
    /// A stash of the rewrite state is scheduled right before each `edit`, and
    /// reference branches are rebuilt once the last instruction has run. When
    /// `root` is selected the first commit of the list is the root commit.
    pub fn mark_edits(&mut self, steps: &[StepId], helpers: &HelperCommands) {
        let root_selected = steps.contains(&StepId::Root);
        let mut out = Vec::with_capacity(self.instructions.len() * 2);
        let mut seen_commit = false;

        for instruction in self.instructions.drain(..) {
            let (action, hash, subject) = match instruction {
                Instruction::Commit {
                    action,
                    hash,
                    subject,
                } => (action, hash, subject),
                other => {
                    out.push(other);
                    continue;
                }
            };

            let is_first = !seen_commit;
            seen_commit = true;

            let selected = (is_first && root_selected)
                || StepDescriptor::parse(&subject)
                    .is_some_and(|d| steps.contains(&StepId::Step(d.number)));

            let action = match (selected, action) {
                (true, _) => Action::Edit,
                (false, Action::Edit) => Action::Pick,
                (false, other) => other,
            };

            if selected {
                out.push(Instruction::Exec(helpers.stash_state()));
            }
            out.push(Instruction::Commit {
                action,
                hash,
                subject,
            });
        }

        out.push(Instruction::Exec(helpers.finalize()));
        self.instructions = out;
    }

    /// Schedule a renumbering reword after every step commit in `scope`.
    ///
    /// The new number is computed when each reword runs, from the already
    /// rewritten commits before it, so it reflects position rather than the
    /// old label. Across the whole history super-steps may change number, so
    /// they are replayed through `super-pick`, which renames their manual
    /// files to match.
    pub fn renumber(&mut self, scope: SortScope, helpers: &HelperCommands) {
        let mut out = Vec::with_capacity(self.instructions.len() * 2);
        let mut closed = false;

        for instruction in self.instructions.drain(..) {
            let Some(step) = instruction.step().filter(|_| !closed) else {
                out.push(instruction);
                continue;
            };

            match instruction {
                Instruction::Commit { hash, .. }
                    if scope == SortScope::All && step.number.is_super() =>
                {
                    out.push(Instruction::Exec(helpers.super_pick(&hash)));
                }
                instruction => out.push(instruction),
            }
            out.push(Instruction::Exec(helpers.reword(None, false)));

            if scope != SortScope::All && step.number.is_super() {
                closed = true;
            }
        }

        out.push(Instruction::Exec(helpers.finalize()));
        self.instructions = out;
    }

    /// Reword the first commit of the list, keeping its step number.
    pub fn reword_first(&mut self, message: Option<&str>, helpers: &HelperCommands) {
        if let Some(index) = self.instructions.iter().position(|i| i.is_commit()) {
            self.instructions
                .insert(index + 1, Instruction::Exec(helpers.reword(message, true)));
        }
        self.instructions.push(Instruction::Exec(helpers.finalize()));
    }

    /// Split off the instruction about to run, returning it and the remaining work.
    pub fn split_first(&self) -> Option<(&Instruction, TodoList)> {
        let index = self
            .instructions
            .iter()
            .position(|i| !matches!(i, Instruction::Other(_)))?;
        let remaining = TodoList {
            instructions: self.instructions[index + 1..].to_vec(),
        };
        Some((&self.instructions[index], remaining))
    }
}
