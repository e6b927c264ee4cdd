use crate::error::Error;
use anyhow::{Context, Result};
use std::ffi::{OsStr, OsString};
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::debug;

/// The `git` executable, run in one working directory.
///
/// Rewrites go through the real binary: libgit2 has no interactive rebase
/// with `exec` support, and the rewrite must keep working when this process
/// exits at a pause.
#[derive(Debug, Clone)]
pub struct Git {
    cwd: PathBuf,
    envs: Vec<(OsString, OsString)>,
}

impl Git {
    pub fn new<P: Into<PathBuf>>(cwd: P) -> Self {
        Git {
            cwd: cwd.into(),
            envs: Vec::new(),
        }
    }

    /// Set an environment variable for every command run through this handle.
    pub fn env<K: AsRef<OsStr>, V: AsRef<OsStr>>(mut self, key: K, value: V) -> Self {
        self.envs
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    fn command(&self, args: &[OsString]) -> Command {
        debug!(cwd = %self.cwd.display(), "git {}", render_args(args));
        let mut cmd = Command::new("git");
        cmd.current_dir(&self.cwd).args(args);
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }
        cmd
    }

    /// Run and capture stdout, trailing whitespace trimmed.
    pub fn run<I, S>(&self, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.run_with_input(args, None)
    }

    /// Run with `input` piped to stdin.
    pub fn run_with_input<I, S>(&self, args: I, input: Option<&str>) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args = collect_args(args);
        let mut child = self
            .command(&args)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn `git {}`", render_args(&args)))?;

        if let Some(input) = input
            && let Some(mut stdin) = child.stdin.take()
        {
            stdin
                .write_all(input.as_bytes())
                .context("Failed to write to git stdin")?;
        }

        let output = child
            .wait_with_output()
            .with_context(|| format!("Failed to wait for `git {}`", render_args(&args)))?;

        if !output.status.success() {
            return Err(Error::GitCommand {
                command: render_args(&args),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
    }

    /// Run attached to the terminal. Returns whether git succeeded.
    pub fn print<I, S>(&self, args: I) -> Result<bool>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args = collect_args(args);
        let status = self
            .command(&args)
            .status()
            .with_context(|| format!("Failed to spawn `git {}`", render_args(&args)))?;
        Ok(status.success())
    }

    /// Like [`Git::print`] but a failing command is an error.
    pub fn print_checked<I, S>(&self, args: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args = collect_args(args);
        if self.print(&args)? {
            Ok(())
        } else {
            Err(Error::GitCommand {
                command: render_args(&args),
                status: "non-zero exit".to_string(),
                stderr: String::new(),
            }
            .into())
        }
    }

    /// Paths with unstaged modifications (unmerged paths are listed once per side).
    pub fn modified_files(&self) -> Result<Vec<String>> {
        Ok(split_lines(&self.run(["diff", "--name-only"])?))
    }

    pub fn staged_files(&self) -> Result<Vec<String>> {
        Ok(split_lines(&self.run(["diff", "--name-only", "--cached"])?))
    }
}

fn collect_args<I, S>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    args.into_iter().map(|a| a.as_ref().to_os_string()).collect()
}

fn render_args(args: &[OsString]) -> String {
    args.iter()
        .map(|a| a.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

fn split_lines(s: &str) -> Vec<String> {
    s.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}
