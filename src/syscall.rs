// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! External command invocation.
//!
//! Every external tool nfops drives (docker, npm, pytest, and friends) goes
//! through [`Syscall`]. Failures always carry the full command line along
//! with whatever the command printed, so the operator can tell what broke
//! without rerunning anything by hand.
//!
//! Long running work is wrapped in a [`Step`]. A step shows a spinner while
//! it runs, and reports success or failure exactly once on every exit path.
//! Dropping an unfinished step counts as failure.

use indicatif::{ProgressBar, ProgressStyle};
use std::{
    ffi::{OsStr, OsString},
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    process::{Command, ExitStatus, Stdio},
    time::Duration,
};
use tracing::{debug, error, info};

/// One external command waiting to run.
#[derive(Debug, Clone)]
pub struct Syscall {
    program: OsString,
    args: Vec<OsString>,
    cwd: Option<PathBuf>,
    envs: Vec<(OsString, OsString)>,
}

impl Syscall {
    /// Construct new external command.
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
            cwd: None,
            envs: Vec::new(),
        }
    }

    /// Construct command from argv style word list.
    ///
    /// # Errors
    ///
    /// - Return [`SyscallError::EmptyCommand`] if the list is empty.
    pub fn from_words(words: impl IntoIterator<Item = impl AsRef<OsStr>>) -> Result<Self> {
        let mut words = words.into_iter();
        let program = words.next().ok_or(SyscallError::EmptyCommand)?;
        Ok(Self::new(program).args(words))
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl AsRef<OsStr>>) -> Self {
        self.args
            .extend(args.into_iter().map(|arg| arg.as_ref().to_os_string()));
        self
    }

    /// Run command inside target directory.
    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Set an environment variable for the child only.
    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.envs
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    /// Run command with captured output.
    ///
    /// Returns stdout and stderr together with trailing newlines chomped.
    ///
    /// # Errors
    ///
    /// - Return [`SyscallError::Spawn`] if the command cannot be started.
    /// - Return [`SyscallError::Failed`] if the command exits non-zero.
    pub fn output(&self) -> Result<String> {
        debug!("run {self}");
        let output = self
            .command()
            .stdin(Stdio::null())
            .output()
            .map_err(|err| SyscallError::Spawn {
                source: err,
                command: self.to_string(),
            })?;
        let stdout = String::from_utf8_lossy(output.stdout.as_slice()).into_owned();
        let stderr = String::from_utf8_lossy(output.stderr.as_slice()).into_owned();
        let mut message = String::new();

        if !stdout.is_empty() {
            message.push_str(stdout.as_str());
        }

        if !stderr.is_empty() {
            message.push_str(stderr.as_str());
        }

        // INVARIANT: Chomp trailing newlines.
        let message = message.trim_end_matches(['\r', '\n']).to_string();

        if !output.status.success() {
            return Err(SyscallError::Failed {
                command: self.to_string(),
                status: output.status,
                output: message,
            });
        }

        Ok(message)
    }

    /// Run command with inherited stdio and report its exit status.
    ///
    /// Does not treat a non-zero exit as an error.
    ///
    /// # Errors
    ///
    /// - Return [`SyscallError::Spawn`] if the command cannot be started.
    pub fn status(&self) -> Result<ExitStatus> {
        debug!("run {self}");
        self.command()
            .status()
            .map_err(|err| SyscallError::Spawn {
                source: err,
                command: self.to_string(),
            })
    }

    /// Run command with inherited stdio, failing on non-zero exit.
    ///
    /// # Errors
    ///
    /// - Return [`SyscallError::Spawn`] if the command cannot be started.
    /// - Return [`SyscallError::Failed`] if the command exits non-zero.
    pub fn run(&self) -> Result<()> {
        let status = self.status()?;
        if !status.success() {
            return Err(SyscallError::Failed {
                command: self.to_string(),
                status,
                output: String::new(),
            });
        }

        Ok(())
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command.envs(self.envs.iter().map(|(key, value)| (key, value)));
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        command
    }
}

impl Display for Syscall {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(fmt, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Scoped progress report around one unit of work.
///
/// Call [`Step::finish`] once the work succeeded. Dropping the step without
/// finishing it reports failure.
#[derive(Debug)]
pub struct Step {
    title: String,
    bar: ProgressBar,
    done: bool,
}

impl Step {
    /// Start new step with a spinner.
    pub fn start(title: impl Into<String>) -> Self {
        let title = title.into();
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.yellow} {msg}") {
            bar.set_style(style);
        }
        bar.set_message(title.clone());
        bar.enable_steady_tick(Duration::from_millis(100));

        Self {
            title,
            bar,
            done: false,
        }
    }

    /// Progress bar backing the step, e.g., to suspend it for prompts.
    pub fn bar(&self) -> &ProgressBar {
        &self.bar
    }

    /// Mark step as succeeded.
    pub fn finish(mut self) {
        self.done = true;
        self.bar.finish_and_clear();
        info!("✓ {}", self.title);
    }

    /// Run fallible work inside a step.
    pub fn wrap<T, E>(title: impl Into<String>, work: impl FnOnce() -> Result<T, E>) -> Result<T, E> {
        let step = Self::start(title);
        let value = work()?;
        step.finish();
        Ok(value)
    }
}

impl Drop for Step {
    fn drop(&mut self) {
        if !self.done {
            self.bar.finish_and_clear();
            error!("✗ {}", self.title);
        }
    }
}

/// External command error types.
#[derive(Debug, thiserror::Error)]
pub enum SyscallError {
    #[error("empty command line")]
    EmptyCommand,

    #[error("failed to start {command:?}")]
    Spawn {
        #[source]
        source: std::io::Error,
        command: String,
    },

    #[error("command {command:?} failed ({status}):\n{output}")]
    Failed {
        command: String,
        status: ExitStatus,
        output: String,
    },
}

/// Friendly result alias :3
pub type Result<T, E = SyscallError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn output_captures_and_chomps() -> anyhow::Result<()> {
        let output = Syscall::new("sh").args(["-c", "echo hello; echo world >&2"]).output()?;
        assert_eq!(output, "hello\nworld");

        Ok(())
    }

    #[test]
    fn failure_carries_command_and_output() {
        let err = Syscall::new("sh")
            .args(["-c", "echo broken >&2; exit 3"])
            .output()
            .unwrap_err();

        match err {
            SyscallError::Failed {
                command, output, ..
            } => {
                assert_eq!(command, "sh -c echo broken >&2; exit 3");
                assert_eq!(output, "broken");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn env_and_cwd_reach_child() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let output = Syscall::from_words(["sh", "-c", "echo $ENVIRONMENT; pwd"])?
            .env("ENVIRONMENT", "TESTING")
            .current_dir(dir.path())
            .output()?;

        let mut lines = output.lines();
        assert_eq!(lines.next(), Some("TESTING"));
        assert_eq!(
            Path::new(lines.next().unwrap_or_default()).canonicalize()?,
            dir.path().canonicalize()?
        );

        Ok(())
    }

    #[test]
    fn status_does_not_fail_on_nonzero_exit() -> anyhow::Result<()> {
        let status = Syscall::new("false").status()?;
        assert!(!status.success());
        assert!(Syscall::new("false").run().is_err());

        Ok(())
    }

    #[test]
    fn empty_word_list_is_rejected() {
        let words: [&str; 0] = [];
        assert!(matches!(
            Syscall::from_words(words),
            Err(SyscallError::EmptyCommand)
        ));
    }
}
