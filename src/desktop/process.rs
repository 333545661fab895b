// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Desktop process lifecycle.
//!
//! The running app is tracked through a PID record inside its build
//! directory. There is no locking around the record, so two concurrent starts
//! leave whichever pid was written last.
//!
//! The app enforces a single instance on its own: a second launch hands off
//! to the first one and exits right away. A launched process that is already
//! gone after a short grace period is therefore taken as "already running".
//! That check is a heuristic. A process that crashes on startup looks the
//! same.

use crate::desktop::{BINARY, PID_FILE};

use nix::{
    errno::Errno,
    sys::signal::{kill, Signal},
    unistd::Pid,
};
use std::{
    fs,
    io,
    os::unix::process::CommandExt,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    time::Duration,
};
use tracing::{debug, info, instrument, warn};

/// Outcome of launching the app.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Launch {
    /// App launched and tracked under this pid.
    Started(u32),

    /// Launched process exited within the grace period.
    AlreadyRunning,
}

/// Outcome of stopping the app.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stop {
    /// No PID record, so nothing to stop.
    NotRunning,

    /// Termination signal delivered.
    Terminated(i32),

    /// Recorded process no longer exists.
    NotFound(i32),
}

/// Desktop app living in one build directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesktopProcess {
    build_dir: PathBuf,
    grace: Duration,
}

impl DesktopProcess {
    /// Construct new process handle for target build directory.
    pub fn new(build_dir: impl Into<PathBuf>, grace: Duration) -> Self {
        Self {
            build_dir: build_dir.into(),
            grace,
        }
    }

    pub fn binary(&self) -> PathBuf {
        self.build_dir.join(BINARY)
    }

    pub fn pid_file(&self) -> PathBuf {
        self.build_dir.join(PID_FILE)
    }

    /// Launch app detached from the terminal.
    ///
    /// The child gets its own process group, null stdio, and the build
    /// directory as working directory.
    ///
    /// # Errors
    ///
    /// - Return [`ProcessError::MissingBinary`] if the build holds no runtime
    ///   binary.
    /// - Return [`ProcessError::Spawn`] if the binary cannot be launched.
    /// - Return [`ProcessError::PidFile`] if the PID record cannot be written.
    #[instrument(skip(self), level = "debug")]
    pub async fn start(&self) -> Result<Launch> {
        let binary = self.binary();
        if !binary.is_file() {
            return Err(ProcessError::MissingBinary(binary));
        }

        let mut child = Command::new(&binary)
            .current_dir(&self.build_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0)
            .spawn()
            .map_err(|err| ProcessError::Spawn {
                source: err,
                binary: binary.clone(),
            })?;

        tokio::time::sleep(self.grace).await;
        let exited = child.try_wait().map_err(|err| ProcessError::Spawn {
            source: err,
            binary: binary.clone(),
        })?;
        if let Some(status) = exited {
            debug!("launched process exited early with {status}");
            info!("desktop app already running");
            return Ok(Launch::AlreadyRunning);
        }

        let pid = child.id();
        let pid_file = self.pid_file();
        fs::write(&pid_file, pid.to_string()).map_err(|err| ProcessError::PidFile {
            source: err,
            path: pid_file,
        })?;
        info!("✓ desktop app running (pid {pid})");

        Ok(Launch::Started(pid))
    }

    /// Terminate the recorded app.
    ///
    /// The PID record is removed on every path, including a record that does
    /// not parse.
    ///
    /// # Errors
    ///
    /// - Return [`ProcessError::PidFile`] if the record cannot be read.
    /// - Return [`ProcessError::InvalidPid`] if the record holds no usable
    ///   pid.
    /// - Return [`ProcessError::Signal`] if signal delivery fails for any
    ///   reason other than a missing process.
    #[instrument(skip(self), level = "debug")]
    pub fn stop(&self) -> Result<Stop> {
        let pid_file = self.pid_file();
        if !pid_file.is_file() {
            info!("no PID record, desktop app is not running");
            return Ok(Stop::NotRunning);
        }

        let _guard = PidFileGuard::new(&pid_file);
        let content = fs::read_to_string(&pid_file).map_err(|err| ProcessError::PidFile {
            source: err,
            path: pid_file.clone(),
        })?;

        // INVARIANT: Never signal pid 0 or a negative pid, those address groups.
        let pid = match content.trim().parse::<i32>() {
            Ok(pid) if pid > 0 => pid,
            _ => return Err(ProcessError::InvalidPid { content, path: pid_file }),
        };

        match kill(Pid::from_raw(pid), Signal::SIGTERM) {
            Ok(()) => {
                info!("✓ closed desktop app (pid {pid})");
                Ok(Stop::Terminated(pid))
            }
            Err(Errno::ESRCH) => {
                info!("process {pid} not found, already closed");
                Ok(Stop::NotFound(pid))
            }
            Err(errno) => Err(ProcessError::Signal { source: errno, pid }),
        }
    }
}

/// Removes the PID record when dropped.
#[derive(Debug)]
struct PidFileGuard {
    path: PathBuf,
}

impl PidFileGuard {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("removed {:?}", self.path.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!("failed to remove {:?}: {err}", self.path.display()),
        }
    }
}

/// Desktop process error types.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("no runtime binary at {:?}, build the desktop app first", .0.display())]
    MissingBinary(PathBuf),

    #[error("failed to launch {:?}", binary.display())]
    Spawn {
        #[source]
        source: io::Error,
        binary: PathBuf,
    },

    #[error("failed to access PID record {:?}", path.display())]
    PidFile {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    #[error("PID record {:?} holds invalid pid {content:?}", path.display())]
    InvalidPid { content: String, path: PathBuf },

    #[error("failed to signal process {pid}")]
    Signal {
        #[source]
        source: Errno,
        pid: i32,
    },
}

/// Friendly result alias :3
pub type Result<T, E = ProcessError> = std::result::Result<T, E>;
