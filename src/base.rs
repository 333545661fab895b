// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Graph database container lifecycle.
//!
//! The desktop app stores its graph in a Neo4j database that runs inside a
//! container, the __neurobase__. The container moves through these states:
//!
//! ```text
//! absent --create--> running --stop--> stopped --start--> running
//! ```
//!
//! A running container is not the same as a usable database. Readiness is
//! only reached once the bolt port accepts connections, the server agrees on
//! a bolt protocol version, and it accepts the configured credentials. These
//! checks are polled with a bounded [`Retry`].
//!
//! Container handling goes through the [`ContainerRuntime`] trait, with
//! [`DockerCli`] driving the docker command line.

pub mod bolt;

pub use bolt::{bolt_handshake, BoltAuth, BoltEndpoint, BoltVersion, HandshakeError};

use crate::{
    config::Settings,
    readiness::{Retry, TimedOut},
    syscall::{Step, Syscall, SyscallError},
};

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    io,
    path::{Path, PathBuf},
};
use tokio::net::TcpStream;
use tracing::{info, instrument, warn};

/// Lines of container log attached to readiness failures.
const LOG_TAIL: usize = 20;

/// Observed state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Absent,
    Stopped,
    Running,
}

impl Display for ContainerState {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Absent => fmt.write_str("absent"),
            Self::Stopped => fmt.write_str("stopped"),
            Self::Running => fmt.write_str("running"),
        }
    }
}

/// Container engine operations.
pub trait ContainerRuntime {
    fn state(&self, name: &str) -> Result<ContainerState>;

    /// Create and start every service of the compose project in target
    /// directory.
    fn create(&self, project_dir: &Path) -> Result<()>;

    fn start(&self, name: &str) -> Result<()>;

    fn stop(&self, name: &str) -> Result<()>;

    /// Last lines of container output.
    fn logs(&self, name: &str, lines: usize) -> Result<String>;
}

/// Container runtime backed by the docker command line.
#[derive(Debug, Default, Clone, Copy)]
pub struct DockerCli;

impl ContainerRuntime for DockerCli {
    fn state(&self, name: &str) -> Result<ContainerState> {
        let result = Syscall::new("docker")
            .args(["inspect", "-f", "{{.State.Running}}", name])
            .output();
        inspect_state(result)
    }

    fn create(&self, project_dir: &Path) -> Result<()> {
        Syscall::new("docker")
            .args(["compose", "up", "-d"])
            .current_dir(project_dir)
            .output()?;
        Ok(())
    }

    fn start(&self, name: &str) -> Result<()> {
        Syscall::new("docker").args(["start", name]).output()?;
        Ok(())
    }

    fn stop(&self, name: &str) -> Result<()> {
        Syscall::new("docker").args(["stop", name]).output()?;
        Ok(())
    }

    fn logs(&self, name: &str, lines: usize) -> Result<String> {
        let tail = lines.to_string();
        Ok(Syscall::new("docker")
            .args(["logs", "--tail", tail.as_str(), name])
            .output()?)
    }
}

/// Interpret output of `docker inspect -f {{.State.Running}}`.
///
/// Only a missing container counts as absent. Any other failure, like an
/// unreachable daemon, is an error.
fn inspect_state(result: Result<String, SyscallError>) -> Result<ContainerState> {
    match result {
        Ok(running) if running.trim() == "true" => Ok(ContainerState::Running),
        Ok(_) => Ok(ContainerState::Stopped),
        Err(SyscallError::Failed { ref output, .. })
            if output.contains("No such object") || output.contains("No such container") =>
        {
            Ok(ContainerState::Absent)
        }
        Err(err) => Err(err.into()),
    }
}

async fn tcp_connect(host: &str, port: u16) -> io::Result<()> {
    TcpStream::connect((host, port)).await.map(|_| ())
}

/// Lifecycle manager of one database container.
#[derive(Debug, Clone)]
pub struct ContainerManager<R: ContainerRuntime> {
    runtime: R,
    name: String,
    project_dir: PathBuf,
    bolt_port: u16,
    endpoint: BoltEndpoint,
    auth: BoltAuth,
    retry: Retry,
}

impl<R: ContainerRuntime> ContainerManager<R> {
    /// Construct manager from project settings.
    ///
    /// # Errors
    ///
    /// - Return [`BaseError::InvalidUri`] if the configured URI is invalid.
    pub fn from_settings(settings: &Settings, runtime: R, name: Option<&str>) -> Result<Self> {
        let base = &settings.base;
        Ok(Self {
            runtime,
            name: name.unwrap_or(&base.name).to_string(),
            project_dir: settings.root.clone(),
            bolt_port: base.bolt_port,
            endpoint: BoltEndpoint::from_uri(&base.uri, base.bolt_port)?,
            auth: BoltAuth::new(&base.user, &base.password),
            retry: Retry::new(base.poll_interval(), base.timeout()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current container state.
    ///
    /// # Errors
    ///
    /// - Return [`BaseError::Syscall`] if the runtime cannot be queried.
    pub fn state(&self) -> Result<ContainerState> {
        self.runtime.state(&self.name)
    }

    /// Create container unless it already exists.
    ///
    /// # Errors
    ///
    /// - Return [`BaseError::Syscall`] if the runtime fails.
    #[instrument(skip(self), level = "debug")]
    pub fn create(&self) -> Result<()> {
        if self.state()? != ContainerState::Absent {
            info!("neurobase instance {} already exists", self.name);
            return Ok(());
        }

        let step = Step::start(format!("create neurobase instance {}", self.name));
        self.runtime.create(&self.project_dir)?;
        step.finish();

        Ok(())
    }

    /// Bring container to a ready database, whatever state it is in.
    ///
    /// # Errors
    ///
    /// - Return [`BaseError::Syscall`] if the runtime fails.
    /// - Return [`BaseError::NotReady`] if the database does not become
    ///   reachable in time.
    #[instrument(skip(self), level = "debug")]
    pub async fn ensure_running(&self) -> Result<BoltVersion> {
        self.create()?;

        if self.state()? != ContainerState::Running {
            let step = Step::start(format!("start neurobase instance {}", self.name));
            self.runtime.start(&self.name)?;
            step.finish();
        }

        let version = self.wait_ready().await?;
        info!(
            "✓ neurobase instance {} is running (bolt {version} at {})",
            self.name, self.endpoint
        );

        Ok(version)
    }

    /// Poll the bolt port, then the authenticated bolt handshake, until both
    /// succeed.
    ///
    /// # Errors
    ///
    /// - Return [`BaseError::NotReady`] if the deadline passes first.
    pub async fn wait_ready(&self) -> Result<BoltVersion> {
        let step = Step::start(format!("wait for bolt on port {}", self.bolt_port));

        let port = self
            .retry
            .poll("bolt port", || tcp_connect("127.0.0.1", self.bolt_port))
            .await;
        if let Err(err) = port {
            return Err(self.not_ready(err));
        }

        let version = self
            .retry
            .poll("bolt handshake", || bolt_handshake(&self.endpoint, &self.auth))
            .await
            .map_err(|err| self.not_ready(err))?;

        step.finish();
        Ok(version)
    }

    /// Single bounded authenticated handshake against the database.
    ///
    /// # Errors
    ///
    /// - Return [`BaseError::Unauthorized`] if the database refuses the
    ///   configured credentials.
    /// - Return [`BaseError::Unreachable`] if the handshake fails otherwise or
    ///   does not finish within the configured timeout.
    pub async fn verify(&self) -> Result<BoltVersion> {
        let unreachable = |reason: String| BaseError::Unreachable {
            endpoint: self.endpoint.to_string(),
            reason,
        };

        let handshake = bolt_handshake(&self.endpoint, &self.auth);
        match tokio::time::timeout(self.retry.timeout, handshake).await {
            Ok(Ok(version)) => {
                info!("✓ neo4j connected ({}, bolt {version})", self.endpoint);
                Ok(version)
            }
            Ok(Err(err)) if err.is_unauthorized() => Err(BaseError::Unauthorized {
                endpoint: self.endpoint.to_string(),
                user: self.auth.user.clone(),
                source: err,
            }),
            Ok(Err(err)) => Err(unreachable(err.to_string())),
            Err(_) => Err(unreachable("handshake timed out".into())),
        }
    }

    /// Stop container if it runs.
    ///
    /// Returns whether anything was stopped.
    ///
    /// # Errors
    ///
    /// - Return [`BaseError::Syscall`] if the runtime fails.
    #[instrument(skip(self), level = "debug")]
    pub fn stop(&self) -> Result<bool> {
        if self.state()? != ContainerState::Running {
            info!("✓ already stopped: {}", self.name);
            return Ok(false);
        }

        let step = Step::start(format!("stop neurobase instance {}", self.name));
        self.runtime.stop(&self.name)?;
        step.finish();

        Ok(true)
    }

    fn not_ready(&self, source: TimedOut) -> BaseError {
        let logs = match self.runtime.logs(&self.name, LOG_TAIL) {
            Ok(logs) => logs,
            Err(err) => {
                warn!("cannot read logs of {}: {err}", self.name);
                String::new()
            }
        };

        BaseError::NotReady {
            name: self.name.clone(),
            source,
            logs,
        }
    }
}

/// Database container error types.
#[derive(Debug, thiserror::Error)]
pub enum BaseError {
    #[error(transparent)]
    Syscall(#[from] SyscallError),

    #[error("invalid database URI {uri:?}: {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("neurobase instance {name} not ready\n{logs}")]
    NotReady {
        name: String,
        #[source]
        source: TimedOut,
        logs: String,
    },

    #[error("neo4j inaccessible at {endpoint}: {reason}")]
    Unreachable { endpoint: String, reason: String },

    #[error("neo4j at {endpoint} refused credentials of user {user:?}, check NEO4J_USER and NEO4J_PASSWORD")]
    Unauthorized {
        endpoint: String,
        user: String,
        #[source]
        source: HandshakeError,
    },
}

/// Friendly result alias :3
pub type Result<T, E = BaseError> = std::result::Result<T, E>;
