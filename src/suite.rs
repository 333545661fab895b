// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Test suite runner.
//!
//! Each [`SuiteComponent`] maps to one external test command. Components run
//! in the order given, and a failing component never stops the ones after it.
//! Child processes see `ENVIRONMENT=TESTING`, while nfops itself keeps its own
//! environment untouched.

use crate::{
    bundle::{assemble_wiki_tree, BundleError},
    config::{Environment, Settings},
    mirror::{mirror, MirrorError},
    syscall::{Step, Syscall, SyscallError},
};

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::Path,
    str::FromStr,
};
use tracing::{error, info, instrument};

/// Independently testable piece of the project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SuiteComponent {
    /// Application test suite at the project root.
    App,

    /// Python library under `neuro/`.
    Library,

    /// Wiki engine tree with bundled editions and plugins.
    Wiki,
}

impl SuiteComponent {
    /// Default selection, in run order.
    pub const ALL: [Self; 3] = [Self::App, Self::Library, Self::Wiki];
}

impl FromStr for SuiteComponent {
    type Err = SuiteError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "app" => Ok(Self::App),
            "library" | "neuro" => Ok(Self::Library),
            "wiki" | "tw5" => Ok(Self::Wiki),
            _ => Err(SuiteError::UnknownComponent(value.into())),
        }
    }
}

impl Display for SuiteComponent {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::App => fmt.write_str("app"),
            Self::Library => fmt.write_str("library"),
            Self::Wiki => fmt.write_str("wiki"),
        }
    }
}

/// Result of one component run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteOutcome {
    pub component: SuiteComponent,

    /// Rendered failure, if any.
    pub error: Option<String>,
}

/// Runs test suites of selected components.
#[derive(Debug, Clone)]
pub struct SuiteRunner<'a> {
    settings: &'a Settings,
    extra_args: Vec<String>,
}

impl<'a> SuiteRunner<'a> {
    /// Construct new runner.
    ///
    /// Extra arguments are appended to the app test command only.
    pub fn new(
        settings: &'a Settings,
        extra_args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            settings,
            extra_args: extra_args.into_iter().map(Into::into).collect(),
        }
    }

    /// Run every selected component and log a summary.
    ///
    /// An empty selection runs [`SuiteComponent::ALL`].
    ///
    /// # Errors
    ///
    /// - Return [`SuiteError::Failed`] naming every component that failed.
    #[instrument(skip(self), level = "debug")]
    pub fn run(&self, components: &[SuiteComponent]) -> Result<Vec<SuiteOutcome>> {
        let all = SuiteComponent::ALL;
        let components = if components.is_empty() {
            &all[..]
        } else {
            components
        };

        let mut outcomes = Vec::with_capacity(components.len());
        for component in components {
            let error = self
                .run_component(*component)
                .err()
                .map(|err| err.to_string());
            outcomes.push(SuiteOutcome {
                component: *component,
                error,
            });
        }

        info!("test summary");
        for outcome in &outcomes {
            match &outcome.error {
                None => info!("  ✓ {}", outcome.component),
                Some(err) => error!("  ✗ {}: {err}", outcome.component),
            }
        }

        let failed = outcomes
            .iter()
            .filter(|outcome| outcome.error.is_some())
            .map(|outcome| outcome.component.to_string())
            .collect::<Vec<_>>();
        if !failed.is_empty() {
            return Err(SuiteError::Failed(failed));
        }

        Ok(outcomes)
    }

    fn run_component(&self, component: SuiteComponent) -> Result<()> {
        let suite = &self.settings.suite;
        let layout = self.settings.layout();
        let root = layout.root();

        match component {
            SuiteComponent::App => {
                self.command(&suite.app, root)?
                    .args(&self.extra_args)
                    .run()?;
            }
            SuiteComponent::Library => {
                if let Some(checkout) = self.settings.sync.local.get("neuro") {
                    Step::wrap(format!("mirror {}", checkout.display()), || {
                        mirror(checkout, layout.component("neuro"))
                    })?;
                }
                Step::wrap("install library", || {
                    self.command(&suite.library_install, root)?.output()
                })?;
                self.command(&suite.library, root)?.run()?;
            }
            SuiteComponent::Wiki => {
                let tw5 = layout.tw5();
                assemble_wiki_tree(layout.editions_source(), layout.plugins_source(), &tw5)?;
                self.command(&suite.wiki, &tw5)?.run()?;
            }
        }

        Ok(())
    }

    /// Build test command running inside `cwd`.
    ///
    /// Relative program paths like `bin/test.sh` resolve against `cwd`.
    fn command(&self, words: &[String], cwd: &Path) -> Result<Syscall, SyscallError> {
        let mut words = words.iter();
        let program = words.next().ok_or(SyscallError::EmptyCommand)?;
        let program = if program.contains('/') && Path::new(program).is_relative() {
            cwd.join(program).into_os_string()
        } else {
            program.into()
        };

        Ok(Syscall::new(program)
            .args(words)
            .current_dir(cwd)
            .env("ENVIRONMENT", Environment::Testing.to_string()))
    }
}

/// Test suite error types.
#[derive(Debug, thiserror::Error)]
pub enum SuiteError {
    #[error("unknown test component {0:?}, expected app, library, or wiki")]
    UnknownComponent(String),

    #[error(transparent)]
    Syscall(#[from] SyscallError),

    #[error(transparent)]
    Mirror(#[from] MirrorError),

    #[error(transparent)]
    Bundle(#[from] BundleError),

    #[error("test suites failed: {}", .0.join(", "))]
    Failed(Vec<String>),
}

/// Friendly result alias :3
pub type Result<T, E = SuiteError> = std::result::Result<T, E>;
