// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout and environment loading.
//!
//! Every operation of nfops runs against one immutable [`Settings`] value.
//! Settings are built exactly once at startup from two layers:
//!
//! 1. An optional `nfops.toml` file at the project root.
//! 2. Process environment variables, which always win over the file.
//!
//! The project root itself comes from `NF_DIR`, falling back to the current
//! working directory. After loading, [`Settings::enter`] changes into the
//! project root so that relative paths handed to external tools resolve the
//! same way no matter where nfops was invoked from. Nothing else in the crate
//! reads the process environment.
//!
//! # File Layout
//!
//! ```toml
//! environment = "development"
//! app_name = "NeuroDesktop"
//!
//! [desktop]
//! port = 8080
//! build_dir = "build"
//!
//! [runtime]
//! version = "0.94.0"
//! url = "https://dl.nwjs.io"
//!
//! [base]
//! name = "neurobase"
//! uri = "bolt://localhost:7687"
//!
//! [sync.local]
//! neuro = "~/src/neuro"
//! ```

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::read_to_string,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};
use tracing::{debug, info, instrument};

use crate::path::Layout;

/// Name of the optional configuration file at the project root.
pub const CONFIG_FILE: &str = "nfops.toml";

/// Fully resolved configuration for one invocation.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Absolute path to the project root.
    #[serde(skip)]
    pub root: PathBuf,

    /// Environment of this invocation, reported on startup.
    pub environment: Environment,

    /// Display name written into the desktop bundle manifest.
    pub app_name: String,

    pub desktop: DesktopSettings,
    pub runtime: RuntimeSettings,
    pub base: BaseSettings,
    pub sync: SyncSettings,
    pub suite: SuiteSettings,
}

impl Settings {
    /// Load settings from the process environment.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError`] if the project root is invalid, the
    ///   configuration file is malformed, or an environment variable holds a
    ///   value of the wrong shape.
    pub fn load() -> Result<Self> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Load settings using `lookup` in place of the process environment.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError`] if the project root is invalid, the
    ///   configuration file is malformed, or a variable holds a value of the
    ///   wrong shape.
    #[instrument(skip(lookup), level = "debug")]
    pub fn load_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let root = match lookup("NF_DIR") {
            Some(dir) => expand_path(&dir)?,
            None => std::env::current_dir().map_err(|err| ConfigError::InvalidRoot {
                source: err,
                root: PathBuf::from("."),
            })?,
        };
        let root = root
            .canonicalize()
            .map_err(|err| ConfigError::InvalidRoot {
                source: err,
                root: root.clone(),
            })?;

        let config_path = root.join(CONFIG_FILE);
        let mut settings: Settings = if config_path.is_file() {
            debug!("read configuration file {:?}", config_path.display());
            read_to_string(&config_path)
                .map_err(|err| ConfigError::ReadFile {
                    source: err,
                    path: config_path.clone(),
                })?
                .parse()?
        } else {
            Settings::default()
        };

        settings.root = root;
        settings.apply_env(lookup)?;

        Ok(settings)
    }

    /// Change the current working directory to the project root.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::InvalidRoot`] if the directory cannot be
    ///   entered.
    pub fn enter(&self) -> Result<()> {
        info!(
            "environment [{}] {}",
            self.environment,
            self.root.display()
        );
        std::env::set_current_dir(&self.root).map_err(|err| ConfigError::InvalidRoot {
            source: err,
            root: self.root.clone(),
        })
    }

    /// Project directory layout relative to the root.
    pub fn layout(&self) -> Layout {
        Layout::new(&self.root)
    }

    /// Build directory to use when the caller gives none.
    pub fn default_build_dir(&self) -> PathBuf {
        self.root.join(&self.desktop.build_dir)
    }

    /// Resolve a caller supplied build directory against the process cwd.
    pub fn build_dir(&self, explicit: Option<&Path>) -> PathBuf {
        match explicit {
            Some(path) => std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf()),
            None => self.default_build_dir(),
        }
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(value) = lookup("ENVIRONMENT") {
            self.environment = value.parse()?;
        }
        if let Some(value) = lookup("APP_NAME") {
            self.app_name = value;
        }
        if let Some(value) = lookup("ND_PORT") {
            self.desktop.port = parse_var("ND_PORT", &value)?;
        }
        if let Some(value) = lookup("NWJS_VERSION") {
            self.runtime.version = value;
        }
        if let Some(value) = lookup("NWJS_URL") {
            self.runtime.url = value;
        }
        if let Some(value) = lookup("BASE_NAME") {
            self.base.name = value;
        }
        if let Some(value) = lookup("NEO4J_URI") {
            self.base.uri = value;
        }
        if let Some(value) = lookup("NEO4J_USER") {
            self.base.user = value;
        }
        if let Some(value) = lookup("NEO4J_PASSWORD") {
            self.base.password = value;
        }
        if let Some(value) = lookup("NEO4J_PORT_BOLT") {
            self.base.bolt_port = parse_var("NEO4J_PORT_BOLT", &value)?;
        }
        for (key, component) in [("NEURO_DIR", "neuro"), ("DESKTOP_DIR", "desktop")] {
            if let Some(value) = lookup(key) {
                self.sync.local.insert(component.into(), expand_path(&value)?);
            }
        }

        Ok(())
    }
}

impl FromStr for Settings {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut settings: Settings = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on every path field.
        settings.desktop.build_dir = expand_path(&settings.desktop.build_dir.to_string_lossy())?;
        for path in settings.sync.local.values_mut() {
            *path = expand_path(&path.to_string_lossy())?;
        }

        Ok(settings)
    }
}

impl Display for Settings {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Environment name of the current invocation.
#[derive(Default, Debug, PartialEq, Eq, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Testing,
    Production,
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "testing" | "test" => Ok(Self::Testing),
            "production" | "prod" => Ok(Self::Production),
            _ => Err(ConfigError::UnknownEnvironment(value.into())),
        }
    }
}

impl Display for Environment {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            Self::Development => "DEVELOPMENT",
            Self::Testing => "TESTING",
            Self::Production => "PRODUCTION",
        };
        fmt.write_str(name)
    }
}

/// Desktop bundle settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DesktopSettings {
    /// Port the embedded wiki server of the running app listens on.
    pub port: u16,

    /// Default build directory, relative to the project root.
    pub build_dir: PathBuf,

    /// Package install command run inside the build directory.
    pub install: Vec<String>,

    /// How long to wait before checking whether a launched app exited.
    pub launch_grace_ms: u64,
}

impl DesktopSettings {
    pub fn launch_grace(&self) -> Duration {
        Duration::from_millis(self.launch_grace_ms)
    }
}

impl Default for DesktopSettings {
    fn default() -> Self {
        Self {
            port: 8080,
            build_dir: PathBuf::from("build"),
            install: vec!["npm".into(), "install".into()],
            launch_grace_ms: 1000,
        }
    }
}

/// Desktop runtime SDK settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RuntimeSettings {
    pub version: String,

    /// Base URL the SDK tarballs are published under.
    pub url: String,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            version: "0.94.0".into(),
            url: "https://dl.nwjs.io".into(),
        }
    }
}

/// Database container settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BaseSettings {
    /// Container name.
    pub name: String,

    /// Connection URI of the database.
    pub uri: String,

    pub user: String,
    pub password: String,

    /// Port the database accepts bolt connections on.
    pub bolt_port: u16,

    /// Overall deadline for readiness polling.
    pub timeout_secs: u64,

    /// Sleep between readiness attempts.
    pub poll_interval_ms: u64,
}

impl BaseSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for BaseSettings {
    fn default() -> Self {
        Self {
            name: "neurobase".into(),
            uri: "bolt://localhost:7687".into(),
            user: "neo4j".into(),
            password: String::new(),
            bolt_port: 7687,
            timeout_secs: 30,
            poll_interval_ms: 500,
        }
    }
}

/// Submodule synchronization settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Developer checkouts mirrored into the project root in local mode.
    pub local: BTreeMap<String, PathBuf>,

    /// Project owned submodules reset to the develop branch.
    pub develop: Vec<String>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            local: BTreeMap::new(),
            develop: [
                "neuro",
                "desktop",
                "tw5-plugins/neuroforest/core",
                "tw5-plugins/neuroforest/front",
                "tw5-plugins/neuroforest/neo4j-syncadaptor",
                "tw5-plugins/neuroforest/basic",
                "tw5-plugins/neuroforest/mobile",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

/// Commands run by the test suite runner, relative to the project root.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SuiteSettings {
    pub app: Vec<String>,
    pub library_install: Vec<String>,
    pub library: Vec<String>,

    /// Run from inside the tw5 tree.
    pub wiki: Vec<String>,
}

impl Default for SuiteSettings {
    fn default() -> Self {
        let words = |words: &[&str]| words.iter().map(|word| word.to_string()).collect();
        Self {
            app: words(&["nenv/bin/pytest", "tests"]),
            library_install: words(&["nenv/bin/pip", "install", "./neuro"]),
            library: words(&["nenv/bin/pytest", "neuro/tests"]),
            wiki: words(&["bin/test.sh"]),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            root: PathBuf::new(),
            environment: Environment::default(),
            app_name: "NeuroDesktop".into(),
            desktop: DesktopSettings::default(),
            runtime: RuntimeSettings::default(),
            base: BaseSettings::default(),
            sync: SyncSettings::default(),
            suite: SuiteSettings::default(),
        }
    }
}

fn expand_path(value: &str) -> Result<PathBuf> {
    Ok(PathBuf::from(
        shellexpand::full(value)
            .map_err(ConfigError::ShellExpansion)?
            .into_owned(),
    ))
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| ConfigError::InvalidVar {
        key: key.into(),
        value: value.into(),
    })
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Project root does not exist or cannot be entered.
    #[error("invalid project directory {:?}", root.display())]
    InvalidRoot {
        #[source]
        source: std::io::Error,
        root: PathBuf,
    },

    /// Configuration file exists but cannot be read.
    #[error("failed to read configuration file {:?}", path.display())]
    ReadFile {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Environment variable holds a value of the wrong shape.
    #[error("invalid value {value:?} for {key}")]
    InvalidVar { key: String, value: String },

    #[error("unknown environment {0:?}")]
    UnknownEnvironment(String),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[sealed_test(env = [("SRC", "/home/blah/src")])]
    fn deserialize_settings() -> anyhow::Result<()> {
        let result: Settings = r#"
            environment = "testing"
            app_name = "Forest"

            [desktop]
            port = 9090
            build_dir = "$SRC/build"

            [runtime]
            version = "0.90.0"

            [sync.local]
            neuro = "$SRC/neuro"
        "#
        .parse()?;

        let mut expect = Settings {
            environment: Environment::Testing,
            app_name: "Forest".into(),
            ..Settings::default()
        };
        expect.desktop.port = 9090;
        expect.desktop.build_dir = PathBuf::from("/home/blah/src/build");
        expect.runtime.version = "0.90.0".into();
        expect
            .sync
            .local
            .insert("neuro".into(), PathBuf::from("/home/blah/src/neuro"));

        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn serialize_settings_round_trips_sections() -> anyhow::Result<()> {
        let mut settings = Settings::default();
        settings.base.name = "testbase".into();
        let output = settings.to_string();

        assert!(output.contains(indoc! {r#"
            [base]
            name = "testbase"
        "#}));
        assert_eq!(output.parse::<Settings>()?.base.name, "testbase");

        Ok(())
    }

    #[sealed_test]
    fn load_defaults_to_cwd_without_config_file() -> anyhow::Result<()> {
        let settings = Settings::load_with(lookup_from(&[]))?;

        assert_eq!(settings.root, std::env::current_dir()?.canonicalize()?);
        assert_eq!(settings.app_name, "NeuroDesktop");
        assert_eq!(settings.default_build_dir(), settings.root.join("build"));

        Ok(())
    }

    #[sealed_test]
    fn environment_overrides_config_file() -> anyhow::Result<()> {
        std::fs::write(
            CONFIG_FILE,
            indoc! {r#"
                app_name = "FromFile"

                [base]
                name = "filebase"
                bolt_port = 1111
            "#},
        )?;
        let root = std::env::current_dir()?;
        let root = root.to_string_lossy();

        let settings = Settings::load_with(lookup_from(&[
            ("NF_DIR", root.as_ref()),
            ("ENVIRONMENT", "TESTING"),
            ("NEO4J_PORT_BOLT", "7999"),
            ("DESKTOP_DIR", "/opt/desktop"),
        ]))?;

        assert_eq!(settings.app_name, "FromFile");
        assert_eq!(settings.base.name, "filebase");
        assert_eq!(settings.base.bolt_port, 7999);
        assert_eq!(settings.environment, Environment::Testing);
        assert_eq!(
            settings.sync.local.get("desktop"),
            Some(&PathBuf::from("/opt/desktop"))
        );

        Ok(())
    }

    #[test]
    fn invalid_port_is_rejected() {
        let result = Settings::load_with(lookup_from(&[("ND_PORT", "eighty")]));
        assert!(matches!(result, Err(ConfigError::InvalidVar { key, .. }) if key == "ND_PORT"));
    }

    #[test]
    fn missing_root_is_rejected() {
        let result = Settings::load_with(lookup_from(&[("NF_DIR", "/definitely/not/here")]));
        assert!(matches!(result, Err(ConfigError::InvalidRoot { .. })));
    }

    #[sealed_test]
    fn enter_changes_into_root() -> anyhow::Result<()> {
        std::fs::create_dir("project")?;
        let project = std::env::current_dir()?.join("project");
        let settings = Settings::load_with(lookup_from(&[(
            "NF_DIR",
            project.to_string_lossy().as_ref(),
        )]))?;

        settings.enter()?;

        assert_eq!(std::env::current_dir()?, project.canonicalize()?);

        Ok(())
    }

    #[test]
    fn environment_names_parse_case_insensitively() -> anyhow::Result<()> {
        assert_eq!("TESTING".parse::<Environment>()?, Environment::Testing);
        assert_eq!("prod".parse::<Environment>()?, Environment::Production);
        assert!("staging".parse::<Environment>().is_err());
        assert_eq!(Environment::Testing.to_string(), "TESTING");

        Ok(())
    }
}
