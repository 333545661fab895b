// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Bundle unit manifests.
//!
//! Every bundle unit carries one JSON manifest that describes it. Editions
//! use `tiddlywiki.info`, plugins and themes use `plugin.info`. A manifest is
//! only accepted when it parses as a JSON object holding every required key
//! for its kind. Validation never aborts a run: callers log the
//! [`ValidationError`] and move on to the next unit.

use serde_json::{Map, Value};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::read_to_string,
    path::{Path, PathBuf},
};

/// Manifest file name of edition bundle units.
pub const EDITION_MANIFEST: &str = "tiddlywiki.info";

/// Manifest file name of plugin and theme bundle units.
pub const PLUGIN_MANIFEST: &str = "plugin.info";

/// Keys every edition manifest must carry.
pub const EDITION_FIELDS: &[&str] = &["description", "plugins", "themes", "build"];

/// Keys every plugin or theme manifest must carry.
pub const PLUGIN_FIELDS: &[&str] = &["title", "description"];

/// Parsed manifest of a bundle unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest(Map<String, Value>);

impl Manifest {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// String value of a key, if present and a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Namespaced title, e.g., `$:/plugins/acme/widget`.
    pub fn title(&self) -> Option<&str> {
        self.get_str("title")
    }

    /// Kind of plugin declared by the manifest.
    ///
    /// Absent or unrecognized values fall back to [`PluginType::Plugin`].
    pub fn plugin_type(&self) -> PluginType {
        match self.get_str("plugin-type") {
            Some("theme") => PluginType::Theme,
            _ => PluginType::Plugin,
        }
    }
}

/// Kind of a plugin bundle unit.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum PluginType {
    #[default]
    Plugin,
    Theme,
}

impl PluginType {
    /// Title namespace prefix for this kind.
    pub fn namespace(&self) -> &'static str {
        match self {
            Self::Plugin => "$:/plugins/",
            Self::Theme => "$:/themes/",
        }
    }

    /// Subdirectory of the wiki engine tree this kind is bundled into.
    pub fn subtree(&self) -> &'static str {
        match self {
            Self::Plugin => "plugins",
            Self::Theme => "themes",
        }
    }
}

impl Display for PluginType {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Plugin => fmt.write_str("plugin"),
            Self::Theme => fmt.write_str("theme"),
        }
    }
}

/// Validate manifest file at target path.
///
/// Reads the file, parses it as JSON, and checks that every key listed in
/// `required` is present.
///
/// # Errors
///
/// - Return [`ValidationError::Read`] if the file cannot be read.
/// - Return [`ValidationError::Parse`] if the file is not valid JSON.
/// - Return [`ValidationError::NotAnObject`] if the top-level value is not
///   a JSON object.
/// - Return [`ValidationError::MissingFields`] listing every required key
///   that is absent.
pub fn validate(path: impl AsRef<Path>, required: &[&str]) -> Result<Manifest> {
    let path = path.as_ref();
    let content = read_to_string(path).map_err(|err| ValidationError::Read {
        source: err,
        path: path.to_path_buf(),
    })?;

    let map = match serde_json::from_str::<Value>(&content) {
        Ok(Value::Object(map)) => map,
        Ok(_) => return Err(ValidationError::NotAnObject(path.to_path_buf())),
        Err(err) => {
            return Err(ValidationError::Parse {
                source: err,
                path: path.to_path_buf(),
            })
        }
    };

    let missing = required
        .iter()
        .filter(|key| !map.contains_key(**key))
        .map(|key| key.to_string())
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        return Err(ValidationError::MissingFields {
            path: path.to_path_buf(),
            missing,
        });
    }

    Ok(Manifest(map))
}

/// Manifest validation error types.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("cannot read {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    #[error("invalid JSON in {:?}: {source}", path.display())]
    Parse {
        #[source]
        source: serde_json::Error,
        path: PathBuf,
    },

    #[error("{:?} is not a JSON object", .0.display())]
    NotAnObject(PathBuf),

    #[error("{:?} is missing fields {missing:?}", path.display())]
    MissingFields { path: PathBuf, missing: Vec<String> },
}

/// Friendly result alias :3
pub type Result<T, E = ValidationError> = std::result::Result<T, E>;
