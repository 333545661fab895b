// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Bundle unit discovery.
//!
//! Walk a source tree, and treat every directory that holds a manifest file
//! as one bundle unit. Units nested inside other units are discovered on
//! their own as well.

use crate::manifest::{validate, Manifest};

use ignore::WalkBuilder;
use std::{
    cmp::Ordering,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

/// Bundle unit found by [`discover`].
#[derive(Debug, Clone, PartialEq)]
pub struct Discovered {
    /// Path to the manifest file itself.
    pub manifest_path: PathBuf,

    pub manifest: Manifest,
}

impl Discovered {
    /// Directory of the bundle unit.
    pub fn unit_dir(&self) -> &Path {
        self.manifest_path.parent().unwrap_or(Path::new(""))
    }

    /// Name of the bundle unit directory.
    pub fn unit_name(&self) -> String {
        self.unit_dir()
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Ordering of discovered bundle units.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryOrder {
    /// Order by the manifest `title` field.
    #[default]
    Title,

    /// Order by bundle unit directory name.
    DirName,
}

impl DiscoveryOrder {
    fn compare(&self, lhs: &Discovered, rhs: &Discovered) -> Ordering {
        let primary = match self {
            Self::Title => title_key(&lhs.manifest).cmp(&title_key(&rhs.manifest)),
            Self::DirName => lhs.unit_name().cmp(&rhs.unit_name()),
        };

        // INVARIANT: Break ties on path so output never depends on walk order.
        primary.then_with(|| lhs.manifest_path.cmp(&rhs.manifest_path))
    }
}

/// Find and validate every bundle unit below target root.
///
/// Manifests that fail validation are logged and left out of the result.
/// Hidden and git-ignored directories are walked too.
pub fn discover(
    root: impl AsRef<Path>,
    manifest_name: &str,
    required: &[&str],
    order: DiscoveryOrder,
) -> Vec<Discovered> {
    let mut found = Vec::new();
    let walker = WalkBuilder::new(root.as_ref())
        .standard_filters(false)
        .build();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("skipping unreadable entry: {err}");
                continue;
            }
        };

        let is_file = entry.file_type().is_some_and(|kind| kind.is_file());
        if !is_file || entry.file_name() != manifest_name {
            continue;
        }

        let manifest_path = entry.into_path();
        debug!("found manifest {:?}", manifest_path.display());
        match validate(&manifest_path, required) {
            Ok(manifest) => found.push(Discovered {
                manifest_path,
                manifest,
            }),
            Err(err) => warn!("skipping {}: {err}", unit_label(&manifest_path)),
        }
    }

    found.sort_by(|lhs, rhs| order.compare(lhs, rhs));
    found
}

fn title_key(manifest: &Manifest) -> String {
    match manifest.get("title") {
        Some(serde_json::Value::String(title)) => title.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

pub(crate) fn unit_label(manifest_path: &Path) -> String {
    manifest_path
        .parent()
        .and_then(Path::file_name)
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| manifest_path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{PLUGIN_FIELDS, PLUGIN_MANIFEST};
    use pretty_assertions::assert_eq;
    use std::fs::{create_dir_all, write};

    fn plugin(root: &Path, dir: &str, content: &str) {
        let dir = root.join(dir);
        create_dir_all(&dir).unwrap();
        write(dir.join(PLUGIN_MANIFEST), content).unwrap();
    }

    fn titles(found: &[Discovered]) -> Vec<&str> {
        found
            .iter()
            .map(|unit| unit.manifest.title().unwrap_or_default())
            .collect()
    }

    #[test]
    fn discover_sorts_by_title() {
        let dir = tempfile::tempdir().unwrap();
        plugin(
            dir.path(),
            "nf/zeta-dir",
            r#"{"title":"$:/plugins/nf/alpha","description":"d"}"#,
        );
        plugin(
            dir.path(),
            "nf/alpha-dir",
            r#"{"title":"$:/plugins/nf/beta","description":"d"}"#,
        );

        let found = discover(dir.path(), PLUGIN_MANIFEST, PLUGIN_FIELDS, DiscoveryOrder::Title);

        assert_eq!(titles(&found), vec!["$:/plugins/nf/alpha", "$:/plugins/nf/beta"]);
        assert_eq!(found[0].unit_name(), "zeta-dir");
    }

    #[test]
    fn discover_sorts_by_dir_name() {
        let dir = tempfile::tempdir().unwrap();
        plugin(dir.path(), "b", r#"{"title":"$:/plugins/x/a","description":"d"}"#);
        plugin(dir.path(), "a", r#"{"title":"$:/plugins/x/b","description":"d"}"#);

        let found = discover(dir.path(), PLUGIN_MANIFEST, PLUGIN_FIELDS, DiscoveryOrder::DirName);

        assert_eq!(
            found.iter().map(Discovered::unit_name).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
    }

    #[test]
    fn discover_drops_invalid_manifests() {
        let dir = tempfile::tempdir().unwrap();
        plugin(dir.path(), "broken", "{bad");
        plugin(dir.path(), "partial", r#"{"title":"$:/plugins/x/p"}"#);
        plugin(dir.path(), "good", r#"{"title":"$:/plugins/x/g","description":"d"}"#);

        let found = discover(dir.path(), PLUGIN_MANIFEST, PLUGIN_FIELDS, DiscoveryOrder::Title);

        assert_eq!(titles(&found), vec!["$:/plugins/x/g"]);
    }

    #[test]
    fn discover_finds_nested_and_hidden_units() {
        let dir = tempfile::tempdir().unwrap();
        plugin(dir.path(), "outer", r#"{"title":"$:/plugins/x/outer","description":"d"}"#);
        plugin(
            dir.path(),
            "outer/inner",
            r#"{"title":"$:/plugins/x/inner","description":"d"}"#,
        );
        plugin(
            dir.path(),
            ".hidden/unit",
            r#"{"title":"$:/plugins/x/hidden","description":"d"}"#,
        );

        let found = discover(dir.path(), PLUGIN_MANIFEST, PLUGIN_FIELDS, DiscoveryOrder::Title);

        assert_eq!(
            titles(&found),
            vec!["$:/plugins/x/hidden", "$:/plugins/x/inner", "$:/plugins/x/outer"]
        );
    }

    #[test]
    fn discover_on_missing_root_finds_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let found = discover(
            dir.path().join("missing"),
            PLUGIN_MANIFEST,
            PLUGIN_FIELDS,
            DiscoveryOrder::Title,
        );

        assert!(found.is_empty());
    }
}
