// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Wiki engine tree assembly.
//!
//! The wiki engine tree is populated from two kinds of __bundle units__ kept
//! in separate source trees:
//!
//! - Editions live one level below the editions source, each holding a
//!   `tiddlywiki.info` manifest. They land at `editions/<dir name>`.
//! - Plugins and themes live anywhere below the plugins source, each holding
//!   a `plugin.info` manifest. They land at `plugins/<rest>` or
//!   `themes/<rest>`, where `<rest>` is the manifest title stripped of its
//!   `$:/plugins/` or `$:/themes/` namespace.
//!
//! Each valid unit is copied wholesale with copy-replace semantics, so running
//! the assembler twice over unchanged sources leaves an identical tree.
//! Invalid units are skipped with a diagnostic, and a missing source tree
//! only skips its own pass.
//!
//! # See Also
//!
//! 1. [`manifest`](crate::manifest)
//! 2. [`mirror::copy_replace`](crate::mirror::copy_replace)

pub mod discover;

use crate::{
    bundle::discover::{discover, unit_label, Discovered, DiscoveryOrder},
    manifest::{
        validate, PluginType, EDITION_FIELDS, EDITION_MANIFEST, PLUGIN_FIELDS, PLUGIN_MANIFEST,
    },
    mirror::{copy_replace, MirrorError},
    syscall::Step,
};

use std::{
    fs::read_dir,
    path::{Component, Path, PathBuf},
};
use tracing::{info, instrument, warn};

/// What one kind of bundle unit looks like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BundleKind {
    /// Manifest file name inside the unit directory.
    pub manifest: &'static str,

    /// Keys the manifest must carry.
    pub required: &'static [&'static str],
}

impl BundleKind {
    pub const EDITION: Self = Self {
        manifest: EDITION_MANIFEST,
        required: EDITION_FIELDS,
    };

    pub const PLUGIN: Self = Self {
        manifest: PLUGIN_MANIFEST,
        required: PLUGIN_FIELDS,
    };
}

/// Bundle unit copied into the destination tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Copied {
    /// Unit label, e.g., `basic` or `$:/plugins/acme/widget`.
    pub name: String,
    pub source: PathBuf,
    pub dest: PathBuf,
}

/// Bundle unit left out of the destination tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skipped {
    pub source: PathBuf,
    pub reason: String,
}

/// Outcome of one assembly run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BundleReport {
    pub editions: Vec<Copied>,
    pub plugins: Vec<Copied>,
    pub themes: Vec<Copied>,
    pub skipped: Vec<Skipped>,

    /// Source trees that did not exist, so their pass did not run.
    pub missing_sources: Vec<PathBuf>,
}

impl BundleReport {
    fn skip(&mut self, source: impl Into<PathBuf>, reason: impl Into<String>) {
        let source = source.into();
        let reason = reason.into();
        warn!("skipping {}: {reason}", source.display());
        self.skipped.push(Skipped { source, reason });
    }
}

/// Assembles the wiki engine tree from edition and plugin source trees.
#[derive(Debug, Clone)]
pub struct WikiBundler {
    editions_source: PathBuf,
    plugins_source: PathBuf,
    dest: PathBuf,
}

impl WikiBundler {
    /// Construct new bundler.
    pub fn new(
        editions_source: impl Into<PathBuf>,
        plugins_source: impl Into<PathBuf>,
        dest: impl Into<PathBuf>,
    ) -> Self {
        Self {
            editions_source: editions_source.into(),
            plugins_source: plugins_source.into(),
            dest: dest.into(),
        }
    }

    /// Run both passes.
    ///
    /// # Errors
    ///
    /// - Return [`BundleError`] if copying a valid unit fails. Invalid units
    ///   and missing source trees never cause an error.
    #[instrument(skip(self), level = "debug")]
    pub fn assemble(&self) -> Result<BundleReport> {
        let mut report = BundleReport::default();
        self.bundle_editions(&mut report)?;
        self.bundle_plugins(&mut report)?;

        info!(
            "bundled {} editions, {} plugins, {} themes ({} skipped)",
            report.editions.len(),
            report.plugins.len(),
            report.themes.len(),
            report.skipped.len()
        );

        Ok(report)
    }

    /// Copy every valid edition into `editions/`.
    ///
    /// # Errors
    ///
    /// - Return [`BundleError`] if listing the editions source or copying a
    ///   valid edition fails.
    pub fn bundle_editions(&self, report: &mut BundleReport) -> Result<()> {
        if !self.editions_source.is_dir() {
            info!(
                "no editions directory found at {}",
                self.editions_source.display()
            );
            report.missing_sources.push(self.editions_source.clone());
            return Ok(());
        }

        let mut editions = read_dir(&self.editions_source)
            .map_err(|err| BundleError::ListSource {
                source: err,
                path: self.editions_source.clone(),
            })?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect::<Vec<_>>();
        editions.sort();

        let kind = BundleKind::EDITION;
        for source in editions {
            let name = source
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let manifest_path = source.join(kind.manifest);
            if !manifest_path.is_file() {
                report.skip(&source, format!("missing {}", kind.manifest));
                continue;
            }

            if let Err(err) = validate(&manifest_path, kind.required) {
                report.skip(&source, err.to_string());
                continue;
            }

            let dest = self.dest.join("editions").join(&name);
            Step::wrap(format!("copy edition {name}"), || copy_replace(&source, &dest))?;
            report.editions.push(Copied { name, source, dest });
        }

        Ok(())
    }

    /// Copy every valid plugin and theme into `plugins/` or `themes/`.
    ///
    /// # Errors
    ///
    /// - Return [`BundleError`] if copying a valid unit fails.
    pub fn bundle_plugins(&self, report: &mut BundleReport) -> Result<()> {
        if !self.plugins_source.is_dir() {
            info!(
                "no plugins directory found at {}",
                self.plugins_source.display()
            );
            report.missing_sources.push(self.plugins_source.clone());
            return Ok(());
        }

        let kind = BundleKind::PLUGIN;
        let units = discover(
            &self.plugins_source,
            kind.manifest,
            kind.required,
            DiscoveryOrder::Title,
        );

        for unit in units {
            let source = unit.unit_dir().to_path_buf();
            let (plugin_type, relative) = match route(&unit) {
                Ok(routed) => routed,
                Err(reason) => {
                    report.skip(&source, reason);
                    continue;
                }
            };

            let dest = self.dest.join(plugin_type.subtree()).join(&relative);
            let name = unit.manifest.title().unwrap_or_default().to_string();
            Step::wrap(
                format!("copy {plugin_type} {}", relative.display()),
                || copy_replace(&source, &dest),
            )?;

            let copied = Copied { name, source, dest };
            match plugin_type {
                PluginType::Plugin => report.plugins.push(copied),
                PluginType::Theme => report.themes.push(copied),
            }
        }

        Ok(())
    }
}

/// Assemble wiki engine tree at `dest` from both source trees.
///
/// # Errors
///
/// - Return [`BundleError`] if copying a valid unit fails.
pub fn assemble_wiki_tree(
    editions_source: impl AsRef<Path>,
    plugins_source: impl AsRef<Path>,
    dest: impl AsRef<Path>,
) -> Result<BundleReport> {
    WikiBundler::new(
        editions_source.as_ref(),
        plugins_source.as_ref(),
        dest.as_ref(),
    )
    .assemble()
}

/// Work out where a plugin or theme unit belongs in the destination tree.
///
/// Titles outside the namespace of their declared kind, or that would escape
/// the destination subtree, are rejected with a reason.
fn route(unit: &Discovered) -> std::result::Result<(PluginType, PathBuf), String> {
    let label = unit_label(&unit.manifest_path);
    let Some(title) = unit.manifest.title() else {
        return Err(format!("title of {label} is not a string"));
    };

    let plugin_type = unit.manifest.plugin_type();
    let Some(rest) = title.strip_prefix(plugin_type.namespace()) else {
        return Err(format!(
            "{plugin_type} title {title:?} is outside {:?}",
            plugin_type.namespace()
        ));
    };

    let relative = Path::new(rest);
    let is_contained = !rest.is_empty()
        && relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
    if !is_contained {
        return Err(format!("title {title:?} does not name a plain subpath"));
    }

    Ok((plugin_type, relative.to_path_buf()))
}

/// Wiki tree assembly error types.
#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error("failed to list {:?}", path.display())]
    ListSource {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    #[error(transparent)]
    Mirror(#[from] MirrorError),
}

/// Friendly result alias :3
pub type Result<T, E = BundleError> = std::result::Result<T, E>;
