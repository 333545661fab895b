// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Desktop build directory assembly.
//!
//! Assembly always starts from scratch. Each piece is copied with
//! copy-replace semantics in a fixed order: runtime SDK, wiki tree, then
//! application source. Afterwards the application manifest is rewritten for
//! this build, and the package install command runs inside it.

use crate::{
    config::Settings,
    desktop::MANIFEST,
    mirror::{copy_replace, remove_path, MirrorError},
    prompt::{Confirm, PromptError},
    syscall::{Step, Syscall, SyscallError},
};

use serde_json::Value;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{info, instrument};

/// Everything one desktop build is assembled from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesktopBuild {
    pub build_dir: PathBuf,
    pub runtime_sdk: PathBuf,
    pub wiki_tree: PathBuf,
    pub app_source: PathBuf,
    pub version_file: PathBuf,
    pub app_name: String,
    pub install: Vec<String>,
}

impl DesktopBuild {
    /// Construct build from project settings.
    pub fn from_settings(
        settings: &Settings,
        build_dir: impl Into<PathBuf>,
        runtime_sdk: impl Into<PathBuf>,
    ) -> Self {
        let layout = settings.layout();
        Self {
            build_dir: build_dir.into(),
            runtime_sdk: runtime_sdk.into(),
            wiki_tree: layout.tw5(),
            app_source: layout.desktop_source(),
            version_file: layout.version_file(),
            app_name: settings.app_name.clone(),
            install: settings.desktop.install.clone(),
        }
    }

    /// Assemble build directory.
    ///
    /// An existing build directory with content is only replaced once
    /// `confirm` agrees. Declining leaves the file system untouched.
    ///
    /// # Errors
    ///
    /// - Return [`BuildError::Aborted`] if the overwrite is declined.
    /// - Return [`BuildError::Prompt`] if no decision can be obtained.
    /// - Return [`BuildError::Mirror`] if copying any piece fails.
    /// - Return [`BuildError::Read`] or [`BuildError::Manifest`] if the
    ///   manifest cannot be rewritten.
    /// - Return [`BuildError::Install`] if the install command fails.
    #[instrument(skip(self, confirm), level = "debug")]
    pub fn assemble(&self, confirm: &dyn Confirm) -> Result<()> {
        if has_content(&self.build_dir) {
            let question = format!(
                "{} already exists, overwrite it?",
                self.build_dir.display()
            );
            if !confirm.confirm(&question)? {
                return Err(BuildError::Aborted(self.build_dir.clone()));
            }
        }

        let version = self.read_version()?;
        info!("building {} v{version}", self.app_name);

        Step::wrap("copy runtime SDK", || {
            copy_replace(&self.runtime_sdk, &self.build_dir)
        })?;

        let tw5 = self.build_dir.join("tw5");
        Step::wrap("copy wiki tree", || {
            copy_replace(&self.wiki_tree, &tw5)?;
            remove_path(tw5.join(".git"))
        })?;

        let source = self.build_dir.join("source");
        Step::wrap("copy app source", || copy_replace(&self.app_source, &source))?;

        Step::wrap(format!("generate {MANIFEST}"), || self.write_manifest(&version))?;
        remove_path(source.join(MANIFEST))?;

        Step::wrap("install packages", || {
            Syscall::from_words(&self.install)?
                .current_dir(&self.build_dir)
                .output()
                .map(|_| ())
        })
        .map_err(BuildError::Install)?;

        info!("✓ built {} at {}", self.app_name, self.build_dir.display());
        Ok(())
    }

    fn read_version(&self) -> Result<String> {
        fs::read_to_string(&self.version_file)
            .map(|version| version.trim().to_string())
            .map_err(|err| BuildError::Read {
                source: err,
                path: self.version_file.clone(),
            })
    }

    fn write_manifest(&self, version: &str) -> Result<()> {
        let source_manifest = self.app_source.join(MANIFEST);
        let manifest_err = |err| BuildError::Manifest {
            source: err,
            path: source_manifest.clone(),
        };
        let content = fs::read_to_string(&source_manifest).map_err(|err| BuildError::Read {
            source: err,
            path: source_manifest.clone(),
        })?;
        let mut manifest: Value = serde_json::from_str(&content).map_err(manifest_err)?;
        let Some(fields) = manifest.as_object_mut() else {
            return Err(BuildError::NotAnObject(source_manifest.clone()));
        };

        let build_dir =
            std::path::absolute(&self.build_dir).unwrap_or_else(|_| self.build_dir.clone());
        let user_data = format!("--user-data-dir={}", build_dir.join("user-data").display());
        let chromium_args = match fields.get("chromium-args").and_then(Value::as_str) {
            Some(args) if !args.trim().is_empty() => format!("{} {user_data}", args.trim_end()),
            _ => user_data,
        };

        fields.insert("name".into(), Value::String(self.app_name.clone()));
        fields.insert("version".into(), Value::String(version.into()));
        fields.insert("chromium-args".into(), Value::String(chromium_args));

        let dest = self.build_dir.join(MANIFEST);
        let rendered = serde_json::to_string_pretty(&manifest).map_err(manifest_err)?;
        fs::write(&dest, rendered).map_err(|err| BuildError::Write {
            source: err,
            path: dest,
        })
    }
}

/// Whether overwriting target path would destroy anything.
///
/// Anything but an empty directory counts, including a plain file or a
/// dangling symlink in place of the build directory.
fn has_content(path: &Path) -> bool {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::read_dir(path)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(true),
        Ok(_) => true,
        Err(_) => false,
    }
}

/// Desktop build error types.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("aborting build, {:?} left untouched", .0.display())]
    Aborted(PathBuf),

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error(transparent)]
    Mirror(#[from] MirrorError),

    #[error("failed to read {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    #[error("invalid manifest {:?}", path.display())]
    Manifest {
        #[source]
        source: serde_json::Error,
        path: PathBuf,
    },

    #[error("manifest {:?} is not a JSON object", .0.display())]
    NotAnObject(PathBuf),

    #[error("failed to write {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    #[error("package install failed")]
    Install(#[source] SyscallError),
}

/// Friendly result alias :3
pub type Result<T, E = BuildError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::Preset;
    use pretty_assertions::assert_eq;
    use std::fs::{create_dir_all, read_to_string, write};

    struct Project {
        _dir: tempfile::TempDir,
        root: PathBuf,
    }

    impl Project {
        fn new(package: &str) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path().to_path_buf();
            for (path, content) in [
                ("nwjs/v0.90.0/nw", "#!/bin/sh\n"),
                ("tw5/tiddlywiki.js", "// tw"),
                ("tw5/.git/HEAD", "ref: refs/heads/master"),
                ("desktop/source/index.html", "<html/>"),
                ("desktop/source/package.json", package),
                ("desktop/VERSION", "1.2.3\n"),
            ] {
                let path = root.join(path);
                create_dir_all(path.parent().unwrap()).unwrap();
                write(path, content).unwrap();
            }
            Self { _dir: dir, root }
        }

        fn build(&self, install: &[&str]) -> DesktopBuild {
            DesktopBuild {
                build_dir: self.root.join("build"),
                runtime_sdk: self.root.join("nwjs/v0.90.0"),
                wiki_tree: self.root.join("tw5"),
                app_source: self.root.join("desktop/source"),
                version_file: self.root.join("desktop/VERSION"),
                app_name: "NeuroDesktop".into(),
                install: install.iter().map(|word| word.to_string()).collect(),
            }
        }
    }

    #[test]
    fn assemble_lays_out_build_directory() -> anyhow::Result<()> {
        let project = Project::new(
            r#"{"name":"source","main":"index.html","chromium-args":"--enable-logging"}"#,
        );
        let build = project.build(&["true"]);

        build.assemble(&Preset(false))?;

        let build_dir = project.root.join("build");
        assert!(build_dir.join("nw").is_file());
        assert!(build_dir.join("tw5/tiddlywiki.js").is_file());
        assert!(!build_dir.join("tw5/.git").exists());
        assert!(build_dir.join("source/index.html").is_file());
        assert!(!build_dir.join("source/package.json").exists());

        let manifest: Value = serde_json::from_str(&read_to_string(build_dir.join(MANIFEST))?)?;
        let keys = manifest
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect::<Vec<_>>();
        assert_eq!(keys, vec!["name", "main", "chromium-args", "version"]);
        assert_eq!(manifest["name"], "NeuroDesktop");
        assert_eq!(manifest["version"], "1.2.3");
        assert_eq!(
            manifest["chromium-args"],
            format!(
                "--enable-logging --user-data-dir={}",
                build_dir.join("user-data").display()
            )
        );

        Ok(())
    }

    #[test]
    fn empty_chromium_args_get_no_leading_space() -> anyhow::Result<()> {
        let project = Project::new(r#"{"name":"source"}"#);
        let build = project.build(&["true"]);

        build.assemble(&Preset(false))?;

        let manifest: Value =
            serde_json::from_str(&read_to_string(project.root.join("build").join(MANIFEST))?)?;
        let args = manifest["chromium-args"].as_str().unwrap_or_default();
        assert!(args.starts_with("--user-data-dir="));

        Ok(())
    }

    #[test]
    fn declined_overwrite_touches_nothing() -> anyhow::Result<()> {
        let project = Project::new(r#"{"name":"source"}"#);
        let build_dir = project.root.join("build");
        create_dir_all(&build_dir)?;
        write(build_dir.join("marker"), "keep")?;

        let result = project.build(&["true"]).assemble(&Preset(false));

        assert!(matches!(result, Err(BuildError::Aborted(_))));
        assert_eq!(read_to_string(build_dir.join("marker"))?, "keep");
        assert!(!build_dir.join("nw").exists());

        Ok(())
    }

    #[test]
    fn confirmed_overwrite_starts_from_scratch() -> anyhow::Result<()> {
        let project = Project::new(r#"{"name":"source"}"#);
        let build_dir = project.root.join("build");
        create_dir_all(&build_dir)?;
        write(build_dir.join("marker"), "stale")?;

        project.build(&["true"]).assemble(&Preset(true))?;

        assert!(!build_dir.join("marker").exists());
        assert!(build_dir.join("nw").is_file());

        Ok(())
    }

    #[test]
    fn file_in_place_of_build_directory_needs_confirmation() -> anyhow::Result<()> {
        let project = Project::new(r#"{"name":"source"}"#);
        let build_dir = project.root.join("build");
        write(&build_dir, "not a directory")?;

        let declined = project.build(&["true"]).assemble(&Preset(false));
        assert!(matches!(declined, Err(BuildError::Aborted(_))));
        assert_eq!(read_to_string(&build_dir)?, "not a directory");

        project.build(&["true"]).assemble(&Preset(true))?;
        assert!(build_dir.join("nw").is_file());

        Ok(())
    }

    #[test]
    fn failing_install_is_reported() {
        let project = Project::new(r#"{"name":"source"}"#);

        let result = project.build(&["false"]).assemble(&Preset(true));

        assert!(matches!(result, Err(BuildError::Install(_))));
    }

    #[test]
    fn install_runs_inside_build_directory() -> anyhow::Result<()> {
        let project = Project::new(r#"{"name":"source"}"#);

        project
            .build(&["sh", "-c", "touch installed"])
            .assemble(&Preset(true))?;

        assert!(project.root.join("build/installed").is_file());

        Ok(())
    }
}
