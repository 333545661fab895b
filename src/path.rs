// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine where each source tree and generated tree lives relative to the
//! project root. Nothing here checks whether the returned paths exist.
//!
//! # Project Layout
//!
//! ```text
//! <root>/
//! ├── .gitmodules
//! ├── tw5/                 wiki engine tree (bundle destination)
//! ├── tw5-editions/        edition bundle units
//! ├── tw5-plugins/         plugin and theme bundle units
//! ├── nwjs/                runtime SDK tarballs and extracted SDKs
//! ├── desktop/
//! │   ├── VERSION
//! │   └── source/          desktop application source
//! ├── neuro/               python library
//! └── build/               default desktop build directory
//! ```

use std::path::{Path, PathBuf};

/// Directory layout of a project rooted at one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    /// Construct new layout for target project root.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    /// Path to a named component directory, e.g., "neuro" or "desktop".
    pub fn component(&self, name: impl AsRef<Path>) -> PathBuf {
        self.root.join(name)
    }

    /// Wiki engine tree that editions and plugins get bundled into.
    pub fn tw5(&self) -> PathBuf {
        self.root.join("tw5")
    }

    pub fn editions_source(&self) -> PathBuf {
        self.root.join("tw5-editions")
    }

    pub fn plugins_source(&self) -> PathBuf {
        self.root.join("tw5-plugins")
    }

    /// Directory holding runtime SDK downloads.
    pub fn runtime_dir(&self) -> PathBuf {
        self.root.join("nwjs")
    }

    pub fn desktop_source(&self) -> PathBuf {
        self.root.join("desktop").join("source")
    }

    /// Plain-text file holding the desktop application version.
    pub fn version_file(&self) -> PathBuf {
        self.root.join("desktop").join("VERSION")
    }

    pub fn gitmodules(&self) -> PathBuf {
        self.root.join(".gitmodules")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn layout_paths_hang_off_root() {
        let layout = Layout::new("/srv/nf");

        assert_eq!(layout.tw5(), PathBuf::from("/srv/nf/tw5"));
        assert_eq!(layout.plugins_source(), PathBuf::from("/srv/nf/tw5-plugins"));
        assert_eq!(
            layout.desktop_source(),
            PathBuf::from("/srv/nf/desktop/source")
        );
        assert_eq!(
            layout.component("tw5-plugins/neuroforest/core"),
            PathBuf::from("/srv/nf/tw5-plugins/neuroforest/core")
        );
    }
}
