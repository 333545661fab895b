// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Destructive directory synchronization.
//!
//! [`copy_replace`] removes the destination outright, then recreates it as an
//! exact copy of the source. Nothing is merged, so no stale file from an
//! earlier run can survive into the next.
//!
//! [`mirror`] is meant for whole checkouts copied over other checkouts. It
//! skips version control metadata and honours `.gitignore` files on both
//! sides: `.git` entries and ignored entries of the destination are left in
//! place, while every other stale entry is deleted. A submodule checkout
//! thus keeps its gitlink and can still be reset with git afterwards.

use ignore::{DirEntry, WalkBuilder};
use std::{
    cmp::Reverse,
    fs,
    io,
    path::{Path, PathBuf},
};
use tracing::{debug, instrument};

/// Replace destination with an exact copy of source.
///
/// # Errors
///
/// - Return [`MirrorError::MissingSource`] if source is not a directory.
/// - Return [`MirrorError::Remove`] if the old destination cannot be removed.
/// - Return [`MirrorError::Copy`] if any entry fails to copy.
#[instrument(skip(source, dest), level = "debug")]
pub fn copy_replace(source: impl AsRef<Path>, dest: impl AsRef<Path>) -> Result<()> {
    let (source, dest) = (source.as_ref(), dest.as_ref());
    require_dir(source)?;

    debug!("replace {:?} with {:?}", dest.display(), source.display());
    remove_path(dest)?;
    copy_all(source, dest, WalkBuilder::new(source).standard_filters(false).build())
}

/// Synchronize destination checkout with a filtered copy of source.
///
/// Entries named `.git` are never copied nor deleted. Patterns from
/// `.gitignore` files apply even when neither side is a git repository:
/// ignored source entries are not copied, and ignored destination entries
/// are not deleted.
///
/// # Errors
///
/// - Return [`MirrorError::MissingSource`] if source is not a directory.
/// - Return [`MirrorError::Remove`] if a stale destination entry cannot be
///   removed.
/// - Return [`MirrorError::Copy`] if any entry fails to copy.
#[instrument(skip(source, dest), level = "debug")]
pub fn mirror(source: impl AsRef<Path>, dest: impl AsRef<Path>) -> Result<()> {
    let (source, dest) = (source.as_ref(), dest.as_ref());
    require_dir(source)?;

    debug!("mirror {:?} into {:?}", source.display(), dest.display());
    clear_unprotected(dest)?;
    copy_all(source, dest, checkout_walker(source))
}

/// Remove target path whatever kind of entry it is.
///
/// Missing targets are fine.
///
/// # Errors
///
/// - Return [`MirrorError::Remove`] if the target exists but cannot be removed.
pub fn remove_path(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    };

    result.map_err(|err| MirrorError::Remove {
        source: err,
        path: path.to_path_buf(),
    })
}

fn require_dir(source: &Path) -> Result<()> {
    if !source.is_dir() {
        return Err(MirrorError::MissingSource(source.to_path_buf()));
    }
    Ok(())
}

/// Walk checkout at target root, skipping `.git` and ignored entries.
fn checkout_walker(root: &Path) -> ignore::Walk {
    WalkBuilder::new(root)
        .standard_filters(false)
        .git_ignore(true)
        .require_git(false)
        .filter_entry(|entry| entry.file_name() != ".git")
        .build()
}

/// Delete every destination entry the checkout walker would yield.
///
/// Directories left empty are removed too. Directories still holding a
/// protected entry stay.
fn clear_unprotected(dest: &Path) -> Result<()> {
    if !fs::symlink_metadata(dest).is_ok_and(|meta| meta.is_dir()) {
        return remove_path(dest);
    }

    // INVARIANT: Collect before deleting, the walker reads .gitignore lazily.
    let entries = checkout_walker(dest)
        .filter(|entry| entry.as_ref().map_or(true, |entry| entry.depth() > 0))
        .collect::<Result<Vec<_>, _>>()?;

    let mut dirs = Vec::new();
    for entry in &entries {
        if entry.file_type().is_some_and(|kind| kind.is_dir()) {
            dirs.push(entry.path());
        } else {
            remove_path(entry.path())?;
        }
    }

    dirs.sort_by_key(|dir| Reverse(dir.components().count()));
    for dir in dirs {
        let remove_err = |err: io::Error| MirrorError::Remove {
            source: err,
            path: dir.to_path_buf(),
        };
        let empty = fs::read_dir(dir).map_err(remove_err)?.next().is_none();
        if empty {
            fs::remove_dir(dir).map_err(remove_err)?;
        } else {
            debug!("keep {:?}, it holds protected entries", dir.display());
        }
    }

    Ok(())
}

fn copy_all(source: &Path, dest: &Path, walker: ignore::Walk) -> Result<()> {
    for entry in walker {
        let entry = entry?;
        copy_entry(source, dest, &entry)?;
    }

    Ok(())
}

fn copy_entry(source: &Path, dest: &Path, entry: &DirEntry) -> Result<()> {
    // INVARIANT: The walker only yields paths below the source root.
    let relative = entry
        .path()
        .strip_prefix(source)
        .unwrap_or_else(|_| entry.path());
    let target = dest.join(relative);
    let copy_err = |err| MirrorError::Copy {
        source: err,
        from: entry.path().to_path_buf(),
        to: target.clone(),
    };

    let Some(kind) = entry.file_type() else {
        return Ok(());
    };

    if kind.is_dir() {
        fs::create_dir_all(&target).map_err(copy_err)?;
    } else if kind.is_symlink() {
        let link = fs::read_link(entry.path()).map_err(copy_err)?;
        if fs::symlink_metadata(&target).is_ok() {
            remove_path(&target)?;
        }
        symlink(&link, &target).map_err(copy_err)?;
    } else {
        fs::copy(entry.path(), &target).map_err(copy_err)?;
    }

    Ok(())
}

#[cfg(unix)]
fn symlink(original: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(original, link)
}

#[cfg(not(unix))]
fn symlink(original: &Path, link: &Path) -> io::Result<()> {
    fs::copy(original, link).map(|_| ())
}

/// Directory synchronization error types.
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("source directory {:?} does not exist", .0.display())]
    MissingSource(PathBuf),

    #[error("failed to remove {:?}", path.display())]
    Remove {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    #[error("failed to copy {:?} to {:?}", from.display(), to.display())]
    Copy {
        #[source]
        source: io::Error,
        from: PathBuf,
        to: PathBuf,
    },

    #[error(transparent)]
    Walk(#[from] ignore::Error),
}

/// Friendly result alias :3
pub type Result<T, E = MirrorError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs::{create_dir_all, read_to_string, write};

    fn tree(root: &Path, files: &[(&str, &str)]) {
        for (path, content) in files {
            let path = root.join(path);
            create_dir_all(path.parent().unwrap()).unwrap();
            write(path, content).unwrap();
        }
    }

    fn listing(root: &Path) -> Vec<String> {
        let mut paths = WalkBuilder::new(root)
            .standard_filters(false)
            .build()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_some_and(|kind| kind.is_file()))
            .map(|entry| {
                entry
                    .path()
                    .strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect::<Vec<_>>();
        paths.sort();
        paths
    }

    #[test]
    fn copy_replace_removes_stale_destination_files() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let source = dir.path().join("source");
        let dest = dir.path().join("dest");
        tree(&source, &[("a.txt", "a"), ("sub/b.txt", "b"), (".hidden", "h")]);
        tree(&dest, &[("stale.txt", "old"), ("a.txt", "old a")]);

        copy_replace(&source, &dest)?;

        assert_eq!(listing(&dest), vec![".hidden", "a.txt", "sub/b.txt"]);
        assert_eq!(read_to_string(dest.join("a.txt"))?, "a");

        Ok(())
    }

    #[test]
    fn copy_replace_keeps_vcs_metadata() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let source = dir.path().join("source");
        let dest = dir.path().join("dest");
        tree(&source, &[(".git/HEAD", "ref"), (".gitignore", "*.log\n"), ("x.log", "x")]);

        copy_replace(&source, &dest)?;

        assert_eq!(listing(&dest), vec![".git/HEAD", ".gitignore", "x.log"]);

        Ok(())
    }

    #[test]
    fn mirror_filters_git_dir_and_ignored_files() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let source = dir.path().join("neuro");
        let dest = dir.path().join("app").join("neuro");
        tree(
            &source,
            &[
                (".git/HEAD", "ref"),
                (".gitignore", "*.log\nbuild/\n"),
                ("keep.py", "print()"),
                ("debug.log", "noise"),
                ("build/out.bin", "bin"),
                ("pkg/nested.log", "noise"),
            ],
        );
        tree(&dest, &[("stale.py", "old")]);

        mirror(&source, &dest)?;

        assert_eq!(listing(&dest), vec![".gitignore", "keep.py"]);

        Ok(())
    }

    #[test]
    fn mirror_keeps_destination_gitlink() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let source = dir.path().join("checkout");
        let dest = dir.path().join("project").join("neuro");
        tree(&source, &[(".git/HEAD", "ref: refs/heads/dev"), ("a.py", "a")]);
        tree(
            &dest,
            &[(".git", "gitdir: ../.git/modules/neuro"), ("stale.py", "old")],
        );

        mirror(&source, &dest)?;

        assert_eq!(listing(&dest), vec![".git", "a.py"]);
        assert_eq!(
            read_to_string(dest.join(".git"))?,
            "gitdir: ../.git/modules/neuro"
        );

        Ok(())
    }

    #[test]
    fn mirror_keeps_ignored_destination_entries() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let source = dir.path().join("checkout");
        let dest = dir.path().join("desktop");
        tree(&source, &[(".gitignore", "node_modules/\n"), ("main.js", "new")]);
        tree(
            &dest,
            &[
                (".gitignore", "node_modules/\n"),
                ("node_modules/x/index.js", "dep"),
                ("old/gone.js", "old"),
                ("main.js", "old"),
            ],
        );

        mirror(&source, &dest)?;

        assert_eq!(
            listing(&dest),
            vec![".gitignore", "main.js", "node_modules/x/index.js"]
        );
        assert_eq!(read_to_string(dest.join("main.js"))?, "new");
        assert!(!dest.join("old").exists());

        Ok(())
    }

    #[test]
    fn mirror_replaces_destination_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let source = dir.path().join("checkout");
        let dest = dir.path().join("neuro");
        tree(&source, &[("a.py", "a")]);
        write(&dest, "not a directory")?;

        mirror(&source, &dest)?;

        assert_eq!(listing(&dest), vec!["a.py"]);

        Ok(())
    }

    #[test]
    fn missing_source_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = copy_replace(dir.path().join("nope"), dir.path().join("dest"));

        assert!(matches!(result, Err(MirrorError::MissingSource(_))));
    }

    #[cfg(unix)]
    #[test]
    fn copy_preserves_executable_bit_and_symlinks() -> anyhow::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir()?;
        let source = dir.path().join("sdk");
        let dest = dir.path().join("build");
        tree(&source, &[("nw", "#!/bin/sh\n"), ("lib/libnode.so", "elf")]);
        fs::set_permissions(source.join("nw"), fs::Permissions::from_mode(0o755))?;
        std::os::unix::fs::symlink("lib/libnode.so", source.join("libnode.so"))?;

        copy_replace(&source, &dest)?;

        let mode = fs::metadata(dest.join("nw"))?.permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
        assert_eq!(
            fs::read_link(dest.join("libnode.so"))?,
            PathBuf::from("lib/libnode.so")
        );

        Ok(())
    }
}
