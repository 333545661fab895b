// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Desktop runtime SDK fetching.
//!
//! The desktop app runs on an NW.js SDK release. Releases are downloaded once
//! as `nwjs/v<version>.tar.gz` and extracted once into `nwjs/v<version>/`.
//! Both artifacts are reused on later runs unless an overwrite is requested.
//! A fresh download always forces a fresh extraction.
//!
//! Partial artifacts never masquerade as complete ones: downloads stream into
//! a `.part` file, and extraction unpacks into a `.part` directory, each
//! renamed into place only once finished.

use crate::config::RuntimeSettings;

use flate2::read::GzDecoder;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::{
    fs::{self, File},
    io::BufReader,
    path::{Component, Path, PathBuf},
};
use tar::Archive;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

/// What a fetch step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fetched {
    /// Existing artifact was reused.
    Cached,

    /// Artifact was produced by this call.
    Fresh,
}

/// One runtime SDK release inside the runtime directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSdk {
    dir: PathBuf,
    version: String,
    base_url: String,
}

impl RuntimeSdk {
    /// Construct new SDK handle rooted at target runtime directory.
    pub fn new(dir: impl Into<PathBuf>, settings: &RuntimeSettings) -> Self {
        Self {
            dir: dir.into(),
            version: settings.version.trim_start_matches('v').to_string(),
            base_url: settings.url.trim_end_matches('/').to_string(),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Name of the top-level directory inside the upstream tarball.
    pub fn release_name(&self) -> String {
        format!("nwjs-sdk-v{}-linux-x64", self.version)
    }

    /// Where the release is published.
    pub fn url(&self) -> String {
        format!(
            "{}/v{}/{}.tar.gz",
            self.base_url,
            self.version,
            self.release_name()
        )
    }

    pub fn tarball(&self) -> PathBuf {
        self.dir.join(format!("v{}.tar.gz", self.version))
    }

    /// Extracted SDK, ready to be copied into a build.
    pub fn sdk_dir(&self) -> PathBuf {
        self.dir.join(format!("v{}", self.version))
    }

    /// Download then extract the release.
    ///
    /// # Errors
    ///
    /// - Return [`RuntimeError`] if either step fails.
    pub async fn fetch(&self, overwrite: bool) -> Result<PathBuf> {
        let downloaded = self.download(overwrite).await?;
        self.extract(overwrite || downloaded == Fetched::Fresh)?;
        Ok(self.sdk_dir())
    }

    /// Download release tarball unless already present.
    ///
    /// # Errors
    ///
    /// - Return [`RuntimeError::Download`] if the request fails or the server
    ///   answers with a non-success status.
    /// - Return [`RuntimeError::Io`] if the tarball cannot be written.
    #[instrument(skip(self), level = "debug")]
    pub async fn download(&self, overwrite: bool) -> Result<Fetched> {
        let tarball = self.tarball();
        if tarball.is_file() && !overwrite {
            info!("runtime v{} cached at {}", self.version, tarball.display());
            return Ok(Fetched::Cached);
        }

        let url = self.url();
        let download_err = |err: reqwest::Error| RuntimeError::Download {
            source: err,
            url: url.clone(),
        };
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|err| RuntimeError::io(&self.dir, err))?;

        info!("download {url}");
        let response = reqwest::get(&url)
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(download_err)?;

        let bar = match response.content_length() {
            Some(length) => ProgressBar::new(length),
            None => ProgressBar::new_spinner(),
        };
        if let Ok(style) = ProgressStyle::with_template(
            "{elapsed_precise:.green}  {msg:<30}  [{wide_bar:.yellow/blue}] {bytes}/{total_bytes}",
        ) {
            bar.set_style(style.progress_chars("-Cco."));
        }
        bar.set_message(format!("nwjs v{}", self.version));

        let partial = tarball.with_extension("gz.part");
        let mut file = tokio::fs::File::create(&partial)
            .await
            .map_err(|err| RuntimeError::io(&partial, err))?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(download_err)?;
            file.write_all(&chunk)
                .await
                .map_err(|err| RuntimeError::io(&partial, err))?;
            bar.inc(chunk.len() as u64);
        }
        file.flush()
            .await
            .map_err(|err| RuntimeError::io(&partial, err))?;
        bar.finish_and_clear();

        tokio::fs::rename(&partial, &tarball)
            .await
            .map_err(|err| RuntimeError::io(&tarball, err))?;
        info!("✓ downloaded {}", tarball.display());

        Ok(Fetched::Fresh)
    }

    /// Extract tarball into the SDK directory unless already present.
    ///
    /// The top-level release directory of the tarball is dropped, so its
    /// contents land directly in [`RuntimeSdk::sdk_dir`].
    ///
    /// # Errors
    ///
    /// - Return [`RuntimeError::MissingTarball`] if nothing was downloaded.
    /// - Return [`RuntimeError::Io`] if unpacking fails.
    #[instrument(skip(self), level = "debug")]
    pub fn extract(&self, overwrite: bool) -> Result<Fetched> {
        let sdk_dir = self.sdk_dir();
        if sdk_dir.is_dir() && !overwrite {
            info!("runtime v{} already extracted", self.version);
            return Ok(Fetched::Cached);
        }

        let tarball = self.tarball();
        if !tarball.is_file() {
            return Err(RuntimeError::MissingTarball(tarball));
        }

        let partial = self.dir.join(format!("v{}.part", self.version));
        for stale in [&partial, &sdk_dir] {
            if stale.exists() {
                fs::remove_dir_all(stale).map_err(|err| RuntimeError::io(stale, err))?;
            }
        }

        info!("extract {}", tarball.display());
        unpack_stripped(&tarball, &partial)?;
        fs::rename(&partial, &sdk_dir).map_err(|err| RuntimeError::io(&sdk_dir, err))?;

        Ok(Fetched::Fresh)
    }
}

fn unpack_stripped(tarball: &Path, dest: &Path) -> Result<()> {
    let unpack_err = |err| RuntimeError::io(tarball, err);
    let file = File::open(tarball).map_err(unpack_err)?;
    let mut archive = Archive::new(GzDecoder::new(BufReader::new(file)));
    archive.set_preserve_permissions(true);
    fs::create_dir_all(dest).map_err(|err| RuntimeError::io(dest, err))?;

    for entry in archive.entries().map_err(unpack_err)? {
        let mut entry = entry.map_err(unpack_err)?;
        let path = entry.path().map_err(unpack_err)?.into_owned();

        // INVARIANT: Drop the release directory every entry is nested under.
        let stripped = path.components().skip(1).collect::<PathBuf>();
        if stripped.as_os_str().is_empty() {
            continue;
        }

        if !stripped
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
        {
            warn!("skipping unsafe archive entry {:?}", path.display());
            continue;
        }

        debug!("unpack {:?}", stripped.display());
        let target = dest.join(&stripped);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|err| RuntimeError::io(parent, err))?;
        }
        entry.unpack(&target).map_err(unpack_err)?;
    }

    Ok(())
}

/// Runtime SDK error types.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("failed to download {url}")]
    Download {
        #[source]
        source: reqwest::Error,
        url: String,
    },

    #[error("no runtime tarball at {:?}", .0.display())]
    MissingTarball(PathBuf),

    #[error("runtime I/O failed at {:?}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

impl RuntimeError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            source,
            path: path.to_path_buf(),
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = RuntimeError> = std::result::Result<T, E>;
