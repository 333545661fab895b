// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Submodule synchronization.
//!
//! Every source tree nfops consumes is a git submodule of the project root,
//! declared in `.gitmodules`. Synchronizing a submodule is destructive: it is
//! fetched, hard reset to a remote branch, then scrubbed of every untracked
//! and ignored file. No local work survives, and no merge is ever attempted.
//!
//! # Modes
//!
//! - [`SyncMode::Local`] skips git entirely and mirrors developer checkouts
//!   from elsewhere on disk into the project root.
//! - [`SyncMode::Master`] resets each submodule to the branch it declares in
//!   `.gitmodules`, or "master" when it declares none.
//! - [`SyncMode::Develop`] resets the project owned submodules to "develop".
//! - [`SyncMode::Branch`] resets each submodule to a named branch, falling
//!   back to its declared branch when the remote does not carry it.
//!
//! Each path is handled on its own. One failure is recorded in the
//! [`SyncReport`] and never stops the remaining paths.

use crate::{
    config::Settings,
    mirror::{mirror, remove_path, MirrorError},
    path::Layout,
    syscall::Step,
};

use auth_git2::{GitAuthenticator, Prompter};
use git2::{
    build::CheckoutBuilder, Config, Direction, FetchOptions, ObjectType, RemoteCallbacks,
    Repository, ResetType, Status, StatusOptions,
};
use glob::Pattern;
use indicatif::ProgressBar;
use inquire::{InquireError, Password, PasswordDisplayMode, Text};
use std::{
    error::Error as StdError,
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    time,
};
use tracing::{debug, info, instrument, warn};

/// Remote every submodule is fetched from.
pub const ORIGIN: &str = "origin";

/// Branch used when `.gitmodules` declares none.
pub const DEFAULT_BRANCH: &str = "master";

/// Branch project owned submodules follow in develop mode.
pub const DEVELOP_BRANCH: &str = "develop";

/// Destructive git operations on one checkout.
pub trait Resetter {
    /// Fetch, hard reset, and clean checkout at target path.
    ///
    /// With a remote, the reference resolves as `<remote>/<reference>` after
    /// fetching. Without one, the reference is resolved as given.
    fn reset(
        &self,
        path: &Path,
        reference: &str,
        remote: Option<&str>,
        bar: &ProgressBar,
    ) -> Result<(), ResetError>;

    /// Check whether the remote carries a branch, without fetching it.
    fn remote_branch_exists(
        &self,
        path: &Path,
        remote: &str,
        branch: &str,
        bar: &ProgressBar,
    ) -> Result<bool, ResetError>;
}

/// Resetter backed by libgit2.
#[derive(Debug, Default, Clone, Copy)]
pub struct Git2Resetter;

impl Git2Resetter {
    pub fn new() -> Self {
        Self
    }

    fn open(path: &Path) -> Result<Repository, ResetError> {
        Repository::open(path).map_err(|err| ResetError::git(ResetStep::Open, path, err))
    }

    fn fetch(
        repository: &Repository,
        path: &Path,
        remote: &str,
        bar: &ProgressBar,
    ) -> Result<(), git2::Error> {
        let mut remote = repository.find_remote(remote)?;
        with_callbacks(bar, path, |mut callbacks| {
            let bar = bar.clone();
            let mut throttle = time::Instant::now();
            callbacks.transfer_progress(move |progress| {
                if throttle.elapsed() > time::Duration::from_millis(10) {
                    throttle = time::Instant::now();
                    bar.set_length(progress.total_objects() as u64);
                    bar.set_position(progress.received_objects() as u64);
                }
                true
            });

            let mut options = FetchOptions::new();
            options.remote_callbacks(callbacks);
            remote.fetch(&[] as &[&str], Some(&mut options), None)
        })
    }

    fn hard_reset(repository: &Repository, spec: &str) -> Result<(), git2::Error> {
        let target = repository.revparse_single(spec)?.peel(ObjectType::Commit)?;
        let mut checkout = CheckoutBuilder::new();
        checkout.force();
        repository.reset(&target, ResetType::Hard, Some(&mut checkout))
    }

    /// Collect every untracked and ignored path, like `git clean -fdx` would.
    ///
    /// Nested repositories are left alone.
    fn cleanable(repository: &Repository) -> Result<Vec<PathBuf>, git2::Error> {
        let Some(workdir) = repository.workdir() else {
            return Ok(Vec::new());
        };

        let mut options = StatusOptions::new();
        options
            .include_untracked(true)
            .include_ignored(true)
            .recurse_untracked_dirs(false)
            .recurse_ignored_dirs(false)
            .exclude_submodules(true);

        let mut paths = Vec::new();
        for entry in repository.statuses(Some(&mut options))?.iter() {
            if !entry.status().intersects(Status::WT_NEW | Status::IGNORED) {
                continue;
            }

            let Some(relative) = entry.path() else {
                continue;
            };

            let path = workdir.join(relative.trim_end_matches('/'));
            if path.join(".git").exists() {
                debug!("leave nested repository {:?}", path.display());
                continue;
            }
            paths.push(path);
        }

        Ok(paths)
    }
}

impl Resetter for Git2Resetter {
    #[instrument(skip(self, bar), level = "debug")]
    fn reset(
        &self,
        path: &Path,
        reference: &str,
        remote: Option<&str>,
        bar: &ProgressBar,
    ) -> Result<(), ResetError> {
        let repository = Self::open(path)?;

        let spec = match remote {
            Some(remote) => {
                Self::fetch(&repository, path, remote, bar)
                    .map_err(|err| ResetError::git(ResetStep::Fetch, path, err))?;
                format!("{remote}/{reference}")
            }
            None => reference.to_string(),
        };

        Self::hard_reset(&repository, &spec)
            .map_err(|err| ResetError::git(ResetStep::Reset, path, err))?;

        let cleanable = Self::cleanable(&repository)
            .map_err(|err| ResetError::git(ResetStep::Clean, path, err))?;
        for target in cleanable {
            debug!("remove {:?}", target.display());
            remove_path(&target).map_err(|err| ResetError::Clean {
                source: err,
                path: path.to_path_buf(),
            })?;
        }

        Ok(())
    }

    #[instrument(skip(self, bar), level = "debug")]
    fn remote_branch_exists(
        &self,
        path: &Path,
        remote: &str,
        branch: &str,
        bar: &ProgressBar,
    ) -> Result<bool, ResetError> {
        let repository = Self::open(path)?;
        let wanted = format!("refs/heads/{branch}");

        let result = repository.find_remote(remote).and_then(|mut remote| {
            with_callbacks(bar, path, |callbacks| {
                let connection = remote.connect_auth(Direction::Fetch, Some(callbacks), None)?;
                let found = connection.list()?.iter().any(|head| head.name() == wanted);
                Ok(found)
            })
        });

        result.map_err(|err| ResetError::git(ResetStep::ListRemote, path, err))
    }
}

fn with_callbacks<T>(
    bar: &ProgressBar,
    checkout: &Path,
    work: impl FnOnce(RemoteCallbacks<'_>) -> Result<T, git2::Error>,
) -> Result<T, git2::Error> {
    let prompter = SyncPrompter::new(bar.clone(), checkout);
    let authenticator = GitAuthenticator::default().set_prompter(prompter);
    let config = Config::open_default()?;

    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(authenticator.credentials(&config));
    work(callbacks)
}

/// Asks for remote credentials of one checkout while its spinner waits.
///
/// Cancelling any prompt gives up on authentication, which then surfaces as
/// a failed fetch for that checkout alone.
#[derive(Debug, Clone)]
pub struct SyncPrompter {
    bar: ProgressBar,
    checkout: PathBuf,
}

impl SyncPrompter {
    pub fn new(bar: ProgressBar, checkout: impl Into<PathBuf>) -> Self {
        Self {
            bar,
            checkout: checkout.into(),
        }
    }

    fn ask(&self, prompt: impl FnOnce() -> Result<String, InquireError>) -> Option<String> {
        match self.bar.suspend(prompt) {
            Ok(answer) => Some(answer),
            Err(err) => {
                debug!("no credentials for {:?}: {err}", self.checkout.display());
                None
            }
        }
    }
}

fn secret(message: &str) -> Result<String, InquireError> {
    Password::new(message)
        .without_confirmation()
        .with_display_mode(PasswordDisplayMode::Masked)
        .prompt()
}

impl Prompter for SyncPrompter {
    fn prompt_username_password(
        &mut self,
        url: &str,
        _config: &git2::Config,
    ) -> Option<(String, String)> {
        warn!("{:?} needs credentials for {url}", self.checkout.display());
        let user = self.ask(|| Text::new(&format!("user for {url}:")).prompt())?;
        let password = self.ask(|| secret(&format!("password of {user}:")))?;
        Some((user, password))
    }

    fn prompt_password(
        &mut self,
        username: &str,
        url: &str,
        _config: &git2::Config,
    ) -> Option<String> {
        warn!("{:?} needs a password for {url}", self.checkout.display());
        self.ask(|| secret(&format!("password of {username}:")))
    }

    fn prompt_ssh_key_passphrase(
        &mut self,
        ssh_key_path: &Path,
        _config: &git2::Config,
    ) -> Option<String> {
        self.ask(|| secret(&format!("passphrase of {}:", ssh_key_path.display())))
    }
}

/// Submodule entry of `.gitmodules`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submodule {
    /// Path relative to the project root.
    pub path: String,

    /// Declared branch, or [`DEFAULT_BRANCH`].
    pub branch: String,
}

/// List every submodule declared in the `.gitmodules` file at target root.
///
/// Entries keep their declaration order.
///
/// # Errors
///
/// - Return [`SyncError::NoGitmodules`] if the file does not exist.
/// - Return [`SyncError::Gitmodules`] if the file cannot be parsed.
pub fn list_submodules(root: impl AsRef<Path>) -> Result<Vec<Submodule>> {
    let gitmodules = Layout::new(root.as_ref()).gitmodules();
    if !gitmodules.is_file() {
        return Err(SyncError::NoGitmodules(gitmodules));
    }

    let gitmodules_err = |err| SyncError::Gitmodules {
        source: err,
        path: gitmodules.clone(),
    };
    let config = Config::open(&gitmodules).map_err(gitmodules_err)?;
    let mut entries = config
        .entries(Some(r"submodule\..*\.path"))
        .map_err(gitmodules_err)?;

    let mut names = Vec::new();
    while let Some(entry) = entries.next() {
        let entry = entry.map_err(gitmodules_err)?;
        let (Some(key), Some(path)) = (entry.name(), entry.value()) else {
            continue;
        };

        // INVARIANT: Key always looks like "submodule.<name>.path".
        let name = key
            .strip_prefix("submodule.")
            .and_then(|rest| rest.strip_suffix(".path"))
            .unwrap_or(key)
            .to_string();
        names.push((name, path.to_string()));
    }

    let submodules = names
        .into_iter()
        .map(|(name, path)| {
            let branch = config
                .get_string(&format!("submodule.{name}.branch"))
                .unwrap_or_else(|_| DEFAULT_BRANCH.into());
            Submodule { path, branch }
        })
        .collect();

    Ok(submodules)
}

/// Which branch or source to synchronize submodules to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMode {
    Local,
    Master,
    Develop,
    Branch(String),
}

impl Display for SyncMode {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Local => fmt.write_str("local"),
            Self::Master => fmt.write_str("master"),
            Self::Develop => fmt.write_str("develop"),
            Self::Branch(name) => write!(fmt, "branch {name}"),
        }
    }
}

/// Glob patterns restricting which components get synchronized.
///
/// An empty filter lets everything through.
#[derive(Debug, Default, Clone)]
pub struct ComponentFilter {
    patterns: Vec<Pattern>,
}

impl ComponentFilter {
    /// Construct new filter from glob patterns.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::Pattern`] if any pattern is malformed.
    pub fn new(patterns: impl IntoIterator<Item = impl AsRef<str>>) -> Result<Self> {
        let patterns = patterns
            .into_iter()
            .map(|pattern| Pattern::new(pattern.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn matches(&self, component: &str) -> bool {
        self.patterns.is_empty()
            || self
                .patterns
                .iter()
                .any(|pattern| pattern.matches(component.trim_end_matches('/')))
    }
}

/// Result of synchronizing one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Path relative to the project root.
    pub path: String,

    /// What the path was synchronized to, e.g., `origin/develop`.
    pub target: String,

    /// Rendered error chain when synchronization failed.
    pub error: Option<String>,
}

/// Per path results of one synchronization run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub outcomes: Vec<SyncOutcome>,
}

impl SyncReport {
    pub fn failures(&self) -> impl Iterator<Item = &SyncOutcome> {
        self.outcomes.iter().filter(|outcome| outcome.error.is_some())
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    fn record<E: StdError>(&mut self, path: &str, target: String, result: Result<(), E>) {
        let error = result.err().map(|err| render_chain(&err));
        if let Some(error) = &error {
            warn!("failed to sync {path}: {error}");
        }
        self.outcomes.push(SyncOutcome {
            path: path.to_string(),
            target,
            error,
        });
    }
}

/// Synchronize submodules of the project according to mode.
///
/// # Errors
///
/// - Return [`SyncError`] if `.gitmodules` is needed but cannot be read.
///   Failures of individual paths land in the returned [`SyncReport`].
#[instrument(skip(settings, filter, resetter), level = "debug")]
pub fn sync(
    settings: &Settings,
    mode: &SyncMode,
    filter: &ComponentFilter,
    resetter: &impl Resetter,
) -> Result<SyncReport> {
    let mut report = SyncReport::default();
    if *mode == SyncMode::Local {
        sync_local(settings, filter, &mut report);
        return Ok(report);
    }

    let submodules = list_submodules(&settings.root)?
        .into_iter()
        .filter(|submodule| filter.matches(&submodule.path))
        .collect::<Vec<_>>();

    for submodule in submodules {
        let path = settings.root.join(&submodule.path);
        let branch = match mode {
            SyncMode::Local => continue,
            SyncMode::Master => submodule.branch.clone(),
            SyncMode::Develop => {
                if !settings.sync.develop.contains(&submodule.path) {
                    continue;
                }
                DEVELOP_BRANCH.to_string()
            }
            SyncMode::Branch(name) => {
                let step = Step::start(format!("check {ORIGIN}/{name} for {}", submodule.path));
                match resetter.remote_branch_exists(&path, ORIGIN, name, step.bar()) {
                    Ok(true) => {
                        step.finish();
                        name.clone()
                    }
                    Ok(false) => {
                        step.finish();
                        info!(
                            "{} has no branch {name}, falling back to {}",
                            submodule.path, submodule.branch
                        );
                        submodule.branch.clone()
                    }
                    Err(err) => {
                        drop(step);
                        report.record(&submodule.path, format!("{ORIGIN}/{name}"), Err(err));
                        continue;
                    }
                }
            }
        };

        let target = format!("{ORIGIN}/{branch}");
        let step = Step::start(format!("reset {} to {target}", submodule.path));
        let result = resetter.reset(&path, &branch, Some(ORIGIN), step.bar());
        if result.is_ok() {
            step.finish();
        }
        report.record(&submodule.path, target, result);
    }

    Ok(report)
}

fn sync_local(settings: &Settings, filter: &ComponentFilter, report: &mut SyncReport) {
    if settings.sync.local.is_empty() {
        warn!("no local checkouts configured, set NEURO_DIR or DESKTOP_DIR");
        return;
    }

    let layout = settings.layout();
    for (component, checkout) in &settings.sync.local {
        if !filter.matches(component) {
            continue;
        }

        let result = Step::wrap(format!("mirror {}", checkout.display()), || {
            mirror(checkout, layout.component(component))
        });
        report.record::<MirrorError>(component, checkout.display().to_string(), result);
    }
}

fn render_chain(err: &dyn StdError) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

/// Step of a reset that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetStep {
    Open,
    Fetch,
    Reset,
    Clean,
    ListRemote,
}

impl Display for ResetStep {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let step = match self {
            Self::Open => "open",
            Self::Fetch => "fetch",
            Self::Reset => "reset",
            Self::Clean => "clean",
            Self::ListRemote => "list remote branches of",
        };
        fmt.write_str(step)
    }
}

/// Checkout reset error types.
#[derive(Debug, thiserror::Error)]
pub enum ResetError {
    #[error("failed to {step} {:?}", path.display())]
    Git2 {
        step: ResetStep,
        path: PathBuf,
        #[source]
        source: git2::Error,
    },

    #[error("failed to clean {:?}", path.display())]
    Clean {
        path: PathBuf,
        #[source]
        source: MirrorError,
    },
}

impl ResetError {
    fn git(step: ResetStep, path: &Path, source: git2::Error) -> Self {
        Self::Git2 {
            step,
            path: path.to_path_buf(),
            source,
        }
    }

    /// Step that failed.
    pub fn step(&self) -> ResetStep {
        match self {
            Self::Git2 { step, .. } => *step,
            Self::Clean { .. } => ResetStep::Clean,
        }
    }
}

/// Submodule synchronization error types.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("no submodules declared, {:?} does not exist", .0.display())]
    NoGitmodules(PathBuf),

    #[error("failed to read {:?}", path.display())]
    Gitmodules {
        #[source]
        source: git2::Error,
        path: PathBuf,
    },

    #[error(transparent)]
    Pattern(#[from] glob::PatternError),
}

/// Friendly result alias :3
pub type Result<T, E = SyncError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use std::{
        cell::RefCell,
        collections::HashSet,
        fs::{create_dir_all, read_to_string, write},
    };

    fn commit_all(repository: &Repository, message: &str) -> anyhow::Result<()> {
        let mut index = repository.index()?;
        index.add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)?;
        index.write()?;
        let tree = repository.find_tree(index.write_tree()?)?;
        let signature = git2::Signature::now("nfops", "nfops@example.com")?;
        let parent = repository
            .head()
            .ok()
            .and_then(|head| head.peel_to_commit().ok());
        let parents = parent.iter().collect::<Vec<_>>();
        repository.commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)?;

        Ok(())
    }

    struct Upstream {
        _dir: tempfile::TempDir,
        upstream: Repository,
        local: PathBuf,
    }

    impl Upstream {
        fn new() -> anyhow::Result<Self> {
            let dir = tempfile::tempdir()?;
            let upstream_path = dir.path().join("upstream");
            let mut opts = git2::RepositoryInitOptions::new();
            opts.initial_head(DEFAULT_BRANCH);
            let upstream = Repository::init_opts(&upstream_path, &opts)?;
            write(upstream_path.join("README"), "v1")?;
            write(upstream_path.join(".gitignore"), "*.log\n")?;
            commit_all(&upstream, "initial")?;
            let head = upstream.head()?.peel_to_commit()?;
            upstream.branch(DEVELOP_BRANCH, &head, false)?;
            drop(head);

            let local = dir.path().join("local");
            Repository::clone(&upstream_path.to_string_lossy(), &local)?;

            Ok(Self {
                _dir: dir,
                upstream,
                local,
            })
        }

        fn commit(&self, file: &str, content: &str) -> anyhow::Result<()> {
            let workdir = self.upstream.workdir().unwrap();
            write(workdir.join(file), content)?;
            commit_all(&self.upstream, "update")
        }
    }

    #[test]
    fn reset_discards_local_state_and_follows_remote() -> anyhow::Result<()> {
        let fixture = Upstream::new()?;
        write(fixture.local.join("README"), "dirty")?;
        write(fixture.local.join("scratch.txt"), "untracked")?;
        write(fixture.local.join("debug.log"), "ignored")?;
        create_dir_all(fixture.local.join("tmp/deep"))?;
        write(fixture.local.join("tmp/deep/x"), "x")?;
        fixture.commit("README", "v2")?;

        Git2Resetter::new().reset(
            &fixture.local,
            DEFAULT_BRANCH,
            Some(ORIGIN),
            &ProgressBar::hidden(),
        )?;

        assert_eq!(read_to_string(fixture.local.join("README"))?, "v2");
        assert!(fixture.local.join(".gitignore").is_file());
        assert!(!fixture.local.join("scratch.txt").exists());
        assert!(!fixture.local.join("debug.log").exists());
        assert!(!fixture.local.join("tmp").exists());

        Ok(())
    }

    #[test]
    fn reset_leaves_nested_repositories_alone() -> anyhow::Result<()> {
        let fixture = Upstream::new()?;
        let nested = fixture.local.join("nested");
        Repository::init(&nested)?;
        write(nested.join("file"), "keep")?;

        Git2Resetter::new().reset(
            &fixture.local,
            DEFAULT_BRANCH,
            Some(ORIGIN),
            &ProgressBar::hidden(),
        )?;

        assert!(nested.join("file").is_file());

        Ok(())
    }

    #[test]
    fn reset_to_unknown_branch_fails_at_reset_step() -> anyhow::Result<()> {
        let fixture = Upstream::new()?;

        let err = Git2Resetter::new()
            .reset(&fixture.local, "nope", Some(ORIGIN), &ProgressBar::hidden())
            .unwrap_err();

        assert_eq!(err.step(), ResetStep::Reset);
        assert!(err.to_string().starts_with("failed to reset"));

        Ok(())
    }

    #[test]
    fn reset_outside_repository_fails_at_open_step() {
        let dir = tempfile::tempdir().unwrap();
        let err = Git2Resetter::new()
            .reset(dir.path(), DEFAULT_BRANCH, None, &ProgressBar::hidden())
            .unwrap_err();

        assert_eq!(err.step(), ResetStep::Open);
    }

    #[test]
    fn remote_branch_exists_lists_remote_heads() -> anyhow::Result<()> {
        let fixture = Upstream::new()?;
        let resetter = Git2Resetter::new();
        let bar = ProgressBar::hidden();

        assert!(resetter.remote_branch_exists(&fixture.local, ORIGIN, DEVELOP_BRANCH, &bar)?);
        assert!(!resetter.remote_branch_exists(&fixture.local, ORIGIN, "feature", &bar)?);

        Ok(())
    }

    #[test]
    fn list_submodules_reads_declared_branches() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        write(
            dir.path().join(".gitmodules"),
            indoc! {r#"
                [submodule "tw5"]
                    path = tw5
                    url = https://example.com/tw5.git
                    branch = neuroforest
                [submodule "neuro"]
                    path = neuro
                    url = https://example.com/neuro.git
            "#},
        )?;

        let result = list_submodules(dir.path())?;

        assert_eq!(
            result,
            vec![
                Submodule {
                    path: "tw5".into(),
                    branch: "neuroforest".into()
                },
                Submodule {
                    path: "neuro".into(),
                    branch: DEFAULT_BRANCH.into()
                },
            ]
        );

        Ok(())
    }

    #[test]
    fn component_filter_matches_globs() -> anyhow::Result<()> {
        let filter = ComponentFilter::new(["neuro", "tw5-plugins/*/core"])?;

        assert!(filter.matches("neuro"));
        assert!(filter.matches("tw5-plugins/neuroforest/core"));
        assert!(!filter.matches("desktop"));
        assert!(ComponentFilter::default().matches("anything"));
        assert!(ComponentFilter::new(["[bad"]).is_err());

        Ok(())
    }

    #[derive(Default)]
    struct FakeResetter {
        branches: HashSet<String>,
        broken: HashSet<String>,
        calls: RefCell<Vec<(String, String)>>,
    }

    impl FakeResetter {
        fn name(path: &Path) -> String {
            path.file_name().unwrap().to_string_lossy().into_owned()
        }
    }

    impl Resetter for FakeResetter {
        fn reset(
            &self,
            path: &Path,
            reference: &str,
            _remote: Option<&str>,
            _bar: &ProgressBar,
        ) -> Result<(), ResetError> {
            let name = Self::name(path);
            self.calls.borrow_mut().push((name.clone(), reference.into()));
            if self.broken.contains(&name) {
                return Err(ResetError::git(
                    ResetStep::Fetch,
                    path,
                    git2::Error::from_str("network down"),
                ));
            }
            Ok(())
        }

        fn remote_branch_exists(
            &self,
            path: &Path,
            _remote: &str,
            branch: &str,
            _bar: &ProgressBar,
        ) -> Result<bool, ResetError> {
            Ok(self
                .branches
                .contains(&format!("{}:{branch}", Self::name(path))))
        }
    }

    fn project() -> anyhow::Result<(tempfile::TempDir, Settings)> {
        let dir = tempfile::tempdir()?;
        write(
            dir.path().join(".gitmodules"),
            indoc! {r#"
                [submodule "neuro"]
                    path = neuro
                [submodule "tw5"]
                    path = tw5
                    branch = neuroforest
                [submodule "desktop"]
                    path = desktop
            "#},
        )?;
        let settings = Settings {
            root: dir.path().to_path_buf(),
            ..Settings::default()
        };
        Ok((dir, settings))
    }

    #[test]
    fn master_mode_uses_declared_branches() -> anyhow::Result<()> {
        let (_dir, settings) = project()?;
        let resetter = FakeResetter::default();

        let report = sync(&settings, &SyncMode::Master, &ComponentFilter::default(), &resetter)?;

        assert!(report.is_success());
        assert_eq!(
            resetter.calls.into_inner(),
            vec![
                ("neuro".to_string(), "master".to_string()),
                ("tw5".to_string(), "neuroforest".to_string()),
                ("desktop".to_string(), "master".to_string()),
            ]
        );

        Ok(())
    }

    #[test]
    fn develop_mode_only_touches_project_owned_submodules() -> anyhow::Result<()> {
        let (_dir, settings) = project()?;
        let resetter = FakeResetter::default();

        sync(&settings, &SyncMode::Develop, &ComponentFilter::default(), &resetter)?;

        assert_eq!(
            resetter.calls.into_inner(),
            vec![
                ("neuro".to_string(), "develop".to_string()),
                ("desktop".to_string(), "develop".to_string()),
            ]
        );

        Ok(())
    }

    #[test]
    fn branch_mode_falls_back_to_declared_branch() -> anyhow::Result<()> {
        let (_dir, settings) = project()?;
        let resetter = FakeResetter {
            branches: HashSet::from(["neuro:feature".to_string()]),
            ..FakeResetter::default()
        };

        let report = sync(
            &settings,
            &SyncMode::Branch("feature".into()),
            &ComponentFilter::default(),
            &resetter,
        )?;

        assert_eq!(
            report
                .outcomes
                .iter()
                .map(|outcome| outcome.target.as_str())
                .collect::<Vec<_>>(),
            vec!["origin/feature", "origin/neuroforest", "origin/master"]
        );

        Ok(())
    }

    #[test]
    fn one_failing_path_does_not_stop_the_rest() -> anyhow::Result<()> {
        let (_dir, settings) = project()?;
        let resetter = FakeResetter {
            broken: HashSet::from(["neuro".to_string()]),
            ..FakeResetter::default()
        };

        let report = sync(&settings, &SyncMode::Master, &ComponentFilter::default(), &resetter)?;

        assert!(!report.is_success());
        assert_eq!(report.outcomes.len(), 3);
        let failures = report.failures().collect::<Vec<_>>();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].path, "neuro");
        assert!(failures[0]
            .error
            .as_deref()
            .unwrap_or_default()
            .contains("network down"));

        Ok(())
    }

    #[test]
    fn filter_restricts_synchronized_paths() -> anyhow::Result<()> {
        let (_dir, settings) = project()?;
        let resetter = FakeResetter::default();
        let filter = ComponentFilter::new(["tw*"])?;

        sync(&settings, &SyncMode::Master, &filter, &resetter)?;

        assert_eq!(
            resetter.calls.into_inner(),
            vec![("tw5".to_string(), "neuroforest".to_string())]
        );

        Ok(())
    }

    #[test]
    fn local_mode_mirrors_configured_checkouts() -> anyhow::Result<()> {
        let (dir, mut settings) = project()?;
        let checkout = dir.path().join("elsewhere/neuro");
        create_dir_all(checkout.join(".git"))?;
        write(checkout.join("lib.py"), "pass")?;
        settings.sync.local.insert("neuro".into(), checkout);

        let report = sync(
            &settings,
            &SyncMode::Local,
            &ComponentFilter::default(),
            &FakeResetter::default(),
        )?;

        assert!(report.is_success());
        assert!(dir.path().join("neuro/lib.py").is_file());
        assert!(!dir.path().join("neuro/.git").exists());

        Ok(())
    }

    #[test]
    fn missing_gitmodules_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            root: dir.path().to_path_buf(),
            ..Settings::default()
        };

        let result = sync(
            &settings,
            &SyncMode::Master,
            &ComponentFilter::default(),
            &FakeResetter::default(),
        );

        assert!(matches!(result, Err(SyncError::NoGitmodules(_))));
    }
}
