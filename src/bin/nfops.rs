// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use nfops::{
    base::{ContainerManager, DockerCli},
    bundle::{assemble_wiki_tree, BundleReport},
    config::{Environment, Settings},
    desktop::{
        build::DesktopBuild,
        link::{dispatch, DeepLink, WikiClient},
        process::{DesktopProcess, ProcessError},
    },
    mirror::mirror,
    prompt::{Confirm, InquireConfirm, Preset},
    runtime::RuntimeSdk,
    submodule::{sync, ComponentFilter, Git2Resetter, SyncMode},
    suite::{SuiteComponent, SuiteRunner},
    syscall::Step,
};

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use std::{path::PathBuf, process::exit};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "nfops [options] <command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Environment to run in, overriding ENVIRONMENT.
    #[arg(short, long, global = true, value_name = "name")]
    pub environment: Option<Environment>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    async fn run(self) -> Result<()> {
        let mut settings = Settings::load()?;
        if let Some(environment) = self.environment {
            settings.environment = environment;
        }
        settings.enter()?;

        match self.command {
            Command::Bundle => run_bundle(&settings).map(|_| ()),
            Command::Build(opts) => run_build(&settings, opts).await,
            Command::Run(opts) => run_run(&settings, opts).await,
            Command::Stop(opts) => run_stop(&settings, opts),
            Command::Up(opts) => run_up(&settings, opts).await,
            Command::Down(opts) => run_down(&settings, opts),
            Command::Sync(opts) => run_sync(&settings, opts),
            Command::Test(opts) => run_test(&settings, opts),
            Command::Base(opts) => run_base(&settings, opts).await,
            Command::Runtime(opts) => run_runtime(&settings, opts).await,
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Bundle editions and plugins into the wiki engine tree.
    #[command(override_usage = "nfops bundle")]
    Bundle,

    /// Assemble desktop build directory.
    #[command(override_usage = "nfops build [options]")]
    Build(BuildOptions),

    /// Launch desktop app, or hand a neuro:// link to the running app.
    #[command(override_usage = "nfops run [options] [<link>]")]
    Run(RunOptions),

    /// Close desktop app.
    #[command(override_usage = "nfops stop [options]")]
    Stop(BuildDirOptions),

    /// Start neurobase, then launch desktop app.
    #[command(override_usage = "nfops up [options]")]
    Up(BuildDirOptions),

    /// Close desktop app, then stop neurobase.
    #[command(override_usage = "nfops down [options]")]
    Down(BuildDirOptions),

    /// Reset submodules or mirror local checkouts.
    #[command(override_usage = "nfops sync <mode> [<component>]...")]
    Sync(SyncOptions),

    /// Run test suites.
    #[command(override_usage = "nfops test [<component>]... [-- <args>...]")]
    Test(TestOptions),

    /// Manage neurobase database container.
    #[command(override_usage = "nfops base <action> [options]")]
    Base(BaseOptions),

    /// Download and extract NW.js runtime SDK.
    #[command(override_usage = "nfops runtime [options]")]
    Runtime(RuntimeOptions),
}

#[derive(Args, Clone, Debug)]
struct BuildDirOptions {
    /// Build directory to use instead of the configured one.
    #[arg(short, long, value_name = "path")]
    pub build_dir: Option<PathBuf>,
}

#[derive(Args, Clone, Debug)]
struct BuildOptions {
    #[command(flatten)]
    pub target: BuildDirOptions,

    /// Overwrite existing build directory without asking.
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Args, Clone, Debug)]
struct RunOptions {
    /// Link of the form neuro://<id> to open in the running app.
    #[arg(value_name = "link")]
    pub link: Option<String>,

    #[command(flatten)]
    pub target: BuildDirOptions,
}

#[derive(Args, Clone, Debug)]
#[group(id = "mode", required = true, multiple = false)]
struct SyncModeOptions {
    /// Mirror configured local checkouts into the project.
    #[arg(short, long)]
    pub local: bool,

    /// Reset every submodule to its configured branch.
    #[arg(short, long)]
    pub master: bool,

    /// Reset project owned submodules to develop.
    #[arg(short, long)]
    pub develop: bool,

    /// Reset every submodule to branch, falling back to its configured one.
    #[arg(short, long, value_name = "branch")]
    pub branch: Option<String>,
}

impl SyncModeOptions {
    fn mode(self) -> SyncMode {
        if self.local {
            SyncMode::Local
        } else if self.develop {
            SyncMode::Develop
        } else if let Some(branch) = self.branch {
            SyncMode::Branch(branch)
        } else {
            SyncMode::Master
        }
    }
}

#[derive(Args, Clone, Debug)]
struct SyncOptions {
    #[command(flatten)]
    pub mode: SyncModeOptions,

    /// Glob patterns selecting components to synchronize.
    #[arg(value_name = "component")]
    pub components: Vec<String>,
}

#[derive(Args, Clone, Debug)]
struct TestOptions {
    /// Components to test, one of app, library, or wiki. Defaults to all.
    #[arg(value_name = "component")]
    pub components: Vec<SuiteComponent>,

    /// Extra arguments for the app test command.
    #[arg(last = true, value_name = "args")]
    pub args: Vec<String>,
}

#[derive(Args, Clone, Debug)]
struct BaseOptions {
    #[command(subcommand)]
    pub action: BaseAction,
}

#[derive(Debug, Clone, Subcommand)]
enum BaseAction {
    /// Create container unless it exists.
    Create(BaseNameOptions),

    /// Create if needed, start, then wait for the database.
    Start(BaseNameOptions),

    /// Stop container if it runs.
    Stop(BaseNameOptions),
}

#[derive(Args, Clone, Debug)]
struct BaseNameOptions {
    /// Container name to use instead of the configured one.
    #[arg(short, long, value_name = "name")]
    pub name: Option<String>,
}

#[derive(Args, Clone, Debug)]
struct RuntimeOptions {
    /// Release to fetch instead of the configured one.
    #[arg(short, long, value_name = "version")]
    pub version: Option<String>,

    /// Download and extract again even if cached.
    #[arg(short, long)]
    pub overwrite: bool,
}

#[tokio::main]
async fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run().await {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

async fn run() -> Result<()> {
    Cli::parse().run().await
}

fn run_bundle(settings: &Settings) -> Result<BundleReport> {
    let layout = settings.layout();
    Ok(assemble_wiki_tree(
        layout.editions_source(),
        layout.plugins_source(),
        layout.tw5(),
    )?)
}

async fn run_build(settings: &Settings, opts: BuildOptions) -> Result<()> {
    let layout = settings.layout();
    let build_dir = settings.build_dir(opts.target.build_dir.as_deref());

    if let Some(checkout) = settings.sync.local.get("desktop") {
        Step::wrap(format!("mirror {}", checkout.display()), || {
            mirror(checkout, layout.component("desktop"))
        })?;
    }
    run_bundle(settings)?;
    let sdk = RuntimeSdk::new(layout.runtime_dir(), &settings.runtime)
        .fetch(false)
        .await?;

    let confirm: Box<dyn Confirm> = if opts.yes {
        Box::new(Preset(true))
    } else {
        Box::new(InquireConfirm)
    };
    DesktopBuild::from_settings(settings, build_dir, sdk).assemble(confirm.as_ref())?;

    Ok(())
}

async fn run_run(settings: &Settings, opts: RunOptions) -> Result<()> {
    if let Some(link) = opts.link {
        let link: DeepLink = link.parse()?;
        let client = WikiClient::new(settings.desktop.port)?;
        dispatch(&link, &client).await?;
        return Ok(());
    }

    launch(settings, &opts.target).await
}

async fn launch(settings: &Settings, opts: &BuildDirOptions) -> Result<()> {
    let process = DesktopProcess::new(
        settings.build_dir(opts.build_dir.as_deref()),
        settings.desktop.launch_grace(),
    );
    if !process.binary().is_file() {
        bail!(ProcessError::MissingBinary(process.binary()));
    }

    ContainerManager::from_settings(settings, DockerCli, None)?
        .verify()
        .await?;
    process.start().await?;

    Ok(())
}

fn run_stop(settings: &Settings, opts: BuildDirOptions) -> Result<()> {
    let process = DesktopProcess::new(
        settings.build_dir(opts.build_dir.as_deref()),
        settings.desktop.launch_grace(),
    );
    process.stop()?;

    Ok(())
}

async fn run_up(settings: &Settings, opts: BuildDirOptions) -> Result<()> {
    ContainerManager::from_settings(settings, DockerCli, None)?
        .ensure_running()
        .await?;
    launch(settings, &opts).await
}

fn run_down(settings: &Settings, opts: BuildDirOptions) -> Result<()> {
    run_stop(settings, opts)?;
    ContainerManager::from_settings(settings, DockerCli, None)?.stop()?;

    Ok(())
}

fn run_sync(settings: &Settings, opts: SyncOptions) -> Result<()> {
    let mode = opts.mode.mode();
    let filter = ComponentFilter::new(&opts.components)?;
    info!("sync submodules ({mode})");

    let report = sync(settings, &mode, &filter, &Git2Resetter::new())?;
    let failed = report.failures().count();
    if failed > 0 {
        bail!("{failed} of {} paths failed to sync", report.outcomes.len());
    }
    info!("✓ synced {} paths", report.outcomes.len());

    Ok(())
}

fn run_test(settings: &Settings, opts: TestOptions) -> Result<()> {
    SuiteRunner::new(settings, opts.args).run(&opts.components)?;

    Ok(())
}

async fn run_base(settings: &Settings, opts: BaseOptions) -> Result<()> {
    match opts.action {
        BaseAction::Create(opts) => {
            ContainerManager::from_settings(settings, DockerCli, opts.name.as_deref())?.create()?;
        }
        BaseAction::Start(opts) => {
            ContainerManager::from_settings(settings, DockerCli, opts.name.as_deref())?
                .ensure_running()
                .await?;
        }
        BaseAction::Stop(opts) => {
            ContainerManager::from_settings(settings, DockerCli, opts.name.as_deref())?.stop()?;
        }
    }

    Ok(())
}

async fn run_runtime(settings: &Settings, opts: RuntimeOptions) -> Result<()> {
    let mut runtime = settings.runtime.clone();
    if let Some(version) = opts.version {
        runtime.version = version;
    }

    let sdk = RuntimeSdk::new(settings.layout().runtime_dir(), &runtime)
        .fetch(opts.overwrite)
        .await?;
    info!("✓ runtime ready at {}", sdk.display());

    Ok(())
}
