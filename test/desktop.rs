// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::ProjectFixture;

use anyhow::Result;
use nfops::{
    bundle::assemble_wiki_tree,
    desktop::{
        build::{BuildError, DesktopBuild},
        process::{DesktopProcess, Stop},
    },
    prompt::Preset,
};
use pretty_assertions::assert_eq;
use serde_json::Value;
use std::{fs::read_to_string, path::Path, time::Duration};

const EDITION: &str = r#"{"description":"Empty","plugins":[],"themes":[],"build":{}}"#;

fn neuroforest() -> Result<ProjectFixture> {
    let project = ProjectFixture::new()?;
    for (path, contents) in [
        ("tw5/tiddlywiki.js", "// engine"),
        ("tw5-editions/empty/tiddlywiki.info", EDITION),
        ("tw5-editions/broken/tiddlywiki.info", "{"),
        (
            "tw5-plugins/neuroforest/core/plugin.info",
            r#"{"title":"$:/plugins/neuroforest/core","description":"Core"}"#,
        ),
        (
            "tw5-plugins/neuroforest/core/core.js",
            "// core",
        ),
        (
            "tw5-plugins/neuroforest/dark/plugin.info",
            r#"{"title":"$:/themes/neuroforest/dark","description":"Dark","plugin-type":"theme"}"#,
        ),
        (
            "tw5-plugins/neuroforest/untitled/plugin.info",
            r#"{"description":"No title"}"#,
        ),
        ("nwjs/v0.94.0/nw", "#!/bin/sh\n"),
        ("desktop/VERSION", "2.0.1\n"),
        ("desktop/source/index.html", "<html/>"),
        (
            "desktop/source/package.json",
            r#"{"name":"source","main":"index.html"}"#,
        ),
    ] {
        project.write(path, contents)?;
    }

    Ok(project)
}

fn tree(root: &Path) -> Vec<String> {
    let mut entries = ignore::WalkBuilder::new(root)
        .standard_filters(false)
        .build()
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            entry
                .path()
                .strip_prefix(root)
                .ok()
                .map(|path| path.to_string_lossy().into_owned())
        })
        .collect::<Vec<_>>();
    entries.sort();
    entries
}

#[test]
fn bundle_is_idempotent_and_skips_invalid_units() -> Result<()> {
    let project = neuroforest()?;
    let layout = project.settings().layout();

    let first = assemble_wiki_tree(
        layout.editions_source(),
        layout.plugins_source(),
        layout.tw5(),
    )?;
    let before = tree(&layout.tw5());
    let second = assemble_wiki_tree(
        layout.editions_source(),
        layout.plugins_source(),
        layout.tw5(),
    )?;

    assert_eq!(first, second);
    assert_eq!(tree(&layout.tw5()), before);
    assert_eq!(first.editions.len(), 1);
    assert_eq!(first.plugins.len(), 1);
    assert_eq!(first.themes.len(), 1);
    assert!(layout.tw5().join("plugins/neuroforest/core/core.js").is_file());
    assert!(layout.tw5().join("themes/neuroforest/dark/plugin.info").is_file());
    assert!(!layout.tw5().join("editions/broken").exists());
    assert!(!layout.tw5().join("plugins/neuroforest/untitled").exists());

    Ok(())
}

#[test]
fn bundle_then_build_produces_runnable_tree() -> Result<()> {
    let project = neuroforest()?;
    let mut settings = project.settings();
    settings.desktop.install = vec!["true".into()];
    let layout = settings.layout();
    assemble_wiki_tree(
        layout.editions_source(),
        layout.plugins_source(),
        layout.tw5(),
    )?;

    let build_dir = settings.default_build_dir();
    DesktopBuild::from_settings(&settings, &build_dir, layout.runtime_dir().join("v0.94.0"))
        .assemble(&Preset(false))?;

    assert!(build_dir.join("nw").is_file());
    assert!(build_dir
        .join("tw5/plugins/neuroforest/core/plugin.info")
        .is_file());
    assert!(build_dir.join("source/index.html").is_file());
    let manifest: Value = serde_json::from_str(&read_to_string(build_dir.join("package.json"))?)?;
    assert_eq!(manifest["name"], "NeuroDesktop");
    assert_eq!(manifest["version"], "2.0.1");
    assert_eq!(manifest["main"], "index.html");

    let rebuild =
        DesktopBuild::from_settings(&settings, &build_dir, layout.runtime_dir().join("v0.94.0"))
            .assemble(&Preset(false));
    assert!(matches!(rebuild, Err(BuildError::Aborted(_))));
    assert!(build_dir.join("package.json").is_file());

    Ok(())
}

#[test]
fn stop_without_running_app_is_harmless() -> Result<()> {
    let project = neuroforest()?;
    let settings = project.settings();
    let process = DesktopProcess::new(settings.default_build_dir(), Duration::from_millis(100));

    assert_eq!(process.stop()?, Stop::NotRunning);

    Ok(())
}
