// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Build and operations tooling for the NeuroForest desktop application.
//!
//! A NeuroForest checkout is a superproject made of git submodules: the wiki
//! engine, edition and plugin sources, a python library, and the desktop app
//! itself. nfops keeps those pieces in sync, bundles editions and plugins into
//! the wiki engine tree, assembles a runnable desktop build on top of the
//! NW.js runtime SDK, and manages the processes the build depends on at
//! runtime, i.e., the desktop app and its graph database container.
//!
//! # Bundle Units
//!
//! Editions and plugins are __bundle units__: directories holding one JSON
//! manifest. Units whose manifest does not validate are skipped with a
//! warning. They never abort a run, and they never reach the wiki tree.
//!
//! # Copy-Replace
//!
//! Every copy nfops makes deletes its destination first. Running the same
//! operation twice against the same sources yields the same tree.

pub mod base;
pub mod bundle;
pub mod config;
pub mod desktop;
pub mod manifest;
pub mod mirror;
pub mod path;
pub mod prompt;
pub mod readiness;
pub mod runtime;
pub mod submodule;
pub mod suite;
pub mod syscall;

pub use config::Settings;
