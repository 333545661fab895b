// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Desktop application handling.
//!
//! The desktop app is an NW.js runtime that serves the assembled wiki tree.
//! A __build directory__ holds everything the app needs to run: the runtime
//! SDK at its root, the wiki tree under `tw5/`, the application source under
//! `source/`, and a rewritten `package.json` manifest. While the app runs,
//! its pid is tracked in `nw.pid` inside the same directory.
//!
//! # See Also
//!
//! 1. [`build`] for assembling the build directory.
//! 2. [`process`] for starting and stopping the app.
//! 3. [`link`] for handing `neuro://` links to a running app.

pub mod build;
pub mod link;
pub mod process;

/// Runtime binary at the root of the build directory.
pub const BINARY: &str = "nw";

/// PID record of the running app, inside the build directory.
pub const PID_FILE: &str = "nw.pid";

/// Application manifest at the root of the build directory.
pub const MANIFEST: &str = "package.json";
