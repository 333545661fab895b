// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Confirmation of destructive actions.
//!
//! Operations that would destroy existing data ask a [`Confirm`] first. At a
//! terminal the question goes to the user. Anywhere else a decision must be
//! preset, e.g., through `--yes`, or the question fails instead of silently
//! picking an answer.

use inquire::Confirm as InquireConfirmPrompt;
use std::io::IsTerminal;

/// Source of yes/no decisions.
pub trait Confirm {
    /// Ask question, returning the decision.
    ///
    /// # Errors
    ///
    /// - Return [`PromptError`] if no decision can be obtained.
    fn confirm(&self, question: &str) -> Result<bool>;
}

/// Ask the user at the terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct InquireConfirm;

impl Confirm for InquireConfirm {
    fn confirm(&self, question: &str) -> Result<bool> {
        if !std::io::stdin().is_terminal() {
            return Err(PromptError::NotInteractive(question.into()));
        }

        Ok(InquireConfirmPrompt::new(question)
            .with_default(false)
            .prompt()?)
    }
}

/// Fixed decision made ahead of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preset(pub bool);

impl Confirm for Preset {
    fn confirm(&self, question: &str) -> Result<bool> {
        tracing::debug!("{question} [preset {}]", self.0);
        Ok(self.0)
    }
}

/// Confirmation error types.
#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("cannot ask {0:?} without a terminal, pass --yes to confirm")]
    NotInteractive(String),

    #[error(transparent)]
    Inquire(#[from] inquire::InquireError),
}

/// Friendly result alias :3
pub type Result<T, E = PromptError> = std::result::Result<T, E>;
