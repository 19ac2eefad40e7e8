//! Shell activation lifecycle for a single agent.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Control token that asks an agent to start its interactive shell.
///
/// Sent through the regular command path but never authored by the operator.
pub const START_SHELL_COMMAND: &str = "start_shell";

/// Shell lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShellState {
    /// No activation requested yet.
    #[default]
    Inactive,
    /// Activation sent, waiting for the readiness probe.
    Starting,
    /// The agent reported its shell ready.
    Active,
}

impl fmt::Display for ShellState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Inactive => "inactive",
            Self::Starting => "starting",
            Self::Active => "active",
        })
    }
}

/// Rejected shell transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Shell activation already requested (state: {0})")]
    AlreadyRequested(ShellState),
}

/// Tracks `Inactive -> Starting -> Active`.
///
/// `Active` is terminal. A later not-ready report from the service does not
/// move the tracker back; shell teardown is not modelled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShellStateTracker {
    state: ShellState,
}

impl ShellStateTracker {
    /// Create a tracker in `Inactive`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: ShellState::Inactive,
        }
    }

    /// Create a tracker seeded from the service's `shell_active` flag at discovery.
    #[must_use]
    pub const fn from_reported(shell_active: bool) -> Self {
        Self {
            state: if shell_active {
                ShellState::Active
            } else {
                ShellState::Inactive
            },
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ShellState {
        self.state
    }

    /// Whether the shell has been reported ready.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self.state, ShellState::Active)
    }

    /// `Inactive -> Starting`.
    ///
    /// # Errors
    /// Returns `AlreadyRequested` from `Starting` or `Active`; the request is
    /// dropped, not queued.
    pub fn begin_activation(&mut self) -> Result<(), TransitionError> {
        match self.state {
            ShellState::Inactive => {
                self.state = ShellState::Starting;
                Ok(())
            }
            other => Err(TransitionError::AlreadyRequested(other)),
        }
    }

    /// `Starting -> Active`. Returns whether a transition happened.
    pub fn mark_ready(&mut self) -> bool {
        if self.state == ShellState::Starting {
            self.state = ShellState::Active;
            true
        } else {
            false
        }
    }

    /// `Starting -> Inactive`, used when the activation token never reached the
    /// service. Returns whether a transition happened.
    pub fn abort_activation(&mut self) -> bool {
        if self.state == ShellState::Starting {
            self.state = ShellState::Inactive;
            true
        } else {
            false
        }
    }
}
