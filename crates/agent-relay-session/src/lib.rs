//! Session orchestration for remote agents.
//!
//! Provides:
//! - `SessionManager` - Track agents, dispatch commands, watch shell readiness
//! - `SessionSnapshot` - Read-only view of one session

pub mod manager;
mod session;

pub use manager::{
    Activation, CommandOutcome, ManagerError, SEND_FAILED_FEEDBACK, SHELL_START_FAILED_FEEDBACK,
    SHELL_STARTING_FEEDBACK, SessionManager,
};
pub use session::SessionSnapshot;
