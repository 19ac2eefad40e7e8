//! Core building blocks for relaying commands and log tails to remote agents.
//!
//! This crate provides the I/O-free pieces:
//! - `LogStore` - Full-tail log buffer with change notification
//! - `ShellStateTracker` - Shell activation lifecycle
//! - `PollLoop` - Cancellable recurring poll with at-most-one in flight
//! - `ViewportScrollPolicy` - Auto-scroll decision for log viewers
//! - `RelayTransport` - The seam to the remote relay service
//! - `RelayConfig` - Layered configuration

pub mod config;
pub mod log_entry;
pub mod log_store;
pub mod poll_loop;
pub mod scroll;
pub mod shell_state;
pub mod traits;

pub use config::{ConfigError, RelayConfig};
pub use log_entry::{LogEntry, LogLevel};
pub use log_store::{LogSnapshot, LogStore};
pub use poll_loop::PollLoop;
pub use scroll::{ScrollAction, ScrollIntent, Viewport, ViewportScrollPolicy};
pub use shell_state::{START_SHELL_COMMAND, ShellState, ShellStateTracker, TransitionError};
pub use traits::{ClientId, ClientInfo, RelayError, RelayTransport};
