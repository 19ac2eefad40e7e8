//! HTTP transport to the remote agent relay service.
//!
//! Provides:
//! - Wire protocol types for the relay endpoints
//! - `HttpRelayClient`, the `RelayTransport` implementation over reqwest

pub mod http;
pub mod protocol;

pub use http::{ClientBuildError, HttpRelayClient};
pub use protocol::{ClientRecord, ClientsResponse, CommandResult, LogsResponse, ShellReadyResponse};
