//! Client identity and the transport seam to the remote relay service.

use std::{convert::Infallible, fmt, str::FromStr};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::LogEntry;

/// Identifier the remote service assigns to a connected agent.
///
/// Kept in the shape the service used (number or string) so it round-trips
/// unchanged into request bodies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientId {
    Numeric(u64),
    Text(String),
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl FromStr for ClientId {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(s.parse::<u64>()
            .map_or_else(|_| Self::Text(s.to_string()), Self::Numeric))
    }
}

impl From<u64> for ClientId {
    fn from(n: u64) -> Self {
        Self::Numeric(n)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for ClientId {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

/// One entry of the service's client list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub id: ClientId,
    pub address: String,
    pub userinfo: String,
    /// Whether the service already considers the agent's shell active.
    pub shell_active: bool,
}

/// Failure talking to the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error("Relay service unreachable: {0}")]
    Unreachable(String),
    #[error("Unexpected response from relay service: {0}")]
    Protocol(String),
}

/// Stateless transport to the remote relay service.
///
/// This is the only seam that performs I/O. `send_command` must never be
/// retried by an implementation: a retry could execute the command twice.
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// List currently connected agents, in service order.
    async fn list_clients(&self) -> Result<Vec<ClientInfo>, RelayError>;

    /// Fetch the complete known log tail for an agent.
    async fn fetch_logs(&self, id: &ClientId) -> Result<Vec<LogEntry>, RelayError>;

    /// Ask whether the agent's shell is ready.
    async fn shell_ready(&self, id: &ClientId) -> Result<bool, RelayError>;

    /// Dispatch command text; returns the service's human-readable result.
    async fn send_command(&self, id: &ClientId, command: &str) -> Result<String, RelayError>;

    /// Clear the service-side log for an agent.
    async fn clear_logs(&self, id: &ClientId) -> Result<String, RelayError>;

    /// Ask the service to drop its connection to an agent.
    async fn disconnect(&self, id: &ClientId) -> Result<String, RelayError>;
}
