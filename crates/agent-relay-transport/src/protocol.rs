//! Wire protocol of the relay service's HTTP endpoints.

use agent_relay_core::{ClientId, ClientInfo, LogEntry};
use serde::{Deserialize, Serialize};

/// `GET /clients` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientsResponse {
    pub clients: Vec<ClientRecord>,
}

/// One client as reported by the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRecord {
    pub client_id: ClientId,
    pub addr: WireAddr,
    #[serde(default)]
    pub userinfo: String,
    #[serde(default)]
    pub shell_active: bool,
}

impl From<ClientRecord> for ClientInfo {
    fn from(record: ClientRecord) -> Self {
        Self {
            id: record.client_id,
            address: record.addr.to_string(),
            userinfo: record.userinfo,
            shell_active: record.shell_active,
        }
    }
}

/// Peer address: either preformatted or a `[host, port]` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireAddr {
    Text(String),
    HostPort(String, u16),
}

impl std::fmt::Display for WireAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::HostPort(host, port) => write!(f, "{host}:{port}"),
        }
    }
}

/// `GET /logs/{client_id}` response: the full tail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsResponse {
    pub logs: Vec<LogEntry>,
}

/// `GET /shell_ready/{client_id}` response.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ShellReadyResponse {
    pub ready: bool,
}

/// `POST /send_command` body.
#[derive(Debug, Clone, Serialize)]
pub struct SendCommandRequest<'a> {
    pub client_id: &'a ClientId,
    pub command: &'a str,
}

/// Result body shared by the mutating endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub result: String,
}
