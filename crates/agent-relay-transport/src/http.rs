//! reqwest-backed transport to the relay service.

use agent_relay_core::{ClientId, ClientInfo, LogEntry, RelayConfig, RelayError, RelayTransport};
use async_trait::async_trait;
use reqwest::Url;
use serde::{Serialize, de::DeserializeOwned};

use crate::protocol::{
    ClientsResponse, CommandResult, LogsResponse, SendCommandRequest, ShellReadyResponse,
};

const CLIENTS_PATH: &str = "clients";
const LOGS_PATH: &str = "logs";
const SHELL_READY_PATH: &str = "shell_ready";
const SEND_COMMAND_PATH: &str = "send_command";
const CLEAR_LOGS_PATH: &str = "clear_responses";
const DISCONNECT_PATH: &str = "kill_connection";

/// Error building an [`HttpRelayClient`].
#[derive(Debug, thiserror::Error)]
pub enum ClientBuildError {
    #[error("Invalid base URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("Failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// HTTP client for the relay service.
///
/// Holds no session state. Requests are never retried here; in particular a
/// failed `send_command` is reported once and left to the operator.
#[derive(Debug, Clone)]
pub struct HttpRelayClient {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpRelayClient {
    /// Create a client rooted at `base_url` with no request timeout.
    ///
    /// # Errors
    /// Returns error if the URL cannot serve as a base or the HTTP client
    /// cannot be built.
    pub fn new(base_url: &str) -> Result<Self, ClientBuildError> {
        Self::with_http(base_url, reqwest::Client::builder().build()?)
    }

    /// Create a client from a resolved configuration.
    ///
    /// # Errors
    /// Returns error if the URL cannot serve as a base or the HTTP client
    /// cannot be built.
    pub fn from_config(config: &RelayConfig) -> Result<Self, ClientBuildError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        Self::with_http(&config.base_url, builder.build()?)
    }

    /// Create a client around an existing `reqwest::Client`.
    ///
    /// # Errors
    /// Returns error if the URL cannot serve as a base.
    pub fn with_http(base_url: &str, http: reqwest::Client) -> Result<Self, ClientBuildError> {
        let invalid = |reason: String| ClientBuildError::InvalidUrl {
            url: base_url.to_string(),
            reason,
        };
        let parsed = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
        if parsed.cannot_be_a_base() {
            return Err(invalid("URL cannot be a base".to_string()));
        }
        Ok(Self {
            http,
            base_url: parsed,
        })
    }

    /// Service root this client talks to.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, RelayError> {
        let url = self.endpoint(segments);
        tracing::debug!(%url, "GET");
        let response = self.http.get(url.clone()).send().await.map_err(unreachable)?;
        decode(&url, response).await
    }

    async fn post_json<B, T>(&self, segments: &[&str], body: Option<&B>) -> Result<T, RelayError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let url = self.endpoint(segments);
        tracing::debug!(%url, "POST");
        let mut request = self.http.post(url.clone());
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.map_err(unreachable)?;
        decode(&url, response).await
    }
}

fn unreachable(e: reqwest::Error) -> RelayError {
    RelayError::Unreachable(e.to_string())
}

async fn decode<T: DeserializeOwned>(url: &Url, response: reqwest::Response) -> Result<T, RelayError> {
    let status = response.status();
    if !status.is_success() {
        return Err(RelayError::Unreachable(format!("{url} returned {status}")));
    }
    let body = response.bytes().await.map_err(unreachable)?;
    serde_json::from_slice(&body).map_err(|e| RelayError::Protocol(format!("{url}: {e}")))
}

#[async_trait]
impl RelayTransport for HttpRelayClient {
    async fn list_clients(&self) -> Result<Vec<ClientInfo>, RelayError> {
        let response: ClientsResponse = self.get_json(&[CLIENTS_PATH]).await?;
        Ok(response.clients.into_iter().map(Into::into).collect())
    }

    async fn fetch_logs(&self, id: &ClientId) -> Result<Vec<LogEntry>, RelayError> {
        let id = id.to_string();
        let response: LogsResponse = self.get_json(&[LOGS_PATH, id.as_str()]).await?;
        Ok(response.logs.into_iter().map(LogEntry::sanitized).collect())
    }

    async fn shell_ready(&self, id: &ClientId) -> Result<bool, RelayError> {
        let id = id.to_string();
        let response: ShellReadyResponse = self.get_json(&[SHELL_READY_PATH, id.as_str()]).await?;
        Ok(response.ready)
    }

    async fn send_command(&self, id: &ClientId, command: &str) -> Result<String, RelayError> {
        let body = SendCommandRequest {
            client_id: id,
            command,
        };
        let response: CommandResult = self.post_json(&[SEND_COMMAND_PATH], Some(&body)).await?;
        Ok(response.result)
    }

    async fn clear_logs(&self, id: &ClientId) -> Result<String, RelayError> {
        let id = id.to_string();
        let response: CommandResult = self
            .post_json::<(), _>(&[CLEAR_LOGS_PATH, id.as_str()], None)
            .await?;
        Ok(response.result)
    }

    async fn disconnect(&self, id: &ClientId) -> Result<String, RelayError> {
        let id = id.to_string();
        let response: CommandResult = self
            .post_json::<(), _>(&[DISCONNECT_PATH, id.as_str()], None)
            .await?;
        Ok(response.result)
    }
}
