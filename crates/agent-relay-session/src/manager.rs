//! Session manager: the single owner of tracked agent sessions.

use std::{collections::HashSet, ops::ControlFlow, sync::Arc, time::Duration};

use agent_relay_core::{
    ClientId, LogSnapshot, PollLoop, RelayConfig, RelayError, RelayTransport, START_SHELL_COMMAND,
    ShellState, poll_loop::DEFAULT_POLL_INTERVAL,
};
use futures::future::join_all;
use tokio::sync::{RwLock, watch};

use crate::session::{ActivationBlocked, Session, SessionSnapshot};

/// Feedback shown after a successful activation request.
pub const SHELL_STARTING_FEEDBACK: &str = "Shell starting...";
/// Feedback shown when the activation token could not be delivered.
pub const SHELL_START_FAILED_FEEDBACK: &str = "Failed to start shell";
/// Feedback shown when operator command text could not be delivered.
pub const SEND_FAILED_FEEDBACK: &str = "Failed to send command";

/// Session manager error.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("Session not found: {0}")]
    NotFound(ClientId),
    #[error("A command is already pending for session {0}")]
    AlreadyPending(ClientId),
    #[error("Command text is empty")]
    EmptyCommand,
    #[error(transparent)]
    Transport(#[from] RelayError),
}

impl ManagerError {
    /// Whether this came from talking to the service rather than from misuse.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Result of a command dispatch. Transport failures land here, not in `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The service accepted the command; carries its result text.
    Delivered(String),
    /// The command never reached the service.
    Failed(String),
}

impl CommandOutcome {
    /// Feedback text stored on the session.
    #[must_use]
    pub fn feedback(&self) -> &str {
        match self {
            Self::Delivered(s) | Self::Failed(s) => s,
        }
    }

    #[must_use]
    pub const fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered(_))
    }
}

/// Result of a shell activation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    /// Token delivered; the readiness probe is running.
    Requested,
    /// Activation already requested or completed; nothing was sent.
    Ignored(ShellState),
    /// Token could not be delivered; the shell is back to `Inactive`.
    Failed(String),
}

#[derive(Default)]
struct Registry {
    sessions: Vec<Arc<Session>>,
    selected: Option<ClientId>,
}

impl Registry {
    fn find(&self, id: &ClientId) -> Option<&Arc<Session>> {
        self.sessions.iter().find(|s| s.id() == id)
    }

    fn ensure_selection(&mut self) {
        if self
            .selected
            .as_ref()
            .is_some_and(|id| self.find(id).is_none())
        {
            self.selected = None;
        }
        if self.selected.is_none() {
            self.selected = self.sessions.first().map(|s| s.id().clone());
        }
    }
}

/// Owns every tracked session and mediates all dispatch to the service.
///
/// Operations on different sessions never wait on each other: the registry
/// lock is only held to look sessions up, and per-session state is only
/// locked for field updates. Operations on the same session are serialised
/// by its pending-command slot and shell state.
pub struct SessionManager<T>
where
    T: RelayTransport + 'static,
{
    transport: Arc<T>,
    registry: RwLock<Registry>,
    poll_interval: Duration,
}

impl<T> SessionManager<T>
where
    T: RelayTransport + 'static,
{
    /// Create a manager with the default readiness poll cadence.
    #[must_use]
    pub fn new(transport: Arc<T>) -> Self {
        Self::with_poll_interval(transport, DEFAULT_POLL_INTERVAL)
    }

    /// Create a manager using the cadence from `config`.
    #[must_use]
    pub fn with_config(transport: Arc<T>, config: &RelayConfig) -> Self {
        Self::with_poll_interval(transport, config.poll_interval)
    }

    /// Create a manager with an explicit readiness poll cadence.
    #[must_use]
    pub fn with_poll_interval(transport: Arc<T>, poll_interval: Duration) -> Self {
        Self {
            transport,
            registry: RwLock::new(Registry::default()),
            poll_interval,
        }
    }

    /// Reconcile the tracked sessions with the service's client list.
    ///
    /// New ids get a session, vanished ids are dropped (cancelling their
    /// probes), and existing sessions keep their state. If nothing is
    /// selected afterwards, the first listed session becomes selected.
    ///
    /// # Errors
    /// Returns a transport error if the list could not be fetched; the
    /// tracked sessions are left as they were.
    pub async fn refresh_sessions(&self) -> Result<Vec<SessionSnapshot>, ManagerError> {
        let clients = self.transport.list_clients().await.inspect_err(|e| {
            tracing::warn!("Failed to refresh client list: {e}");
        })?;

        let mut registry = self.registry.write().await;
        let mut previous = std::mem::take(&mut registry.sessions);
        let mut seen = HashSet::with_capacity(clients.len());

        for info in clients {
            if !seen.insert(info.id.clone()) {
                tracing::warn!(client = %info.id, "Duplicate client id in list, ignoring");
                continue;
            }
            if let Some(pos) = previous.iter().position(|s| s.id() == &info.id) {
                registry.sessions.push(previous.swap_remove(pos));
            } else {
                tracing::info!(client = %info.id, addr = %info.address, "Tracking new client");
                registry.sessions.push(Arc::new(Session::new(info)));
            }
        }

        for gone in previous {
            tracing::info!(client = %gone.id(), "Client no longer listed, dropping session");
            gone.detach();
        }

        registry.ensure_selection();
        Ok(registry.sessions.iter().map(|s| s.snapshot()).collect())
    }

    /// Focus a session and load its log tail.
    ///
    /// A failed log fetch is logged and does not undo the selection.
    ///
    /// # Errors
    /// Returns `NotFound` if `id` is not tracked.
    pub async fn select_session(&self, id: &ClientId) -> Result<SessionSnapshot, ManagerError> {
        let session = {
            let mut registry = self.registry.write().await;
            let session = registry
                .find(id)
                .cloned()
                .ok_or_else(|| ManagerError::NotFound(id.clone()))?;
            registry.selected = Some(id.clone());
            session
        };

        if let Err(e) = self.load_logs(&session).await {
            tracing::warn!(client = %id, "Log fetch after selection failed: {e}");
        }
        Ok(session.snapshot())
    }

    /// Replace a session's log with the service's current tail.
    ///
    /// # Errors
    /// Returns `NotFound` for an untracked id, or a transport error, in which
    /// case the stored log is unchanged.
    pub async fn fetch_logs(&self, id: &ClientId) -> Result<LogSnapshot, ManagerError> {
        let session = self.session_handle(id).await?;
        self.load_logs(&session).await?;
        Ok(session.log().snapshot())
    }

    /// Fetch every tracked session's tail concurrently.
    ///
    /// Each session degrades on its own; failures are reported per id.
    pub async fn refresh_all_logs(&self) -> Vec<(ClientId, Result<LogSnapshot, RelayError>)> {
        let sessions = self.registry.read().await.sessions.clone();
        join_all(sessions.iter().map(|session| async move {
            let result = self
                .load_logs(session)
                .await
                .map(|()| session.log().snapshot());
            (session.id().clone(), result)
        }))
        .await
    }

    /// Dispatch operator command text.
    ///
    /// The text is sent with exactly one trailing newline. On delivery the
    /// draft is cleared and the log refreshed; on transport failure the
    /// session gets a failure feedback string. The pending slot is always
    /// released.
    ///
    /// # Errors
    /// Returns `EmptyCommand` for blank text, `NotFound` for an untracked id,
    /// or `AlreadyPending` while an earlier command awaits its response.
    pub async fn send_command(
        &self,
        id: &ClientId,
        text: &str,
    ) -> Result<CommandOutcome, ManagerError> {
        if text.trim().is_empty() {
            return Err(ManagerError::EmptyCommand);
        }
        let session = self.session_handle(id).await?;
        let command = normalize_command(text);

        let guard = session
            .begin_command(&command)
            .ok_or_else(|| ManagerError::AlreadyPending(id.clone()))?;

        tracing::debug!(client = %id, command = %command.trim_end(), "Dispatching command");
        match self.transport.send_command(id, &command).await {
            Ok(result) => {
                guard.delivered(result.clone());
                if let Err(e) = self.load_logs(&session).await {
                    tracing::warn!(client = %id, "Log refresh after command failed: {e}");
                }
                Ok(CommandOutcome::Delivered(result))
            }
            Err(e) => {
                tracing::warn!(client = %id, "Command dispatch failed: {e}");
                guard.failed(SEND_FAILED_FEEDBACK.to_string());
                Ok(CommandOutcome::Failed(SEND_FAILED_FEEDBACK.to_string()))
            }
        }
    }

    /// Dispatch the session's composed draft.
    ///
    /// # Errors
    /// Same as [`Self::send_command`].
    pub async fn send_draft(&self, id: &ClientId) -> Result<CommandOutcome, ManagerError> {
        let draft = self.session_handle(id).await?.draft();
        self.send_command(id, &draft).await
    }

    /// Update the operator's composed command text for a session.
    ///
    /// # Errors
    /// Returns `NotFound` if `id` is not tracked.
    pub async fn set_draft(
        &self,
        id: &ClientId,
        text: impl Into<String>,
    ) -> Result<(), ManagerError> {
        self.session_handle(id).await?.set_draft(text.into());
        Ok(())
    }

    /// Ask the agent to start its shell and watch for readiness.
    ///
    /// Only acts from `Inactive`; repeated requests are ignored, not queued.
    ///
    /// # Errors
    /// Returns `NotFound` for an untracked id, or `AlreadyPending` while an
    /// operator command awaits its response.
    pub async fn activate_shell(&self, id: &ClientId) -> Result<Activation, ManagerError> {
        let session = self.session_handle(id).await?;

        let guard = match session.begin_activation(START_SHELL_COMMAND) {
            Ok(guard) => guard,
            Err(ActivationBlocked::Shell(state)) => {
                tracing::debug!(client = %id, %state, "Shell activation ignored");
                return Ok(Activation::Ignored(state));
            }
            Err(ActivationBlocked::Pending) => return Err(ManagerError::AlreadyPending(id.clone())),
        };

        match self.transport.send_command(id, START_SHELL_COMMAND).await {
            Ok(_) => {
                guard.delivered(SHELL_STARTING_FEEDBACK.to_string());
                tracing::info!(client = %id, "Shell activation requested");
                self.start_readiness_probe(&session);
                if let Err(e) = self.load_logs(&session).await {
                    tracing::warn!(client = %id, "Log refresh after activation failed: {e}");
                }
                Ok(Activation::Requested)
            }
            Err(e) => {
                tracing::warn!(client = %id, "Shell activation failed: {e}");
                guard.failed(SHELL_START_FAILED_FEEDBACK.to_string());
                Ok(Activation::Failed(SHELL_START_FAILED_FEEDBACK.to_string()))
            }
        }
    }

    /// Clear the service-side log and the local tail.
    ///
    /// # Errors
    /// Returns `NotFound` for an untracked id, or a transport error with the
    /// local tail left intact.
    pub async fn clear_logs(&self, id: &ClientId) -> Result<String, ManagerError> {
        let session = self.session_handle(id).await?;
        let seq = session.begin_fetch();
        let result = self.transport.clear_logs(id).await?;
        session.apply_fetch(seq, Vec::new());
        session.set_feedback(result.clone());
        Ok(result)
    }

    /// Ask the service to drop an agent and stop tracking it right away.
    ///
    /// # Errors
    /// Returns `NotFound` for an untracked id, or a transport error, in which
    /// case the session stays tracked.
    pub async fn disconnect(&self, id: &ClientId) -> Result<String, ManagerError> {
        let session = self.session_handle(id).await?;
        let result = self.transport.disconnect(id).await?;

        let mut registry = self.registry.write().await;
        registry.sessions.retain(|s| !Arc::ptr_eq(s, &session));
        registry.ensure_selection();
        drop(registry);

        session.detach();
        tracing::info!(client = %id, "Disconnected client");
        Ok(result)
    }

    /// Snapshots of all sessions, in service order.
    pub async fn sessions(&self) -> Vec<SessionSnapshot> {
        self.registry
            .read()
            .await
            .sessions
            .iter()
            .map(|s| s.snapshot())
            .collect()
    }

    /// Snapshot of one session.
    pub async fn session(&self, id: &ClientId) -> Option<SessionSnapshot> {
        self.registry.read().await.find(id).map(|s| s.snapshot())
    }

    /// Id of the focused session.
    pub async fn selected_id(&self) -> Option<ClientId> {
        self.registry.read().await.selected.clone()
    }

    /// Snapshot of the focused session.
    pub async fn selected(&self) -> Option<SessionSnapshot> {
        let registry = self.registry.read().await;
        registry
            .selected
            .as_ref()
            .and_then(|id| registry.find(id))
            .map(|s| s.snapshot())
    }

    /// Receiver notified whenever a session's tail is replaced.
    ///
    /// # Errors
    /// Returns `NotFound` if `id` is not tracked.
    pub async fn subscribe_logs(
        &self,
        id: &ClientId,
    ) -> Result<watch::Receiver<LogSnapshot>, ManagerError> {
        Ok(self.session_handle(id).await?.log().subscribe())
    }

    /// Whether a readiness probe is currently running for a session.
    pub async fn has_readiness_probe(&self, id: &ClientId) -> bool {
        self.registry
            .read()
            .await
            .find(id)
            .is_some_and(|s| s.has_running_probe())
    }

    async fn session_handle(&self, id: &ClientId) -> Result<Arc<Session>, ManagerError> {
        self.registry
            .read()
            .await
            .find(id)
            .cloned()
            .ok_or_else(|| ManagerError::NotFound(id.clone()))
    }

    async fn load_logs(&self, session: &Session) -> Result<(), RelayError> {
        let seq = session.begin_fetch();
        let entries = self.transport.fetch_logs(session.id()).await?;
        if !session.apply_fetch(seq, entries) {
            tracing::debug!(client = %session.id(), "Discarded stale log tail");
        }
        Ok(())
    }

    fn start_readiness_probe(&self, session: &Arc<Session>) {
        let transport = Arc::clone(&self.transport);
        let weak = Arc::downgrade(session);
        let id = session.id().clone();

        let probe = PollLoop::spawn(self.poll_interval, move || {
            let transport = Arc::clone(&transport);
            let weak = weak.clone();
            let id = id.clone();
            async move {
                let Some(session) = weak.upgrade() else {
                    return Ok::<_, RelayError>(ControlFlow::Break(()));
                };
                if !transport.shell_ready(&id).await? {
                    return Ok(ControlFlow::Continue(()));
                }
                if session.mark_shell_ready() {
                    tracing::info!(client = %id, "Shell active");
                }
                Ok(ControlFlow::Break(()))
            }
        });

        if !session.attach_probe(probe) {
            tracing::debug!(client = %session.id(), "Session gone before probe started");
        }
    }
}

fn normalize_command(text: &str) -> String {
    format!("{}\n", text.trim_end_matches(['\r', '\n']))
}
