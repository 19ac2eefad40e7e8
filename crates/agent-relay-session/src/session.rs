//! Per-agent session state.

use std::sync::{
    Mutex, MutexGuard, PoisonError,
    atomic::{AtomicU64, Ordering},
};

use agent_relay_core::{
    ClientId, ClientInfo, LogEntry, LogSnapshot, LogStore, PollLoop, ShellState,
    ShellStateTracker, TransitionError,
};

/// Point-in-time copy of a session, safe to hand to a renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub id: ClientId,
    pub address: String,
    pub userinfo: String,
    pub shell_state: ShellState,
    pub logs: LogSnapshot,
    /// Text of the command awaiting a response, if any.
    pub pending_command: Option<String>,
    /// Operator's composed, not yet sent, command text.
    pub draft: String,
    /// Human-readable result of the last dispatch, or empty.
    pub last_feedback: String,
}

impl SessionSnapshot {
    /// Whether a command is in flight.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.pending_command.is_some()
    }
}

#[derive(Default)]
struct SessionState {
    shell: ShellStateTracker,
    pending: Option<String>,
    draft: String,
    last_feedback: String,
    applied_fetch: u64,
    probe: Option<PollLoop>,
    detached: bool,
}

/// Why an activation did not start.
pub(crate) enum ActivationBlocked {
    Pending,
    Shell(ShellState),
}

/// Tracked agent. All mutable fields live behind one short-lived lock that is
/// never held across an await.
pub(crate) struct Session {
    id: ClientId,
    address: String,
    userinfo: String,
    log: LogStore,
    next_fetch: AtomicU64,
    state: Mutex<SessionState>,
}

impl Session {
    pub(crate) fn new(info: ClientInfo) -> Self {
        let state = SessionState {
            shell: ShellStateTracker::from_reported(info.shell_active),
            ..SessionState::default()
        };
        Self {
            id: info.id,
            address: info.address,
            userinfo: info.userinfo,
            log: LogStore::new(),
            next_fetch: AtomicU64::new(0),
            state: Mutex::new(state),
        }
    }

    pub(crate) const fn id(&self) -> &ClientId {
        &self.id
    }

    pub(crate) const fn log(&self) -> &LogStore {
        &self.log
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        let state = self.lock();
        SessionSnapshot {
            id: self.id.clone(),
            address: self.address.clone(),
            userinfo: self.userinfo.clone(),
            shell_state: state.shell.state(),
            logs: self.log.snapshot(),
            pending_command: state.pending.clone(),
            draft: state.draft.clone(),
            last_feedback: state.last_feedback.clone(),
        }
    }

    pub(crate) fn shell_state(&self) -> ShellState {
        self.lock().shell.state()
    }

    pub(crate) fn draft(&self) -> String {
        self.lock().draft.clone()
    }

    pub(crate) fn set_draft(&self, text: String) {
        self.lock().draft = text;
    }

    pub(crate) fn set_feedback(&self, feedback: String) {
        self.lock().last_feedback = feedback;
    }

    /// Reserve a sequence number for a log fetch about to be issued.
    pub(crate) fn begin_fetch(&self) -> u64 {
        self.next_fetch.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Apply a fetched tail unless a later-issued fetch was already applied.
    pub(crate) fn apply_fetch(&self, seq: u64, entries: Vec<LogEntry>) -> bool {
        let mut state = self.lock();
        if seq <= state.applied_fetch {
            return false;
        }
        state.applied_fetch = seq;
        self.log.replace(entries);
        true
    }

    /// Claim the pending slot for operator command text.
    pub(crate) fn begin_command(&self, command: &str) -> Option<DispatchGuard<'_>> {
        let mut state = self.lock();
        if state.pending.is_some() {
            return None;
        }
        state.pending = Some(command.to_string());
        Some(DispatchGuard::new(self, false))
    }

    /// Move `Inactive -> Starting` and claim the pending slot for `token`.
    pub(crate) fn begin_activation(
        &self,
        token: &str,
    ) -> Result<DispatchGuard<'_>, ActivationBlocked> {
        let mut state = self.lock();
        if let Err(TransitionError::AlreadyRequested(current)) = state.shell.begin_activation() {
            return Err(ActivationBlocked::Shell(current));
        }
        if state.pending.is_some() {
            state.shell.abort_activation();
            return Err(ActivationBlocked::Pending);
        }
        state.pending = Some(token.to_string());
        Ok(DispatchGuard::new(self, true))
    }

    /// Keep `probe` if the session is still tracked and still starting.
    /// Otherwise the probe is dropped, which cancels it.
    pub(crate) fn attach_probe(&self, probe: PollLoop) -> bool {
        let mut state = self.lock();
        if state.detached || state.shell.state() != ShellState::Starting {
            return false;
        }
        state.probe = Some(probe);
        true
    }

    pub(crate) fn has_running_probe(&self) -> bool {
        self.lock().probe.as_ref().is_some_and(PollLoop::is_running)
    }

    pub(crate) fn mark_shell_ready(&self) -> bool {
        self.lock().shell.mark_ready()
    }

    /// Stop background work for a session that is no longer tracked.
    pub(crate) fn detach(&self) {
        let mut state = self.lock();
        state.detached = true;
        if let Some(probe) = state.probe.take() {
            probe.cancel();
        }
    }
}

/// Holds a session's pending slot for the duration of one dispatch.
///
/// Dropping it without finishing (e.g. the caller's future was cancelled)
/// frees the slot and rolls back an activation in progress.
pub(crate) struct DispatchGuard<'a> {
    session: &'a Session,
    activation: bool,
    finished: bool,
}

impl<'a> DispatchGuard<'a> {
    const fn new(session: &'a Session, activation: bool) -> Self {
        Self {
            session,
            activation,
            finished: false,
        }
    }

    /// Release the slot after the service answered.
    ///
    /// A delivered operator command clears the draft it was composed from.
    pub(crate) fn delivered(mut self, feedback: String) {
        self.finished = true;
        let mut state = self.session.lock();
        state.pending = None;
        state.last_feedback = feedback;
        if !self.activation {
            state.draft.clear();
        }
    }

    /// Release the slot after the dispatch failed in transport.
    pub(crate) fn failed(mut self, feedback: String) {
        self.finished = true;
        let mut state = self.session.lock();
        state.pending = None;
        state.last_feedback = feedback;
        if self.activation {
            state.shell.abort_activation();
        }
    }
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut state = self.session.lock();
        state.pending = None;
        if self.activation {
            state.shell.abort_activation();
        }
    }
}

#[cfg(test)]
mod tests {
    use agent_relay_core::LogLevel;

    use super::*;

    fn session(shell_active: bool) -> Session {
        Session::new(ClientInfo {
            id: ClientId::Numeric(1),
            address: "10.0.0.1:4444".to_string(),
            userinfo: "build-01".to_string(),
            shell_active,
        })
    }

    fn entries(messages: &[&str]) -> Vec<LogEntry> {
        messages
            .iter()
            .map(|m| LogEntry::new("t", LogLevel::Info, *m))
            .collect()
    }

    #[test]
    fn test_initial_shell_state_follows_report() {
        assert_eq!(session(false).shell_state(), ShellState::Inactive);
        assert_eq!(session(true).shell_state(), ShellState::Active);
    }

    #[test]
    fn test_stale_fetch_is_discarded() {
        let s = session(false);
        let older = s.begin_fetch();
        let newer = s.begin_fetch();

        assert!(s.apply_fetch(newer, entries(&["new"])));
        assert!(!s.apply_fetch(older, entries(&["old", "older"])));
        assert_eq!(s.log().snapshot()[0].message, "new");
    }

    #[test]
    fn test_pending_slot_is_exclusive() {
        let s = session(true);
        let guard = s.begin_command("ls\n").unwrap();
        assert!(s.begin_command("pwd\n").is_none());
        assert_eq!(s.snapshot().pending_command.as_deref(), Some("ls\n"));

        guard.delivered("ok".to_string());
        assert!(!s.snapshot().is_pending());
        assert!(s.begin_command("pwd\n").is_some());
    }

    #[test]
    fn test_delivered_command_clears_draft() {
        let s = session(true);
        s.set_draft("uptime".to_string());
        s.begin_command("uptime\n").unwrap().delivered("done".to_string());

        let snap = s.snapshot();
        assert!(snap.draft.is_empty());
        assert_eq!(snap.last_feedback, "done");
    }

    #[test]
    fn test_failed_command_keeps_draft() {
        let s = session(true);
        s.set_draft("uptime".to_string());
        s.begin_command("uptime\n").unwrap().failed("nope".to_string());

        let snap = s.snapshot();
        assert_eq!(snap.draft, "uptime");
        assert_eq!(snap.last_feedback, "nope");
        assert!(!snap.is_pending());
    }

    #[test]
    fn test_dropped_guard_releases_slot_and_rolls_back() {
        let s = session(false);
        let guard = s.begin_activation("start_shell").ok().unwrap();
        assert_eq!(s.shell_state(), ShellState::Starting);

        drop(guard);

        assert!(!s.snapshot().is_pending());
        assert_eq!(s.shell_state(), ShellState::Inactive);
    }

    #[test]
    fn test_activation_blocked_by_pending_command() {
        let s = session(false);
        let _guard = s.begin_command("ls\n").unwrap();

        assert!(matches!(
            s.begin_activation("start_shell"),
            Err(ActivationBlocked::Pending)
        ));
        assert_eq!(s.shell_state(), ShellState::Inactive);
    }

    #[test]
    fn test_activation_ignored_once_active() {
        let s = session(true);
        assert!(matches!(
            s.begin_activation("start_shell"),
            Err(ActivationBlocked::Shell(ShellState::Active))
        ));
    }
}
