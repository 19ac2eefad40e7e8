//! Line-oriented operator console for the agent relay.
//!
//! Run with: cargo run -p agent-relay-console
//!
//! Type `help` at the prompt for the command list.

use std::{str::FromStr, sync::Arc};

use agent_relay_core::{ClientId, RelayConfig};
use agent_relay_session::{
    Activation, CommandOutcome, SHELL_STARTING_FEEDBACK, SessionManager, SessionSnapshot,
};
use agent_relay_transport::HttpRelayClient;
use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const HELP: &str = "\
Commands:
  list               refresh and list agents
  select <id>        focus an agent and show its log
  logs               refresh and show the focused agent's log
  send <text>        send a command to the focused agent
  draft <text>       compose a command without sending it
  submit             send the composed command
  shell              start the focused agent's shell
  clear              clear the focused agent's log
  disconnect         drop the focused agent
  help               show this text
  quit               exit";

type Manager = SessionManager<HttpRelayClient>;

/// One parsed console line.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    List,
    /// Id as typed; matched against the tracked ids' display form.
    Select(String),
    Logs,
    Send(String),
    Draft(String),
    Submit,
    Shell,
    Clear,
    Disconnect,
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();
        match verb {
            "list" | "ls" => Ok(Self::List),
            "select" if !rest.is_empty() => Ok(Self::Select(rest.to_string())),
            "select" => Err("usage: select <id>".to_string()),
            "logs" => Ok(Self::Logs),
            "send" => Ok(Self::Send(rest.to_string())),
            "draft" => Ok(Self::Draft(rest.to_string())),
            "submit" => Ok(Self::Submit),
            "shell" => Ok(Self::Shell),
            "clear" => Ok(Self::Clear),
            "disconnect" => Ok(Self::Disconnect),
            "help" | "?" => Ok(Self::Help),
            "quit" | "exit" => Ok(Self::Quit),
            other => Err(format!("unknown command: {other} (try `help`)")),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = RelayConfig::load().context("Failed to load configuration")?;
    let client = HttpRelayClient::from_config(&config).context("Failed to build relay client")?;
    tracing::info!("Relay service at {}", client.base_url());

    let manager = Arc::new(SessionManager::with_config(Arc::new(client), &config));
    if let Err(e) = manager.refresh_sessions().await {
        tracing::warn!("Initial client refresh failed: {e}");
    }

    run(&manager).await
}

async fn run(manager: &Manager) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"relay> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            return Ok(());
        };
        if line.trim().is_empty() {
            continue;
        }

        let output = match line.parse::<Command>() {
            Ok(Command::Quit) => return Ok(()),
            Ok(command) => execute(manager, command).await,
            Err(message) => message,
        };
        stdout.write_all(output.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
    }
}

async fn execute(manager: &Manager, command: Command) -> String {
    let result = match command {
        Command::List => list(manager).await,
        Command::Select(raw) => select(manager, &raw).await,
        Command::Help => Ok(HELP.to_string()),
        Command::Quit => Ok(String::new()),
        command => on_selected(manager, command).await,
    };
    result.unwrap_or_else(|e| format!("error: {e}"))
}

async fn list(manager: &Manager) -> Result<String, String> {
    let sessions = manager.refresh_sessions().await.map_err(|e| e.to_string())?;
    if sessions.is_empty() {
        return Ok("no agents connected".to_string());
    }
    let selected = manager.selected_id().await;
    Ok(sessions
        .iter()
        .map(|s| {
            let marker = if selected.as_ref() == Some(&s.id) { '*' } else { ' ' };
            format!(
                "{marker} {:<8} {:<22} {:<20} shell={}",
                s.id.to_string(),
                s.address,
                s.userinfo,
                s.shell_state
            )
        })
        .collect::<Vec<_>>()
        .join("\n"))
}

async fn select(manager: &Manager, raw: &str) -> Result<String, String> {
    let sessions = manager.sessions().await;
    let id = resolve_id(sessions.iter().map(|s| &s.id), raw)
        .ok_or_else(|| format!("Session not found: {raw}"))?;
    manager
        .select_session(&id)
        .await
        .map(|s| render_logs(&s))
        .map_err(|e| e.to_string())
}

/// Tracked id whose display form is exactly `raw`.
fn resolve_id<'a>(ids: impl IntoIterator<Item = &'a ClientId>, raw: &str) -> Option<ClientId> {
    ids.into_iter().find(|id| id.to_string() == raw).cloned()
}

async fn on_selected(manager: &Manager, command: Command) -> Result<String, String> {
    let id = manager
        .selected_id()
        .await
        .ok_or_else(|| "no agent selected".to_string())?;

    match command {
        Command::Logs => {
            manager.fetch_logs(&id).await.map_err(|e| e.to_string())?;
            session_view(manager, &id).await
        }
        Command::Send(text) => manager
            .send_command(&id, &text)
            .await
            .map(|outcome| outcome_line(&outcome))
            .map_err(|e| e.to_string()),
        Command::Draft(text) => manager
            .set_draft(&id, text)
            .await
            .map(|()| "draft saved".to_string())
            .map_err(|e| e.to_string()),
        Command::Submit => manager
            .send_draft(&id)
            .await
            .map(|outcome| outcome_line(&outcome))
            .map_err(|e| e.to_string()),
        Command::Shell => manager
            .activate_shell(&id)
            .await
            .map(|activation| match activation {
                Activation::Requested => SHELL_STARTING_FEEDBACK.to_string(),
                Activation::Ignored(state) => format!("shell already {state}"),
                Activation::Failed(feedback) => feedback,
            })
            .map_err(|e| e.to_string()),
        Command::Clear => manager.clear_logs(&id).await.map_err(|e| e.to_string()),
        Command::Disconnect => manager.disconnect(&id).await.map_err(|e| e.to_string()),
        Command::List | Command::Select(_) | Command::Help | Command::Quit => Ok(String::new()),
    }
}

async fn session_view(manager: &Manager, id: &ClientId) -> Result<String, String> {
    manager
        .session(id)
        .await
        .map(|s| render_logs(&s))
        .ok_or_else(|| format!("Session not found: {id}"))
}

fn outcome_line(outcome: &CommandOutcome) -> String {
    match outcome {
        CommandOutcome::Delivered(result) => result.clone(),
        CommandOutcome::Failed(feedback) => format!("error: {feedback}"),
    }
}

fn render_logs(session: &SessionSnapshot) -> String {
    let mut out = format!(
        "== {} {} ({}) shell={}",
        session.id, session.address, session.userinfo, session.shell_state
    );
    if session.logs.is_empty() {
        out.push_str("\n(no log entries)");
    }
    for entry in session.logs.iter() {
        out.push('\n');
        out.push_str(&entry.display_line());
    }
    if !session.last_feedback.is_empty() {
        out.push_str("\n-- ");
        out.push_str(&session.last_feedback);
    }
    out
}
