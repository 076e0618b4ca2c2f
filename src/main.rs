use std::collections::HashMap;
use std::sync::Arc;

use chatstream::classify::classify;
use chatstream::config::Config;
use chatstream::connection::ConnectionState;
use chatstream::engine::ChatView;
use chatstream::error::{CollaboratorError, SendError};
use chatstream::history::Entry;
use chatstream::message::{Moderation, SelfProfile};
use chatstream::session::{Collaborators, SessionHandle, spawn_session};
use chatstream::transport::{
    HistorySource, HttpHistory, HttpProbe, LivenessProbe, NoHistory, NoProbe, WsTransport,
};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json encode failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
    #[error(transparent)]
    Send(#[from] SendError),
    #[error("session ended: {0}")]
    SessionEnded(String),
}

#[derive(Parser, Debug)]
#[command(name = "chatstream", about = "Live chat ingestion over IRC-on-WebSocket")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Join a channel and stream buffered entries to stdout as JSON lines.
    /// Lines typed on stdin are sent to the channel.
    Watch(WatchCommand),
    /// Classify raw lines read from stdin, one JSON event per line.
    Classify,
}

#[derive(Args, Debug)]
struct WatchCommand {
    channel: String,

    #[arg(long, env = "CHATSTREAM_WS_URL", default_value = "wss://irc-ws.chat.twitch.tv:443")]
    ws_url: String,

    /// Login name. Anonymous read-only login when omitted.
    #[arg(long, env = "CHATSTREAM_NICK")]
    nick: Option<String>,

    /// OAuth token for the login; required to send.
    #[arg(long, env = "CHATSTREAM_TOKEN")]
    token: Option<String>,

    /// Recent-history endpoint; `{channel}` is substituted.
    #[arg(long, env = "CHATSTREAM_HISTORY_URL")]
    history_url: Option<String>,

    /// Liveness endpoint; `{channel}` is substituted.
    #[arg(long, env = "CHATSTREAM_PROBE_URL")]
    probe_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Watch(watch) => run_watch(watch).await,
        Command::Classify => run_classify().await,
    }
}

async fn run_classify() -> Result<(), CliError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        print_json(&classify(&line))?;
    }
    Ok(())
}

// =============================================================================
// WATCH
// =============================================================================

async fn run_watch(watch: WatchCommand) -> Result<(), CliError> {
    let transport = WsTransport::new(watch.ws_url, watch.nick, watch.token);
    let profile = SelfProfile::new(transport.nick());
    let read_only = transport.is_anonymous();

    let history: Arc<dyn HistorySource> = match watch.history_url {
        Some(url) => Arc::new(HttpHistory::new(url)?),
        None => Arc::new(NoHistory),
    };
    let probe: Arc<dyn LivenessProbe> = match watch.probe_url {
        Some(url) => Arc::new(HttpProbe::new(url)?),
        None => Arc::new(NoProbe),
    };
    let collaborators = Collaborators { transport: Arc::new(transport), history, probe };

    let (handle, task) = spawn_session(Config::from_env(), profile, collaborators);
    let mut view = handle.subscribe();
    handle.connect(watch.channel);

    if read_only {
        eprintln!("anonymous login: stdin input is ignored");
    } else {
        tokio::spawn(forward_stdin(handle.clone()));
    }

    let mut printer = Printer::default();
    let outcome = loop {
        tokio::select! {
            changed = view.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let current = view.borrow_and_update().clone();
                printer.print(&current)?;
                if let Some(outcome) = printer.finished(&current) {
                    break outcome;
                }
            }
            _ = tokio::signal::ctrl_c() => break Ok(()),
        }
    };

    handle.shutdown();
    let _ = task.await;
    outcome
}

async fn forward_stdin(handle: SessionHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        if let Err(err) = handle.send(line, None).await {
            eprintln!("send failed: {err}");
            if err == SendError::SessionClosed {
                return;
            }
        }
    }
}

#[derive(Serialize)]
struct EntryLine<'a> {
    #[serde(flatten)]
    entry: &'a Entry,
    /// `true` when this id was printed before and only its marks changed.
    update: bool,
}

/// Tracks what has reached stdout so each view change prints only the delta.
#[derive(Default)]
struct Printer {
    printed: HashMap<String, (bool, Option<Moderation>)>,
    connection: Option<ConnectionState>,
    started: bool,
}

impl Printer {
    fn print(&mut self, view: &ChatView) -> Result<(), CliError> {
        if self.connection.as_ref() != Some(&view.connection) {
            match (&view.warning, &view.error) {
                (_, Some(error)) => eprintln!("connection: {:?} ({error})", view.connection),
                (Some(warning), None) => eprintln!("connection: {:?} ({warning})", view.connection),
                (None, None) => eprintln!("connection: {:?}", view.connection),
            }
            self.connection = Some(view.connection.clone());
        }
        if view.connection != ConnectionState::Disconnected {
            self.started = true;
        }

        for entry in &view.messages {
            let marks = (entry.deleted, entry.moderation);
            let update = match self.printed.get(entry.id()) {
                Some(seen) if *seen == marks => continue,
                Some(_) => true,
                None => false,
            };
            print_json(&EntryLine { entry, update })?;
            self.printed.insert(entry.id().to_owned(), marks);
        }

        if !view.paused {
            let live: std::collections::HashSet<&str> = view.messages.iter().map(Entry::id).collect();
            self.printed.retain(|id, _| live.contains(id.as_str()));
        }
        Ok(())
    }

    /// `Some` once the session can make no further progress on its own.
    fn finished(&self, view: &ChatView) -> Option<Result<(), CliError>> {
        match view.connection {
            ConnectionState::Dead => Some(Err(CliError::SessionEnded(
                view.error.clone().unwrap_or_else(|| "connection dead".to_owned()),
            ))),
            ConnectionState::Disconnected if self.started => match &view.error {
                Some(error) => Some(Err(CliError::SessionEnded(error.clone()))),
                None => Some(Ok(())),
            },
            _ => None,
        }
    }
}

fn print_json(value: &impl Serialize) -> Result<(), CliError> {
    let rendered = serde_json::to_string(value)?;
    println!("{rendered}");
    Ok(())
}
