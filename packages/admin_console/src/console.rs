//! Interactive line console: drive the link by hand and inspect what it
//! sends and receives.

use std::sync::{Arc, OnceLock};

use anyhow::Result;
use realtime_handlers::{LogEntry, LogKind, NotificationStore, RegisteredHandlers};
use realtime_link::envelope::ping_frame;
use realtime_link::{LinkHandle, NetworkSignal, SessionStore};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSide {
    Sent,
    Received,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Status,
    Connect,
    Disconnect,
    Ping,
    Send(String),
    Network(NetworkSignal),
    Token {
        access: String,
        refresh: Option<String>,
    },
    Tenant(Option<i64>),
    Logout,
    Log(LogSide),
    Clear(LogSide),
    Unread,
    Help,
    Quit,
}

const HELP: &str = "\
commands:
  status                      connection state and counters
  connect | disconnect        open or close the link by hand
  ping                        send a heartbeat ping now
  send <text>                 send raw text (JSON is sent as-is)
  online | offline            simulate a connectivity change
  visible | hidden            simulate a visibility change
  token <access> [refresh]    sign in with the given tokens
  tenant <id>|none            switch tenant
  logout                      drop the tokens
  log sent|received           show a diagnostic log
  clear sent|received         empty a diagnostic log
  unread                      unread notice count
  quit";

fn log_side(arg: &str) -> Result<LogSide, String> {
    match arg {
        "sent" => Ok(LogSide::Sent),
        "received" | "recv" => Ok(LogSide::Received),
        other => Err(format!("expected `sent` or `received`, got `{other}`")),
    }
}

/// Parse one input line. `Ok(None)` for blank lines.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let command = match word {
        "status" => Command::Status,
        "connect" => Command::Connect,
        "disconnect" => Command::Disconnect,
        "ping" => Command::Ping,
        "send" => {
            if rest.is_empty() {
                return Err("usage: send <text>".to_string());
            }
            Command::Send(rest.to_string())
        }
        "online" => Command::Network(NetworkSignal::Online),
        "offline" => Command::Network(NetworkSignal::Offline),
        "visible" => Command::Network(NetworkSignal::Visibility { visible: true }),
        "hidden" => Command::Network(NetworkSignal::Visibility { visible: false }),
        "token" => {
            let mut parts = rest.split_whitespace();
            let Some(access) = parts.next() else {
                return Err("usage: token <access> [refresh]".to_string());
            };
            Command::Token {
                access: access.to_string(),
                refresh: parts.next().map(str::to_string),
            }
        }
        "tenant" => match rest {
            "none" => Command::Tenant(None),
            id => Command::Tenant(Some(
                id.parse()
                    .map_err(|_| format!("invalid tenant id `{id}`"))?,
            )),
        },
        "logout" => Command::Logout,
        "log" => Command::Log(log_side(rest)?),
        "clear" => Command::Clear(log_side(rest)?),
        "unread" => Command::Unread,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("unknown command `{other}` (try `help`)")),
    };
    Ok(Some(command))
}

pub struct Console {
    pub link: LinkHandle,
    pub session: Arc<SessionStore>,
    pub notifications: Arc<NotificationStore>,
    /// Filled once the first sign-in registers the handlers.
    pub handlers: Arc<OnceLock<RegisteredHandlers>>,
}

impl Console {
    /// Read commands from stdin until `quit` or end of input.
    pub async fn run(&self) -> Result<()> {
        eprintln!("{HELP}");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            match parse_command(&line) {
                Ok(None) => {}
                Ok(Some(Command::Quit)) => break,
                Ok(Some(command)) => self.execute(command).await?,
                Err(message) => eprintln!("{message}"),
            }
        }
        Ok(())
    }

    async fn execute(&self, command: Command) -> Result<()> {
        debug!(?command, "console command");
        match command {
            Command::Status => {
                let snapshot = self.link.snapshot().await?;
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            }
            Command::Connect => self.link.connect().await?,
            Command::Disconnect => self.link.disconnect().await?,
            Command::Ping => {
                if self.link.send_ping().await {
                    self.record_sent(&ping_frame().to_string());
                }
            }
            Command::Send(text) => {
                if self.link.send_message(text.as_str()).await {
                    self.record_sent(&text);
                }
            }
            Command::Network(signal) => self.link.notify_network(signal)?,
            Command::Token { access, refresh } => self.session.set_tokens(access, refresh),
            Command::Tenant(tenant_id) => self.session.set_tenant(tenant_id),
            Command::Logout => self.session.clear_tokens(),
            Command::Log(side) => match self.handlers.get() {
                Some(handlers) => {
                    let entries = match side {
                        LogSide::Sent => handlers.diagnostic.sent_logs(),
                        LogSide::Received => handlers.diagnostic.received_logs(),
                    };
                    print_log(&entries);
                }
                None => eprintln!("no handlers yet (sign in first)"),
            },
            Command::Clear(side) => {
                if let Some(handlers) = self.handlers.get() {
                    match side {
                        LogSide::Sent => handlers.diagnostic.clear_sent(),
                        LogSide::Received => handlers.diagnostic.clear_received(),
                    }
                }
            }
            Command::Unread => println!("{}", self.notifications.unread_count()),
            Command::Help => eprintln!("{HELP}"),
            Command::Quit => {}
        }
        Ok(())
    }

    fn record_sent(&self, text: &str) {
        if let Some(handlers) = self.handlers.get() {
            handlers.diagnostic.record_sent(text);
        }
    }
}

fn print_log(entries: &[LogEntry]) {
    if entries.is_empty() {
        println!("(empty)");
        return;
    }
    for entry in entries {
        println!("{} [{}] {}", entry.formatted_time(), entry.kind.label(), entry.message);
        if let Some(media) = &entry.media {
            let size = if entry.kind == LogKind::FileReceived {
                format!(" ({})", realtime_handlers::format_bytes(media.file_size, 2))
            } else {
                String::new()
            };
            println!("    {} {}{size}", media.file_name, media.url);
        }
    }
}
