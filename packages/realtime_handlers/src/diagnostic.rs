//! Connection test log.
//!
//! Keeps two bounded, append-only logs of what went over the link: frames
//! the operator sent and frames the server pushed. Inbound frames are
//! classified so media messages (audio, image, video, file) and broadcasts
//! carrying a file can be rendered with a link instead of a JSON dump.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Local, Utc};
use realtime_link::{InboundFrame, MessageHandler, envelope::PONG_SENTINEL};
use serde::Serialize;
use serde_json::Value;

pub const USER_INFO_RESPONSE: &str = "get_user_info_resp";
pub const APP_CONFIG_RESPONSE: &str = "get_app_config_resp";
pub const BROADCAST: &str = "broadcast";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Sent,
    Received,
    AudioReceived,
    ImageReceived,
    VideoReceived,
    FileReceived,
    Auth,
    Event,
    Info,
    Error,
}

impl LogKind {
    pub fn label(self) -> &'static str {
        match self {
            LogKind::Sent => "sent",
            LogKind::Received => "received",
            LogKind::AudioReceived => "audio",
            LogKind::ImageReceived => "image",
            LogKind::VideoReceived => "video",
            LogKind::FileReceived => "file",
            LogKind::Auth => "auth",
            LogKind::Event => "event",
            LogKind::Info => "info",
            LogKind::Error => "error",
        }
    }

    fn is_received(self) -> bool {
        matches!(
            self,
            LogKind::Received
                | LogKind::AudioReceived
                | LogKind::ImageReceived
                | LogKind::VideoReceived
                | LogKind::FileReceived
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Text,
    Image,
    Audio,
    Video,
    File,
}

impl MediaKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(MediaKind::Text),
            "image" => Some(MediaKind::Image),
            "audio" => Some(MediaKind::Audio),
            "video" => Some(MediaKind::Video),
            "file" => Some(MediaKind::File),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Text => "text",
            MediaKind::Image => "image",
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
            MediaKind::File => "file",
        }
    }

    fn log_kind(self) -> LogKind {
        match self {
            MediaKind::Text => LogKind::Received,
            MediaKind::Image => LogKind::ImageReceived,
            MediaKind::Audio => LogKind::AudioReceived,
            MediaKind::Video => LogKind::VideoReceived,
            MediaKind::File => LogKind::FileReceived,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaInfo {
    pub kind: MediaKind,
    pub url: String,
    pub file_name: String,
    pub file_size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub kind: LogKind,
    pub message: String,
    pub time: DateTime<Utc>,
    pub media: Option<MediaInfo>,
}

impl LogEntry {
    /// Local wall-clock time with millisecond precision.
    pub fn formatted_time(&self) -> String {
        self.time
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S%.3f")
            .to_string()
    }
}

#[derive(Default)]
struct Logs {
    sent: VecDeque<LogEntry>,
    received: VecDeque<LogEntry>,
}

pub struct DiagnosticHandler {
    capacity: usize,
    logs: Mutex<Logs>,
}

impl DiagnosticHandler {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            logs: Mutex::new(Logs::default()),
        }
    }

    fn logs(&self) -> MutexGuard<'_, Logs> {
        self.logs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append an entry. Sent entries go to the sent log, received kinds to the
    /// received log, everything else to both.
    pub fn add_log(&self, kind: LogKind, message: impl Into<String>, media: Option<MediaInfo>) {
        let entry = LogEntry {
            kind,
            message: message.into(),
            time: Utc::now(),
            media,
        };
        let capacity = self.capacity;
        let mut logs = self.logs();
        if kind == LogKind::Sent {
            push_bounded(&mut logs.sent, entry, capacity);
        } else if kind.is_received() {
            push_bounded(&mut logs.received, entry, capacity);
        } else {
            push_bounded(&mut logs.sent, entry.clone(), capacity);
            push_bounded(&mut logs.received, entry, capacity);
        }
    }

    pub fn record_sent(&self, text: &str) {
        self.add_log(LogKind::Sent, format!("sent: {text}"), None);
    }

    pub fn sent_logs(&self) -> Vec<LogEntry> {
        self.logs().sent.iter().cloned().collect()
    }

    pub fn received_logs(&self) -> Vec<LogEntry> {
        self.logs().received.iter().cloned().collect()
    }

    pub fn clear_sent(&self) {
        self.logs().sent.clear();
    }

    pub fn clear_received(&self) {
        self.logs().received.clear();
    }
}

impl MessageHandler for DiagnosticHandler {
    fn handle(&self, frame: &InboundFrame) -> anyhow::Result<()> {
        if let Some((kind, message, media)) = classify(frame, Utc::now()) {
            self.add_log(kind, message, media);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "diagnostic"
    }
}

fn push_bounded(log: &mut VecDeque<LogEntry>, entry: LogEntry, capacity: usize) {
    while log.len() >= capacity {
        log.pop_front();
    }
    log.push_back(entry);
}

type Classified = (LogKind, String, Option<MediaInfo>);

/// Decide how an inbound frame is logged. `None` for frames that carry
/// nothing worth showing (JSON without a `type`).
pub fn classify(frame: &InboundFrame, now: DateTime<Utc>) -> Option<Classified> {
    if !frame.is_text() {
        let len = frame.bytes().map_or(0, <[u8]>::len);
        return Some((
            LogKind::Received,
            format!("non-text message ({})", format_bytes(len as u64, 2)),
            None,
        ));
    }
    if frame.raw() == PONG_SENTINEL {
        return Some((LogKind::Received, "heartbeat reply: pong".to_string(), None));
    }
    let Some(data) = frame.parsed() else {
        return Some((
            LogKind::Error,
            format!("message handling failed: not JSON: {}", frame.raw()),
            None,
        ));
    };
    let message_type = data.get("type").and_then(Value::as_str)?;
    let empty = Value::Null;
    let payload = data.get("payload").unwrap_or(&empty);
    let dump = || serde_json::to_string_pretty(data).unwrap_or_else(|_| frame.raw().to_string());

    let classified = match message_type {
        "pong" => {
            let client = payload
                .get("client_timestamp")
                .map(display_value)
                .unwrap_or_else(|| "...".to_string());
            let server = payload
                .get("server_timestamp")
                .map(display_value)
                .unwrap_or_default();
            (
                LogKind::Received,
                format!("heartbeat reply: pong (client time: {client}, server time: {server})"),
                None,
            )
        }
        USER_INFO_RESPONSE => (LogKind::Received, format!("user info response: {}", dump()), None),
        APP_CONFIG_RESPONSE => (LogKind::Received, format!("app config response: {}", dump()), None),
        BROADCAST => classify_broadcast(payload, now, dump),
        other => match MediaKind::parse(other).filter(|kind| *kind != MediaKind::Text) {
            Some(kind) => match media(kind, payload, kind.as_str(), now) {
                Some(info) => (kind.log_kind(), format!("{} message", kind.as_str()), Some(info)),
                None => (
                    LogKind::Received,
                    format!("{} message missing URL: {}", kind.as_str(), dump()),
                    None,
                ),
            },
            None => (LogKind::Received, format!("message: {}", dump()), None),
        },
    };
    Some(classified)
}

fn classify_broadcast(
    payload: &Value,
    now: DateTime<Utc>,
    dump: impl Fn() -> String,
) -> (LogKind, String, Option<MediaInfo>) {
    let file_type = payload.get("file_type").and_then(Value::as_str);
    match file_type.and_then(MediaKind::parse) {
        Some(MediaKind::Text) => (LogKind::Received, format!("broadcast text: {}", dump()), None),
        Some(kind) => {
            let prefix = format!("broadcast_{}", kind.as_str());
            match media(kind, payload, &prefix, now) {
                Some(info) => (kind.log_kind(), format!("broadcast {}", kind.as_str()), Some(info)),
                None => (
                    LogKind::Received,
                    format!("broadcast {} missing URL: {}", kind.as_str(), dump()),
                    None,
                ),
            }
        }
        None => (LogKind::Received, format!("broadcast: {}", dump()), None),
    }
}

/// Media details from a payload's `file_url`; only files carry a real name
/// and size.
fn media(kind: MediaKind, payload: &Value, prefix: &str, now: DateTime<Utc>) -> Option<MediaInfo> {
    let url = payload
        .get("file_url")
        .and_then(Value::as_str)
        .filter(|url| !url.is_empty())?;
    let generated = || format!("{prefix}_{}", now.timestamp_millis());
    let (file_name, file_size) = if kind == MediaKind::File {
        let name = payload
            .get("file_name")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .map_or_else(generated, str::to_string);
        let size = payload.get("file_size").and_then(Value::as_u64).unwrap_or(0);
        (name, size)
    } else {
        (generated(), 0)
    };
    Some(MediaInfo {
        kind,
        url: url.to_string(),
        file_name,
        file_size,
    })
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Human-readable size in powers of 1024, trailing zeros trimmed.
pub fn format_bytes(bytes: u64, decimals: usize) -> String {
    const UNITS: [&str; 9] = ["Bytes", "KB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let mut number = format!("{value:.decimals$}");
    if number.contains('.') {
        number = number.trim_end_matches('0').trim_end_matches('.').to_string();
    }
    format!("{number} {}", UNITS[unit])
}
