use std::io::{IsTerminal, Write};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use fieldlink_engine::{DtuEvent, Session};
use fieldlink_frame::Frame;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct ResponseOutput<'a> {
    endpoint: &'a str,
    request: String,
    header: String,
    content: String,
    text: Option<&'a str>,
    size: usize,
    elapsed_ms: u128,
    timestamp: u64,
}

pub fn print_response(frame: &Frame, endpoint: &str, elapsed: Duration, format: OutputFormat) {
    let text = std::str::from_utf8(&frame.content).ok();
    match format {
        OutputFormat::Json => {
            let out = ResponseOutput {
                endpoint,
                request: hex(frame.sent.as_deref().unwrap_or_default()),
                header: hex(&frame.header),
                content: hex(&frame.content),
                text,
                size: frame.len(),
                elapsed_ms: elapsed.as_millis(),
                timestamp: unix_seconds(SystemTime::now()),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ENDPOINT", "SIZE", "ELAPSED", "HEADER", "CONTENT"])
                .add_row(vec![
                    endpoint.to_string(),
                    frame.len().to_string(),
                    format!("{}ms", elapsed.as_millis()),
                    hex(&frame.header),
                    text.map(escape).unwrap_or_else(|| hex(&frame.content)),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "endpoint={} size={} elapsed={}ms header=[{}] content=[{}]",
                endpoint,
                frame.len(),
                elapsed.as_millis(),
                hex(&frame.header),
                text.map(escape).unwrap_or_else(|| hex(&frame.content)),
            );
        }
        OutputFormat::Raw => print_raw(&frame.to_bytes()),
    }
}

pub fn print_event(event: &DtuEvent, format: OutputFormat) {
    match format {
        OutputFormat::Json | OutputFormat::Raw => print_json(event),
        OutputFormat::Table | OutputFormat::Pretty => {
            let detail = match event {
                DtuEvent::ClientConnected { peer, .. } | DtuEvent::Rejected { peer, .. } => {
                    peer.to_string()
                }
                DtuEvent::ClientOffline { .. } => String::new(),
                DtuEvent::NetworkError { message, .. } => message.clone(),
            };
            println!("{:<18} {:<12} {}", event_name(event), event.id(), detail);
        }
    }
}

pub fn print_sessions(sessions: &[Session], format: OutputFormat) {
    match format {
        OutputFormat::Json | OutputFormat::Raw => print_json(sessions),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ID", "ONLINE", "PEER", "IDLE"]);
            for session in sessions {
                table.add_row(vec![
                    session.id.clone(),
                    session.online.to_string(),
                    session.peer.map(|p| p.to_string()).unwrap_or_default(),
                    idle(session),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for session in sessions {
                println!(
                    "id={} online={} peer={} idle={}",
                    session.id,
                    session.online,
                    session.peer.map(|p| p.to_string()).unwrap_or_default(),
                    idle(session),
                );
            }
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn event_name(event: &DtuEvent) -> &'static str {
    match event {
        DtuEvent::ClientConnected { .. } => "client_connected",
        DtuEvent::ClientOffline { .. } => "client_offline",
        DtuEvent::Rejected { .. } => "rejected",
        DtuEvent::NetworkError { .. } => "network_error",
    }
}

fn idle(session: &Session) -> String {
    session
        .idle()
        .map(|idle| format!("{}s", idle.as_secs()))
        .unwrap_or_else(|| "-".to_string())
}

pub fn hex(bytes: &[u8]) -> String {
    let digits = hex::encode_upper(bytes);
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, pair) in digits.as_bytes().chunks(2).enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.extend(pair.iter().copied().map(char::from));
    }
    out
}

/// Printable form of a text response; control bytes are escaped.
fn escape(text: &str) -> String {
    text.chars().flat_map(char::escape_default).collect()
}

fn unix_seconds(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
