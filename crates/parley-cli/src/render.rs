//! Plain-text output of sessions, messages and engine events

use std::collections::HashSet;
use std::io::{self, Write};

use chrono::{DateTime, Local, Utc};
use parley_api::{Role, SearchHit, Session};
use parley_engine::{EngineEvent, Message};

fn local_time(millis: i64) -> String {
    DateTime::from_timestamp_millis(millis)
        .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default()
}

fn session_time(created_at: &DateTime<Utc>) -> String {
    local_time(created_at.timestamp_millis())
}

pub fn print_sessions(out: &mut impl Write, sessions: &[Session], active: Option<&str>) -> io::Result<()> {
    if sessions.is_empty() {
        return writeln!(out, "No sessions yet.");
    }
    writeln!(out, "  {:<38} {:<17} Name", "ID", "Created")?;
    writeln!(out, "  {}", "-".repeat(72))?;
    for session in sessions {
        let marker = if active == Some(session.id.as_str()) { '*' } else { ' ' };
        writeln!(
            out,
            "{} {:<38} {:<17} {}",
            marker,
            session.id,
            session_time(&session.created_at),
            session.display_name()
        )?;
    }
    Ok(())
}

/// One-line summary of reply stats, if there are any
pub fn reply_footer(message: &Message) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(intent) = &message.intent {
        parts.push(intent.clone());
    }
    if let Some(latency) = message.latency_ms {
        parts.push(format!("{} ms", latency));
    }
    if let Some(ttft) = message.ttft_ms {
        parts.push(format!("first token {} ms", ttft));
    }
    (!parts.is_empty()).then(|| format!("[{}]", parts.join(" | ")))
}

pub fn print_message(out: &mut impl Write, message: &Message) -> io::Result<()> {
    let who = match message.role {
        Role::User => "you",
        Role::Assistant => "assistant",
    };
    let error = if message.is_error { " (failed)" } else { "" };
    writeln!(out, "{} {}{}:", local_time(message.timestamp), who, error)?;
    writeln!(out, "{}", message.content)?;
    if message.is_assistant() {
        if let Some(footer) = reply_footer(message) {
            writeln!(out, "{}", footer)?;
        }
    }
    writeln!(out)
}

pub fn print_hits(out: &mut impl Write, hits: &[SearchHit]) -> io::Result<()> {
    if hits.is_empty() {
        return writeln!(out, "No matches.");
    }
    for (i, hit) in hits.iter().enumerate() {
        let session = hit.session_name.as_deref().unwrap_or(&hit.session_id);
        let preview: String = hit.content.chars().take(80).collect();
        writeln!(out, "{:>3}. [{}] {}: {}", i + 1, session, hit.role, preview.replace('\n', " "))?;
    }
    Ok(())
}

/// Prints a reply as it streams in.
///
/// Deltas are written as they arrive; a reply that never produced deltas
/// (non-streamed, or replaced by an error) is printed whole when finalized.
#[derive(Debug, Default)]
pub struct ReplyPrinter {
    streamed: HashSet<String>,
}

impl ReplyPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&mut self, out: &mut impl Write, event: &EngineEvent) -> io::Result<()> {
        match event {
            EngineEvent::MessageUpdated {
                message_id,
                delta: Some(delta),
            } => {
                self.streamed.insert(message_id.clone());
                write!(out, "{}", delta)?;
                out.flush()
            }
            EngineEvent::MessageFinalized { message, failure } => {
                let streamed = self.streamed.remove(&message.id);
                if !streamed {
                    write!(out, "{}", message.content)?;
                }
                writeln!(out)?;
                if let Some(failure) = failure {
                    if streamed {
                        writeln!(out, "{}", failure.user_message())?;
                    }
                    writeln!(out, "(use /retry to try again)")?;
                } else if let Some(footer) = reply_footer(message) {
                    writeln!(out, "{}", footer)?;
                }
                out.flush()
            }
            EngineEvent::SessionAssigned { session_id } => {
                tracing::debug!("Conversation saved as session {}", session_id);
                Ok(())
            }
            _ => Ok(()),
        }
    }
}
