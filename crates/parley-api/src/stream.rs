//! Decoding of the line-oriented completion stream.
//!
//! The server writes one record per line: `data: {json}` for payloads and
//! `data: [DONE]` once the reply is complete. Reads may split a record across
//! chunks or carry several records at once, so bytes are buffered until a
//! newline arrives. Buffering raw bytes (rather than decoded text) keeps a
//! multi-byte character that straddles two reads intact.

use crate::{
    error::{Error, Result},
    types::StreamPayload,
};

/// Prefix of records that carry a payload
pub const DATA_PREFIX: &str = "data:";

/// Payload marking the end of the stream
pub const DONE_SENTINEL: &str = "[DONE]";

/// A decoded stream record
#[derive(Debug, Clone, PartialEq)]
pub enum WireEvent {
    /// A JSON payload with an optional content delta and/or metadata
    Payload(StreamPayload),
    /// The terminal sentinel
    Done,
}

/// Decode a single line. Returns `None` for lines that are not data records
/// (blank separators, comments, other SSE fields).
pub fn parse_line(line: &str) -> Option<Result<WireEvent>> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let data = line.strip_prefix(DATA_PREFIX)?;
    let data = data.strip_prefix(' ').unwrap_or(data);

    if data.trim() == DONE_SENTINEL {
        return Some(Ok(WireEvent::Done));
    }

    Some(
        serde_json::from_str::<StreamPayload>(data)
            .map(WireEvent::Payload)
            .map_err(|e| Error::Protocol(format!("invalid payload {:?}: {}", data, e))),
    )
}

/// Splits incoming bytes into complete lines, carrying the unterminated tail
/// over to the next read.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed, without the `\n`
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let Some(last_newline) = self.pending.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };

        let rest = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, rest);

        complete[..complete.len() - 1]
            .split(|b| *b == b'\n')
            .map(|line| String::from_utf8_lossy(line).into_owned())
            .collect()
    }

    /// Take whatever is left once the stream has ended
    pub fn take_remainder(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }

    /// Number of buffered bytes not yet terminated by a newline
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Turns raw chunks into [`WireEvent`]s. Nothing after `[DONE]` is decoded.
#[derive(Debug, Default)]
pub struct WireDecoder {
    lines: LineBuffer,
    done: bool,
}

impl WireDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the terminal sentinel has been seen
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed one network read
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<WireEvent>> {
        if self.done {
            return Vec::new();
        }
        let lines = self.lines.push(chunk);
        self.decode(lines)
    }

    /// Flush a trailing record that was not newline-terminated
    pub fn finish(&mut self) -> Vec<Result<WireEvent>> {
        if self.done {
            return Vec::new();
        }
        let lines = self.lines.take_remainder().into_iter().collect();
        self.decode(lines)
    }

    fn decode(&mut self, lines: Vec<String>) -> Vec<Result<WireEvent>> {
        let mut events = Vec::new();
        for line in lines {
            match parse_line(&line) {
                Some(Ok(WireEvent::Done)) => {
                    self.done = true;
                    events.push(Ok(WireEvent::Done));
                    break;
                }
                Some(event) => events.push(event),
                None => {}
            }
        }
        events
    }
}
