//! Server-Sent Events wire framing.
//!
//! [`SseEvent::encode`] produces frames for the server side; [`SseParser`]
//! reassembles events from an arbitrarily chunked byte stream on the client
//! side and keeps the resumption state (`id` / `retry`) across events.

use bytes::{Buf, BytesMut};

pub const DEFAULT_EVENT_TYPE: &str = "message";

/// Longest field line the parser buffers before discarding it.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

/// A single dispatched (or to-be-encoded) event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event_type: String,
    /// Payload with the final newline stripped; `None` if no `data` field was seen.
    pub data: Option<String>,
    /// Last event id known when this event was dispatched.
    pub id: Option<String>,
    /// Reconnection delay in milliseconds.
    pub retry: Option<u64>,
}

impl SseEvent {
    pub fn new(event_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            data: Some(data.into()),
            id: None,
            retry: None,
        }
    }

    /// An event of the default `message` type.
    pub fn message(data: impl Into<String>) -> Self {
        Self::new(DEFAULT_EVENT_TYPE, data)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_retry(mut self, retry_ms: u64) -> Self {
        self.retry = Some(retry_ms);
        self
    }

    /// Encode as a complete frame terminated by a blank line.
    ///
    /// The `event:` line is omitted for the default type, and multi-line
    /// payloads become one `data:` line per payload line.
    pub fn encode(&self) -> String {
        let mut frame = String::new();
        if let Some(id) = &self.id {
            frame.push_str("id: ");
            frame.push_str(id);
            frame.push('\n');
        }
        if let Some(retry) = self.retry {
            frame.push_str(&format!("retry: {}\n", retry));
        }
        if self.event_type != DEFAULT_EVENT_TYPE {
            frame.push_str("event: ");
            frame.push_str(&self.event_type);
            frame.push('\n');
        }
        if let Some(data) = &self.data {
            for line in data.split('\n') {
                frame.push_str("data: ");
                frame.push_str(line);
                frame.push('\n');
            }
        }
        frame.push('\n');
        frame
    }
}

/// Incremental event-stream parser.
#[derive(Debug)]
pub struct SseParser {
    buffer: BytesMut,
    /// Bytes of `buffer` already known to hold no newline.
    scanned: usize,
    /// Skipping the rest of an oversized line.
    discarding: bool,
    max_line_length: usize,
    event_type: Option<String>,
    data: Option<String>,
    last_event_id: Option<String>,
    retry: Option<u64>,
}

impl Default for SseParser {
    fn default() -> Self {
        Self::with_max_line_length(DEFAULT_MAX_LINE_LENGTH)
    }
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line_length(max_line_length: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            scanned: 0,
            discarding: false,
            max_line_length,
            event_type: None,
            data: None,
            last_event_id: None,
            retry: None,
        }
    }

    /// Append a chunk and return every event completed by it.
    ///
    /// Lines longer than the maximum are dropped without affecting the
    /// surrounding event.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        loop {
            let newline = self.buffer[self.scanned..]
                .iter()
                .position(|b| *b == b'\n')
                .map(|offset| self.scanned + offset);
            let Some(end) = newline else {
                self.scanned = self.buffer.len();
                if self.scanned > self.max_line_length {
                    tracing::warn!(
                        max = self.max_line_length,
                        "Discarding oversized event-stream line"
                    );
                    self.buffer.clear();
                    self.scanned = 0;
                    self.discarding = true;
                }
                break;
            };

            let raw = self.buffer.split_to(end);
            self.buffer.advance(1);
            self.scanned = 0;
            if std::mem::take(&mut self.discarding) {
                continue;
            }
            if raw.len() > self.max_line_length {
                tracing::warn!(
                    max = self.max_line_length,
                    "Discarding oversized event-stream line"
                );
                continue;
            }

            let mut line = &raw[..];
            if let Some(stripped) = line.strip_suffix(b"\r") {
                line = stripped;
            }
            let line = String::from_utf8_lossy(line);
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Flush an unterminated trailing line and any pending event.
    ///
    /// Used for one-shot bodies where the final blank line may be missing.
    pub fn finish(&mut self) -> Option<SseEvent> {
        self.scanned = 0;
        if std::mem::take(&mut self.discarding) {
            self.buffer.clear();
        }
        if !self.buffer.is_empty() {
            let raw = self.buffer.split();
            let line = String::from_utf8_lossy(&raw).into_owned();
            let line = line.strip_suffix('\r').unwrap_or(&line).to_string();
            if let Some(event) = self.process_line(&line) {
                return Some(event);
            }
        }
        if self.data.is_some() || self.event_type.is_some() {
            return Some(self.dispatch());
        }
        None
    }

    /// Drop partial input from a broken connection, keeping resumption state.
    pub fn reset_stream(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
        self.discarding = false;
        self.event_type = None;
        self.data = None;
    }

    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// Server-requested reconnection delay in milliseconds.
    pub fn retry(&self) -> Option<u64> {
        self.retry
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return Some(self.dispatch());
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = line.split_once(':')?;
        let value = value.strip_prefix(' ').unwrap_or(value);

        match field {
            "event" => self.event_type = Some(value.to_string()),
            "data" => {
                let data = self.data.get_or_insert_with(String::new);
                data.push_str(value);
                data.push('\n');
            }
            "id" => {
                if !value.contains('\0') {
                    self.last_event_id = Some(value.to_string());
                }
            }
            "retry" => {
                if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
                    if let Ok(retry) = value.parse() {
                        self.retry = Some(retry);
                    }
                }
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> SseEvent {
        let data = self.data.take().map(|mut data| {
            if data.ends_with('\n') {
                data.pop();
            }
            data
        });
        let event_type = self
            .event_type
            .take()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_EVENT_TYPE.to_string());

        SseEvent {
            event_type,
            data,
            id: self.last_event_id.clone(),
            retry: self.retry,
        }
    }
}
