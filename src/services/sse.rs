use crate::models::StreamEvent;
use chrono::Utc;

/// Incremental `text/event-stream` decoder. Chunks may split lines and
/// UTF-8 sequences anywhere. Lines end in CRLF, LF or a bare CR.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    // A CR ended the previous line; a leading LF belongs to it.
    after_cr: bool,
    started: bool,
    event: Option<String>,
    data: Vec<String>,
    last_event_id: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.pending.extend_from_slice(chunk);
        let mut events = Vec::new();
        loop {
            if self.after_cr && !self.pending.is_empty() {
                if self.pending[0] == b'\n' {
                    self.pending.remove(0);
                }
                self.after_cr = false;
            }
            let Some(pos) = self.pending.iter().position(|b| *b == b'\n' || *b == b'\r') else {
                break;
            };
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.after_cr = line.pop() == Some(b'\r');
            if !self.started {
                self.started = true;
                if line.starts_with(b"\xEF\xBB\xBF") {
                    line.drain(..3);
                }
            }
            if let Some(event) = self.process_line(&String::from_utf8_lossy(&line)) {
                events.push(event);
            }
        }
        events
    }

    fn process_line(&mut self, line: &str) -> Option<StreamEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.find(':') {
            Some(idx) => {
                let value = &line[idx + 1..];
                (&line[..idx], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" if !value.contains('\0') => {
                self.last_event_id = Some(value.to_string()).filter(|id| !id.is_empty());
            }
            _ => {}
        }
        None
    }

    /// A block without `data:` lines resets the event name and yields
    /// nothing. The last event id carries over to later events.
    fn dispatch(&mut self) -> Option<StreamEvent> {
        let name = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let event = StreamEvent {
            id: self.last_event_id.clone(),
            event: name
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| "message".to_string()),
            data: self.data.join("\n"),
            received_at: Utc::now(),
        };
        self.data.clear();
        Some(event)
    }
}
