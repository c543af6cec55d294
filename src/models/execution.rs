use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Idle,
    Sending,
    Connected,
    Settled,
    Cancelled,
    Errored,
}

impl ExecutionState {
    /// Sending and Connected hold a transport and block another send.
    pub fn is_active(self) -> bool {
        matches!(self, ExecutionState::Sending | ExecutionState::Connected)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionState::Settled | ExecutionState::Cancelled | ExecutionState::Errored
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionState::Idle => "idle",
            ExecutionState::Sending => "sending",
            ExecutionState::Connected => "connected",
            ExecutionState::Settled => "settled",
            ExecutionState::Cancelled => "cancelled",
            ExecutionState::Errored => "errored",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineKind {
    Info,
    HeaderOut,
    HeaderIn,
    DataIn,
    Error,
}

impl TimelineKind {
    fn prefix(self) -> &'static str {
        match self {
            TimelineKind::Info | TimelineKind::Error => "*",
            TimelineKind::HeaderOut => ">",
            TimelineKind::HeaderIn => "<",
            TimelineKind::DataIn => "|",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelineEntry {
    pub kind: TimelineKind,
    pub text: String,
    pub at: DateTime<Utc>,
}

impl TimelineEntry {
    pub fn new(kind: TimelineKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            at: Utc::now(),
        }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self::new(TimelineKind::Info, text)
    }

    /// One console line, e.g. `< Content-Type: application/pdf`.
    pub fn render(&self) -> String {
        format!("{} {}", self.kind.prefix(), self.text)
    }
}

/// One parsed `text/event-stream` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub event: String,
    pub data: String,
    pub received_at: DateTime<Utc>,
}
