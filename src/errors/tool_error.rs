use serde::Serialize;
use serde_json::Value;
use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    InvalidParams,
    Denied,
    NotFound,
    Conflict,
    Timeout,
    Retryable,
    Internal,
    /// 401 from the identity provider that a refresh could not recover.
    AuthExpired,
    /// Code/state exchange rejected; the sign-in flow stays where it was.
    AuthExchangeFailed,
    /// Non-401 failure while loading the user profile; the token is kept.
    ProfileFetchFailed,
    RequestCancelled,
    RequestFailed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub retryable: bool,
}

impl ToolError {
    pub fn new(kind: ToolErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            hint: None,
            details: None,
            retryable: matches!(
                kind,
                ToolErrorKind::Timeout | ToolErrorKind::Retryable | ToolErrorKind::RequestFailed
            ),
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::InvalidParams, "INVALID_PARAMS", message)
    }

    pub fn denied(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Denied, "DENIED", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::NotFound, "NOT_FOUND", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Conflict, "CONFLICT", message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Timeout, "TIMEOUT", message)
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Retryable, "RETRYABLE", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Internal, "INTERNAL", message)
    }

    pub fn auth_expired(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::AuthExpired, "AUTH_EXPIRED", message)
    }

    pub fn auth_exchange_failed(message: impl Into<String>) -> Self {
        Self::new(
            ToolErrorKind::AuthExchangeFailed,
            "AUTH_EXCHANGE_FAILED",
            message,
        )
    }

    pub fn profile_fetch_failed(message: impl Into<String>) -> Self {
        Self::new(
            ToolErrorKind::ProfileFetchFailed,
            "PROFILE_FETCH_FAILED",
            message,
        )
    }

    pub fn request_cancelled(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::RequestCancelled, "REQUEST_CANCELLED", message)
    }

    pub fn request_failed(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::RequestFailed, "REQUEST_FAILED", message)
    }

    /// Errors that end up as an inline notice the user can close.
    pub fn is_dismissible(&self) -> bool {
        matches!(
            self.kind,
            ToolErrorKind::ProfileFetchFailed
                | ToolErrorKind::AuthExchangeFailed
                | ToolErrorKind::RequestFailed
        )
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for ToolError {}

impl From<std::io::Error> for ToolError {
    fn from(err: std::io::Error) -> Self {
        ToolError::internal(err.to_string())
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(err: serde_json::Error) -> Self {
        ToolError::internal(format!("JSON error: {}", err))
    }
}
