//! Domain-specific error types
//!
//! Every error carries a stable, machine-parseable `code()` which is logged
//! next to the human-readable text:
//!
//! ```text
//! error_code="decode.incomplete_data" error="incomplete data: field 240 truncated"
//! ```
//!
//! Scope of each error:
//! - `DecodeError`: aborts processing of one update
//! - `RegistrationError`: one link stays missing from its chain
//! - `EncodeError` / `CacheError`: fatal to one update or one response
//! - `StartupError`: aborts process startup
//! - `LifecycleError`: invalid transitions and teardown invariant violations

use std::fmt;

use crate::core::types::FieldId;

/// Category of a decode failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeErrorKind {
    /// Buffer ended before the message did
    IncompleteData,
    /// Message was produced by an unsupported protocol version
    UnsupportedVersion,
    /// Structurally invalid content (bad tag, invalid UTF-8, ...)
    InvalidData,
    /// A mandatory field is not present
    MissingField,
}

impl DecodeErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            DecodeErrorKind::IncompleteData => "decode.incomplete_data",
            DecodeErrorKind::UnsupportedVersion => "decode.unsupported_version",
            DecodeErrorKind::InvalidData => "decode.invalid_data",
            DecodeErrorKind::MissingField => "decode.missing_field",
        }
    }
}

impl fmt::Display for DecodeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DecodeErrorKind::IncompleteData => "incomplete data",
            DecodeErrorKind::UnsupportedVersion => "unsupported version",
            DecodeErrorKind::InvalidData => "invalid data",
            DecodeErrorKind::MissingField => "missing field",
        };
        f.write_str(text)
    }
}

/// Malformed or incomplete binary data
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct DecodeError {
    pub kind: DecodeErrorKind,
    pub detail: String,
}

impl DecodeError {
    pub fn new(kind: DecodeErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn incomplete(detail: impl Into<String>) -> Self {
        Self::new(DecodeErrorKind::IncompleteData, detail)
    }

    pub fn invalid(detail: impl Into<String>) -> Self {
        Self::new(DecodeErrorKind::InvalidData, detail)
    }

    pub fn missing_field(id: FieldId) -> Self {
        Self::new(DecodeErrorKind::MissingField, format!("field {} not present", id))
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }
}

/// A link could not be subscribed upstream
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot create stream for \"{item}\": {reason}")]
pub struct RegistrationError {
    pub item: String,
    pub reason: String,
}

impl RegistrationError {
    pub fn new(item: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            item: item.into(),
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        "registration_failure"
    }
}

/// A message could not be encoded
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("encode failed: {detail}")]
pub struct EncodeError {
    pub detail: String,
}

impl EncodeError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        "encode_error"
    }
}

/// The payload cache refused an operation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cache error {error_id}: {text}")]
pub struct CacheError {
    pub error_id: i32,
    pub text: String,
}

impl CacheError {
    pub const CAPACITY_EXCEEDED: i32 = -1;
    pub const INVALID_MESSAGE: i32 = -2;

    pub fn new(error_id: i32, text: impl Into<String>) -> Self {
        Self {
            error_id,
            text: text.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        "cache_error"
    }
}

/// Transport-level failure (send, close, poll, initialization)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport not initialized: {0}")]
    Initialization(String),

    #[error("channel {0} is closed")]
    ChannelClosed(u64),

    #[error("transport disconnected")]
    Disconnected,

    #[error("send failed: {0}")]
    Send(String),
}

impl TransportError {
    pub fn code(&self) -> &'static str {
        match self {
            TransportError::Initialization(_) => "transport.initialization",
            TransportError::ChannelClosed(_) => "transport.channel_closed",
            TransportError::Disconnected => "transport.disconnected",
            TransportError::Send(_) => "transport.send",
        }
    }
}

/// Processing of one upstream update failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpdateError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl UpdateError {
    pub fn code(&self) -> &'static str {
        match self {
            UpdateError::Decode(e) => e.code(),
            UpdateError::Encode(e) => e.code(),
            UpdateError::Cache(e) => e.code(),
        }
    }
}

/// Serving one downstream request failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl RequestError {
    pub fn code(&self) -> &'static str {
        match self {
            RequestError::Encode(e) => e.code(),
            RequestError::Transport(e) => e.code(),
        }
    }
}

/// A mandatory collaborator could not be brought up
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StartupError {
    #[error("collaborator {name} failed to initialize: {reason}")]
    Collaborator { name: &'static str, reason: String },

    #[error("cannot initialize from state {0}")]
    InvalidState(&'static str),

    #[error("failed to spawn {context} thread: {reason}")]
    Spawn { context: &'static str, reason: String },
}

impl StartupError {
    pub fn code(&self) -> &'static str {
        match self {
            StartupError::Collaborator { .. } => "startup.collaborator",
            StartupError::InvalidState(_) => "startup.invalid_state",
            StartupError::Spawn { .. } => "startup.spawn",
        }
    }
}

/// Lifecycle sequencing failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Startup(#[from] StartupError),

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    #[error("{context} context panicked")]
    ContextPanicked { context: &'static str },

    #[error("collaborator {collaborator} still referenced at teardown (strong count {strong_count})")]
    TeardownViolation {
        collaborator: &'static str,
        strong_count: usize,
    },
}

impl LifecycleError {
    pub fn code(&self) -> &'static str {
        match self {
            LifecycleError::Startup(e) => e.code(),
            LifecycleError::InvalidTransition { .. } => "lifecycle.invalid_transition",
            LifecycleError::ContextPanicked { .. } => "lifecycle.context_panicked",
            LifecycleError::TeardownViolation { .. } => "lifecycle.teardown_violation",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_display_and_code() {
        let err = DecodeError::incomplete("field 240 truncated");
        assert_eq!(err.to_string(), "incomplete data: field 240 truncated");
        assert_eq!(err.code(), "decode.incomplete_data");
    }

    #[test]
    fn test_missing_field_mentions_id() {
        let err = DecodeError::missing_field(238);
        assert!(err.to_string().contains("238"));
        assert_eq!(err.kind, DecodeErrorKind::MissingField);
    }

    #[test]
    fn test_update_error_delegates_code() {
        let err: UpdateError = CacheError::new(CacheError::CAPACITY_EXCEEDED, "full").into();
        assert_eq!(err.code(), "cache_error");

        let err: UpdateError = DecodeError::invalid("bad tag").into();
        assert_eq!(err.code(), "decode.invalid_data");
    }

    #[test]
    fn test_teardown_violation_display() {
        let err = LifecycleError::TeardownViolation {
            collaborator: "feed transport",
            strong_count: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains("feed transport"));
        assert!(msg.contains("2"));
        assert_eq!(err.code(), "lifecycle.teardown_violation");
    }
}
