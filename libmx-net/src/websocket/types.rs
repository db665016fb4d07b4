use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Ceiling for a reassembled data message.
    pub max_message_size: usize,
    /// Largest payload written in a single outgoing frame.
    pub max_frame_payload: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_message_size: 8192,
            max_frame_payload: 16 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind:?} at byte {offset}")]
pub struct WebSocketError {
    pub kind: WebSocketErrorKind,
    pub offset: usize,
}

impl WebSocketError {
    pub(crate) fn new(kind: WebSocketErrorKind, offset: usize) -> Self {
        Self { kind, offset }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebSocketErrorKind {
    UnmaskedClientFrame,
    MaskedServerFrame,
    ReservedBitsSet,
    UnknownOpcode,
    UnexpectedContinuation,
    InterleavedDataFrame,
    FragmentedControlFrame,
    ControlFrameTooLarge,
    MessageTooLarge,
    InvalidClosePayload,
    InvalidUtf8,
    /// The connection is closing or closed; nothing more is sent or parsed.
    Closed,
    /// The frame sink refused a frame.
    Sink(String),
}

impl WebSocketErrorKind {
    /// Close code sent to the peer for a protocol violation.
    pub fn close_code(&self) -> Option<u16> {
        match self {
            Self::MessageTooLarge => Some(1009),
            Self::InvalidUtf8 => Some(1007),
            Self::Closed | Self::Sink(_) => None,
            _ => Some(1002),
        }
    }
}
