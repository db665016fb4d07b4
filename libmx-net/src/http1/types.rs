use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which side of the connection a parser or codec sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Parses requests, receives masked WebSocket frames.
    Server,
    /// Parses responses, receives unmasked WebSocket frames.
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    Http10,
    Http11,
}

impl HttpVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http10 => "HTTP/1.0",
            Self::Http11 => "HTTP/1.1",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    pub target: String,
    pub version: HttpVersion,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub version: HttpVersion,
    pub status_code: u16,
    pub reason: String,
}

/// Content coding applied to a body after transfer framing is removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ContentCoding {
    #[default]
    Identity,
    Gzip,
    Deflate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpLimits {
    pub max_header_bytes: usize,
    pub max_start_line_bytes: usize,
    pub max_header_line_bytes: usize,
}

impl Default for HttpLimits {
    fn default() -> Self {
        Self {
            max_header_bytes: 16 * 1024,
            max_start_line_bytes: 4096,
            max_header_line_bytes: 4096,
        }
    }
}

/// Grammar position of a [`MessageParser`](super::MessageParser).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    Start,
    RequestOrStatusLine,
    RequestOrStatusLineEnding,
    HeaderStart,
    HeaderName,
    HeaderValue,
    HeaderValueEnding,
    HeadersEnding,
    BodyStart,
    IdentityBody,
    ChunkPreStart,
    ChunkStart,
    ChunkStartEnding,
    ChunkData,
    ChunkAfterData,
    ChunkTrailer,
    Done,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseWarning {
    pub kind: ParseWarningKind,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseWarningKind {
    ObsFoldDetected,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind:?} at byte {offset}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub offset: usize,
}

impl ParseError {
    pub(crate) fn new(kind: ParseErrorKind, offset: usize) -> Self {
        Self { kind, offset }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    MalformedStartLine,
    StartLineTooLong,
    UnsupportedMethod,
    UnsupportedVersion,
    MalformedHeader,
    HeaderBlockTooLarge,
    DuplicateHeaderConflict,
    UnsupportedTransferCoding,
    UnsupportedContentCoding,
    ChunkFramingError,
    ChunkSizeOverflow,
    ContentDecodeError,
    BodyParserRejected,
    UnexpectedEof,
    InvalidState,
}
