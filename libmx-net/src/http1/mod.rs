mod content;
mod parser;
mod transfer;
mod types;

pub use parser::MessageParser;
pub use transfer::encode_chunked;
pub use types::{
    ContentCoding, HttpLimits, HttpVersion, ParseError, ParseErrorKind, ParseState, ParseWarning,
    ParseWarningKind, RequestLine, Role, StatusLine,
};
