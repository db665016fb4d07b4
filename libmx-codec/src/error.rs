use std::string::FromUtf8Error;

use thiserror::Error;

/// Failure of one of the text or compression codecs.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("base64 decoding failed: {0}")]
    Base64(String),
    #[error("percent decoding failed: {0}")]
    Url(String),
    #[error("decoded text is not utf-8: {0}")]
    Utf8(String),
    #[error("stream decompression failed: {0}")]
    Compression(String),
}

impl From<FromUtf8Error> for CodecError {
    fn from(err: FromUtf8Error) -> Self {
        Self::Utf8(err.to_string())
    }
}
