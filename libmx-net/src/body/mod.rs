mod default;
mod discard;
mod form;
mod json;
mod multipart;
mod urlencoded;

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::headers::{ContentType, HeaderMap};
use crate::http1::Role;

pub use default::DefaultBodyParser;
pub use discard::DiscardBodyParser;
pub use form::{FileField, FormFields, TempUpload};
pub use json::JsonBodyParser;
pub use multipart::MultipartFormParser;
pub use urlencoded::UrlEncodedFormParser;

const MIN_FIELD_BYTES: usize = 32 * 1024;

#[derive(Debug, Error)]
pub enum BodyError {
    #[error("malformed body: {0}")]
    Malformed(String),
    #[error("body ended before its closing delimiter")]
    Truncated,
    #[error("body parser already finished")]
    AlreadyFinished,
    #[error("body parser used before initialize")]
    NotInitialized,
    #[error("body I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid JSON body: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BodyLimits {
    pub max_memory_bytes: usize,
    pub max_body_bytes: u64,
    pub max_field_bytes: usize,
    pub max_file_bytes: u64,
    pub max_file_count: usize,
    pub temp_dir: String,
}

impl Default for BodyLimits {
    fn default() -> Self {
        Self {
            max_memory_bytes: 32 * 1024,
            max_body_bytes: 10 * 1024 * 1024,
            max_field_bytes: 256_000,
            max_file_bytes: 2 * 1024 * 1024,
            max_file_count: 4,
            temp_dir: String::new(),
        }
    }
}

impl BodyLimits {
    pub(crate) fn field_cap(&self) -> usize {
        self.max_field_bytes.max(MIN_FIELD_BYTES)
    }

    pub(crate) fn temp_file(&self) -> io::Result<NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("mx-body-");
        if self.temp_dir.is_empty() {
            builder.tempfile()
        } else {
            builder.tempfile_in(Path::new(&self.temp_dir))
        }
    }
}

/// Soft "entity too large" marker shared between a body parser and its owner.
#[derive(Debug, Clone, Default)]
pub struct EntityFlag(Arc<AtomicBool>);

impl EntityFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// What a body parser learns about the message once its headers are complete.
#[derive(Debug, Clone, Copy)]
pub struct MessageContext<'a> {
    pub role: Role,
    pub headers: &'a HeaderMap,
    pub content_length: Option<u64>,
    pub chunked: bool,
}

impl MessageContext<'_> {
    pub fn content_type(&self) -> Option<&ContentType> {
        self.headers.typed::<ContentType>()
    }
}

/// Consumer of decoded body bytes.
///
/// `initialize` runs once the headers are known, `feed` any number of times and
/// `finish` exactly once at the end of the body.
pub trait BodyParser: Send {
    fn kind(&self) -> &'static str;

    fn initialize(&mut self, context: &MessageContext<'_>) -> Result<(), BodyError>;

    fn feed(&mut self, data: &[u8]) -> Result<(), BodyError>;

    fn finish(&mut self) -> Result<(), BodyError>;

    fn entity_flag(&self) -> &EntityFlag;

    fn mark_entity_too_large(&self) {
        self.entity_flag().mark();
    }

    fn is_entity_too_large(&self) -> bool {
        self.entity_flag().is_set()
    }
}

pub enum AnyBodyParser {
    Default(DefaultBodyParser),
    Multipart(MultipartFormParser),
    UrlEncoded(UrlEncodedFormParser),
    Json(JsonBodyParser),
    Discard(DiscardBodyParser),
    Custom(Box<dyn BodyParser>),
}

impl AnyBodyParser {
    pub fn as_parser(&self) -> &dyn BodyParser {
        match self {
            Self::Default(parser) => parser,
            Self::Multipart(parser) => parser,
            Self::UrlEncoded(parser) => parser,
            Self::Json(parser) => parser,
            Self::Discard(parser) => parser,
            Self::Custom(parser) => parser.as_ref(),
        }
    }

    pub fn as_parser_mut(&mut self) -> &mut dyn BodyParser {
        match self {
            Self::Default(parser) => parser,
            Self::Multipart(parser) => parser,
            Self::UrlEncoded(parser) => parser,
            Self::Json(parser) => parser,
            Self::Discard(parser) => parser,
            Self::Custom(parser) => parser.as_mut(),
        }
    }
}

impl std::fmt::Debug for AnyBodyParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AnyBodyParser")
            .field(&self.as_parser().kind())
            .finish()
    }
}

impl BodyParser for AnyBodyParser {
    fn kind(&self) -> &'static str {
        self.as_parser().kind()
    }

    fn initialize(&mut self, context: &MessageContext<'_>) -> Result<(), BodyError> {
        self.as_parser_mut().initialize(context)
    }

    fn feed(&mut self, data: &[u8]) -> Result<(), BodyError> {
        self.as_parser_mut().feed(data)
    }

    fn finish(&mut self) -> Result<(), BodyError> {
        self.as_parser_mut().finish()
    }

    fn entity_flag(&self) -> &EntityFlag {
        self.as_parser().entity_flag()
    }
}

impl From<DefaultBodyParser> for AnyBodyParser {
    fn from(parser: DefaultBodyParser) -> Self {
        Self::Default(parser)
    }
}

impl From<MultipartFormParser> for AnyBodyParser {
    fn from(parser: MultipartFormParser) -> Self {
        Self::Multipart(parser)
    }
}

impl From<UrlEncodedFormParser> for AnyBodyParser {
    fn from(parser: UrlEncodedFormParser) -> Self {
        Self::UrlEncoded(parser)
    }
}

impl From<JsonBodyParser> for AnyBodyParser {
    fn from(parser: JsonBodyParser) -> Self {
        Self::Json(parser)
    }
}

impl From<DiscardBodyParser> for AnyBodyParser {
    fn from(parser: DiscardBodyParser) -> Self {
        Self::Discard(parser)
    }
}

impl From<Box<dyn BodyParser>> for AnyBodyParser {
    fn from(parser: Box<dyn BodyParser>) -> Self {
        Self::Custom(parser)
    }
}
