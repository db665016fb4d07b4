mod body;
mod config;
mod cookies;
mod headers;
mod http1;
mod websocket;

pub use http1::{
    ContentCoding, HttpLimits, HttpVersion, MessageParser, ParseError, ParseErrorKind, ParseState,
    ParseWarning, ParseWarningKind, RequestLine, Role, StatusLine, encode_chunked,
};

pub use headers::{
    Accept, Browser, CacheControl, Connection, ContentDisposition, ContentEncoding, ContentLength,
    ContentType, DuplicateBehavior, GenericHeader, HeaderConstructor, HeaderError, HeaderMap,
    HeaderRecord, HeaderRegistry, Host, SecWebSocketAccept, SecWebSocketKey, SecWebSocketVersion,
    TransferEncoding, TypedHeader, Upgrade, decode_header_text, is_token, is_token_char,
};

pub use cookies::{Cookie, CookieJar, SameSite};

pub use body::{
    AnyBodyParser, BodyError, BodyLimits, BodyParser, DefaultBodyParser, DiscardBodyParser,
    EntityFlag, FileField, FormFields, JsonBodyParser, MessageContext, MultipartFormParser,
    TempUpload, UrlEncodedFormParser,
};

pub use websocket::{
    FrameSink, MAX_CONTROL_PAYLOAD, MessageWriter, Opcode, WebSocketCodec, WebSocketConfig,
    WebSocketError, WebSocketErrorKind, WebSocketHandler, WebSocketSender, accept_key,
    apply_mask, build_accept_response, encode_frame, is_websocket_upgrade,
};

pub use config::{ConfigError, EngineConfig};
