use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::content::BodyPipeline;
use super::transfer::TransferDecoder;
use super::types::{
    ContentCoding, HttpLimits, HttpVersion, ParseError, ParseErrorKind, ParseState, ParseWarning,
    ParseWarningKind, RequestLine, Role, StatusLine,
};
use crate::body::{AnyBodyParser, BodyParser, MessageContext};
use crate::cookies::CookieJar;
use crate::headers::{
    Browser, Connection, ContentEncoding, ContentLength, HeaderError, HeaderMap, HeaderRegistry,
    Host, TransferEncoding, Upgrade, decode_header_text, is_token_char,
};

const METHODS: &[&str] = &[
    "CHECKOUT",
    "CONNECT",
    "COPY",
    "DELETE",
    "GET",
    "HEAD",
    "LOCK",
    "MKCOL",
    "MOVE",
    "MKACTIVITY",
    "MERGE",
    "M-SEARCH",
    "NOTIFY",
    "OPTIONS",
    "PATCH",
    "POST",
    "PROPFIND",
    "PROPPATCH",
    "PUT",
    "PURGE",
    "REPORT",
    "SUBSCRIBE",
    "SEARCH",
    "TRACE",
    "UNLOCK",
    "UNSUBSCRIBE",
];

/// Incremental HTTP/1.x message parser bound to one connection direction.
///
/// [`parse`](Self::parse) accepts any number of bytes and resumes where the
/// previous call stopped. It returns early when the headers are complete
/// ([`ParseState::BodyStart`], the moment to attach a body parser) and when the
/// message is complete ([`ParseState::Done`]); unconsumed bytes belong to the
/// caller.
#[derive(Debug)]
pub struct MessageParser {
    role: Role,
    limits: HttpLimits,
    registry: Arc<HeaderRegistry>,
    state: ParseState,
    consumed: usize,
    line: Vec<u8>,
    name: Vec<u8>,
    value: Vec<u8>,
    value_space: bool,
    header_bytes: usize,
    request_line: Option<RequestLine>,
    status_line: Option<StatusLine>,
    headers: HeaderMap,
    trailers: HeaderMap,
    cookies: CookieJar,
    warnings: Vec<ParseWarning>,
    head_response: bool,
    content_length: Option<u64>,
    chunked: bool,
    content_coding: ContentCoding,
    transfer: Option<TransferDecoder>,
    pipeline: BodyPipeline,
}

impl MessageParser {
    pub fn new(role: Role) -> Self {
        Self::with_config(role, HttpLimits::default(), Arc::new(HeaderRegistry::standard()))
    }

    pub fn with_config(role: Role, limits: HttpLimits, registry: Arc<HeaderRegistry>) -> Self {
        Self {
            role,
            limits,
            registry,
            state: ParseState::Start,
            consumed: 0,
            line: Vec::new(),
            name: Vec::new(),
            value: Vec::new(),
            value_space: false,
            header_bytes: 0,
            request_line: None,
            status_line: None,
            headers: HeaderMap::new(),
            trailers: HeaderMap::new(),
            cookies: CookieJar::new(),
            warnings: Vec::new(),
            head_response: false,
            content_length: None,
            chunked: false,
            content_coding: ContentCoding::Identity,
            transfer: None,
            pipeline: BodyPipeline::default(),
        }
    }

    /// Returns the parser to [`ParseState::Start`] for the next message on the
    /// connection and drops any attached body parser.
    pub fn reset(&mut self) {
        self.state = ParseState::Start;
        self.consumed = 0;
        self.line.clear();
        self.name.clear();
        self.value.clear();
        self.value_space = false;
        self.header_bytes = 0;
        self.request_line = None;
        self.status_line = None;
        self.headers.clear();
        self.trailers.clear();
        self.cookies.clear();
        self.warnings.clear();
        self.head_response = false;
        self.content_length = None;
        self.chunked = false;
        self.content_coding = ContentCoding::Identity;
        self.transfer = None;
        self.pipeline.clear();
    }

    /// Feeds bytes and returns how many were consumed.
    pub fn parse(&mut self, input: &[u8]) -> Result<usize, ParseError> {
        if matches!(self.state, ParseState::Done | ParseState::Error) {
            return Err(ParseError::new(ParseErrorKind::InvalidState, self.consumed));
        }
        match self.parse_bytes(input) {
            Ok(used) => {
                self.consumed += used;
                Ok(used)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Signals end of input; completes a close-delimited body.
    pub fn finish(&mut self) -> Result<(), ParseError> {
        let offset = self.consumed;
        match self.state {
            ParseState::Done => Ok(()),
            ParseState::Error => Err(ParseError::new(ParseErrorKind::InvalidState, offset)),
            _ => {
                let Some(transfer) = self.transfer.as_mut() else {
                    return Err(self.fail(ParseError::new(ParseErrorKind::UnexpectedEof, offset)));
                };
                let result = transfer
                    .finish(offset)
                    .and_then(|()| self.pipeline.finish(offset));
                match result {
                    Ok(()) => {
                        self.complete();
                        Ok(())
                    }
                    Err(err) => Err(self.fail(err)),
                }
            }
        }
    }

    /// Attaches the consumer for this message's body. Only valid at
    /// [`ParseState::BodyStart`].
    pub fn set_body_parser(&mut self, parser: impl Into<AnyBodyParser>) -> Result<(), ParseError> {
        if self.state != ParseState::BodyStart {
            return Err(ParseError::new(ParseErrorKind::InvalidState, self.consumed));
        }
        let mut parser = parser.into();
        let context = MessageContext {
            role: self.role,
            headers: &self.headers,
            content_length: self.content_length,
            chunked: self.chunked,
        };
        if let Err(err) = parser.initialize(&context) {
            debug!(kind = parser.kind(), error = %err, "body parser refused the message");
            let err = ParseError::new(ParseErrorKind::BodyParserRejected, self.consumed);
            return Err(self.fail(err));
        }
        debug!(kind = parser.kind(), "body parser attached");
        self.pipeline.attach(parser);
        Ok(())
    }

    pub fn body_parser(&self) -> Option<&AnyBodyParser> {
        self.pipeline.parser()
    }

    pub fn take_body_parser(&mut self) -> Option<AnyBodyParser> {
        self.pipeline.take_parser()
    }

    /// Whether the attached body parser gave up on an oversized entity.
    pub fn is_entity_too_large(&self) -> bool {
        self.pipeline
            .parser()
            .is_some_and(|parser| parser.is_entity_too_large())
    }

    /// Marks the response being parsed as the answer to a HEAD request.
    pub fn set_head_response(&mut self, head: bool) {
        self.head_response = head;
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    /// Bytes consumed since construction or the last reset.
    pub fn bytes_consumed(&self) -> usize {
        self.consumed
    }

    pub fn request_line(&self) -> Option<&RequestLine> {
        self.request_line.as_ref()
    }

    pub fn status_line(&self) -> Option<&StatusLine> {
        self.status_line.as_ref()
    }

    pub fn method(&self) -> Option<&str> {
        self.request_line.as_ref().map(|line| line.method.as_str())
    }

    pub fn target(&self) -> Option<&str> {
        self.request_line.as_ref().map(|line| line.target.as_str())
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status_line.as_ref().map(|line| line.status_code)
    }

    pub fn version(&self) -> Option<HttpVersion> {
        self.request_line
            .as_ref()
            .map(|line| line.version)
            .or_else(|| self.status_line.as_ref().map(|line| line.version))
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Trailer fields of a chunked body.
    pub fn trailers(&self) -> &HeaderMap {
        &self.trailers
    }

    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    pub fn warnings(&self) -> &[ParseWarning] {
        &self.warnings
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    pub fn is_chunked(&self) -> bool {
        self.chunked
    }

    pub fn content_coding(&self) -> ContentCoding {
        self.content_coding
    }

    pub fn is_keep_alive(&self) -> bool {
        let connection = self.headers.typed::<Connection>();
        match self.version() {
            Some(HttpVersion::Http11) => !connection.is_some_and(|header| header.has("close")),
            Some(HttpVersion::Http10) => connection.is_some_and(|header| header.has("keep-alive")),
            None => false,
        }
    }

    pub fn is_upgrade_request(&self) -> bool {
        self.headers
            .typed::<Connection>()
            .is_some_and(|header| header.has("upgrade"))
            && self
                .headers
                .typed::<Upgrade>()
                .is_some_and(|header| header.has("websocket"))
    }

    pub fn host(&self) -> Option<&str> {
        self.headers
            .typed::<Host>()
            .map(|header| header.host.as_str())
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.headers.get("User-Agent")
    }

    pub fn browser(&self) -> Browser {
        self.user_agent()
            .map(Browser::from_user_agent)
            .unwrap_or_default()
    }

    /// Transfer-decoded body bytes seen so far.
    pub fn body_bytes_received(&self) -> u64 {
        self.transfer
            .as_ref()
            .map_or(0, TransferDecoder::decoded_bytes)
    }

    fn fail(&mut self, err: ParseError) -> ParseError {
        warn!(kind = ?err.kind, offset = err.offset, "http message rejected");
        self.state = ParseState::Error;
        err
    }

    fn complete(&mut self) {
        if let Some(transfer) = self.transfer.as_mut() {
            self.trailers = transfer.take_trailers();
        }
        self.state = ParseState::Done;
        debug!(
            body_bytes = self.body_bytes_received(),
            consumed = self.consumed,
            "message complete"
        );
    }

    fn parse_bytes(&mut self, input: &[u8]) -> Result<usize, ParseError> {
        let mut pos = 0;
        while pos < input.len() {
            let offset = self.consumed + pos;
            let byte = input[pos];
            match self.state {
                ParseState::Start => {
                    if byte != b'\r' && byte != b'\n' {
                        self.state = ParseState::RequestOrStatusLine;
                        continue;
                    }
                }
                ParseState::RequestOrStatusLine => match byte {
                    b'\r' => self.state = ParseState::RequestOrStatusLineEnding,
                    b'\n' => self.end_start_line(offset)?,
                    _ => {
                        if self.line.len() >= self.limits.max_start_line_bytes {
                            return Err(ParseError::new(ParseErrorKind::StartLineTooLong, offset));
                        }
                        self.line.push(byte);
                    }
                },
                ParseState::RequestOrStatusLineEnding => {
                    if byte != b'\n' {
                        return Err(ParseError::new(ParseErrorKind::MalformedStartLine, offset));
                    }
                    self.end_start_line(offset)?;
                }
                ParseState::HeaderStart
                | ParseState::HeaderName
                | ParseState::HeaderValue
                | ParseState::HeaderValueEnding
                | ParseState::HeadersEnding => {
                    self.header_bytes += 1;
                    if self.header_bytes > self.limits.max_header_bytes {
                        return Err(ParseError::new(ParseErrorKind::HeaderBlockTooLarge, offset));
                    }
                    if self.header_byte(byte, offset)? {
                        return Ok(pos + 1);
                    }
                }
                ParseState::BodyStart
                | ParseState::IdentityBody
                | ParseState::ChunkPreStart
                | ParseState::ChunkStart
                | ParseState::ChunkStartEnding
                | ParseState::ChunkData
                | ParseState::ChunkAfterData
                | ParseState::ChunkTrailer => {
                    let Some(transfer) = self.transfer.as_mut() else {
                        return Err(ParseError::new(ParseErrorKind::InvalidState, offset));
                    };
                    let pipeline = &mut self.pipeline;
                    let used = transfer.decode(&input[pos..], offset, |bytes, at| {
                        pipeline.feed(bytes, at)
                    })?;
                    pos += used;
                    if transfer.is_done() {
                        self.pipeline.finish(self.consumed + pos)?;
                        self.complete();
                        return Ok(pos);
                    }
                    self.state = transfer.parse_state();
                    continue;
                }
                ParseState::Done | ParseState::Error => return Ok(pos),
            }
            pos += 1;
        }
        Ok(pos)
    }

    /// One byte of the header block. Returns true when the block is complete.
    fn header_byte(&mut self, byte: u8, offset: usize) -> Result<bool, ParseError> {
        match self.state {
            ParseState::HeaderStart => match byte {
                b'\r' => {
                    self.commit_header(offset)?;
                    self.state = ParseState::HeadersEnding;
                }
                b'\n' => {
                    self.commit_header(offset)?;
                    return self.end_headers(offset).map(|()| true);
                }
                b' ' | b'\t' => {
                    if self.name.is_empty() {
                        return Err(ParseError::new(ParseErrorKind::MalformedHeader, offset));
                    }
                    self.warnings.push(ParseWarning {
                        kind: ParseWarningKind::ObsFoldDetected,
                        offset,
                    });
                    self.value_space = !self.value.is_empty();
                    self.state = ParseState::HeaderValue;
                }
                _ => {
                    self.commit_header(offset)?;
                    self.state = ParseState::HeaderName;
                    return self.header_byte(byte, offset);
                }
            },
            ParseState::HeaderName => {
                if byte == b':' {
                    if self.name.is_empty() {
                        return Err(ParseError::new(ParseErrorKind::MalformedHeader, offset));
                    }
                    self.value_space = false;
                    self.state = ParseState::HeaderValue;
                } else if is_token_char(byte) {
                    self.push_line_byte(byte, offset, true)?;
                } else {
                    return Err(ParseError::new(ParseErrorKind::MalformedHeader, offset));
                }
            }
            ParseState::HeaderValue => match byte {
                b'\r' => self.state = ParseState::HeaderValueEnding,
                b'\n' => self.state = ParseState::HeaderStart,
                b' ' | b'\t' => self.value_space = !self.value.is_empty(),
                0x00..=0x1f | 0x7f => {
                    return Err(ParseError::new(ParseErrorKind::MalformedHeader, offset));
                }
                _ => {
                    if self.value_space {
                        self.push_line_byte(b' ', offset, false)?;
                        self.value_space = false;
                    }
                    self.push_line_byte(byte, offset, false)?;
                }
            },
            ParseState::HeaderValueEnding => {
                if byte != b'\n' {
                    return Err(ParseError::new(ParseErrorKind::MalformedHeader, offset));
                }
                self.state = ParseState::HeaderStart;
            }
            ParseState::HeadersEnding => {
                if byte != b'\n' {
                    return Err(ParseError::new(ParseErrorKind::MalformedHeader, offset));
                }
                self.end_headers(offset)?;
                return Ok(true);
            }
            _ => return Err(ParseError::new(ParseErrorKind::InvalidState, offset)),
        }
        Ok(false)
    }

    fn push_line_byte(&mut self, byte: u8, offset: usize, name: bool) -> Result<(), ParseError> {
        if self.name.len() + self.value.len() >= self.limits.max_header_line_bytes {
            return Err(ParseError::new(ParseErrorKind::HeaderBlockTooLarge, offset));
        }
        if name {
            self.name.push(byte);
        } else {
            self.value.push(byte);
        }
        Ok(())
    }

    fn end_start_line(&mut self, offset: usize) -> Result<(), ParseError> {
        let line = std::mem::take(&mut self.line);
        match self.role {
            Role::Server => {
                let request = parse_request_line(&line)
                    .map_err(|kind| ParseError::new(kind, offset))?;
                debug!(
                    method = %request.method,
                    target = %request.target,
                    version = request.version.as_str(),
                    "request line"
                );
                self.request_line = Some(request);
            }
            Role::Client => {
                let status = parse_status_line(&line)
                    .map_err(|kind| ParseError::new(kind, offset))?;
                debug!(
                    status = status.status_code,
                    reason = %status.reason,
                    version = status.version.as_str(),
                    "status line"
                );
                self.status_line = Some(status);
            }
        }
        self.state = ParseState::HeaderStart;
        Ok(())
    }

    fn commit_header(&mut self, offset: usize) -> Result<(), ParseError> {
        if self.name.is_empty() {
            return Ok(());
        }
        let name = decode_header_text(&std::mem::take(&mut self.name));
        let value = decode_header_text(&std::mem::take(&mut self.value));
        self.value_space = false;
        trace!(header = %name, value = %value, "header");

        let result = match self.role {
            Role::Server
                if name.eq_ignore_ascii_case("Cookie") || name.eq_ignore_ascii_case("Cookie2") =>
            {
                self.cookies.parse_cookie_header(&value)
            }
            Role::Client
                if name.eq_ignore_ascii_case("Set-Cookie")
                    || name.eq_ignore_ascii_case("Set-Cookie2") =>
            {
                self.cookies.parse_set_cookie(&value)
            }
            _ => self.headers.insert(&self.registry, &name, &value),
        };
        result.map_err(|err| {
            let kind = match err {
                HeaderError::Duplicate(_) => ParseErrorKind::DuplicateHeaderConflict,
                HeaderError::Invalid { .. } => ParseErrorKind::MalformedHeader,
            };
            debug!(error = %err, "header rejected");
            ParseError::new(kind, offset)
        })
    }

    fn end_headers(&mut self, offset: usize) -> Result<(), ParseError> {
        if let Some(header) = self.headers.typed::<TransferEncoding>() {
            if header.unsupported_coding().is_some() {
                return Err(ParseError::new(
                    ParseErrorKind::UnsupportedTransferCoding,
                    offset,
                ));
            }
            self.chunked = header.is_chunked();
        }
        self.content_length = self
            .headers
            .typed::<ContentLength>()
            .map(|header| header.length);
        self.content_coding = match self.headers.typed::<ContentEncoding>() {
            Some(header) => content_coding(&header.codings).ok_or_else(|| {
                ParseError::new(ParseErrorKind::UnsupportedContentCoding, offset)
            })?,
            None => ContentCoding::Identity,
        };

        let bodyless = match self.role {
            Role::Server => false,
            Role::Client => {
                let status = self.status_code().unwrap_or(200);
                self.head_response || status < 200 || status == 204 || status == 304
            }
        };
        let transfer = if bodyless {
            None
        } else if self.chunked {
            let budget = self.limits.max_header_bytes - self.header_bytes;
            Some(TransferDecoder::chunked(budget, self.limits.max_header_line_bytes))
        } else {
            match (self.content_length, self.role) {
                (Some(0), _) | (None, Role::Server) => None,
                (Some(length), _) => Some(TransferDecoder::identity(length)),
                (None, Role::Client) => Some(TransferDecoder::close_delimited()),
            }
        };

        let framing = match &transfer {
            None => "none",
            Some(_) if self.chunked => "chunked",
            Some(_) if self.content_length.is_some() => "content-length",
            Some(_) => "close-delimited",
        };
        debug!(
            framing,
            content_length = ?self.content_length,
            coding = ?self.content_coding,
            headers = self.headers.len(),
            "headers complete"
        );

        match transfer {
            Some(transfer) => {
                self.pipeline.set_coding(self.content_coding);
                self.transfer = Some(transfer);
                self.state = ParseState::BodyStart;
            }
            None => {
                self.state = ParseState::Done;
                debug!(consumed = offset + 1, "message complete");
            }
        }
        Ok(())
    }
}

fn content_coding(codings: &[String]) -> Option<ContentCoding> {
    let mut applied = codings.iter().filter(|coding| *coding != "identity");
    let coding = match applied.next().map(String::as_str) {
        None => return Some(ContentCoding::Identity),
        Some("gzip" | "x-gzip") => ContentCoding::Gzip,
        Some("deflate") => ContentCoding::Deflate,
        Some(_) => return None,
    };
    // stacked codings are not decoded
    if applied.next().is_some() {
        return None;
    }
    Some(coding)
}

fn parse_version(text: &str) -> Result<HttpVersion, ParseErrorKind> {
    match text {
        "HTTP/1.0" => Ok(HttpVersion::Http10),
        "HTTP/1.1" => Ok(HttpVersion::Http11),
        other if other.starts_with("HTTP/") => Err(ParseErrorKind::UnsupportedVersion),
        _ => Err(ParseErrorKind::MalformedStartLine),
    }
}

fn parse_request_line(line: &[u8]) -> Result<RequestLine, ParseErrorKind> {
    let text = std::str::from_utf8(line).map_err(|_| ParseErrorKind::MalformedStartLine)?;
    let mut parts = text.split([' ', '\t']).filter(|part| !part.is_empty());
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ParseErrorKind::MalformedStartLine);
    };

    if !method.bytes().all(is_token_char) {
        return Err(ParseErrorKind::MalformedStartLine);
    }
    if !METHODS.contains(&method) {
        return Err(ParseErrorKind::UnsupportedMethod);
    }
    if !valid_target(method, target) {
        return Err(ParseErrorKind::MalformedStartLine);
    }
    let version = parse_version(version)?;

    Ok(RequestLine {
        method: method.to_string(),
        target: target.to_string(),
        version,
    })
}

fn valid_target(method: &str, target: &str) -> bool {
    if !target.bytes().all(|byte| (0x21..=0x7e).contains(&byte)) {
        return false;
    }
    let lower = target.to_ascii_lowercase();
    if target.starts_with('/') || lower.starts_with("http://") || lower.starts_with("https://") {
        return true;
    }
    match method {
        "OPTIONS" => target == "*",
        "CONNECT" => target
            .rsplit_once(':')
            .is_some_and(|(host, port)| {
                !host.is_empty() && !host.contains('/') && port.parse::<u16>().is_ok()
            }),
        _ => false,
    }
}

fn parse_status_line(line: &[u8]) -> Result<StatusLine, ParseErrorKind> {
    let (version, rest) = match line.iter().position(|byte| *byte == b' ') {
        Some(space) => (&line[..space], &line[space + 1..]),
        None => (line, &line[line.len()..]),
    };
    let version = std::str::from_utf8(version).map_err(|_| ParseErrorKind::MalformedStartLine)?;
    let version = parse_version(version)?;

    if rest.len() < 3 || !rest[..3].iter().all(u8::is_ascii_digit) {
        return Err(ParseErrorKind::MalformedStartLine);
    }
    let status_code = rest[..3]
        .iter()
        .fold(0u16, |code, digit| code * 10 + u16::from(digit - b'0'));
    if !(100..=599).contains(&status_code) {
        return Err(ParseErrorKind::MalformedStartLine);
    }
    let reason = match &rest[3..] {
        [] => String::new(),
        [b' ', reason @ ..] => decode_header_text(reason).trim().to_string(),
        _ => return Err(ParseErrorKind::MalformedStartLine),
    };

    Ok(StatusLine {
        version,
        status_code,
        reason,
    })
}
