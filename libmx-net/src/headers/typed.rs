use std::any::Any;

use libmx_codec::{base64_decode, url_decode_str, url_encode_str};

use super::{
    Browser, DuplicateBehavior, HeaderError, TypedHeader, is_token, parse_parameters, quote,
    split_list,
};

/// Fallback for names without a registered type. Each occurrence becomes its own record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericHeader {
    name: String,
    value: String,
}

impl GenericHeader {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            value: String::new(),
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl TypedHeader for GenericHeader {
    fn name(&self) -> &str {
        &self.name
    }

    fn parse(&mut self, value: &str) -> Result<(), HeaderError> {
        if value.contains(['\r', '\n']) {
            return Err(HeaderError::invalid(&self.name, "line break in value"));
        }
        self.value = value.to_string();
        Ok(())
    }

    fn build(&self, _browser: Browser) -> String {
        self.value.clone()
    }

    fn duplicate_behavior(&self) -> DuplicateBehavior {
        DuplicateBehavior::Append
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentLength {
    pub length: u64,
}

impl TypedHeader for ContentLength {
    fn name(&self) -> &str {
        "Content-Length"
    }

    fn parse(&mut self, value: &str) -> Result<(), HeaderError> {
        let value = value.trim();
        if value.is_empty() || !value.bytes().all(|byte| byte.is_ascii_digit()) {
            return Err(HeaderError::invalid(self.name(), "not a decimal length"));
        }
        self.length = value
            .parse::<u64>()
            .map_err(|_| HeaderError::invalid(self.name(), "length overflows"))?;
        Ok(())
    }

    fn build(&self, _browser: Browser) -> String {
        self.length.to_string()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Token lists shared by several `Append` headers.
fn parse_tokens(
    name: &str,
    value: &str,
    into: &mut Vec<String>,
) -> Result<(), HeaderError> {
    for item in split_list(value) {
        let token = item.split(';').next().unwrap_or(item).trim();
        if !is_token(token) {
            return Err(HeaderError::invalid(name, format!("invalid token {token:?}")));
        }
        into.push(token.to_ascii_lowercase());
    }
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferEncoding {
    pub codings: Vec<String>,
}

impl TransferEncoding {
    pub fn is_chunked(&self) -> bool {
        self.codings.iter().any(|coding| coding == "chunked")
    }

    /// First coding other than `chunked` or `identity`.
    pub fn unsupported_coding(&self) -> Option<&str> {
        self.codings
            .iter()
            .map(String::as_str)
            .find(|coding| *coding != "chunked" && *coding != "identity")
    }
}

impl TypedHeader for TransferEncoding {
    fn name(&self) -> &str {
        "Transfer-Encoding"
    }

    fn parse(&mut self, value: &str) -> Result<(), HeaderError> {
        parse_tokens("Transfer-Encoding", value, &mut self.codings)
    }

    fn build(&self, _browser: Browser) -> String {
        self.codings.join(", ")
    }

    fn duplicate_behavior(&self) -> DuplicateBehavior {
        DuplicateBehavior::Append
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentEncoding {
    pub codings: Vec<String>,
}

impl TypedHeader for ContentEncoding {
    fn name(&self) -> &str {
        "Content-Encoding"
    }

    fn parse(&mut self, value: &str) -> Result<(), HeaderError> {
        parse_tokens("Content-Encoding", value, &mut self.codings)
    }

    fn build(&self, _browser: Browser) -> String {
        self.codings.join(", ")
    }

    fn duplicate_behavior(&self) -> DuplicateBehavior {
        DuplicateBehavior::Append
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Connection {
    pub tokens: Vec<String>,
}

impl Connection {
    pub fn has(&self, token: &str) -> bool {
        self.tokens.iter().any(|item| item.eq_ignore_ascii_case(token))
    }
}

impl TypedHeader for Connection {
    fn name(&self) -> &str {
        "Connection"
    }

    fn parse(&mut self, value: &str) -> Result<(), HeaderError> {
        parse_tokens("Connection", value, &mut self.tokens)
    }

    fn build(&self, _browser: Browser) -> String {
        self.tokens.join(", ")
    }

    fn duplicate_behavior(&self) -> DuplicateBehavior {
        DuplicateBehavior::Append
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Upgrade {
    pub protocols: Vec<String>,
}

impl Upgrade {
    pub fn has(&self, protocol: &str) -> bool {
        self.protocols
            .iter()
            .any(|item| item.split('/').next() == Some(protocol))
    }
}

impl TypedHeader for Upgrade {
    fn name(&self) -> &str {
        "Upgrade"
    }

    fn parse(&mut self, value: &str) -> Result<(), HeaderError> {
        for item in split_list(value) {
            self.protocols.push(item.to_ascii_lowercase());
        }
        Ok(())
    }

    fn build(&self, _browser: Browser) -> String {
        self.protocols.join(", ")
    }

    fn duplicate_behavior(&self) -> DuplicateBehavior {
        DuplicateBehavior::Append
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentType {
    pub media_type: String,
    pub params: Vec<(String, String)>,
}

impl ContentType {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn boundary(&self) -> Option<&str> {
        self.param("boundary")
    }

    pub fn charset(&self) -> Option<&str> {
        self.param("charset")
    }

    pub fn is(&self, media_type: &str) -> bool {
        self.media_type.eq_ignore_ascii_case(media_type)
    }
}

impl TypedHeader for ContentType {
    fn name(&self) -> &str {
        "Content-Type"
    }

    fn parse(&mut self, value: &str) -> Result<(), HeaderError> {
        let (media_type, rest) = value.split_once(';').unwrap_or((value, ""));
        let media_type = media_type.trim();
        let valid = media_type
            .split_once('/')
            .is_some_and(|(kind, sub)| is_token(kind) && is_token(sub));
        if !valid {
            return Err(HeaderError::invalid(self.name(), "malformed media type"));
        }
        self.media_type = media_type.to_ascii_lowercase();
        self.params =
            parse_parameters(rest).map_err(|reason| HeaderError::invalid("Content-Type", reason))?;
        Ok(())
    }

    fn build(&self, _browser: Browser) -> String {
        let mut value = self.media_type.clone();
        for (name, param) in &self.params {
            value.push_str("; ");
            value.push_str(name);
            value.push('=');
            if is_token(param) {
                value.push_str(param);
            } else {
                value.push_str(&quote(param));
            }
        }
        value
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentDisposition {
    pub disposition: String,
    pub params: Vec<(String, String)>,
}

impl ContentDisposition {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn field_name(&self) -> Option<&str> {
        self.param("name")
    }

    /// `filename*` (RFC 5987) wins over `filename` when both are present.
    pub fn filename(&self) -> Option<String> {
        let extended = self.param("filename*").and_then(|extended| {
            let (charset, rest) = extended.split_once('\'')?;
            let (_, encoded) = rest.split_once('\'')?;
            if !charset.eq_ignore_ascii_case("utf-8") {
                return None;
            }
            url_decode_str(encoded).ok()
        });
        extended.or_else(|| self.param("filename").map(str::to_string))
    }

    pub fn is_form_data(&self) -> bool {
        self.disposition == "form-data"
    }
}

impl TypedHeader for ContentDisposition {
    fn name(&self) -> &str {
        "Content-Disposition"
    }

    fn parse(&mut self, value: &str) -> Result<(), HeaderError> {
        let (disposition, rest) = value.split_once(';').unwrap_or((value, ""));
        let disposition = disposition.trim();
        if !is_token(disposition) {
            return Err(HeaderError::invalid(self.name(), "malformed disposition type"));
        }
        self.disposition = disposition.to_ascii_lowercase();
        self.params = parse_parameters(rest)
            .map_err(|reason| HeaderError::invalid("Content-Disposition", reason))?;
        Ok(())
    }

    fn build(&self, browser: Browser) -> String {
        let mut value = self.disposition.clone();
        if let Some(name) = self.field_name() {
            value.push_str("; name=");
            value.push_str(&quote(name));
        }
        if let Some(filename) = self.filename() {
            if filename.is_ascii() {
                value.push_str("; filename=");
                value.push_str(&quote(&filename));
            } else if browser.is_internet_explorer() {
                value.push_str("; filename=");
                value.push_str(&quote(&url_encode_str(&filename)));
            } else {
                let fallback: String = filename
                    .chars()
                    .map(|ch| if ch.is_ascii() { ch } else { '_' })
                    .collect();
                value.push_str("; filename=");
                value.push_str(&quote(&fallback));
                value.push_str("; filename*=UTF-8''");
                value.push_str(&url_encode_str(&filename));
            }
        }
        value
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Host {
    pub host: String,
    pub port: Option<u16>,
}

impl TypedHeader for Host {
    fn name(&self) -> &str {
        "Host"
    }

    fn parse(&mut self, value: &str) -> Result<(), HeaderError> {
        let value = value.trim();
        let (host, port) = if value.starts_with('[') {
            match value.find(']') {
                Some(end) => (&value[..=end], value[end + 1..].strip_prefix(':')),
                None => return Err(HeaderError::invalid(self.name(), "unterminated IPv6 literal")),
            }
        } else {
            match value.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (value, None),
            }
        };
        if host.contains([' ', '\t', '/']) {
            return Err(HeaderError::invalid(self.name(), "invalid host"));
        }
        self.host = host.to_string();
        self.port = match port {
            Some(port) => Some(
                port.parse::<u16>()
                    .map_err(|_| HeaderError::invalid("Host", "invalid port"))?,
            ),
            None => None,
        };
        Ok(())
    }

    fn build(&self, _browser: Browser) -> String {
        match self.port {
            Some(port) => format!("{}:{port}", self.host),
            None => self.host.clone(),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Media ranges, kept with their parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Accept {
    pub ranges: Vec<String>,
}

impl TypedHeader for Accept {
    fn name(&self) -> &str {
        "Accept"
    }

    fn parse(&mut self, value: &str) -> Result<(), HeaderError> {
        for item in split_list(value) {
            let media = item.split(';').next().unwrap_or(item).trim();
            let valid = media == "*"
                || media
                    .split_once('/')
                    .is_some_and(|(kind, sub)| is_token(kind) && is_token(sub));
            if !valid {
                return Err(HeaderError::invalid(self.name(), format!("bad range {item:?}")));
            }
            self.ranges.push(item.to_string());
        }
        Ok(())
    }

    fn build(&self, _browser: Browser) -> String {
        self.ranges.join(", ")
    }

    fn duplicate_behavior(&self) -> DuplicateBehavior {
        DuplicateBehavior::Append
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    pub directives: Vec<(String, Option<String>)>,
}

impl CacheControl {
    pub fn directive(&self, name: &str) -> Option<Option<&str>> {
        self.directives
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_deref())
    }
}

impl TypedHeader for CacheControl {
    fn name(&self) -> &str {
        "Cache-Control"
    }

    fn parse(&mut self, value: &str) -> Result<(), HeaderError> {
        for item in split_list(value) {
            let (key, argument) = match item.split_once('=') {
                Some((key, argument)) => {
                    (key.trim(), Some(argument.trim().trim_matches('"').to_string()))
                }
                None => (item, None),
            };
            if !is_token(key) {
                return Err(HeaderError::invalid(self.name(), format!("bad directive {key:?}")));
            }
            let key = key.to_ascii_lowercase();
            match self.directives.iter_mut().find(|(existing, _)| *existing == key) {
                Some(slot) => slot.1 = argument,
                None => self.directives.push((key, argument)),
            }
        }
        Ok(())
    }

    fn build(&self, _browser: Browser) -> String {
        self.directives
            .iter()
            .map(|(key, value)| match value {
                Some(value) if is_token(value) => format!("{key}={value}"),
                Some(value) => format!("{key}={}", quote(value)),
                None => key.clone(),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn duplicate_behavior(&self) -> DuplicateBehavior {
        DuplicateBehavior::Merge
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecWebSocketKey {
    pub key: String,
}

impl TypedHeader for SecWebSocketKey {
    fn name(&self) -> &str {
        "Sec-WebSocket-Key"
    }

    fn parse(&mut self, value: &str) -> Result<(), HeaderError> {
        let value = value.trim();
        match base64_decode(value) {
            Ok(nonce) if nonce.len() == 16 => {
                self.key = value.to_string();
                Ok(())
            }
            _ => Err(HeaderError::invalid(self.name(), "key is not a 16-byte base64 nonce")),
        }
    }

    fn build(&self, _browser: Browser) -> String {
        self.key.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecWebSocketVersion {
    pub version: u32,
}

impl TypedHeader for SecWebSocketVersion {
    fn name(&self) -> &str {
        "Sec-WebSocket-Version"
    }

    fn parse(&mut self, value: &str) -> Result<(), HeaderError> {
        self.version = value
            .trim()
            .parse::<u32>()
            .map_err(|_| HeaderError::invalid("Sec-WebSocket-Version", "not a number"))?;
        Ok(())
    }

    fn build(&self, _browser: Browser) -> String {
        self.version.to_string()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecWebSocketAccept {
    pub accept: String,
}

impl TypedHeader for SecWebSocketAccept {
    fn name(&self) -> &str {
        "Sec-WebSocket-Accept"
    }

    fn parse(&mut self, value: &str) -> Result<(), HeaderError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(HeaderError::invalid(self.name(), "empty"));
        }
        self.accept = value.to_string();
        Ok(())
    }

    fn build(&self, _browser: Browser) -> String {
        self.accept.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
