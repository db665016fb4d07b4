mod browser;
mod map;
mod registry;
mod typed;

use std::any::Any;
use std::fmt;

use thiserror::Error;

pub use browser::Browser;
pub use map::{HeaderMap, HeaderRecord};
pub use registry::{HeaderConstructor, HeaderRegistry};
pub use typed::{
    Accept, CacheControl, Connection, ContentDisposition, ContentEncoding, ContentLength,
    ContentType, GenericHeader, Host, SecWebSocketAccept, SecWebSocketKey, SecWebSocketVersion,
    TransferEncoding, Upgrade,
};

/// How a second occurrence of the same header is folded into the collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateBehavior {
    Error,
    Replace,
    Append,
    Merge,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderError {
    #[error("invalid {name} header: {reason}")]
    Invalid { name: String, reason: String },
    #[error("duplicate {0} header")]
    Duplicate(String),
}

impl HeaderError {
    pub(crate) fn invalid(name: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// A header whose value has its own grammar.
///
/// Implementations are created through a [`HeaderRegistry`] and fed every raw value
/// seen for their name. For `Append` and `Merge` types the later occurrences are
/// parsed into the existing instance.
pub trait TypedHeader: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    fn parse(&mut self, value: &str) -> Result<(), HeaderError>;

    fn build(&self, browser: Browser) -> String;

    fn duplicate_behavior(&self) -> DuplicateBehavior {
        DuplicateBehavior::Error
    }

    fn as_any(&self) -> &dyn Any;
}

/// RFC 7230 `tchar`.
pub fn is_token_char(byte: u8) -> bool {
    matches!(byte,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' | b'^' | b'_'
        | b'`' | b'|' | b'~' | b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z')
}

pub fn is_token(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(is_token_char)
}

/// Header text is UTF-8 when it validates and ISO-8859-1 otherwise.
pub fn decode_header_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|byte| char::from(*byte)).collect(),
    }
}

pub(crate) fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
}

/// Splits `a=b; c="d e"` style parameter lists. Names are lowercased.
pub(crate) fn parse_parameters(input: &str) -> Result<Vec<(String, String)>, String> {
    let bytes = input.as_bytes();
    let mut params = Vec::new();
    let mut pos = 0;

    loop {
        while pos < bytes.len() && matches!(bytes[pos], b' ' | b'\t' | b';') {
            pos += 1;
        }
        if pos >= bytes.len() {
            break;
        }

        let name_start = pos;
        while pos < bytes.len() && is_token_char(bytes[pos]) {
            pos += 1;
        }
        if pos == name_start {
            return Err(format!("unexpected character at {pos}"));
        }
        let name = input[name_start..pos].to_ascii_lowercase();

        while pos < bytes.len() && matches!(bytes[pos], b' ' | b'\t') {
            pos += 1;
        }
        if pos >= bytes.len() || bytes[pos] != b'=' {
            return Err(format!("parameter {name} has no value"));
        }
        pos += 1;
        while pos < bytes.len() && matches!(bytes[pos], b' ' | b'\t') {
            pos += 1;
        }

        let value = if pos < bytes.len() && bytes[pos] == b'"' {
            pos += 1;
            let mut value = Vec::new();
            loop {
                match bytes.get(pos) {
                    None => return Err(format!("unterminated quoted value for {name}")),
                    Some(b'"') => {
                        pos += 1;
                        break;
                    }
                    Some(b'\\') if pos + 1 < bytes.len() => {
                        value.push(bytes[pos + 1]);
                        pos += 2;
                    }
                    Some(byte) => {
                        value.push(*byte);
                        pos += 1;
                    }
                }
            }
            String::from_utf8_lossy(&value).into_owned()
        } else {
            let value_start = pos;
            while pos < bytes.len() && bytes[pos] != b';' {
                pos += 1;
            }
            input[value_start..pos].trim_end().to_string()
        };
        params.push((name, value));
    }

    Ok(params)
}

pub(crate) fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for ch in value.chars() {
        if ch == '"' || ch == '\\' {
            quoted.push('\\');
        }
        quoted.push(ch);
    }
    quoted.push('"');
    quoted
}

#[cfg(test)]
mod tests {
    use super::{decode_header_text, parse_parameters};

    #[test]
    fn parses_quoted_and_plain_parameters() {
        let params = parse_parameters(r#" name="a \"b\""; Filename=c.txt ;x=1"#).unwrap();
        assert_eq!(
            params,
            vec![
                ("name".to_string(), "a \"b\"".to_string()),
                ("filename".to_string(), "c.txt".to_string()),
                ("x".to_string(), "1".to_string()),
            ]
        );
    }

    #[test]
    fn rejects_unterminated_quote() {
        assert!(parse_parameters("name=\"abc").is_err());
    }

    #[test]
    fn falls_back_to_latin1() {
        assert_eq!(decode_header_text(b"caf\xe9"), "café");
        assert_eq!(decode_header_text("café".as_bytes()), "café");
    }
}
