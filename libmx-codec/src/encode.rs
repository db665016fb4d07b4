use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode, percent_encode};

use crate::CodecError;

/// Everything except the RFC 3986 unreserved characters. The output is also
/// valid as an RFC 5987 `ext-value`.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

pub fn url_encode_bytes(input: &[u8]) -> String {
    percent_encode(input, COMPONENT).to_string()
}

pub fn url_encode_str(input: &str) -> String {
    url_encode_bytes(input.as_bytes())
}

/// Percent-decodes `input`. A `%` not followed by two hex digits is an error.
pub fn url_decode_bytes(input: &[u8]) -> Result<Vec<u8>, CodecError> {
    if let Some(at) = malformed_escape(input) {
        return Err(CodecError::Url(format!("bad escape at byte {at}")));
    }
    Ok(percent_decode(input).collect())
}

pub fn url_decode_str(input: &str) -> Result<String, CodecError> {
    Ok(String::from_utf8(url_decode_bytes(input.as_bytes())?)?)
}

/// Decodes an `application/x-www-form-urlencoded` component, where `+` stands for a space.
pub fn form_url_decode(input: &[u8]) -> Result<String, CodecError> {
    let spaced: Vec<u8> = input
        .iter()
        .map(|byte| if *byte == b'+' { b' ' } else { *byte })
        .collect();
    Ok(String::from_utf8(url_decode_bytes(&spaced)?)?)
}

fn malformed_escape(input: &[u8]) -> Option<usize> {
    input
        .iter()
        .enumerate()
        .filter(|(_, byte)| **byte == b'%')
        .map(|(at, _)| at)
        .find(|at| {
            input
                .get(at + 1..at + 3)
                .is_none_or(|pair| !pair.iter().all(u8::is_ascii_hexdigit))
        })
}

pub fn base64_encode(input: &[u8]) -> String {
    STANDARD.encode(input)
}

/// Decodes standard padded base64, ignoring surrounding whitespace.
pub fn base64_decode(input: &str) -> Result<Vec<u8>, CodecError> {
    STANDARD
        .decode(input.trim())
        .map_err(|err| CodecError::Base64(err.to_string()))
}
