use std::sync::Arc;

use assert_matches::assert_matches;
use libmx_codec::{deflate_compress, gzip_compress, zlib_compress};
use libmx_net::{
    Accept, AnyBodyParser, BodyLimits, DefaultBodyParser, HeaderRegistry, HttpLimits,
    MessageParser, MultipartFormParser, ParseError, ParseErrorKind, ParseState, Role,
    encode_chunked,
};

const CHUNKED_POST: &[u8] = b"POST /upload HTTP/1.1\r\n\
Host: example.com\r\n\
Transfer-Encoding: chunked\r\n\
X-Note: a\r\n  folded\r\n\
\r\n\
5;ext=1\r\nhello\r\n6\r\n world\r\n0\r\nX-Trailer: yes\r\n\r\n";

/// Feeds `input`, attaching a body parser from `make` when the headers complete.
/// Returns the bytes consumed, which stop short of `input.len()` only at `Done`.
fn drive(
    parser: &mut MessageParser,
    mut input: &[u8],
    make: &dyn Fn() -> AnyBodyParser,
) -> Result<usize, ParseError> {
    let mut total = 0;
    loop {
        let used = parser.parse(input)?;
        total += used;
        input = &input[used..];
        match parser.state() {
            ParseState::BodyStart if parser.body_parser().is_none() => {
                parser.set_body_parser(make())?;
            }
            ParseState::Done => return Ok(total),
            _ if input.is_empty() => return Ok(total),
            _ => {}
        }
    }
}

fn default_body() -> AnyBodyParser {
    DefaultBodyParser::new(BodyLimits::default()).into()
}

fn body_text(parser: &mut MessageParser) -> String {
    match parser.take_body_parser() {
        Some(AnyBodyParser::Default(body)) => body.to_text().unwrap(),
        other => panic!("unexpected body parser {other:?}"),
    }
}

fn assert_chunked_post(parser: &mut MessageParser) {
    assert_eq!(parser.state(), ParseState::Done);
    assert_eq!(parser.method(), Some("POST"));
    assert_eq!(parser.target(), Some("/upload"));
    assert_eq!(parser.headers().get("X-Note"), Some("a folded"));
    assert_eq!(parser.warnings().len(), 1);
    assert!(parser.is_chunked());
    assert_eq!(parser.body_bytes_received(), 11);
    assert_eq!(parser.trailers().get("x-trailer"), Some("yes"));
    assert_eq!(body_text(parser), "hello world");
}

#[test]
fn minimal_request_completes_without_leftovers() {
    let input = b"GET /x HTTP/1.1\r\nHost: a\r\nContent-Length: 0\r\n\r\n";
    let mut parser = MessageParser::new(Role::Server);
    assert_eq!(parser.parse(input).unwrap(), input.len());
    assert_eq!(parser.state(), ParseState::Done);
    assert_eq!(parser.host(), Some("a"));
    assert_eq!(parser.content_length(), Some(0));
}

#[test]
fn every_split_point_gives_the_same_message() {
    for split in 0..=CHUNKED_POST.len() {
        let mut parser = MessageParser::new(Role::Server);
        let first = drive(&mut parser, &CHUNKED_POST[..split], &default_body).unwrap();
        assert_eq!(first, split);
        let second = drive(&mut parser, &CHUNKED_POST[split..], &default_body).unwrap();
        assert_eq!(second, CHUNKED_POST.len() - split, "split {split}");
        assert_chunked_post(&mut parser);
    }
}

#[test]
fn one_byte_at_a_time_gives_the_same_message() {
    let mut parser = MessageParser::new(Role::Server);
    for byte in CHUNKED_POST {
        assert_eq!(drive(&mut parser, std::slice::from_ref(byte), &default_body).unwrap(), 1);
    }
    assert_eq!(parser.bytes_consumed(), CHUNKED_POST.len());
    assert_chunked_post(&mut parser);
}

#[test]
fn header_block_limit_is_exact() {
    let limits = HttpLimits {
        max_header_bytes: 32,
        ..HttpLimits::default()
    };
    let registry = Arc::new(HeaderRegistry::standard());

    // 9 + 21 + 2 header bytes
    let fits = b"GET / HTTP/1.1\r\nHost: a\r\nX-Pad: aaaaaaaaaaaa\r\n\r\n";
    let mut parser = MessageParser::with_config(Role::Server, limits, registry.clone());
    assert_eq!(parser.parse(fits).unwrap(), fits.len());
    assert_eq!(parser.state(), ParseState::Done);

    let over = b"GET / HTTP/1.1\r\nHost: a\r\nX-Pad: aaaaaaaaaaaaa\r\n\r\n";
    let mut parser = MessageParser::with_config(Role::Server, limits, registry);
    let err = parser.parse(over).unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::HeaderBlockTooLarge);
    assert_eq!(err.offset, 48);
    assert_eq!(err.offset, over.len() - 1);
    assert_eq!(parser.state(), ParseState::Error);
}

#[test]
fn duplicate_policies_follow_the_registry() {
    let input = b"GET / HTTP/1.1\r\n\
Accept: text/html\r\n\
X-Dup: one\r\n\
Accept: application/json;q=0.9\r\n\
X-Dup: two\r\n\r\n";
    let mut parser = MessageParser::new(Role::Server);
    parser.parse(input).unwrap();
    let accept = parser.headers().typed::<Accept>().unwrap();
    assert_eq!(accept.ranges, ["text/html", "application/json;q=0.9"]);
    assert_eq!(parser.headers().get_all("x-dup"), ["one", "two"]);

    let conflict = b"POST / HTTP/1.1\r\nContent-Length: 3\r\nContent-Length: 3\r\n\r\n";
    let mut parser = MessageParser::new(Role::Server);
    assert_matches!(
        parser.parse(conflict),
        Err(ParseError { kind: ParseErrorKind::DuplicateHeaderConflict, .. })
    );
}

#[test]
fn gzip_inside_chunked_reaches_the_body_parser() {
    let payload = "compressed payload ".repeat(40);
    let compressed = gzip_compress(payload.as_bytes()).unwrap();
    let mut wire = b"HTTP/1.1 200 OK\r\n\
Content-Encoding: gzip\r\n\
Transfer-Encoding: chunked\r\n\r\n"
        .to_vec();
    wire.extend(encode_chunked(&compressed, 7));

    let mut parser = MessageParser::new(Role::Client);
    for byte in &wire {
        drive(&mut parser, std::slice::from_ref(byte), &default_body).unwrap();
    }
    assert_eq!(parser.state(), ParseState::Done);
    assert_eq!(parser.body_bytes_received(), compressed.len() as u64);
    assert_eq!(body_text(&mut parser), payload);
}

fn coded_response(coding: &str, body: &[u8]) -> Vec<u8> {
    let mut wire = format!(
        "HTTP/1.1 200 OK\r\nContent-Encoding: {coding}\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    wire.extend_from_slice(body);
    wire
}

#[test]
fn deflate_bodies_decode_with_or_without_zlib_wrapper() {
    let payload = "deflated payload ".repeat(30);
    for compressed in [
        zlib_compress(payload.as_bytes()).unwrap(),
        deflate_compress(payload.as_bytes()).unwrap(),
    ] {
        let wire = coded_response("deflate", &compressed);
        let mut parser = MessageParser::new(Role::Client);
        for byte in &wire {
            drive(&mut parser, std::slice::from_ref(byte), &default_body).unwrap();
        }
        assert_eq!(parser.state(), ParseState::Done);
        assert_eq!(body_text(&mut parser), payload);
    }
}

#[test]
fn cut_short_compressed_body_is_fatal() {
    let payload = b"hello hello hello truncated world";
    let raw = deflate_compress(payload).unwrap();
    let zlib = zlib_compress(payload).unwrap();
    let gzip = gzip_compress(payload).unwrap();
    let cases = [
        ("deflate", &raw[..raw.len() - 4]),
        ("deflate", &raw[..raw.len() / 2]),
        ("deflate", &zlib[..zlib.len() - 4]),
        ("gzip", &gzip[..gzip.len() - 4]),
    ];
    for (coding, body) in cases {
        let wire = coded_response(coding, body);
        let mut parser = MessageParser::new(Role::Client);
        assert_matches!(
            drive(&mut parser, &wire, &default_body),
            Err(ParseError { kind: ParseErrorKind::ContentDecodeError, .. }),
            "{coding} cut to {} bytes",
            body.len()
        );
        assert_eq!(parser.state(), ParseState::Error);
    }
}

#[test]
fn corrupt_content_coding_is_fatal() {
    let wire = coded_response("gzip", b"this is not gzip data");

    let mut parser = MessageParser::new(Role::Client);
    assert_matches!(
        drive(&mut parser, &wire, &default_body),
        Err(ParseError { kind: ParseErrorKind::ContentDecodeError, .. })
    );
    assert_matches!(
        parser.parse(b"more"),
        Err(ParseError { kind: ParseErrorKind::InvalidState, .. })
    );
}

#[test]
fn pipelined_requests_share_one_parser() {
    let wire = b"POST /first HTTP/1.1\r\nContent-Length: 5\r\n\r\nhelloGET /second HTTP/1.0\r\n\r\n";
    let mut parser = MessageParser::new(Role::Server);

    let used = drive(&mut parser, wire, &default_body).unwrap();
    assert_eq!(&wire[used..], b"GET /second HTTP/1.0\r\n\r\n");
    assert_eq!(parser.target(), Some("/first"));
    assert!(parser.is_keep_alive());
    assert_eq!(body_text(&mut parser), "hello");

    parser.reset();
    let rest = &wire[used..];
    assert_eq!(drive(&mut parser, rest, &default_body).unwrap(), rest.len());
    assert_eq!(parser.target(), Some("/second"));
    assert!(!parser.is_keep_alive());
    assert!(parser.body_parser().is_none());
}

#[test]
fn multipart_body_through_the_parser() {
    let body = "--XyZ\r\n\
Content-Disposition: form-data; name=\"title\"\r\n\r\n\
hi there\r\n\
--XyZ\r\n\
Content-Disposition: form-data; name=\"doc\"; filename=\"a.txt\"\r\n\
Content-Type: text/plain\r\n\r\n\
file body\r\n\
--XyZ--\r\n";
    let wire = format!(
        "POST /form HTTP/1.1\r\n\
Content-Type: multipart/form-data; boundary=XyZ\r\n\
Content-Length: {}\r\n\r\n{body}",
        body.len()
    );

    let make = || -> AnyBodyParser { MultipartFormParser::new(BodyLimits::default()).into() };
    let mut parser = MessageParser::new(Role::Server);
    assert_eq!(drive(&mut parser, wire.as_bytes(), &make).unwrap(), wire.len());

    let Some(AnyBodyParser::Multipart(form)) = parser.take_body_parser() else {
        panic!("multipart parser expected");
    };
    let (fields, files) = form.into_parts();
    assert_eq!(fields.get("title"), Some("hi there"));
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].name, "doc");
    assert_eq!(files[0].filename, "a.txt");
    assert_eq!(files[0].content_type, "text/plain");
    assert_eq!(files[0].size, 9);
}

#[test]
fn oversized_body_is_drained_with_soft_flag() {
    let limits = BodyLimits {
        max_body_bytes: 4,
        ..BodyLimits::default()
    };
    let make = || -> AnyBodyParser { DefaultBodyParser::new(limits.clone()).into() };
    let wire = b"PUT /big HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\na\r\n0123456789\r\n0\r\n\r\n";
    let mut parser = MessageParser::new(Role::Server);
    assert_eq!(drive(&mut parser, wire, &make).unwrap(), wire.len());
    assert_eq!(parser.state(), ParseState::Done);
    assert!(parser.is_entity_too_large());
    assert_eq!(parser.body_bytes_received(), 10);
}

#[test]
fn close_delimited_response_ends_on_finish() {
    let wire = b"HTTP/1.0 200 OK\r\nContent-Type: text/plain\r\n\r\nuntil the end";
    let mut parser = MessageParser::new(Role::Client);
    assert_eq!(drive(&mut parser, wire, &default_body).unwrap(), wire.len());
    assert_eq!(parser.state(), ParseState::IdentityBody);
    parser.finish().unwrap();
    assert_eq!(parser.state(), ParseState::Done);
    assert_eq!(body_text(&mut parser), "until the end");
}

#[test]
fn set_cookie_with_dashed_expiry_keeps_the_response() {
    let wire = b"HTTP/1.1 204 No Content\r\n\
Set-Cookie: a=b; Expires=Wed, 21-Oct-2015 07:28:00 GMT; Path=/\r\n\
Set-Cookie: c=d; Expires=whenever\r\n\r\n";
    let mut parser = MessageParser::new(Role::Client);
    parser.parse(wire).unwrap();
    assert_eq!(parser.state(), ParseState::Done);
    let cookie = parser.cookies().get("a").unwrap();
    assert_eq!(
        cookie.expires.map(|date| date.to_rfc3339()),
        Some("2015-10-21T07:28:00+00:00".to_string())
    );
    assert_eq!(parser.cookies().get("c").unwrap().expires, None);
}

#[test]
fn head_response_has_no_body() {
    let wire = b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\n";
    let mut parser = MessageParser::new(Role::Client);
    parser.set_head_response(true);
    assert_eq!(parser.parse(wire).unwrap(), wire.len());
    assert_eq!(parser.state(), ParseState::Done);
    assert_eq!(parser.content_length(), Some(10));
}

#[test]
fn chunk_size_overflow_is_detected() {
    let wire = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n1ffffffffffffffff\r\n";
    let mut parser = MessageParser::new(Role::Server);
    assert_matches!(
        drive(&mut parser, wire, &default_body),
        Err(ParseError { kind: ParseErrorKind::ChunkSizeOverflow, .. })
    );
}
