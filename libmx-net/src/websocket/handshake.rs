pub use libmx_codec::websocket_accept_key as accept_key;

use crate::headers::{SecWebSocketKey, SecWebSocketVersion};
use crate::http1::{MessageParser, Role};

const SUPPORTED_VERSION: u32 = 13;

/// True when the parsed request asks to switch this connection to WebSocket.
pub fn is_websocket_upgrade(parser: &MessageParser) -> bool {
    let headers = parser.headers();
    parser.role() == Role::Server
        && parser.method() == Some("GET")
        && parser.is_upgrade_request()
        && headers
            .typed::<SecWebSocketVersion>()
            .is_some_and(|header| header.version == SUPPORTED_VERSION)
        && headers.typed::<SecWebSocketKey>().is_some()
}

/// The `101 Switching Protocols` head answering a request with `key`.
pub fn build_accept_response(key: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        accept_key(key)
    )
}

#[cfg(test)]
mod tests {
    use super::{build_accept_response, is_websocket_upgrade};
    use crate::http1::{MessageParser, Role};

    const UPGRADE: &str = "GET /chat HTTP/1.1\r\n\
        Host: server.example.com\r\n\
        Upgrade: websocket\r\n\
        Connection: keep-alive, Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Version: 13\r\n\r\n";

    #[test]
    fn detects_upgrade_request() {
        let mut parser = MessageParser::new(Role::Server);
        parser.parse(UPGRADE.as_bytes()).unwrap();
        assert!(is_websocket_upgrade(&parser));
    }

    #[test]
    fn rejects_other_versions() {
        let request = UPGRADE.replace("Version: 13", "Version: 8");
        let mut parser = MessageParser::new(Role::Server);
        parser.parse(request.as_bytes()).unwrap();
        assert!(!is_websocket_upgrade(&parser));
    }

    #[test]
    fn accept_response_carries_rfc_key() {
        let response = build_accept_response("dGhlIHNhbXBsZSBub25jZQ==");
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(response.ends_with("\r\n\r\n"));
    }
}
