use crossbeam_channel::{Receiver, unbounded};
use libmx_net::{
    MessageParser, ParseState, Role, SecWebSocketAccept, WebSocketCodec, WebSocketConfig,
    WebSocketErrorKind, WebSocketHandler, WebSocketSender, accept_key, build_accept_response,
    is_websocket_upgrade,
};

#[derive(Debug, Default)]
struct Collect {
    texts: Vec<String>,
    binaries: Vec<Vec<u8>>,
    pings: usize,
    closes: Vec<(Option<u16>, String)>,
}

impl WebSocketHandler for Collect {
    fn on_text(&mut self, text: &str) {
        self.texts.push(text.to_string());
    }

    fn on_binary(&mut self, data: &[u8]) {
        self.binaries.push(data.to_vec());
    }

    fn on_ping(&mut self, _payload: &[u8]) {
        self.pings += 1;
    }

    fn on_close(&mut self, code: Option<u16>, reason: &str) {
        self.closes.push((code, reason.to_string()));
    }
}

struct Endpoint {
    codec: WebSocketCodec,
    outgoing: Receiver<Vec<u8>>,
}

impl Endpoint {
    fn new(role: Role, config: WebSocketConfig) -> Self {
        let (tx, rx) = unbounded();
        let sender = WebSocketSender::new(role, config, tx);
        Self {
            codec: WebSocketCodec::new(role, config, sender),
            outgoing: rx,
        }
    }

    fn sender(&self) -> &WebSocketSender {
        self.codec.sender()
    }

    /// Delivers everything `self` has queued to `peer`.
    fn flush_to(&self, peer: &mut Endpoint, handler: &mut Collect) {
        for frame in self.outgoing.try_iter() {
            peer.codec.feed(&frame, handler).unwrap();
        }
    }
}

fn small_frames() -> WebSocketConfig {
    WebSocketConfig {
        max_frame_payload: 5,
        ..WebSocketConfig::default()
    }
}

#[test]
fn handshake_round_trip() {
    let request = b"GET /chat HTTP/1.1\r\n\
Host: server.example.com\r\n\
Upgrade: websocket\r\n\
Connection: Upgrade\r\n\
Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
Sec-WebSocket-Version: 13\r\n\r\n";
    let mut server = MessageParser::new(Role::Server);
    assert_eq!(server.parse(request).unwrap(), request.len());
    assert!(is_websocket_upgrade(&server));

    let response = build_accept_response("dGhlIHNhbXBsZSBub25jZQ==");
    let mut client = MessageParser::new(Role::Client);
    assert_eq!(client.parse(response.as_bytes()).unwrap(), response.len());
    assert_eq!(client.state(), ParseState::Done);
    assert_eq!(client.status_code(), Some(101));
    let accept = client.headers().typed::<SecWebSocketAccept>().unwrap();
    assert_eq!(accept.accept, accept_key("dGhlIHNhbXBsZSBub25jZQ=="));
}

#[test]
fn fragmented_messages_cross_in_both_directions() {
    let mut client = Endpoint::new(Role::Client, small_frames());
    let mut server = Endpoint::new(Role::Server, small_frames());
    let mut at_server = Collect::default();
    let mut at_client = Collect::default();

    client.sender().send_text("hello websocket world").unwrap();
    client.sender().send_binary(&[1, 2, 3, 4, 5, 6, 7]).unwrap();
    assert_eq!(client.sender().frames_sent(), 7);
    client.flush_to(&mut server, &mut at_server);
    assert_eq!(at_server.texts, ["hello websocket world"]);
    assert_eq!(at_server.binaries, [vec![1, 2, 3, 4, 5, 6, 7]]);

    let reply = at_server.texts[0].to_uppercase();
    server.sender().send_text(&reply).unwrap();
    server.flush_to(&mut client, &mut at_client);
    assert_eq!(at_client.texts, ["HELLO WEBSOCKET WORLD"]);
}

#[test]
fn ping_is_answered_by_the_peer() {
    let mut client = Endpoint::new(Role::Client, WebSocketConfig::default());
    let mut server = Endpoint::new(Role::Server, WebSocketConfig::default());
    let mut at_server = Collect::default();
    let mut at_client = Collect::default();

    client.sender().send_ping(b"are you there").unwrap();
    client.flush_to(&mut server, &mut at_server);
    assert_eq!(at_server.pings, 1);
    let pong = server.outgoing.try_recv().unwrap();
    assert_eq!(&pong[..2], [0x8A, 13]);
    client.codec.feed(&pong, &mut at_client).unwrap();
}

#[test]
fn closing_handshake() {
    let mut client = Endpoint::new(Role::Client, WebSocketConfig::default());
    let mut server = Endpoint::new(Role::Server, WebSocketConfig::default());
    let mut at_server = Collect::default();
    let mut at_client = Collect::default();

    client.sender().send_close(1000, "done").unwrap();
    assert_eq!(
        client.sender().send_text("too late").unwrap_err().kind,
        WebSocketErrorKind::Closed
    );
    client.flush_to(&mut server, &mut at_server);
    assert_eq!(at_server.closes, [(Some(1000), "done".to_string())]);
    assert!(server.codec.is_closed());
    assert!(server.sender().is_close_sent());

    server.flush_to(&mut client, &mut at_client);
    assert_eq!(at_client.closes, [(Some(1000), String::new())]);
    // the client already sent its close, so nothing is echoed back
    assert!(client.outgoing.try_recv().is_err());
}

#[test]
fn concurrent_senders_never_interleave_messages() {
    let mut server = Endpoint::new(Role::Server, WebSocketConfig::default());
    let (tx, rx) = unbounded();
    let sender = WebSocketSender::new(Role::Client, small_frames(), tx);

    std::thread::scope(|scope| {
        for thread in 0..4 {
            let sender = sender.clone();
            scope.spawn(move || {
                for index in 0..20 {
                    sender
                        .send_text(&format!("thread {thread} message {index:02}"))
                        .unwrap();
                }
            });
        }
        let pinger = sender.clone();
        scope.spawn(move || {
            for _ in 0..20 {
                pinger.send_ping(b"hb").unwrap();
            }
        });
    });

    let mut at_server = Collect::default();
    for frame in rx.try_iter() {
        server.codec.feed(&frame, &mut at_server).unwrap();
    }
    assert_eq!(at_server.pings, 20);
    assert_eq!(at_server.texts.len(), 80);
    for thread in 0..4 {
        let prefix = format!("thread {thread} ");
        let mine: Vec<&String> = at_server
            .texts
            .iter()
            .filter(|text| text.starts_with(&prefix))
            .collect();
        let expected: Vec<String> = (0..20)
            .map(|index| format!("thread {thread} message {index:02}"))
            .collect();
        assert_eq!(mine, expected.iter().collect::<Vec<_>>());
    }
}
