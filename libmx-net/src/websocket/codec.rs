use tracing::{debug, warn};

use super::frame::{MAX_CONTROL_PAYLOAD, Opcode, apply_mask, is_valid_close_code};
use super::sender::WebSocketSender;
use super::types::{WebSocketConfig, WebSocketError, WebSocketErrorKind};
use crate::http1::Role;

const BLOCK_SIZE: usize = 16 * 1024;
const CACHE_BLOCKS: usize = 4;

/// Receives the events of one connection. Messages are delivered whole.
pub trait WebSocketHandler {
    fn on_text(&mut self, text: &str);

    fn on_binary(&mut self, data: &[u8]);

    /// A pong carrying the same payload has already been queued.
    fn on_ping(&mut self, _payload: &[u8]) {}

    fn on_pong(&mut self, _payload: &[u8]) {}

    fn on_close(&mut self, _code: Option<u16>, _reason: &str) {}

    /// Overrides the configured ceiling for a reassembled message.
    fn max_message_size(&self) -> Option<usize> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecvState {
    Header,
    ExtendedLength { width: usize },
    MaskingKey,
    Payload,
    Closed,
    Failed,
}

#[derive(Debug, Clone, Copy)]
struct FrameHead {
    fin: bool,
    opcode: Opcode,
    masked: bool,
    len: usize,
    mask: [u8; 4],
}

#[derive(Debug, Default)]
struct BufferCache {
    blocks: Vec<Vec<u8>>,
}

impl BufferCache {
    fn take(&mut self) -> Vec<u8> {
        self.blocks
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(BLOCK_SIZE))
    }

    fn put(&mut self, mut block: Vec<u8>) {
        if self.blocks.len() < CACHE_BLOCKS {
            block.clear();
            block.shrink_to(BLOCK_SIZE);
            self.blocks.push(block);
        }
    }
}

/// Incremental RFC 6455 frame decoder for one connection.
///
/// `feed` accepts any split of the byte stream. Control frames are handled as
/// they complete, even between the fragments of a data message.
#[derive(Debug)]
pub struct WebSocketCodec {
    role: Role,
    config: WebSocketConfig,
    sender: WebSocketSender,
    state: RecvState,
    scratch: [u8; 8],
    scratch_len: usize,
    frame: FrameHead,
    received: usize,
    control: Vec<u8>,
    message: Vec<u8>,
    message_opcode: Option<Opcode>,
    cache: BufferCache,
    consumed: usize,
}

impl WebSocketCodec {
    pub fn new(role: Role, config: WebSocketConfig, sender: WebSocketSender) -> Self {
        Self {
            role,
            config,
            sender,
            state: RecvState::Header,
            scratch: [0; 8],
            scratch_len: 0,
            frame: FrameHead {
                fin: true,
                opcode: Opcode::Continuation,
                masked: false,
                len: 0,
                mask: [0; 4],
            },
            received: 0,
            control: Vec::with_capacity(MAX_CONTROL_PAYLOAD),
            message: Vec::new(),
            message_opcode: None,
            cache: BufferCache::default(),
            consumed: 0,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn sender(&self) -> &WebSocketSender {
        &self.sender
    }

    /// True once a close frame was received or a protocol error ended the connection.
    pub fn is_closed(&self) -> bool {
        matches!(self.state, RecvState::Closed | RecvState::Failed)
    }

    pub fn bytes_consumed(&self) -> usize {
        self.consumed
    }

    /// Consumes `input`, dispatching every message and control frame it completes.
    ///
    /// After a close frame the remaining input is ignored. After an error every
    /// call fails with `Closed`.
    pub fn feed<H>(&mut self, input: &[u8], handler: &mut H) -> Result<usize, WebSocketError>
    where
        H: WebSocketHandler + ?Sized,
    {
        if self.state == RecvState::Failed {
            return Err(WebSocketError::new(WebSocketErrorKind::Closed, self.consumed));
        }
        match self.decode(input, handler) {
            Ok(()) => {
                self.consumed += input.len();
                Ok(input.len())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    fn decode<H>(&mut self, input: &[u8], handler: &mut H) -> Result<(), WebSocketError>
    where
        H: WebSocketHandler + ?Sized,
    {
        let mut pos = 0;
        while pos < input.len() {
            let offset = self.consumed + pos;
            match self.state {
                RecvState::Header => {
                    self.scratch[self.scratch_len] = input[pos];
                    self.scratch_len += 1;
                    pos += 1;
                    if self.scratch_len == 2 {
                        self.read_header(offset, handler)?;
                    }
                }
                RecvState::ExtendedLength { width } => {
                    self.scratch[self.scratch_len] = input[pos];
                    self.scratch_len += 1;
                    pos += 1;
                    if self.scratch_len == width {
                        let len = self.scratch[..width]
                            .iter()
                            .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte));
                        self.set_length(len, offset, handler)?;
                    }
                }
                RecvState::MaskingKey => {
                    self.scratch[self.scratch_len] = input[pos];
                    self.scratch_len += 1;
                    pos += 1;
                    if self.scratch_len == 4 {
                        self.frame.mask.copy_from_slice(&self.scratch[..4]);
                        self.begin_payload(offset, handler)?;
                    }
                }
                RecvState::Payload => {
                    let take = (self.frame.len - self.received).min(input.len() - pos);
                    let target = if self.frame.opcode.is_control() {
                        &mut self.control
                    } else {
                        &mut self.message
                    };
                    let start = target.len();
                    target.extend_from_slice(&input[pos..pos + take]);
                    if self.frame.masked {
                        apply_mask(&mut target[start..], self.frame.mask, self.received);
                    }
                    self.received += take;
                    pos += take;
                    if self.received == self.frame.len {
                        self.complete_frame(offset + take - 1, handler)?;
                    }
                }
                RecvState::Closed => return Ok(()),
                RecvState::Failed => {
                    return Err(WebSocketError::new(WebSocketErrorKind::Closed, offset));
                }
            }
        }
        Ok(())
    }

    fn read_header<H>(&mut self, offset: usize, handler: &mut H) -> Result<(), WebSocketError>
    where
        H: WebSocketHandler + ?Sized,
    {
        let [first, second] = [self.scratch[0], self.scratch[1]];
        self.scratch_len = 0;
        let error = |kind| Err(WebSocketError::new(kind, offset));

        if first & 0x70 != 0 {
            return error(WebSocketErrorKind::ReservedBitsSet);
        }
        let Some(opcode) = Opcode::from_u8(first & 0x0F) else {
            return error(WebSocketErrorKind::UnknownOpcode);
        };
        let fin = first & 0x80 != 0;
        match (opcode, self.message_opcode) {
            (Opcode::Continuation, None) => return error(WebSocketErrorKind::UnexpectedContinuation),
            (Opcode::Text | Opcode::Binary, Some(_)) => {
                return error(WebSocketErrorKind::InterleavedDataFrame);
            }
            _ => {}
        }
        if opcode.is_control() && !fin {
            return error(WebSocketErrorKind::FragmentedControlFrame);
        }
        let masked = second & 0x80 != 0;
        match (self.role, masked) {
            (Role::Server, false) => return error(WebSocketErrorKind::UnmaskedClientFrame),
            (Role::Client, true) => return error(WebSocketErrorKind::MaskedServerFrame),
            _ => {}
        }
        let len = second & 0x7F;
        if opcode.is_control() && usize::from(len) > MAX_CONTROL_PAYLOAD {
            return error(WebSocketErrorKind::ControlFrameTooLarge);
        }

        self.frame = FrameHead {
            fin,
            opcode,
            masked,
            len: 0,
            mask: [0; 4],
        };
        match len {
            126 => {
                self.state = RecvState::ExtendedLength { width: 2 };
                Ok(())
            }
            127 => {
                self.state = RecvState::ExtendedLength { width: 8 };
                Ok(())
            }
            len => self.set_length(u64::from(len), offset, handler),
        }
    }

    fn set_length<H>(&mut self, len: u64, offset: usize, handler: &mut H) -> Result<(), WebSocketError>
    where
        H: WebSocketHandler + ?Sized,
    {
        self.scratch_len = 0;
        if !self.frame.opcode.is_control() {
            let limit = handler
                .max_message_size()
                .unwrap_or(self.config.max_message_size);
            let total = (self.message.len() as u64).saturating_add(len);
            if total > limit as u64 {
                return Err(WebSocketError::new(WebSocketErrorKind::MessageTooLarge, offset));
            }
        }
        self.frame.len = usize::try_from(len)
            .map_err(|_| WebSocketError::new(WebSocketErrorKind::MessageTooLarge, offset))?;
        debug!(
            opcode = ?self.frame.opcode,
            fin = self.frame.fin,
            masked = self.frame.masked,
            len = self.frame.len,
            "websocket frame"
        );
        if self.frame.masked {
            self.state = RecvState::MaskingKey;
            Ok(())
        } else {
            self.begin_payload(offset, handler)
        }
    }

    fn begin_payload<H>(&mut self, offset: usize, handler: &mut H) -> Result<(), WebSocketError>
    where
        H: WebSocketHandler + ?Sized,
    {
        self.scratch_len = 0;
        self.received = 0;
        if matches!(self.frame.opcode, Opcode::Text | Opcode::Binary) {
            self.message_opcode = Some(self.frame.opcode);
            self.message = self.cache.take();
        }
        if self.frame.len == 0 {
            self.complete_frame(offset, handler)
        } else {
            self.state = RecvState::Payload;
            Ok(())
        }
    }

    fn complete_frame<H>(&mut self, offset: usize, handler: &mut H) -> Result<(), WebSocketError>
    where
        H: WebSocketHandler + ?Sized,
    {
        self.state = RecvState::Header;
        if self.frame.opcode.is_control() {
            let payload = std::mem::take(&mut self.control);
            let result = self.handle_control(&payload, offset, handler);
            self.control = payload;
            self.control.clear();
            return result;
        }
        if !self.frame.fin {
            return Ok(());
        }
        let message = std::mem::take(&mut self.message);
        let result = match self.message_opcode.take() {
            Some(Opcode::Text) => match std::str::from_utf8(&message) {
                Ok(text) => {
                    handler.on_text(text);
                    Ok(())
                }
                Err(_) => Err(WebSocketError::new(WebSocketErrorKind::InvalidUtf8, offset)),
            },
            _ => {
                handler.on_binary(&message);
                Ok(())
            }
        };
        self.cache.put(message);
        result
    }

    fn handle_control<H>(
        &mut self,
        payload: &[u8],
        offset: usize,
        handler: &mut H,
    ) -> Result<(), WebSocketError>
    where
        H: WebSocketHandler + ?Sized,
    {
        match self.frame.opcode {
            Opcode::Ping => {
                handler.on_ping(payload);
                self.reply(self.sender.send_pong(payload), offset)
            }
            Opcode::Pong => {
                handler.on_pong(payload);
                Ok(())
            }
            _ => {
                let (code, reason) = parse_close(payload)
                    .ok_or_else(|| WebSocketError::new(WebSocketErrorKind::InvalidClosePayload, offset))?;
                debug!(?code, reason, "close received");
                handler.on_close(code, reason);
                self.state = RecvState::Closed;
                if self.sender.is_close_sent() {
                    return Ok(());
                }
                self.reply(self.sender.send_close(code.unwrap_or(1000), ""), offset)
            }
        }
    }

    // a reply racing our own close is dropped quietly
    fn reply(&self, result: Result<(), WebSocketError>, offset: usize) -> Result<(), WebSocketError> {
        match result {
            Err(err) if err.kind != WebSocketErrorKind::Closed => {
                Err(WebSocketError::new(err.kind, offset))
            }
            _ => Ok(()),
        }
    }

    fn fail(&mut self, err: WebSocketError) -> WebSocketError {
        warn!(kind = ?err.kind, offset = err.offset, "websocket protocol error");
        self.state = RecvState::Failed;
        if let Some(code) = err.kind.close_code() {
            if !self.sender.is_close_sent() {
                if let Err(close_err) = self.sender.send_close(code, "") {
                    debug!(error = %close_err, "close frame not sent");
                }
            }
        }
        err
    }
}

fn parse_close(payload: &[u8]) -> Option<(Option<u16>, &str)> {
    match payload {
        [] => Some((None, "")),
        [_] => None,
        [high, low, reason @ ..] => {
            let code = u16::from_be_bytes([*high, *low]);
            if !is_valid_close_code(code) {
                return None;
            }
            let reason = std::str::from_utf8(reason).ok()?;
            Some((Some(code), reason))
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use crossbeam_channel::{Receiver, unbounded};

    use super::{CACHE_BLOCKS, WebSocketCodec, WebSocketHandler};
    use crate::http1::Role;
    use crate::websocket::{
        Opcode, WebSocketConfig, WebSocketErrorKind, WebSocketSender, encode_frame,
    };

    const KEY: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

    #[derive(Debug, Default)]
    struct Recorder {
        events: Vec<String>,
        limit: Option<usize>,
    }

    impl WebSocketHandler for Recorder {
        fn on_text(&mut self, text: &str) {
            self.events.push(format!("text:{text}"));
        }

        fn on_binary(&mut self, data: &[u8]) {
            self.events.push(format!("binary:{}", data.len()));
        }

        fn on_ping(&mut self, payload: &[u8]) {
            self.events
                .push(format!("ping:{}", String::from_utf8_lossy(payload)));
        }

        fn on_pong(&mut self, payload: &[u8]) {
            self.events
                .push(format!("pong:{}", String::from_utf8_lossy(payload)));
        }

        fn on_close(&mut self, code: Option<u16>, reason: &str) {
            self.events.push(format!("close:{code:?}:{reason}"));
        }

        fn max_message_size(&self) -> Option<usize> {
            self.limit
        }
    }

    fn server() -> (WebSocketCodec, Receiver<Vec<u8>>) {
        let (tx, rx) = unbounded();
        let config = WebSocketConfig::default();
        let sender = WebSocketSender::new(Role::Server, config, tx);
        (WebSocketCodec::new(Role::Server, config, sender), rx)
    }

    fn client_frame(opcode: Opcode, fin: bool, payload: &[u8]) -> Vec<u8> {
        encode_frame(opcode, fin, payload, Some(KEY))
    }

    fn fragmented_hello() -> Vec<u8> {
        let mut wire = client_frame(Opcode::Text, false, b"Hel");
        wire.extend(client_frame(Opcode::Continuation, false, b"lo "));
        wire.extend(client_frame(Opcode::Ping, true, b"p"));
        wire.extend(client_frame(Opcode::Continuation, true, b"world"));
        wire
    }

    #[test]
    fn reassembles_fragments_around_a_ping() {
        let wire = fragmented_hello();
        let (mut codec, rx) = server();
        let mut handler = Recorder::default();
        assert_eq!(codec.feed(&wire, &mut handler).unwrap(), wire.len());
        assert_eq!(handler.events, ["ping:p", "text:Hello world"]);
        assert_eq!(rx.try_recv().unwrap(), [0x8A, 0x01, b'p']);
    }

    #[test]
    fn every_split_point_yields_the_same_events() {
        let wire = fragmented_hello();
        for split in 0..=wire.len() {
            let (mut codec, _rx) = server();
            let mut handler = Recorder::default();
            codec.feed(&wire[..split], &mut handler).unwrap();
            codec.feed(&wire[split..], &mut handler).unwrap();
            assert_eq!(handler.events, ["ping:p", "text:Hello world"], "split {split}");
        }
    }

    #[test]
    fn extended_lengths_are_decoded() {
        let (mut codec, _rx) = server();
        let mut handler = Recorder::default();
        let medium = vec![7u8; 300];
        let large = vec![9u8; 70_000];
        let mut wire = client_frame(Opcode::Binary, true, &medium);
        wire.extend(client_frame(Opcode::Binary, true, &large));
        handler.limit = Some(100_000);
        for byte in &wire {
            codec.feed(std::slice::from_ref(byte), &mut handler).unwrap();
        }
        assert_eq!(handler.events, ["binary:300", "binary:70000"]);
        assert_eq!(codec.bytes_consumed(), wire.len());
    }

    #[test]
    fn server_rejects_unmasked_frame() {
        let (mut codec, rx) = server();
        let mut handler = Recorder::default();
        let wire = encode_frame(Opcode::Text, true, b"hi", None);
        let err = codec.feed(&wire, &mut handler).unwrap_err();
        assert_eq!(err.kind, WebSocketErrorKind::UnmaskedClientFrame);
        assert_eq!(err.offset, 1);
        assert_eq!(rx.try_recv().unwrap(), [0x88, 0x02, 0x03, 0xEA]);
        assert_matches!(
            codec.feed(b"x", &mut handler),
            Err(err) if err.kind == WebSocketErrorKind::Closed
        );
        assert!(handler.events.is_empty());
    }

    #[test]
    fn protocol_error_survives_a_dead_sink() {
        let (mut codec, rx) = server();
        drop(rx);
        let mut handler = Recorder::default();
        let wire = encode_frame(Opcode::Text, true, b"hi", None);
        assert_matches!(
            codec.feed(&wire, &mut handler),
            Err(err) if err.kind == WebSocketErrorKind::UnmaskedClientFrame
        );
        assert!(codec.is_closed());
        assert!(!codec.sender().is_close_sent());
    }

    #[test]
    fn client_rejects_masked_frame() {
        let (tx, _rx) = unbounded();
        let config = WebSocketConfig::default();
        let sender = WebSocketSender::new(Role::Client, config, tx);
        let mut codec = WebSocketCodec::new(Role::Client, config, sender);
        let mut handler = Recorder::default();
        let wire = client_frame(Opcode::Binary, true, b"x");
        assert_matches!(
            codec.feed(&wire, &mut handler),
            Err(err) if err.kind == WebSocketErrorKind::MaskedServerFrame && err.offset == 1
        );
        assert!(codec.is_closed());
        assert!(codec.sender().is_close_sent());
    }

    #[test]
    fn message_over_handler_limit_is_fatal() {
        let (mut codec, rx) = server();
        let mut handler = Recorder {
            limit: Some(10),
            ..Recorder::default()
        };
        let mut wire = client_frame(Opcode::Text, false, b"hello");
        wire.extend(client_frame(Opcode::Continuation, true, b"world!"));
        let err = codec.feed(&wire, &mut handler).unwrap_err();
        assert_eq!(err.kind, WebSocketErrorKind::MessageTooLarge);
        assert_eq!(err.offset, 12);
        assert_eq!(rx.try_recv().unwrap(), [0x88, 0x02, 0x03, 0xF1]);
    }

    #[test]
    fn frame_ordering_violations() {
        let cases = [
            (
                client_frame(Opcode::Continuation, true, b"x"),
                WebSocketErrorKind::UnexpectedContinuation,
            ),
            (client_frame(Opcode::Ping, false, b""), WebSocketErrorKind::FragmentedControlFrame),
            (vec![0xC1, 0x80], WebSocketErrorKind::ReservedBitsSet),
            (vec![0x83, 0x80], WebSocketErrorKind::UnknownOpcode),
            (vec![0x89, 0xFE], WebSocketErrorKind::ControlFrameTooLarge),
        ];
        for (wire, expected) in cases {
            let (mut codec, _rx) = server();
            let err = codec.feed(&wire, &mut Recorder::default()).unwrap_err();
            assert_eq!(err.kind, expected);
        }

        let (mut codec, _rx) = server();
        let mut wire = client_frame(Opcode::Text, false, b"a");
        wire.extend(client_frame(Opcode::Binary, true, b"b"));
        let err = codec.feed(&wire, &mut Recorder::default()).unwrap_err();
        assert_eq!(err.kind, WebSocketErrorKind::InterleavedDataFrame);
    }

    #[test]
    fn close_is_echoed_and_later_input_ignored() {
        let (mut codec, rx) = server();
        let mut handler = Recorder::default();
        let mut payload = 1001u16.to_be_bytes().to_vec();
        payload.extend_from_slice(b"going");
        let mut wire = client_frame(Opcode::Close, true, &payload);
        wire.extend(client_frame(Opcode::Text, true, b"late"));
        assert_eq!(codec.feed(&wire, &mut handler).unwrap(), wire.len());
        assert_eq!(handler.events, ["close:Some(1001):going"]);
        assert_eq!(rx.try_recv().unwrap(), [0x88, 0x02, 0x03, 0xE9]);
        assert!(codec.is_closed());
        assert_eq!(codec.feed(b"junk", &mut handler).unwrap(), 4);
    }

    #[test]
    fn empty_close_is_answered_with_normal_closure() {
        let (mut codec, rx) = server();
        let mut handler = Recorder::default();
        codec
            .feed(&client_frame(Opcode::Close, true, b""), &mut handler)
            .unwrap();
        assert_eq!(handler.events, ["close:None:"]);
        assert_eq!(rx.try_recv().unwrap(), [0x88, 0x02, 0x03, 0xE8]);
    }

    #[test]
    fn invalid_close_payloads() {
        let mut bad_reason = 1000u16.to_be_bytes().to_vec();
        bad_reason.extend_from_slice(&[0xff, 0xfe]);
        for payload in [vec![0x03], 1005u16.to_be_bytes().to_vec(), bad_reason] {
            let (mut codec, rx) = server();
            let mut handler = Recorder::default();
            let err = codec
                .feed(&client_frame(Opcode::Close, true, &payload), &mut handler)
                .unwrap_err();
            assert_eq!(err.kind, WebSocketErrorKind::InvalidClosePayload);
            assert!(handler.events.is_empty());
            assert_eq!(rx.try_recv().unwrap(), [0x88, 0x02, 0x03, 0xEA]);
        }
    }

    #[test]
    fn invalid_utf8_text_closes_with_1007() {
        let (mut codec, rx) = server();
        let err = codec
            .feed(&client_frame(Opcode::Text, true, &[0xC3, 0x28]), &mut Recorder::default())
            .unwrap_err();
        assert_eq!(err.kind, WebSocketErrorKind::InvalidUtf8);
        assert_eq!(rx.try_recv().unwrap(), [0x88, 0x02, 0x03, 0xEF]);
    }

    #[test]
    fn receive_buffers_are_recycled() {
        let (mut codec, _rx) = server();
        let mut handler = Recorder::default();
        for _ in 0..10 {
            codec
                .feed(&client_frame(Opcode::Binary, true, b"abc"), &mut handler)
                .unwrap();
        }
        assert_eq!(handler.events.len(), 10);
        assert!(codec.cache.blocks.len() <= CACHE_BLOCKS);
        assert!(codec.cache.blocks.iter().all(|block| block.is_empty()));
    }
}
