use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use super::frame::{MAX_CONTROL_PAYLOAD, Opcode, close_payload, encode_frame};
use super::types::{WebSocketConfig, WebSocketError, WebSocketErrorKind};
use crate::http1::Role;

/// Destination for complete outgoing frames, usually the connection's write queue.
pub trait FrameSink: Send + Sync {
    fn send(&self, frame: Vec<u8>) -> Result<(), String>;
}

impl FrameSink for crossbeam_channel::Sender<Vec<u8>> {
    fn send(&self, frame: Vec<u8>) -> Result<(), String> {
        crossbeam_channel::Sender::send(self, frame).map_err(|err| err.to_string())
    }
}

#[derive(Debug, Default)]
struct WireState {
    close_sent: bool,
    frames_sent: u64,
}

struct SenderInner {
    role: Role,
    max_frame_payload: usize,
    sink: Box<dyn FrameSink>,
    // held for a whole logical message
    message: Mutex<()>,
    // held while one frame is composed and handed to the sink
    wire: Mutex<WireState>,
}

/// Send side of a WebSocket connection; cheap to clone and share between threads.
///
/// Data messages are serialized through a message lock, so two messages never
/// interleave. Control frames only take the per-frame wire lock and can be sent
/// between the frames of a message in progress.
#[derive(Clone)]
pub struct WebSocketSender {
    inner: Arc<SenderInner>,
}

impl std::fmt::Debug for WebSocketSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketSender")
            .field("role", &self.inner.role)
            .field("max_frame_payload", &self.inner.max_frame_payload)
            .finish()
    }
}

impl WebSocketSender {
    pub fn new(role: Role, config: WebSocketConfig, sink: impl FrameSink + 'static) -> Self {
        Self {
            inner: Arc::new(SenderInner {
                role,
                max_frame_payload: config.max_frame_payload.max(1),
                sink: Box::new(sink),
                message: Mutex::new(()),
                wire: Mutex::new(WireState::default()),
            }),
        }
    }

    pub fn begin_text_message(&self) -> MessageWriter<'_> {
        self.begin(Opcode::Text)
    }

    pub fn begin_binary_message(&self) -> MessageWriter<'_> {
        self.begin(Opcode::Binary)
    }

    pub fn send_text(&self, text: &str) -> Result<(), WebSocketError> {
        let mut writer = self.begin_text_message();
        writer.write(text.as_bytes())?;
        writer.end()
    }

    pub fn send_binary(&self, data: &[u8]) -> Result<(), WebSocketError> {
        let mut writer = self.begin_binary_message();
        writer.write(data)?;
        writer.end()
    }

    pub fn send_ping(&self, payload: &[u8]) -> Result<(), WebSocketError> {
        self.send_control(Opcode::Ping, payload)
    }

    pub fn send_pong(&self, payload: &[u8]) -> Result<(), WebSocketError> {
        self.send_control(Opcode::Pong, payload)
    }

    /// Starts the closing handshake. Later data and control sends fail with `Closed`.
    pub fn send_close(&self, code: u16, reason: &str) -> Result<(), WebSocketError> {
        debug!(code, reason, "sending close");
        self.send_control(Opcode::Close, &close_payload(code, reason))
    }

    pub fn is_close_sent(&self) -> bool {
        self.lock_wire().close_sent
    }

    /// Frames handed to the sink so far.
    pub fn frames_sent(&self) -> u64 {
        self.lock_wire().frames_sent
    }

    fn begin(&self, opcode: Opcode) -> MessageWriter<'_> {
        let guard = self
            .inner
            .message
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        MessageWriter {
            sender: self,
            _message: guard,
            opcode,
            pending: Vec::new(),
            finished: false,
        }
    }

    fn send_control(&self, opcode: Opcode, payload: &[u8]) -> Result<(), WebSocketError> {
        if payload.len() > MAX_CONTROL_PAYLOAD {
            return Err(WebSocketError::new(WebSocketErrorKind::ControlFrameTooLarge, 0));
        }
        self.send_frame(opcode, true, payload)
    }

    fn send_frame(&self, opcode: Opcode, fin: bool, payload: &[u8]) -> Result<(), WebSocketError> {
        let mut wire = self.lock_wire();
        if wire.close_sent {
            return Err(WebSocketError::new(WebSocketErrorKind::Closed, 0));
        }
        let mask = match self.inner.role {
            Role::Client => Some(rand::random::<[u8; 4]>()),
            Role::Server => None,
        };
        let frame = encode_frame(opcode, fin, payload, mask);
        self.inner
            .sink
            .send(frame)
            .map_err(|err| WebSocketError::new(WebSocketErrorKind::Sink(err), 0))?;
        wire.frames_sent += 1;
        if opcode == Opcode::Close {
            wire.close_sent = true;
        }
        Ok(())
    }

    fn lock_wire(&self) -> MutexGuard<'_, WireState> {
        self.inner
            .wire
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// One outgoing data message. Holds the sender's message lock until ended or dropped.
pub struct MessageWriter<'a> {
    sender: &'a WebSocketSender,
    _message: MutexGuard<'a, ()>,
    opcode: Opcode,
    pending: Vec<u8>,
    finished: bool,
}

impl MessageWriter<'_> {
    /// Appends payload, flushing full frames as they fill.
    pub fn write(&mut self, data: &[u8]) -> Result<(), WebSocketError> {
        self.pending.extend_from_slice(data);
        let max = self.sender.inner.max_frame_payload;
        // the last frame is held back so `end` can mark it final
        while self.pending.len() > max {
            let rest = self.pending.split_off(max);
            let frame = std::mem::replace(&mut self.pending, rest);
            self.flush(false, &frame)?;
        }
        Ok(())
    }

    pub fn end(mut self) -> Result<(), WebSocketError> {
        self.finish()
    }

    fn finish(&mut self) -> Result<(), WebSocketError> {
        self.finished = true;
        let last = std::mem::take(&mut self.pending);
        self.flush(true, &last)
    }

    fn flush(&mut self, fin: bool, payload: &[u8]) -> Result<(), WebSocketError> {
        let opcode = self.opcode;
        self.opcode = Opcode::Continuation;
        self.sender.send_frame(opcode, fin, payload)
    }
}

impl Drop for MessageWriter<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(err) = self.finish() {
                debug!(error = %err, "message end not sent");
            }
        }
    }
}
