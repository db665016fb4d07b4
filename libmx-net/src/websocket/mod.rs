mod codec;
mod frame;
mod handshake;
mod sender;
mod types;

pub use codec::{WebSocketCodec, WebSocketHandler};
pub use frame::{MAX_CONTROL_PAYLOAD, Opcode, apply_mask, encode_frame};
pub use handshake::{accept_key, build_accept_response, is_websocket_upgrade};
pub use sender::{FrameSink, MessageWriter, WebSocketSender};
pub use types::{WebSocketConfig, WebSocketError, WebSocketErrorKind};
