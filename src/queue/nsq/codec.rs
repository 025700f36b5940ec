//! NSQ TCP protocol V2 framing
//!
//! Server to client traffic is framed as `size:u32be | type:u32be | data`,
//! where `size` counts the type and the data. Client to server traffic is a
//! line-oriented command, optionally followed by a `size:u32be | body` payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::time::Duration;
use tokio_util::codec::{Decoder, Encoder};

use crate::queue::{Message, MessageId, QueueError};

/// Protocol magic sent once after connecting
pub const MAGIC_V2: &[u8; 4] = b"  V2";

/// Response body sent by the broker as a keepalive
pub const HEARTBEAT: &[u8] = b"_heartbeat_";

/// Response body acknowledging a command
pub const OK: &[u8] = b"OK";

const FRAME_TYPE_RESPONSE: u32 = 0;
const FRAME_TYPE_ERROR: u32 = 1;
const FRAME_TYPE_MESSAGE: u32 = 2;

/// timestamp (8) + attempts (2) + id (16)
const MESSAGE_HEADER_LEN: usize = 26;

/// Default cap on a single frame, matching nsqd's default max message size
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024 + MESSAGE_HEADER_LEN + 4;

/// A decoded server frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Response(Bytes),
    Error(Bytes),
    Message(Message),
}

impl Frame {
    pub fn is_heartbeat(&self) -> bool {
        matches!(self, Frame::Response(body) if body.as_ref() == HEARTBEAT)
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Frame::Response(body) if body.as_ref() == OK)
    }
}

/// A client command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Client metadata as a JSON document
    Identify(Bytes),
    Auth(Bytes),
    Sub { topic: String, channel: String },
    Rdy(u32),
    Fin(MessageId),
    Req { id: MessageId, delay: Duration },
    Touch(MessageId),
    Nop,
    Pub { topic: String, body: Bytes },
    Cls,
}

/// Codec for the client side of an NSQ connection
#[derive(Debug, Clone)]
pub struct NsqCodec {
    max_frame_size: usize,
}

impl NsqCodec {
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for NsqCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for NsqCodec {
    type Item = Frame;
    type Error = QueueError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, QueueError> {
        if src.len() < 4 {
            return Ok(None);
        }

        let size = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if size < 4 {
            return Err(QueueError::Protocol(format!("frame size {size} too small")));
        }
        if size > self.max_frame_size {
            return Err(QueueError::Protocol(format!(
                "frame size {size} exceeds limit {}",
                self.max_frame_size
            )));
        }

        if src.len() < 4 + size {
            src.reserve(4 + size - src.len());
            return Ok(None);
        }

        src.advance(4);
        let frame_type = src.get_u32();
        let data = src.split_to(size - 4).freeze();

        match frame_type {
            FRAME_TYPE_RESPONSE => Ok(Some(Frame::Response(data))),
            FRAME_TYPE_ERROR => Ok(Some(Frame::Error(data))),
            FRAME_TYPE_MESSAGE => decode_message(data).map(|m| Some(Frame::Message(m))),
            other => Err(QueueError::Protocol(format!("unknown frame type {other}"))),
        }
    }
}

fn decode_message(mut data: Bytes) -> Result<Message, QueueError> {
    if data.len() < MESSAGE_HEADER_LEN {
        return Err(QueueError::Protocol(format!(
            "message frame of {} bytes is shorter than its header",
            data.len()
        )));
    }

    let timestamp = data.get_i64();
    let attempts = data.get_u16();
    let mut id = [0u8; 16];
    data.copy_to_slice(&mut id);

    Ok(Message {
        id: MessageId(id),
        attempts,
        timestamp,
        body: data,
    })
}

impl Encoder<Command> for NsqCodec {
    type Error = QueueError;

    fn encode(&mut self, command: Command, dst: &mut BytesMut) -> Result<(), QueueError> {
        match command {
            Command::Identify(body) => {
                dst.put_slice(b"IDENTIFY\n");
                put_body(dst, &body)?;
            }
            Command::Auth(secret) => {
                dst.put_slice(b"AUTH\n");
                put_body(dst, &secret)?;
            }
            Command::Sub { topic, channel } => {
                dst.put_slice(format!("SUB {topic} {channel}\n").as_bytes());
            }
            Command::Rdy(count) => {
                dst.put_slice(format!("RDY {count}\n").as_bytes());
            }
            Command::Fin(id) => {
                dst.put_slice(b"FIN ");
                dst.put_slice(&id.0);
                dst.put_u8(b'\n');
            }
            Command::Req { id, delay } => {
                dst.put_slice(b"REQ ");
                dst.put_slice(&id.0);
                dst.put_slice(format!(" {}\n", delay.as_millis()).as_bytes());
            }
            Command::Touch(id) => {
                dst.put_slice(b"TOUCH ");
                dst.put_slice(&id.0);
                dst.put_u8(b'\n');
            }
            Command::Nop => dst.put_slice(b"NOP\n"),
            Command::Pub { topic, body } => {
                dst.put_slice(format!("PUB {topic}\n").as_bytes());
                put_body(dst, &body)?;
            }
            Command::Cls => dst.put_slice(b"CLS\n"),
        }
        Ok(())
    }
}

fn put_body(dst: &mut BytesMut, body: &[u8]) -> Result<(), QueueError> {
    let len = u32::try_from(body.len())
        .map_err(|_| QueueError::Protocol(format!("body of {} bytes too large", body.len())))?;
    dst.reserve(4 + body.len());
    dst.put_u32(len);
    dst.put_slice(body);
    Ok(())
}

/// Check a topic or channel name against the broker's naming rules
///
/// Names are 1 to 64 characters of `[.a-zA-Z0-9_-]`, optionally suffixed
/// with `#ephemeral`.
pub fn is_valid_name(name: &str) -> bool {
    let base = name.strip_suffix("#ephemeral").unwrap_or(name);
    !name.is_empty()
        && name.len() <= 64
        && !base.is_empty()
        && base
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
}
