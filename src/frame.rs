//! # Frame
//!
//! WebSocket frames as defined in [RFC 6455 Section 5.2](https://datatracker.ietf.org/doc/html/rfc6455#section-5.2).
//!
//! Two representations are used across the crate:
//!
//! - [`Frame`]: a wire frame, with the FIN bit and the optional masking key. This is what the
//!   [`codec`](crate::codec) reads and writes.
//! - [`FrameView`]: an opcode plus a complete payload. This is what flows through the
//!   connection's queues: outgoing frames waiting for the sender, and inbound messages
//!   waiting for `recv`. Fragmented inbound messages are already reassembled at this level.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |         (16 or 64 bits)       |
//! |N|V|V|V|       |S|             |                               |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |        Extended payload length continued, if payload len == 127|
//! +---------------------------------------------------------------+
//! |                               |   Masking-key, if MASK set to 1|
//! +-------------------------------+-------------------------------+
//! |     Masking-key (continued)       |          Payload Data      |
//! +-----------------------------------+ - - - - - - - - - - - - - -+
//! ```
//!
//! ```rust
//! use seqws::{frame::FrameView, CloseCode};
//!
//! let text = FrameView::text("Hello, WebSocket!");
//! let ping = FrameView::ping("");
//! let close = FrameView::close(CloseCode::Normal, "bye");
//! assert_eq!(close.close_code(), Some(CloseCode::Normal));
//! ```
use bytes::{Bytes, BytesMut};

use crate::{close::CloseCode, WebSocketError};

/// Frame type, from the low 4 bits of the first header byte.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    /// Returns `true` for ping, pong and close.
    pub fn is_control(&self) -> bool {
        matches!(*self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

impl TryFrom<u8> for OpCode {
    type Error = WebSocketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            _ => Err(WebSocketError::InvalidOpCode(value)),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(val: OpCode) -> Self {
        match val {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }
}

/// An unfragmented frame: opcode and complete payload.
///
/// Immutable once built. Close frames keep their status code and reason encoded in the
/// payload; use [`FrameView::close_code`] and [`FrameView::close_reason`] to read them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameView {
    pub opcode: OpCode,
    pub payload: Bytes,
}

impl FrameView {
    /// Creates a text frame. The payload is expected to be valid UTF-8; the codec doesn't
    /// check outbound text.
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self {
            opcode: OpCode::Text,
            payload: payload.into(),
        }
    }

    /// Creates a binary frame.
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self {
            opcode: OpCode::Binary,
            payload: payload.into(),
        }
    }

    /// Creates a ping frame. Control payloads must not exceed 125 bytes.
    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self {
            opcode: OpCode::Ping,
            payload: payload.into(),
        }
    }

    /// Creates a pong frame, usually echoing a ping's payload.
    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self {
            opcode: OpCode::Pong,
            payload: payload.into(),
        }
    }

    /// Builds a close frame carrying `code` followed by `reason`.
    pub fn close(code: CloseCode, reason: impl AsRef<[u8]>) -> Self {
        let reason = reason.as_ref();
        let mut payload = BytesMut::with_capacity(2 + reason.len());
        payload.extend_from_slice(&u16::from(code).to_be_bytes());
        payload.extend_from_slice(reason);

        Self {
            opcode: OpCode::Close,
            payload: payload.freeze(),
        }
    }

    /// Builds a close frame from an already encoded payload (possibly empty).
    pub fn close_raw(payload: impl Into<Bytes>) -> Self {
        Self {
            opcode: OpCode::Close,
            payload: payload.into(),
        }
    }

    /// Status code of a close frame, `None` if the payload doesn't carry one.
    pub fn close_code(&self) -> Option<CloseCode> {
        let code = self.payload.get(0..2)?;
        Some(CloseCode::from(u16::from_be_bytes([code[0], code[1]])))
    }

    /// Reason of a close frame, `None` if there is no reason text or it isn't valid UTF-8.
    pub fn close_reason(&self) -> Option<&str> {
        match self.payload.get(2..) {
            Some(reason) if !reason.is_empty() => std::str::from_utf8(reason).ok(),
            _ => None,
        }
    }
}

impl From<(OpCode, Bytes)> for FrameView {
    fn from((opcode, payload): (OpCode, Bytes)) -> Self {
        Self { opcode, payload }
    }
}

/// A frame as it appears on the wire.
#[derive(Debug)]
pub struct Frame {
    pub fin: bool,
    pub opcode: OpCode,
    mask: Option<[u8; 4]>,
    pub payload: BytesMut,
}

impl From<FrameView> for Frame {
    fn from(value: FrameView) -> Self {
        Frame::new(true, value.opcode, None, &value.payload[..])
    }
}

/// Largest possible header: 2 fixed bytes, 8 bytes of length, 4 bytes of mask.
pub(crate) const MAX_HEAD_SIZE: usize = 14;

impl Frame {
    pub fn new(
        fin: bool,
        opcode: OpCode,
        mask: Option<[u8; 4]>,
        payload: impl Into<BytesMut>,
    ) -> Self {
        Self {
            fin,
            opcode,
            mask,
            payload: payload.into(),
        }
    }

    #[inline(always)]
    pub fn is_masked(&self) -> bool {
        self.mask.is_some()
    }

    /// Masks the payload, drawing a random key if the frame doesn't have one yet.
    pub(crate) fn mask(&mut self) {
        let mask = *self.mask.get_or_insert_with(rand::random);
        crate::mask::apply_mask(&mut self.payload, mask);
    }

    /// Reverts the masking and forgets the key.
    pub(crate) fn unmask(&mut self) {
        if let Some(mask) = self.mask.take() {
            crate::mask::apply_mask(&mut self.payload, mask);
        }
    }

    /// Writes the header into `head` and returns its length.
    pub(crate) fn fmt_head(&self, head: &mut [u8]) -> usize {
        head[0] = (self.fin as u8) << 7 | u8::from(self.opcode);

        let len = self.payload.len();
        let size = if len < 126 {
            head[1] = len as u8;
            2
        } else if len <= u16::MAX as usize {
            head[1] = 126;
            head[2..4].copy_from_slice(&(len as u16).to_be_bytes());
            4
        } else {
            head[1] = 127;
            head[2..10].copy_from_slice(&(len as u64).to_be_bytes());
            10
        };

        match self.mask {
            Some(mask) => {
                head[1] |= 0x80;
                head[size..size + 4].copy_from_slice(&mask);
                size + 4
            }
            None => size,
        }
    }
}
