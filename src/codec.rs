//! Wire codec: turns inbound bytes into complete messages and outgoing [`FrameView`]s into bytes.
//!
//! [`Codec`] is a [`tokio_util::codec`] decoder/encoder pair. Decoding is incremental: feed
//! whatever the socket returned into a `BytesMut` and call `decode` until it returns
//! `Ok(None)` ("need more bytes"). An `Err` means the stream is malformed and cannot be
//! resynchronized.
use bytes::{Buf, BytesMut};
use tokio_util::codec;

use crate::{
    frame::{self, Frame, FrameView, MAX_HEAD_SIZE},
    OpCode, WebSocketError,
};

/// The maximum allowed payload size for reading, set to 1 MiB.
///
/// Frames (and reassembled messages) larger than this are rejected.
pub const MAX_PAYLOAD_READ: usize = 1024 * 1024;

/// Which end of the connection the codec serves. Clients mask what they send and
/// expect unmasked frames; servers the opposite.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
        }
    }
}

/// Represents the reading state of a WebSocket frame.
enum ReadState {
    /// The first two bytes were parsed; waiting for the extended length and mask.
    Header(Header),
    /// The header is complete; waiting for the payload.
    Payload(HeaderAndMask),
}

struct Header {
    fin: bool,
    masked: bool,
    opcode: OpCode,
    /// Bytes of extended payload length (0, 2 or 8).
    extra: usize,
    length_code: u8,
    /// Bytes still to read before the payload.
    header_size: usize,
}

struct HeaderAndMask {
    header: Header,
    mask: Option<[u8; 4]>,
    payload_len: usize,
}

/// Decodes single wire frames, without reassembling fragments.
pub struct Decoder {
    state: Option<ReadState>,
    max_payload_size: usize,
}

impl Decoder {
    /// Creates a decoder rejecting payloads larger than `max_payload_size` bytes.
    pub fn new(max_payload_size: usize) -> Self {
        Self {
            state: None,
            max_payload_size,
        }
    }
}

impl codec::Decoder for Decoder {
    type Item = Frame;
    type Error = WebSocketError;

    /// Returns `Ok(Some(frame))` once a whole frame is buffered, `Ok(None)` when more bytes
    /// are needed, and an error on a protocol violation. Partial progress is kept between calls.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state.take() {
                None => {
                    if src.remaining() < 2 {
                        return Ok(None);
                    }

                    let fin = src[0] & 0b1000_0000 != 0;
                    // no extension is ever negotiated, so every RSV bit must be clear
                    if src[0] & 0b0111_0000 != 0 {
                        return Err(WebSocketError::ReservedBitsNotZero);
                    }

                    let opcode = frame::OpCode::try_from(src[0] & 0b0000_1111)?;
                    let masked = src[1] & 0b1000_0000 != 0;
                    let length_code = src[1] & 0x7F;

                    let extra = match length_code {
                        126 => 2,
                        127 => 8,
                        _ => 0,
                    };
                    let header_size = extra + masked as usize * 4;
                    src.advance(2);

                    self.state = Some(ReadState::Header(Header {
                        fin,
                        masked,
                        opcode,
                        extra,
                        length_code,
                        header_size,
                    }));
                }
                Some(ReadState::Header(header)) => {
                    if src.remaining() < header.header_size {
                        self.state = Some(ReadState::Header(header));
                        return Ok(None);
                    }

                    let payload_len = match header.extra {
                        0 => usize::from(header.length_code),
                        2 => src.get_u16() as usize,
                        _ => usize::try_from(src.get_u64())
                            .map_err(|_| WebSocketError::FrameTooLarge)?,
                    };

                    let mask = header.masked.then(|| src.get_u32().to_be_bytes());

                    if header.opcode.is_control() && !header.fin {
                        return Err(WebSocketError::ControlFrameFragmented);
                    }
                    if header.opcode == OpCode::Ping && payload_len > 125 {
                        return Err(WebSocketError::PingFrameTooLarge);
                    }
                    if payload_len > self.max_payload_size {
                        return Err(WebSocketError::FrameTooLarge);
                    }

                    self.state = Some(ReadState::Payload(HeaderAndMask {
                        header,
                        mask,
                        payload_len,
                    }));
                }
                Some(ReadState::Payload(header_and_mask)) => {
                    if src.remaining() < header_and_mask.payload_len {
                        src.reserve(header_and_mask.payload_len - src.remaining());
                        self.state = Some(ReadState::Payload(header_and_mask));
                        return Ok(None);
                    }

                    let HeaderAndMask {
                        header,
                        mask,
                        payload_len,
                    } = header_and_mask;

                    let payload = src.split_to(payload_len);
                    break Ok(Some(Frame::new(header.fin, header.opcode, mask, payload)));
                }
            }
        }
    }
}

/// Serializes frames, masking them when acting as a client.
pub struct Encoder {
    role: Role,
}

impl Encoder {
    pub fn new(role: Role) -> Self {
        Self { role }
    }
}

impl codec::Encoder<FrameView> for Encoder {
    type Error = WebSocketError;

    fn encode(&mut self, view: FrameView, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut frame = Frame::from(view);
        if self.role == Role::Client {
            frame.mask();
        }

        let mut header = [0; MAX_HEAD_SIZE];
        let size = frame.fmt_head(&mut header[..]);

        dst.reserve(size + frame.payload.len());
        dst.extend_from_slice(&header[..size]);
        dst.extend_from_slice(&frame.payload);

        Ok(())
    }
}

/// Tracks a fragmented data message until its final frame arrives.
struct Fragment {
    opcode: OpCode,
    accumulated: BytesMut,
}

/// Message level codec: decodes frames, checks masking for the role, reassembles fragmented
/// text/binary messages and validates UTF-8 of text messages and close reasons.
///
/// Control frames interleaved within a fragmented message are returned as they arrive.
pub struct Codec {
    role: Role,
    decoder: Decoder,
    encoder: Encoder,
    fragment: Option<Fragment>,
    max_payload_size: usize,
}

impl Codec {
    pub fn new(role: Role, max_payload_size: usize) -> Self {
        Self {
            role,
            decoder: Decoder::new(max_payload_size),
            encoder: Encoder::new(role),
            fragment: None,
            max_payload_size,
        }
    }

    fn on_frame(&mut self, mut frame: Frame) -> Result<Option<FrameView>, WebSocketError> {
        match (self.role, frame.is_masked()) {
            (Role::Client, true) | (Role::Server, false) => {
                return Err(WebSocketError::MaskedFrame)
            }
            _ => frame.unmask(),
        }

        match frame.opcode {
            OpCode::Text | OpCode::Binary => {
                if self.fragment.is_some() {
                    return Err(WebSocketError::InvalidFragment);
                }

                if frame.fin {
                    return complete(frame.opcode, frame.payload).map(Some);
                }

                self.fragment = Some(Fragment {
                    opcode: frame.opcode,
                    accumulated: frame.payload,
                });
                Ok(None)
            }
            OpCode::Continuation => {
                let fragment = self
                    .fragment
                    .as_mut()
                    .ok_or(WebSocketError::InvalidContinuationFrame)?;

                fragment.accumulated.extend_from_slice(&frame.payload);
                if fragment.accumulated.len() > self.max_payload_size {
                    return Err(WebSocketError::FrameTooLarge);
                }

                if !frame.fin {
                    return Ok(None);
                }

                let Fragment {
                    opcode,
                    accumulated,
                } = self.fragment.take().ok_or(WebSocketError::InvalidFragment)?;
                complete(opcode, accumulated).map(Some)
            }
            OpCode::Close => {
                match frame.payload.len() {
                    0 => {}
                    1 => return Err(WebSocketError::InvalidCloseFrame),
                    _ => {
                        if !is_utf8(&frame.payload[2..]) {
                            return Err(WebSocketError::InvalidUTF8);
                        }
                    }
                }
                Ok(Some(FrameView::close_raw(frame.payload.freeze())))
            }
            OpCode::Ping | OpCode::Pong => {
                Ok(Some(FrameView::from((frame.opcode, frame.payload.freeze()))))
            }
        }
    }
}

fn complete(opcode: OpCode, payload: BytesMut) -> Result<FrameView, WebSocketError> {
    if opcode == OpCode::Text && !is_utf8(&payload) {
        return Err(WebSocketError::InvalidUTF8);
    }
    Ok(FrameView::from((opcode, payload.freeze())))
}

#[inline]
fn is_utf8(data: &[u8]) -> bool {
    #[cfg(feature = "simd")]
    return simdutf8::basic::from_utf8(data).is_ok();
    #[cfg(not(feature = "simd"))]
    return std::str::from_utf8(data).is_ok();
}

impl codec::Decoder for Codec {
    type Item = FrameView;
    type Error = WebSocketError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        while let Some(frame) = self.decoder.decode(src)? {
            if let Some(view) = self.on_frame(frame)? {
                return Ok(Some(view));
            }
        }
        Ok(None)
    }
}

impl codec::Encoder<FrameView> for Codec {
    type Error = WebSocketError;

    #[inline]
    fn encode(&mut self, item: FrameView, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.encoder.encode(item, dst)
    }
}
