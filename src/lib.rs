//! # seqws
//! A sequential WebSocket client (RFC 6455) with a blocking, call/return interface.
//!
//! [`WebSocket::send`], [`WebSocket::recv`] and [`WebSocket::close`] block the calling thread
//! while three background tasks do the actual protocol work on a runtime owned by the connection:
//!
//! - the **sender** drains the outgoing queue, writes frames to the socket and reports back
//!   to the caller waiting on each frame,
//! - the **receiver** decodes inbound frames, answers pings and reacts to the peer's close frame,
//! - the optional **pinger** enqueues keepalive pings at a fixed interval.
//!
//! The close handshake is driven entirely in the background. Whichever side starts it, and
//! even when the network fails first, the connection always ends in a single terminal state
//! after which every `send`/`recv` fails with [`WebSocketError::SocketAlreadyClosed`].
//!
//! Only the plaintext `ws://` scheme is supported.
//!
//! # Features
//! - `logging`: Enables debug logging for the handshake, the background tasks and the close
//!   sequence using the `log` crate.
//! - `simd`: Validates inbound text messages with `simdutf8`.
//!
//! # Example
//! ```no_run
//! use seqws::{Message, Options, WebSocket};
//!
//! fn main() -> seqws::Result<()> {
//!     let ws = WebSocket::connect_with_options(
//!         "ws://localhost:8080/chat".parse()?,
//!         Options::default().with_header("Cookie", "name=value"),
//!     )?;
//!
//!     ws.send("hello")?;
//!     match ws.recv()? {
//!         Message::Text(text) => println!("{text}"),
//!         Message::Binary(data) => println!("{} bytes", data.len()),
//!     }
//!
//!     ws.close();
//!     Ok(())
//! }
//! ```
//!
//! Or let the connection close itself on every exit path:
//! ```no_run
//! use seqws::{Options, WebSocket};
//!
//! fn main() -> seqws::Result<()> {
//!     WebSocket::scoped("ws://localhost:8080".parse()?, Options::default(), |ws| {
//!         ws.send("message")?;
//!         println!("{:?}", ws.recv()?);
//!         Ok(())
//!     })
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

mod client;
mod read_queue;
mod state;
mod write_queue;

pub mod close;
pub mod codec;
pub mod frame;
pub mod handshake;
mod mask;

use std::{io, sync::Arc};

use thiserror::Error;

pub use client::*;
pub use close::CloseCode;
pub use frame::{FrameView, OpCode};
pub use handshake::HandshakeError;
pub use state::CloseState;

/// A result type for WebSocket operations, using `WebSocketError` as the error type.
pub type Result<T> = std::result::Result<T, WebSocketError>;

/// Represents errors that can occur during WebSocket operations.
///
/// The errors fall into four groups:
///
/// - Configuration errors (bad URL scheme, text data that isn't UTF-8, zero ping interval).
///   These are returned synchronously from the call that caused them.
/// - [`WebSocketError::HandshakeFailed`], only ever returned while connecting.
/// - [`WebSocketError::SocketAlreadyClosed`], returned by `send`/`recv` once the connection
///   reached (or is reaching) its closed state, whether gracefully or not.
/// - [`WebSocketError::InvalidDataReceived`], returned once by `recv` when the peer violated
///   the framing protocol. The wrapped error names the violation.
///
/// The protocol violation variants are produced by the [`codec`] and are only observed by
/// applications wrapped inside `InvalidDataReceived`.
///
/// The type is `Clone` so a single terminal error can be handed to every waiter of a queue.
#[derive(Error, Debug, Clone)]
pub enum WebSocketError {
    /// Returned when attempting to connect with a URL whose scheme is not `ws`.
    #[error("Invalid http scheme")]
    InvalidHttpScheme,

    /// The URL has no host to connect to.
    #[error("URL has no host")]
    MissingHost,

    /// Wraps errors from URL parsing that may occur when processing WebSocket URLs.
    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    /// Indicates that text data is not valid UTF-8. Returned by text sends, and by the codec
    /// for inbound text messages and close reasons.
    #[error("Invalid UTF-8")]
    InvalidUTF8,

    /// The keepalive interval must be greater than zero.
    #[error("Ping interval must be a positive duration")]
    InvalidPingInterval,

    /// The opening handshake did not complete.
    #[error("Handshake failed: {0}")]
    HandshakeFailed(HandshakeError),

    /// Returned when sending or receiving on a connection that is closed or closing.
    #[error("Socket already closed")]
    SocketAlreadyClosed,

    /// The peer sent bytes that violate the frame format. The connection is torn down
    /// right after this error is queued.
    #[error("Invalid data received: {0}")]
    InvalidDataReceived(Box<WebSocketError>),

    /// Reserved bits in the frame header are set.
    #[error("Reserved bits are not zero")]
    ReservedBitsNotZero,

    /// A frame carries an opcode RFC 6455 doesn't define.
    #[error("Invalid opcode (byte={0})")]
    InvalidOpCode(u8),

    /// A ping, pong or close frame arrived with the FIN bit unset.
    #[error("Control frame must not be fragmented")]
    ControlFrameFragmented,

    /// A ping frame exceeds 125 bytes.
    #[error("Ping frame too large")]
    PingFrameTooLarge,

    /// A frame or reassembled message exceeds the configured maximum payload.
    #[error("Frame too large")]
    FrameTooLarge,

    /// A new data frame started before the previous fragmented message finished.
    #[error("Invalid fragment")]
    InvalidFragment,

    /// A continuation frame arrived without a message to continue.
    #[error("Invalid continuation frame")]
    InvalidContinuationFrame,

    /// A close frame with a one byte payload.
    #[error("Invalid close frame")]
    InvalidCloseFrame,

    /// A frame arrived masked from a server, or unmasked from a client.
    #[error("Unexpected frame masking")]
    MaskedFrame,

    /// Wraps standard I/O errors, such as connection resets, that occur while writing.
    #[error("I/O error: {0}")]
    IoError(Arc<io::Error>),
}

impl From<io::Error> for WebSocketError {
    fn from(err: io::Error) -> Self {
        WebSocketError::IoError(Arc::new(err))
    }
}

impl From<HandshakeError> for WebSocketError {
    fn from(err: HandshakeError) -> Self {
        WebSocketError::HandshakeFailed(err)
    }
}
