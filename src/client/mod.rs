//! The blocking client.
//!
//! A [`WebSocket`] owns a small tokio runtime on which three tasks run for the lifetime of the
//! connection:
//!
//! - `sender`: pops frames from the write queue, writes them and reports each outcome back
//!   to the waiting caller. After writing our close frame it drives the rest of the close
//!   handshake.
//! - `receiver`: decodes inbound frames into the read queue, answers pings and echoes the
//!   peer's close frame.
//! - `pinger`: enqueues keepalive pings, unless disabled.
//!
//! Application threads only ever touch the two queues and the close state, so any number of
//! threads may call [`WebSocket::send`] concurrently on one connection.
mod options;
mod pinger;
mod receiver;
mod sender;

use std::{
    sync::{Arc, Mutex, OnceLock},
    time::Duration,
};

use bytes::Bytes;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    runtime::{Handle, Runtime},
};
use tokio_util::{
    codec::{FramedRead, FramedWrite},
    sync::CancellationToken,
};
use url::Url;

use crate::{
    close::CloseCode,
    codec::{Codec, Role},
    frame::{FrameView, OpCode},
    handshake::{self, HandshakeError, Response, ResponseParser},
    read_queue::ReadQueue,
    state::{CloseSignal, CloseState},
    write_queue::WriteQueue,
    Result, WebSocketError,
};

pub use options::{CloseOptions, Options, Ping, DEFAULT_CLOSE_TIMEOUT, DEFAULT_PING_INTERVAL};

type Reader = FramedRead<OwnedReadHalf, Codec>;
type Writer = FramedWrite<OwnedWriteHalf, Codec>;

/// A complete message received from, or to be sent to, the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Bytes),
}

impl Message {
    /// Returns `true` for [`Message::Text`].
    pub fn is_text(&self) -> bool {
        matches!(self, Message::Text(_))
    }

    /// Returns `true` for [`Message::Binary`].
    pub fn is_binary(&self) -> bool {
        matches!(self, Message::Binary(_))
    }

    /// The payload, whatever the message type.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Message::Text(text) => text.as_bytes(),
            Message::Binary(data) => data,
        }
    }

    fn into_frame(self, ty: MessageType) -> Result<FrameView> {
        match (self, ty) {
            (Message::Text(text), MessageType::Guess | MessageType::Text) => {
                Ok(FrameView::text(text))
            }
            (Message::Binary(data), MessageType::Text) => {
                if std::str::from_utf8(&data).is_err() {
                    return Err(WebSocketError::InvalidUTF8);
                }
                Ok(FrameView::text(data))
            }
            (Message::Text(text), MessageType::Binary) => Ok(FrameView::binary(text)),
            (Message::Binary(data), MessageType::Guess | MessageType::Binary) => {
                Ok(FrameView::binary(data))
            }
        }
    }
}

impl TryFrom<FrameView> for Message {
    type Error = WebSocketError;

    fn try_from(frame: FrameView) -> Result<Self> {
        match frame.opcode {
            OpCode::Text => String::from_utf8(frame.payload.to_vec())
                .map(Message::Text)
                .map_err(|_| WebSocketError::InvalidUTF8),
            OpCode::Binary => Ok(Message::Binary(frame.payload)),
            opcode => Err(WebSocketError::InvalidOpCode(opcode.into())),
        }
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Message::Text(text.to_owned())
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Message::Text(text)
    }
}

impl From<Vec<u8>> for Message {
    fn from(data: Vec<u8>) -> Self {
        Message::Binary(data.into())
    }
}

impl From<&[u8]> for Message {
    fn from(data: &[u8]) -> Self {
        Message::Binary(Bytes::copy_from_slice(data))
    }
}

impl<const N: usize> From<&[u8; N]> for Message {
    fn from(data: &[u8; N]) -> Self {
        Message::Binary(Bytes::copy_from_slice(data))
    }
}

impl From<Bytes> for Message {
    fn from(data: Bytes) -> Self {
        Message::Binary(data)
    }
}

/// How [`WebSocket::send_as`] frames its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageType {
    /// Text for strings, binary for bytes.
    #[default]
    Guess,
    /// Always a text frame. Byte data must be valid UTF-8.
    Text,
    /// Always a binary frame.
    Binary,
}

/// State shared by the connection handle and its background tasks.
pub(crate) struct Shared {
    read_queue: ReadQueue,
    write_queue: WriteQueue,
    state: CloseSignal,
    /// Cancelled once the socket must be closed.
    shutdown: CancellationToken,
    /// Cancelled to stop the pinger. Child of `shutdown`.
    pinger: CancellationToken,
    /// Read half, used by the receiver and then by the close drain.
    reader: tokio::sync::Mutex<Option<Reader>>,
    close_timeout: Mutex<Duration>,
    /// Code and reason of the peer's close frame.
    peer_close: OnceLock<(Option<CloseCode>, Option<String>)>,
}

impl Shared {
    fn new(reader: Reader) -> Self {
        let shutdown = CancellationToken::new();
        let pinger = shutdown.child_token();
        Self {
            read_queue: ReadQueue::new(),
            write_queue: WriteQueue::new(),
            state: CloseSignal::new(),
            shutdown,
            pinger,
            reader: tokio::sync::Mutex::new(Some(reader)),
            close_timeout: Mutex::new(DEFAULT_CLOSE_TIMEOUT),
            peer_close: OnceLock::new(),
        }
    }

    fn close_timeout(&self) -> Duration {
        *self
            .close_timeout
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_close_timeout(&self, timeout: Duration) {
        *self
            .close_timeout
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = timeout;
    }

    /// Brings the connection to `Closed`. Idempotent, callable from any task or thread.
    ///
    /// Queues not yet terminated get `SocketAlreadyClosed`. The socket halves are dropped
    /// by whoever holds them once they observe the shutdown token.
    fn finalize(&self) {
        self.write_queue.close(WebSocketError::SocketAlreadyClosed);
        self.read_queue.close(WebSocketError::SocketAlreadyClosed);

        self.shutdown.cancel();
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }

        if self.state.closed() {
            #[cfg(feature = "logging")]
            log::debug!("connection closed");
        }

        self.pinger.cancel();
    }
}

/// A blocking WebSocket client connection.
///
/// All methods block the calling thread. They must not be called from within an async
/// runtime; use a dedicated thread (e.g. `tokio::task::spawn_blocking`) there.
///
/// Dropping the handle without calling [`WebSocket::close`] closes the socket without a
/// close handshake.
pub struct WebSocket {
    shared: Arc<Shared>,
    protocol_version: u8,
    handle: Handle,
    runtime: Option<Runtime>,
}

impl WebSocket {
    /// Connects to `url` with default [`Options`].
    pub fn connect(url: Url) -> Result<Self> {
        Self::connect_with_options(url, Options::default())
    }

    /// Connects to `url` and completes the opening handshake.
    ///
    /// On return the background tasks are running and the connection is ready to use.
    ///
    /// # Errors
    /// - [`WebSocketError::InvalidHttpScheme`] unless the scheme is `ws`.
    /// - [`WebSocketError::MissingHost`] if the URL has no host.
    /// - [`WebSocketError::InvalidPingInterval`] for a zero ping interval.
    /// - [`WebSocketError::IoError`] if the TCP connection can't be established.
    /// - [`WebSocketError::HandshakeFailed`] if the server doesn't accept the upgrade.
    pub fn connect_with_options(url: Url, options: Options) -> Result<Self> {
        if url.scheme() != "ws" {
            return Err(WebSocketError::InvalidHttpScheme);
        }
        let host = url.host().ok_or(WebSocketError::MissingHost)?.to_string();
        let port = url.port_or_known_default().unwrap_or(80);

        if let Ping::Interval(interval) = options.ping {
            if interval.is_zero() {
                return Err(WebSocketError::InvalidPingInterval);
            }
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("seqws-worker")
            .enable_all()
            .build()?;

        let (stream, response) = runtime.block_on(async {
            let mut stream = TcpStream::connect(format!("{host}:{port}")).await?;
            if options.no_delay {
                stream.set_nodelay(true)?;
            }
            let response = perform_handshake(&mut stream, &url, &options.headers).await?;
            Ok::<_, WebSocketError>((stream, response))
        })?;

        #[cfg(feature = "logging")]
        log::debug!(
            "connected to {url}, protocol version {}",
            response.version
        );

        let limit = options.payload_limit();
        let (read_half, write_half) = stream.into_split();
        let reader = FramedRead::new(read_half, Codec::new(Role::Client, limit));
        let writer = FramedWrite::new(write_half, Codec::new(Role::Client, limit));

        let shared = Arc::new(Shared::new(reader));
        runtime.spawn(receiver::run(Arc::clone(&shared)));
        runtime.spawn(sender::run(Arc::clone(&shared), writer));
        if let Ping::Interval(interval) = options.ping {
            runtime.spawn(pinger::run(Arc::clone(&shared), interval));
        }

        Ok(Self {
            shared,
            protocol_version: response.version,
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
        })
    }

    /// Connects, runs `body` with the connection and closes it afterwards, whether `body`
    /// returned successfully, failed or panicked.
    ///
    /// ```no_run
    /// use seqws::{Options, WebSocket};
    ///
    /// fn main() -> seqws::Result<()> {
    ///     let reply = WebSocket::scoped("ws://localhost:8080".parse()?, Options::default(), |ws| {
    ///         ws.send("ping")?;
    ///         ws.recv()
    ///     })?;
    ///     println!("{reply:?}");
    ///     Ok(())
    /// }
    /// ```
    pub fn scoped<T, E>(
        url: Url,
        options: Options,
        body: impl FnOnce(&WebSocket) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: From<WebSocketError>,
    {
        let ws = Self::connect_with_options(url, options)?;
        let guard = CloseOnDrop(&ws);
        body(guard.0)
    }

    /// Whether a message can be received without blocking.
    pub fn available(&self) -> bool {
        self.shared.read_queue.available()
    }

    /// Blocks until the next message arrives.
    ///
    /// # Errors
    /// - [`WebSocketError::InvalidDataReceived`] once, if the peer sent malformed data.
    ///   The connection is already being torn down at that point.
    /// - [`WebSocketError::SocketAlreadyClosed`] once the peer's close frame was received or
    ///   the connection is closed, and on every call after that.
    pub fn recv(&self) -> Result<Message> {
        let frame = self.handle.block_on(self.shared.read_queue.pop())?;
        Message::try_from(frame)
    }

    /// Sends a message as text if it's a string, as binary otherwise, and blocks until it
    /// was written to the socket.
    pub fn send(&self, data: impl Into<Message>) -> Result<()> {
        self.send_as(data, MessageType::Guess)
    }

    /// Sends `data` with an explicit frame type.
    ///
    /// # Errors
    /// - [`WebSocketError::InvalidUTF8`] when sending bytes that aren't UTF-8 as text.
    /// - [`WebSocketError::SocketAlreadyClosed`] if the connection is closing or closed.
    /// - [`WebSocketError::IoError`] if writing failed.
    pub fn send_as(&self, data: impl Into<Message>, ty: MessageType) -> Result<()> {
        let frame = data.into().into_frame(ty)?;
        self.handle.block_on(self.shared.write_queue.submit(frame))
    }

    /// Sends `data` as a text message. Bytes that aren't valid UTF-8 fail with
    /// [`WebSocketError::InvalidUTF8`] before anything is queued.
    pub fn send_text(&self, data: impl Into<Message>) -> Result<()> {
        self.send_as(data, MessageType::Text)
    }

    /// Sends `data` as a binary message, whatever its type.
    pub fn send_binary(&self, data: impl Into<Message>) -> Result<()> {
        self.send_as(data, MessageType::Binary)
    }

    /// Closes with code 1000 and waits up to 20 seconds for the peer's close frame.
    ///
    /// See [`WebSocket::close_with`].
    pub fn close(&self) {
        self.close_with(CloseOptions::default());
    }

    /// Starts the close handshake and, unless told otherwise, blocks until the connection is
    /// closed.
    ///
    /// If the peer doesn't answer within `options.timeout` the socket is closed anyway.
    /// Calling this on a connection that is already closing or closed only waits.
    ///
    /// Codes that may not appear on the wire (1005, 1006, 1015, ...) are replaced by a close
    /// frame without status; the reason is dropped with them.
    pub fn close_with(&self, options: CloseOptions) {
        #[cfg(feature = "logging")]
        log::debug!("closing with {:?}", options.code);

        self.shared.set_close_timeout(options.timeout);

        let frame = if options.code.is_allowed() {
            FrameView::close(options.code, options.reason.unwrap_or_default())
        } else {
            #[cfg(feature = "logging")]
            log::warn!("close code {:?} can't be sent, closing without status", options.code);
            FrameView::close_raw("")
        };
        // fails only when a close is already under way
        let _ = self.handle.block_on(self.shared.write_queue.submit(frame));

        if options.wait_for_response {
            self.handle.block_on(self.shared.state.wait_closed());
        }
    }

    /// Status code of the peer's close frame, once one was received.
    pub fn close_code(&self) -> Option<CloseCode> {
        self.shared.peer_close.get().and_then(|(code, _)| *code)
    }

    /// Reason of the peer's close frame, once one was received.
    pub fn close_reason(&self) -> Option<&str> {
        self.shared
            .peer_close
            .get()
            .and_then(|(_, reason)| reason.as_deref())
    }

    /// Protocol version negotiated during the handshake.
    pub fn protocol_version(&self) -> u8 {
        self.protocol_version
    }

    /// Where the connection stands in the close handshake.
    pub fn state(&self) -> CloseState {
        self.shared.state.current()
    }
}

impl Drop for WebSocket {
    fn drop(&mut self) {
        self.shared.finalize();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

struct CloseOnDrop<'a>(&'a WebSocket);

impl Drop for CloseOnDrop<'_> {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Writes the upgrade request and reads the response one byte at a time.
async fn perform_handshake(
    stream: &mut TcpStream,
    url: &Url,
    headers: &[(String, String)],
) -> std::result::Result<Response, HandshakeError> {
    let key = handshake::generate_key();
    let request = handshake::request(url, &key, headers);

    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|err| HandshakeError::Io(err.to_string()))?;

    let mut parser = ResponseParser::new(key);
    loop {
        let byte = match stream.read_u8().await {
            Ok(byte) => byte,
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(HandshakeError::ConnectionClosed)
            }
            Err(err) => return Err(HandshakeError::Io(err.to_string())),
        };

        if let Some(response) = parser.push(byte)? {
            return Ok(response);
        }
    }
}

#[cfg(test)]
impl Shared {
    /// Shared state over a loopback socket. Also returns the write half and the peer's end.
    async fn loopback() -> (Arc<Self>, Writer, TcpStream) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stream, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());

        let (read_half, write_half) = stream.unwrap().into_split();
        let limit = crate::codec::MAX_PAYLOAD_READ;
        let reader = FramedRead::new(read_half, Codec::new(Role::Client, limit));
        let writer = FramedWrite::new(write_half, Codec::new(Role::Client, limit));

        (Arc::new(Self::new(reader)), writer, accepted.unwrap().0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_conversions() {
        assert_eq!(Message::from("hi"), Message::Text("hi".into()));
        assert_eq!(Message::from(String::from("hi")), Message::Text("hi".into()));
        assert_eq!(
            Message::from(vec![1u8, 2]),
            Message::Binary(Bytes::from_static(&[1, 2]))
        );
        assert_eq!(Message::from(&b"ab"[..]), Message::Binary("ab".into()));
        assert_eq!(Message::from(b"ab"), Message::Binary("ab".into()));
        assert!(Message::from("").is_text());
        assert!(Message::from(Bytes::new()).is_binary());
    }

    #[test]
    fn test_into_frame() {
        let frame = Message::from("abc").into_frame(MessageType::Guess).unwrap();
        assert_eq!(frame, FrameView::text("abc"));

        let frame = Message::from("abc").into_frame(MessageType::Binary).unwrap();
        assert_eq!(frame, FrameView::binary("abc"));

        let frame = Message::from(b"abc").into_frame(MessageType::Text).unwrap();
        assert_eq!(frame, FrameView::text("abc"));

        assert!(matches!(
            Message::from(vec![0xff, 0xfe]).into_frame(MessageType::Text),
            Err(WebSocketError::InvalidUTF8)
        ));
    }

    #[test]
    fn test_message_from_frame() {
        assert_eq!(
            Message::try_from(FrameView::text("x")).unwrap(),
            Message::Text("x".into())
        );
        assert_eq!(
            Message::try_from(FrameView::binary(Bytes::new())).unwrap(),
            Message::Binary(Bytes::new())
        );
        assert!(Message::try_from(FrameView::ping("")).is_err());
    }

    #[test]
    fn test_connect_rejects_configuration() {
        let err = WebSocket::connect("wss://localhost:1".parse().unwrap()).err();
        assert!(matches!(err, Some(WebSocketError::InvalidHttpScheme)));

        let err = WebSocket::connect("http://localhost:1".parse().unwrap()).err();
        assert!(matches!(err, Some(WebSocketError::InvalidHttpScheme)));

        let err = WebSocket::connect_with_options(
            "ws://localhost:1".parse().unwrap(),
            Options::default().with_ping_interval(Duration::ZERO),
        )
        .err();
        assert!(matches!(err, Some(WebSocketError::InvalidPingInterval)));
    }
}
