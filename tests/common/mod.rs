//! In-process WebSocket test servers built on the crate's server-role codec.
#![allow(dead_code)]

use std::{future::Future, sync::Arc, thread};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use seqws::{
    codec::{Codec, Role, MAX_PAYLOAD_READ},
    handshake, CloseCode, FrameView, OpCode,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};
use tokio_util::codec::Framed;
use url::Url;

pub fn init_logger() {
    let _ = simple_logger::init_with_level(log::Level::Debug);
}

/// Accepts connections on an ephemeral port and runs `handler` for each one, on a runtime
/// living in its own thread. No handshake is performed.
pub fn serve_raw<F, Fut>(handler: F) -> Url
where
    F: Fn(TcpStream) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    listener.set_nonblocking(true).expect("nonblocking");
    let addr = listener.local_addr().expect("local addr");

    thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .expect("runtime");

        rt.block_on(async move {
            let listener = TcpListener::from_std(listener).expect("listener");
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(handler(stream));
            }
        });
    });

    format!("ws://{addr}/").parse().expect("url")
}

/// Like [`serve_raw`], but completes the opening handshake before calling `handler`.
pub fn serve<F, Fut>(handler: F) -> Url
where
    F: Fn(Peer) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let handler = Arc::new(handler);
    serve_raw(move |stream| {
        let handler = Arc::clone(&handler);
        async move {
            if let Some(peer) = Peer::accept(stream).await {
                handler(peer).await;
            }
        }
    })
}

/// Echoes every data message back with `prefix` prepended.
pub fn echo_server(prefix: &'static str) -> Url {
    serve(move |mut peer| async move {
        while let Some(event) = peer.next_event().await {
            match event {
                Event::Text(text) => peer.send(FrameView::text(format!("{prefix}{text}"))).await,
                Event::Binary(data) => {
                    let mut reply = prefix.as_bytes().to_vec();
                    reply.extend_from_slice(&data);
                    peer.send(FrameView::binary(reply)).await
                }
                Event::Close(..) => break,
                Event::Ping => {}
            }
        }
    })
}

/// The client's upgrade request.
#[derive(Debug, Clone)]
pub struct Request {
    pub target: String,
    pub headers: Vec<(String, String)>,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Reads the request head byte by byte, leaving anything after it in the socket.
pub async fn read_request(stream: &mut TcpStream) -> Option<Request> {
    let mut buf = Vec::new();
    while !buf.ends_with(b"\r\n\r\n") {
        buf.push(stream.read_u8().await.ok()?);
    }

    let text = String::from_utf8(buf).ok()?;
    let mut lines = text.split("\r\n");
    let target = lines.next()?.split(' ').nth(1)?.to_string();
    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .collect();

    Some(Request { target, headers })
}

/// The `101 Switching Protocols` answer to `request`.
pub fn accept_response(request: &Request) -> String {
    let key = request.header("Sec-WebSocket-Key").unwrap_or_default();
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        handshake::generate_accept_key(key)
    )
}

/// A server frame in wire format, unmasked.
pub fn encode(frame: FrameView) -> Vec<u8> {
    use tokio_util::codec::Encoder;

    let mut buf = bytes::BytesMut::new();
    Codec::new(Role::Server, MAX_PAYLOAD_READ)
        .encode(frame, &mut buf)
        .expect("encode");
    buf.to_vec()
}

/// What the client did, as seen by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Text(String),
    Binary(Bytes),
    Ping,
    /// The client's close frame. It was already echoed.
    Close(Option<u16>, Option<String>),
}

/// Server side of an upgraded connection.
pub struct Peer {
    pub request: Request,
    framed: Framed<TcpStream, Codec>,
}

impl Peer {
    pub async fn accept(mut stream: TcpStream) -> Option<Self> {
        let request = read_request(&mut stream).await?;
        stream
            .write_all(accept_response(&request).as_bytes())
            .await
            .ok()?;

        Some(Self {
            request,
            framed: Framed::new(stream, Codec::new(Role::Server, MAX_PAYLOAD_READ)),
        })
    }

    /// Next frame from the client, `None` on EOF or error.
    pub async fn recv(&mut self) -> Option<FrameView> {
        self.framed.next().await?.ok()
    }

    /// Next client action. Pings are answered and close frames echoed before they are
    /// reported. `None` once the connection is gone.
    pub async fn next_event(&mut self) -> Option<Event> {
        loop {
            let frame = self.recv().await?;
            match frame.opcode {
                OpCode::Text => {
                    let text = String::from_utf8(frame.payload.to_vec()).ok()?;
                    return Some(Event::Text(text));
                }
                OpCode::Binary => return Some(Event::Binary(frame.payload)),
                OpCode::Ping => {
                    self.send(FrameView::pong(frame.payload)).await;
                    return Some(Event::Ping);
                }
                OpCode::Close => {
                    let code = frame.close_code().map(u16::from);
                    let reason = frame.close_reason().map(str::to_owned);
                    self.send(frame).await;
                    return Some(Event::Close(code, reason));
                }
                OpCode::Pong | OpCode::Continuation => {}
            }
        }
    }

    pub async fn send(&mut self, frame: FrameView) {
        let _ = self.framed.send(frame).await;
    }

    /// Starts a server side close and waits for the client's echo.
    pub async fn close(&mut self, code: u16, reason: &str) -> Option<FrameView> {
        self.send(FrameView::close(CloseCode::from(code), reason))
            .await;
        loop {
            let frame = self.recv().await?;
            if frame.opcode == OpCode::Close {
                return Some(frame);
            }
        }
    }

    /// Writes bytes to the socket bypassing the codec.
    pub async fn write_raw(&mut self, bytes: &[u8]) {
        let stream = self.framed.get_mut();
        let _ = stream.write_all(bytes).await;
        let _ = stream.flush().await;
    }

    pub fn into_stream(self) -> TcpStream {
        self.framed.into_inner()
    }
}
