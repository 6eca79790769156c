use std::sync::Arc;

use futures::StreamExt;

use crate::{frame::FrameView, OpCode, WebSocketError};

use super::Shared;

/// Why the receive loop stopped.
enum Exit {
    /// The peer's close frame arrived. The read half stays in place for the close drain.
    CloseFrame,
    /// The peer violated the framing protocol.
    Malformed(WebSocketError),
    /// EOF, a read error or a teardown from elsewhere.
    Abrupt,
}

/// Reads frames until the peer's close frame arrives or the connection breaks.
pub(super) async fn run(shared: Arc<Shared>) {
    #[cfg(feature = "logging")]
    log::debug!("receiver started");

    let mut guard = shared.reader.lock().await;
    let exit = match guard.as_mut() {
        Some(reader) => receive(&shared, reader).await,
        None => Exit::Abrupt,
    };

    match exit {
        Exit::CloseFrame => drop(guard),
        Exit::Malformed(err) => {
            // nothing may be written once the error is observable
            shared
                .write_queue
                .close(WebSocketError::SocketAlreadyClosed);
            shared
                .read_queue
                .push_error(WebSocketError::InvalidDataReceived(Box::new(err)));

            guard.take();
            drop(guard);
            shared.finalize();
        }
        Exit::Abrupt => {
            guard.take();
            drop(guard);
            shared.finalize();
        }
    }

    #[cfg(feature = "logging")]
    log::debug!("receiver stopped");
}

async fn receive(shared: &Shared, reader: &mut super::Reader) -> Exit {
    loop {
        let item = tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => return Exit::Abrupt,
            item = reader.next() => item,
        };

        let frame = match item {
            Some(Ok(frame)) => frame,
            Some(Err(WebSocketError::IoError(_err))) => {
                #[cfg(feature = "logging")]
                log::debug!("read failed: {_err}");
                return Exit::Abrupt;
            }
            Some(Err(err)) => {
                #[cfg(feature = "logging")]
                log::warn!("malformed data received: {err}");
                return Exit::Malformed(err);
            }
            None => {
                #[cfg(feature = "logging")]
                log::debug!("peer closed the connection");
                return Exit::Abrupt;
            }
        };

        match frame.opcode {
            OpCode::Text | OpCode::Binary => shared.read_queue.push(frame),
            OpCode::Ping => shared.write_queue.push(FrameView::pong(frame.payload)),
            OpCode::Pong => {}
            OpCode::Close => {
                on_close_frame(shared, &frame);
                return Exit::CloseFrame;
            }
            // reassembled by the codec, never handed out
            OpCode::Continuation => {
                return Exit::Malformed(WebSocketError::InvalidContinuationFrame)
            }
        }
    }
}

fn on_close_frame(shared: &Shared, frame: &FrameView) {
    let code = frame.close_code();
    let reason = frame.close_reason().map(str::to_owned);

    #[cfg(feature = "logging")]
    log::debug!("close frame received, code {code:?}, reason {reason:?}");

    let _ = shared.peer_close.set((code, reason));
    shared.state.close_frame_received();
    shared
        .read_queue
        .close(WebSocketError::SocketAlreadyClosed);
    shared.pinger.cancel();

    // 1005 and friends never go on the wire
    let echo = match code {
        Some(code) if code.is_allowed() => FrameView::close(code, b""),
        _ => FrameView::close_raw(""),
    };
    shared.write_queue.push(echo);
}
