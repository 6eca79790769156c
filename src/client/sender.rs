use std::sync::Arc;

use futures::{SinkExt, StreamExt};

use crate::{state::CloseState, write_queue::Outgoing, OpCode, WebSocketError};

use super::{Shared, Writer};

/// Writes queued frames in order until a close frame was sent or the connection broke.
///
/// The write half is owned here; nothing else writes to the socket.
pub(super) async fn run(shared: Arc<Shared>, mut writer: Writer) {
    #[cfg(feature = "logging")]
    log::debug!("sender started");

    while let Some(Outgoing { frame, reply }) = shared.write_queue.pop().await {
        let opcode = frame.opcode;

        let written = tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => Err(WebSocketError::SocketAlreadyClosed),
            res = writer.send(frame) => res,
        };

        if let Err(err) = written {
            #[cfg(feature = "logging")]
            log::debug!("write of {opcode:?} frame failed: {err}");

            shared.write_queue.post_result(reply, Err(err));
            shared.finalize();
            break;
        }

        // pings and pongs carry no reply
        shared.write_queue.post_result(reply, Ok(()));

        if opcode == OpCode::Close {
            close_sequence(&shared, writer).await;
            break;
        }
    }

    #[cfg(feature = "logging")]
    log::debug!("sender stopped");
}

/// Runs once, right after our close frame went out.
async fn close_sequence(shared: &Shared, mut writer: Writer) {
    shared.pinger.cancel();

    // half-close for writing
    let _ = writer.close().await;
    drop(writer);

    shared
        .write_queue
        .close(WebSocketError::SocketAlreadyClosed);

    let timeout = shared.close_timeout();
    match tokio::time::timeout(timeout, shared.state.left_open()).await {
        Ok(CloseState::CloseFrameReceived) => {
            #[cfg(feature = "logging")]
            log::debug!("close handshake completed, draining");

            let _ = tokio::time::timeout(timeout, drain(shared)).await;
            shared.finalize();
        }
        Ok(CloseState::Closed) => {}
        Ok(CloseState::Open) | Err(_) => {
            #[cfg(feature = "logging")]
            log::warn!("no close frame from peer within {timeout:?}, closing the socket");

            shared.finalize();
        }
    }
}

/// Discards inbound bytes until the peer closes its side.
async fn drain(shared: &Shared) {
    let mut guard = shared.reader.lock().await;
    if let Some(reader) = guard.as_mut() {
        loop {
            tokio::select! {
                biased;
                _ = shared.shutdown.cancelled() => break,
                item = reader.next() => match item {
                    Some(Ok(_)) => {}
                    Some(Err(_)) | None => break,
                },
            }
        }
    }
    guard.take();
}
