use std::{sync::Arc, time::Duration};

use crate::{frame::FrameView, state::CloseState};

use super::Shared;

/// Enqueues an empty ping every `interval` until the connection leaves `Open` or the pinger
/// token is cancelled. Cancellation interrupts the sleep.
pub(super) async fn run(shared: Arc<Shared>, interval: Duration) {
    #[cfg(feature = "logging")]
    log::debug!("pinger started, interval {interval:?}");

    loop {
        tokio::select! {
            biased;
            _ = shared.pinger.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        if shared.state.current() != CloseState::Open {
            break;
        }

        #[cfg(feature = "logging")]
        log::trace!("enqueue keepalive ping");

        shared.write_queue.push(FrameView::ping(""));
    }

    #[cfg(feature = "logging")]
    log::debug!("pinger stopped");
}
