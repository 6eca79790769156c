use tokio::sync::watch;

/// Progress of a connection through the close handshake.
///
/// Transitions only move forward: `Open → CloseFrameReceived → Closed`, or straight from
/// `Open` to `Closed` when the connection fails or the peer never answers our close frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CloseState {
    /// Frames flow in both directions.
    Open,
    /// The peer's close frame was received; no more inbound frames will be delivered.
    CloseFrameReceived,
    /// The socket is closed and both queues are terminated.
    Closed,
}

/// The connection's [`CloseState`], observable by any number of waiters.
///
/// Every transition wakes all waiters. Written by the sender and receiver tasks, awaited by
/// the sender's close sequence and by `close()` callers.
pub(crate) struct CloseSignal {
    tx: watch::Sender<CloseState>,
}

impl CloseSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(CloseState::Open);
        Self { tx }
    }

    pub fn current(&self) -> CloseState {
        *self.tx.borrow()
    }

    /// `Open → CloseFrameReceived`. Returns whether the transition happened.
    pub fn close_frame_received(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if *state == CloseState::Open {
                *state = CloseState::CloseFrameReceived;
                true
            } else {
                false
            }
        })
    }

    /// Moves to `Closed` from any state. Returns whether the state changed.
    pub fn closed(&self) -> bool {
        self.tx.send_if_modified(|state| {
            if *state != CloseState::Closed {
                *state = CloseState::Closed;
                true
            } else {
                false
            }
        })
    }

    /// Resolves once the state is no longer `Open`.
    pub async fn left_open(&self) -> CloseState {
        self.wait_for(|state| state != CloseState::Open).await
    }

    /// Resolves once the state is `Closed`.
    pub async fn wait_closed(&self) {
        self.wait_for(|state| state == CloseState::Closed).await;
    }

    async fn wait_for(&self, mut predicate: impl FnMut(CloseState) -> bool) -> CloseState {
        let mut rx = self.tx.subscribe();
        let state = match rx.wait_for(|state| predicate(*state)).await {
            Ok(state) => *state,
            // the sender lives as long as `self`
            Err(_) => self.current(),
        };
        state
    }
}
