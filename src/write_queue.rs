use std::{collections::VecDeque, pin::pin, sync::Mutex};

use tokio::sync::{oneshot, Notify};

use crate::{frame::FrameView, Result, WebSocketError};

/// A frame waiting for the sender, plus where to report its outcome.
///
/// Fire-and-forget frames (pings, pongs, echoed close frames) have no reply channel.
pub(crate) struct Outgoing {
    pub frame: FrameView,
    pub reply: Option<Reply>,
}

/// Sending side of a frame's completion handle.
pub(crate) struct Reply(oneshot::Sender<Result<()>>);

/// Receiving side of a frame's completion handle.
pub(crate) struct Completion(oneshot::Receiver<Result<()>>);

/// Outgoing frames waiting for the sender task.
///
/// Many producers (application threads, the pinger, the receiver) and one consumer (the
/// sender). Each submitted frame travels with a one-shot completion handle, so every
/// frame pushed before the queue is closed gets exactly one outcome: the result the sender
/// posted, or the terminal error if the queue closed first.
///
/// Once closed, pushes and posted results are silently dropped, pending frames are
/// discarded and [`WriteQueue::pop`] returns `None`.
pub(crate) struct WriteQueue {
    state: Mutex<WriteState>,
    pushed: Notify,
    closed: Notify,
}

#[derive(Default)]
struct WriteState {
    pending: VecDeque<Outgoing>,
    terminal: Option<WebSocketError>,
}

impl WriteQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(WriteState::default()),
            pushed: Notify::new(),
            closed: Notify::new(),
        }
    }

    /// Queues a frame nobody waits on. Dropped if the queue is closed.
    pub fn push(&self, frame: FrameView) {
        self.enqueue(Outgoing { frame, reply: None });
    }

    /// Queues a frame and returns the handle its outcome will be delivered to.
    pub fn push_with_completion(&self, frame: FrameView) -> Completion {
        let (tx, rx) = oneshot::channel();
        self.enqueue(Outgoing {
            frame,
            reply: Some(Reply(tx)),
        });
        Completion(rx)
    }

    fn enqueue(&self, outgoing: Outgoing) {
        let mut state = self.lock();
        if state.terminal.is_some() {
            // dropping the reply resolves the completion to the terminal error
            return;
        }
        state.pending.push_back(outgoing);
        drop(state);

        self.pushed.notify_waiters();
    }

    /// Waits for the oldest pending frame. Returns `None` once the queue is closed.
    pub async fn pop(&self) -> Option<Outgoing> {
        loop {
            let mut notified = pin!(self.pushed.notified());
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.terminal.is_some() {
                    return None;
                }
                if let Some(outgoing) = state.pending.pop_front() {
                    return Some(outgoing);
                }
            }

            notified.await;
        }
    }

    /// Reports the outcome of a frame the sender took from the queue. No-op once closed.
    pub fn post_result(&self, reply: Option<Reply>, result: Result<()>) {
        let state = self.lock();
        if state.terminal.is_some() {
            return;
        }
        if let Some(Reply(tx)) = reply {
            // the waiter may have given up already
            let _ = tx.send(result);
        }
    }

    /// Waits for the outcome of a frame: its posted result if there is one, otherwise the
    /// terminal error as soon as the queue closes.
    pub async fn await_result(&self, completion: Completion) -> Result<()> {
        let Completion(mut rx) = completion;
        tokio::select! {
            biased;
            result = &mut rx => match result {
                Ok(result) => result,
                Err(_) => Err(self.terminal_error()),
            },
            err = self.terminated() => Err(err),
        }
    }

    /// Queues `frame` and waits for its outcome.
    pub async fn submit(&self, frame: FrameView) -> Result<()> {
        let completion = self.push_with_completion(frame);
        self.await_result(completion).await
    }

    /// Terminates the queue with `err`. Only the first call has an effect; every frame still
    /// pending or in flight resolves to `err`.
    pub fn close(&self, err: WebSocketError) {
        let mut state = self.lock();
        if state.terminal.is_some() {
            return;
        }
        state.terminal = Some(err);
        let discarded = std::mem::take(&mut state.pending);
        drop(state);
        drop(discarded);

        self.closed.notify_waiters();
        self.pushed.notify_waiters();
    }

    async fn terminated(&self) -> WebSocketError {
        loop {
            let mut notified = pin!(self.closed.notified());
            notified.as_mut().enable();

            if let Some(err) = &self.lock().terminal {
                return err.clone();
            }

            notified.await;
        }
    }

    fn terminal_error(&self) -> WebSocketError {
        self.lock()
            .terminal
            .clone()
            .unwrap_or(WebSocketError::SocketAlreadyClosed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, WriteState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
