use std::{collections::VecDeque, pin::pin, sync::Mutex};

use tokio::sync::Notify;

use crate::{frame::FrameView, Result, WebSocketError};

/// Inbound messages waiting for `recv`.
///
/// Filled by the receiver task, drained by the application. Items are delivered in insertion
/// order; an item may itself be an error (malformed data) that `recv` hands out once.
/// After [`ReadQueue::close`] no more items are accepted, already queued ones are still
/// drained, and then every `pop` returns the terminal error.
pub(crate) struct ReadQueue {
    state: Mutex<ReadState>,
    notify: Notify,
}

#[derive(Default)]
struct ReadState {
    items: VecDeque<Result<FrameView>>,
    terminal: Option<WebSocketError>,
}

impl ReadQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ReadState::default()),
            notify: Notify::new(),
        }
    }

    pub fn push(&self, frame: FrameView) {
        self.push_item(Ok(frame));
    }

    /// Queues an error to be returned by one `pop`, in order with the frames before it.
    pub fn push_error(&self, err: WebSocketError) {
        self.push_item(Err(err));
    }

    fn push_item(&self, item: Result<FrameView>) {
        let mut state = self.lock();
        if state.terminal.is_some() {
            return;
        }
        state.items.push_back(item);
        drop(state);

        self.notify.notify_waiters();
    }

    /// Waits for the oldest item, or the terminal error once the queue is closed and drained.
    pub async fn pop(&self) -> Result<FrameView> {
        loop {
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(item) = state.items.pop_front() {
                    return item;
                }
                if let Some(err) = &state.terminal {
                    return Err(err.clone());
                }
            }

            notified.await;
        }
    }

    /// Terminates the queue with `err`. Only the first call has an effect.
    pub fn close(&self, err: WebSocketError) {
        let mut state = self.lock();
        if state.terminal.is_some() {
            return;
        }
        state.terminal = Some(err);
        drop(state);

        self.notify.notify_waiters();
    }

    /// Whether an item is queued right now, regardless of the terminal state.
    pub fn available(&self) -> bool {
        !self.lock().items.is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ReadState> {
        // the state stays consistent even if a holder panicked
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, time::Duration};

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = ReadQueue::new();
        queue.push(FrameView::text("a"));
        queue.push(FrameView::binary(vec![1u8]));
        queue.push(FrameView::text("c"));

        assert_eq!(queue.pop().await.unwrap(), FrameView::text("a"));
        assert_eq!(queue.pop().await.unwrap(), FrameView::binary(vec![1u8]));
        assert_eq!(queue.pop().await.unwrap(), FrameView::text("c"));
    }

    #[tokio::test]
    async fn test_drains_before_terminal() {
        let queue = ReadQueue::new();
        queue.push(FrameView::text("a"));
        queue.push_error(WebSocketError::InvalidDataReceived(Box::new(
            WebSocketError::InvalidOpCode(3),
        )));
        queue.close(WebSocketError::SocketAlreadyClosed);
        queue.push(FrameView::text("dropped"));

        assert_eq!(queue.pop().await.unwrap(), FrameView::text("a"));
        assert!(matches!(
            queue.pop().await,
            Err(WebSocketError::InvalidDataReceived(_))
        ));
        for _ in 0..3 {
            assert!(matches!(
                queue.pop().await,
                Err(WebSocketError::SocketAlreadyClosed)
            ));
        }
    }

    #[tokio::test]
    async fn test_first_close_wins() {
        let queue = ReadQueue::new();
        queue.close(WebSocketError::SocketAlreadyClosed);
        queue.close(WebSocketError::InvalidUTF8);
        assert!(matches!(
            queue.pop().await,
            Err(WebSocketError::SocketAlreadyClosed)
        ));
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let queue = Arc::new(ReadQueue::new());
        let popper = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!popper.is_finished());

        queue.push(FrameView::text("late"));
        let item = tokio::time::timeout(Duration::from_secs(1), popper)
            .await
            .expect("pop woke up")
            .unwrap();
        assert_eq!(item.unwrap(), FrameView::text("late"));
    }

    #[tokio::test]
    async fn test_close_wakes_waiters() {
        let queue = Arc::new(ReadQueue::new());
        let poppers: Vec<_> = (0..2)
            .map(|_| {
                let queue = Arc::clone(&queue);
                tokio::spawn(async move { queue.pop().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close(WebSocketError::SocketAlreadyClosed);

        for popper in poppers {
            let item = tokio::time::timeout(Duration::from_secs(1), popper)
                .await
                .expect("pop woke up")
                .unwrap();
            assert!(matches!(item, Err(WebSocketError::SocketAlreadyClosed)));
        }
    }

    #[test]
    fn test_available_ignores_terminal() {
        let queue = ReadQueue::new();
        assert!(!queue.available());

        queue.push(FrameView::text("x"));
        queue.close(WebSocketError::SocketAlreadyClosed);
        assert!(queue.available());

        futures::executor::block_on(queue.pop()).unwrap();
        assert!(!queue.available());
    }
}
