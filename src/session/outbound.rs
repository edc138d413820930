//! Bounded per-connection outbound queue.
//!
//! Producers never block: when the queue is full the oldest frame is evicted
//! to make room for the new one. The connection's writer task is the only
//! consumer and awaits [`OutboundQueue::pop`].

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::websocket::ServerFrame;

/// Result of a non-blocking push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Frame accepted.
    Queued,
    /// Frame accepted; the oldest queued frame was evicted to make room.
    DroppedOldest,
    /// Queue is closed; frame discarded.
    Closed,
}

#[derive(Debug)]
struct Inner {
    frames: VecDeque<ServerFrame>,
    closed: bool,
    dropped: u64,
}

#[derive(Debug)]
pub struct OutboundQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    capacity: usize,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                frames: VecDeque::new(),
                closed: false,
                dropped: 0,
            }),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    /// Push a frame without blocking, evicting the oldest frame when full.
    pub fn push(&self, frame: ServerFrame) -> PushOutcome {
        let outcome = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if inner.closed {
                return PushOutcome::Closed;
            }
            let outcome = if inner.frames.len() >= self.capacity {
                inner.frames.pop_front();
                inner.dropped += 1;
                PushOutcome::DroppedOldest
            } else {
                PushOutcome::Queued
            };
            inner.frames.push_back(frame);
            outcome
        };
        self.notify.notify_one();
        outcome
    }

    /// Await the next frame. Returns `None` once the queue is closed and
    /// fully drained.
    pub async fn pop(&self) -> Option<ServerFrame> {
        loop {
            {
                let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(frame) = inner.frames.pop_front() {
                    return Some(frame);
                }
                if inner.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Close the queue. Queued frames remain poppable; further pushes are
    /// rejected.
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.closed = true;
        }
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .closed
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .frames
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frames evicted by drop-oldest since creation.
    pub fn dropped(&self) -> u64 {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(n: u64) -> ServerFrame {
        ServerFrame::error("s1", "test", format!("frame-{}", n))
    }

    fn frame_message(frame: &ServerFrame) -> String {
        frame.data["message"].as_str().unwrap_or_default().to_string()
    }

    #[tokio::test]
    async fn push_then_pop_is_fifo() {
        let queue = OutboundQueue::new(8);
        assert_eq!(queue.push(frame(1)), PushOutcome::Queued);
        assert_eq!(queue.push(frame(2)), PushOutcome::Queued);

        assert_eq!(frame_message(&queue.pop().await.unwrap()), "frame-1");
        assert_eq!(frame_message(&queue.pop().await.unwrap()), "frame-2");
    }

    #[tokio::test]
    async fn overflow_evicts_oldest() {
        let queue = OutboundQueue::new(2);
        queue.push(frame(1));
        queue.push(frame(2));
        assert_eq!(queue.push(frame(3)), PushOutcome::DroppedOldest);

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 1);
        assert_eq!(frame_message(&queue.pop().await.unwrap()), "frame-2");
        assert_eq!(frame_message(&queue.pop().await.unwrap()), "frame-3");
    }

    #[tokio::test]
    async fn close_rejects_pushes_but_drains_remaining() {
        let queue = OutboundQueue::new(4);
        queue.push(frame(1));
        queue.close();

        assert_eq!(queue.push(frame(2)), PushOutcome::Closed);
        assert_eq!(frame_message(&queue.pop().await.unwrap()), "frame-1");
        assert!(queue.pop().await.is_none());
    }

    #[tokio::test]
    async fn pop_wakes_on_push() {
        let queue = std::sync::Arc::new(OutboundQueue::new(4));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::task::yield_now().await;
        queue.push(frame(7));

        let frame = consumer.await.unwrap().unwrap();
        assert_eq!(frame_message(&frame), "frame-7");
    }

    #[tokio::test]
    async fn pop_wakes_on_close() {
        let queue = std::sync::Arc::new(OutboundQueue::new(4));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::task::yield_now().await;
        queue.close();

        assert!(consumer.await.unwrap().is_none());
    }
}
