//! Bounded drop-oldest queue between log producers and the TCP worker.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

/// A FIFO queue with a fixed capacity. Pushing onto a full queue evicts
/// the oldest item: under sustained overload, losing old log lines beats
/// unbounded memory growth or blocking the caller's logging call.
///
/// One consumer awaits items via [`pop`](FixedSizeQueue::pop); after
/// [`close`](FixedSizeQueue::close) the queue stops accepting items,
/// `pop` drains what remains and then reports exhaustion with `None`.
pub struct FixedSizeQueue<T> {
    inner: Mutex<Inner<T>>,
    capacity: usize,
    notify: Notify,
    closed_notify: Notify,
    dropped: AtomicU64,
}

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

impl<T> FixedSizeQueue<T> {
    pub fn new(capacity: usize) -> Self {
        FixedSizeQueue {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                closed: false,
            }),
            capacity: capacity.max(1),
            notify: Notify::new(),
            closed_notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Append an item, evicting the oldest if the queue is full.
    /// Returns false if the queue has been closed and the item was
    /// discarded.
    pub fn push(&self, item: T) -> bool {
        {
            let mut inner = self.lock();
            if inner.closed {
                return false;
            }
            inner.items.push_back(item);
            while inner.items.len() > self.capacity {
                inner.items.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.notify.notify_one();
        true
    }

    /// Wait for the next item. Returns `None` once the queue is closed
    /// and every remaining item has been drained.
    pub async fn pop(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.lock();
                if let Some(item) = inner.items.pop_front() {
                    return Some(item);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Non-blocking pop, used when discarding leftovers at shutdown.
    pub fn try_pop(&self) -> Option<T> {
        self.lock().items.pop_front()
    }

    /// Stop accepting items. Idempotent.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
        self.notify.notify_one();
        self.closed_notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Completes once the queue has been closed; used to interrupt
    /// backoff sleeps during shutdown.
    pub async fn wait_closed(&self) {
        loop {
            let notified = self.closed_notify.notified();
            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items evicted by the drop-oldest policy so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<T>> {
        // A poisoned lock only means a panic elsewhere; the queue state
        // itself is still coherent.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn fifo_order_is_preserved() {
        let queue = FixedSizeQueue::new(8);
        for i in 0..4 {
            assert!(queue.push(i));
        }
        for i in 0..4 {
            assert_eq!(queue.pop().await, Some(i));
        }
    }

    #[tokio::test]
    async fn overflow_drops_oldest_at_capacity_boundary() {
        let queue = FixedSizeQueue::new(3);
        for i in 0..3 {
            queue.push(i);
        }
        // Exactly at capacity: nothing dropped yet.
        assert_eq!(queue.dropped(), 0);
        assert_eq!(queue.len(), 3);

        // One past capacity: the oldest goes.
        queue.push(3);
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.pop().await, Some(1));
        assert_eq!(queue.pop().await, Some(2));
        assert_eq!(queue.pop().await, Some(3));
    }

    #[tokio::test]
    async fn retains_most_recent_items_under_burst() {
        let queue = FixedSizeQueue::new(3);
        for i in 0..10 {
            queue.push(i);
        }
        assert_eq!(queue.dropped(), 7);
        let mut kept = Vec::new();
        while let Some(item) = queue.try_pop() {
            kept.push(item);
        }
        assert_eq!(kept, vec![7, 8, 9]);
    }

    #[tokio::test]
    async fn close_rejects_new_items_and_drains_old_ones() {
        let queue = FixedSizeQueue::new(8);
        queue.push(1);
        queue.close();
        assert!(!queue.push(2));
        assert_eq!(queue.pop().await, Some(1));
        assert_eq!(queue.pop().await, None);
    }

    #[tokio::test]
    async fn pop_wakes_on_push_and_on_close() {
        let queue = Arc::new(FixedSizeQueue::new(8));

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(7);
        assert_eq!(waiter.await.unwrap(), Some(7));

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();
        assert_eq!(waiter.await.unwrap(), None);
    }

    #[tokio::test]
    async fn wait_closed_returns_for_already_closed_queue() {
        let queue: FixedSizeQueue<u8> = FixedSizeQueue::new(1);
        queue.close();
        queue.wait_closed().await;
    }
}
