//! Thread-safe FIFO used to hand packets and events between threads.
//!
//! A [`MessageQueue`] owns both ends of an unbounded crossbeam channel, so a
//! clone can be handed to any number of producers and consumers. Items are
//! never lost under concurrent push/pop: every pushed item is popped exactly
//! once by exactly one consumer.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, unbounded};

/// Multi-producer, multi-consumer FIFO queue.
pub struct MessageQueue<T> {
    sender: Sender<T>,
    receiver: Receiver<T>,
}

impl<T> MessageQueue<T> {
    /// Creates an empty queue.
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    /// Appends an item to the back of the queue.
    pub fn push(&self, item: T) {
        // Both ends live in `self`, so the channel can never be disconnected here.
        let _ = self.sender.send(item);
    }

    /// Pops the front item without blocking.
    pub fn try_pop(&self) -> Option<T> {
        match self.receiver.try_recv() {
            Ok(item) => Some(item),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Pops the front item, waiting up to `timeout` for one to arrive.
    pub fn pop_with_timeout(&self, timeout: Duration) -> Option<T> {
        match self.receiver.recv_timeout(timeout) {
            Ok(item) => Some(item),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Removes and returns everything currently queued, in FIFO order.
    pub fn drain(&self) -> Vec<T> {
        self.receiver.try_iter().collect()
    }

    /// Number of queued items.
    pub fn size(&self) -> usize {
        self.receiver.len()
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl<T> Clone for MessageQueue<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
        }
    }
}

impl<T> Default for MessageQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for MessageQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageQueue")
            .field("size", &self.size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn test_push_pop_is_fifo() {
        let queue = MessageQueue::new();
        queue.push(1);
        queue.push(2);
        queue.push(3);

        assert_eq!(queue.size(), 3);
        assert_eq!(queue.try_pop(), Some(1));
        assert_eq!(queue.try_pop(), Some(2));
        assert_eq!(queue.try_pop(), Some(3));
        assert_eq!(queue.try_pop(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_with_timeout_returns_none_when_empty() {
        let queue: MessageQueue<u32> = MessageQueue::new();
        let start = Instant::now();
        assert!(queue.pop_with_timeout(Duration::from_millis(30)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn test_pop_with_timeout_wakes_on_push() {
        let queue = MessageQueue::new();
        let producer = queue.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            producer.push("hello");
        });

        let got = queue.pop_with_timeout(Duration::from_secs(5));
        assert_eq!(got, Some("hello"));
        handle.join().unwrap();
    }

    #[test]
    fn test_drain_takes_everything_in_order() {
        let queue = MessageQueue::new();
        for i in 0..5 {
            queue.push(i);
        }
        assert_eq!(queue.drain(), vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_concurrent_producers_and_consumers_lose_nothing() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 2_000;

        let queue = Arc::new(MessageQueue::new());
        let mut producers = Vec::new();
        for p in 0..PRODUCERS {
            let q = Arc::clone(&queue);
            producers.push(std::thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    q.push(p * PER_PRODUCER + i);
                }
            }));
        }

        let mut consumers = Vec::new();
        for _ in 0..2 {
            let q = Arc::clone(&queue);
            consumers.push(std::thread::spawn(move || {
                let mut seen = Vec::new();
                while let Some(v) = q.pop_with_timeout(Duration::from_millis(200)) {
                    seen.push(v);
                }
                seen
            }));
        }

        for p in producers {
            p.join().unwrap();
        }
        let mut all = HashSet::new();
        for c in consumers {
            for v in c.join().unwrap() {
                assert!(all.insert(v), "item {v} popped twice");
            }
        }
        assert_eq!(all.len(), PRODUCERS * PER_PRODUCER);
    }

    #[test]
    fn test_per_producer_order_is_preserved() {
        let queue = MessageQueue::new();
        let producer = queue.clone();
        let handle = std::thread::spawn(move || {
            for i in 0..1_000u32 {
                producer.push(i);
            }
        });
        handle.join().unwrap();

        let drained = queue.drain();
        assert!(drained.windows(2).all(|w| w[0] < w[1]));
    }
}
