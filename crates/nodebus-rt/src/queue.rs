//! ---
//! nb_section: "01-core-functionality"
//! nb_subsection: "module"
//! nb_type: "source"
//! nb_scope: "code"
//! nb_description: "Bounded multi-producer single-consumer task queues."
//! nb_version: "v0.0.0-prealpha"
//! nb_owner: "tbd"
//! ---
//! Bounded FIFO queues feeding one task each.
//!
//! The consuming task owns the [`MessageQueue`]; producers hold cloned
//! [`QueueHandle`]s. A full queue never drops silently: `send` waits for
//! space up to its timeout and `try_send` reports failure.

use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};

/// Producer side of a task queue.
pub struct QueueHandle<M> {
    tx: Sender<M>,
}

impl<M> Clone for QueueHandle<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<M> QueueHandle<M> {
    /// Enqueue, waiting up to `timeout` for space.
    pub fn send(&self, message: M, timeout: Duration) -> bool {
        self.tx.send_timeout(message, timeout).is_ok()
    }

    /// Enqueue only if space is available now.
    pub fn try_send(&self, message: M) -> bool {
        self.tx.try_send(message).is_ok()
    }

    /// Messages currently waiting.
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    /// True when nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

impl<M> std::fmt::Debug for QueueHandle<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueHandle")
            .field("len", &self.tx.len())
            .field("capacity", &self.tx.capacity())
            .finish()
    }
}

/// Queue holding up to `N` messages for a single consumer.
pub struct MessageQueue<M, const N: usize> {
    tx: Sender<M>,
    rx: Receiver<M>,
}

impl<M, const N: usize> MessageQueue<M, N> {
    const NON_ZERO: () = assert!(N > 0, "queue capacity must be non-zero");

    /// Empty queue.
    pub fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::NON_ZERO;
        let (tx, rx) = bounded(N);
        Self { tx, rx }
    }

    /// Producer handle for other tasks.
    pub fn handle(&self) -> QueueHandle<M> {
        QueueHandle {
            tx: self.tx.clone(),
        }
    }

    /// Enqueue, waiting up to `timeout` for space.
    pub fn send(&self, message: M, timeout: Duration) -> bool {
        self.tx.send_timeout(message, timeout).is_ok()
    }

    /// Enqueue only if space is available now.
    pub fn try_send(&self, message: M) -> bool {
        self.tx.try_send(message).is_ok()
    }

    /// Dequeue, waiting up to `timeout` for a message.
    pub fn receive(&self, timeout: Duration) -> Option<M> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Dequeue only if a message is waiting.
    pub fn try_receive(&self) -> Option<M> {
        self.rx.try_recv().ok()
    }

    /// Whether a message is waiting.
    pub fn has_message(&self) -> bool {
        !self.rx.is_empty()
    }

    /// Configured capacity.
    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<M, const N: usize> Default for MessageQueue<M, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn messages_come_out_in_order() {
        let queue: MessageQueue<u32, 4> = MessageQueue::new();
        for value in 0..4 {
            assert!(queue.try_send(value));
        }
        assert!(queue.has_message());
        let drained: Vec<_> = std::iter::from_fn(|| queue.try_receive()).collect();
        assert_eq!(drained, vec![0, 1, 2, 3]);
        assert!(!queue.has_message());
    }

    #[test]
    fn try_send_fails_fast_when_full() {
        let queue: MessageQueue<u8, 1> = MessageQueue::new();
        assert!(queue.try_send(1));
        let started = Instant::now();
        assert!(!queue.try_send(2));
        assert!(started.elapsed() < Duration::from_millis(50));
        assert_eq!(queue.try_receive(), Some(1));
        assert_eq!(queue.try_receive(), None);
    }

    #[test]
    fn timed_send_waits_for_space() {
        let queue: MessageQueue<u8, 1> = MessageQueue::new();
        let producer = queue.handle();
        assert!(producer.try_send(1));
        assert!(!producer.send(2, Duration::from_millis(5)));

        let worker = thread::spawn(move || producer.send(3, Duration::from_secs(2)));
        assert_eq!(queue.receive(Duration::from_secs(1)), Some(1));
        assert!(worker.join().expect("producer thread"));
        assert_eq!(queue.receive(Duration::from_secs(1)), Some(3));
    }

    #[test]
    fn receive_times_out_on_empty_queue() {
        let queue: MessageQueue<u8, 2> = MessageQueue::default();
        assert_eq!(queue.receive(Duration::from_millis(5)), None);
        assert_eq!(queue.capacity(), 2);
    }

    #[test]
    fn many_producers_single_consumer() {
        let queue: MessageQueue<(usize, usize), 8> = MessageQueue::new();
        let producers: Vec<_> = (0..4)
            .map(|id| {
                let handle = queue.handle();
                thread::spawn(move || {
                    for seq in 0..25 {
                        assert!(handle.send((id, seq), Duration::from_secs(5)));
                    }
                })
            })
            .collect();

        let mut last_seen = [None::<usize>; 4];
        for _ in 0..100 {
            let (id, seq) = queue.receive(Duration::from_secs(5)).expect("message");
            if let Some(previous) = last_seen[id] {
                assert!(seq > previous, "per-producer order preserved");
            }
            last_seen[id] = Some(seq);
        }
        for producer in producers {
            producer.join().expect("producer");
        }
    }
}
