//! Outbound replay buffer.
//!
//! Holds publishes that failed while the broker was unreachable, each with its own
//! expiry. Expiry is evaluated lazily when the buffer is drained after a reconnect;
//! nothing sweeps it in the background. Bounded: when full, the oldest message goes.

use std::collections::VecDeque;

use tokio::time::Instant;

use crate::observability::metrics;

/// A publish waiting for a live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedMessage {
    pub queue: String,
    pub payload: Vec<u8>,
    pub expires_at: Instant,
}

impl BufferedMessage {
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// FIFO of buffered messages.
#[derive(Debug)]
pub struct OutboundBuffer {
    messages: VecDeque<BufferedMessage>,
    capacity: usize,
    total_dropped: u64,
}

impl OutboundBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
            total_dropped: 0,
        }
    }

    /// Append a message, evicting the oldest one when at capacity.
    pub fn push(&mut self, message: BufferedMessage) {
        if self.messages.len() >= self.capacity {
            if let Some(evicted) = self.messages.pop_front() {
                self.total_dropped += 1;
                metrics::record_buffer_dropped("capacity", 1);
                tracing::warn!(queue = %evicted.queue, capacity = self.capacity, "Replay buffer full, dropping oldest message");
            }
        }
        self.messages.push_back(message);
        metrics::record_buffer_size(self.messages.len());
    }

    /// Take every unexpired message in insertion order; expired ones are discarded.
    pub fn drain_live(&mut self, now: Instant) -> Vec<BufferedMessage> {
        let (live, expired): (Vec<_>, Vec<_>) = self.messages.drain(..).partition(|m| !m.is_expired(now));

        if !expired.is_empty() {
            self.total_dropped += expired.len() as u64;
            metrics::record_buffer_dropped("expired", expired.len());
            tracing::debug!(count = expired.len(), "Dropped expired buffered messages");
        }
        metrics::record_buffer_size(0);
        live
    }

    /// Discard everything.
    pub fn clear(&mut self) -> usize {
        let cleared = self.messages.len();
        self.messages.clear();
        metrics::record_buffer_size(0);
        cleared
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Messages dropped for capacity or expiry since creation.
    pub fn total_dropped(&self) -> u64 {
        self.total_dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn message(queue: &str, expires_at: Instant) -> BufferedMessage {
        BufferedMessage {
            queue: queue.to_string(),
            payload: queue.as_bytes().to_vec(),
            expires_at,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_drops_expired_messages() {
        let now = Instant::now();
        let mut buffer = OutboundBuffer::new(10);
        buffer.push(message("fresh", now + Duration::from_secs(300)));
        buffer.push(message("stale", now + Duration::from_secs(60)));

        tokio::time::advance(Duration::from_secs(120)).await;
        let live = buffer.drain_live(Instant::now());

        assert_eq!(live.len(), 1);
        assert_eq!(live[0].queue, "fresh");
        assert!(buffer.is_empty());
        assert_eq!(buffer.total_dropped(), 1);
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let later = Instant::now() + Duration::from_secs(60);
        let mut buffer = OutboundBuffer::new(2);
        buffer.push(message("a", later));
        buffer.push(message("b", later));
        buffer.push(message("c", later));

        let queues: Vec<String> = buffer.drain_live(Instant::now()).into_iter().map(|m| m.queue).collect();
        assert_eq!(queues, vec!["b", "c"]);
        assert_eq!(buffer.total_dropped(), 1);
    }

    #[tokio::test]
    async fn test_clear() {
        let mut buffer = OutboundBuffer::new(4);
        buffer.push(message("a", Instant::now() + Duration::from_secs(1)));
        assert_eq!(buffer.clear(), 1);
        assert_eq!(buffer.len(), 0);
    }
}
