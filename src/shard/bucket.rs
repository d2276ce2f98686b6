//! The outbound rate-limit bucket: 120 frames per 60 seconds, continuously
//! refilled, with a priority lane for handshake payloads.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Capacity of the bucket: 120 frames per 60-second window.
pub const CAPACITY: f64 = 120.0;
const WINDOW: Duration = Duration::from_secs(60);

/// A continuously refilling token bucket gating outbound WebSocket frames.
#[derive(Debug)]
pub struct RateBucket {
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl RateBucket {
    /// A fresh bucket, full, as used on shard construction and after every
    /// `destroy`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tokens: CAPACITY,
            refill_per_sec: CAPACITY / WINDOW.as_secs_f64(),
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(CAPACITY);
        self.last_refill = now;
    }

    /// Try to take one token. On success the caller may send immediately.
    /// On failure, returns how long to wait before retrying.
    pub fn try_acquire(&mut self) -> Result<(), Duration> {
        let now = Instant::now();
        self.refill(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - self.tokens;
            Err(Duration::from_secs_f64(deficit / self.refill_per_sec))
        }
    }
}

impl Default for RateBucket {
    fn default() -> Self {
        Self::new()
    }
}

/// An already-encoded outbound frame, queued pending the rate bucket.
#[derive(Debug, Clone)]
pub struct QueuedFrame {
    pub bytes: Vec<u8>,
}

/// The ordered queue of frames waiting on the rate bucket, or (while the
/// socket isn't open) waiting to be drained on the next connect.
#[derive(Debug, Default)]
pub struct FrameQueue {
    frames: VecDeque<QueuedFrame>,
}

impl FrameQueue {
    /// An empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            frames: VecDeque::new(),
        }
    }

    /// Enqueue a frame, at the head if `prioritized` else the tail.
    ///
    /// Prioritized frames (identify, resume, heartbeat) are admitted ahead
    /// of whatever is already pending, but never preempt a send already in
    /// flight — that's enforced by the caller draining one frame at a time.
    pub fn push(&mut self, bytes: Vec<u8>, prioritized: bool) {
        let frame = QueuedFrame { bytes };

        if prioritized {
            self.frames.push_front(frame);
        } else {
            self.frames.push_back(frame);
        }
    }

    /// Take the next frame in send order, if any.
    pub fn pop(&mut self) -> Option<QueuedFrame> {
        self.frames.pop_front()
    }

    /// Whether there's nothing waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Drain every queued frame, in order, without consulting the bucket.
    /// Used when a socket that will inherit the queue is about to open.
    pub fn drain(&mut self) -> Vec<QueuedFrame> {
        self.frames.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{FrameQueue, RateBucket};

    #[test]
    fn bucket_grants_up_to_capacity_immediately() {
        let mut bucket = RateBucket::new();

        for _ in 0..120 {
            assert!(bucket.try_acquire().is_ok());
        }

        assert!(bucket.try_acquire().is_err());
    }

    #[test]
    fn prioritized_frame_jumps_ahead_of_pending() {
        let mut queue = FrameQueue::new();
        queue.push(b"first".to_vec(), false);
        queue.push(b"second".to_vec(), false);
        queue.push(b"identify".to_vec(), true);

        assert_eq!(queue.pop().unwrap().bytes, b"identify");
        assert_eq!(queue.pop().unwrap().bytes, b"first");
        assert_eq!(queue.pop().unwrap().bytes, b"second");
    }
}
