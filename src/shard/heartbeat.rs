//! Heartbeat state: ack tracking, latency, and zombie-connection detection.

use std::time::{Duration, Instant};

/// The gateway close code sent when a connection is found to be zombied:
/// still open at the TCP level but no longer acking heartbeats.
pub const ZOMBIE_CLOSE_CODE: u16 = 4009;

/// Per-shard heartbeat bookkeeping.
#[derive(Debug)]
pub struct Heartbeat {
    acked: bool,
    last_sent: Option<Instant>,
    interval: Option<Duration>,
    latency: Option<Duration>,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

impl Heartbeat {
    /// A heartbeat tracker in its initial state: `acked` starts `true` so
    /// the first periodic tick isn't mistaken for a missed ack.
    #[must_use]
    pub fn new() -> Self {
        Self {
            acked: true,
            last_sent: None,
            interval: None,
            latency: None,
        }
    }

    /// The configured heartbeat cadence, if Hello has been received.
    #[must_use]
    pub const fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Start periodic heartbeating at the cadence the gateway announced in
    /// Hello.
    pub fn set_interval(&mut self, interval_ms: u64) {
        self.interval = Some(Duration::from_millis(interval_ms));
    }

    /// Cancel the timer and clear all tracked state. Called whenever the
    /// shard disconnects.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// The latency of the last acked heartbeat, meaningful only once at
    /// least one ack has been received.
    #[must_use]
    pub const fn latency(&self) -> Option<Duration> {
        self.latency
    }

    /// Whether the most recently sent heartbeat has been acked.
    #[must_use]
    pub const fn acked(&self) -> bool {
        self.acked
    }

    /// Record that a heartbeat was just transmitted.
    pub fn record_send(&mut self, now: Instant) {
        self.acked = false;
        self.last_sent = Some(now);
    }

    /// Record an incoming `HeartbeatAck`.
    pub fn ack(&mut self, now: Instant) {
        if let Some(sent) = self.last_sent {
            self.latency = Some(now.saturating_duration_since(sent));
        }

        self.acked = true;
    }

    /// Whether, given the current stage, a missing ack means the
    /// connection is zombied and must be destroyed.
    ///
    /// Tolerant stages (waiting for guilds, identifying, resuming) still
    /// send the heartbeat, but a missed ack there is logged rather than
    /// treated as fatal: the handshake itself may simply be slow.
    #[must_use]
    pub fn is_zombied(&self, stage_tolerates_missed_ack: bool) -> bool {
        !self.acked && !stage_tolerates_missed_ack
    }
}

#[cfg(test)]
mod tests {
    use super::Heartbeat;
    use std::time::{Duration, Instant};

    #[test]
    fn starts_acked() {
        assert!(Heartbeat::new().acked());
    }

    #[test]
    fn unacked_heartbeat_in_intolerant_stage_is_zombied() {
        let mut hb = Heartbeat::new();
        hb.record_send(Instant::now());
        assert!(hb.is_zombied(false));
        assert!(!hb.is_zombied(true));
    }

    #[test]
    fn ack_computes_latency_and_clears_flag() {
        let mut hb = Heartbeat::new();
        let sent = Instant::now();
        hb.record_send(sent);

        let acked_at = sent + Duration::from_millis(40);
        hb.ack(acked_at);

        assert!(hb.acked());
        assert_eq!(hb.latency(), Some(Duration::from_millis(40)));
    }

    #[test]
    fn reset_clears_everything() {
        let mut hb = Heartbeat::new();
        hb.set_interval(45_000);
        hb.record_send(Instant::now());
        hb.reset();

        assert!(hb.acked());
        assert!(hb.interval().is_none());
        assert!(hb.latency().is_none());
    }
}
