//! The connection stage of a [`Shard`](super::Shard).

use std::fmt::{Display, Formatter, Result as FmtResult};

/// The current stage of a shard's connection to the gateway.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Stage {
    /// The shard has never connected.
    Idle,
    /// A WebSocket connection is being established for the first time in
    /// this session.
    Connecting,
    /// A WebSocket connection is being re-established after a close.
    Reconnecting,
    /// The socket is open but no Hello has been received yet.
    Nearly,
    /// Hello was received and an Identify was sent; awaiting Ready.
    Identifying,
    /// Hello was received and a Resume was sent; awaiting Resumed.
    Resuming,
    /// Ready was received; waiting for guild availability to settle.
    WaitingForGuilds,
    /// Guild availability has settled after a fresh identify.
    Ready,
    /// Steady state reached via a successful resume.
    Connected,
    /// The socket is closed; the shard is queued or waiting to reconnect.
    Disconnected,
}

impl Default for Stage {
    fn default() -> Self {
        Self::Idle
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(match self {
            Self::Idle => "Idle",
            Self::Connecting => "Connecting",
            Self::Reconnecting => "Reconnecting",
            Self::Nearly => "Nearly",
            Self::Identifying => "Identifying",
            Self::Resuming => "Resuming",
            Self::WaitingForGuilds => "WaitingForGuilds",
            Self::Ready => "Ready",
            Self::Connected => "Connected",
            Self::Disconnected => "Disconnected",
        })
    }
}

impl Stage {
    /// Whether a missed heartbeat ack is tolerated in this stage rather
    /// than immediately treated as a zombied connection.
    #[must_use]
    pub const fn tolerates_missed_ack(self) -> bool {
        matches!(self, Self::WaitingForGuilds | Self::Identifying | Self::Resuming)
    }
}

#[cfg(test)]
mod tests {
    use super::Stage;

    #[test]
    fn default_is_idle() {
        assert_eq!(Stage::default(), Stage::Idle);
    }

    #[test]
    fn formatting() {
        assert_eq!("WaitingForGuilds", Stage::WaitingForGuilds.to_string());
        assert_eq!("Connected", Stage::Connected.to_string());
    }

    #[test]
    fn tolerant_set_matches_spec() {
        assert!(Stage::WaitingForGuilds.tolerates_missed_ack());
        assert!(Stage::Identifying.tolerates_missed_ack());
        assert!(Stage::Resuming.tolerates_missed_ack());
        assert!(!Stage::Ready.tolerates_missed_ack());
        assert!(!Stage::Connected.tolerates_missed_ack());
        assert!(!Stage::Nearly.tolerates_missed_ack());
    }
}
