//! Session tracking: the `session_id`/sequence pair that makes a resume
//! possible, and the hello-timeout that guards the handshake.

/// The gateway's hello-timeout debug string historically read "30s" while
/// the real numeric constant was 300 000 ms. This crate uses the real
/// constant.
pub const HELLO_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(300);

/// Close codes after which a session cannot be resumed and must be reset
/// before the next identify.
pub const NON_RESUMABLE_CODES: [u16; 3] = [1000, 4006, 4007];

/// Returns whether `code` should be treated as fatal: the gateway itself
/// is refusing the connection, not merely dropping it. Concretely
/// `4001..=4005` and `4008..=4014`.
///
/// `4000` (`UnknownError`) and `4007` (`InvalidSeq`) are excluded; both are
/// ordinary, reconnectable conditions, as is `4006` (`AlreadyAuthenticated`,
/// which only means the session must be reset).
#[must_use]
pub fn is_unrecoverable(code: u16) -> bool {
    (4001..=4014).contains(&code) && code != 4006 && code != 4007
}

/// Whether `code` requires the session to be reset before the shard's next
/// identify.
#[must_use]
pub fn is_non_resumable(code: u16) -> bool {
    NON_RESUMABLE_CODES.contains(&code)
}

/// Tracks the state needed to resume a session, or fall back to a fresh
/// identify.
#[derive(Debug, Default)]
pub struct Session {
    session_id: Option<String>,
    seq: i64,
    closing_seq: i64,
}

impl Session {
    /// A fresh, never-connected session.
    #[must_use]
    pub fn new() -> Self {
        Self {
            session_id: None,
            seq: -1,
            closing_seq: -1,
        }
    }

    /// The currently tracked `session_id`, if any.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Store a new `session_id`, as received in `READY`.
    pub fn set_id(&mut self, id: impl Into<String>) {
        self.session_id = Some(id.into());
    }

    /// The current sequence number, or `-1` if none has been observed yet.
    #[must_use]
    pub const fn seq(&self) -> i64 {
        self.seq
    }

    /// The sequence observed just before the most recent close, used as
    /// the `sequence` field of a Resume payload.
    #[must_use]
    pub const fn closing_seq(&self) -> i64 {
        self.closing_seq
    }

    /// Update the sequence after an inbound dispatch with a non-null `s`.
    pub fn set_seq(&mut self, seq: u64) {
        self.seq = seq as i64;
    }

    /// Whether this session can be resumed: a `session_id` is present and
    /// the last close code wasn't in the non-resumable set.
    #[must_use]
    pub fn is_resumable(&self, last_close_code: Option<u16>) -> bool {
        self.session_id.is_some()
            && !last_close_code.map(is_non_resumable).unwrap_or(false)
    }

    /// Called on every socket close: captures `closing_seq` and resets the
    /// live sequence.
    pub fn on_close(&mut self) {
        if self.seq != -1 {
            self.closing_seq = self.seq;
        }

        self.seq = -1;
    }

    /// Clear the session id and sequence entirely, forcing the next
    /// handshake to be a fresh identify.
    pub fn reset(&mut self) {
        self.session_id = None;
        self.seq = -1;
        self.closing_seq = -1;
    }
}

#[cfg(test)]
mod tests {
    use super::Session;

    #[test]
    fn fresh_session_is_not_resumable() {
        let session = Session::new();
        assert!(!session.is_resumable(None));
    }

    #[test]
    fn session_with_id_is_resumable_unless_close_is_non_resumable() {
        let mut session = Session::new();
        session.set_id("abc");

        assert!(session.is_resumable(Some(4000)));
        assert!(!session.is_resumable(Some(1000)));
        assert!(!session.is_resumable(Some(4006)));
        assert!(!session.is_resumable(Some(4007)));
    }

    #[test]
    fn on_close_captures_closing_seq_and_resets_seq() {
        let mut session = Session::new();
        session.set_seq(42);
        session.on_close();

        assert_eq!(session.closing_seq(), 42);
        assert_eq!(session.seq(), -1);
    }

    #[test]
    fn on_close_with_no_sequence_leaves_closing_seq_untouched() {
        let mut session = Session::new();
        session.on_close();
        assert_eq!(session.closing_seq(), -1);
    }

    #[test]
    fn reset_clears_everything() {
        let mut session = Session::new();
        session.set_id("abc");
        session.set_seq(7);
        session.reset();

        assert!(session.id().is_none());
        assert_eq!(session.seq(), -1);
        assert_eq!(session.closing_seq(), -1);
    }

    #[test]
    fn unrecoverable_set_excludes_baseline_and_invalid_seq() {
        assert!(!super::is_unrecoverable(4000));
        assert!(!super::is_unrecoverable(4007));
        assert!(super::is_unrecoverable(4004));
        assert!(super::is_unrecoverable(4014));
    }

    #[test]
    fn non_resumable_set_matches_spec() {
        assert!(super::is_non_resumable(1000));
        assert!(super::is_non_resumable(4006));
        assert!(super::is_non_resumable(4007));
        assert!(!super::is_non_resumable(4000));
    }
}
