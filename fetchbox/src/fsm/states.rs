/// Lifecycle states of a reply.
///
/// A reply moves strictly forward: once it reaches a terminal state no
/// further transition is possible, and late transport events are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyState {
    /// Created but not yet dispatched.
    Idle,
    /// Draining a sequential upload body into memory before dispatch.
    Buffering,
    /// A transport is active and response data may be flowing.
    Working,
    /// The transport reported that no session is available; dispatch is
    /// parked until the session comes back.
    WaitingForSession,
    /// The transport connection was lost mid-transfer and a resumed
    /// dispatch is being prepared.
    Reconnecting,
    /// Terminal: the reply completed, successfully or with an error.
    Finished,
    /// Terminal: the consumer aborted the reply.
    Aborted,
}

impl ReplyState {
    /// Whether the state admits no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, ReplyState::Finished | ReplyState::Aborted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(ReplyState::Finished.is_terminal());
        assert!(ReplyState::Aborted.is_terminal());
        assert!(!ReplyState::Idle.is_terminal());
        assert!(!ReplyState::Working.is_terminal());
        assert!(!ReplyState::Reconnecting.is_terminal());
        assert!(!ReplyState::WaitingForSession.is_terminal());
        assert!(!ReplyState::Buffering.is_terminal());
    }
}
