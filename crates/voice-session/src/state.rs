//! Session lifecycle state machine (§4.4.1).

use std::fmt;

/// One state in the per-call lifecycle. `speculating` is tracked as a
/// separate flag on [`crate::session::Session`] rather than folded into this
/// enum, since the spec describes it as an orthogonal flag during
/// `Listening`, not a distinct state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Opening,
    Greeting,
    Listening,
    Speaking,
    Ending,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Opening => "opening",
            SessionState::Greeting => "greeting",
            SessionState::Listening => "listening",
            SessionState::Speaking => "speaking",
            SessionState::Ending => "ending",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

impl SessionState {
    /// Whether `self -> next` is one of the transitions named in §4.4.1.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Opening, Greeting)
                | (Greeting, Listening)
                | (Listening, Speaking)
                | (Listening, Listening)
                | (Speaking, Listening)
                | (Listening, Ending)
                | (Speaking, Ending)
                | (Greeting, Ending)
                | (Opening, Ending)
                | (Ending, Closed)
        )
    }
}
