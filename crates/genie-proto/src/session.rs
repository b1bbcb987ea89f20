use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of a session driving one chat CLI process.
///
/// Transitions happen only inside the session's own methods. `Closed` is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No channel has been spawned yet.
    Unstarted,
    /// The login sequence is running.
    Authenticating,
    /// Login printed a URL the user still has to open.
    AwaitingAuth,
    /// The chat accepts requests.
    Ready,
    /// A request is in flight.
    Busy,
    /// The channel was released.
    Closed,
}

impl SessionState {
    /// Whether the state accepts no further channel operations.
    pub fn is_closed(self) -> bool {
        self == SessionState::Closed
    }

    /// Whether a channel exists for this state.
    pub fn has_channel(self) -> bool {
        !matches!(self, SessionState::Unstarted | SessionState::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Unstarted => "unstarted",
            SessionState::Authenticating => "authenticating",
            SessionState::AwaitingAuth => "awaiting_auth",
            SessionState::Ready => "ready",
            SessionState::Busy => "busy",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_matches_serde_name() {
        let json = serde_json::to_string(&SessionState::AwaitingAuth).unwrap();
        assert_eq!(json, format!("\"{}\"", SessionState::AwaitingAuth));
    }

    #[test]
    fn test_has_channel() {
        assert!(!SessionState::Unstarted.has_channel());
        assert!(SessionState::Busy.has_channel());
        assert!(!SessionState::Closed.has_channel());
    }
}
