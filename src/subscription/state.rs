/// Lifecycle of the push connection.
///
/// `Disconnected → Connecting → Live → Reconnecting → Connecting ...`;
/// `Stopped` is terminal and is entered on explicit close or once the
/// reconnect budget is spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Live,
    Reconnecting,
    Stopped,
}

impl ConnectionState {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Live => 2,
            ConnectionState::Reconnecting => 3,
            ConnectionState::Stopped => 4,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Live,
            3 => ConnectionState::Reconnecting,
            4 => ConnectionState::Stopped,
            _ => ConnectionState::Disconnected,
        }
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        if next == Stopped {
            return self != Stopped;
        }

        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Live)
                | (Connecting, Disconnected)
                | (Live, Reconnecting)
                | (Reconnecting, Connecting)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == ConnectionState::Stopped
    }
}
