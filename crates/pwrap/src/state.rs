//! Bridge lifecycle states.

use std::fmt;

/// Lifecycle of a [`CommBridge`](crate::CommBridge).
///
/// `Closed` is terminal; no transition leaves it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BridgeState {
    /// Socket bound, not yet accepting.
    #[default]
    Created,
    /// Accepting, no supervisor attached.
    Listening,
    /// A supervisor is attached.
    Connected,
    /// Resources released.
    Closed,
}

impl BridgeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Listening => "listening",
            Self::Connected => "connected",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
