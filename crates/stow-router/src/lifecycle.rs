use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a [`Router`](crate::Router).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Lifecycle {
    /// Accepting driver and backend registrations.
    Unconfigured,
    /// Sealed by `setup`; backends are known but not connected.
    Configured,
    /// Every backend has a live connection and the ring is built.
    Connected,
    /// Started by the host.
    Running,
    /// Stopped by the host; connections stay open.
    Stopped,
    /// Torn down by `close`; may be configured again.
    Closed,
}

impl Lifecycle {
    /// Registration is only allowed before sealing.
    pub fn accepts_registration(self) -> bool {
        matches!(self, Self::Unconfigured | Self::Closed)
    }

    /// Connections are live.
    pub fn is_open(self) -> bool {
        matches!(self, Self::Connected | Self::Running | Self::Stopped)
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unconfigured => write!(f, "unconfigured"),
            Self::Configured => write!(f, "configured"),
            Self::Connected => write!(f, "connected"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// What happens when a driver or backend name is registered twice.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationMode {
    /// The later registration replaces the earlier one.
    #[default]
    Override,
    /// The first registration wins; later ones are ignored.
    FirstWins,
}
