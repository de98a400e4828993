use serde::{Deserialize, Serialize};

/// Load signal reported by a backend connection.
///
/// Polled by callers and operators; never pushed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    /// Backend-defined workload figure (for the local backend: operations in flight).
    pub workload: i64,
}

impl Health {
    pub fn new(workload: i64) -> Self {
        Self { workload }
    }

    /// Returns `true` when nothing is in flight.
    pub fn is_idle(&self) -> bool {
        self.workload == 0
    }
}
