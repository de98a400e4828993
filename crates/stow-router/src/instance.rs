use std::fmt;

use stow_store::{BackendConfig, Connection, Instance};

/// A named backend paired with the connection opened for it.
///
/// Created by `Router::open` and dropped by `Router::close`. Routed calls hold
/// an `Arc` to it only for their own duration.
pub struct LiveInstance {
    instance: Instance,
    conn: Box<dyn Connection>,
}

impl LiveInstance {
    pub fn new(instance: Instance, conn: Box<dyn Connection>) -> Self {
        Self { instance, conn }
    }

    pub fn name(&self) -> &str {
        &self.instance.name
    }

    pub fn config(&self) -> &BackendConfig {
        &self.instance.config
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn connection(&self) -> &dyn Connection {
        self.conn.as_ref()
    }
}

impl fmt::Debug for LiveInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveInstance")
            .field("name", &self.instance.name)
            .field("driver", &self.instance.config.driver)
            .field("weight", &self.instance.config.weight)
            .finish_non_exhaustive()
    }
}
