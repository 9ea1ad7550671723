use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque key identifying one flow for its whole lifetime.
///
/// Hosts typically derive it from the local port of the connection, but any
/// value that is unique among live flows works.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowId(u64);

impl FlowId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for FlowId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Local port of the socket, the identity the kernel hook keys on.
impl From<u16> for FlowId {
    fn from(port: u16) -> Self {
        Self(port as u64)
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "flow#{}", self.0)
    }
}
