use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Hosts and switches of the dumbbell.
///
/// ```text
/// C1 --- S1 --- S2 --- C3
///         |      |
/// C2 -----+      +---- C4
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeId {
    C1,
    C2,
    S1,
    S2,
    C3,
    C4,
}

impl NodeId {
    pub const CLIENTS: [NodeId; 2] = [NodeId::C1, NodeId::C2];
    pub const SERVERS: [NodeId; 2] = [NodeId::C3, NodeId::C4];

    pub fn is_client(&self) -> bool {
        matches!(self, NodeId::C1 | NodeId::C2)
    }

    pub fn is_server(&self) -> bool {
        matches!(self, NodeId::C3 | NodeId::C4)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl FromStr for NodeId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "C1" => Ok(NodeId::C1),
            "C2" => Ok(NodeId::C2),
            "S1" => Ok(NodeId::S1),
            "S2" => Ok(NodeId::S2),
            "C3" => Ok(NodeId::C3),
            "C4" => Ok(NodeId::C4),
            other => Err(format!("unknown node '{other}'")),
        }
    }
}
