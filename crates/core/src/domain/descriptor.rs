// Value descriptors and port specifications

use serde::{Deserialize, Serialize};

/// Port value type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortType {
    Boolean,
    Number,
}

impl std::fmt::Display for PortType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortType::Boolean => write!(f, "boolean"),
            PortType::Number => write!(f, "number"),
        }
    }
}

/// One logical value multiplexed through a channel's commands.
///
/// The position of a descriptor in the channel's list decides which
/// capture group of the output pattern feeds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueDescriptor {
    pub id: String,
    #[serde(rename = "type")]
    pub port_type: PortType,
}

impl ValueDescriptor {
    pub fn new(id: impl Into<String>, port_type: PortType) -> Self {
        Self {
            id: id.into(),
            port_type,
        }
    }

    pub fn boolean(id: impl Into<String>) -> Self {
        Self::new(id, PortType::Boolean)
    }

    pub fn number(id: impl Into<String>) -> Self {
        Self::new(id, PortType::Number)
    }
}

/// What the port registry needs to instantiate one addressable port
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub port_type: PortType,
    pub writable: bool,
}
