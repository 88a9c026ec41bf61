// Channel lifecycle state

use serde::{Deserialize, Serialize};

/// Channel State
///
/// `Uninitialized -> Polling -> Ready -> Writing -> Polling -> Ready`.
/// A failed command always lands back in `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelState {
    Uninitialized,
    Polling,
    Ready,
    Writing,
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelState::Uninitialized => write!(f, "UNINITIALIZED"),
            ChannelState::Polling => write!(f, "POLLING"),
            ChannelState::Ready => write!(f, "READY"),
            ChannelState::Writing => write!(f, "WRITING"),
        }
    }
}
