//! Shard status state machine
//!
//! ```text
//!   Ready ⇄ ReadOnly
//!     │        │
//!     └──drop──┴──▶ Dropped (terminal)
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ShardStatus {
    #[default]
    Ready,
    ReadOnly,
    Dropped,
}

impl ShardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShardStatus::Ready => "READY",
            ShardStatus::ReadOnly => "READONLY",
            ShardStatus::Dropped => "DROPPED",
        }
    }

    /// Object writes and property additions are allowed
    pub fn allows_writes(&self) -> bool {
        matches!(self, ShardStatus::Ready)
    }

    /// Transitions reachable through a status update. Reaching `Dropped`
    /// takes a drop, and nothing leaves it.
    pub fn can_transition_to(&self, next: ShardStatus) -> bool {
        match (self, next) {
            (ShardStatus::Dropped, _) | (_, ShardStatus::Dropped) => false,
            _ => true,
        }
    }
}

impl fmt::Display for ShardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShardStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "READY" => Ok(ShardStatus::Ready),
            "READONLY" => Ok(ShardStatus::ReadOnly),
            "DROPPED" => Ok(ShardStatus::Dropped),
            other => Err(format!("unknown shard status: {}", other)),
        }
    }
}
