//! Control messages posted to the worker by a page.

use std::fmt;
use std::str::FromStr;

/// Payload that asks a waiting generation to activate immediately.
pub const SKIP_WAITING: &str = "SKIP_WAITING";

/// A recognised control command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// Activate the waiting generation without waiting for clients to close.
    SkipWaiting,
}

impl FromStr for ControlMessage {
    type Err = UnknownMessage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            SKIP_WAITING => Ok(Self::SkipWaiting),
            other => Err(UnknownMessage(other.to_string())),
        }
    }
}

impl fmt::Display for ControlMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlMessage::SkipWaiting => f.write_str(SKIP_WAITING),
        }
    }
}

/// A message payload the worker does not act on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown control message: {0:?}")]
pub struct UnknownMessage(pub String);
