//! Host to device commands.

use std::fmt;

use billgate_core::constants::{ACK, DISABLE, ENABLE, POLL, REJECT};
use serde::{Deserialize, Serialize};

/// A single-byte command sent from the host to the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboundCommand {
    /// Acknowledge a status report; accepts the bill when sent after a bill-type byte.
    Ack,
    /// Start accepting bills.
    Enable,
    /// Stop accepting bills.
    Disable,
    /// Keep-alive.
    Poll,
    /// Return the escrowed bill.
    Reject,
}

impl OutboundCommand {
    /// Wire byte for this command.
    #[must_use]
    pub fn byte(self) -> u8 {
        match self {
            Self::Ack => ACK,
            Self::Enable => ENABLE,
            Self::Disable => DISABLE,
            Self::Poll => POLL,
            Self::Reject => REJECT,
        }
    }

    /// Parse a command from its wire byte.
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            ACK => Some(Self::Ack),
            ENABLE => Some(Self::Enable),
            DISABLE => Some(Self::Disable),
            POLL => Some(Self::Poll),
            REJECT => Some(Self::Reject),
            _ => None,
        }
    }

    /// Enable or Disable, depending on whether intake should be on.
    #[must_use]
    pub fn intake(accepting: bool) -> Self {
        if accepting { Self::Enable } else { Self::Disable }
    }
}

impl fmt::Display for OutboundCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ack => "ACK",
            Self::Enable => "ENABLE",
            Self::Disable => "DISABLE",
            Self::Poll => "POLL",
            Self::Reject => "REJECT",
        };
        write!(f, "{name}(0x{:02x})", self.byte())
    }
}
