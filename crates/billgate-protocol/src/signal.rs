//! Inbound signal classification.
//!
//! Device status bytes are classified by an ordered list of rules.
//! Each rule pairs a byte matcher (an exact byte or an inclusive range)
//! with the constructor of the signal it yields; the first matching rule
//! wins. The rules are evaluated once, when the table is built, into a
//! 256-entry lookup array, so classification at runtime is an index.
//!
//! Rule order:
//!
//! 1. fixed status bytes (power-up, handshake, bill-validated, stacked, rejected)
//! 2. configured online indicators
//! 3. bill-type codes from the denomination map
//! 4. the fault-code range
//!
//! Anything else is [`InboundSignal::Unknown`].

use std::fmt;
use std::ops::RangeInclusive;

use billgate_core::DenominationMap;
use billgate_core::constants::{
    BILL_VALIDATED, FAULT_CODES, HANDSHAKE_COMPLETE, ONLINE, POWER_UP, REJECTED, STACKED,
};

/// A classified device status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InboundSignal {
    /// Device rebooted and waits for an ACK.
    PowerUp,
    /// Device confirmed the handshake.
    HandshakeComplete,
    /// Device reports it is online (carries the indicator byte seen).
    Online(u8),
    /// Bill moved into escrow; the bill-type byte follows.
    BillValidated,
    /// Bill-type code of the escrowed bill.
    BillType(u8),
    /// Escrowed bill stacked.
    Stacked,
    /// Escrowed bill returned.
    Rejected,
    /// Hardware fault code.
    Fault(u8),
    /// Byte with no meaning to the host.
    Unknown(u8),
}

impl InboundSignal {
    /// Raw wire byte this signal was classified from.
    #[must_use]
    pub fn byte(self) -> u8 {
        match self {
            Self::PowerUp => POWER_UP,
            Self::HandshakeComplete => HANDSHAKE_COMPLETE,
            Self::BillValidated => BILL_VALIDATED,
            Self::Stacked => STACKED,
            Self::Rejected => REJECTED,
            Self::Online(byte) | Self::BillType(byte) | Self::Fault(byte) | Self::Unknown(byte) => {
                byte
            }
        }
    }

    /// Short lowercase name, used in log fields.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::PowerUp => "power_up",
            Self::HandshakeComplete => "handshake_complete",
            Self::Online(_) => "online",
            Self::BillValidated => "bill_validated",
            Self::BillType(_) => "bill_type",
            Self::Stacked => "stacked",
            Self::Rejected => "rejected",
            Self::Fault(_) => "fault",
            Self::Unknown(_) => "unknown",
        }
    }

}

impl fmt::Display for InboundSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:02x})", self.name(), self.byte())
    }
}

/// Byte predicate of a classification rule.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ByteMatcher {
    /// Exactly this byte.
    Exact(u8),
    /// Any byte in the inclusive range.
    Range(RangeInclusive<u8>),
}

impl ByteMatcher {
    fn matches(&self, byte: u8) -> bool {
        match self {
            Self::Exact(expected) => *expected == byte,
            Self::Range(range) => range.contains(&byte),
        }
    }
}

/// One entry of the classification table.
#[derive(Debug, Clone)]
struct SignalRule {
    /// Which bytes this rule claims.
    matcher: ByteMatcher,
    /// Builds the signal from the matched byte.
    signal: fn(u8) -> InboundSignal,
}

impl SignalRule {
    fn exact(byte: u8, signal: fn(u8) -> InboundSignal) -> Self {
        Self {
            matcher: ByteMatcher::Exact(byte),
            signal,
        }
    }
}

/// Table-driven classifier from wire byte to [`InboundSignal`].
#[derive(Debug, Clone)]
pub struct SignalTable {
    lookup: [InboundSignal; 256],
}

impl SignalTable {
    /// Build the table for a denomination map and set of online indicator bytes.
    ///
    /// # Examples
    ///
    /// ```
    /// use billgate_core::DenominationMap;
    /// use billgate_protocol::{InboundSignal, SignalTable};
    ///
    /// let map = DenominationMap::new([(0x50, 50)]).unwrap();
    /// let table = SignalTable::new(&map, &[0x3E]);
    ///
    /// assert_eq!(table.classify(0x50), InboundSignal::BillType(0x50));
    /// assert_eq!(table.classify(0x3E), InboundSignal::Online(0x3E));
    /// // 0x40 is not a bill type in this map
    /// assert_eq!(table.classify(0x40), InboundSignal::Unknown(0x40));
    /// ```
    pub fn new(denominations: &DenominationMap, online_signals: &[u8]) -> Self {
        let mut rules = vec![
            SignalRule::exact(POWER_UP, |_| InboundSignal::PowerUp),
            SignalRule::exact(HANDSHAKE_COMPLETE, |_| InboundSignal::HandshakeComplete),
            SignalRule::exact(BILL_VALIDATED, |_| InboundSignal::BillValidated),
            SignalRule::exact(STACKED, |_| InboundSignal::Stacked),
            SignalRule::exact(REJECTED, |_| InboundSignal::Rejected),
        ];

        rules.extend(
            online_signals
                .iter()
                .map(|&byte| SignalRule::exact(byte, InboundSignal::Online)),
        );
        rules.extend(
            denominations
                .iter()
                .map(|(code, _)| SignalRule::exact(code, InboundSignal::BillType)),
        );
        rules.push(SignalRule {
            matcher: ByteMatcher::Range(FAULT_CODES),
            signal: InboundSignal::Fault,
        });

        let lookup: [InboundSignal; 256] = std::array::from_fn(|index| {
            let byte = index as u8;
            rules
                .iter()
                .find(|rule| rule.matcher.matches(byte))
                .map_or(InboundSignal::Unknown(byte), |rule| (rule.signal)(byte))
        });

        Self { lookup }
    }

    /// Classify one inbound byte.
    #[must_use]
    pub fn classify(&self, byte: u8) -> InboundSignal {
        self.lookup[usize::from(byte)]
    }
}

impl Default for SignalTable {
    fn default() -> Self {
        Self::new(&DenominationMap::default(), &[ONLINE])
    }
}
