//! Wire vocabulary of the bill validator protocol.
//!
//! The validator protocol is a stream of single bytes in both directions.
//! This crate turns inbound bytes into named [`InboundSignal`]s through a
//! table-driven classifier ([`SignalTable`]) and names the host commands
//! ([`OutboundCommand`]). It holds no state: sequencing lives in the
//! acceptor crate's state machine.
//!
//! # Example
//!
//! ```
//! use billgate_protocol::{InboundSignal, OutboundCommand, SignalTable};
//!
//! let table = SignalTable::default();
//!
//! assert_eq!(table.classify(0x80), InboundSignal::PowerUp);
//! assert_eq!(table.classify(0x41), InboundSignal::BillType(0x41));
//! assert_eq!(table.classify(0x22), InboundSignal::Fault(0x22));
//! assert_eq!(table.classify(0x99), InboundSignal::Unknown(0x99));
//!
//! assert_eq!(OutboundCommand::Ack.byte(), 0x02);
//! ```

pub mod command;
pub mod signal;

pub use command::OutboundCommand;
pub use signal::{InboundSignal, SignalTable};
