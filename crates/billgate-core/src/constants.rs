//! Wire-level constants for the bill validator serial protocol.
//!
//! The validator speaks a single-byte protocol: every command the host sends
//! and every status the device reports is exactly one byte. There is no
//! framing, checksum or length prefix, which is why the host has to be
//! tolerant of unknown bytes and duplicated status reports.
//!
//! # Byte Map
//!
//! | Byte | Direction | Meaning |
//! |------|-----------|---------|
//! | `0x02` | host → device | ACK |
//! | `0x3E` | host → device | Enable bill intake |
//! | `0x5E` | host → device | Disable bill intake |
//! | `0x0C` | host → device | Poll (keep-alive) |
//! | `0x0F` | host → device | Reject the escrowed bill |
//! | `0x80` | device → host | Power-up |
//! | `0x8F` | device → host | Handshake complete |
//! | `0x3F` | device → host | Online indicator |
//! | `0x81` | device → host | Bill validated (bill-type byte follows) |
//! | `0x40`-`0x42` | device → host | Bill type codes |
//! | `0x10` | device → host | Bill stacked |
//! | `0x11` | device → host | Bill rejected |
//! | `0x20`-`0x2A` | device → host | Fault codes |
//!
//! # Usage
//!
//! ```
//! use billgate_core::constants::*;
//!
//! assert!(FAULT_CODES.contains(&0x25));
//! assert!(!FAULT_CODES.contains(&STACKED));
//! ```

use std::ops::RangeInclusive;

// ============================================================================
// Host → Device Commands
// ============================================================================

/// Acknowledge the last device status (also accepts an escrowed bill).
pub const ACK: u8 = 0x02;

/// Enable bill intake.
pub const ENABLE: u8 = 0x3E;

/// Disable bill intake.
pub const DISABLE: u8 = 0x5E;

/// Keep-alive poll. The device drops offline when it stops seeing polls.
pub const POLL: u8 = 0x0C;

/// Return the escrowed bill to the customer.
pub const REJECT: u8 = 0x0F;

// ============================================================================
// Device → Host Status
// ============================================================================

/// Device finished booting and waits for an ACK.
pub const POWER_UP: u8 = 0x80;

/// Device confirms the handshake and is online.
pub const HANDSHAKE_COMPLETE: u8 = 0x8F;

/// Alternative online indicator reported by later firmware revisions.
pub const ONLINE: u8 = 0x3F;

/// A bill was validated and moved into escrow; the bill-type byte follows.
pub const BILL_VALIDATED: u8 = 0x81;

/// The escrowed bill was stacked into the cash box.
pub const STACKED: u8 = 0x10;

/// The escrowed bill was returned to the customer.
pub const REJECTED: u8 = 0x11;

/// Fault codes (jams, sensor failures, cash box problems).
pub const FAULT_CODES: RangeInclusive<u8> = 0x20..=0x2A;

// ============================================================================
// Default Denominations
// ============================================================================

/// Bill type code for the 5 unit bill.
pub const BILL_TYPE_5: u8 = 0x40;

/// Bill type code for the 10 unit bill.
pub const BILL_TYPE_10: u8 = 0x41;

/// Bill type code for the 20 unit bill.
pub const BILL_TYPE_20: u8 = 0x42;

// ============================================================================
// Timing Defaults
// ============================================================================

/// Default keep-alive poll interval in milliseconds.
///
/// The device tolerates 300-500 ms between polls.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 400;

/// Default read timeout in milliseconds.
///
/// Short enough that the read loop notices cancellation promptly.
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 100;

/// Default time allowed between bill-validated and the bill-type byte.
pub const DEFAULT_ESCROW_ARM_TIMEOUT_MS: u64 = 2_000;
