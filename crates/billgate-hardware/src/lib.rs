//! Byte transport layer for the billgate bill-acceptor engine.
//!
//! The validator speaks a single-byte protocol over a serial line. This crate
//! abstracts that line behind three small traits so the protocol engine never
//! touches a concrete port:
//!
//! - [`SerialTransport`] opens a link and hands back its two halves.
//! - [`ByteReader`] reads one byte with a timeout.
//! - [`ByteWriter`] writes one byte and closes the link.
//!
//! Two implementations ship with the crate:
//!
//! - [`mock::MockTransport`], a scripted device for tests and the simulator.
//! - [`stream::StreamTransport`], which adapts any `AsyncRead + AsyncWrite`
//!   stream.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use billgate_hardware::{ByteReader, ByteWriter, SerialTransport};
//! use billgate_hardware::mock::MockTransport;
//!
//! #[tokio::main]
//! async fn main() -> billgate_hardware::Result<()> {
//!     let (mut transport, handle) = MockTransport::new();
//!     handle.power_up();
//!
//!     let (mut reader, mut writer) = transport.open().await?;
//!     if reader.read_byte(Duration::from_millis(50)).await? == Some(0x80) {
//!         writer.write_byte(0x02).await?;
//!     }
//!
//!     assert_eq!(handle.written(), vec![0x02]);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod mock;
pub mod stream;
pub mod traits;

pub use error::{Result, TransportError};
pub use traits::{ByteReader, ByteWriter, SerialTransport};
