//! Transport trait definitions.
//!
//! The validator link is a duplex byte channel. Opening a transport yields a
//! reader half and a writer half so that the read loop can block on input
//! while the poll scheduler and the policy path write through the writer
//! half concurrently.
//!
//! The methods return `impl Future + Send` so the halves can be moved into
//! spawned Tokio tasks; implementations are free to write them as plain
//! `async fn`.

use std::future::Future;
use std::time::Duration;

use crate::error::Result;

/// Factory for validator links.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use billgate_hardware::mock::MockTransport;
/// use billgate_hardware::traits::{ByteReader, ByteWriter, SerialTransport};
///
/// #[tokio::main]
/// async fn main() -> billgate_hardware::Result<()> {
///     let (mut transport, handle) = MockTransport::new();
///     let (mut reader, mut writer) = transport.open().await?;
///
///     handle.push_bytes(&[0x80]);
///     assert_eq!(reader.read_byte(Duration::from_millis(50)).await?, Some(0x80));
///
///     writer.write_byte(0x02).await?;
///     assert_eq!(handle.written(), vec![0x02]);
///
///     writer.close().await?;
///     Ok(())
/// }
/// ```
pub trait SerialTransport: Send + 'static {
    /// Inbound half of an open link.
    type Reader: ByteReader;

    /// Outbound half of an open link.
    type Writer: ByteWriter;

    /// Human-readable name used in logs.
    fn name(&self) -> &str;

    /// Open the link.
    ///
    /// # Errors
    ///
    /// Returns an error if the device cannot be opened. The caller decides
    /// whether and when to try again.
    fn open(&mut self) -> impl Future<Output = Result<(Self::Reader, Self::Writer)>> + Send;
}

/// Inbound half of a validator link.
pub trait ByteReader: Send + 'static {
    /// Read one byte, waiting at most `timeout`.
    ///
    /// Returns `Ok(None)` when the timeout elapses without data.
    ///
    /// # Errors
    ///
    /// Returns an error if the link is gone or the read fails.
    fn read_byte(&mut self, timeout: Duration) -> impl Future<Output = Result<Option<u8>>> + Send;
}

/// Outbound half of a validator link.
pub trait ByteWriter: Send + 'static {
    /// Write one byte.
    ///
    /// # Errors
    ///
    /// Returns an error if the link is closed or the write fails.
    fn write_byte(&mut self, byte: u8) -> impl Future<Output = Result<()>> + Send;

    /// Close the link. Closing an already closed link is a no-op.
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;
}
