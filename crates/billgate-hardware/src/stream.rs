//! Transport over any async byte stream.
//!
//! [`StreamTransport`] adapts anything implementing `AsyncRead + AsyncWrite`
//! (a serial port opened by another crate, a TCP bridge to a remote
//! validator, an in-memory duplex pipe in tests) to [`SerialTransport`].
//! The stream is produced by an opener closure on every [`open`] call, so a
//! reconnect gets a fresh stream.
//!
//! [`open`]: SerialTransport::open

use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tracing::debug;

use crate::{
    Result, TransportError,
    traits::{ByteReader, ByteWriter, SerialTransport},
};

/// Validator link backed by an async byte stream.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use billgate_hardware::stream::StreamTransport;
/// use billgate_hardware::traits::{ByteReader, SerialTransport};
/// use tokio::io::AsyncWriteExt;
///
/// #[tokio::main]
/// async fn main() -> billgate_hardware::Result<()> {
///     let (host, mut device) = tokio::io::duplex(64);
///     let mut host = Some(host);
///
///     let mut transport = StreamTransport::new("duplex", move || {
///         let stream = host.take();
///         async move {
///             stream.ok_or_else(|| std::io::Error::other("already opened"))
///         }
///     });
///
///     let (mut reader, _writer) = transport.open().await?;
///     device.write_u8(0x80).await?;
///     assert_eq!(reader.read_byte(Duration::from_millis(50)).await?, Some(0x80));
///     Ok(())
/// }
/// ```
pub struct StreamTransport<F> {
    name: String,
    opener: F,
}

impl<F> StreamTransport<F> {
    /// Create a transport that calls `opener` to obtain a stream on each open.
    pub fn new(name: impl Into<String>, opener: F) -> Self {
        Self {
            name: name.into(),
            opener,
        }
    }
}

impl<F> std::fmt::Debug for StreamTransport<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamTransport")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<F, Fut, S> SerialTransport for StreamTransport<F>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = io::Result<S>> + Send,
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    type Reader = StreamReader<S>;
    type Writer = StreamWriter<S>;

    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&mut self) -> Result<(StreamReader<S>, StreamWriter<S>)> {
        let stream = (self.opener)()
            .await
            .map_err(|e| TransportError::open_failed(format!("{}: {e}", self.name)))?;

        let (read_half, write_half) = tokio::io::split(stream);
        debug!(device = %self.name, "Stream link opened");

        Ok((
            StreamReader {
                inner: read_half,
                name: self.name.clone(),
            },
            StreamWriter {
                inner: Some(write_half),
                name: self.name.clone(),
            },
        ))
    }
}

/// Inbound half of a [`StreamTransport`] session.
#[derive(Debug)]
pub struct StreamReader<S> {
    inner: ReadHalf<S>,
    name: String,
}

impl<S> ByteReader for StreamReader<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn read_byte(&mut self, timeout: Duration) -> Result<Option<u8>> {
        match tokio::time::timeout(timeout, self.inner.read_u8()).await {
            Ok(Ok(byte)) => Ok(Some(byte)),
            Ok(Err(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                Err(TransportError::disconnected(self.name.clone()))
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Ok(None),
        }
    }
}

/// Outbound half of a [`StreamTransport`] session.
#[derive(Debug)]
pub struct StreamWriter<S> {
    inner: Option<WriteHalf<S>>,
    name: String,
}

impl<S> ByteWriter for StreamWriter<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn write_byte(&mut self, byte: u8) -> Result<()> {
        let inner = self
            .inner
            .as_mut()
            .ok_or_else(|| TransportError::disconnected(self.name.clone()))?;

        inner
            .write_u8(byte)
            .await
            .map_err(|e| TransportError::write_failed(format!("{}: {e}", self.name)))?;
        inner
            .flush()
            .await
            .map_err(|e| TransportError::write_failed(format!("{}: {e}", self.name)))
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut inner) = self.inner.take() {
            inner.shutdown().await?;
            debug!(device = %self.name, "Stream link closed");
        }
        Ok(())
    }
}
