//! Mock validator link for testing and development.
//!
//! [`MockTransport`] behaves like a serial port with a scripted device on the
//! other end. The paired [`MockTransportHandle`] plays the device: it pushes
//! status bytes to the host, records every byte the host writes, and can make
//! opens or writes fail or pull the cable.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use billgate_core::constants::{
    BILL_VALIDATED, HANDSHAKE_COMPLETE, ONLINE, POWER_UP, REJECTED, STACKED,
};
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};
use tracing::debug;

use crate::{
    Result, TransportError,
    traits::{ByteReader, ByteWriter, SerialTransport},
};

#[derive(Debug, Default)]
struct LinkState {
    /// Sender feeding the reader of the current session.
    inbound_tx: Option<mpsc::UnboundedSender<u8>>,
    /// Bytes pushed while no session was open, delivered on the next open.
    pending: VecDeque<u8>,
    /// Every byte the host wrote, across sessions.
    written: Vec<u8>,
    open: bool,
    session: u64,
    open_count: usize,
    failing_opens: usize,
    fail_writes: bool,
    /// How long each open takes before it succeeds or fails.
    open_delay: Duration,
}

#[derive(Debug)]
struct Shared {
    name: String,
    state: Mutex<LinkState>,
    changed: Notify,
}

/// Mock validator link.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use billgate_hardware::mock::MockTransport;
/// use billgate_hardware::traits::{ByteReader, SerialTransport};
///
/// #[tokio::main]
/// async fn main() -> billgate_hardware::Result<()> {
///     let (mut transport, handle) = MockTransport::new();
///
///     // Bytes pushed before the link opens are delivered once it does
///     handle.power_up();
///
///     let (mut reader, _writer) = transport.open().await?;
///     assert_eq!(reader.read_byte(Duration::from_millis(10)).await?, Some(0x80));
///     assert_eq!(reader.read_byte(Duration::from_millis(10)).await?, None);
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct MockTransport {
    shared: Arc<Shared>,
}

impl MockTransport {
    /// Create a new mock link with the default name.
    pub fn new() -> (Self, MockTransportHandle) {
        Self::with_name("Mock Validator")
    }

    /// Create a new mock link with a custom name.
    pub fn with_name(name: impl Into<String>) -> (Self, MockTransportHandle) {
        let shared = Arc::new(Shared {
            name: name.into(),
            state: Mutex::new(LinkState::default()),
            changed: Notify::new(),
        });

        let transport = Self {
            shared: Arc::clone(&shared),
        };
        (transport, MockTransportHandle { shared })
    }
}

impl SerialTransport for MockTransport {
    type Reader = MockReader;
    type Writer = MockWriter;

    fn name(&self) -> &str {
        &self.shared.name
    }

    async fn open(&mut self) -> Result<(MockReader, MockWriter)> {
        let delay = self.shared.state.lock().open_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let (reader, writer) = {
            let mut state = self.shared.state.lock();
            state.open_count += 1;

            if state.failing_opens > 0 {
                state.failing_opens -= 1;
                return Err(TransportError::open_failed(format!(
                    "{}: device not present",
                    self.shared.name
                )));
            }

            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
            for byte in state.pending.drain(..) {
                // Receiver is alive in this scope
                let _ = inbound_tx.send(byte);
            }

            state.session += 1;
            state.open = true;
            state.inbound_tx = Some(inbound_tx);

            let reader = MockReader {
                inbound_rx,
                name: self.shared.name.clone(),
            };
            let writer = MockWriter {
                shared: Arc::clone(&self.shared),
                session: state.session,
            };
            (reader, writer)
        };

        debug!(device = %self.shared.name, "Mock link opened");
        self.shared.changed.notify_waiters();
        Ok((reader, writer))
    }
}

/// Inbound half of a [`MockTransport`] session.
#[derive(Debug)]
pub struct MockReader {
    inbound_rx: mpsc::UnboundedReceiver<u8>,
    name: String,
}

impl ByteReader for MockReader {
    async fn read_byte(&mut self, timeout: Duration) -> Result<Option<u8>> {
        match tokio::time::timeout(timeout, self.inbound_rx.recv()).await {
            Ok(Some(byte)) => Ok(Some(byte)),
            Ok(None) => Err(TransportError::disconnected(self.name.clone())),
            Err(_) => Ok(None),
        }
    }
}

/// Outbound half of a [`MockTransport`] session.
#[derive(Debug)]
pub struct MockWriter {
    shared: Arc<Shared>,
    session: u64,
}

impl ByteWriter for MockWriter {
    async fn write_byte(&mut self, byte: u8) -> Result<()> {
        {
            let mut state = self.shared.state.lock();
            if !state.open || state.session != self.session {
                return Err(TransportError::disconnected(self.shared.name.clone()));
            }
            if state.fail_writes {
                return Err(TransportError::write_failed(format!(
                    "{}: write of 0x{byte:02x} failed",
                    self.shared.name
                )));
            }
            state.written.push(byte);
        }

        self.shared.changed.notify_waiters();
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        {
            let mut state = self.shared.state.lock();
            if !state.open || state.session != self.session {
                return Ok(());
            }
            state.open = false;
            state.inbound_tx = None;
        }

        debug!(device = %self.shared.name, "Mock link closed");
        self.shared.changed.notify_waiters();
        Ok(())
    }
}

/// Handle playing the device side of a [`MockTransport`].
///
/// Can be cloned and shared across tasks.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use billgate_hardware::mock::MockTransport;
/// use billgate_hardware::traits::{ByteWriter, SerialTransport};
///
/// #[tokio::main]
/// async fn main() -> billgate_hardware::Result<()> {
///     let (mut transport, handle) = MockTransport::new();
///     let (_reader, mut writer) = transport.open().await?;
///
///     writer.write_byte(0x3E).await?;
///     assert!(handle.wait_for_written(Duration::from_millis(10), |w| w == [0x3E]).await);
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct MockTransportHandle {
    shared: Arc<Shared>,
}

impl MockTransportHandle {
    /// Send status bytes to the host.
    ///
    /// While no session is open the bytes are buffered and delivered when
    /// the host next opens the link.
    pub fn push_bytes(&self, bytes: &[u8]) {
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        match &state.inbound_tx {
            Some(tx) => {
                for &byte in bytes {
                    // A dropped reader is a session the host already gave up on
                    let _ = tx.send(byte);
                }
            }
            None => state.pending.extend(bytes),
        }
    }

    /// Device rebooted.
    pub fn power_up(&self) {
        self.push_bytes(&[POWER_UP]);
    }

    /// Device confirmed the handshake.
    pub fn handshake_complete(&self) {
        self.push_bytes(&[HANDSHAKE_COMPLETE]);
    }

    /// Device reports online with the default indicator byte.
    pub fn online(&self) {
        self.push_bytes(&[ONLINE]);
    }

    /// A bill of `code` entered escrow.
    pub fn insert_bill(&self, code: u8) {
        self.push_bytes(&[BILL_VALIDATED, code]);
    }

    /// The escrowed bill was stacked.
    pub fn stack(&self) {
        self.push_bytes(&[STACKED]);
    }

    /// The escrowed bill was returned.
    pub fn reject(&self) {
        self.push_bytes(&[REJECTED]);
    }

    /// Report a hardware fault.
    pub fn fault(&self, code: u8) {
        self.push_bytes(&[code]);
    }

    /// All bytes written by the host so far.
    pub fn written(&self) -> Vec<u8> {
        self.shared.state.lock().written.clone()
    }

    /// Bytes written by the host from `index` on.
    pub fn written_since(&self, index: usize) -> Vec<u8> {
        let state = self.shared.state.lock();
        state.written.get(index..).map(<[u8]>::to_vec).unwrap_or_default()
    }

    /// Forget the recorded writes.
    pub fn clear_written(&self) {
        self.shared.state.lock().written.clear();
    }

    /// Wait until the recorded writes satisfy `predicate`.
    ///
    /// Returns `false` if `timeout` elapses first.
    pub async fn wait_for_written<F>(&self, timeout: Duration, mut predicate: F) -> bool
    where
        F: FnMut(&[u8]) -> bool,
    {
        let wait = async {
            loop {
                let notified = self.shared.changed.notified();
                let done = predicate(&self.shared.state.lock().written);
                if done {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }

    /// Wait until the link is open or closed, as requested.
    ///
    /// Returns `false` if `timeout` elapses first.
    pub async fn wait_for_open(&self, open: bool, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.shared.changed.notified();
                let done = self.shared.state.lock().open == open;
                if done {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }

    /// Whether a session is currently open.
    pub fn is_open(&self) -> bool {
        self.shared.state.lock().open
    }

    /// Number of open attempts, failed ones included.
    pub fn open_count(&self) -> usize {
        self.shared.state.lock().open_count
    }

    /// Make the next `count` open attempts fail.
    pub fn fail_next_opens(&self, count: usize) {
        self.shared.state.lock().failing_opens = count;
    }

    /// Make every open take `delay` before it completes.
    pub fn set_open_delay(&self, delay: Duration) {
        self.shared.state.lock().open_delay = delay;
    }

    /// Make every write fail until turned off again.
    pub fn set_write_failure(&self, fail: bool) {
        self.shared.state.lock().fail_writes = fail;
    }

    /// Pull the cable: the reader sees a disconnect and writes fail.
    pub fn drop_link(&self) {
        {
            let mut state = self.shared.state.lock();
            state.open = false;
            state.inbound_tx = None;
        }
        debug!(device = %self.shared.name, "Mock link dropped");
        self.shared.changed.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHORT: Duration = Duration::from_millis(20);

    #[tokio::test]
    async fn test_pending_bytes_delivered_on_open() {
        let (mut transport, handle) = MockTransport::new();
        handle.power_up();
        handle.insert_bill(0x41);

        let (mut reader, _writer) = transport.open().await.unwrap();
        assert_eq!(reader.read_byte(SHORT).await.unwrap(), Some(POWER_UP));
        assert_eq!(reader.read_byte(SHORT).await.unwrap(), Some(BILL_VALIDATED));
        assert_eq!(reader.read_byte(SHORT).await.unwrap(), Some(0x41));
        assert_eq!(reader.read_byte(SHORT).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_writes_recorded() {
        let (mut transport, handle) = MockTransport::new();
        let (_reader, mut writer) = transport.open().await.unwrap();

        writer.write_byte(0x02).await.unwrap();
        writer.write_byte(0x3E).await.unwrap();

        assert_eq!(handle.written(), vec![0x02, 0x3E]);
        assert_eq!(handle.written_since(1), vec![0x3E]);
        assert!(handle.written_since(5).is_empty());

        handle.clear_written();
        assert!(handle.written().is_empty());
    }

    #[tokio::test]
    async fn test_failing_opens() {
        let (mut transport, handle) = MockTransport::new();
        handle.fail_next_opens(2);

        assert!(matches!(
            transport.open().await,
            Err(TransportError::OpenFailed { .. })
        ));
        assert!(transport.open().await.is_err());
        assert!(transport.open().await.is_ok());
        assert_eq!(handle.open_count(), 3);
        assert!(handle.is_open());
    }

    #[tokio::test]
    async fn test_write_failure() {
        let (mut transport, handle) = MockTransport::new();
        let (_reader, mut writer) = transport.open().await.unwrap();

        handle.set_write_failure(true);
        assert!(matches!(
            writer.write_byte(0x0C).await,
            Err(TransportError::WriteFailed { .. })
        ));

        handle.set_write_failure(false);
        writer.write_byte(0x0C).await.unwrap();
        assert_eq!(handle.written(), vec![0x0C]);
    }

    #[tokio::test]
    async fn test_drop_link() {
        let (mut transport, handle) = MockTransport::new();
        let (mut reader, mut writer) = transport.open().await.unwrap();

        handle.drop_link();

        assert!(!handle.is_open());
        assert!(reader.read_byte(SHORT).await.unwrap_err().is_disconnect());
        assert!(writer.write_byte(0x0C).await.unwrap_err().is_disconnect());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (mut transport, handle) = MockTransport::new();
        let (mut reader, mut writer) = transport.open().await.unwrap();

        writer.close().await.unwrap();
        writer.close().await.unwrap();

        assert!(!handle.is_open());
        assert!(reader.read_byte(SHORT).await.is_err());
    }

    #[tokio::test]
    async fn test_stale_writer_rejected_after_reopen() {
        let (mut transport, handle) = MockTransport::new();
        let (_old_reader, mut old_writer) = transport.open().await.unwrap();
        let (_reader, mut writer) = transport.open().await.unwrap();

        assert!(old_writer.write_byte(0x0C).await.is_err());
        // Closing the stale writer leaves the new session alone
        old_writer.close().await.unwrap();
        assert!(handle.is_open());
        writer.write_byte(0x0C).await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_written() {
        let (mut transport, handle) = MockTransport::new();
        let (_reader, mut writer) = transport.open().await.unwrap();

        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move {
                handle
                    .wait_for_written(Duration::from_secs(1), |written| written.len() == 2)
                    .await
            })
        };

        writer.write_byte(0x02).await.unwrap();
        writer.write_byte(0x02).await.unwrap();
        assert!(waiter.await.unwrap());

        assert!(!handle.wait_for_written(SHORT, |written| written.len() == 3).await);
    }

    #[tokio::test]
    async fn test_wait_for_open() {
        let (mut transport, handle) = MockTransport::new();
        assert!(!handle.wait_for_open(true, SHORT).await);

        let (_reader, _writer) = transport.open().await.unwrap();
        assert!(handle.wait_for_open(true, SHORT).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_delay() {
        let (mut transport, handle) = MockTransport::new();
        handle.set_open_delay(Duration::from_millis(100));

        let started = tokio::time::Instant::now();
        let (_reader, _writer) = transport.open().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(handle.is_open());
    }

    #[test]
    fn test_name() {
        let (transport, _handle) = MockTransport::with_name("Validator A");
        assert_eq!(transport.name(), "Validator A");
    }
}
