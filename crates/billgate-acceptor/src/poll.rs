//! Session write path and keep-alive polling.
//!
//! Every byte written during a session goes through one [`SessionLink`]: the
//! read loop's replies, policy updates and the poll bytes of the
//! [`PollScheduler`]. The link serializes writes with an async mutex and
//! doubles as the liveness check, since closing it removes the writer.

use std::time::Duration;

use billgate_hardware::ByteWriter;
use billgate_protocol::OutboundCommand;
use tokio::sync::{Mutex, MutexGuard, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{AcceptorError, Result};

/// Write half of one session plus its ready flag.
#[derive(Debug)]
pub(crate) struct SessionLink<W> {
    writer: Mutex<Option<W>>,
    ready: watch::Sender<bool>,
}

impl<W: ByteWriter> SessionLink<W> {
    pub(crate) fn new(writer: W) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            writer: Mutex::new(Some(writer)),
            ready,
        }
    }

    /// Take the write lock. Hold it while deciding what to write so that
    /// decisions reach the wire in the order they were made.
    pub(crate) async fn lock(&self) -> MutexGuard<'_, Option<W>> {
        self.writer.lock().await
    }

    /// Signal that the device is up.
    pub(crate) fn mark_ready(&self) {
        self.ready.send_replace(true);
    }

    /// Wait until the device is up. Returns `false` on timeout.
    pub(crate) async fn wait_ready(&self, timeout: Duration) -> bool {
        let mut ready = self.ready.subscribe();
        let wait = async move { ready.wait_for(|ready| *ready).await.is_ok() };
        matches!(tokio::time::timeout(timeout, wait).await, Ok(true))
    }

    /// Close the writer. Later writes fail with [`AcceptorError::NotConnected`].
    pub(crate) async fn close(&self) {
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer
            && let Err(e) = writer.close().await
        {
            debug!(error = %e, "Error closing transport");
        }
    }
}

/// Write `commands` in order through a held write lock.
pub(crate) async fn send_commands<W: ByteWriter>(
    guard: &mut Option<W>,
    commands: &[OutboundCommand],
) -> Result<()> {
    if commands.is_empty() {
        return Ok(());
    }

    let writer = guard.as_mut().ok_or(AcceptorError::NotConnected)?;
    for command in commands {
        trace!(%command, "Writing command");
        writer.write_byte(command.byte()).await?;
    }
    Ok(())
}

/// Writes a poll byte on a fixed cadence while the session lives.
///
/// The first poll goes out one interval after start. Each tick takes the
/// write lock and checks the link is still open before writing, so no poll
/// byte follows a close. A failed write cancels the session.
#[derive(Debug)]
pub(crate) struct PollScheduler<W> {
    link: std::sync::Arc<SessionLink<W>>,
    interval: Duration,
    cancel: CancellationToken,
}

impl<W: ByteWriter> PollScheduler<W> {
    pub(crate) fn new(
        link: std::sync::Arc<SessionLink<W>>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            link,
            interval,
            cancel,
        }
    }

    /// Run on a new task.
    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(interval_ms = self.interval.as_millis() as u64, "Poll scheduler started");

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let mut guard = self.link.lock().await;
            if self.cancel.is_cancelled() || guard.is_none() {
                break;
            }
            if let Err(e) = send_commands(&mut *guard, &[OutboundCommand::Poll]).await {
                warn!(error = %e, "Poll write failed, ending session");
                self.cancel.cancel();
                break;
            }
        }

        debug!("Poll scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use billgate_hardware::SerialTransport;
    use billgate_hardware::mock::{MockTransport, MockTransportHandle, MockWriter};
    use std::sync::Arc;

    const POLL: u8 = 0x0C;

    async fn open_link() -> (Arc<SessionLink<MockWriter>>, MockTransportHandle) {
        let (mut transport, handle) = MockTransport::new();
        let (_reader, writer) = transport.open().await.unwrap();
        (Arc::new(SessionLink::new(writer)), handle)
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_on_cadence() {
        let (link, handle) = open_link().await;
        let cancel = CancellationToken::new();
        let task = PollScheduler::new(link, Duration::from_millis(400), cancel.clone()).spawn();

        tokio::time::sleep(Duration::from_millis(399)).await;
        assert!(handle.written().is_empty());

        tokio::time::sleep(Duration::from_millis(1001)).await;
        assert_eq!(handle.written(), vec![POLL, POLL, POLL]);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_poll_after_close() {
        let (link, handle) = open_link().await;
        let cancel = CancellationToken::new();
        let task =
            PollScheduler::new(Arc::clone(&link), Duration::from_millis(400), cancel.clone()).spawn();

        tokio::time::sleep(Duration::from_millis(450)).await;
        link.close().await;
        let written = handle.written();

        // The scheduler notices the closed link on its next tick and exits
        task.await.unwrap();
        assert_eq!(handle.written(), written);
        assert_eq!(written, vec![POLL]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_cancels_session() {
        let (link, handle) = open_link().await;
        let cancel = CancellationToken::new();
        handle.set_write_failure(true);

        PollScheduler::new(link, Duration::from_millis(400), cancel.clone())
            .spawn()
            .await
            .unwrap();

        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_send_commands_on_closed_link() {
        let (link, _handle) = open_link().await;
        link.close().await;

        let mut guard = link.lock().await;
        assert!(matches!(
            send_commands(&mut *guard, &[OutboundCommand::Ack]).await,
            Err(AcceptorError::NotConnected)
        ));
        // Nothing to write is never an error
        assert!(send_commands(&mut *guard, &[]).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ready() {
        let (link, _handle) = open_link().await;
        assert!(!link.wait_ready(Duration::from_millis(50)).await);

        link.mark_ready();
        assert!(link.wait_ready(Duration::from_millis(50)).await);
    }
}
