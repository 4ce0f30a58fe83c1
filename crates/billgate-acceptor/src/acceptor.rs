//! Bill acceptor connection lifecycle.
//!
//! [`BillAcceptor`] owns the transport and runs one session at a time. A
//! session consists of:
//!
//! - a read loop task feeding inbound bytes to the [`ProtocolStateMachine`]
//! - a [`PollScheduler`] task writing keep-alive polls
//! - a [`SessionLink`] through which every outbound byte is written
//!
//! # Locking
//!
//! Protocol state and acceptance policy share one `parking_lot` mutex, which
//! is never held across an `.await`. Outbound bytes go through the session's
//! async write lock. Whenever both are needed the write lock is taken first
//! and kept until the decided bytes are written, so the order in which the
//! state machine decides is the order the device sees.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected ──connect()──> Connecting ──open ok──> Connected <──> Faulted
//!      ^                          │                       │
//!      └──────── open failed ─────┘                       │
//!      └────── disconnect() / transport error ────────────┘
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use billgate_core::RejectReason;
use billgate_core::constants::{BILL_VALIDATED, REJECTED, STACKED};
use billgate_hardware::{ByteReader, SerialTransport};
use billgate_protocol::{InboundSignal, OutboundCommand};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use rust_decimal::Decimal;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AcceptorConfig;
use crate::error::{AcceptorError, Result};
use crate::events::{AcceptorEvent, AcceptorEvents, ConnectionState};
use crate::poll::{PollScheduler, SessionLink, send_commands};
use crate::policy::AcceptancePolicyController;
use crate::retry::{RetryPolicy, retry};
use crate::state_machine::{ProtocolState, ProtocolStateMachine, Reaction};

type Writer<T> = <T as SerialTransport>::Writer;

/// State shared by the read loop and API callers.
#[derive(Debug)]
struct Core {
    machine: ProtocolStateMachine,
    policy: AcceptancePolicyController,
}

impl Core {
    fn handle_byte(&mut self, byte: u8, now: Instant) -> Reaction {
        self.machine.handle_byte(byte, &self.policy, now)
    }
}

struct Session<W> {
    id: u64,
    link: Arc<SessionLink<W>>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

struct Inner<T: SerialTransport> {
    config: AcceptorConfig,
    device: String,
    transport: tokio::sync::Mutex<T>,
    core: parking_lot::Mutex<Core>,
    session: parking_lot::Mutex<Option<Session<Writer<T>>>>,
    connecting: parking_lot::Mutex<Option<Shared<BoxFuture<'static, bool>>>>,
    next_session: AtomicU64,
    /// Bumped by every `disconnect()`; a connect that started under an older
    /// value must not install its session.
    disconnects: AtomicU64,
    events: mpsc::UnboundedSender<AcceptorEvent>,
    state: watch::Sender<ConnectionState>,
}

/// Bill acceptor driving one validator over a [`SerialTransport`].
///
/// Cheap to clone; clones share the same device session.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use billgate_acceptor::{AcceptorConfig, AcceptorEvent, BillAcceptor};
/// use billgate_hardware::mock::MockTransport;
/// use rust_decimal::Decimal;
///
/// #[tokio::main]
/// async fn main() -> billgate_acceptor::Result<()> {
///     let (transport, device) = MockTransport::new();
///     let (acceptor, mut events) = BillAcceptor::new(transport, AcceptorConfig::default())?;
///
///     acceptor.update_remaining_amount(Decimal::from(10)).await?;
///
///     device.power_up();
///     assert!(acceptor.connect(Some(Duration::from_secs(1))).await);
///
///     device.insert_bill(0x41);
///     device.stack();
///     assert_eq!(events.recv().await, Some(AcceptorEvent::BillAccepted { amount: 10 }));
///
///     acceptor.disconnect().await;
///     Ok(())
/// }
/// ```
pub struct BillAcceptor<T: SerialTransport> {
    inner: Arc<Inner<T>>,
}

impl<T: SerialTransport> Clone for BillAcceptor<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: SerialTransport> std::fmt::Debug for BillAcceptor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BillAcceptor")
            .field("device", &self.inner.device)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<T: SerialTransport> BillAcceptor<T> {
    /// Create an acceptor and the receiver for its events.
    ///
    /// Nothing is opened until [`connect`](Self::connect).
    ///
    /// # Errors
    ///
    /// Returns [`AcceptorError::Config`] if `config` does not validate.
    pub fn new(transport: T, config: AcceptorConfig) -> Result<(Self, AcceptorEvents)> {
        config.validate()?;

        let (events_tx, events) = AcceptorEvents::channel();
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let core = Core {
            machine: ProtocolStateMachine::new(&config),
            policy: AcceptancePolicyController::new(&config.policy),
        };

        let inner = Inner {
            device: transport.name().to_string(),
            config,
            transport: tokio::sync::Mutex::new(transport),
            core: parking_lot::Mutex::new(core),
            session: parking_lot::Mutex::new(None),
            connecting: parking_lot::Mutex::new(None),
            next_session: AtomicU64::new(1),
            disconnects: AtomicU64::new(0),
            events: events_tx,
            state,
        };

        Ok((
            Self {
                inner: Arc::new(inner),
            },
            events,
        ))
    }

    /// Open the transport and start a session.
    ///
    /// With `wait_for_ready`, also waits up to that long for the device to
    /// report power-up, handshake-complete or online; if it does not, the
    /// session is torn down again. Returns `false` on any failure, never an
    /// error. Concurrent calls share a single attempt.
    pub async fn connect(&self, wait_for_ready: Option<Duration>) -> bool {
        let attempt = {
            let mut slot = self.inner.connecting.lock();
            match slot.as_ref() {
                Some(in_flight) => {
                    debug!("Joining connect attempt in flight");
                    in_flight.clone()
                }
                None => {
                    let inner = Arc::clone(&self.inner);
                    let attempt = async move {
                        let connected = inner.establish(wait_for_ready).await;
                        *inner.connecting.lock() = None;
                        connected
                    }
                    .boxed()
                    .shared();
                    *slot = Some(attempt.clone());
                    attempt
                }
            }
        };

        attempt.await
    }

    /// [`connect`](Self::connect), retried according to `policy`.
    pub async fn connect_with_retry(
        &self,
        policy: &RetryPolicy,
        wait_for_ready: Option<Duration>,
    ) -> bool {
        retry(policy, |attempt| async move {
            debug!(attempt, "Connecting");
            if self.connect(wait_for_ready).await {
                Ok(())
            } else {
                Err(AcceptorError::NotConnected)
            }
        })
        .await
        .is_ok()
    }

    /// Stop the session and close the transport.
    ///
    /// Sends a best-effort Disable first. Both background tasks have stopped
    /// when this returns. Safe to call when already disconnected. A connect
    /// still in flight gives up instead of starting a session.
    pub async fn disconnect(&self) {
        let session = {
            let mut slot = self.inner.session.lock();
            self.inner.disconnects.fetch_add(1, Ordering::AcqRel);
            slot.take()
        };
        let Some(session) = session else {
            debug!(device = %self.inner.device, "Already disconnected");
            return;
        };

        {
            let mut guard = session.link.lock().await;
            if let Err(e) = send_commands(&mut *guard, &[OutboundCommand::Disable]).await {
                debug!(error = %e, "Disable on disconnect failed");
            }
        }

        session.cancel.cancel();
        for task in session.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Session task ended abnormally");
            }
        }

        self.inner.close_session(&session.link).await;
        info!(device = %self.inner.device, "Disconnected");
    }

    /// Set the amount still owed, turning intake on or off as needed.
    ///
    /// While connected, writes Enable or Disable when intake flips; repeated
    /// updates that leave intake unchanged write nothing. While disconnected
    /// only the policy changes.
    ///
    /// # Errors
    ///
    /// Returns [`AcceptorError::Transport`] if the write fails, in which case
    /// the session is torn down.
    pub async fn update_remaining_amount(&self, amount: Decimal) -> Result<()> {
        let Some((id, link)) = self.inner.current_link() else {
            self.inner.core.lock().policy.update_remaining_amount(amount);
            return Ok(());
        };

        let mut guard = link.lock().await;
        let command = {
            let mut core = self.inner.core.lock();
            let Core { machine, policy } = &mut *core;
            policy.update_remaining_amount(amount);
            machine.reapply_policy(policy, false)
        };

        // A session closed in the meantime only keeps the policy change
        let result = match command {
            Some(command) if guard.is_some() => send_commands(&mut *guard, &[command]).await,
            _ => Ok(()),
        };
        drop(guard);

        if let Err(e) = &result {
            warn!(error = %e, "Intake update failed, ending session");
            self.inner.end_session(id).await;
        }
        result
    }

    /// Feed a synthetic bill through the state machine.
    ///
    /// Runs bill-validated and the bill-type `code`, then stacked if the
    /// engine accepted the bill or rejected if it did not, raising the same
    /// events a real bill would. The ACK or REJECT the engine decides on is
    /// not sent to the device. When not connected, raises
    /// `BillRejected(amount, not_connected)` instead.
    ///
    /// # Errors
    ///
    /// Returns [`AcceptorError::SimulationDisabled`] unless enabled in the
    /// config.
    pub async fn simulate_insert(&self, code: u8) -> Result<()> {
        if !self.inner.config.simulation_enabled {
            return Err(AcceptorError::SimulationDisabled);
        }

        let amount = self.inner.config.policy.denominations.amount(code).unwrap_or(0);
        let Some((_, link)) = self.inner.current_link() else {
            warn!(code = format_args!("0x{code:02x}"), "Simulated insert while disconnected");
            self.inner.emit(AcceptorEvent::BillRejected {
                amount,
                reason: RejectReason::NotConnected,
            });
            return Ok(());
        };

        let reactions = {
            // Serializes with the read loop
            let _guard = link.lock().await;
            let mut core = self.inner.core.lock();

            if core.machine.state().escrow_in_progress() {
                drop(core);
                warn!(
                    code = format_args!("0x{code:02x}"),
                    "Simulated insert refused while a bill is in escrow"
                );
                return Err(AcceptorError::EscrowInProgress);
            }

            if !matches!(
                core.machine.classify(code),
                InboundSignal::BillType(_) | InboundSignal::Unknown(_)
            ) {
                drop(core);
                warn!(code = format_args!("0x{code:02x}"), "Simulated bill code is a status byte");
                self.inner.emit(AcceptorEvent::BillRejected {
                    amount: 0,
                    reason: RejectReason::UnsupportedDenomination,
                });
                return Ok(());
            }

            let now = Instant::now();
            let mut reactions = vec![core.handle_byte(BILL_VALIDATED, now), core.handle_byte(code, now)];
            let outcome = if core.machine.state().pending_accepted {
                STACKED
            } else {
                REJECTED
            };
            reactions.push(core.handle_byte(outcome, now));
            reactions
        };

        for reaction in reactions {
            if !reaction.commands.is_empty() {
                debug!(commands = ?reaction.commands, "Simulated escrow commands not sent");
            }
            self.inner.publish(&link, reaction);
        }
        Ok(())
    }

    /// Amount still owed.
    pub fn remaining_amount(&self) -> Decimal {
        self.inner.core.lock().policy.remaining_amount()
    }

    /// Whether the policy wants bills (regardless of device faults).
    pub fn accepting_enabled(&self) -> bool {
        self.inner.core.lock().policy.accepting_enabled()
    }

    /// Copy of the current protocol state.
    pub fn protocol_state(&self) -> ProtocolState {
        self.inner.core.lock().machine.state().clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Watch connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Whether a session is running.
    pub fn is_connected(&self) -> bool {
        self.inner.session.lock().is_some()
    }

    pub fn config(&self) -> &AcceptorConfig {
        &self.inner.config
    }
}

impl<T: SerialTransport> Inner<T> {
    async fn establish(self: &Arc<Self>, wait_for_ready: Option<Duration>) -> bool {
        if self.session.lock().is_some() {
            debug!(device = %self.device, "Already connected");
            return true;
        }
        let generation = self.disconnects.load(Ordering::Acquire);

        self.set_state(ConnectionState::Connecting);
        info!(device = %self.device, "Opening transport");

        let opened = self.transport.lock().await.open().await;
        let (reader, writer) = match opened {
            Ok(halves) => halves,
            Err(e) => {
                warn!(device = %self.device, error = %e, "Failed to open transport");
                self.set_state(ConnectionState::Disconnected);
                return false;
            }
        };

        self.core.lock().machine.reset();

        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let link = Arc::new(SessionLink::new(writer));
        let cancel = CancellationToken::new();

        // Checked and installed under the session lock, which disconnect()
        // holds while it bumps the counter.
        let installed = {
            let mut slot = self.session.lock();
            if self.disconnects.load(Ordering::Acquire) == generation {
                self.set_state(ConnectionState::Connected);
                let tasks = vec![
                    tokio::spawn(Arc::clone(self).read_loop(
                        id,
                        reader,
                        Arc::clone(&link),
                        cancel.clone(),
                    )),
                    PollScheduler::new(Arc::clone(&link), self.config.poll_interval, cancel.clone())
                        .spawn(),
                ];
                *slot = Some(Session {
                    id,
                    link: Arc::clone(&link),
                    cancel: cancel.clone(),
                    tasks,
                });
                true
            } else {
                false
            }
        };
        if !installed {
            info!(device = %self.device, "Disconnected while opening, closing transport");
            self.close_session(&link).await;
            return false;
        }

        info!(device = %self.device, session = id, "Transport open");

        if let Some(timeout) = wait_for_ready {
            let ready = tokio::select! {
                ready = link.wait_ready(timeout) => ready,
                () = cancel.cancelled() => {
                    debug!(device = %self.device, session = id, "Session ended before device was ready");
                    return false;
                }
            };
            if !ready {
                warn!(
                    device = %self.device,
                    timeout_ms = timeout.as_millis() as u64,
                    "Device did not report ready, closing"
                );
                self.end_session(id).await;
                return false;
            }
            info!(device = %self.device, "Device ready");
        }
        true
    }

    async fn read_loop(
        self: Arc<Self>,
        id: u64,
        mut reader: T::Reader,
        link: Arc<SessionLink<Writer<T>>>,
        cancel: CancellationToken,
    ) {
        let read_timeout = self.config.read_timeout;
        debug!(session = id, "Read loop started");

        let outcome = loop {
            let read = tokio::select! {
                biased;
                () = cancel.cancelled() => break Ok(()),
                read = reader.read_byte(read_timeout) => read,
            };

            match read {
                Ok(Some(byte)) => {
                    if let Err(e) = self.process_byte(&link, byte).await {
                        break Err(e);
                    }
                }
                Ok(None) => self.core.lock().machine.on_idle(Instant::now()),
                Err(e) => break Err(AcceptorError::from(e)),
            }
        };

        match outcome {
            Ok(()) => debug!(session = id, "Read loop cancelled"),
            Err(e) => warn!(session = id, error = %e, "Read loop stopped"),
        }
        self.end_session(id).await;
    }

    /// Decide and write the reaction to one byte under the write lock.
    async fn process_byte(&self, link: &SessionLink<Writer<T>>, byte: u8) -> Result<()> {
        let mut guard = link.lock().await;
        let reaction = self.core.lock().handle_byte(byte, Instant::now());
        let written = send_commands(&mut *guard, &reaction.commands).await;
        drop(guard);

        self.publish(link, reaction);
        written
    }

    fn publish(&self, link: &SessionLink<Writer<T>>, reaction: Reaction) {
        if let Some(event) = reaction.event {
            self.emit(event);
        }
        if let Some(state) = reaction.connection {
            self.set_state(state);
        }
        if reaction.ready {
            link.mark_ready();
        }
    }

    fn emit(&self, event: AcceptorEvent) {
        info!(device = %self.device, %event, "Acceptor event");
        if self.events.send(event).is_err() {
            debug!("Event receiver dropped");
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            debug!(from = %current, to = %state, "Connection state changed");
            *current = state;
            true
        });
    }

    fn current_link(&self) -> Option<(u64, Arc<SessionLink<Writer<T>>>)> {
        self.session
            .lock()
            .as_ref()
            .map(|session| (session.id, Arc::clone(&session.link)))
    }

    /// Tear down session `id` if it is still the current one.
    ///
    /// Used when the session ends from inside: a transport error, a failed
    /// write, or a device that never reported ready.
    async fn end_session(&self, id: u64) {
        let session = {
            let mut slot = self.session.lock();
            let current = slot.as_ref().is_some_and(|session| session.id == id);
            if current { slot.take() } else { None }
        };
        let Some(session) = session else {
            return;
        };

        session.cancel.cancel();
        self.close_session(&session.link).await;
        warn!(device = %self.device, session = id, "Session ended");
    }

    async fn close_session(&self, link: &SessionLink<Writer<T>>) {
        link.close().await;
        self.core.lock().machine.reset();
        self.set_state(ConnectionState::Disconnected);
    }
}
