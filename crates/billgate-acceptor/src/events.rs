//! Consumer-facing events and connection state.

use std::fmt;

use billgate_core::{BillAmount, RejectReason};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Outcome of one escrowed bill.
///
/// # Examples
///
/// ```
/// use billgate_acceptor::AcceptorEvent;
/// use billgate_core::RejectReason;
///
/// let event = AcceptorEvent::BillRejected {
///     amount: 20,
///     reason: RejectReason::Overpayment,
/// };
/// assert_eq!(
///     serde_json::to_string(&event).unwrap(),
///     r#"{"type":"bill_rejected","amount":20,"reason":"overpayment"}"#
/// );
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AcceptorEvent {
    /// The bill was stacked and should be credited.
    BillAccepted { amount: BillAmount },

    /// The bill was returned or the escrow was abandoned.
    BillRejected {
        amount: BillAmount,
        reason: RejectReason,
    },
}

impl AcceptorEvent {
    /// Amount carried by the event.
    #[must_use]
    pub fn amount(&self) -> BillAmount {
        match self {
            Self::BillAccepted { amount } | Self::BillRejected { amount, .. } => *amount,
        }
    }

    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::BillAccepted { .. })
    }
}

impl fmt::Display for AcceptorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BillAccepted { amount } => write!(f, "BillAccepted({amount})"),
            Self::BillRejected { amount, reason } => write!(f, "BillRejected({amount}, {reason})"),
        }
    }
}

/// Receiving end of the acceptor's event stream.
///
/// Events arrive in the order the device bytes that caused them were read.
/// The channel is unbounded so the read loop never waits on a slow consumer.
#[derive(Debug)]
pub struct AcceptorEvents {
    rx: mpsc::UnboundedReceiver<AcceptorEvent>,
}

impl AcceptorEvents {
    pub(crate) fn channel() -> (mpsc::UnboundedSender<AcceptorEvent>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    /// Wait for the next event.
    ///
    /// Returns `None` once every [`BillAcceptor`](crate::BillAcceptor) clone
    /// has been dropped and the backlog is drained.
    pub async fn recv(&mut self) -> Option<AcceptorEvent> {
        self.rx.recv().await
    }

    /// Take the next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<AcceptorEvent> {
        self.rx.try_recv().ok()
    }
}

/// Link state published through [`BillAcceptor::subscribe_state`](crate::BillAcceptor::subscribe_state).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No session.
    #[default]
    Disconnected,
    /// Opening the transport.
    Connecting,
    /// Session running.
    Connected,
    /// Session running but the device reported a fault; intake is off.
    Faulted,
}

impl ConnectionState {
    /// Whether the transport is open, faulted or not.
    #[must_use]
    pub fn is_open(self) -> bool {
        matches!(self, Self::Connected | Self::Faulted)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Faulted => "Faulted",
        };
        write!(f, "{state}")
    }
}
