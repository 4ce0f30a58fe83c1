//! Shared helpers for the acceptor integration tests.
//!
//! Every test drives a [`BillAcceptor`] against a [`MockTransport`] and plays
//! the device through its [`MockTransportHandle`]. Tests run on a paused
//! clock, so poll bytes show up in the write log whenever virtual time
//! advances; [`commands`] strips them before comparing.

#![allow(dead_code)]

use std::time::Duration;

use billgate_acceptor::{AcceptorConfig, AcceptorEvent, AcceptorEvents, BillAcceptor};
use billgate_core::constants::POLL;
use billgate_hardware::mock::{MockTransport, MockTransportHandle};
use rust_decimal::Decimal;

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(2);

/// Command bytes, named for readable assertions.
pub mod bytes {
    pub const ACK: u8 = 0x02;
    pub const ENABLE: u8 = 0x3E;
    pub const DISABLE: u8 = 0x5E;
    pub const REJECT: u8 = 0x0F;
}

pub struct Rig {
    pub acceptor: BillAcceptor<MockTransport>,
    pub events: AcceptorEvents,
    pub device: MockTransportHandle,
}

impl Rig {
    /// Acceptor with `remaining` owed, not yet connected.
    pub async fn new(config: AcceptorConfig, remaining: i64) -> Self {
        let (transport, device) = MockTransport::new();
        let (acceptor, events) = BillAcceptor::new(transport, config).unwrap();
        acceptor
            .update_remaining_amount(Decimal::from(remaining))
            .await
            .unwrap();
        Self {
            acceptor,
            events,
            device,
        }
    }

    /// Acceptor with `remaining` owed, connected to a powered-up device.
    pub async fn connected(config: AcceptorConfig, remaining: i64) -> Self {
        let rig = Self::new(config, remaining).await;
        rig.device.power_up();
        assert!(rig.acceptor.connect(Some(WAIT)).await, "device never came up");
        rig
    }

    /// Next event, failing the test if none arrives in time.
    pub async fn next_event(&mut self) -> AcceptorEvent {
        tokio::time::timeout(WAIT, self.events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event stream closed")
    }

    /// Assert no event is queued after letting the acceptor catch up.
    pub async fn assert_no_event(&mut self) {
        settle().await;
        assert_eq!(self.events.try_recv(), None);
    }

    /// Wait until the non-poll writes from `since` on equal `expected`.
    pub async fn expect_commands(&self, since: usize, expected: &[u8]) {
        let matched = self
            .device
            .wait_for_written(WAIT, |written| {
                commands(written.get(since..).unwrap_or_default()) == expected
            })
            .await;
        assert!(
            matched,
            "expected {expected:02x?}, got {:02x?}",
            commands(&self.device.written_since(since))
        );
    }

    /// Current length of the write log.
    pub fn mark(&self) -> usize {
        self.device.written().len()
    }
}

/// Write log without poll bytes.
pub fn commands(written: &[u8]) -> Vec<u8> {
    written.iter().copied().filter(|&byte| byte != POLL).collect()
}

/// Let spawned tasks run without advancing much virtual time.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// Wait until the acceptor publishes `state`.
pub async fn wait_for_state(
    acceptor: &BillAcceptor<MockTransport>,
    state: billgate_acceptor::ConnectionState,
) -> bool {
    let mut rx = acceptor.subscribe_state();
    let wait = async { rx.wait_for(|current| *current == state).await.is_ok() };
    let reached = tokio::time::timeout(WAIT, wait).await;
    matches!(reached, Ok(true))
}
