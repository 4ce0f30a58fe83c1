//! Bill validator protocol state machine.
//!
//! [`ProtocolStateMachine`] turns each inbound byte into exactly one
//! [`Reaction`]: the commands to write back (in order), at most one consumer
//! event, and any change to the published connection state. It performs no
//! I/O; the caller writes the commands while holding the transport write
//! lock, so the order decisions are made in is the order they reach the wire.
//!
//! # Transitions
//!
//! | Signal | Condition | Action |
//! |--------|-----------|--------|
//! | power-up | any | reset; ACK; reapply policy (forced) |
//! | handshake-complete | any | mark complete; clear fault; reapply (forced) |
//! | online | no handshake this cycle, no escrow | ACK; reapply (forced) |
//! | bill-validated | any | arm escrow, clear pending decision |
//! | bill-type | escrow already decided | ignore duplicate |
//! | bill-type | otherwise | decide; ACK or REJECT |
//! | stacked | any | clear; `BillAccepted` if the bill was accepted |
//! | rejected | bill was accepted | clear; `BillRejected(amount, error)` |
//! | rejected | otherwise | clear; `BillRejected(amount, reason)` |
//! | fault | any | reset; mark faulted; reapply (forced, Disable); `BillRejected(0, fault)` |
//!
//! While the escrow is armed, a byte with no other meaning is treated as the
//! bill-type byte, so the engine always answers an escrowed bill.
//!
//! # Examples
//!
//! ```
//! use billgate_acceptor::{AcceptancePolicyController, AcceptorConfig, AcceptorEvent, ProtocolStateMachine};
//! use billgate_protocol::OutboundCommand;
//! use rust_decimal::Decimal;
//! use tokio::time::Instant;
//!
//! let config = AcceptorConfig::default();
//! let mut machine = ProtocolStateMachine::new(&config);
//! let mut policy = AcceptancePolicyController::new(&config.policy);
//! policy.update_remaining_amount(Decimal::from(10));
//!
//! let now = Instant::now();
//! let reaction = machine.handle_byte(0x80, &policy, now);
//! assert_eq!(reaction.commands, vec![OutboundCommand::Ack, OutboundCommand::Enable]);
//!
//! machine.handle_byte(0x81, &policy, now);
//! let reaction = machine.handle_byte(0x41, &policy, now);
//! assert_eq!(reaction.commands, vec![OutboundCommand::Ack]);
//!
//! let reaction = machine.handle_byte(0x10, &policy, now);
//! assert_eq!(reaction.event, Some(AcceptorEvent::BillAccepted { amount: 10 }));
//! ```

use std::time::Duration;

use billgate_core::{BillAmount, DenominationMap, RejectReason};
use billgate_protocol::{InboundSignal, OutboundCommand, SignalTable};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::AcceptorConfig;
use crate::escrow::{Decision, decide};
use crate::events::{AcceptorEvent, ConnectionState};
use crate::policy::AcceptancePolicyController;

/// Mutable protocol state, reset on reconnect, power-up and fault.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtocolState {
    /// Bill-validated seen; the bill-type byte is due.
    pub expecting_bill_type: bool,
    /// Mapped amount of the bill in escrow.
    pub pending_amount: Option<BillAmount>,
    /// Why the engine rejected the bill in escrow.
    pub pending_reject_reason: Option<RejectReason>,
    /// ACK already sent for the bill in escrow.
    pub pending_accepted: bool,
    /// Last intake state written to the device.
    pub last_applied_accepting: Option<bool>,
    /// ACK already sent for an online report this cycle.
    pub handshake_sent: bool,
    pub handshake_complete: bool,
    /// Fault code reported by the device, until it recovers.
    pub faulted: Option<u8>,
    /// When the escrow was armed.
    pub armed_at: Option<Instant>,
}

impl ProtocolState {
    fn clear_escrow(&mut self) {
        self.expecting_bill_type = false;
        self.pending_amount = None;
        self.pending_reject_reason = None;
        self.pending_accepted = false;
        self.armed_at = None;
    }

    /// Whether the engine already answered the bill in escrow.
    fn escrow_decided(&self) -> bool {
        self.pending_accepted || self.pending_reject_reason.is_some()
    }

    /// Whether a bill is between bill-validated and its stacked or rejected report.
    pub fn escrow_in_progress(&self) -> bool {
        self.expecting_bill_type || self.pending_amount.is_some() || self.escrow_decided()
    }
}

/// Everything one inbound byte causes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reaction {
    /// Commands to write, in order.
    pub commands: Vec<OutboundCommand>,
    /// Event for the consumer.
    pub event: Option<AcceptorEvent>,
    /// New connection state to publish.
    pub connection: Option<ConnectionState>,
    /// The device signalled it is up.
    pub ready: bool,
}

impl Reaction {
    fn push(&mut self, command: Option<OutboundCommand>) {
        self.commands.extend(command);
    }
}

/// Table-driven protocol state machine.
#[derive(Debug, Clone)]
pub struct ProtocolStateMachine {
    signals: SignalTable,
    denominations: DenominationMap,
    escrow_arm_timeout: Duration,
    state: ProtocolState,
}

impl ProtocolStateMachine {
    pub fn new(config: &AcceptorConfig) -> Self {
        Self {
            signals: SignalTable::new(&config.policy.denominations, &config.online_signals),
            denominations: config.policy.denominations.clone(),
            escrow_arm_timeout: config.escrow_arm_timeout,
            state: ProtocolState::default(),
        }
    }

    pub fn state(&self) -> &ProtocolState {
        &self.state
    }

    /// Classify a byte without changing state.
    #[must_use]
    pub fn classify(&self, byte: u8) -> InboundSignal {
        self.signals.classify(byte)
    }

    /// Forget everything, including what was last written to the device.
    pub fn reset(&mut self) {
        self.state = ProtocolState::default();
    }

    /// Intake state the device should be in: on when money is owed and the
    /// device is not faulted.
    #[must_use]
    pub fn effective_accepting(&self, policy: &AcceptancePolicyController) -> bool {
        policy.accepting_enabled() && self.state.faulted.is_none()
    }

    /// Command needed to bring the device in line with `accepting`.
    ///
    /// Without `force`, nothing is returned when the device already has that
    /// state. With `force`, the command is returned regardless.
    pub fn reapply(&mut self, accepting: bool, force: bool) -> Option<OutboundCommand> {
        if !force && self.state.last_applied_accepting == Some(accepting) {
            trace!(accepting, "Intake state unchanged, write suppressed");
            return None;
        }

        self.state.last_applied_accepting = Some(accepting);
        debug!(accepting, force, "Applying intake state");
        Some(OutboundCommand::intake(accepting))
    }

    /// [`reapply`](Self::reapply) with the effective intake state for `policy`.
    pub fn reapply_policy(
        &mut self,
        policy: &AcceptancePolicyController,
        force: bool,
    ) -> Option<OutboundCommand> {
        let accepting = self.effective_accepting(policy);
        self.reapply(accepting, force)
    }

    /// Disarm an escrow whose bill-type byte never arrived.
    pub fn on_idle(&mut self, now: Instant) {
        if let Some(armed_at) = self.state.armed_at
            && self.state.expecting_bill_type
            && now.saturating_duration_since(armed_at) >= self.escrow_arm_timeout
        {
            warn!(
                timeout_ms = self.escrow_arm_timeout.as_millis() as u64,
                "No bill type received after bill validated, disarming escrow"
            );
            self.state.expecting_bill_type = false;
            self.state.armed_at = None;
        }
    }

    /// Process one inbound byte.
    pub fn handle_byte(
        &mut self,
        byte: u8,
        policy: &AcceptancePolicyController,
        now: Instant,
    ) -> Reaction {
        self.on_idle(now);

        let signal = match self.signals.classify(byte) {
            InboundSignal::Unknown(code) if self.state.expecting_bill_type => {
                InboundSignal::BillType(code)
            }
            signal => signal,
        };
        trace!(byte = format_args!("0x{byte:02x}"), signal = signal.name(), "Inbound byte");

        let mut reaction = Reaction::default();
        match signal {
            InboundSignal::PowerUp => self.on_power_up(policy, &mut reaction),
            InboundSignal::HandshakeComplete => self.on_handshake_complete(policy, &mut reaction),
            InboundSignal::Online(code) => self.on_online(code, policy, &mut reaction),
            InboundSignal::BillValidated => self.on_bill_validated(now),
            InboundSignal::BillType(code) => self.on_bill_type(code, policy, &mut reaction),
            InboundSignal::Stacked => self.on_stacked(&mut reaction),
            InboundSignal::Rejected => self.on_rejected(&mut reaction),
            InboundSignal::Fault(code) => self.on_fault(code, policy, &mut reaction),
            InboundSignal::Unknown(code) => {
                trace!(byte = format_args!("0x{code:02x}"), "Ignoring unknown byte");
            }
        }
        reaction
    }

    fn on_power_up(&mut self, policy: &AcceptancePolicyController, reaction: &mut Reaction) {
        info!("Device powered up");
        self.reset();
        reaction.push(Some(OutboundCommand::Ack));
        reaction.push(self.reapply_policy(policy, true));
        self.state.handshake_sent = true;
        reaction.connection = Some(ConnectionState::Connected);
        reaction.ready = true;
    }

    fn on_handshake_complete(
        &mut self,
        policy: &AcceptancePolicyController,
        reaction: &mut Reaction,
    ) {
        info!("Handshake complete");
        self.state.expecting_bill_type = false;
        self.state.handshake_complete = true;
        self.state.handshake_sent = true;
        self.state.faulted = None;
        reaction.push(self.reapply_policy(policy, true));
        reaction.connection = Some(ConnectionState::Connected);
        reaction.ready = true;
    }

    fn on_online(&mut self, code: u8, policy: &AcceptancePolicyController, reaction: &mut Reaction) {
        let escrow_in_progress = self.state.escrow_in_progress();
        self.state.expecting_bill_type = false;

        if self.state.handshake_sent || escrow_in_progress {
            trace!(
                byte = format_args!("0x{code:02x}"),
                handshake_sent = self.state.handshake_sent,
                escrow_in_progress,
                "Online report ignored"
            );
            return;
        }

        info!(byte = format_args!("0x{code:02x}"), "Device online");
        reaction.push(Some(OutboundCommand::Ack));
        reaction.push(self.reapply_policy(policy, true));
        self.state.handshake_sent = true;
        if self.state.faulted.is_none() {
            reaction.connection = Some(ConnectionState::Connected);
        }
        reaction.ready = true;
    }

    fn on_bill_validated(&mut self, now: Instant) {
        if let Some(amount) = self.state.pending_amount {
            warn!(
                amount,
                accepted = self.state.pending_accepted,
                "New escrow while previous bill unresolved"
            );
        }
        debug!("Bill in escrow, waiting for bill type");
        self.state.clear_escrow();
        self.state.expecting_bill_type = true;
        self.state.armed_at = Some(now);
    }

    fn on_bill_type(&mut self, code: u8, policy: &AcceptancePolicyController, reaction: &mut Reaction) {
        if self.state.escrow_decided() {
            debug!(
                code = format_args!("0x{code:02x}"),
                accepted = self.state.pending_accepted,
                "Duplicate bill type ignored"
            );
            return;
        }

        let mut snapshot = policy.snapshot();
        snapshot.accepting_enabled = self.effective_accepting(policy);
        let decision = decide(code, &self.denominations, &snapshot);
        self.state.expecting_bill_type = false;
        self.state.armed_at = None;
        self.state.pending_amount = decision.amount();

        match decision {
            Decision::Accept { amount } => {
                info!(code = format_args!("0x{code:02x}"), amount, "Accepting bill");
                self.state.pending_accepted = true;
                self.state.pending_reject_reason = None;
            }
            Decision::Reject { amount, reason } => {
                info!(
                    code = format_args!("0x{code:02x}"),
                    amount = amount.unwrap_or(0),
                    %reason,
                    "Rejecting bill"
                );
                self.state.pending_accepted = false;
                self.state.pending_reject_reason = Some(reason);
            }
        }
        reaction.push(Some(decision.command()));
    }

    fn on_stacked(&mut self, reaction: &mut Reaction) {
        let amount = self.state.pending_amount;
        let accepted = self.state.pending_accepted;
        self.state.clear_escrow();

        match amount {
            Some(amount) if accepted && amount > 0 => {
                info!(amount, "Bill stacked");
                reaction.event = Some(AcceptorEvent::BillAccepted { amount });
            }
            _ => warn!(?amount, accepted, "Stacked without an accepted bill in escrow"),
        }
    }

    fn on_rejected(&mut self, reaction: &mut Reaction) {
        let amount = self.state.pending_amount.unwrap_or(0);
        let accepted = self.state.pending_accepted;
        let reason = if accepted {
            warn!(amount, "Device rejected a bill the host accepted");
            RejectReason::Error
        } else {
            self.state
                .pending_reject_reason
                .unwrap_or(RejectReason::Rejected)
        };
        self.state.clear_escrow();

        info!(amount, %reason, "Bill returned");
        reaction.event = Some(AcceptorEvent::BillRejected { amount, reason });
    }

    fn on_fault(&mut self, code: u8, policy: &AcceptancePolicyController, reaction: &mut Reaction) {
        if let Some(amount) = self.state.pending_amount {
            warn!(amount, "Fault with bill in escrow, escrow abandoned");
        }
        warn!(code = format_args!("0x{code:02x}"), "Device fault");

        self.reset();
        self.state.faulted = Some(code);
        reaction.push(self.reapply_policy(policy, true));
        reaction.event = Some(AcceptorEvent::BillRejected {
            amount: 0,
            reason: RejectReason::Fault(code),
        });
        reaction.connection = Some(ConnectionState::Faulted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use billgate_core::AcceptancePolicyConfig;
    use rust_decimal::Decimal;
    use billgate_protocol::OutboundCommand::{Ack, Disable, Enable, Reject};

    struct Harness {
        machine: ProtocolStateMachine,
        policy: AcceptancePolicyController,
        now: Instant,
    }

    impl Harness {
        fn new(remaining: i64) -> Self {
            Self::with_config(AcceptorConfig::default(), remaining)
        }

        fn with_config(config: AcceptorConfig, remaining: i64) -> Self {
            let mut policy = AcceptancePolicyController::new(&config.policy);
            policy.update_remaining_amount(Decimal::from(remaining));
            Self {
                machine: ProtocolStateMachine::new(&config),
                policy,
                now: Instant::now(),
            }
        }

        fn feed(&mut self, byte: u8) -> Reaction {
            self.machine.handle_byte(byte, &self.policy, self.now)
        }

        /// Feed bytes and collect every command and event.
        fn run(&mut self, bytes: &[u8]) -> (Vec<OutboundCommand>, Vec<AcceptorEvent>) {
            let mut commands = Vec::new();
            let mut events = Vec::new();
            for &byte in bytes {
                let reaction = self.feed(byte);
                commands.extend(reaction.commands);
                events.extend(reaction.event);
            }
            (commands, events)
        }
    }

    #[test]
    fn test_power_up_acks_and_forces_policy() {
        let mut h = Harness::new(10);
        let reaction = h.feed(0x80);

        assert_eq!(reaction.commands, vec![Ack, Enable]);
        assert!(reaction.ready);
        assert_eq!(reaction.connection, Some(ConnectionState::Connected));
        assert!(h.machine.state().handshake_sent);
        assert_eq!(h.machine.state().last_applied_accepting, Some(true));
    }

    #[test]
    fn test_power_up_resets_escrow() {
        let mut h = Harness::new(10);
        h.run(&[0x80, 0x81, 0x40]);
        assert!(h.machine.state().pending_accepted);

        let reaction = h.feed(0x80);
        assert_eq!(reaction.commands, vec![Ack, Enable]);
        assert_eq!(h.machine.state().pending_amount, None);
        assert!(!h.machine.state().pending_accepted);
    }

    #[test]
    fn test_handshake_complete_forces_policy() {
        let mut h = Harness::new(0);
        h.feed(0x80);
        let reaction = h.feed(0x8F);

        assert_eq!(reaction.commands, vec![Disable]);
        assert!(reaction.ready);
        assert!(h.machine.state().handshake_complete);
    }

    #[test]
    fn test_online_acks_once_per_cycle() {
        let mut h = Harness::new(10);

        let first = h.feed(0x3F);
        assert_eq!(first.commands, vec![Ack, Enable]);
        assert!(first.ready);

        let second = h.feed(0x3F);
        assert!(second.commands.is_empty());
        assert!(!second.ready);
    }

    #[test]
    fn test_online_ignored_during_escrow() {
        let mut h = Harness::new(10);
        h.feed(0x81);
        let reaction = h.feed(0x3F);

        assert!(reaction.commands.is_empty());
        // A recognized signal disarms the escrow
        assert!(!h.machine.state().expecting_bill_type);
    }

    #[test]
    fn test_online_after_power_up_ignored() {
        let mut h = Harness::new(10);
        h.feed(0x80);
        assert!(h.feed(0x3F).commands.is_empty());
    }

    #[test]
    fn test_accepted_bill_round_trip() {
        let mut h = Harness::new(10);
        let (commands, events) = h.run(&[0x80, 0x8F, 0x81, 0x41, 0x10]);

        assert_eq!(commands, vec![Ack, Enable, Enable, Ack]);
        assert_eq!(events, vec![AcceptorEvent::BillAccepted { amount: 10 }]);
        assert_eq!(h.machine.state().pending_amount, None);
    }

    #[test]
    fn test_escrow_in_progress() {
        let mut h = Harness::new(10);
        assert!(!h.machine.state().escrow_in_progress());

        h.feed(0x81);
        assert!(h.machine.state().escrow_in_progress());
        h.feed(0x41);
        assert!(h.machine.state().escrow_in_progress());
        h.feed(0x10);
        assert!(!h.machine.state().escrow_in_progress());
    }

    #[test]
    fn test_rejected_bill_round_trip() {
        let mut h = Harness::new(15);
        let (commands, events) = h.run(&[0x81, 0x42, 0x11]);

        assert_eq!(commands, vec![Reject]);
        assert_eq!(
            events,
            vec![AcceptorEvent::BillRejected {
                amount: 20,
                reason: RejectReason::Overpayment
            }]
        );
    }

    #[test]
    fn test_duplicate_accepted_bill_type_ignored() {
        let mut h = Harness::new(10);
        let (commands, events) = h.run(&[0x81, 0x41, 0x41, 0x10]);

        assert_eq!(commands, vec![Ack]);
        assert_eq!(events, vec![AcceptorEvent::BillAccepted { amount: 10 }]);
    }

    #[test]
    fn test_duplicate_rejected_bill_type_ignored() {
        let mut h = Harness::new(5);
        let (commands, events) = h.run(&[0x81, 0x42, 0x42, 0x11]);

        assert_eq!(commands, vec![Reject]);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_unknown_byte_while_armed_is_rejected() {
        let mut h = Harness::new(100);
        let (commands, events) = h.run(&[0x81, 0x55, 0x11]);

        assert_eq!(commands, vec![Reject]);
        assert_eq!(
            events,
            vec![AcceptorEvent::BillRejected {
                amount: 0,
                reason: RejectReason::UnsupportedDenomination
            }]
        );
    }

    #[test]
    fn test_unknown_byte_while_idle_ignored() {
        let mut h = Harness::new(100);
        let reaction = h.feed(0x55);
        assert_eq!(reaction, Reaction::default());
    }

    #[test]
    fn test_device_rejects_accepted_bill() {
        let mut h = Harness::new(10);
        let (_, events) = h.run(&[0x81, 0x40, 0x11]);

        assert_eq!(
            events,
            vec![AcceptorEvent::BillRejected {
                amount: 5,
                reason: RejectReason::Error
            }]
        );
    }

    #[test]
    fn test_rejected_without_escrow() {
        let mut h = Harness::new(10);
        let reaction = h.feed(0x11);
        assert_eq!(
            reaction.event,
            Some(AcceptorEvent::BillRejected {
                amount: 0,
                reason: RejectReason::Rejected
            })
        );
    }

    #[test]
    fn test_stacked_without_acceptance_raises_nothing() {
        let mut h = Harness::new(5);
        let (_, events) = h.run(&[0x81, 0x42, 0x10]);
        assert!(events.is_empty());
        assert_eq!(h.machine.state(), &ProtocolState::default());
    }

    #[test]
    fn test_fault_abandons_accepted_escrow() {
        let mut h = Harness::new(10);
        let (commands, events) = h.run(&[0x80, 0x81, 0x40, 0x20, 0x10]);

        assert_eq!(commands, vec![Ack, Enable, Ack, Disable]);
        assert_eq!(
            events,
            vec![AcceptorEvent::BillRejected {
                amount: 0,
                reason: RejectReason::Fault(0x20)
            }]
        );
        assert_eq!(h.machine.state().pending_amount, None);
        assert_eq!(h.machine.state().faulted, Some(0x20));
    }

    #[test]
    fn test_fault_reports_faulted_state() {
        let mut h = Harness::new(10);
        let reaction = h.feed(0x2A);
        assert_eq!(reaction.connection, Some(ConnectionState::Faulted));
        assert_eq!(reaction.commands, vec![Disable]);
    }

    #[test]
    fn test_handshake_complete_clears_fault() {
        let mut h = Harness::new(10);
        h.run(&[0x80, 0x21]);
        assert!(!h.machine.effective_accepting(&h.policy));

        let reaction = h.feed(0x8F);
        assert_eq!(reaction.commands, vec![Enable]);
        assert_eq!(reaction.connection, Some(ConnectionState::Connected));
        assert_eq!(h.machine.state().faulted, None);
    }

    #[test]
    fn test_online_while_faulted_keeps_intake_off() {
        let mut h = Harness::new(10);
        h.feed(0x21);
        let reaction = h.feed(0x3F);

        assert_eq!(reaction.commands, vec![Ack, Disable]);
        assert_eq!(reaction.connection, None);
    }

    #[test]
    fn test_bill_rejected_while_faulted() {
        let mut h = Harness::new(10);
        let (commands, events) = h.run(&[0x22, 0x81, 0x40, 0x11]);

        assert_eq!(commands, vec![Disable, Reject]);
        assert_eq!(
            events.last(),
            Some(&AcceptorEvent::BillRejected {
                amount: 5,
                reason: RejectReason::IntakeDisabled
            })
        );
    }

    #[test]
    fn test_write_suppression() {
        let mut h = Harness::new(10);
        h.feed(0x80);

        assert_eq!(h.machine.reapply(true, false), None);
        assert_eq!(h.machine.reapply(false, false), Some(Disable));
        assert_eq!(h.machine.reapply(false, false), None);
        assert_eq!(h.machine.reapply(false, true), Some(Disable));
    }

    #[test]
    fn test_escrow_arm_timeout() {
        let mut h = Harness::new(10);
        h.feed(0x81);
        assert!(h.machine.state().expecting_bill_type);

        h.machine.on_idle(h.now + Duration::from_millis(1999));
        assert!(h.machine.state().expecting_bill_type);

        h.machine.on_idle(h.now + Duration::from_secs(2));
        assert!(!h.machine.state().expecting_bill_type);

        // The late byte is now just an unknown byte
        h.now += Duration::from_secs(3);
        assert_eq!(h.feed(0x55), Reaction::default());
    }

    #[test]
    fn test_custom_online_signal() {
        let config = AcceptorConfig::default().with_online_signals([0x3E]);
        let mut h = Harness::with_config(config, 0);

        assert_eq!(h.feed(0x3E).commands, vec![Ack, Disable]);
        assert_eq!(h.feed(0x3F), Reaction::default());
    }

    #[test]
    fn test_allow_list_precedes_balance() {
        let config = AcceptorConfig::default()
            .with_policy(AcceptancePolicyConfig::default().with_allowed([5, 10]));
        let mut h = Harness::with_config(config, 15);
        let (commands, events) = h.run(&[0x81, 0x42, 0x11]);

        assert_eq!(commands, vec![Reject]);
        assert_eq!(
            events,
            vec![AcceptorEvent::BillRejected {
                amount: 20,
                reason: RejectReason::UnsupportedDenomination
            }]
        );
    }
}
