//! Escrow decision engine.
//!
//! [`decide`] is a pure function of the bill-type code, the denomination map
//! and a [`PolicySnapshot`]. The rules are checked in a fixed order and the
//! first one that matches wins:
//!
//! | # | Condition | Outcome |
//! |---|-----------|---------|
//! | 1 | code not in the map | reject `unsupported_denomination`, no amount |
//! | 2 | intake disabled | reject `intake_disabled` |
//! | 3 | mapped amount ≤ 0 | reject `invalid_amount` |
//! | 4 | allow-list set and amount not in it | reject `unsupported_denomination` |
//! | 5 | nothing owed | reject `no_balance_due` |
//! | 6 | amount exceeds what is owed | reject `overpayment` |
//! | 7 | otherwise | accept |

use billgate_core::{BillAmount, DenominationMap, RejectReason};
use billgate_protocol::OutboundCommand;
use rust_decimal::Decimal;

use crate::policy::PolicySnapshot;

/// Result of an escrow decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Stack the bill.
    Accept { amount: BillAmount },
    /// Return the bill. `amount` is unset when the code is not mapped.
    Reject {
        amount: Option<BillAmount>,
        reason: RejectReason,
    },
}

impl Decision {
    #[must_use]
    pub fn is_accept(&self) -> bool {
        matches!(self, Self::Accept { .. })
    }

    /// Mapped amount of the bill, if known.
    #[must_use]
    pub fn amount(&self) -> Option<BillAmount> {
        match self {
            Self::Accept { amount } => Some(*amount),
            Self::Reject { amount, .. } => *amount,
        }
    }

    #[must_use]
    pub fn reason(&self) -> Option<RejectReason> {
        match self {
            Self::Accept { .. } => None,
            Self::Reject { reason, .. } => Some(*reason),
        }
    }

    /// Command that carries this decision to the device.
    #[must_use]
    pub fn command(&self) -> OutboundCommand {
        if self.is_accept() {
            OutboundCommand::Ack
        } else {
            OutboundCommand::Reject
        }
    }
}

/// Decide whether to stack or return the escrowed bill of type `code`.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeSet;
/// use billgate_acceptor::escrow::{Decision, decide};
/// use billgate_acceptor::PolicySnapshot;
/// use billgate_core::{DenominationMap, RejectReason};
/// use rust_decimal::Decimal;
///
/// let map = DenominationMap::default();
/// let policy = PolicySnapshot {
///     remaining_amount_due: Decimal::from(15),
///     accepting_enabled: true,
///     allowed_denominations: BTreeSet::new(),
/// };
///
/// assert_eq!(decide(0x41, &map, &policy), Decision::Accept { amount: 10 });
/// assert_eq!(
///     decide(0x42, &map, &policy),
///     Decision::Reject { amount: Some(20), reason: RejectReason::Overpayment }
/// );
/// ```
#[must_use]
pub fn decide(code: u8, denominations: &DenominationMap, policy: &PolicySnapshot) -> Decision {
    let Some(amount) = denominations.amount(code) else {
        return Decision::Reject {
            amount: None,
            reason: RejectReason::UnsupportedDenomination,
        };
    };

    let reject = |reason| Decision::Reject {
        amount: Some(amount),
        reason,
    };

    if !policy.accepting_enabled {
        return reject(RejectReason::IntakeDisabled);
    }
    if amount <= 0 {
        return reject(RejectReason::InvalidAmount);
    }
    if !policy.allowed_denominations.is_empty() && !policy.allowed_denominations.contains(&amount)
    {
        return reject(RejectReason::UnsupportedDenomination);
    }
    if policy.remaining_amount_due <= Decimal::ZERO {
        return reject(RejectReason::NoBalanceDue);
    }
    if Decimal::from(amount) > policy.remaining_amount_due {
        return reject(RejectReason::Overpayment);
    }

    Decision::Accept { amount }
}
