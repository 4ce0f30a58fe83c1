//! Acceptance policy: what is still owed and whether intake is on.

use std::collections::BTreeSet;

use billgate_core::{AcceptancePolicyConfig, BillAmount};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::debug;

/// Read-only view of the policy taken at decision time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicySnapshot {
    pub remaining_amount_due: Decimal,
    pub accepting_enabled: bool,
    pub allowed_denominations: BTreeSet<BillAmount>,
}

/// Holds the remaining amount due and the intake flag derived from it.
///
/// The flag is recomputed synchronously on every update, so a decision taken
/// right after [`update_remaining_amount`](Self::update_remaining_amount)
/// always sees the new value.
///
/// # Examples
///
/// ```
/// use billgate_acceptor::AcceptancePolicyController;
/// use billgate_core::AcceptancePolicyConfig;
/// use rust_decimal::Decimal;
///
/// let mut policy = AcceptancePolicyController::new(&AcceptancePolicyConfig::default());
/// assert!(!policy.accepting_enabled());
///
/// policy.update_remaining_amount(Decimal::new(1500, 2));
/// assert!(policy.accepting_enabled());
///
/// // Negative input clamps to zero
/// policy.update_remaining_amount(Decimal::from(-3));
/// assert_eq!(policy.remaining_amount(), Decimal::ZERO);
/// assert!(!policy.accepting_enabled());
/// ```
#[derive(Debug, Clone)]
pub struct AcceptancePolicyController {
    remaining_amount_due: Decimal,
    accepting_enabled: bool,
    allowed_denominations: BTreeSet<BillAmount>,
}

impl AcceptancePolicyController {
    /// Start with nothing owed and intake off.
    pub fn new(config: &AcceptancePolicyConfig) -> Self {
        Self {
            remaining_amount_due: Decimal::ZERO,
            accepting_enabled: false,
            allowed_denominations: config.allowed_denominations.clone(),
        }
    }

    /// Set the amount still owed.
    ///
    /// Negative amounts clamp to zero. Returns `true` if the intake flag
    /// changed.
    pub fn update_remaining_amount(&mut self, amount: Decimal) -> bool {
        let remaining = amount.max(Decimal::ZERO);
        let accepting = remaining > Decimal::ZERO;
        let changed = accepting != self.accepting_enabled;

        self.remaining_amount_due = remaining;
        self.accepting_enabled = accepting;

        debug!(
            remaining = %remaining,
            accepting,
            changed,
            "Remaining amount updated"
        );
        changed
    }

    #[must_use]
    pub fn remaining_amount(&self) -> Decimal {
        self.remaining_amount_due
    }

    #[must_use]
    pub fn accepting_enabled(&self) -> bool {
        self.accepting_enabled
    }

    pub fn allowed_denominations(&self) -> &BTreeSet<BillAmount> {
        &self.allowed_denominations
    }

    /// Copy of the current policy for the decision engine.
    #[must_use]
    pub fn snapshot(&self) -> PolicySnapshot {
        PolicySnapshot {
            remaining_amount_due: self.remaining_amount_due,
            accepting_enabled: self.accepting_enabled,
            allowed_denominations: self.allowed_denominations.clone(),
        }
    }
}
