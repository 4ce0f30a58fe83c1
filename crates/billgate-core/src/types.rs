use crate::{
    Result,
    constants::{
        BILL_TYPE_5, BILL_TYPE_10, BILL_TYPE_20, BILL_VALIDATED, FAULT_CODES, HANDSHAKE_COMPLETE,
        POWER_UP, REJECTED, STACKED,
    },
    error::Error,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Bill value in the smallest named currency unit (5, 10, 20, ...).
pub type BillAmount = i64;

/// Fixed mapping from a bill-type code to the amount it represents.
///
/// The map is validated on construction: codes must be unique and must not
/// shadow a device status byte, otherwise the signal classifier could not
/// tell a bill-type report from a status report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DenominationMap(BTreeMap<u8, BillAmount>);

impl DenominationMap {
    /// Create a denomination map from `(code, amount)` pairs.
    ///
    /// # Errors
    /// Returns an error if the list is empty, a code appears twice, or a code
    /// collides with a device status byte.
    pub fn new(entries: impl IntoIterator<Item = (u8, BillAmount)>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for (code, amount) in entries {
            if map.insert(code, amount).is_some() {
                return Err(Error::DuplicateBillCode(code));
            }
        }
        let map = Self(map);
        map.validate()?;
        Ok(map)
    }

    /// Re-check the invariants enforced by [`DenominationMap::new`].
    ///
    /// Needed after deserialization, which bypasses the constructor.
    pub fn validate(&self) -> Result<()> {
        if self.0.is_empty() {
            return Err(Error::EmptyDenominationMap);
        }
        for &code in self.0.keys() {
            if let Some(signal) = reserved_signal_name(code) {
                return Err(Error::ReservedBillCode { code, signal });
            }
        }
        Ok(())
    }

    /// Amount for a bill-type code, if the code is mapped.
    #[must_use]
    pub fn amount(&self, code: u8) -> Option<BillAmount> {
        self.0.get(&code).copied()
    }

    #[must_use]
    pub fn contains_code(&self, code: u8) -> bool {
        self.0.contains_key(&code)
    }

    /// Check whether any code maps to `amount`.
    #[must_use]
    pub fn contains_amount(&self, amount: BillAmount) -> bool {
        self.0.values().any(|&value| value == amount)
    }

    /// Iterate `(code, amount)` pairs in code order.
    pub fn iter(&self) -> impl Iterator<Item = (u8, BillAmount)> + '_ {
        self.0.iter().map(|(&code, &amount)| (code, amount))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for DenominationMap {
    fn default() -> Self {
        Self(BTreeMap::from([
            (BILL_TYPE_5, 5),
            (BILL_TYPE_10, 10),
            (BILL_TYPE_20, 20),
        ]))
    }
}

/// Name of the status signal a byte is reserved for, if any.
pub fn reserved_signal_name(code: u8) -> Option<&'static str> {
    match code {
        POWER_UP => Some("power-up"),
        HANDSHAKE_COMPLETE => Some("handshake-complete"),
        BILL_VALIDATED => Some("bill-validated"),
        STACKED => Some("stacked"),
        REJECTED => Some("rejected"),
        code if FAULT_CODES.contains(&code) => Some("fault"),
        _ => None,
    }
}

/// Why a bill was not credited.
///
/// Displayed (and serialized) as the lowercase taxonomy string consumers
/// match on, e.g. `overpayment` or `fault_0x20`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// Bill-type code not mapped, or amount outside the allow-list.
    UnsupportedDenomination,
    /// Intake is off because nothing is owed.
    IntakeDisabled,
    /// Mapped amount is zero or negative.
    InvalidAmount,
    /// Remaining amount due is zero.
    NoBalanceDue,
    /// Bill exceeds the remaining amount due.
    Overpayment,
    /// Device rejected without the engine having asked for it.
    Rejected,
    /// Device rejected a bill the engine had accepted.
    Error,
    /// Hardware fault code reported by the device.
    Fault(u8),
    /// Operation attempted while the transport is closed.
    NotConnected,
}

impl RejectReason {
    /// Whether this rejection indicates a device or link problem rather than
    /// a policy decision.
    #[must_use]
    pub fn is_device_problem(&self) -> bool {
        matches!(self, Self::Error | Self::Fault(_) | Self::NotConnected)
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedDenomination => write!(f, "unsupported_denomination"),
            Self::IntakeDisabled => write!(f, "intake_disabled"),
            Self::InvalidAmount => write!(f, "invalid_amount"),
            Self::NoBalanceDue => write!(f, "no_balance_due"),
            Self::Overpayment => write!(f, "overpayment"),
            Self::Rejected => write!(f, "rejected"),
            Self::Error => write!(f, "error"),
            Self::Fault(code) => write!(f, "fault_0x{code:02x}"),
            Self::NotConnected => write!(f, "not_connected"),
        }
    }
}

impl std::str::FromStr for RejectReason {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let reason = match s {
            "unsupported_denomination" => Self::UnsupportedDenomination,
            "intake_disabled" => Self::IntakeDisabled,
            "invalid_amount" => Self::InvalidAmount,
            "no_balance_due" => Self::NoBalanceDue,
            "overpayment" => Self::Overpayment,
            "rejected" => Self::Rejected,
            "error" => Self::Error,
            "not_connected" => Self::NotConnected,
            other => {
                let code = other
                    .strip_prefix("fault_0x")
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                    .ok_or_else(|| Error::Config(format!("Unknown reject reason: {other}")))?;
                Self::Fault(code)
            }
        };
        Ok(reason)
    }
}

impl Serialize for RejectReason {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RejectReason {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Resolved, immutable acceptance settings handed to the acceptor at
/// construction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptancePolicyConfig {
    /// Bill-type code to amount table.
    pub denominations: DenominationMap,

    /// Optional allow-list of amounts. Empty allows every mapped amount.
    #[serde(default)]
    pub allowed_denominations: BTreeSet<BillAmount>,
}

impl AcceptancePolicyConfig {
    /// Create a config that allows every mapped denomination.
    pub fn new(denominations: DenominationMap) -> Self {
        Self {
            denominations,
            allowed_denominations: BTreeSet::new(),
        }
    }

    /// Restrict intake to the given amounts.
    pub fn with_allowed(mut self, allowed: impl IntoIterator<Item = BillAmount>) -> Self {
        self.allowed_denominations = allowed.into_iter().collect();
        self
    }

    /// Validate the map and check every allow-listed amount is mapped.
    pub fn validate(&self) -> Result<()> {
        self.denominations.validate()?;
        if let Some(&missing) = self
            .allowed_denominations
            .iter()
            .find(|&&amount| !self.denominations.contains_amount(amount))
        {
            return Err(Error::UnknownAllowedDenomination(missing));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_default_denominations() {
        let map = DenominationMap::default();
        assert_eq!(map.amount(0x40), Some(5));
        assert_eq!(map.amount(0x41), Some(10));
        assert_eq!(map.amount(0x42), Some(20));
        assert_eq!(map.amount(0x43), None);
        assert!(map.validate().is_ok());
    }

    #[test]
    fn test_denomination_map_duplicate_code() {
        let result = DenominationMap::new([(0x40, 5), (0x40, 10)]);
        assert_eq!(result, Err(Error::DuplicateBillCode(0x40)));
    }

    #[rstest]
    #[case(POWER_UP)]
    #[case(BILL_VALIDATED)]
    #[case(STACKED)]
    #[case(REJECTED)]
    #[case(0x20)]
    #[case(0x2A)]
    fn test_denomination_map_reserved_code(#[case] code: u8) {
        let result = DenominationMap::new([(code, 50)]);
        assert!(matches!(result, Err(Error::ReservedBillCode { .. })));
    }

    #[test]
    fn test_denomination_map_empty() {
        let result = DenominationMap::new(Vec::<(u8, BillAmount)>::new());
        assert_eq!(result, Err(Error::EmptyDenominationMap));
    }

    #[rstest]
    #[case(RejectReason::UnsupportedDenomination, "unsupported_denomination")]
    #[case(RejectReason::IntakeDisabled, "intake_disabled")]
    #[case(RejectReason::InvalidAmount, "invalid_amount")]
    #[case(RejectReason::NoBalanceDue, "no_balance_due")]
    #[case(RejectReason::Overpayment, "overpayment")]
    #[case(RejectReason::Rejected, "rejected")]
    #[case(RejectReason::Error, "error")]
    #[case(RejectReason::Fault(0x20), "fault_0x20")]
    #[case(RejectReason::Fault(0x2a), "fault_0x2a")]
    #[case(RejectReason::NotConnected, "not_connected")]
    fn test_reject_reason_taxonomy(#[case] reason: RejectReason, #[case] expected: &str) {
        assert_eq!(reason.to_string(), expected);
        assert_eq!(expected.parse::<RejectReason>().unwrap(), reason);
    }

    #[test]
    fn test_device_problem_reasons() {
        assert!(RejectReason::Fault(0x21).is_device_problem());
        assert!(RejectReason::Error.is_device_problem());
        assert!(RejectReason::NotConnected.is_device_problem());
        assert!(!RejectReason::Overpayment.is_device_problem());
        assert!(!RejectReason::Rejected.is_device_problem());
    }

    #[test]
    fn test_reject_reason_serializes_as_string() {
        let json = serde_json::to_string(&RejectReason::Fault(0x21)).unwrap();
        assert_eq!(json, "\"fault_0x21\"");
    }

    #[test]
    fn test_reject_reason_unknown_string() {
        assert!("jammed".parse::<RejectReason>().is_err());
        assert!("fault_0xzz".parse::<RejectReason>().is_err());
    }

    #[test]
    fn test_policy_config_unknown_allowed_amount() {
        let config = AcceptancePolicyConfig::default().with_allowed([5, 50]);
        assert_eq!(config.validate(), Err(Error::UnknownAllowedDenomination(50)));
    }

    #[test]
    fn test_policy_config_from_json() {
        let json = r#"{"denominations": {"64": 5, "65": 10}, "allowed_denominations": [10]}"#;
        let config: AcceptancePolicyConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.denominations.len(), 2);
        assert!(config.allowed_denominations.contains(&10));
    }
}
