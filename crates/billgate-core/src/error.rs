use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // Denomination map errors
    #[error("Duplicate bill type code: 0x{0:02x}")]
    DuplicateBillCode(u8),

    #[error("Bill type code 0x{code:02x} collides with control byte {signal}")]
    ReservedBillCode { code: u8, signal: &'static str },

    #[error("Denomination map is empty")]
    EmptyDenominationMap,

    // Policy errors
    #[error("Allowed denomination {0} is not in the denomination map")]
    UnknownAllowedDenomination(i64),

    // Timing errors
    #[error("Invalid timing: {0}")]
    InvalidTiming(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
