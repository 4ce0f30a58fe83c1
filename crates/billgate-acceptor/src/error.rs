//! Error types for the bill acceptor.

use billgate_hardware::TransportError;

/// Result type alias for acceptor operations.
pub type Result<T> = std::result::Result<T, AcceptorError>;

/// Errors surfaced by [`BillAcceptor`](crate::BillAcceptor) operations.
///
/// Escrow outcomes are never errors; they arrive as
/// [`AcceptorEvent`](crate::AcceptorEvent)s.
#[derive(Debug, thiserror::Error)]
pub enum AcceptorError {
    /// No session is open.
    #[error("Bill acceptor is not connected")]
    NotConnected,

    /// Simulated insertion was requested but is not enabled in the config.
    #[error("Simulated bill insertion is disabled")]
    SimulationDisabled,

    /// A real bill is in escrow; simulating now would discard it.
    #[error("A bill is already in escrow")]
    EscrowInProgress,

    /// The transport failed; the session has been torn down.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] billgate_core::Error),
}
