//! Bill acceptor protocol engine.
//!
//! Drives a single-byte bill validator for a kiosk payment flow: it keeps the
//! device alive with polls, answers every escrowed bill with an accept or a
//! reject based on how much money is still owed, and reports the outcome of
//! each bill as an [`AcceptorEvent`].
//!
//! # Components
//!
//! - [`BillAcceptor`]: connection lifecycle, read loop and public API
//! - [`ProtocolStateMachine`]: byte-by-byte protocol handling, no I/O
//! - [`escrow::decide`]: the accept/reject rules
//! - [`AcceptancePolicyController`]: remaining amount and intake flag
//! - [`RetryPolicy`]: opt-in reconnect backoff
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use billgate_acceptor::{AcceptorConfig, AcceptorEvent, BillAcceptor};
//! use billgate_core::RejectReason;
//! use billgate_hardware::mock::MockTransport;
//! use rust_decimal::Decimal;
//!
//! #[tokio::main]
//! async fn main() -> billgate_acceptor::Result<()> {
//!     let (transport, device) = MockTransport::new();
//!     let (acceptor, mut events) = BillAcceptor::new(transport, AcceptorConfig::default())?;
//!     acceptor.update_remaining_amount(Decimal::from(15)).await?;
//!
//!     device.power_up();
//!     acceptor.connect(Some(Duration::from_secs(1))).await;
//!
//!     // 20 is more than what is owed
//!     device.insert_bill(0x42);
//!     device.reject();
//!     assert_eq!(
//!         events.recv().await,
//!         Some(AcceptorEvent::BillRejected { amount: 20, reason: RejectReason::Overpayment })
//!     );
//!
//!     acceptor.disconnect().await;
//!     Ok(())
//! }
//! ```

mod acceptor;
pub mod config;
pub mod error;
pub mod escrow;
pub mod events;
pub mod policy;
mod poll;
pub mod retry;
pub mod state_machine;

pub use acceptor::BillAcceptor;
pub use config::AcceptorConfig;
pub use error::{AcceptorError, Result};
pub use escrow::Decision;
pub use events::{AcceptorEvent, AcceptorEvents, ConnectionState};
pub use policy::{AcceptancePolicyController, PolicySnapshot};
pub use retry::RetryPolicy;
pub use state_machine::{ProtocolState, ProtocolStateMachine, Reaction};
