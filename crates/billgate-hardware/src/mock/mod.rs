//! Mock transports for testing and development.
//!
//! Simulated validator links that can be driven programmatically without
//! physical hardware.

pub mod transport;

pub use transport::{MockReader, MockTransport, MockTransportHandle, MockWriter};
