//! Shared test utilities, mocks, and fixtures for Meshflow crates.

pub mod decision;
pub mod fixtures;
pub mod transport;

pub use decision::{FixedDecision, SequenceDecision};
pub use fixtures::*;
pub use transport::{MockTransport, TransportCall};
