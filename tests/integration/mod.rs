//! Integration testing framework for the harness.
//!
//! The scenarios run the harness against `mock-yarrr-server`, a stand-in for
//! the real server built alongside the crate.

pub mod infrastructure;
pub mod scenarios;

pub use infrastructure::MockServerHarness;
