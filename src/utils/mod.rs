//! The `utils` module provides a collection of utility functions and common
//! definitions used across the `pipebus` crate.
//!
//! It centralizes the error taxonomy and the tracing setup so the broker,
//! the consumer loops and the binary all report problems the same way.

pub mod error;
pub mod logging;
