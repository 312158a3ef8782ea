//! The `utils` module provides a collection of utility functions and common
//! definitions used across the `dispatchq` crate.
//!
//! It centralizes the crate-wide error type and the logging bootstrap so the
//! broker, the client roles and the binary all report failures the same way.

pub mod error;
pub mod logging;

pub use error::{Error, Result};
