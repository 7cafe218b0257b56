//! Shared building blocks for the floodhub gateway.
//!
//! Identity types for fixtures and radio attributes, the protocol constants
//! used by every other crate, and the crate-wide [`Error`] type.

pub mod constants;
pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
