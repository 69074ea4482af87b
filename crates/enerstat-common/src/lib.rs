//! Enerstat Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling and logging setup for the Enerstat workspace.

pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{EnerstatError, Result};
