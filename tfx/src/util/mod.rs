//! General utility code that didn't fit anywhere else
// (c) 2025 Ross Younger

pub mod io;
pub mod socket;
pub mod tracing;

pub use tracing::TimeFormat;
