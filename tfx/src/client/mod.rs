//! Client side
// (c) 2025 Ross Younger

mod engine;

pub use engine::{ClientError, FileResult, Options, Summary, run_session};
