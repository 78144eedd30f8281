//! Command Line Interface for tfx and tfxd
// (c) 2025 Ross Younger

mod args;
mod cli_main;

pub use cli_main::{client_main, server_main};
