// (c) 2025 Ross Younger

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! tfx is a small TCP file transfer service.
//!
//! A client connects to a server, asks for one or more files by name and
//! writes what it receives to local disk. The [wire protocol](protocol) is a
//! minimal line-based request with a binary reply header.
//!
//! ## Programs
//!
//! * `tfx <host> <port> <file>...` retrieves files.
//! * `tfxd <port>` serves files from a directory.
//!
//! The server has two execution models. By default a single thread
//! multiplexes every connection ([`server::Dispatcher`]). With `--fork`, each
//! connection is served by its own child process ([`server::process`]).
//!
//! Both sides detect a stalled peer: if nothing arrives for
//! `timeout` seconds, `attempts` times in a row, the connection is dropped.
//!
//! ## Logging
//!
//! Messages go to stderr. Use `--debug` or `--quiet` to adjust the detail,
//! or set `RUST_LOG` for fine control.

mod cli;
pub use cli::{client_main, server_main};

pub mod client;
pub mod config;
pub mod protocol;
pub mod server;
pub mod util;
