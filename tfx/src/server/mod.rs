//! Server side
//!
//! Two execution models are available:
//!
//! * [`Dispatcher`]: one thread multiplexes every connection using readiness
//!   notification. This is the default.
//! * [`process`]: one child process per connection, each running
//!   [`serve_connection`].
//!
//! Both share the [`Registry`] and the request/reply logic in [`connection`].
// (c) 2025 Ross Younger

pub mod connection;
mod dispatcher;
pub mod process;
mod registry;
mod single;

pub use dispatcher::Dispatcher;
pub use registry::{ConnectionId, ConnectionRecord, MAX_QUEUED_FILES, Registry, RegistryError};
pub use single::{serve_connection, serve_stdin};
