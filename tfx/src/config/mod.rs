// (c) 2025 Ross Younger
//! # 📖 Configuration management
//!
//! tfx obtains run-time configuration from two sources, in order of priority:
//!
//! 1. Command-line options
//! 2. Hard-wired system defaults ([`Configuration::system_default()`])
//!
//! There are no configuration files, and no settings are read from the
//! environment (apart from `RUST_LOG`, which only affects logging).
//!
//! | Setting | Default | Applies to |
//! |---|---|---|
//! | `timeout` | 5 seconds | client and server |
//! | `attempts` | 2 | client and server |
//! | `max_connections` | 1024 | multiplexing server |
//! | `max_children` | 128 | process-per-connection server |
//! | `send_buffer` | 0 (ask the socket) | server |
//! | `recv_buffer` | 0 (ask the socket) | client |
//! | `time_format` | local | client and server |

mod manager;
mod structure;

pub use manager::Manager;
pub use structure::{
    ClientOverrides, CommonOverrides, Configuration, MINIMUM_BUFFER, ServerOverrides,
};
