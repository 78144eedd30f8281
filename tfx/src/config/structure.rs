//! Configuration structure
// (c) 2025 Ross Younger

use std::time::Duration;

use anyhow::Result;
use clap::Args;
use serde::{Deserialize, Serialize};

use crate::util::TimeFormat;

/// Smallest transfer chunk we are prepared to work with
pub const MINIMUM_BUFFER: usize = 64;

/// The set of tunable options shared by the client and the server
///
/// You can access the hard-wired defaults through [`Configuration::system_default()`].
/// Command-line options are layered on top of the defaults by the
/// [`Manager`](super::Manager).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Configuration {
    /// How long to wait for a peer to become ready, in seconds
    pub timeout: u64,
    /// How many consecutive timeouts are tolerated before a peer is considered stalled
    pub attempts: u32,
    /// Maximum simultaneous connections in the multiplexing server
    pub max_connections: usize,
    /// Maximum simultaneous child processes in the process-per-connection server
    pub max_children: usize,
    /// Server transfer chunk size in bytes (0 means ask the socket)
    pub send_buffer: usize,
    /// Client receive chunk size in bytes (0 means ask the socket)
    pub recv_buffer: usize,
    /// Format of timestamps in log messages
    pub time_format: TimeFormat,
}

static SYSTEM_DEFAULT_CONFIG: Configuration = Configuration {
    timeout: 5,
    attempts: 2,
    max_connections: 1024,
    max_children: 128,
    send_buffer: 0,
    recv_buffer: 0,
    time_format: TimeFormat::Local,
};

impl Configuration {
    /// Returns the system default settings
    #[must_use]
    pub fn system_default() -> &'static Self {
        &SYSTEM_DEFAULT_CONFIG
    }

    /// Accessor for `timeout`, as a Duration
    #[must_use]
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// How long a peer may stay silent before it is torn down
    #[must_use]
    pub fn stall_limit(&self) -> Duration {
        self.timeout_duration()
            .saturating_mul(self.attempts)
    }

    /// Performs additional validation checks on a configuration object
    pub fn try_validate(&self) -> Result<()> {
        if self.timeout == 0 {
            anyhow::bail!("The timeout must be at least 1 second");
        }
        if self.attempts == 0 {
            anyhow::bail!("The number of attempts must be at least 1");
        }
        if self.max_connections < 2 {
            anyhow::bail!(
                "max_connections ({}) is too small; it must be at least 2",
                self.max_connections
            );
        }
        if self.max_children == 0 {
            anyhow::bail!("max_children must be at least 1");
        }
        for (name, value) in [
            ("send_buffer", self.send_buffer),
            ("recv_buffer", self.recv_buffer),
        ] {
            if value != 0 && value < MINIMUM_BUFFER {
                anyhow::bail!(
                    "{name} ({value}) is too small; it must be 0 or at least {MINIMUM_BUFFER}"
                );
            }
        }
        Ok(())
    }

    /// Performs additional validation checks on the configuration.
    pub fn validate(self) -> Result<Self> {
        self.try_validate()?;
        Ok(self)
    }
}

/// Command-line overrides common to both programs
///
/// Every member is optional; anything not given falls through to the defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Args, Serialize)]
pub struct CommonOverrides {
    /// Seconds to wait for the peer before counting a timeout [default: 5]
    #[arg(long, value_name = "sec", help_heading("Tuning"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// Consecutive timeouts before the peer is considered stalled [default: 2]
    #[arg(long, value_name = "n", help_heading("Tuning"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,

    /// Format of timestamps in log messages [default: local]
    #[arg(long, value_name = "format", help_heading("Output"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_format: Option<TimeFormat>,
}

/// Command-line overrides specific to the server
#[derive(Debug, Clone, Default, PartialEq, Eq, Args, Serialize)]
pub struct ServerOverrides {
    /// Maximum simultaneous connections (multiplexing model) [default: 1024]
    #[arg(long, value_name = "n", help_heading("Tuning"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<usize>,

    /// Maximum simultaneous child processes (with --fork) [default: 128]
    #[arg(long, value_name = "n", help_heading("Tuning"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_children: Option<usize>,

    /// Transfer chunk size in bytes; 0 asks the socket [default: 0]
    #[arg(long, value_name = "bytes", help_heading("Tuning"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub send_buffer: Option<usize>,
}

/// Command-line overrides specific to the client
#[derive(Debug, Clone, Default, PartialEq, Eq, Args, Serialize)]
pub struct ClientOverrides {
    /// Receive chunk size in bytes; 0 asks the socket [default: 0]
    #[arg(long, value_name = "bytes", help_heading("Tuning"))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recv_buffer: Option<usize>,
}
