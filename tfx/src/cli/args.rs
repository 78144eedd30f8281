//! Command-line arguments
// (c) 2025 Ross Younger

use std::ffi::OsString;
use std::path::PathBuf;

use clap::{Args, Parser};

use crate::config::{ClientOverrides, CommonOverrides, Configuration, ServerOverrides};

/// Output options common to both programs
#[derive(Debug, Args, Clone, Default)]
pub(crate) struct OutputArgs {
    /// Enable detailed debug output
    ///
    /// This has the same effect as setting `RUST_LOG=tfx=debug` in the environment.
    /// If present, `RUST_LOG` overrides this option.
    #[arg(short, long, action, help_heading("Output"))]
    pub(crate) debug: bool,

    /// Quiet mode: reports only errors
    #[arg(short, long, action, conflicts_with("debug"), help_heading("Output"))]
    pub(crate) quiet: bool,

    /// Also log to a file (appending)
    #[arg(short('l'), long, value_name("FILE"), help_heading("Output"))]
    pub(crate) log_file: Option<String>,
}

/// Retrieves files from a tfx server
#[derive(Debug, Parser, Clone)]
#[command(name = "tfx", author, version, max_term_width(100))]
pub(crate) struct ClientArgs {
    /// Directory to write downloaded files into
    #[arg(short, long, default_value = ".", value_name = "DIR")]
    pub(crate) output_dir: PathBuf,

    /// Apply the server's modification time to downloaded files
    #[arg(short, long, action)]
    pub(crate) preserve: bool,

    #[command(flatten)]
    pub(crate) common: CommonOverrides,

    #[command(flatten)]
    pub(crate) tuning: ClientOverrides,

    #[command(flatten)]
    pub(crate) output: OutputArgs,

    /// Server host name or address
    pub(crate) host: String,

    /// Server port
    pub(crate) port: u16,

    /// Files to retrieve
    #[arg(required = true, value_name = "FILE")]
    pub(crate) files: Vec<String>,
}

/// Serves files over TCP
#[derive(Debug, Parser, Clone)]
#[command(name = "tfxd", author, version, max_term_width(100))]
pub(crate) struct ServerArgs {
    /// Serve each connection from its own process
    #[arg(long, action)]
    pub(crate) fork: bool,

    /// Directory that requested names are resolved against
    #[arg(short, long, default_value = ".", value_name = "DIR")]
    pub(crate) root: PathBuf,

    #[command(flatten)]
    pub(crate) common: CommonOverrides,

    #[command(flatten)]
    pub(crate) tuning: ServerOverrides,

    #[command(flatten)]
    pub(crate) output: OutputArgs,

    /// Serve the TCP connection on standard input, then exit
    #[arg(long, action, hide = true, conflicts_with("fork"))]
    pub(crate) connection_on_stdin: bool,

    /// Port to listen on
    #[arg(required_unless_present("connection_on_stdin"))]
    pub(crate) port: Option<u16>,
}

impl ServerArgs {
    /// Arguments for a per-connection child, which inherits the final configuration
    pub(crate) fn child_args(&self, config: &Configuration) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--connection-on-stdin".into(),
            "--root".into(),
            self.root.clone().into(),
            "--timeout".into(),
            config.timeout.to_string().into(),
            "--attempts".into(),
            config.attempts.to_string().into(),
            "--send-buffer".into(),
            config.send_buffer.to_string().into(),
            "--time-format".into(),
            config.time_format.to_string().into(),
        ];
        if self.output.debug {
            args.push("--debug".into());
        } else if self.output.quiet {
            args.push("--quiet".into());
        }
        if let Some(f) = &self.output.log_file {
            args.push("--log-file".into());
            args.push(f.into());
        }
        args
    }
}
