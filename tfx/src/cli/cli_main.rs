//! Main CLI entry points
// (c) 2025 Ross Younger

use std::ffi::OsString;
use std::process::ExitCode;

use anyhow::{Context as _, Result};
use clap::Parser;
use tracing::{debug, info};

use super::args::{ClientArgs, OutputArgs, ServerArgs};
use crate::client::{Options, run_session};
use crate::config::{Configuration, Manager};
use crate::server::{Dispatcher, process, serve_stdin};
use crate::util::socket::{CONNECT_TIMEOUT, SocketBuffers as _, chunk_size, tcp_connect, tcp_listen};
use crate::util::tracing::{ConsoleTraceType, is_initialized, setup, trace_level};

/// Client CLI entrypoint
///
/// Call this from `main`, passing the arguments to use.
/// Normally you will call `client_main(std::env::args_os())` but you can pass in alternate arguments for CLI testing.
#[must_use]
pub fn client_main<I, T>(args: I) -> ExitCode
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    exit_code(client_inner(args))
}

/// Server CLI entrypoint
///
/// As [`client_main`], for the server.
///
/// The multiplexing server only returns on a fatal error. With `--fork`, the
/// server returns success after SIGINT.
#[must_use]
pub fn server_main<I, T>(args: I) -> ExitCode
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    exit_code(server_inner(args))
}

#[allow(clippy::match_bool)]
fn exit_code(result: Result<bool>) -> ExitCode {
    result
        .inspect_err(|e| {
            if is_initialized() {
                tracing::error!("{e:#}");
            } else {
                eprintln!("Error: {e:#}");
            }
        })
        .map_or(ExitCode::FAILURE, |success| match success {
            true => ExitCode::SUCCESS,
            false => ExitCode::FAILURE,
        })
}

/// Parses arguments, handling `--help` and `--version`.
///
/// Returns None if the program should exit successfully without doing anything more.
fn parse_args<P, I, T>(args: I) -> Result<Option<P>>
where
    P: Parser,
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    use clap::error::ErrorKind::{DisplayHelp, DisplayVersion};
    match P::try_parse_from(args) {
        Ok(args) => Ok(Some(args)),
        Err(e) if matches!(e.kind(), DisplayHelp | DisplayVersion) => {
            let _ = e.print();
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

fn setup_tracing(output: &OutputArgs, config: &Configuration) -> Result<()> {
    setup(
        trace_level(output.debug, output.quiet),
        ConsoleTraceType::Standard,
        output.log_file.as_ref(),
        config.time_format,
    )
}

fn client_inner<I, T>(args: I) -> Result<bool>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let Some(args) = parse_args::<ClientArgs, _, _>(args)? else {
        return Ok(true);
    };
    let mut manager = Manager::standard();
    manager.merge_overrides(&args.common);
    manager.merge_overrides(&args.tuning);
    let config = manager.configuration()?;
    setup_tracing(&args.output, &config)?;

    let mut stream = tcp_connect(&args.host, args.port, CONNECT_TIMEOUT)?;
    let options = Options {
        output_dir: args.output_dir.clone(),
        preserve: args.preserve,
        timeout: config.timeout_duration(),
        attempts: config.attempts,
        chunk: chunk_size(config.recv_buffer, stream.get_recvbuf()),
    };
    debug!("receive chunk size is {} bytes", options.chunk);

    let summary = run_session(&mut stream, &args.files, &options)?;
    debug!(
        "{} of {} files received",
        summary.received(),
        summary.files.len()
    );
    Ok(true)
}

fn server_inner<I, T>(args: I) -> Result<bool>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let Some(args) = parse_args::<ServerArgs, _, _>(args)? else {
        return Ok(true);
    };
    let mut manager = Manager::standard();
    manager.merge_overrides(&args.common);
    manager.merge_overrides(&args.tuning);
    let config = manager.configuration()?;
    setup_tracing(&args.output, &config)?;

    if args.connection_on_stdin {
        let _ = serve_stdin(&config, &args.root)?;
        return Ok(true);
    }

    let port = args.port.context("a port number is required")?;
    let listener = tcp_listen(port)?;
    if args.fork {
        let child = process::ChildCommand {
            program: std::env::current_exe().context("could not determine own executable")?,
            args: args.child_args(&config),
        };
        process::run(listener, &child, config.max_children)?;
        info!("shut down");
        Ok(true)
    } else {
        Dispatcher::new(listener, &config, args.root.clone())?.run()?;
        Ok(true)
    }
}
