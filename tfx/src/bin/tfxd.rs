//! tfx server - main entrypoint
// (c) 2025 Ross Younger

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

use std::process::ExitCode;

#[cfg_attr(coverage_nightly, coverage(off))]
fn main() -> ExitCode {
    tfx::server_main(std::env::args_os())
}
