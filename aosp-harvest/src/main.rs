//! Harvest permission and content-provider metadata from the Android source tree and SDK repository.
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

use aosp_harvest_lib::{Host, run};
use ohno::AppError;
use std::io::{self, Write};

/// Routes command output to the process's own terminal streams.
#[derive(Debug, Clone, Copy, Default)]
struct Terminal;

#[cfg_attr(coverage_nightly, coverage(off))]
impl Host for Terminal {
    fn output(&mut self) -> impl Write {
        io::stdout().lock()
    }

    fn error(&mut self) -> impl Write {
        io::stderr().lock()
    }

    fn exit(&mut self, code: i32) {
        std::process::exit(code);
    }
}

#[tokio::main]
#[cfg_attr(coverage_nightly, coverage(off))]
async fn main() -> Result<(), AppError> {
    let mut terminal = Terminal;
    run(&mut terminal, std::env::args_os()).await
}
