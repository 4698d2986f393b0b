use std::path::PathBuf;
use std::process::exit;

use clap::Parser;

use jam_stf_cli::env::read_env;
use jam_stf_cli::exit_codes;
use jam_stf_cli::logging::{setup_logger, LogFormat, LoggingConfig};
use jam_stf_cli::trace::{run_trace, Trace, TraceRunError};

#[derive(Parser, Debug)]
#[clap(author, version, about = "Import a block trace and verify posterior state roots", long_about = None)]
struct Args {
    /// Trace file, `.json` or binary.
    path: PathBuf,
}

fn main() {
    setup_logger(LoggingConfig::default().use_format(read_env("LOG_FORMAT", LogFormat::Plain)));
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(error) => {
            eprintln!("{error}");
            exit(exit_codes::INVALID_ARGUMENTS);
        }
    };

    let trace = match Trace::load(&args.path) {
        Ok(trace) => trace,
        Err(error) => {
            tracing::error!("failed to load trace: {error}");
            exit(exit_codes::LOAD_FAILURE);
        }
    };

    match run_trace(&trace) {
        Ok(report) if report.passed() => {
            tracing::info!(blocks = report.roots.len(), "trace imported, all roots match");
            if let Some(root) = report.roots.last() {
                println!("{root}");
            }
            exit(exit_codes::SUCCESS);
        }
        Ok(report) => {
            let mismatch = report.mismatch.expect("not passed implies a mismatch");
            tracing::error!(
                block = mismatch.index,
                expected = %mismatch.expected,
                actual = %mismatch.actual,
                "state root mismatch"
            );
            exit(exit_codes::TEST_FAILURE);
        }
        Err(TraceRunError::Trace(error)) => {
            tracing::error!("trace is unusable: {error}");
            exit(exit_codes::LOAD_FAILURE);
        }
        Err(error) => {
            tracing::error!("import failed: {error}");
            exit(exit_codes::TEST_FAILURE);
        }
    }
}
