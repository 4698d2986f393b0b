use std::path::PathBuf;
use std::process::exit;
use std::time::Instant;

use clap::Parser;

use jam_stf_cli::env::read_env;
use jam_stf_cli::exit_codes;
use jam_stf_cli::logging::{setup_logger, LogFormat, LoggingConfig};
use jam_stf_cli::trace::{run_trace, Trace};

#[derive(Parser, Debug)]
#[clap(author, version, about = "Repeatedly import a trace and report wall-clock timings", long_about = None)]
struct Args {
    /// Trace file, `.json` or binary.
    trace: PathBuf,
    /// Number of import repetitions.
    #[clap(default_value_t = 10)]
    iterations: u32,
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
    if args.iterations == 0 {
        eprintln!("iterations must be at least 1");
        exit(exit_codes::INVALID_ARGUMENTS);
    }

    let trace = match Trace::load(&args.trace) {
        Ok(trace) => trace,
        Err(error) => {
            tracing::error!("failed to load trace: {error}");
            exit(exit_codes::LOAD_FAILURE);
        }
    };

    let started = Instant::now();
    for iteration in 0..args.iterations {
        match run_trace(&trace) {
            Ok(report) if report.passed() => {}
            Ok(_) => {
                tracing::error!(iteration, "state root mismatch during bench run");
                exit(exit_codes::TEST_FAILURE);
            }
            Err(error) => {
                tracing::error!(iteration, "import failed during bench run: {error}");
                exit(exit_codes::TEST_FAILURE);
            }
        }
    }
    let total = started.elapsed();
    let mean = total / args.iterations;
    println!(
        "{} blocks x {} iterations: total {:?}, mean {:?} per run",
        trace.blocks.len(),
        args.iterations,
        total,
        mean
    );
    exit(exit_codes::SUCCESS);
}
