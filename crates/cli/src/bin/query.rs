use std::path::PathBuf;
use std::process::exit;

use clap::{Parser, ValueEnum};

use jam_stf_cli::env::read_env;
use jam_stf_cli::exit_codes;
use jam_stf_cli::logging::{setup_logger, LogFormat, LoggingConfig};
use jam_stf_cli::trace::{chain_for, query_state, Trace};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Snapshot {
    /// The genesis state carried by the trace.
    Pre,
    /// The state after importing every block in the trace.
    Post,
}

#[derive(Parser, Debug)]
#[clap(author, version, about = "Print a state datum from a trace snapshot", long_about = None)]
struct Args {
    /// Trace file, `.json` or binary.
    trace: PathBuf,
    /// Datum path: a component name (`tau`, `eta`, …), `service:<id>`, or
    /// `key:<62 hex chars>`.
    path: String,
    /// Which snapshot to read.
    #[clap(value_enum, default_value = "post")]
    snapshot: Snapshot,
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

    let trace = match Trace::load(&args.trace) {
        Ok(trace) => trace,
        Err(error) => {
            tracing::error!("failed to load trace: {error}");
            exit(exit_codes::LOAD_FAILURE);
        }
    };
    let params = match trace.params() {
        Ok(params) => params,
        Err(error) => {
            tracing::error!("{error}");
            exit(exit_codes::LOAD_FAILURE);
        }
    };

    let state = match args.snapshot {
        Snapshot::Pre => match trace.genesis_state() {
            Ok(state) => state,
            Err(error) => {
                tracing::error!("genesis state does not decode: {error}");
                exit(exit_codes::LOAD_FAILURE);
            }
        },
        Snapshot::Post => {
            let mut chain = match chain_for(&trace) {
                Ok(chain) => chain,
                Err(error) => {
                    tracing::error!("{error}");
                    exit(exit_codes::LOAD_FAILURE);
                }
            };
            for (index, bytes) in trace.blocks.iter().enumerate() {
                if let Err(error) = chain.import_bytes(bytes) {
                    tracing::error!(block = index, "import failed: {error}");
                    exit(exit_codes::TEST_FAILURE);
                }
            }
            chain.state().clone()
        }
    };

    match query_state(&state, params, &args.path) {
        Some(value) => {
            println!("0x{}", hex::encode(value));
            exit(exit_codes::SUCCESS);
        }
        None => {
            eprintln!("no state datum at path {:?}", args.path);
            exit(exit_codes::INVALID_ARGUMENTS);
        }
    }
}
