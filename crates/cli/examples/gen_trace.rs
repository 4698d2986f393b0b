//! Generate a tiny-params trace of empty blocks, for feeding the
//! import_trace / bench / query tools.
//!
//!     cargo run --example gen_trace -- out/tiny.bin 8
//!     cargo run --example gen_trace -- out/tiny.json 8

use std::path::PathBuf;
use std::process::exit;

use clap::Parser;

use jam_stf_cli::dev;
use jam_stf_cli::exit_codes;
use jam_stf_cli::trace::Trace;
use jam_stf_shared::crypto::DevVrfSuite;
use jam_stf_shared::params::TINY_PARAMS;
use jam_stf_shared::stf::{Chain, DevServiceExecutor, Mempool, Stf, TicketRegistry};

#[derive(Parser, Debug)]
#[clap(author, version, about = "Write a dev trace of empty blocks", long_about = None)]
struct Args {
    /// Output path; `.json` selects the JSON form, anything else binary.
    out: PathBuf,
    /// Number of consecutive blocks to record.
    #[clap(default_value_t = 4)]
    blocks: u32,
}

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(error) => {
            eprintln!("{error}");
            exit(exit_codes::INVALID_ARGUMENTS);
        }
    };

    let params = &TINY_PARAMS;
    let genesis = dev::genesis_state(params);
    let stf = Stf::new(params, DevVrfSuite, DevServiceExecutor);
    let mut chain = Chain::new(Stf::new(params, DevVrfSuite, DevServiceExecutor), genesis.clone())
        .expect("genesis merklizes");

    let mut trace = Trace {
        params_name: "tiny".to_owned(),
        genesis: genesis.encode_with(params).expect("genesis encodes"),
        blocks: Vec::new(),
        post_state_roots: Vec::new(),
    };

    let registry = TicketRegistry::default();
    for slot in 1..=args.blocks {
        let author = dev::slot_author(chain.state(), params, slot)
            .expect("dev chains stay in fallback mode");
        let block = stf
            .build_block(chain.state(), &registry, &author, slot, chain.state_root(), &Mempool::default())
            .expect("empty block builds");
        trace.blocks.push(block.encode_with(params).expect("block encodes"));
        trace.post_state_roots.push(chain.import(&block).expect("own block imports"));
    }

    if let Some(parent) = args.out.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).expect("output directory");
        }
    }
    if let Err(error) = trace.save(&args.out) {
        eprintln!("failed to write trace: {error}");
        exit(exit_codes::LOAD_FAILURE);
    }
    println!("wrote {} blocks to {}", args.blocks, args.out.display());
}
