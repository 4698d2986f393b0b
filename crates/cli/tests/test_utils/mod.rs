//! Shared helpers for the end-to-end scenarios: a chain harness driving the
//! builder and importer with the dev crypto suite, plus extrinsic builders
//! with valid validator signatures.
//!
//! Each integration binary compiles its own copy, so not every helper is
//! used everywhere.
#![allow(dead_code)]

use jam_stf_cli::dev;
use jam_stf_shared::block::{Assurance, Block, ReportGuarantee, ValidatorSignature};
use jam_stf_shared::crypto::{sign_ed25519, DevVrfSuite};
use jam_stf_shared::params::{Params, TINY_PARAMS};
use jam_stf_shared::primitives::{Hash32, TimeSlot, ValidatorIndex};
use jam_stf_shared::state::State;
use jam_stf_shared::stf::reports::{assurance_message, guarantee_message};
use jam_stf_shared::stf::{
    Chain, DevServiceExecutor, Mempool, Stf, StfError, TicketRegistry,
};
use jam_stf_shared::work::WorkReport;

pub fn tiny() -> &'static Params {
    &TINY_PARAMS
}

pub struct TestChain {
    pub chain: Chain<'static, DevVrfSuite, DevServiceExecutor>,
    pub stf: Stf<'static, DevVrfSuite, DevServiceExecutor>,
    pub registry: TicketRegistry,
}

impl TestChain {
    pub fn new(genesis: State) -> Self {
        let chain =
            Chain::new(Stf::new(tiny(), DevVrfSuite, DevServiceExecutor), genesis).unwrap();
        Self {
            chain,
            stf: Stf::new(tiny(), DevVrfSuite, DevServiceExecutor),
            registry: TicketRegistry::default(),
        }
    }

    pub fn from_genesis() -> Self {
        Self::new(dev::genesis_state(tiny()))
    }

    pub fn state(&self) -> &State {
        self.chain.state()
    }

    pub fn head_hash(&self) -> Hash32 {
        self.state().beta.latest().map(|b| b.header_hash).unwrap_or(Hash32::ZERO)
    }

    pub fn build(&self, slot: TimeSlot, mempool: &Mempool) -> Block {
        let author =
            dev::slot_author(self.state(), tiny(), slot).expect("dev author for the slot");
        self.stf
            .build_block(self.state(), &self.registry, &author, slot, self.chain.state_root(), mempool)
            .expect("block builds")
    }

    pub fn import(&mut self, block: &Block) -> Result<Hash32, StfError> {
        self.chain.import(block)
    }

    pub fn build_and_import(&mut self, slot: TimeSlot, mempool: &Mempool) -> Hash32 {
        let block = self.build(slot, mempool);
        self.import(&block).expect("built block imports")
    }
}

/// A guarantee over `report` with a full quorum of valid signatures.
pub fn quorum_guarantee(report: WorkReport, slot: TimeSlot) -> ReportGuarantee {
    let hash = report.hash();
    let message = guarantee_message(&hash, slot);
    let signatures = (0..tiny().validators_super_majority)
        .map(|i| ValidatorSignature {
            validator_index: i as ValidatorIndex,
            signature: sign_ed25519(&dev::ed25519_seed(i), &message),
        })
        .collect();
    ReportGuarantee { report, slot, signatures }
}

/// Quorum assurances asserting availability of `cores`, anchored at the
/// parent header hash.
pub fn quorum_assurances(parent: &Hash32, cores: &[usize]) -> Vec<Assurance> {
    let mut bitfield = vec![0u8; tiny().avail_bitfield_bytes];
    for core in cores {
        bitfield[core / 8] |= 1 << (core % 8);
    }
    (0..tiny().validators_super_majority)
        .map(|v| Assurance {
            anchor: *parent,
            bitfield: bitfield.clone(),
            validator_index: v as ValidatorIndex,
            signature: sign_ed25519(&dev::ed25519_seed(v), &assurance_message(parent, &bitfield)),
        })
        .collect()
}

/// A dependency-free report bound for `core`, its lookup anchor pinned to
/// the importing slot so the recent-history check passes.
pub fn fresh_report(core: u16, seed: u8, lookup_anchor_slot: TimeSlot) -> WorkReport {
    use jam_stf_shared::crypto::blake2b;
    use jam_stf_shared::work::{RefineContext, WorkExecResult, WorkPackageSpec, WorkResult};

    let tag = |name: &str| blake2b(&[name.as_bytes(), &[seed]].concat());
    WorkReport {
        package_spec: WorkPackageSpec {
            hash: tag("package"),
            length: 2048,
            erasure_root: tag("erasure"),
            exports_root: tag("exports"),
            exports_count: 0,
        },
        context: RefineContext {
            anchor: tag("anchor"),
            state_root: tag("state_root"),
            beefy_root: tag("beefy"),
            lookup_anchor: tag("lookup"),
            lookup_anchor_slot,
            prerequisites: Vec::new(),
        },
        core_index: core,
        authorizer_hash: tag("authorizer"),
        auth_output: Vec::new(),
        segment_root_lookup: Vec::new(),
        results: vec![WorkResult {
            service: 16 + u32::from(seed),
            code_hash: tag("code"),
            payload_hash: tag("payload"),
            accumulate_gas: 10_000,
            result: WorkExecResult::Ok(vec![seed]),
            refine_gas_used: 400,
        }],
    }
}

/// Genesis with the given authorizers pre-pooled per core.
pub fn genesis_with_pools(pooled: &[(usize, Hash32)]) -> State {
    let mut state = dev::genesis_state(tiny());
    for (core, authorizer) in pooled {
        state.alpha[*core].push(*authorizer);
    }
    state
}
