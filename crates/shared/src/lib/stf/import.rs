//! Block import: the per-block pipeline from raw bytes to committed
//! posterior state and state root.

use tracing::{debug, info};

use crate::block::Block;
use crate::crypto::VrfSuite;
use crate::params::Params;
use crate::primitives::{Hash32, TimeSlot};
use crate::state::{mmr_append, BlockInfo, ReportedPackage, State};
use crate::state_dict::StateDictionary;
use crate::stf::accumulate::{apply_accumulation, ServiceExecutor};
use crate::stf::{authorizations, disputes, preimages, reports, safrole, StfError};
use crate::transition::Transition;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeaderError {
    #[error("parent hash {actual} does not match the chain head {expected}")]
    ParentMismatch { expected: Hash32, actual: Hash32 },
    #[error("parent state root {actual} does not match the posterior root {expected}")]
    ParentStateRootMismatch { expected: Hash32, actual: Hash32 },
    #[error("slot {slot} does not advance past the imported {prior}")]
    SlotNotMonotonic { prior: TimeSlot, slot: TimeSlot },
    #[error("extrinsic hash {actual} does not match the computed {expected}")]
    ExtrinsicHashMismatch { expected: Hash32, actual: Hash32 },
    #[error("epoch mark does not match the epoch transition")]
    EpochMarkMismatch,
    #[error("tickets mark does not match the lottery outcome")]
    TicketsMarkMismatch,
    #[error("offenders mark does not match the newly recorded offenders")]
    OffendersMarkMismatch,
}

#[derive(Debug)]
pub struct ImportOutcome {
    pub state: State,
    pub state_root: Hash32,
    pub accumulate_root: Hash32,
    pub header_hash: Hash32,
}

/// The state transition function, parameterised by the crypto suite and the
/// service-accumulation executor.
pub struct Stf<'p, V, X> {
    pub params: &'p Params,
    pub vrf: V,
    pub executor: X,
}

impl<'p, V: VrfSuite, X: ServiceExecutor> Stf<'p, V, X> {
    pub fn new(params: &'p Params, vrf: V, executor: X) -> Self {
        Self { params, vrf, executor }
    }

    /// Apply one block to `state`. On any error the transition buffer is
    /// dropped and `state` remains the observable state.
    pub fn import_block(&self, state: &State, block: &Block) -> Result<ImportOutcome, StfError> {
        let params = self.params;
        let header = &block.header;

        let parent_hash = state.beta.latest().map(|b| b.header_hash).unwrap_or(Hash32::ZERO);
        if header.parent != parent_hash {
            return Err(HeaderError::ParentMismatch {
                expected: parent_hash,
                actual: header.parent,
            }
            .into());
        }
        if header.slot <= state.tau {
            return Err(HeaderError::SlotNotMonotonic { prior: state.tau, slot: header.slot }.into());
        }
        let extrinsic_hash = block.extrinsic.hash(params)?;
        if extrinsic_hash != header.extrinsic_hash {
            return Err(HeaderError::ExtrinsicHashMismatch {
                expected: extrinsic_hash,
                actual: header.extrinsic_hash,
            }
            .into());
        }

        let mut tx = Transition::new(state);

        // The header tells us the true posterior root of the parent block;
        // record it before anything reads β.
        tx.beta_mut().update_latest_state_root(header.parent_state_root);

        let advance = safrole::advance_time(&mut tx, params, header.slot, &self.vrf);
        if header.epoch_mark != advance.epoch_mark {
            return Err(HeaderError::EpochMarkMismatch.into());
        }

        let unsealed = header.unsealed_encoding(params)?;
        let entropy_output = safrole::verify_seal(&tx, params, &self.vrf, header, &unsealed)?;
        tx.eta_mut().mix(&entropy_output);

        let accepted_tickets =
            safrole::apply_tickets(&mut tx, params, &self.vrf, &block.extrinsic.tickets)?;
        if advance.tickets_mark != header.tickets_mark {
            return Err(HeaderError::TicketsMarkMismatch.into());
        }

        let new_offenders = disputes::apply_disputes(&mut tx, params, &block.extrinsic.disputes)?;
        if header.offenders_mark != new_offenders {
            return Err(HeaderError::OffendersMarkMismatch.into());
        }

        reports::apply_guarantees(&mut tx, params, &block.extrinsic.guarantees)?;
        let spent_authorizers: Vec<_> = block
            .extrinsic
            .guarantees
            .iter()
            .map(|g| (g.report.core_index, g.report.authorizer_hash))
            .collect();
        authorizations::rotate_authorizer_pools(&mut tx, params, &spent_authorizers);
        let available =
            reports::apply_assurances(&mut tx, params, &block.extrinsic.assurances, &header.parent)?;
        debug!(
            slot = header.slot,
            available = available.len(),
            tickets = accepted_tickets.len(),
            "extrinsic admitted"
        );

        let accumulation = apply_accumulation(&mut tx, params, &self.executor, available);

        preimages::apply_preimages(&mut tx, params, &block.extrinsic.preimages)?;

        // Author statistics.
        {
            let author = header.author_index as usize;
            let stats = &mut tx.pi_mut().current[author];
            stats.blocks += 1;
            stats.tickets += accepted_tickets.len() as u32;
            stats.preimages_count += block.extrinsic.preimages.len() as u32;
            stats.preimages_size +=
                block.extrinsic.preimages.iter().map(|p| p.blob.len() as u32).sum::<u32>();
        }

        // Extend recent history with this block's record. Its state root is
        // unknown until the next block announces it; leave zero for now.
        let header_hash = header.hash(params)?;
        let mut mmr_peaks = tx.beta().latest().map(|b| b.mmr_peaks.clone()).unwrap_or_default();
        mmr_append(&mut mmr_peaks, accumulation.accumulate_root);
        let mut reported: Vec<ReportedPackage> = block
            .extrinsic
            .guarantees
            .iter()
            .map(|g| ReportedPackage {
                hash: g.report.package_hash(),
                exports_root: g.report.package_spec.exports_root,
            })
            .collect();
        reported.sort_by(|a, b| a.hash.cmp(&b.hash));
        let max_blocks = params.max_blocks_history;
        tx.beta_mut().append(
            BlockInfo { header_hash, mmr_peaks, state_root: Hash32::ZERO, reported },
            max_blocks,
        );

        let posterior = tx.commit();
        posterior.check_invariants(params)?;
        let dict = StateDictionary::build(&posterior, params)?;
        let state_root = dict.state_root();
        info!(slot = header.slot, %state_root, "block imported");

        Ok(ImportOutcome {
            state: posterior,
            state_root,
            accumulate_root: accumulation.accumulate_root,
            header_hash,
        })
    }
}

/// A chain head: the committed state plus its cached merklization root.
/// Verifies each incoming header's `parent_state_root` against the root the
/// previous import produced, then commits atomically.
pub struct Chain<'p, V, X> {
    stf: Stf<'p, V, X>,
    state: State,
    state_root: Hash32,
}

impl<'p, V: VrfSuite, X: ServiceExecutor> Chain<'p, V, X> {
    pub fn new(stf: Stf<'p, V, X>, genesis: State) -> Result<Self, StfError> {
        let dict = StateDictionary::build(&genesis, stf.params)?;
        let state_root = dict.state_root();
        Ok(Self { stf, state: genesis, state_root })
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn state_root(&self) -> Hash32 {
        self.state_root
    }

    pub fn params(&self) -> &'p Params {
        self.stf.params
    }

    /// Import a decoded block, returning the posterior state root.
    pub fn import(&mut self, block: &Block) -> Result<Hash32, StfError> {
        if block.header.parent_state_root != self.state_root {
            return Err(HeaderError::ParentStateRootMismatch {
                expected: self.state_root,
                actual: block.header.parent_state_root,
            }
            .into());
        }
        let outcome = self.stf.import_block(&self.state, block)?;
        self.state = outcome.state;
        self.state_root = outcome.state_root;
        Ok(self.state_root)
    }

    /// Import from raw bytes, decoding first.
    pub fn import_bytes(&mut self, bytes: &[u8]) -> Result<Hash32, StfError> {
        let block = Block::decode_bytes(bytes, self.stf.params)?;
        self.import(&block)
    }
}
