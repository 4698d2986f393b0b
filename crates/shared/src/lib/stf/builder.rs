//! Block production: the validator-side mirror of import.

use crate::block::{
    Assurance, Block, DisputesExtrinsic, Extrinsic, Header, Preimage, ReportGuarantee,
    TicketEnvelope,
};
use crate::codec::EncodeError;
use crate::crypto::VrfSuite;
use crate::primitives::{Hash32, TimeSlot, ValidatorIndex, VrfSignature, VRF_SIGNATURE_LEN};
use crate::state::{SlotAssignment, State};
use crate::stf::accumulate::ServiceExecutor;
use crate::stf::import::Stf;
use crate::stf::safrole::TicketRegistry;
use crate::stf::disputes::DisputeError;
use crate::stf::{disputes, safrole, ENTROPY_CONTEXT, FALLBACK_SEAL_CONTEXT};
use crate::transition::Transition;

/// What the local node has gathered for inclusion in its next block.
#[derive(Clone, Debug, Default)]
pub struct Mempool {
    pub tickets: Vec<TicketEnvelope>,
    pub preimages: Vec<Preimage>,
    pub guarantees: Vec<ReportGuarantee>,
    pub assurances: Vec<Assurance>,
    pub disputes: DisputesExtrinsic,
}

/// The authoring validator's index and bandersnatch secret seed.
#[derive(Clone, Debug)]
pub struct AuthorCredentials {
    pub index: ValidatorIndex,
    pub bandersnatch_seed: Hash32,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("slot {slot} is not assigned to this validator")]
    NotOurSlot { slot: TimeSlot },
    #[error("the ticket holding this slot is not in the local registry")]
    UnknownTicket,
    #[error("registry attempt {registered} disagrees with the slot ticket attempt {assigned}")]
    TicketAttemptMismatch { registered: u8, assigned: u8 },
    #[error("mempool disputes are invalid: {0}")]
    Disputes(#[from] DisputeError),
    #[error("encoding failed: {0}")]
    Encode(#[from] EncodeError),
}

impl<V: VrfSuite, X: ServiceExecutor> Stf<'_, V, X> {
    /// Produce the block for `slot` if this validator is entitled to author
    /// it. The prior state is untouched: the scratch transition used to peek
    /// at the authoring epoch is discarded.
    pub fn build_block(
        &self,
        state: &State,
        registry: &TicketRegistry,
        author: &AuthorCredentials,
        slot: TimeSlot,
        parent_state_root: Hash32,
        mempool: &Mempool,
    ) -> Result<Block, BuildError> {
        let params = self.params;
        let mut tx = Transition::new(state);
        let advance = safrole::advance_time(&mut tx, params, slot, &self.vrf);
        let phase = params.slot_phase(slot);
        let our_key = self.vrf.public_key(&author.bandersnatch_seed);

        let seal_entropy = tx.eta().0[3];
        let seal_context = match &tx.gamma().slot_assignment {
            SlotAssignment::Tickets(tickets) => {
                let ticket = &tickets[phase];
                let (validator, attempt) =
                    registry.lookup(&ticket.id).ok_or(BuildError::UnknownTicket)?;
                if validator != author.index {
                    return Err(BuildError::NotOurSlot { slot });
                }
                if attempt != ticket.attempt {
                    return Err(BuildError::TicketAttemptMismatch {
                        registered: attempt,
                        assigned: ticket.attempt,
                    });
                }
                safrole::ticket_context(&seal_entropy, ticket.attempt)
            }
            SlotAssignment::Keys(keys) => {
                if keys[phase] != our_key {
                    return Err(BuildError::NotOurSlot { slot });
                }
                [FALLBACK_SEAL_CONTEXT, seal_entropy.0.as_slice()].concat()
            }
        };

        // Local pre-validation of mempool tickets: recover ids against the
        // current ring, drop what import would reject, sort by id, cap.
        let mut tickets: Vec<(Hash32, TicketEnvelope)> = Vec::new();
        if phase < params.ticket_submission_end {
            let lottery_entropy = tx.eta().0[2];
            let ring = tx.gamma().ring_commitment.clone();
            for envelope in &mempool.tickets {
                if envelope.attempt >= params.max_ticket_entries_per_validator {
                    continue;
                }
                let context = safrole::ticket_context(&lottery_entropy, envelope.attempt);
                let Ok(id) = self.vrf.ring_verify(&ring, &context, &envelope.signature) else {
                    continue;
                };
                if tx.gamma().ticket_accumulator.iter().any(|t| t.id == id) {
                    continue;
                }
                tickets.push((id, envelope.clone()));
            }
            tickets.sort_by(|a, b| a.0.cmp(&b.0));
            tickets.dedup_by(|a, b| a.0 == b.0);
            tickets.truncate(params.max_tickets_per_extrinsic);
        }

        let extrinsic = Extrinsic {
            tickets: tickets.into_iter().map(|(_, envelope)| envelope).collect(),
            preimages: mempool.preimages.clone(),
            guarantees: mempool.guarantees.clone(),
            assurances: mempool.assurances.clone(),
            disputes: mempool.disputes.clone(),
        };

        // The offenders mark must spell out exactly what dispute processing
        // will record; dry-run it on the scratch transition.
        let offenders_mark = disputes::apply_disputes(&mut tx, params, &extrinsic.disputes)?;

        let parent = state.beta.latest().map(|b| b.header_hash).unwrap_or(Hash32::ZERO);
        let entropy_context = [ENTROPY_CONTEXT, seal_entropy.0.as_slice()].concat();
        let entropy_source = self.vrf.sign(&author.bandersnatch_seed, &entropy_context, &[]);

        let mut header = Header {
            parent,
            parent_state_root,
            extrinsic_hash: extrinsic.hash(params)?,
            slot,
            epoch_mark: advance.epoch_mark,
            tickets_mark: advance.tickets_mark,
            offenders_mark,
            author_index: author.index,
            entropy_source,
            seal: VrfSignature([0u8; VRF_SIGNATURE_LEN]),
        };
        let unsealed = header.unsealed_encoding(params)?;
        header.seal = self.vrf.sign(&author.bandersnatch_seed, &seal_context, &unsealed);
        Ok(Block { header, extrinsic })
    }
}
