//! Safrole: epoch handling, the ticket lottery, and seal verification.

use std::collections::BTreeMap;

use crate::block::{EpochMark, EpochMarkValidator, Header, TicketBody, TicketEnvelope, TicketsMark};
use crate::crypto::{CryptoError, VrfSuite};
use crate::params::Params;
use crate::primitives::{Hash32, TimeSlot, ValidatorIndex};
use crate::state::{fallback_key_sequence, merge_tickets, outside_in, SlotAssignment};
use crate::stf::{ENTROPY_CONTEXT, FALLBACK_SEAL_CONTEXT, TICKET_SEAL_CONTEXT};
use crate::transition::Transition;

#[derive(Debug, thiserror::Error)]
pub enum SafroleError {
    #[error("tickets submitted at phase {phase}, submission closes at {end}")]
    SubmissionClosed { phase: usize, end: usize },
    #[error("extrinsic carries {actual} tickets, bound is {bound}")]
    TooManyTickets { actual: usize, bound: usize },
    #[error("ticket attempt {attempt} is outside the per-validator bound {bound}")]
    AttemptOutOfRange { attempt: u8, bound: u8 },
    #[error("extrinsic tickets are not strictly ascending by id")]
    UnsortedTickets,
    #[error("ticket id already held by the accumulator")]
    DuplicateTicket,
    #[error("author index {author} is out of range for the validator set")]
    AuthorIndexOutOfRange { author: ValidatorIndex },
    #[error("author {author} does not hold slot {slot}")]
    AuthorMismatch { author: ValidatorIndex, slot: TimeSlot },
    #[error("seal output does not match the ticket id assigned to the slot")]
    SealTicketMismatch,
    #[error("registry attempt {registered} disagrees with the slot ticket attempt {assigned}")]
    TicketAttemptMismatch { registered: u8, assigned: u8 },
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Outcome of the epoch/slot bookkeeping performed before anything else
/// touches the block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeAdvance {
    pub epoch_changed: bool,
    pub epoch_mark: Option<EpochMark>,
    pub tickets_mark: Option<TicketsMark>,
}

/// Advance τ to `slot`, rotating validator sets, entropy, statistics and the
/// slot assignment on an epoch boundary. The returned marks are what the
/// header is required to announce.
pub fn advance_time<V: VrfSuite>(
    tx: &mut Transition<'_>,
    params: &Params,
    slot: TimeSlot,
    vrf: &V,
) -> TimeAdvance {
    let prior = *tx.tau();
    let epoch_changed = params.is_epoch_boundary(prior, slot);
    let mut epoch_mark = None;

    if epoch_changed {
        let new_lambda = tx.kappa().clone();
        let new_kappa = tx.gamma().pending.clone();
        let new_pending = tx.iota().clone();
        *tx.lambda_mut() = new_lambda;
        *tx.kappa_mut() = new_kappa.clone();

        tx.eta_mut().rotate();
        let tickets_entropy = tx.eta().0[2];

        // Tickets elect the next epoch only when the lottery saturated and no
        // epoch was skipped in between; anything else falls back to keys.
        let accumulator = tx.gamma().ticket_accumulator.clone();
        let fresh = params.epoch_of(slot) == params.epoch_of(prior) + 1;
        let assignment = if fresh && accumulator.len() == params.epoch_length {
            SlotAssignment::Tickets(outside_in(&accumulator))
        } else {
            SlotAssignment::Keys(fallback_key_sequence(
                &tickets_entropy,
                &new_kappa,
                params.epoch_length,
            ))
        };

        let ring_keys: Vec<Hash32> = new_pending.iter().map(|v| v.bandersnatch).collect();
        let ring_commitment = vrf.ring_commitment(&ring_keys);

        let gamma = tx.gamma_mut();
        gamma.slot_assignment = assignment;
        gamma.ring_commitment = ring_commitment;
        gamma.ticket_accumulator.clear();
        gamma.pending = new_pending.clone();

        tx.pi_mut().rotate_epoch();

        epoch_mark = Some(EpochMark {
            entropy: tx.eta().0[1],
            tickets_entropy,
            validators: new_pending
                .iter()
                .map(|v| EpochMarkValidator { bandersnatch: v.bandersnatch, ed25519: v.ed25519 })
                .collect(),
        });
    }

    // The tickets mark fires on the first block past the submission pivot of
    // an epoch whose lottery saturated.
    let phase = params.slot_phase(slot);
    let crossed_pivot = phase >= params.ticket_submission_end
        && (epoch_changed || params.slot_phase(prior) < params.ticket_submission_end);
    let tickets_mark = (crossed_pivot
        && tx.gamma().ticket_accumulator.len() == params.epoch_length)
        .then(|| TicketsMark(outside_in(&tx.gamma().ticket_accumulator)));

    *tx.tau_mut() = slot;
    TimeAdvance { epoch_changed, epoch_mark, tickets_mark }
}

/// Validate and absorb the ticket extrinsic. Returns the accepted bodies in
/// extrinsic order.
pub fn apply_tickets<V: VrfSuite>(
    tx: &mut Transition<'_>,
    params: &Params,
    vrf: &V,
    tickets: &[TicketEnvelope],
) -> Result<Vec<TicketBody>, SafroleError> {
    if tickets.is_empty() {
        return Ok(Vec::new());
    }
    let phase = params.slot_phase(*tx.tau());
    if phase >= params.ticket_submission_end {
        return Err(SafroleError::SubmissionClosed {
            phase,
            end: params.ticket_submission_end,
        });
    }
    if tickets.len() > params.max_tickets_per_extrinsic {
        return Err(SafroleError::TooManyTickets {
            actual: tickets.len(),
            bound: params.max_tickets_per_extrinsic,
        });
    }

    let lottery_entropy = tx.eta().0[2];
    let ring = tx.gamma().ring_commitment.clone();
    let mut bodies = Vec::with_capacity(tickets.len());
    for envelope in tickets {
        if envelope.attempt >= params.max_ticket_entries_per_validator {
            return Err(SafroleError::AttemptOutOfRange {
                attempt: envelope.attempt,
                bound: params.max_ticket_entries_per_validator,
            });
        }
        let context = ticket_context(&lottery_entropy, envelope.attempt);
        let id = vrf.ring_verify(&ring, &context, &envelope.signature)?;
        bodies.push(TicketBody { id, attempt: envelope.attempt });
    }

    if !bodies.windows(2).all(|pair| pair[0].id < pair[1].id) {
        return Err(SafroleError::UnsortedTickets);
    }

    let gamma = tx.gamma_mut();
    for body in &bodies {
        if gamma.ticket_accumulator.iter().any(|t| t.id == body.id) {
            return Err(SafroleError::DuplicateTicket);
        }
    }
    merge_tickets(&mut gamma.ticket_accumulator, bodies.iter().copied(), params.epoch_length);
    Ok(bodies)
}

/// The ring-VRF input a lottery ticket signs over.
pub fn ticket_context(entropy: &Hash32, attempt: u8) -> Vec<u8> {
    [TICKET_SEAL_CONTEXT, entropy.0.as_slice(), &[attempt]].concat()
}

/// Verify the seal and entropy-source VRF signatures of an imported header
/// against the (already advanced) transition. Returns the entropy output to
/// mix into η₀.
pub fn verify_seal<V: VrfSuite>(
    tx: &Transition<'_>,
    params: &Params,
    vrf: &V,
    header: &Header,
    unsealed: &[u8],
) -> Result<Hash32, SafroleError> {
    let author = header.author_index;
    let Some(keys) = tx.kappa().get(author as usize) else {
        return Err(SafroleError::AuthorIndexOutOfRange { author });
    };
    let author_key = keys.bandersnatch;
    let seal_entropy = tx.eta().0[3];
    let phase = params.slot_phase(header.slot);

    match &tx.gamma().slot_assignment {
        SlotAssignment::Tickets(tickets) => {
            let ticket = &tickets[phase];
            let context = ticket_context(&seal_entropy, ticket.attempt);
            let output = vrf.verify(&author_key, &context, unsealed, &header.seal)?;
            if output != ticket.id {
                return Err(SafroleError::SealTicketMismatch);
            }
        }
        SlotAssignment::Keys(slot_keys) => {
            if slot_keys[phase] != author_key {
                return Err(SafroleError::AuthorMismatch { author, slot: header.slot });
            }
            let context = [FALLBACK_SEAL_CONTEXT, seal_entropy.0.as_slice()].concat();
            vrf.verify(&author_key, &context, unsealed, &header.seal)?;
        }
    }

    let entropy_context = [ENTROPY_CONTEXT, seal_entropy.0.as_slice()].concat();
    let entropy_output = vrf.verify(&author_key, &entropy_context, &[], &header.entropy_source)?;
    Ok(entropy_output)
}

/// Local (per-node) memory of who produced which ticket. Required only for
/// block production: import recovers everything it needs from γ.s and γ.z.
/// Tickets recorded during epoch N elect leaders in epoch N+1, so lookups
/// read the previous bucket.
#[derive(Clone, Debug, Default)]
pub struct TicketRegistry {
    current: BTreeMap<Hash32, (ValidatorIndex, u8)>,
    previous: BTreeMap<Hash32, (ValidatorIndex, u8)>,
}

impl TicketRegistry {
    pub fn record(&mut self, id: Hash32, validator: ValidatorIndex, attempt: u8) {
        self.current.insert(id, (validator, attempt));
    }

    pub fn rotate_epoch(&mut self) {
        self.previous = std::mem::take(&mut self.current);
    }

    pub fn lookup(&self, id: &Hash32) -> Option<(ValidatorIndex, u8)> {
        self.previous.get(id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::DevVrfSuite;
    use crate::params::TINY_PARAMS;
    use crate::primitives::RingVrfProof;
    use crate::state::test_fixtures::{bandersnatch_seed, genesis_state};

    #[test]
    fn non_boundary_advance_only_moves_tau() {
        let params = &TINY_PARAMS;
        let state = genesis_state(params);
        let mut tx = Transition::new(&state);
        let advance = advance_time(&mut tx, params, 1, &DevVrfSuite);
        assert!(!advance.epoch_changed);
        assert!(advance.epoch_mark.is_none());
        let posterior = tx.commit();
        assert_eq!(posterior.tau, 1);
        assert_eq!(posterior.kappa, state.kappa);
        assert_eq!(posterior.eta, state.eta);
    }

    #[test]
    fn boundary_advance_rotates_sets_and_entropy() {
        let params = &TINY_PARAMS;
        let state = genesis_state(params);
        let mut tx = Transition::new(&state);
        let slot = params.epoch_length as TimeSlot;
        let advance = advance_time(&mut tx, params, slot, &DevVrfSuite);
        assert!(advance.epoch_changed);
        let mark = advance.epoch_mark.unwrap();
        assert_eq!(mark.validators.len(), params.validators_count);

        let posterior = tx.commit();
        assert_eq!(posterior.lambda, state.kappa);
        assert_eq!(posterior.kappa, state.gamma.pending);
        assert_eq!(posterior.gamma.pending, state.iota);
        assert_eq!(posterior.eta.0[1], state.eta.0[0]);
        assert_eq!(posterior.eta.0[2], state.eta.0[1]);
        assert_eq!(posterior.eta.0[3], state.eta.0[2]);
        // Sparse lottery: fallback keys derived from the rotated η₂ and κ'.
        match &posterior.gamma.slot_assignment {
            SlotAssignment::Keys(keys) => assert_eq!(
                *keys,
                fallback_key_sequence(&state.eta.0[1], &posterior.kappa, params.epoch_length)
            ),
            SlotAssignment::Tickets(_) => panic!("expected fallback mode"),
        }
    }

    #[test]
    fn saturated_lottery_elects_tickets_outside_in() {
        let params = &TINY_PARAMS;
        let mut state = genesis_state(params);
        let suite = DevVrfSuite;
        let mut bodies: Vec<TicketBody> = (0..params.epoch_length as u8)
            .map(|i| TicketBody { id: crate::crypto::blake2b(&[i]), attempt: 0 })
            .collect();
        bodies.sort_by(|a, b| a.id.cmp(&b.id));
        state.gamma.ticket_accumulator = bodies.clone();

        let mut tx = Transition::new(&state);
        let advance = advance_time(&mut tx, params, params.epoch_length as TimeSlot, &suite);
        assert!(advance.epoch_changed);
        let posterior = tx.commit();
        match &posterior.gamma.slot_assignment {
            SlotAssignment::Tickets(tickets) => assert_eq!(*tickets, outside_in(&bodies)),
            SlotAssignment::Keys(_) => panic!("expected ticket mode"),
        }
        assert!(posterior.gamma.ticket_accumulator.is_empty());
    }

    #[test]
    fn skipped_epoch_forces_fallback_even_with_full_accumulator() {
        let params = &TINY_PARAMS;
        let mut state = genesis_state(params);
        let mut bodies: Vec<TicketBody> = (0..params.epoch_length as u8)
            .map(|i| TicketBody { id: crate::crypto::blake2b(&[i]), attempt: 0 })
            .collect();
        bodies.sort_by(|a, b| a.id.cmp(&b.id));
        state.gamma.ticket_accumulator = bodies;

        let mut tx = Transition::new(&state);
        let two_epochs = 2 * params.epoch_length as TimeSlot;
        advance_time(&mut tx, params, two_epochs, &DevVrfSuite);
        assert!(!tx.gamma().slot_assignment.is_tickets());
    }

    fn submit_ticket(state: &crate::state::State, validator: usize, attempt: u8) -> TicketEnvelope {
        let suite = DevVrfSuite;
        let context = ticket_context(&state.eta.0[2], attempt);
        TicketEnvelope {
            attempt,
            signature: suite.ring_sign(
                &bandersnatch_seed(validator),
                &state.gamma.ring_commitment,
                &context,
            ),
        }
    }

    #[test]
    fn tickets_accumulate_sorted_by_id() {
        let params = &TINY_PARAMS;
        let state = genesis_state(params);
        let suite = DevVrfSuite;

        let mut envelopes: Vec<(Hash32, TicketEnvelope)> = (0..3usize)
            .map(|v| {
                let envelope = submit_ticket(&state, v, 0);
                let context = ticket_context(&state.eta.0[2], 0);
                let id = suite
                    .ring_verify(&state.gamma.ring_commitment, &context, &envelope.signature)
                    .unwrap();
                (id, envelope)
            })
            .collect();
        envelopes.sort_by(|a, b| a.0.cmp(&b.0));
        let sorted: Vec<TicketEnvelope> = envelopes.into_iter().map(|(_, e)| e).collect();

        let mut tx = Transition::new(&state);
        *tx.tau_mut() = 1;
        let accepted = apply_tickets(&mut tx, params, &suite, &sorted).unwrap();
        assert_eq!(accepted.len(), 3);
        let accumulator = &tx.gamma().ticket_accumulator;
        assert_eq!(accumulator.len(), 3);
        assert!(accumulator.windows(2).all(|p| p[0].id < p[1].id));

        // Replaying the same tickets is rejected.
        let err = apply_tickets(&mut tx, params, &suite, &sorted).unwrap_err();
        assert!(matches!(err, SafroleError::DuplicateTicket));
    }

    #[test]
    fn tickets_rejected_after_submission_pivot() {
        let params = &TINY_PARAMS;
        let state = genesis_state(params);
        let mut tx = Transition::new(&state);
        *tx.tau_mut() = params.ticket_submission_end as TimeSlot;
        let envelope = submit_ticket(&state, 0, 0);
        let err = apply_tickets(&mut tx, params, &DevVrfSuite, &[envelope]).unwrap_err();
        assert!(matches!(err, SafroleError::SubmissionClosed { .. }));
    }

    #[test]
    fn bad_ring_proof_is_rejected() {
        let params = &TINY_PARAMS;
        let state = genesis_state(params);
        let mut tx = Transition::new(&state);
        *tx.tau_mut() = 1;
        let envelope = TicketEnvelope {
            attempt: 0,
            signature: RingVrfProof([0u8; crate::primitives::RING_PROOF_LEN]),
        };
        let err = apply_tickets(&mut tx, params, &DevVrfSuite, &[envelope]).unwrap_err();
        assert!(matches!(err, SafroleError::Crypto(_)));
    }

    #[test]
    fn attempt_bound_is_enforced() {
        let params = &TINY_PARAMS;
        let state = genesis_state(params);
        let mut tx = Transition::new(&state);
        *tx.tau_mut() = 1;
        let envelope = submit_ticket(&state, 0, params.max_ticket_entries_per_validator);
        let err = apply_tickets(&mut tx, params, &DevVrfSuite, &[envelope]).unwrap_err();
        assert!(matches!(err, SafroleError::AttemptOutOfRange { .. }));
    }

    #[test]
    fn registry_lookup_reads_previous_epoch() {
        let mut registry = TicketRegistry::default();
        let id = crate::crypto::blake2b(b"ticket");
        registry.record(id, 3, 1);
        assert!(registry.lookup(&id).is_none());
        registry.rotate_epoch();
        assert_eq!(registry.lookup(&id), Some((3, 1)));
        registry.rotate_epoch();
        assert!(registry.lookup(&id).is_none());
    }
}
