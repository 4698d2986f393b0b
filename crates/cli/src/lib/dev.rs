//! Deterministic development fixtures: validator key material with
//! recoverable seeds, and a genesis state wired for the dev crypto suite.
//! Used by the trace tooling and the integration tests; never by consensus
//! code.

use jam_stf_shared::crypto::{blake2b, ed25519_public, DevVrfSuite, VrfSuite};
use jam_stf_shared::params::Params;
use jam_stf_shared::primitives::{
    Hash32, TimeSlot, ValidatorIndex, ValidatorKeys, BLS_KEY_LEN, VALIDATOR_METADATA_LEN,
};
use jam_stf_shared::state::{SlotAssignment, State};
use jam_stf_shared::stf::AuthorCredentials;

/// Bandersnatch secret seed of dev validator `index`.
pub fn bandersnatch_seed(index: usize) -> Hash32 {
    blake2b(&[b"band".as_slice(), &(index as u32).to_le_bytes()].concat())
}

/// Ed25519 secret seed of dev validator `index`.
pub fn ed25519_seed(index: usize) -> Hash32 {
    blake2b(&[b"ed".as_slice(), &(index as u32).to_le_bytes()].concat())
}

pub fn validator_keys(count: usize) -> Vec<ValidatorKeys> {
    let suite = DevVrfSuite;
    (0..count)
        .map(|i| ValidatorKeys {
            bandersnatch: suite.public_key(&bandersnatch_seed(i)),
            ed25519: ed25519_public(&ed25519_seed(i)),
            bls: [0u8; BLS_KEY_LEN],
            metadata: [0u8; VALIDATOR_METADATA_LEN],
        })
        .collect()
}

pub fn genesis_state(params: &Params) -> State {
    let validators = validator_keys(params.validators_count);
    let ring_keys: Vec<Hash32> = validators.iter().map(|v| v.bandersnatch).collect();
    let commitment = DevVrfSuite.ring_commitment(&ring_keys);
    State::genesis(params, validators, blake2b(b"genesis-entropy"), commitment)
}

/// Credentials of the validator entitled to author `slot`, while the chain
/// is (or, across a rollover, will be) in fallback mode. `None` once tickets
/// hold the slot — the ticket registry decides then.
pub fn slot_author(state: &State, params: &Params, slot: TimeSlot) -> Option<AuthorCredentials> {
    let phase = params.slot_phase(slot);
    let assigned_key = if params.is_epoch_boundary(state.tau, slot) {
        // Mirror the rollover: a fresh, saturated lottery elects tickets;
        // anything else derives fallback keys from the rotated η₂ and the
        // incoming validator set.
        let fresh = params.epoch_of(slot) == params.epoch_of(state.tau) + 1;
        if fresh && state.gamma.ticket_accumulator.len() == params.epoch_length {
            return None;
        }
        jam_stf_shared::state::fallback_key_sequence(
            &state.eta.0[1],
            &state.gamma.pending,
            params.epoch_length,
        )[phase]
    } else {
        match &state.gamma.slot_assignment {
            SlotAssignment::Keys(keys) => keys[phase],
            SlotAssignment::Tickets(_) => return None,
        }
    };
    let validators = validator_keys(params.validators_count);
    let index = validators.iter().position(|v| v.bandersnatch == assigned_key)?;
    Some(AuthorCredentials {
        index: index as ValidatorIndex,
        bandersnatch_seed: bandersnatch_seed(index),
    })
}
