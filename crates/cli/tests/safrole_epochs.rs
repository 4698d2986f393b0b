//! Epoch-boundary behaviour: fallback elections when the lottery comes up
//! short, and the full ticket path from anonymous submission to a sealed
//! block in the following epoch.

mod test_utils;

use jam_stf_cli::dev;
use jam_stf_shared::block::TicketEnvelope;
use jam_stf_shared::crypto::{blake2b_parts, DevVrfSuite, VrfSuite};
use jam_stf_shared::primitives::{Hash32, TimeSlot};
use jam_stf_shared::state::SlotAssignment;
use jam_stf_shared::stf::safrole::ticket_context;
use jam_stf_shared::stf::Mempool;
use test_utils::{tiny, TestChain};

fn submit_tickets(harness: &mut TestChain, per_validator_attempts: u8) -> usize {
    let params = tiny();
    let state = harness.state().clone();
    let suite = DevVrfSuite;
    let mut envelopes = Vec::new();
    for validator in 0..params.validators_count {
        for attempt in 0..per_validator_attempts {
            let context = ticket_context(&state.eta.0[2], attempt);
            let signature = suite.ring_sign(
                &dev::bandersnatch_seed(validator),
                &state.gamma.ring_commitment,
                &context,
            );
            let id = suite
                .ring_verify(&state.gamma.ring_commitment, &context, &signature)
                .unwrap();
            harness.registry.record(id, validator as u16, attempt);
            envelopes.push(TicketEnvelope { attempt, signature });
        }
    }
    let count = envelopes.len();
    let mempool = Mempool { tickets: envelopes, ..Default::default() };
    harness.build_and_import(1, &mempool);
    count
}

#[test]
fn sparse_lottery_falls_back_to_keys() {
    let params = tiny();
    let mut harness = TestChain::from_genesis();

    // Eleven tickets: one short of the epoch length, so the rollover must
    // select fallback keys.
    let state = harness.state().clone();
    let suite = DevVrfSuite;
    let mut envelopes = Vec::new();
    'outer: for validator in 0..params.validators_count {
        for attempt in 0..params.max_ticket_entries_per_validator {
            if envelopes.len() == params.epoch_length - 1 {
                break 'outer;
            }
            let context = ticket_context(&state.eta.0[2], attempt);
            envelopes.push(TicketEnvelope {
                attempt,
                signature: suite.ring_sign(
                    &dev::bandersnatch_seed(validator),
                    &state.gamma.ring_commitment,
                    &context,
                ),
            });
        }
    }
    let mempool = Mempool { tickets: envelopes, ..Default::default() };
    harness.build_and_import(1, &mempool);
    assert_eq!(harness.state().gamma.ticket_accumulator.len(), params.epoch_length - 1);

    let eta1_before = harness.state().eta.0[1];
    let rollover_slot = params.epoch_length as TimeSlot;
    let block = harness.build(rollover_slot, &Mempool::default());
    assert!(block.header.epoch_mark.is_some());
    harness.import(&block).unwrap();

    let state = harness.state();
    // Fallback selection: each slot keyed by blake2b(η₂' ‖ slot index).
    let SlotAssignment::Keys(keys) = &state.gamma.slot_assignment else {
        panic!("expected fallback mode");
    };
    assert_eq!(state.eta.0[2], eta1_before);
    for (slot, key) in keys.iter().enumerate() {
        let hash = blake2b_parts(&[&state.eta.0[2].0, &(slot as u32).to_le_bytes()]);
        let index = u32::from_le_bytes(hash.0[..4].try_into().unwrap()) as usize
            % params.validators_count;
        assert_eq!(*key, state.kappa[index].bandersnatch);
    }
    assert!(state.gamma.ticket_accumulator.is_empty());

    // The next slot of the new epoch seals under the fallback context.
    harness.build_and_import(rollover_slot + 1, &Mempool::default());
    assert_eq!(harness.state().tau, rollover_slot + 1);
}

#[test]
fn saturated_lottery_elects_tickets_and_seals_the_next_epoch() {
    let params = tiny();
    let mut harness = TestChain::from_genesis();

    // Six validators times two attempts saturates the twelve-slot epoch.
    let submitted = submit_tickets(&mut harness, params.max_ticket_entries_per_validator);
    assert_eq!(submitted, params.epoch_length);
    assert_eq!(harness.state().gamma.ticket_accumulator.len(), params.epoch_length);

    let accumulator = harness.state().gamma.ticket_accumulator.clone();

    // Tickets submitted in epoch 0 elect epoch 1; rotate the local registry
    // alongside the chain.
    harness.registry.rotate_epoch();
    let rollover_slot = params.epoch_length as TimeSlot;
    let author = {
        // First slot of the new epoch belongs to the outside-in head of the
        // accumulator: the registry knows which validator produced it.
        let head = accumulator[0];
        let (validator, attempt) = harness.registry.lookup(&head.id).unwrap();
        assert_eq!(attempt, head.attempt);
        jam_stf_shared::stf::AuthorCredentials {
            index: validator,
            bandersnatch_seed: dev::bandersnatch_seed(validator as usize),
        }
    };
    let block = harness
        .stf
        .build_block(
            harness.state(),
            &harness.registry,
            &author,
            rollover_slot,
            harness.chain.state_root(),
            &Mempool::default(),
        )
        .unwrap();
    harness.import(&block).unwrap();

    let state = harness.state();
    let SlotAssignment::Tickets(tickets) = &state.gamma.slot_assignment else {
        panic!("expected ticket mode");
    };
    // Outside-in: first, last, second, second-to-last, …
    let expected: Vec<Hash32> = {
        let ids: Vec<Hash32> = accumulator.iter().map(|t| t.id).collect();
        let mut out = Vec::new();
        let (mut front, mut back) = (0usize, ids.len());
        while front < back {
            out.push(ids[front]);
            front += 1;
            if front < back {
                back -= 1;
                out.push(ids[back]);
            }
        }
        out
    };
    let actual: Vec<Hash32> = tickets.iter().map(|t| t.id).collect();
    assert_eq!(actual, expected);
    assert!(state.gamma.ticket_accumulator.is_empty());
    assert_eq!(state.tau, rollover_slot);
}

#[test]
fn three_epochs_of_empty_blocks_replay_deterministically() {
    let params = tiny();
    let span = 3 * params.epoch_length as TimeSlot;

    let mut first = TestChain::from_genesis();
    let mut blocks = Vec::new();
    let mut roots = Vec::new();
    for slot in 1..=span {
        let block = first.build(slot, &Mempool::default());
        roots.push(first.import(&block).unwrap());
        blocks.push(block);
    }
    assert_eq!(first.state().tau, span);
    // History window stayed bounded the whole way.
    assert!(first.state().beta.blocks.len() <= params.max_blocks_history);

    let mut second = TestChain::from_genesis();
    for (block, expected) in blocks.iter().zip(&roots) {
        assert_eq!(second.import(block).unwrap(), *expected);
    }
    assert_eq!(first.state(), second.state());
}

#[test]
fn epoch_mark_is_required_and_verified() {
    let params = tiny();
    let mut harness = TestChain::from_genesis();
    harness.build_and_import(1, &Mempool::default());

    // Strip the epoch mark off a rollover block; import must refuse it.
    let rollover_slot = params.epoch_length as TimeSlot;
    let mut block = harness.build(rollover_slot, &Mempool::default());
    assert!(block.header.epoch_mark.is_some());
    block.header.epoch_mark = None;
    assert!(harness.import(&block).is_err());

    // The untampered block is still welcome.
    let block = harness.build(rollover_slot, &Mempool::default());
    harness.import(&block).unwrap();
    assert_eq!(harness.state().tau, rollover_slot);
}
