//! Safrole state (γ) and the entropy accumulator (η).
//!
//! γ holds the pending validator set, the ring commitment tickets are
//! verified against, the ticket accumulator for the next epoch, and the
//! current epoch's slot assignment (tickets or fallback keys).

use crate::block::TicketBody;
use crate::codec::{
    decode_fixed_seq, decode_seq, encode_fixed_seq, encode_seq, Decode, DecodeError,
    DecodeErrorKind, Encode, EncodeError, PathSeg, Reader,
};
use crate::crypto::blake2b_parts;
use crate::params::Params;
use crate::primitives::{Hash32, RingCommitment, ValidatorKeys};

/// Four 32-byte entropy values; η₀ accumulates per block, the rest rotate at
/// epoch boundaries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entropy(pub [Hash32; 4]);

impl Entropy {
    /// Derive the genesis chain: η₀ is the seed, each later value hashes the
    /// previous one.
    pub fn genesis(seed: Hash32) -> Self {
        let mut values = [seed; 4];
        for i in 1..4 {
            values[i] = blake2b_parts(&[&values[i - 1].0]);
        }
        Self(values)
    }

    /// `η₀' = H(η₀ ‖ vrf_output)`, applied once per block.
    pub fn mix(&mut self, vrf_output: &Hash32) {
        self.0[0] = blake2b_parts(&[&self.0[0].0, &vrf_output.0]);
    }

    /// Epoch-boundary rotation: η₃ ← η₂ ← η₁ ← η₀. Runs before the mix so
    /// η₁' sees the pre-mix η₀.
    pub fn rotate(&mut self) {
        self.0[3] = self.0[2];
        self.0[2] = self.0[1];
        self.0[1] = self.0[0];
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        for value in &self.0 {
            value.encode_to(out);
        }
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        r.typed("Entropy", |r| {
            let mut values = [Hash32::ZERO; 4];
            for (i, value) in values.iter_mut().enumerate() {
                *value = r.scoped(PathSeg::Index(i), Hash32::decode)?;
            }
            Ok(Self(values))
        })
    }
}

/// How the current epoch's slots map to authors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlotAssignment {
    /// One anonymous ticket per slot, outside-in ordered.
    Tickets(Vec<TicketBody>),
    /// Fallback: one bandersnatch key per slot.
    Keys(Vec<Hash32>),
}

impl SlotAssignment {
    pub fn is_tickets(&self) -> bool {
        matches!(self, SlotAssignment::Tickets(_))
    }

    pub fn encode_with(&self, epoch_length: usize, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        match self {
            SlotAssignment::Tickets(tickets) => {
                out.push(0);
                encode_fixed_seq("SlotAssignment::Tickets", tickets, epoch_length, out)
            }
            SlotAssignment::Keys(keys) => {
                out.push(1);
                encode_fixed_seq("SlotAssignment::Keys", keys, epoch_length, out)
            }
        }
    }

    pub fn decode_with(r: &mut Reader<'_>, epoch_length: usize) -> Result<Self, DecodeError> {
        r.typed("SlotAssignment", |r| match r.read_byte()? {
            0 => r.scoped(PathSeg::Variant("Tickets"), |r| {
                Ok(SlotAssignment::Tickets(decode_fixed_seq(r, epoch_length)?))
            }),
            1 => r.scoped(PathSeg::Variant("Keys"), |r| {
                Ok(SlotAssignment::Keys(decode_fixed_seq(r, epoch_length)?))
            }),
            _ => Err(r.error(DecodeErrorKind::InvalidUnionTag)),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SafroleState {
    /// γ.k: the validator set taking over at the next epoch boundary.
    pub pending: Vec<ValidatorKeys>,
    /// γ.z: ring commitment over the pending set's bandersnatch keys.
    pub ring_commitment: RingCommitment,
    /// γ.s: this epoch's slot assignment.
    pub slot_assignment: SlotAssignment,
    /// γ.a: accepted tickets for the next epoch, sorted by id, at most
    /// `epoch_length` of them.
    pub ticket_accumulator: Vec<TicketBody>,
}

impl SafroleState {
    pub fn encode_with(&self, params: &Params, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        encode_fixed_seq("SafroleState.pending", &self.pending, params.validators_count, out)?;
        self.ring_commitment.encode_to(out);
        self.slot_assignment.encode_with(params.epoch_length, out)?;
        encode_seq(&self.ticket_accumulator, out);
        Ok(())
    }

    pub fn decode_with(r: &mut Reader<'_>, params: &Params) -> Result<Self, DecodeError> {
        r.typed("SafroleState", |r| {
            let pending =
                r.field_with("pending", |r| decode_fixed_seq(r, params.validators_count))?;
            let ring_commitment = r.field("ring_commitment")?;
            let slot_assignment = r.field_with("slot_assignment", |r| {
                SlotAssignment::decode_with(r, params.epoch_length)
            })?;
            let ticket_accumulator: Vec<TicketBody> =
                r.field_with("ticket_accumulator", decode_seq)?;
            if ticket_accumulator.len() > params.epoch_length {
                return Err(r.error(DecodeErrorKind::LengthMismatch));
            }
            Ok(Self { pending, ring_commitment, slot_assignment, ticket_accumulator })
        })
    }
}

/// Outside-in ordering: first, last, second, second-to-last, … Spreads
/// adjacent slots across distant submission times. An involution on any
/// even-length sequence.
pub fn outside_in<T: Clone>(items: &[T]) -> Vec<T> {
    let mut out = Vec::with_capacity(items.len());
    let mut front = 0usize;
    let mut back = items.len();
    while front < back {
        out.push(items[front].clone());
        front += 1;
        if front < back {
            back -= 1;
            out.push(items[back].clone());
        }
    }
    out
}

/// Fallback slot assignment: for each slot-in-epoch, hash the entropy with
/// the slot index and pick a bandersnatch key by the low 32 bits.
pub fn fallback_key_sequence(
    entropy: &Hash32,
    validators: &[ValidatorKeys],
    epoch_length: usize,
) -> Vec<Hash32> {
    (0..epoch_length)
        .map(|slot| {
            let hash = blake2b_parts(&[&entropy.0, &(slot as u32).to_le_bytes()]);
            let low = u32::from_le_bytes(hash.0[..4].try_into().expect("hash has 4 bytes"));
            validators[low as usize % validators.len()].bandersnatch
        })
        .collect()
}

/// Merge freshly accepted tickets into the accumulator, keeping it sorted by
/// id and truncated to the best (lowest-id) `epoch_length` entries.
pub fn merge_tickets(
    accumulator: &mut Vec<TicketBody>,
    fresh: impl IntoIterator<Item = TicketBody>,
    epoch_length: usize,
) {
    accumulator.extend(fresh);
    accumulator.sort_by(|a, b| a.id.cmp(&b.id));
    accumulator.dedup_by(|a, b| a.id == b.id);
    accumulator.truncate(epoch_length);
}
