//! Service accounts: the value type of the Δ service-id→account map.

use std::collections::BTreeMap;

use crate::codec::{
    decode_blob, decode_varint, encode_blob, encode_varint, Decode, DecodeError, DecodeErrorKind,
    Encode, Reader,
};
use crate::primitives::{Balance, Gas, Hash32, TimeSlot};
use crate::state_key::StateKey;

/// Lifecycle of a requested preimage: up to three time slots.
///
/// Empty means requested but never provided; one slot means available since
/// then; two means it expired at the second slot; three means it was provided
/// again. A fourth provision is rejected.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct PreimageStatus(pub Vec<TimeSlot>);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("preimage lifecycle already complete, cannot record another slot")]
pub struct LifecycleComplete;

impl PreimageStatus {
    pub const MAX_SLOTS: usize = 3;

    pub fn is_requested(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_available(&self) -> bool {
        self.0.len() % 2 == 1
    }

    pub fn record(&mut self, slot: TimeSlot) -> Result<(), LifecycleComplete> {
        if self.0.len() >= Self::MAX_SLOTS {
            return Err(LifecycleComplete);
        }
        self.0.push(slot);
        Ok(())
    }
}

impl Encode for PreimageStatus {
    fn encode_to(&self, out: &mut Vec<u8>) {
        encode_varint(self.0.len() as u64, out);
        for slot in &self.0 {
            slot.encode_to(out);
        }
    }
}

impl Decode for PreimageStatus {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        r.typed("PreimageStatus", |r| {
            let len = decode_varint(r)? as usize;
            if len > Self::MAX_SLOTS {
                return Err(r.error(DecodeErrorKind::LengthMismatch));
            }
            let mut slots = Vec::with_capacity(len);
            for _ in 0..len {
                slots.push(TimeSlot::decode(r)?);
            }
            Ok(Self(slots))
        })
    }
}

/// An addressable unit of on-chain state: code, balance, gas floors, and the
/// three keyed sub-dictionaries. Map keys are the exact 31-byte state keys
/// the derivation produces, so merklization can emit rows without rekeying.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceAccount {
    pub code_hash: Hash32,
    pub balance: Balance,
    pub min_accumulate_gas: Gas,
    pub min_transfer_gas: Gas,
    pub storage: BTreeMap<StateKey, Vec<u8>>,
    pub preimages: BTreeMap<StateKey, Vec<u8>>,
    pub lookups: BTreeMap<StateKey, PreimageStatus>,
}

impl ServiceAccount {
    pub fn new(code_hash: Hash32, balance: Balance) -> Self {
        Self {
            code_hash,
            balance,
            min_accumulate_gas: 0,
            min_transfer_gas: 0,
            storage: BTreeMap::new(),
            preimages: BTreeMap::new(),
            lookups: BTreeMap::new(),
        }
    }

    /// The value stored at the account's base state key.
    pub fn metadata_encoding(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.code_hash.encode_to(&mut out);
        self.balance.encode_to(&mut out);
        self.min_accumulate_gas.encode_to(&mut out);
        self.min_transfer_gas.encode_to(&mut out);
        out
    }
}

fn encode_key_map<V>(
    map: &BTreeMap<StateKey, V>,
    out: &mut Vec<u8>,
    encode_value: impl Fn(&V, &mut Vec<u8>),
) {
    encode_varint(map.len() as u64, out);
    for (key, value) in map {
        out.extend_from_slice(key.as_bytes());
        encode_value(value, out);
    }
}

fn decode_key_map<V>(
    r: &mut Reader<'_>,
    decode_value: impl Fn(&mut Reader<'_>) -> Result<V, DecodeError>,
) -> Result<BTreeMap<StateKey, V>, DecodeError> {
    let len = decode_varint(r)? as usize;
    let mut map = BTreeMap::new();
    for _ in 0..len {
        let key = StateKey(r.read_array()?);
        let value = decode_value(r)?;
        map.insert(key, value);
    }
    Ok(map)
}

impl Encode for ServiceAccount {
    fn encode_to(&self, out: &mut Vec<u8>) {
        self.code_hash.encode_to(out);
        self.balance.encode_to(out);
        self.min_accumulate_gas.encode_to(out);
        self.min_transfer_gas.encode_to(out);
        encode_key_map(&self.storage, out, |v, out| encode_blob(v, out));
        encode_key_map(&self.preimages, out, |v, out| encode_blob(v, out));
        encode_key_map(&self.lookups, out, |v, out| v.encode_to(out));
    }
}

impl Decode for ServiceAccount {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        r.typed("ServiceAccount", |r| {
            Ok(Self {
                code_hash: r.field("code_hash")?,
                balance: r.field("balance")?,
                min_accumulate_gas: r.field("min_accumulate_gas")?,
                min_transfer_gas: r.field("min_transfer_gas")?,
                storage: r.field_with("storage", |r| decode_key_map(r, decode_blob))?,
                preimages: r.field_with("preimages", |r| decode_key_map(r, decode_blob))?,
                lookups: r.field_with("lookups", |r| decode_key_map(r, PreimageStatus::decode))?,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode_all;
    use crate::crypto::blake2b;
    use crate::state_key;

    #[test]
    fn lifecycle_progresses_and_saturates() {
        let mut status = PreimageStatus::default();
        assert!(status.is_requested());
        assert!(!status.is_available());
        status.record(10).unwrap();
        assert!(status.is_available());
        status.record(20).unwrap();
        assert!(!status.is_available());
        status.record(30).unwrap();
        assert!(status.is_available());
        assert_eq!(status.record(40), Err(LifecycleComplete));
        assert_eq!(status.0, vec![10, 20, 30]);
    }

    #[test]
    fn status_decode_rejects_overlong_sequences() {
        let mut bytes = Vec::new();
        encode_varint(4, &mut bytes);
        bytes.extend_from_slice(&[0u8; 16]);
        let err = decode_all::<PreimageStatus>(&bytes).unwrap_err();
        assert_eq!(err.kind, DecodeErrorKind::LengthMismatch);
    }

    #[test]
    fn account_round_trip() {
        let mut account = ServiceAccount::new(blake2b(b"code"), 1_000);
        account.min_accumulate_gas = 100;
        let data = blake2b(b"datum");
        account.storage.insert(state_key::service_data(7, &data), vec![1, 2, 3]);
        account
            .preimages
            .insert(state_key::service_data(7, &blake2b(b"blob")), b"blob".to_vec());
        account
            .lookups
            .insert(state_key::service_lookup(7, 4, &blake2b(b"blob")), PreimageStatus(vec![5]));
        let decoded = decode_all::<ServiceAccount>(&account.encoded()).unwrap();
        assert_eq!(decoded, account);
    }
}
