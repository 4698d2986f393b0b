//! State-key derivation.
//!
//! Every state datum lives at a 31-byte key. The derivation is total;
//! a collision between distinct datums is a protocol bug. The interleaving
//! of service-id bytes with data bytes is load-bearing: downstream verifiers
//! reconstruct these keys byte-exactly.

use std::fmt;

use crate::crypto::blake2b;
use crate::primitives::{Hash32, ServiceId};

pub const STATE_KEY_LEN: usize = 31;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateKey(pub [u8; STATE_KEY_LEN]);

impl StateKey {
    pub fn as_bytes(&self) -> &[u8; STATE_KEY_LEN] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; STATE_KEY_LEN] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl fmt::Debug for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Key of global state component `index` (1 = alpha .. 15 = xi).
pub fn component(index: u8) -> StateKey {
    let mut key = [0u8; STATE_KEY_LEN];
    key[0] = index;
    StateKey(key)
}

/// Base key of a service account: 0xFF, then the service id little-endian.
pub fn service_base(service: ServiceId) -> StateKey {
    let mut key = [0u8; STATE_KEY_LEN];
    key[0] = 0xFF;
    key[1..5].copy_from_slice(&service.to_le_bytes());
    StateKey(key)
}

fn interleave(service: ServiceId, data_prefix: &[u8; 4], tail: &[u8]) -> StateKey {
    debug_assert_eq!(tail.len(), 23);
    let id = service.to_le_bytes();
    let mut key = [0u8; STATE_KEY_LEN];
    for i in 0..4 {
        key[2 * i] = id[i];
        key[2 * i + 1] = data_prefix[i];
    }
    key[8..].copy_from_slice(tail);
    StateKey(key)
}

/// Key of a storage or preimage row: service-id bytes interleaved with the
/// first four bytes of the 32-byte datum hash, then the 23-byte hash tail.
pub fn service_data(service: ServiceId, data: &Hash32) -> StateKey {
    let prefix: [u8; 4] = data.0[..4].try_into().expect("hash has at least 4 bytes");
    interleave(service, &prefix, &data.0[4..27])
}

/// Key of a preimage-lookup row: the interleave takes the little-endian
/// preimage length as the data prefix and the tail comes from re-hashing the
/// preimage hash.
pub fn service_lookup(service: ServiceId, preimage_len: u32, hash: &Hash32) -> StateKey {
    let rehashed = blake2b(&hash.0);
    interleave(service, &preimage_len.to_le_bytes(), &rehashed.0[..23])
}

/// Key of a storage row addressed by a raw storage key.
pub fn service_storage(service: ServiceId, raw_key: &[u8]) -> StateKey {
    service_data(service, &blake2b(raw_key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_keys_are_index_then_zeros() {
        let key = component(11);
        assert_eq!(key.0[0], 11);
        assert!(key.0[1..].iter().all(|&b| b == 0));
    }

    #[test]
    fn service_base_layout() {
        let key = service_base(0x0403_0201);
        assert_eq!(key.0[0], 0xFF);
        assert_eq!(&key.0[1..5], &[0x01, 0x02, 0x03, 0x04]);
        assert!(key.0[5..].iter().all(|&b| b == 0));
    }

    #[test]
    fn data_key_interleaves_service_and_hash() {
        let mut hash = [0u8; 32];
        for (i, byte) in hash.iter_mut().enumerate() {
            *byte = 0xA0 + i as u8;
        }
        let key = service_data(0x0403_0201, &Hash32(hash));
        assert_eq!(&key.0[..8], &[0x01, 0xA0, 0x02, 0xA1, 0x03, 0xA2, 0x04, 0xA3]);
        assert_eq!(&key.0[8..], &hash[4..27]);
    }

    #[test]
    fn lookup_key_uses_length_prefix_and_rehash_tail() {
        let hash = blake2b(b"preimage");
        let key = service_lookup(7, 0x0000_0102, &hash);
        assert_eq!(&key.0[..8], &[7, 0x02, 0, 0x01, 0, 0, 0, 0]);
        assert_eq!(&key.0[8..], &blake2b(&hash.0).0[..23]);
    }

    #[test]
    fn distinct_datums_get_distinct_keys() {
        let h1 = blake2b(b"one");
        let h2 = blake2b(b"two");
        let keys = [
            component(1),
            service_base(1),
            service_data(1, &h1),
            service_data(1, &h2),
            service_data(2, &h1),
            service_lookup(1, 3, &h1),
            service_lookup(1, 4, &h1),
        ];
        for (i, a) in keys.iter().enumerate() {
            for b in keys.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn keys_sort_lexicographically() {
        let a = component(1);
        let b = component(2);
        let s = service_base(0);
        assert!(a < b);
        assert!(b < s);
    }
}
