//! Merklization dictionary: the flat key→value view of a state snapshot.
//!
//! One entry per state datum: the fifteen global components, then one base
//! row per service plus a row for every storage, preimage and lookup item.
//! The state root is the balanced Blake2b tree over the sorted entries.

use std::collections::BTreeMap;

use crate::codec::{Encode, EncodeError};
use crate::merkle::{merkle_root, Blake2bTree};
use crate::params::Params;
use crate::primitives::Hash32;
use crate::state::{State, COMPONENT_COUNT};
use crate::state_key::{self, StateKey};

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct StateDictionary {
    pub entries: BTreeMap<StateKey, Vec<u8>>,
}

/// Outcome of diffing two dictionaries, keyed views only.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DictDiff {
    pub added: Vec<(StateKey, Vec<u8>)>,
    pub removed: Vec<(StateKey, Vec<u8>)>,
    pub changed: Vec<(StateKey, Vec<u8>, Vec<u8>)>,
}

impl DictDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

impl StateDictionary {
    pub fn build(state: &State, params: &Params) -> Result<Self, EncodeError> {
        let mut entries = BTreeMap::new();
        for index in 1..=COMPONENT_COUNT {
            entries.insert(state_key::component(index), state.component_encoding(index, params)?);
        }
        for (service, account) in &state.delta {
            entries.insert(state_key::service_base(*service), account.metadata_encoding());
            for (key, value) in &account.storage {
                entries.insert(*key, value.clone());
            }
            for (key, value) in &account.preimages {
                entries.insert(*key, value.clone());
            }
            for (key, status) in &account.lookups {
                entries.insert(*key, status.encoded());
            }
        }
        Ok(Self { entries })
    }

    /// Balanced Blake2b tree over `key ‖ value` leaves in key order.
    pub fn state_root(&self) -> Hash32 {
        let leaves: Vec<Vec<u8>> = self
            .entries
            .iter()
            .map(|(key, value)| {
                let mut leaf = Vec::with_capacity(key.0.len() + value.len());
                leaf.extend_from_slice(key.as_bytes());
                leaf.extend_from_slice(value);
                leaf
            })
            .collect();
        merkle_root::<Blake2bTree, _>(&leaves)
    }

    /// Entries in `other` but not here, entries here but not in `other`, and
    /// keys present in both with different values.
    pub fn diff(&self, other: &StateDictionary) -> DictDiff {
        let mut diff = DictDiff::default();
        for (key, value) in &other.entries {
            match self.entries.get(key) {
                None => diff.added.push((*key, value.clone())),
                Some(existing) if existing != value => {
                    diff.changed.push((*key, existing.clone(), value.clone()));
                }
                Some(_) => {}
            }
        }
        for (key, value) in &self.entries {
            if !other.entries.contains_key(key) {
                diff.removed.push((*key, value.clone()));
            }
        }
        diff
    }
}
