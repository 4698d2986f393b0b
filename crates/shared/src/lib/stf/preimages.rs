//! Preimage provision: bind blobs to the requesting service account and
//! progress the three-slot lookup lifecycle.

use itertools::Itertools;

use crate::block::Preimage;
use crate::crypto::blake2b;
use crate::params::Params;
use crate::primitives::{Hash32, ServiceId};
use crate::state_key;
use crate::transition::Transition;

#[derive(Debug, thiserror::Error)]
pub enum PreimageError {
    #[error("block provides {actual} preimages, bound is {bound}")]
    TooMany { actual: usize, bound: usize },
    #[error("block provides {actual} preimage bytes, bound is {bound}")]
    TotalBytesExceeded { actual: usize, bound: usize },
    #[error("preimages are not strictly ascending by (service, hash)")]
    Unsorted,
    #[error("service {service} does not exist")]
    UnknownService { service: ServiceId },
    #[error("service {service} never solicited preimage {hash}")]
    NotSolicited { service: ServiceId, hash: Hash32 },
    #[error("preimage {hash} for service {service} exhausted its lifecycle")]
    LifecycleComplete { service: ServiceId, hash: Hash32 },
}

/// Integrate the preimage extrinsic at the current slot.
pub fn apply_preimages(
    tx: &mut Transition<'_>,
    params: &Params,
    preimages: &[Preimage],
) -> Result<(), PreimageError> {
    if preimages.len() > params.max_preimages_per_block {
        return Err(PreimageError::TooMany {
            actual: preimages.len(),
            bound: params.max_preimages_per_block,
        });
    }
    let total: usize = preimages.iter().map(|p| p.blob.len()).sum();
    if total > params.max_preimage_total_bytes {
        return Err(PreimageError::TotalBytesExceeded {
            actual: total,
            bound: params.max_preimage_total_bytes,
        });
    }

    let hashed: Vec<(ServiceId, Hash32, &Preimage)> = preimages
        .iter()
        .map(|p| (p.requester, blake2b(&p.blob), p))
        .collect();
    if !hashed
        .iter()
        .tuple_windows()
        .all(|(a, b)| (a.0, a.1) < (b.0, b.1))
    {
        return Err(PreimageError::Unsorted);
    }

    let slot = *tx.tau();
    for (service, hash, preimage) in hashed {
        if tx.account(service).is_none() {
            return Err(PreimageError::UnknownService { service });
        }
        let lookup_key = state_key::service_lookup(service, preimage.blob.len() as u32, &hash);
        let account = tx.account_mut(service).expect("existence checked above");
        let Some(status) = account.lookups.get_mut(&lookup_key) else {
            return Err(PreimageError::NotSolicited { service, hash });
        };
        status
            .record(slot)
            .map_err(|_| PreimageError::LifecycleComplete { service, hash })?;
        account
            .preimages
            .entry(state_key::service_data(service, &hash))
            .or_insert_with(|| preimage.blob.clone());

        let stats = tx.pi_mut().services.entry(service).or_default();
        stats.provided_count += 1;
        stats.provided_size += preimage.blob.len() as u32;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::TINY_PARAMS;
    use crate::state::test_fixtures::genesis_state;
    use crate::state::{PreimageStatus, ServiceAccount, State};

    const SERVICE: ServiceId = 16;

    fn soliciting_state(blob: &[u8]) -> (State, Hash32) {
        let mut state = genesis_state(&TINY_PARAMS);
        let hash = blake2b(blob);
        let mut account = ServiceAccount::new(blake2b(b"code"), 1_000);
        account.lookups.insert(
            state_key::service_lookup(SERVICE, blob.len() as u32, &hash),
            PreimageStatus::default(),
        );
        state.delta.insert(SERVICE, account);
        (state, hash)
    }

    fn provide(state: &State, slot: u32, blob: &[u8]) -> Result<State, PreimageError> {
        let mut tx = Transition::new(state);
        *tx.tau_mut() = slot;
        apply_preimages(
            &mut tx,
            &TINY_PARAMS,
            &[Preimage { requester: SERVICE, blob: blob.to_vec() }],
        )?;
        Ok(tx.commit())
    }

    #[test]
    fn lifecycle_progresses_through_three_slots_then_rejects() {
        let blob = b"the-preimage";
        let (state, hash) = soliciting_state(blob);
        let lookup_key = state_key::service_lookup(SERVICE, blob.len() as u32, &hash);
        let data_key = state_key::service_data(SERVICE, &hash);

        let state = provide(&state, 10, blob).unwrap();
        let account = &state.delta[&SERVICE];
        assert_eq!(account.lookups[&lookup_key].0, vec![10]);
        assert_eq!(account.preimages[&data_key], blob.to_vec());

        let state = provide(&state, 20, blob).unwrap();
        assert_eq!(state.delta[&SERVICE].lookups[&lookup_key].0, vec![10, 20]);

        let state = provide(&state, 30, blob).unwrap();
        assert_eq!(state.delta[&SERVICE].lookups[&lookup_key].0, vec![10, 20, 30]);

        let err = provide(&state, 40, blob).unwrap_err();
        assert!(matches!(err, PreimageError::LifecycleComplete { .. }));
    }

    #[test]
    fn unsolicited_preimage_is_rejected() {
        let (state, _) = soliciting_state(b"expected");
        let err = provide(&state, 5, b"unexpected").unwrap_err();
        assert!(matches!(err, PreimageError::NotSolicited { .. }));
    }

    #[test]
    fn unknown_service_is_rejected() {
        let state = genesis_state(&TINY_PARAMS);
        let mut tx = Transition::new(&state);
        *tx.tau_mut() = 1;
        let err = apply_preimages(
            &mut tx,
            &TINY_PARAMS,
            &[Preimage { requester: 404, blob: vec![1] }],
        )
        .unwrap_err();
        assert!(matches!(err, PreimageError::UnknownService { service: 404 }));
    }

    #[test]
    fn per_block_bounds_are_enforced() {
        let params = &TINY_PARAMS;
        let state = genesis_state(params);
        let mut tx = Transition::new(&state);

        let too_many: Vec<Preimage> = (0..params.max_preimages_per_block + 1)
            .map(|i| Preimage { requester: SERVICE, blob: vec![i as u8] })
            .collect();
        assert!(matches!(
            apply_preimages(&mut tx, params, &too_many).unwrap_err(),
            PreimageError::TooMany { .. }
        ));

        let oversize = vec![Preimage {
            requester: SERVICE,
            blob: vec![0u8; params.max_preimage_total_bytes + 1],
        }];
        assert!(matches!(
            apply_preimages(&mut tx, params, &oversize).unwrap_err(),
            PreimageError::TotalBytesExceeded { .. }
        ));
    }

    #[test]
    fn unsorted_pairs_are_rejected() {
        let (mut state, _) = soliciting_state(b"one");
        // A second solicited blob so both entries are individually valid.
        let other = b"two";
        let other_hash = blake2b(other);
        state.delta.get_mut(&SERVICE).unwrap().lookups.insert(
            state_key::service_lookup(SERVICE, other.len() as u32, &other_hash),
            PreimageStatus::default(),
        );

        let mut pair = vec![
            Preimage { requester: SERVICE, blob: b"one".to_vec() },
            Preimage { requester: SERVICE, blob: other.to_vec() },
        ];
        pair.sort_by_key(|p| blake2b(&p.blob));
        pair.reverse();

        let mut tx = Transition::new(&state);
        *tx.tau_mut() = 1;
        assert!(matches!(
            apply_preimages(&mut tx, &TINY_PARAMS, &pair).unwrap_err(),
            PreimageError::Unsorted
        ));
    }
}
