//! Per-block authorizer rotation: guarantees consume pool entries, the
//! per-core queue refills them.

use crate::params::Params;
use crate::primitives::{CoreIndex, Hash32};
use crate::transition::Transition;

/// Advance α for one block. Each core drops the authorizer a guarantee spent
/// on it, then draws the queue entry indexed by the current slot, trimming
/// the pool's oldest entry when it overflows.
pub fn rotate_authorizer_pools(
    tx: &mut Transition<'_>,
    params: &Params,
    used: &[(CoreIndex, Hash32)],
) {
    let slot = *tx.tau();
    for core in 0..params.core_count {
        let draw = {
            let queue = &tx.phi()[core];
            if queue.is_empty() {
                None
            } else {
                Some(queue[slot as usize % queue.len()])
            }
        };

        let spent = used
            .iter()
            .find(|(used_core, _)| *used_core as usize == core)
            .map(|(_, authorizer)| *authorizer);

        let needs_update = spent.is_some() || draw.is_some();
        if !needs_update {
            continue;
        }
        let pool = &mut tx.alpha_mut()[core];
        if let Some(authorizer) = spent {
            if let Some(position) = pool.iter().position(|a| *a == authorizer) {
                pool.remove(position);
            }
        }
        if let Some(next) = draw {
            pool.push(next);
            while pool.len() > params.max_authorizations_pool_items {
                pool.remove(0);
            }
        }
    }
}
