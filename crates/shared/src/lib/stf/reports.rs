//! The availability pipeline: guarantees admit work reports onto cores,
//! assurances graduate them to accumulation, timeouts drop the stalled.

use itertools::Itertools;

use crate::block::{Assurance, ReportGuarantee};
use crate::crypto::{blake2b_parts, verify_ed25519, CryptoError};
use crate::params::Params;
use crate::primitives::{CoreIndex, Hash32, TimeSlot, ValidatorIndex};
use crate::state::CoreAssignment;
use crate::stf::{AVAILABLE_CONTEXT, GUARANTEE_CONTEXT};
use crate::transition::Transition;
use crate::work::WorkReport;

#[derive(Debug, thiserror::Error)]
pub enum ReportsError {
    #[error("core index {core} is out of range")]
    CoreOutOfRange { core: CoreIndex },
    #[error("report carries {actual} results, allowed range is 1..={bound}")]
    ResultCountOutOfRange { actual: usize, bound: usize },
    #[error("package {package} was already accumulated")]
    AlreadyAccumulated { package: Hash32 },
    #[error("package {package} is already pending on a core")]
    AlreadyPending { package: Hash32 },
    #[error("package {package} was already reported in recent history")]
    AlreadyReported { package: Hash32 },
    #[error("authorizer {authorizer} is not pooled for core {core}")]
    AuthorizerNotPooled { authorizer: Hash32, core: CoreIndex },
    #[error("lookup anchor slot {anchor} is older than the recent-history window at slot {slot}")]
    StaleLookupAnchor { anchor: TimeSlot, slot: TimeSlot },
    #[error("guarantee slot {guarantee} is ahead of the importing slot {slot}")]
    GuaranteeSlotInFuture { guarantee: TimeSlot, slot: TimeSlot },
    #[error("guarantee carries {actual} signatures, quorum is {quorum}")]
    InsufficientSignatures { actual: usize, quorum: usize },
    #[error("guarantor indices are not strictly ascending")]
    UnsortedGuarantors,
    #[error("validator index {index} is out of range")]
    ValidatorIndexOutOfRange { index: ValidatorIndex },
    #[error("core {core} is occupied and its assignment has not timed out")]
    CoreOccupied { core: CoreIndex },
    #[error("assurance anchor {actual} does not match the parent header {expected}")]
    AnchorMismatch { actual: Hash32, expected: Hash32 },
    #[error("assurances are not strictly ascending by validator index")]
    UnsortedAssurances,
    #[error("assurance asserts availability for empty core {core}")]
    AssuranceForEmptyCore { core: usize },
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// The message guarantors sign over.
pub fn guarantee_message(report_hash: &Hash32, slot: TimeSlot) -> Vec<u8> {
    [GUARANTEE_CONTEXT, report_hash.0.as_slice(), &slot.to_le_bytes()].concat()
}

/// The message an availability assurance signs over.
pub fn assurance_message(anchor: &Hash32, bitfield: &[u8]) -> Vec<u8> {
    let payload = blake2b_parts(&[&anchor.0, bitfield]);
    [AVAILABLE_CONTEXT, payload.0.as_slice()].concat()
}

/// Admit guaranteed work reports onto their cores.
pub fn apply_guarantees(
    tx: &mut Transition<'_>,
    params: &Params,
    guarantees: &[ReportGuarantee],
) -> Result<(), ReportsError> {
    let slot = *tx.tau();
    for guarantee in guarantees {
        let report = &guarantee.report;
        let core = report.core_index;
        if core as usize >= params.core_count {
            return Err(ReportsError::CoreOutOfRange { core });
        }
        if report.results.is_empty() || report.results.len() > params.max_work_items_per_package {
            return Err(ReportsError::ResultCountOutOfRange {
                actual: report.results.len(),
                bound: params.max_work_items_per_package,
            });
        }

        let package = report.package_hash();
        if tx.xi().contains(&package) {
            return Err(ReportsError::AlreadyAccumulated { package });
        }
        if tx
            .rho()
            .iter()
            .any(|slot| slot.as_ref().is_some_and(|a| a.report.package_hash() == package))
        {
            return Err(ReportsError::AlreadyPending { package });
        }
        if tx.beta().contains_package(&package) {
            return Err(ReportsError::AlreadyReported { package });
        }
        if !tx.alpha()[core as usize].contains(&report.authorizer_hash) {
            return Err(ReportsError::AuthorizerNotPooled {
                authorizer: report.authorizer_hash,
                core,
            });
        }
        if report.context.lookup_anchor_slot + (params.recent_history_size as TimeSlot) < slot {
            return Err(ReportsError::StaleLookupAnchor {
                anchor: report.context.lookup_anchor_slot,
                slot,
            });
        }
        if guarantee.slot > slot {
            return Err(ReportsError::GuaranteeSlotInFuture { guarantee: guarantee.slot, slot });
        }

        verify_guarantor_signatures(tx, params, guarantee)?;

        // The core must be free, or its previous assignment old enough to
        // replace.
        if let Some(existing) = &tx.rho()[core as usize] {
            if slot < existing.timeout + params.work_replacement_period {
                return Err(ReportsError::CoreOccupied { core });
            }
        }

        tx.rho_mut()[core as usize] =
            Some(CoreAssignment { report: report.clone(), timeout: slot });

        for signature in &guarantee.signatures {
            tx.pi_mut().current[signature.validator_index as usize].guarantees += 1;
        }
        let stats = &mut tx.pi_mut().cores[core as usize];
        stats.reports += 1;
        stats.gas_used += report.results.iter().map(|r| r.refine_gas_used).sum::<u64>();
    }
    Ok(())
}

fn verify_guarantor_signatures(
    tx: &Transition<'_>,
    params: &Params,
    guarantee: &ReportGuarantee,
) -> Result<(), ReportsError> {
    let signatures = &guarantee.signatures;
    if signatures.len() < params.validators_super_majority {
        return Err(ReportsError::InsufficientSignatures {
            actual: signatures.len(),
            quorum: params.validators_super_majority,
        });
    }
    if !signatures
        .iter()
        .tuple_windows()
        .all(|(a, b)| a.validator_index < b.validator_index)
    {
        return Err(ReportsError::UnsortedGuarantors);
    }
    let message = guarantee_message(&guarantee.report.hash(), guarantee.slot);
    for signature in signatures {
        let Some(validator) = tx.kappa().get(signature.validator_index as usize) else {
            return Err(ReportsError::ValidatorIndexOutOfRange {
                index: signature.validator_index,
            });
        };
        verify_ed25519(&validator.ed25519, &message, &signature.signature)?;
    }
    Ok(())
}

/// Tally assurances, graduate available reports off their cores and drop the
/// timed out. Returns the reports newly available for accumulation, in core
/// order.
pub fn apply_assurances(
    tx: &mut Transition<'_>,
    params: &Params,
    assurances: &[Assurance],
    parent_hash: &Hash32,
) -> Result<Vec<WorkReport>, ReportsError> {
    if !assurances
        .iter()
        .tuple_windows()
        .all(|(a, b)| a.validator_index < b.validator_index)
    {
        return Err(ReportsError::UnsortedAssurances);
    }

    let mut per_core = vec![0usize; params.core_count];
    for assurance in assurances {
        if assurance.anchor != *parent_hash {
            return Err(ReportsError::AnchorMismatch {
                actual: assurance.anchor,
                expected: *parent_hash,
            });
        }
        let Some(validator) = tx.kappa().get(assurance.validator_index as usize) else {
            return Err(ReportsError::ValidatorIndexOutOfRange {
                index: assurance.validator_index,
            });
        };
        verify_ed25519(
            &validator.ed25519,
            &assurance_message(&assurance.anchor, &assurance.bitfield),
            &assurance.signature,
        )?;
        for core in 0..params.core_count {
            if assurance.core_bit(core) {
                if tx.rho()[core].is_none() {
                    return Err(ReportsError::AssuranceForEmptyCore { core });
                }
                per_core[core] += 1;
            }
        }
        tx.pi_mut().current[assurance.validator_index as usize].assurances += 1;
    }

    let slot = *tx.tau();
    let mut available = Vec::new();
    for (core, count) in per_core.iter().enumerate() {
        if *count >= params.validators_super_majority {
            if let Some(assignment) = tx.rho_mut()[core].take() {
                available.push(assignment.report);
            }
        }
    }

    // Anything still assigned past its replacement window has failed to
    // gather assurances; it is dropped and never accumulated.
    for core in 0..params.core_count {
        let timed_out = tx.rho()[core]
            .as_ref()
            .is_some_and(|a| slot >= a.timeout + params.work_replacement_period);
        if timed_out {
            tx.rho_mut()[core] = None;
        }
    }

    Ok(available)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::ValidatorSignature;
    use crate::crypto::sign_ed25519;
    use crate::params::TINY_PARAMS;
    use crate::state::test_fixtures::{ed25519_seed, genesis_state};
    use crate::state::State;
    use crate::work::test_fixtures::report;

    fn guarantee_for(mut work: WorkReport, slot: TimeSlot) -> ReportGuarantee {
        work.context.lookup_anchor_slot = slot;
        let hash = work.hash();
        let signatures = (0..TINY_PARAMS.validators_super_majority)
            .map(|i| ValidatorSignature {
                validator_index: i as ValidatorIndex,
                signature: sign_ed25519(&ed25519_seed(i), &guarantee_message(&hash, slot)),
            })
            .collect();
        ReportGuarantee { report: work, slot, signatures }
    }

    fn state_with_pooled_authorizer(core: usize, authorizer: Hash32) -> State {
        let mut state = genesis_state(&TINY_PARAMS);
        state.alpha[core].push(authorizer);
        state
    }

    #[test]
    fn guarantee_places_report_on_core() {
        let params = &TINY_PARAMS;
        let work = report(0, 1);
        let mut state = state_with_pooled_authorizer(0, work.authorizer_hash);
        state.tau = 4;
        let mut tx = Transition::new(&state);
        *tx.tau_mut() = 5;

        apply_guarantees(&mut tx, params, &[guarantee_for(work.clone(), 5)]).unwrap();
        let assignment = tx.rho()[0].as_ref().unwrap();
        assert_eq!(assignment.report.package_hash(), work.package_hash());
        assert_eq!(assignment.timeout, 5);
        assert_eq!(tx.pi().current[0].guarantees, 1);
        assert_eq!(tx.pi().cores[0].reports, 1);
    }

    #[test]
    fn occupied_core_without_timeout_is_rejected() {
        let params = &TINY_PARAMS;
        let first = report(0, 1);
        let second = report(0, 2);
        let mut state = state_with_pooled_authorizer(0, first.authorizer_hash);
        state.alpha[0].push(second.authorizer_hash);
        state.rho[0] = Some(CoreAssignment { report: first, timeout: 4 });
        state.tau = 4;

        let mut tx = Transition::new(&state);
        *tx.tau_mut() = 5;
        let err = apply_guarantees(&mut tx, params, &[guarantee_for(second.clone(), 5)])
            .unwrap_err();
        assert!(matches!(err, ReportsError::CoreOccupied { core: 0 }));

        // Once the replacement window passes, the same guarantee is accepted.
        let mut tx = Transition::new(&state);
        *tx.tau_mut() = 4 + params.work_replacement_period;
        let slot = 4 + params.work_replacement_period;
        apply_guarantees(&mut tx, params, &[guarantee_for(second, slot)]).unwrap();
    }

    #[test]
    fn unpooled_authorizer_is_rejected() {
        let params = &TINY_PARAMS;
        let work = report(0, 1);
        let state = genesis_state(params);
        let mut tx = Transition::new(&state);
        *tx.tau_mut() = 1;
        let err =
            apply_guarantees(&mut tx, params, &[guarantee_for(work, 1)]).unwrap_err();
        assert!(matches!(err, ReportsError::AuthorizerNotPooled { .. }));
    }

    #[test]
    fn quorum_and_ordering_are_enforced() {
        let params = &TINY_PARAMS;
        let work = report(0, 1);
        let state = state_with_pooled_authorizer(0, work.authorizer_hash);
        let mut tx = Transition::new(&state);
        *tx.tau_mut() = 1;

        let mut guarantee = guarantee_for(work, 1);
        guarantee.signatures.pop();
        let err = apply_guarantees(&mut tx, params, &[guarantee.clone()]).unwrap_err();
        assert!(matches!(err, ReportsError::InsufficientSignatures { .. }));

        let mut guarantee = guarantee_for(report(0, 1), 1);
        guarantee.signatures.swap(0, 1);
        let err = apply_guarantees(&mut tx, params, &[guarantee]).unwrap_err();
        assert!(matches!(err, ReportsError::UnsortedGuarantors));
    }

    #[test]
    fn duplicate_package_is_rejected_across_xi_rho_and_beta() {
        let params = &TINY_PARAMS;
        let work = report(0, 1);
        let mut state = state_with_pooled_authorizer(0, work.authorizer_hash);
        state.xi.add(work.package_hash());
        let mut tx = Transition::new(&state);
        *tx.tau_mut() = 1;
        let err = apply_guarantees(&mut tx, params, &[guarantee_for(work, 1)]).unwrap_err();
        assert!(matches!(err, ReportsError::AlreadyAccumulated { .. }));
    }

    fn assurance_for(validator: usize, parent: &Hash32, bitfield: Vec<u8>) -> Assurance {
        Assurance {
            anchor: *parent,
            bitfield: bitfield.clone(),
            validator_index: validator as ValidatorIndex,
            signature: sign_ed25519(
                &ed25519_seed(validator),
                &assurance_message(parent, &bitfield),
            ),
        }
    }

    #[test]
    fn quorum_of_assurances_graduates_the_report() {
        let params = &TINY_PARAMS;
        let work = report(0, 3);
        let mut state = genesis_state(params);
        state.rho[0] = Some(CoreAssignment { report: work.clone(), timeout: 1 });
        let parent = crate::crypto::blake2b(b"parent");

        let assurances: Vec<Assurance> = (0..params.validators_super_majority)
            .map(|v| assurance_for(v, &parent, vec![0b01]))
            .collect();

        let mut tx = Transition::new(&state);
        *tx.tau_mut() = 2;
        let available = apply_assurances(&mut tx, params, &assurances, &parent).unwrap();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].package_hash(), work.package_hash());
        assert!(tx.rho()[0].is_none());
        assert_eq!(tx.pi().current[0].assurances, 1);
    }

    #[test]
    fn below_quorum_leaves_the_assignment_in_place() {
        let params = &TINY_PARAMS;
        let work = report(0, 3);
        let mut state = genesis_state(params);
        state.rho[0] = Some(CoreAssignment { report: work, timeout: 1 });
        let parent = crate::crypto::blake2b(b"parent");

        let assurances: Vec<Assurance> = (0..params.validators_super_majority - 1)
            .map(|v| assurance_for(v, &parent, vec![0b01]))
            .collect();

        let mut tx = Transition::new(&state);
        *tx.tau_mut() = 2;
        let available = apply_assurances(&mut tx, params, &assurances, &parent).unwrap();
        assert!(available.is_empty());
        assert!(tx.rho()[0].is_some());
    }

    #[test]
    fn stalled_assignment_times_out() {
        let params = &TINY_PARAMS;
        let work = report(1, 4);
        let mut state = genesis_state(params);
        state.rho[1] = Some(CoreAssignment { report: work, timeout: 1 });

        let mut tx = Transition::new(&state);
        *tx.tau_mut() = 1 + params.work_replacement_period;
        let available =
            apply_assurances(&mut tx, params, &[], &crate::crypto::blake2b(b"parent")).unwrap();
        assert!(available.is_empty());
        assert!(tx.rho()[1].is_none());
    }

    #[test]
    fn assurance_for_empty_core_is_rejected() {
        let params = &TINY_PARAMS;
        let state = genesis_state(params);
        let parent = crate::crypto::blake2b(b"parent");
        let mut tx = Transition::new(&state);
        *tx.tau_mut() = 1;
        let err = apply_assurances(&mut tx, params, &[assurance_for(0, &parent, vec![0b10])], &parent)
            .unwrap_err();
        assert!(matches!(err, ReportsError::AssuranceForEmptyCore { core: 1 }));
    }

    #[test]
    fn future_guarantee_slot_is_rejected() {
        let params = &TINY_PARAMS;
        let work = report(0, 1);
        let state = state_with_pooled_authorizer(0, work.authorizer_hash);
        let mut tx = Transition::new(&state);
        *tx.tau_mut() = 3;
        let err = apply_guarantees(&mut tx, params, &[guarantee_for(work, 7)]).unwrap_err();
        assert!(matches!(err, ReportsError::GuaranteeSlotInFuture { guarantee: 7, slot: 3 }));
    }

    #[test]
    fn stale_lookup_anchor_is_rejected() {
        let params = &TINY_PARAMS;
        let mut work = report(0, 1);
        let state = state_with_pooled_authorizer(0, work.authorizer_hash);
        let slot = params.recent_history_size as TimeSlot + 10;
        work.context.lookup_anchor_slot = 2;
        let hash = work.hash();
        let signatures = (0..params.validators_super_majority)
            .map(|i| ValidatorSignature {
                validator_index: i as ValidatorIndex,
                signature: sign_ed25519(&ed25519_seed(i), &guarantee_message(&hash, slot)),
            })
            .collect();
        let guarantee = ReportGuarantee { report: work, slot, signatures };

        let mut tx = Transition::new(&state);
        *tx.tau_mut() = slot;
        let err = apply_guarantees(&mut tx, params, &[guarantee]).unwrap_err();
        assert!(matches!(err, ReportsError::StaleLookupAnchor { .. }));
    }

    #[test]
    fn forged_signature_is_rejected() {
        let params = &TINY_PARAMS;
        let work = report(0, 1);
        let state = state_with_pooled_authorizer(0, work.authorizer_hash);
        let mut tx = Transition::new(&state);
        *tx.tau_mut() = 1;
        let mut guarantee = guarantee_for(work, 1);
        // Validator 0's slot carries validator 1's signature.
        guarantee.signatures[0].signature = guarantee.signatures[1].signature;
        let err = apply_guarantees(&mut tx, params, &[guarantee]).unwrap_err();
        assert!(matches!(err, ReportsError::Crypto(_)));
    }

    #[test]
    fn wrong_anchor_is_rejected() {
        let params = &TINY_PARAMS;
        let mut state = genesis_state(params);
        state.rho[0] = Some(CoreAssignment { report: report(0, 1), timeout: 1 });
        let parent = crate::crypto::blake2b(b"parent");
        let wrong = crate::crypto::blake2b(b"wrong");
        let mut tx = Transition::new(&state);
        let err = apply_assurances(&mut tx, params, &[assurance_for(0, &wrong, vec![0b01])], &parent)
            .unwrap_err();
        assert!(matches!(err, ReportsError::AnchorMismatch { .. }));
    }
}
