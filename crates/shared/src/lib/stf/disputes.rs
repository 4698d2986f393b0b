//! Disputes: verdict tallying, offender bookkeeping, and the eviction of
//! judged-bad assignments from ρ.

use itertools::Itertools;

use crate::block::{DisputesExtrinsic, Judgment, Verdict};
use crate::crypto::{verify_ed25519, CryptoError};
use crate::params::Params;
use crate::primitives::{Epoch, Hash32, ValidatorKeys};
use crate::stf::{GUARANTEE_CONTEXT, INVALID_CONTEXT, VALID_CONTEXT};
use crate::transition::Transition;

#[derive(Debug, thiserror::Error)]
pub enum DisputeError {
    #[error("report {target} has already been judged")]
    AlreadyJudged { target: Hash32 },
    #[error("verdicts are not strictly ascending by target")]
    UnsortedVerdicts,
    #[error("verdict carries {actual} votes, protocol requires exactly {expected}")]
    WrongVoteCount { actual: usize, expected: usize },
    #[error("verdict votes are not strictly ascending by validator index")]
    UnsortedVotes,
    #[error("verdict age {age} is not the current or previous epoch (current {current})")]
    BadAge { age: Epoch, current: Epoch },
    #[error("judgment validator index {index} is out of range")]
    JudgmentIndexOutOfRange { index: u16 },
    #[error("culprit target {target} was not judged bad")]
    CulpritTargetNotBad { target: Hash32 },
    #[error("fault for {target} does not contradict the recorded verdict")]
    FaultVoteMatchesVerdict { target: Hash32 },
    #[error("fault target {target} has no recorded verdict")]
    FaultTargetNotJudged { target: Hash32 },
    #[error("offender key {key} does not belong to a current or previous validator")]
    UnknownOffenderKey { key: Hash32 },
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

fn judgment_message(vote: bool, target: &Hash32) -> Vec<u8> {
    let context = if vote { VALID_CONTEXT } else { INVALID_CONTEXT };
    [context, target.0.as_slice()].concat()
}

fn verify_votes(
    votes: &[Judgment],
    target: &Hash32,
    keys: &[ValidatorKeys],
) -> Result<usize, DisputeError> {
    if !votes.iter().tuple_windows().all(|(a, b)| a.index < b.index) {
        return Err(DisputeError::UnsortedVotes);
    }
    let mut positive = 0usize;
    for vote in votes {
        let Some(validator) = keys.get(vote.index as usize) else {
            return Err(DisputeError::JudgmentIndexOutOfRange { index: vote.index });
        };
        verify_ed25519(&validator.ed25519, &judgment_message(vote.vote, target), &vote.signature)?;
        if vote.vote {
            positive += 1;
        }
    }
    Ok(positive)
}

/// Apply the disputes extrinsic. Returns the offender keys newly recorded by
/// this block, sorted ascending — the header's offenders mark.
pub fn apply_disputes(
    tx: &mut Transition<'_>,
    params: &Params,
    disputes: &DisputesExtrinsic,
) -> Result<Vec<Hash32>, DisputeError> {
    if disputes.is_empty() {
        return Ok(Vec::new());
    }
    if !disputes
        .verdicts
        .iter()
        .tuple_windows()
        .all(|(a, b)| a.target < b.target)
    {
        return Err(DisputeError::UnsortedVerdicts);
    }

    let current_epoch = params.epoch_of(*tx.tau());
    for verdict in &disputes.verdicts {
        apply_verdict(tx, params, verdict, current_epoch)?;
    }

    let mut new_offenders = Vec::new();
    for culprit in &disputes.culprits {
        if !tx.psi().bad.contains(&culprit.target) {
            return Err(DisputeError::CulpritTargetNotBad { target: culprit.target });
        }
        require_validator_key(tx, &culprit.key)?;
        verify_ed25519(
            &culprit.key,
            &[GUARANTEE_CONTEXT, culprit.target.0.as_slice()].concat(),
            &culprit.signature,
        )?;
        record_offender(tx, culprit.key, &mut new_offenders);
    }

    for fault in &disputes.faults {
        let psi = tx.psi();
        let contradicts = (psi.good.contains(&fault.target) && !fault.vote)
            || (psi.bad.contains(&fault.target) && fault.vote);
        if !psi.is_judged(&fault.target) {
            return Err(DisputeError::FaultTargetNotJudged { target: fault.target });
        }
        if !contradicts {
            return Err(DisputeError::FaultVoteMatchesVerdict { target: fault.target });
        }
        require_validator_key(tx, &fault.key)?;
        verify_ed25519(&fault.key, &judgment_message(fault.vote, &fault.target), &fault.signature)?;
        record_offender(tx, fault.key, &mut new_offenders);
    }

    new_offenders.sort();
    Ok(new_offenders)
}

fn apply_verdict(
    tx: &mut Transition<'_>,
    params: &Params,
    verdict: &Verdict,
    current_epoch: Epoch,
) -> Result<(), DisputeError> {
    if tx.psi().is_judged(&verdict.target) {
        return Err(DisputeError::AlreadyJudged { target: verdict.target });
    }
    if verdict.votes.len() != params.validators_super_majority {
        return Err(DisputeError::WrongVoteCount {
            actual: verdict.votes.len(),
            expected: params.validators_super_majority,
        });
    }
    // Judgments from the current epoch are signed by κ, one epoch older by λ.
    let positive = if verdict.age == current_epoch {
        verify_votes(&verdict.votes, &verdict.target, tx.kappa())?
    } else if verdict.age + 1 == current_epoch {
        verify_votes(&verdict.votes, &verdict.target, tx.lambda())?
    } else {
        return Err(DisputeError::BadAge { age: verdict.age, current: current_epoch });
    };

    if positive == verdict.votes.len() {
        tx.psi_mut().good.insert(verdict.target);
    } else if positive == 0 {
        tx.psi_mut().bad.insert(verdict.target);
        evict_assignment(tx, &verdict.target);
    } else {
        tx.psi_mut().wonky.insert(verdict.target);
        evict_assignment(tx, &verdict.target);
    }
    Ok(())
}

/// A report judged bad or wonky is pulled off its core immediately.
fn evict_assignment(tx: &mut Transition<'_>, target: &Hash32) {
    let occupied = tx
        .rho()
        .iter()
        .position(|slot| slot.as_ref().is_some_and(|a| a.report.hash() == *target));
    if let Some(core) = occupied {
        tx.rho_mut()[core] = None;
    }
}

fn require_validator_key(tx: &Transition<'_>, key: &Hash32) -> Result<(), DisputeError> {
    let known = tx.kappa().iter().chain(tx.lambda().iter()).any(|v| v.ed25519 == *key);
    if !known {
        return Err(DisputeError::UnknownOffenderKey { key: *key });
    }
    Ok(())
}

fn record_offender(tx: &mut Transition<'_>, key: Hash32, new_offenders: &mut Vec<Hash32>) {
    if tx.psi_mut().offenders.insert(key) {
        new_offenders.push(key);
    }
}
