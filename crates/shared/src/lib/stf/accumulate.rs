//! Report accumulation: dependency resolution over the θ queue, gas-bounded
//! execution through the service-executor capability, ξ window maintenance
//! and the accumulate root.

use std::collections::{BTreeMap, BTreeSet};

use crate::crypto::blake2b;
use crate::merkle::accumulate_root;
use crate::params::Params;
use crate::primitives::{Gas, Hash32, ServiceId};
use crate::transition::Transition;
use crate::work::{WorkExecResult, WorkReport, WorkReportAndDeps};

/// One work result routed to a service's accumulate invocation.
#[derive(Clone, Debug)]
pub struct AccumulateItem {
    pub package_hash: Hash32,
    pub payload_hash: Hash32,
    pub result: WorkExecResult,
    pub gas: Gas,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccumulateOutcome {
    /// Commitment to the execution, if the service produced one. `None` is
    /// an in-protocol outcome (the service failed), not an error.
    pub output: Option<Hash32>,
    pub gas_used: Gas,
}

/// Abstract "execute service accumulate" interface. The PVM-backed
/// implementation lives outside this crate.
pub trait ServiceExecutor {
    fn accumulate(
        &self,
        tx: &mut Transition<'_>,
        service: ServiceId,
        items: &[AccumulateItem],
        gas_limit: Gas,
    ) -> AccumulateOutcome;
}

/// Deterministic stand-in executor for tests and trace tooling: commits to
/// the service id and the accumulated package hashes, charges a flat fee per
/// item, and touches no account state.
#[derive(Clone, Copy, Debug, Default)]
pub struct DevServiceExecutor;

const DEV_ITEM_GAS: Gas = 1_000;

impl ServiceExecutor for DevServiceExecutor {
    fn accumulate(
        &self,
        _tx: &mut Transition<'_>,
        service: ServiceId,
        items: &[AccumulateItem],
        gas_limit: Gas,
    ) -> AccumulateOutcome {
        let gas_used = (items.len() as Gas * DEV_ITEM_GAS).min(gas_limit);
        let succeeded: Vec<&AccumulateItem> =
            items.iter().filter(|item| item.result.is_ok()).collect();
        if succeeded.is_empty() {
            return AccumulateOutcome { output: None, gas_used };
        }
        let mut commitment = Vec::with_capacity(4 + succeeded.len() * 32);
        commitment.extend_from_slice(&service.to_le_bytes());
        for item in &succeeded {
            commitment.extend_from_slice(&item.package_hash.0);
        }
        AccumulateOutcome { output: Some(blake2b(&commitment)), gas_used }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccumulationResult {
    pub accumulate_root: Hash32,
    /// Package hashes accumulated by this block, in execution order.
    pub accumulated: Vec<Hash32>,
    /// Per-service outputs feeding the accumulate root.
    pub outputs: Vec<(ServiceId, Hash32)>,
}

/// Remove every item whose package hash is already handled and strip the
/// handled hashes from the dependency sets of the rest. Applied uniformly to
/// the pending queue and to every θ bucket.
fn queue_edit(queue: &mut Vec<WorkReportAndDeps>, handled: &[Hash32]) {
    if handled.is_empty() {
        return;
    }
    queue.retain(|item| !handled.contains(&item.report.package_hash()));
    for item in queue.iter_mut() {
        for hash in handled {
            item.dependencies.remove(hash);
        }
    }
}

/// Advance accumulation for one block given the reports that just became
/// available. Infallible by construction: service failures are in-protocol
/// outcomes and the dependency graph is acyclic, so the drain loop reaches a
/// fixed point in at most `|pending|` rounds.
pub fn apply_accumulation<X: ServiceExecutor>(
    tx: &mut Transition<'_>,
    params: &Params,
    executor: &X,
    available: Vec<WorkReport>,
) -> AccumulationResult {
    let slot = *tx.tau();
    let prior_slot = tx.base().tau;
    let phase = params.slot_phase(slot);

    // Partition arrivals: dependency-free reports accumulate immediately,
    // the rest queue up.
    let mut accumulatable: Vec<WorkReport> = Vec::new();
    let mut queued: Vec<WorkReportAndDeps> = Vec::new();
    for report in available {
        let item = WorkReportAndDeps::new(report);
        if item.is_resolved() {
            accumulatable.push(item.report);
        } else {
            queued.push(item);
        }
    }

    // Drop anything already accumulated and any dependency ξ has settled.
    queued.retain(|item| !tx.xi().contains(&item.report.package_hash()));
    for item in &mut queued {
        item.dependencies.retain(|dep| !tx.xi().contains(dep));
    }
    let fresh_packages: BTreeSet<Hash32> =
        queued.iter().map(|item| item.report.package_hash()).collect();

    // Merge the standing θ queue (walking forward from the current phase)
    // with this block's arrivals into one pending queue of clones.
    let mut pending: Vec<WorkReportAndDeps> = tx.theta().iter_from(phase).cloned().collect();
    pending.extend(queued);

    // Drain to the fixed point: every pass frees the items whose last
    // dependency was resolved by the previous pass.
    let immediate: Vec<Hash32> = accumulatable.iter().map(|r| r.package_hash()).collect();
    queue_edit(&mut pending, &immediate);
    loop {
        let mut newly: Vec<WorkReport> = Vec::new();
        pending.retain(|item| {
            if item.is_resolved() {
                newly.push(item.report.clone());
                false
            } else {
                true
            }
        });
        if newly.is_empty() {
            break;
        }
        let hashes: Vec<Hash32> = newly.iter().map(|r| r.package_hash()).collect();
        accumulatable.extend(newly);
        queue_edit(&mut pending, &hashes);
    }

    // Execute a prefix bounded by the block gas limit; the tail carries over
    // to the next block as dependency-free θ entries.
    let mut executed: Vec<WorkReport> = Vec::new();
    let mut deferred: Vec<WorkReport> = Vec::new();
    let mut budget = params.block_gas_limit;
    let mut exhausted = false;
    for report in accumulatable {
        let cost = report.accumulate_gas();
        if !exhausted && cost <= budget {
            budget -= cost;
            executed.push(report);
        } else {
            exhausted = true;
            deferred.push(report);
        }
    }

    // ξ rolls forward one bucket, then records this block's packages.
    tx.xi_mut().shift_down();
    let accumulated: Vec<Hash32> = executed.iter().map(|r| r.package_hash()).collect();
    for hash in &accumulated {
        tx.xi_mut().add(*hash);
    }

    // Batch results per service, preserving first-appearance order.
    let mut order: Vec<ServiceId> = Vec::new();
    let mut grouped: BTreeMap<ServiceId, Vec<AccumulateItem>> = BTreeMap::new();
    for report in &executed {
        for result in &report.results {
            if !grouped.contains_key(&result.service) {
                order.push(result.service);
            }
            grouped.entry(result.service).or_default().push(AccumulateItem {
                package_hash: report.package_hash(),
                payload_hash: result.payload_hash,
                result: result.result.clone(),
                gas: result.accumulate_gas,
            });
        }
    }

    let mut outputs: Vec<(ServiceId, Hash32)> = Vec::new();
    for service in order {
        let items = grouped.remove(&service).expect("grouped by the loop above");
        let mut gas_limit: Gas = items.iter().map(|item| item.gas).sum();
        if let Some(floor) = tx.chi().always_accumulate.get(&service) {
            gas_limit = gas_limit.max(*floor);
        }
        if let Some(account) = tx.account(service) {
            gas_limit = gas_limit.max(account.min_accumulate_gas);
        }
        let outcome = executor.accumulate(tx, service, &items, gas_limit);
        let stats = tx.pi_mut().services.entry(service).or_default();
        stats.accumulated_count += items.len() as u32;
        stats.accumulate_gas_used += outcome.gas_used;
        if let Some(output) = outcome.output {
            outputs.push((service, output));
        }
    }

    // θ maintenance: the current bucket takes this block's unresolved
    // arrivals plus the gas-deferred tail; buckets for skipped slots clear;
    // older buckets are queue-edited and shed items whose dependencies
    // collapsed (those were handled through the pending queue).
    let mut current_bucket: Vec<WorkReportAndDeps> = pending
        .into_iter()
        .filter(|item| fresh_packages.contains(&item.report.package_hash()))
        .collect();
    current_bucket.extend(
        deferred
            .into_iter()
            .map(|report| WorkReportAndDeps { report, dependencies: BTreeSet::new() }),
    );

    let epoch_len = params.epoch_length;
    let gap = (slot - prior_slot) as usize;
    let theta = tx.theta_mut();
    for offset in 0..epoch_len {
        let bucket_phase = (phase + epoch_len - offset) % epoch_len;
        if offset == 0 {
            theta.buckets[bucket_phase] = std::mem::take(&mut current_bucket);
        } else if offset < gap {
            theta.buckets[bucket_phase].clear();
        } else {
            let bucket = &mut theta.buckets[bucket_phase];
            queue_edit(bucket, &accumulated);
            bucket.retain(|item| !item.dependencies.is_empty());
        }
    }

    AccumulationResult { accumulate_root: accumulate_root(&outputs), accumulated, outputs }
}
