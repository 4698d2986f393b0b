//! The global state model: fifteen components plus the Δ service-account
//! map. Component indices 1..=15 follow the protocol order α, φ, β, γ, ψ,
//! η, ι, κ, λ, ρ, τ, χ, π, θ, ξ and drive both the whole-state codec and
//! the merklization dictionary.

pub mod accounts;
pub mod history;
pub mod ready;
pub mod recent;
pub mod safrole;

pub use accounts::{PreimageStatus, ServiceAccount};
pub use history::AccumulatedHistory;
pub use ready::ReadyQueue;
pub use recent::{mmr_append, mmr_super_peak, BlockInfo, RecentHistory, ReportedPackage};
pub use safrole::{
    fallback_key_sequence, merge_tickets, outside_in, Entropy, SafroleState, SlotAssignment,
};

use std::collections::{BTreeMap, BTreeSet};

use crate::codec::{
    decode_fixed_seq, decode_seq, decode_varint, encode_fixed_seq, encode_seq, encode_varint,
    Decode, DecodeError, DecodeErrorKind, Encode, EncodeError, PathSeg, Reader,
};
use crate::params::Params;
use crate::primitives::{Gas, Hash32, RingCommitment, ServiceId, TimeSlot, ValidatorKeys};
use crate::state_key;
use crate::work::WorkReport;

/// A work report occupying a core while it gathers assurances (ρ entry).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoreAssignment {
    pub report: WorkReport,
    /// Slot the report was guaranteed at; replacement is allowed once
    /// `work_replacement_period` slots have passed without availability.
    pub timeout: TimeSlot,
}

impl Encode for CoreAssignment {
    fn encode_to(&self, out: &mut Vec<u8>) {
        self.report.encode_to(out);
        self.timeout.encode_to(out);
    }
}

impl Decode for CoreAssignment {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        r.typed("CoreAssignment", |r| {
            Ok(Self { report: r.field("report")?, timeout: r.field("timeout")? })
        })
    }
}

/// χ: the privileged service indices and the always-accumulate gas map.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Privileges {
    pub manager: ServiceId,
    pub assign: ServiceId,
    pub delegate: ServiceId,
    pub always_accumulate: BTreeMap<ServiceId, Gas>,
}

impl Encode for Privileges {
    fn encode_to(&self, out: &mut Vec<u8>) {
        self.manager.encode_to(out);
        self.assign.encode_to(out);
        self.delegate.encode_to(out);
        encode_varint(self.always_accumulate.len() as u64, out);
        for (service, gas) in &self.always_accumulate {
            service.encode_to(out);
            gas.encode_to(out);
        }
    }
}

impl Decode for Privileges {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        r.typed("Privileges", |r| {
            let manager = r.field("manager")?;
            let assign = r.field("assign")?;
            let delegate = r.field("delegate")?;
            let count = decode_varint(r)? as usize;
            let mut always_accumulate = BTreeMap::new();
            for _ in 0..count {
                let service = ServiceId::decode(r)?;
                let gas = Gas::decode(r)?;
                always_accumulate.insert(service, gas);
            }
            Ok(Self { manager, assign, delegate, always_accumulate })
        })
    }
}

/// ψ: judged work reports and the offender key set.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct DisputesRecord {
    pub good: BTreeSet<Hash32>,
    pub bad: BTreeSet<Hash32>,
    pub wonky: BTreeSet<Hash32>,
    pub offenders: BTreeSet<Hash32>,
}

impl DisputesRecord {
    pub fn is_judged(&self, target: &Hash32) -> bool {
        self.good.contains(target) || self.bad.contains(target) || self.wonky.contains(target)
    }
}

fn encode_hash_set(set: &BTreeSet<Hash32>, out: &mut Vec<u8>) {
    encode_varint(set.len() as u64, out);
    for hash in set {
        hash.encode_to(out);
    }
}

fn decode_hash_set(r: &mut Reader<'_>) -> Result<BTreeSet<Hash32>, DecodeError> {
    let count = decode_varint(r)? as usize;
    let mut set = BTreeSet::new();
    for _ in 0..count {
        set.insert(Hash32::decode(r)?);
    }
    Ok(set)
}

impl Encode for DisputesRecord {
    fn encode_to(&self, out: &mut Vec<u8>) {
        encode_hash_set(&self.good, out);
        encode_hash_set(&self.bad, out);
        encode_hash_set(&self.wonky, out);
        encode_hash_set(&self.offenders, out);
    }
}

impl Decode for DisputesRecord {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        r.typed("DisputesRecord", |r| {
            Ok(Self {
                good: r.field_with("good", decode_hash_set)?,
                bad: r.field_with("bad", decode_hash_set)?,
                wonky: r.field_with("wonky", decode_hash_set)?,
                offenders: r.field_with("offenders", decode_hash_set)?,
            })
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct ValidatorStats {
    pub blocks: u32,
    pub tickets: u32,
    pub preimages_count: u32,
    pub preimages_size: u32,
    pub guarantees: u32,
    pub assurances: u32,
}

impl Encode for ValidatorStats {
    fn encode_to(&self, out: &mut Vec<u8>) {
        self.blocks.encode_to(out);
        self.tickets.encode_to(out);
        self.preimages_count.encode_to(out);
        self.preimages_size.encode_to(out);
        self.guarantees.encode_to(out);
        self.assurances.encode_to(out);
    }
}

impl Decode for ValidatorStats {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            blocks: r.field("blocks")?,
            tickets: r.field("tickets")?,
            preimages_count: r.field("preimages_count")?,
            preimages_size: r.field("preimages_size")?,
            guarantees: r.field("guarantees")?,
            assurances: r.field("assurances")?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct CoreStats {
    pub reports: u32,
    pub gas_used: Gas,
}

impl Encode for CoreStats {
    fn encode_to(&self, out: &mut Vec<u8>) {
        self.reports.encode_to(out);
        self.gas_used.encode_to(out);
    }
}

impl Decode for CoreStats {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self { reports: r.field("reports")?, gas_used: r.field("gas_used")? })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct ServiceStats {
    pub provided_count: u32,
    pub provided_size: u32,
    pub accumulated_count: u32,
    pub accumulate_gas_used: Gas,
}

impl Encode for ServiceStats {
    fn encode_to(&self, out: &mut Vec<u8>) {
        self.provided_count.encode_to(out);
        self.provided_size.encode_to(out);
        self.accumulated_count.encode_to(out);
        self.accumulate_gas_used.encode_to(out);
    }
}

impl Decode for ServiceStats {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            provided_count: r.field("provided_count")?,
            provided_size: r.field("provided_size")?,
            accumulated_count: r.field("accumulated_count")?,
            accumulate_gas_used: r.field("accumulate_gas_used")?,
        })
    }
}

/// π: per-validator, per-core and per-service activity counters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Statistics {
    /// Counters for the running epoch, one per validator.
    pub current: Vec<ValidatorStats>,
    /// Last epoch's counters.
    pub previous: Vec<ValidatorStats>,
    pub cores: Vec<CoreStats>,
    pub services: BTreeMap<ServiceId, ServiceStats>,
}

impl Statistics {
    pub fn new(params: &Params) -> Self {
        Self {
            current: vec![ValidatorStats::default(); params.validators_count],
            previous: vec![ValidatorStats::default(); params.validators_count],
            cores: vec![CoreStats::default(); params.core_count],
            services: BTreeMap::new(),
        }
    }

    pub fn rotate_epoch(&mut self) {
        self.previous = std::mem::take(&mut self.current);
        self.current = vec![ValidatorStats::default(); self.previous.len()];
    }

    pub fn encode_with(&self, params: &Params, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        encode_fixed_seq("Statistics.current", &self.current, params.validators_count, out)?;
        encode_fixed_seq("Statistics.previous", &self.previous, params.validators_count, out)?;
        encode_fixed_seq("Statistics.cores", &self.cores, params.core_count, out)?;
        encode_varint(self.services.len() as u64, out);
        for (service, stats) in &self.services {
            service.encode_to(out);
            stats.encode_to(out);
        }
        Ok(())
    }

    pub fn decode_with(r: &mut Reader<'_>, params: &Params) -> Result<Self, DecodeError> {
        r.typed("Statistics", |r| {
            let current = r.field_with("current", |r| decode_fixed_seq(r, params.validators_count))?;
            let previous =
                r.field_with("previous", |r| decode_fixed_seq(r, params.validators_count))?;
            let cores = r.field_with("cores", |r| decode_fixed_seq(r, params.core_count))?;
            let count = decode_varint(r)? as usize;
            let mut services = BTreeMap::new();
            for _ in 0..count {
                let service = ServiceId::decode(r)?;
                let stats = ServiceStats::decode(r)?;
                services.insert(service, stats);
            }
            Ok(Self { current, previous, cores, services })
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvariantViolation {
    #[error("{which} has {actual} entries, expected {expected}")]
    ValidatorSetSize { which: &'static str, expected: usize, actual: usize },
    #[error("{which} has {actual} entries, expected one per core ({expected})")]
    CoreShape { which: &'static str, expected: usize, actual: usize },
    #[error("authorizer {which} for core {core} holds {actual} items, bound is {bound}")]
    AuthorizerOverflow { which: &'static str, core: usize, actual: usize, bound: usize },
    #[error("{which} has {actual} buckets, expected epoch length {expected}")]
    BucketCount { which: &'static str, expected: usize, actual: usize },
    #[error("recent history holds {actual} blocks, bound is {bound}")]
    HistoryOverflow { actual: usize, bound: usize },
    #[error("ticket accumulator holds {actual} tickets, bound is {bound}")]
    TicketAccumulatorOverflow { actual: usize, bound: usize },
    #[error("ready-queue item for package {package} depends on already-accumulated {dependency}")]
    StaleDependency { package: Hash32, dependency: Hash32 },
    #[error("service {service} preimage stored under a key that does not match its derivation")]
    MisplacedPreimage { service: ServiceId },
}

/// The complete prior/posterior chain state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct State {
    /// α: per-core authorizer pools.
    pub alpha: Vec<Vec<Hash32>>,
    /// φ: per-core authorizer queues.
    pub phi: Vec<Vec<Hash32>>,
    /// β: recent-blocks history.
    pub beta: RecentHistory,
    /// γ: safrole state.
    pub gamma: SafroleState,
    /// ψ: disputes record.
    pub psi: DisputesRecord,
    /// η: entropy accumulator.
    pub eta: Entropy,
    /// ι: pending validator set.
    pub iota: Vec<ValidatorKeys>,
    /// κ: current validator set.
    pub kappa: Vec<ValidatorKeys>,
    /// λ: previous validator set.
    pub lambda: Vec<ValidatorKeys>,
    /// ρ: per-core pending work assignment.
    pub rho: Vec<Option<CoreAssignment>>,
    /// τ: most recently imported time slot.
    pub tau: TimeSlot,
    /// χ: privileges.
    pub chi: Privileges,
    /// π: activity statistics.
    pub pi: Statistics,
    /// θ: available but dependency-blocked reports.
    pub theta: ReadyQueue,
    /// ξ: accumulation history window.
    pub xi: AccumulatedHistory,
    /// Δ: service accounts.
    pub delta: BTreeMap<ServiceId, ServiceAccount>,
}

pub const COMPONENT_COUNT: u8 = 15;

impl State {
    pub fn genesis(
        params: &Params,
        validators: Vec<ValidatorKeys>,
        entropy_seed: Hash32,
        ring_commitment: RingCommitment,
    ) -> Self {
        let eta = Entropy::genesis(entropy_seed);
        let slot_assignment = SlotAssignment::Keys(fallback_key_sequence(
            &eta.0[2],
            &validators,
            params.epoch_length,
        ));
        Self {
            alpha: vec![Vec::new(); params.core_count],
            phi: vec![Vec::new(); params.core_count],
            beta: RecentHistory::default(),
            gamma: SafroleState {
                pending: validators.clone(),
                ring_commitment,
                slot_assignment,
                ticket_accumulator: Vec::new(),
            },
            psi: DisputesRecord::default(),
            eta,
            iota: validators.clone(),
            kappa: validators.clone(),
            lambda: validators,
            rho: vec![None; params.core_count],
            tau: 0,
            chi: Privileges::default(),
            pi: Statistics::new(params),
            theta: ReadyQueue::new(params.epoch_length),
            xi: AccumulatedHistory::new(params.epoch_length),
            delta: BTreeMap::new(),
        }
    }

    pub fn check_invariants(&self, params: &Params) -> Result<(), InvariantViolation> {
        let v = params.validators_count;
        for (which, set) in [
            ("kappa", &self.kappa),
            ("lambda", &self.lambda),
            ("iota", &self.iota),
            ("gamma.pending", &self.gamma.pending),
        ] {
            if set.len() != v {
                return Err(InvariantViolation::ValidatorSetSize {
                    which,
                    expected: v,
                    actual: set.len(),
                });
            }
        }
        if self.rho.len() != params.core_count {
            return Err(InvariantViolation::CoreShape {
                which: "rho",
                expected: params.core_count,
                actual: self.rho.len(),
            });
        }
        for (which, lists, bound) in [
            ("pool", &self.alpha, params.max_authorizations_pool_items),
            ("queue", &self.phi, params.max_authorizations_queue_items),
        ] {
            if lists.len() != params.core_count {
                return Err(InvariantViolation::CoreShape {
                    which: if which == "pool" { "alpha" } else { "phi" },
                    expected: params.core_count,
                    actual: lists.len(),
                });
            }
            for (core, list) in lists.iter().enumerate() {
                if list.len() > bound {
                    return Err(InvariantViolation::AuthorizerOverflow {
                        which,
                        core,
                        actual: list.len(),
                        bound,
                    });
                }
            }
        }
        for (which, count) in [
            ("theta", self.theta.buckets.len()),
            ("xi", self.xi.buckets.len()),
        ] {
            if count != params.epoch_length {
                return Err(InvariantViolation::BucketCount {
                    which,
                    expected: params.epoch_length,
                    actual: count,
                });
            }
        }
        if self.beta.blocks.len() > params.max_blocks_history {
            return Err(InvariantViolation::HistoryOverflow {
                actual: self.beta.blocks.len(),
                bound: params.max_blocks_history,
            });
        }
        if self.gamma.ticket_accumulator.len() > params.epoch_length {
            return Err(InvariantViolation::TicketAccumulatorOverflow {
                actual: self.gamma.ticket_accumulator.len(),
                bound: params.epoch_length,
            });
        }
        for bucket in &self.theta.buckets {
            for item in bucket {
                for dependency in &item.dependencies {
                    if self.xi.contains(dependency) {
                        return Err(InvariantViolation::StaleDependency {
                            package: item.report.package_hash(),
                            dependency: *dependency,
                        });
                    }
                }
            }
        }
        for (service, account) in &self.delta {
            for (key, blob) in &account.preimages {
                let expected = state_key::service_data(*service, &crate::crypto::blake2b(blob));
                if *key != expected {
                    return Err(InvariantViolation::MisplacedPreimage { service: *service });
                }
            }
        }
        Ok(())
    }

    /// Codec bytes of one global component, 1 = α .. 15 = ξ. These values
    /// are what the merklization dictionary stores.
    pub fn component_encoding(&self, index: u8, params: &Params) -> Result<Vec<u8>, EncodeError> {
        let mut out = Vec::new();
        match index {
            1 => encode_core_lists("alpha", &self.alpha, params.core_count, &mut out)?,
            2 => encode_core_lists("phi", &self.phi, params.core_count, &mut out)?,
            3 => self.beta.encode(&mut out),
            4 => self.gamma.encode_with(params, &mut out)?,
            5 => self.psi.encode_to(&mut out),
            6 => self.eta.encode(&mut out),
            7 => encode_fixed_seq("iota", &self.iota, params.validators_count, &mut out)?,
            8 => encode_fixed_seq("kappa", &self.kappa, params.validators_count, &mut out)?,
            9 => encode_fixed_seq("lambda", &self.lambda, params.validators_count, &mut out)?,
            10 => encode_fixed_seq("rho", &self.rho, params.core_count, &mut out)?,
            11 => self.tau.encode_to(&mut out),
            12 => self.chi.encode_to(&mut out),
            13 => self.pi.encode_with(params, &mut out)?,
            14 => self.theta.encode_with(params.epoch_length, &mut out)?,
            15 => self.xi.encode_with(params.epoch_length, &mut out)?,
            // Caller iterates 1..=COMPONENT_COUNT; anything else is a bug in
            // this crate, not bad input.
            _ => panic!("state component index {index} out of range"),
        }
        Ok(out)
    }

    pub fn encode_with(&self, params: &Params) -> Result<Vec<u8>, EncodeError> {
        let mut out = Vec::new();
        for index in 1..=COMPONENT_COUNT {
            out.extend_from_slice(&self.component_encoding(index, params)?);
        }
        encode_varint(self.delta.len() as u64, &mut out);
        for (service, account) in &self.delta {
            service.encode_to(&mut out);
            account.encode_to(&mut out);
        }
        Ok(out)
    }

    pub fn decode_with(r: &mut Reader<'_>, params: &Params) -> Result<Self, DecodeError> {
        r.typed("State", |r| {
            let alpha = r.field_with("alpha", |r| decode_core_lists(r, params.core_count))?;
            let phi = r.field_with("phi", |r| decode_core_lists(r, params.core_count))?;
            let beta = r.field_with("beta", |r| RecentHistory::decode(r, params.max_blocks_history))?;
            let gamma = r.field_with("gamma", |r| SafroleState::decode_with(r, params))?;
            let psi = r.field("psi")?;
            let eta = r.field_with("eta", Entropy::decode)?;
            let iota = r.field_with("iota", |r| decode_fixed_seq(r, params.validators_count))?;
            let kappa = r.field_with("kappa", |r| decode_fixed_seq(r, params.validators_count))?;
            let lambda = r.field_with("lambda", |r| decode_fixed_seq(r, params.validators_count))?;
            let rho = r.field_with("rho", |r| decode_fixed_seq(r, params.core_count))?;
            let tau = r.field("tau")?;
            let chi = r.field("chi")?;
            let pi = r.field_with("pi", |r| Statistics::decode_with(r, params))?;
            let theta = r.field_with("theta", |r| ReadyQueue::decode_with(r, params.epoch_length))?;
            let xi = r.field_with("xi", |r| AccumulatedHistory::decode_with(r, params.epoch_length))?;
            let delta = r.field_with("delta", |r| {
                let count = decode_varint(r)? as usize;
                let mut map = BTreeMap::new();
                for i in 0..count {
                    let (service, account) = r.scoped(PathSeg::Index(i), |r| {
                        Ok((ServiceId::decode(r)?, ServiceAccount::decode(r)?))
                    })?;
                    map.insert(service, account);
                }
                Ok(map)
            })?;
            Ok(Self {
                alpha,
                phi,
                beta,
                gamma,
                psi,
                eta,
                iota,
                kappa,
                lambda,
                rho,
                tau,
                chi,
                pi,
                theta,
                xi,
                delta,
            })
        })
    }

    pub fn decode_bytes(data: &[u8], params: &Params) -> Result<Self, DecodeError> {
        let mut r = Reader::new(data);
        let state = Self::decode_with(&mut r, params)?;
        if !r.is_empty() {
            return Err(r.error(DecodeErrorKind::TrailingBytes));
        }
        Ok(state)
    }
}

fn encode_core_lists(
    what: &'static str,
    lists: &[Vec<Hash32>],
    core_count: usize,
    out: &mut Vec<u8>,
) -> Result<(), EncodeError> {
    if lists.len() != core_count {
        return Err(EncodeError { what, expected: core_count, actual: lists.len() });
    }
    for list in lists {
        encode_seq(list, out);
    }
    Ok(())
}

fn decode_core_lists(r: &mut Reader<'_>, core_count: usize) -> Result<Vec<Vec<Hash32>>, DecodeError> {
    let mut lists = Vec::with_capacity(core_count);
    for i in 0..core_count {
        lists.push(r.scoped(PathSeg::Index(i), decode_seq)?);
    }
    Ok(lists)
}


#[cfg(test)]
mod tests {
    use super::test_fixtures::genesis_state;
    use super::*;
    use crate::params::TINY_PARAMS;

    #[test]
    fn genesis_satisfies_invariants() {
        let params = &TINY_PARAMS;
        let state = genesis_state(params);
        state.check_invariants(params).unwrap();
        assert_eq!(state.tau, 0);
        assert!(!state.gamma.slot_assignment.is_tickets());
    }

    #[test]
    fn whole_state_round_trip() {
        let params = &TINY_PARAMS;
        let mut state = genesis_state(params);
        state.tau = 7;
        state.chi.always_accumulate.insert(4, 1_000);
        state
            .delta
            .insert(16, ServiceAccount::new(crate::crypto::blake2b(b"svc"), 99));
        let bytes = state.encode_with(params).unwrap();
        let decoded = State::decode_bytes(&bytes, params).unwrap();
        assert_eq!(decoded, state);
    }

    #[test]
    fn invariants_catch_wrong_validator_count() {
        let params = &TINY_PARAMS;
        let mut state = genesis_state(params);
        state.kappa.pop();
        assert!(matches!(
            state.check_invariants(params),
            Err(InvariantViolation::ValidatorSetSize { which: "kappa", .. })
        ));
    }

    #[test]
    fn invariants_catch_stale_theta_dependency() {
        let params = &TINY_PARAMS;
        let mut state = genesis_state(params);
        let accumulated = crate::crypto::blake2b(b"done");
        state.xi.add(accumulated);
        let mut item =
            crate::work::WorkReportAndDeps::new(crate::work::test_fixtures::report(0, 1));
        item.dependencies.insert(accumulated);
        state.theta.bucket_mut(0).push(item);
        assert!(matches!(
            state.check_invariants(params),
            Err(InvariantViolation::StaleDependency { .. })
        ));
    }

    #[test]
    fn component_encodings_cover_every_index() {
        let params = &TINY_PARAMS;
        let state = genesis_state(params);
        for index in 1..=COMPONENT_COUNT {
            let bytes = state.component_encoding(index, params).unwrap();
            assert!(!bytes.is_empty(), "component {index} encoded to nothing");
        }
    }
}
