//! Work packages, work reports and the dependency-carrying wrapper used by
//! the accumulation queue.

use std::collections::BTreeSet;

use crate::codec::{
    decode_blob, decode_seq, decode_varint, encode_blob, encode_seq, encode_varint, Decode,
    DecodeError, DecodeErrorKind, Encode, Reader,
};
use crate::crypto::blake2b;
use crate::params::Params;
use crate::primitives::{CoreIndex, Gas, Hash32, ServiceId, TimeSlot};

/// Context a work package was refined against.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefineContext {
    pub anchor: Hash32,
    pub state_root: Hash32,
    pub beefy_root: Hash32,
    pub lookup_anchor: Hash32,
    pub lookup_anchor_slot: TimeSlot,
    pub prerequisites: Vec<Hash32>,
}

impl Encode for RefineContext {
    fn encode_to(&self, out: &mut Vec<u8>) {
        self.anchor.encode_to(out);
        self.state_root.encode_to(out);
        self.beefy_root.encode_to(out);
        self.lookup_anchor.encode_to(out);
        self.lookup_anchor_slot.encode_to(out);
        encode_seq(&self.prerequisites, out);
    }
}

impl Decode for RefineContext {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        r.typed("RefineContext", |r| {
            Ok(Self {
                anchor: r.field("anchor")?,
                state_root: r.field("state_root")?,
                beefy_root: r.field("beefy_root")?,
                lookup_anchor: r.field("lookup_anchor")?,
                lookup_anchor_slot: r.field("lookup_anchor_slot")?,
                prerequisites: r.field_with("prerequisites", decode_seq)?,
            })
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Authorizer {
    pub code_hash: Hash32,
    pub params: Vec<u8>,
}

impl Authorizer {
    pub fn hash(&self) -> Hash32 {
        blake2b(&self.encoded())
    }
}

impl Encode for Authorizer {
    fn encode_to(&self, out: &mut Vec<u8>) {
        self.code_hash.encode_to(out);
        encode_blob(&self.params, out);
    }
}

impl Decode for Authorizer {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        r.typed("Authorizer", |r| {
            Ok(Self {
                code_hash: r.field("code_hash")?,
                params: r.field_with("params", decode_blob)?,
            })
        })
    }
}

#[derive(Clone, PartialEq, Eq, derive_more::Debug)]
pub struct WorkItem {
    pub service: ServiceId,
    pub code_hash: Hash32,
    #[debug("{} bytes", payload.len())]
    pub payload: Vec<u8>,
    pub refine_gas_limit: Gas,
    pub accumulate_gas_limit: Gas,
    pub export_count: u16,
}

impl Encode for WorkItem {
    fn encode_to(&self, out: &mut Vec<u8>) {
        self.service.encode_to(out);
        self.code_hash.encode_to(out);
        encode_blob(&self.payload, out);
        self.refine_gas_limit.encode_to(out);
        self.accumulate_gas_limit.encode_to(out);
        self.export_count.encode_to(out);
    }
}

impl Decode for WorkItem {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        r.typed("WorkItem", |r| {
            Ok(Self {
                service: r.field("service")?,
                code_hash: r.field("code_hash")?,
                payload: r.field_with("payload", decode_blob)?,
                refine_gas_limit: r.field("refine_gas_limit")?,
                accumulate_gas_limit: r.field("accumulate_gas_limit")?,
                export_count: r.field("export_count")?,
            })
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkValidationError {
    #[error("authorisation blob is {actual} octets, bound is {bound}")]
    AuthorizationTooLarge { actual: usize, bound: usize },
    #[error("package has {actual} work items, allowed range is 1..={bound}")]
    ItemCountOutOfRange { actual: usize, bound: usize },
}

#[derive(Clone, PartialEq, Eq, derive_more::Debug)]
pub struct WorkPackage {
    #[debug("{} bytes", authorization.len())]
    pub authorization: Vec<u8>,
    pub auth_code_host: ServiceId,
    pub authorizer: Authorizer,
    pub context: RefineContext,
    pub items: Vec<WorkItem>,
}

impl WorkPackage {
    pub fn hash(&self) -> Hash32 {
        blake2b(&self.encoded())
    }

    pub fn validate(&self, params: &Params) -> Result<(), WorkValidationError> {
        if self.authorization.len() > params.max_authorization_code_size {
            return Err(WorkValidationError::AuthorizationTooLarge {
                actual: self.authorization.len(),
                bound: params.max_authorization_code_size,
            });
        }
        if self.items.is_empty() || self.items.len() > params.max_work_items_per_package {
            return Err(WorkValidationError::ItemCountOutOfRange {
                actual: self.items.len(),
                bound: params.max_work_items_per_package,
            });
        }
        Ok(())
    }
}

impl Encode for WorkPackage {
    fn encode_to(&self, out: &mut Vec<u8>) {
        encode_blob(&self.authorization, out);
        self.auth_code_host.encode_to(out);
        self.authorizer.encode_to(out);
        self.context.encode_to(out);
        encode_seq(&self.items, out);
    }
}

impl Decode for WorkPackage {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        r.typed("WorkPackage", |r| {
            Ok(Self {
                authorization: r.field_with("authorization", decode_blob)?,
                auth_code_host: r.field("auth_code_host")?,
                authorizer: r.field("authorizer")?,
                context: r.field("context")?,
                items: r.field_with("items", decode_seq)?,
            })
        })
    }
}

/// Summary of an encoded work package and its availability commitments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkPackageSpec {
    pub hash: Hash32,
    pub length: u32,
    pub erasure_root: Hash32,
    pub exports_root: Hash32,
    pub exports_count: u16,
}

impl Encode for WorkPackageSpec {
    fn encode_to(&self, out: &mut Vec<u8>) {
        self.hash.encode_to(out);
        self.length.encode_to(out);
        self.erasure_root.encode_to(out);
        self.exports_root.encode_to(out);
        self.exports_count.encode_to(out);
    }
}

impl Decode for WorkPackageSpec {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        r.typed("WorkPackageSpec", |r| {
            Ok(Self {
                hash: r.field("hash")?,
                length: r.field("length")?,
                erasure_root: r.field("erasure_root")?,
                exports_root: r.field("exports_root")?,
                exports_count: r.field("exports_count")?,
            })
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SegmentRootLookup {
    pub work_package_hash: Hash32,
    pub segment_tree_root: Hash32,
}

impl Encode for SegmentRootLookup {
    fn encode_to(&self, out: &mut Vec<u8>) {
        self.work_package_hash.encode_to(out);
        self.segment_tree_root.encode_to(out);
    }
}

impl Decode for SegmentRootLookup {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        r.typed("SegmentRootLookup", |r| {
            Ok(Self {
                work_package_hash: r.field("work_package_hash")?,
                segment_tree_root: r.field("segment_tree_root")?,
            })
        })
    }
}

/// Outcome of refining one work item. Carries its own wire form: a one-byte
/// tag, the success variant followed by a length-prefixed payload.
#[derive(Clone, PartialEq, Eq, derive_more::Debug)]
pub enum WorkExecResult {
    #[debug("Ok({} bytes)", _0.len())]
    Ok(Vec<u8>),
    OutOfGas,
    Panic,
    BadExports,
    BadCode,
    CodeOversize,
}

impl WorkExecResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, WorkExecResult::Ok(_))
    }
}

impl Encode for WorkExecResult {
    fn encode_to(&self, out: &mut Vec<u8>) {
        match self {
            WorkExecResult::Ok(payload) => {
                out.push(0);
                encode_blob(payload, out);
            }
            WorkExecResult::OutOfGas => out.push(1),
            WorkExecResult::Panic => out.push(2),
            WorkExecResult::BadExports => out.push(3),
            WorkExecResult::BadCode => out.push(4),
            WorkExecResult::CodeOversize => out.push(5),
        }
    }
}

impl Decode for WorkExecResult {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        r.typed("WorkExecResult", |r| match r.read_byte()? {
            0 => Ok(WorkExecResult::Ok(decode_blob(r)?)),
            1 => Ok(WorkExecResult::OutOfGas),
            2 => Ok(WorkExecResult::Panic),
            3 => Ok(WorkExecResult::BadExports),
            4 => Ok(WorkExecResult::BadCode),
            5 => Ok(WorkExecResult::CodeOversize),
            _ => Err(r.error(DecodeErrorKind::InvalidUnionTag)),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkResult {
    pub service: ServiceId,
    pub code_hash: Hash32,
    pub payload_hash: Hash32,
    /// Gas the service asked for at accumulation time.
    pub accumulate_gas: Gas,
    pub result: WorkExecResult,
    /// Gas actually consumed during refinement.
    pub refine_gas_used: Gas,
}

impl Encode for WorkResult {
    fn encode_to(&self, out: &mut Vec<u8>) {
        self.service.encode_to(out);
        self.code_hash.encode_to(out);
        self.payload_hash.encode_to(out);
        self.accumulate_gas.encode_to(out);
        self.result.encode_to(out);
        self.refine_gas_used.encode_to(out);
    }
}

impl Decode for WorkResult {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        r.typed("WorkResult", |r| {
            Ok(Self {
                service: r.field("service")?,
                code_hash: r.field("code_hash")?,
                payload_hash: r.field("payload_hash")?,
                accumulate_gas: r.field("accumulate_gas")?,
                result: r.field("result")?,
                refine_gas_used: r.field("refine_gas_used")?,
            })
        })
    }
}

/// A refined work package as reported by its guarantors.
#[derive(Clone, PartialEq, Eq, derive_more::Debug)]
pub struct WorkReport {
    pub package_spec: WorkPackageSpec,
    pub context: RefineContext,
    pub core_index: CoreIndex,
    pub authorizer_hash: Hash32,
    #[debug("{} bytes", auth_output.len())]
    pub auth_output: Vec<u8>,
    pub segment_root_lookup: Vec<SegmentRootLookup>,
    pub results: Vec<WorkResult>,
}

impl WorkReport {
    pub fn hash(&self) -> Hash32 {
        blake2b(&self.encoded())
    }

    pub fn package_hash(&self) -> Hash32 {
        self.package_spec.hash
    }

    /// Work-package hashes this report cannot accumulate before: the refine
    /// prerequisites plus every package referenced by a segment-root lookup.
    pub fn dependencies(&self) -> BTreeSet<Hash32> {
        self.context
            .prerequisites
            .iter()
            .copied()
            .chain(self.segment_root_lookup.iter().map(|l| l.work_package_hash))
            .collect()
    }

    /// Gas requested for accumulating this report across all results.
    pub fn accumulate_gas(&self) -> Gas {
        self.results.iter().map(|result| result.accumulate_gas).sum()
    }
}

impl Encode for WorkReport {
    fn encode_to(&self, out: &mut Vec<u8>) {
        self.package_spec.encode_to(out);
        self.context.encode_to(out);
        self.core_index.encode_to(out);
        self.authorizer_hash.encode_to(out);
        encode_blob(&self.auth_output, out);
        encode_seq(&self.segment_root_lookup, out);
        encode_seq(&self.results, out);
    }
}

impl Decode for WorkReport {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        r.typed("WorkReport", |r| {
            Ok(Self {
                package_spec: r.field("package_spec")?,
                context: r.field("context")?,
                core_index: r.field("core_index")?,
                authorizer_hash: r.field("authorizer_hash")?,
                auth_output: r.field_with("auth_output", decode_blob)?,
                segment_root_lookup: r.field_with("segment_root_lookup", decode_seq)?,
                results: r.field_with("results", decode_seq)?,
            })
        })
    }
}

/// Node of the accumulation dependency graph: a report plus the package
/// hashes still blocking it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkReportAndDeps {
    pub report: WorkReport,
    pub dependencies: BTreeSet<Hash32>,
}

impl WorkReportAndDeps {
    pub fn new(report: WorkReport) -> Self {
        let dependencies = report.dependencies();
        Self { report, dependencies }
    }

    pub fn is_resolved(&self) -> bool {
        self.dependencies.is_empty()
    }
}

impl Encode for WorkReportAndDeps {
    fn encode_to(&self, out: &mut Vec<u8>) {
        self.report.encode_to(out);
        encode_varint(self.dependencies.len() as u64, out);
        for hash in &self.dependencies {
            hash.encode_to(out);
        }
    }
}

impl Decode for WorkReportAndDeps {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        r.typed("WorkReportAndDeps", |r| {
            let report: WorkReport = r.field("report")?;
            let dependencies = r.field_with("dependencies", |r| {
                let count = decode_varint(r)? as usize;
                let mut set = BTreeSet::new();
                for _ in 0..count {
                    set.insert(Hash32::decode(r)?);
                }
                Ok(set)
            })?;
            Ok(Self { report, dependencies })
        })
    }
}
