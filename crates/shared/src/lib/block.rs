//! Blocks: header, extrinsic, and the five extrinsic item families.
//!
//! Leaf items are self-describing on the wire. The header and extrinsic
//! carry params-sized fields (epoch-mark validator list, tickets mark,
//! assurance bitfields), so their codec is exposed as `encode_with` /
//! `decode_with` taking the protocol parameters.

use crate::codec::{
    decode_blob, decode_fixed_seq, decode_seq, encode_blob, encode_fixed_blob, encode_fixed_seq,
    encode_seq, Decode, DecodeError, DecodeErrorKind, Encode, EncodeError, PathSeg, Reader,
};
use crate::crypto::blake2b;
use crate::params::Params;
use crate::primitives::{
    Ed25519Signature, Epoch, Hash32, RingVrfProof, ServiceId, TimeSlot, ValidatorIndex,
    VrfSignature,
};
use crate::work::WorkReport;

/// Anonymous lottery entry: the ring-VRF output id plus the attempt ordinal
/// it was generated under.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TicketBody {
    pub id: Hash32,
    pub attempt: u8,
}

impl Encode for TicketBody {
    fn encode_to(&self, out: &mut Vec<u8>) {
        self.id.encode_to(out);
        self.attempt.encode_to(out);
    }
}

impl Decode for TicketBody {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        r.typed("TicketBody", |r| {
            Ok(Self { id: r.field("id")?, attempt: r.field("attempt")? })
        })
    }
}

/// Submitted lottery entry: attempt ordinal plus the anonymous proof.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TicketEnvelope {
    pub attempt: u8,
    pub signature: RingVrfProof,
}

impl Encode for TicketEnvelope {
    fn encode_to(&self, out: &mut Vec<u8>) {
        self.attempt.encode_to(out);
        self.signature.encode_to(out);
    }
}

impl Decode for TicketEnvelope {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        r.typed("TicketEnvelope", |r| {
            Ok(Self { attempt: r.field("attempt")?, signature: r.field("signature")? })
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EpochMarkValidator {
    pub bandersnatch: Hash32,
    pub ed25519: Hash32,
}

impl Encode for EpochMarkValidator {
    fn encode_to(&self, out: &mut Vec<u8>) {
        self.bandersnatch.encode_to(out);
        self.ed25519.encode_to(out);
    }
}

impl Decode for EpochMarkValidator {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self { bandersnatch: r.field("bandersnatch")?, ed25519: r.field("ed25519")? })
    }
}

/// Announces an epoch rollover: next-epoch entropy values and the incoming
/// validator key list (exactly `validators_count` entries, no prefix).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EpochMark {
    pub entropy: Hash32,
    pub tickets_entropy: Hash32,
    pub validators: Vec<EpochMarkValidator>,
}

impl EpochMark {
    pub fn encode_with(&self, params: &Params, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        self.entropy.encode_to(out);
        self.tickets_entropy.encode_to(out);
        encode_fixed_seq("EpochMark.validators", &self.validators, params.validators_count, out)
    }

    pub fn decode_with(r: &mut Reader<'_>, params: &Params) -> Result<Self, DecodeError> {
        r.typed("EpochMark", |r| {
            Ok(Self {
                entropy: r.field("entropy")?,
                tickets_entropy: r.field("tickets_entropy")?,
                validators: r.field_with("validators", |r| {
                    decode_fixed_seq(r, params.validators_count)
                })?,
            })
        })
    }
}

/// The sealing-key sequence for the next epoch, announced once the lottery
/// saturates: exactly `epoch_length` ticket bodies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TicketsMark(pub Vec<TicketBody>);

impl TicketsMark {
    pub fn encode_with(&self, params: &Params, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        encode_fixed_seq("TicketsMark", &self.0, params.epoch_length, out)
    }

    pub fn decode_with(r: &mut Reader<'_>, params: &Params) -> Result<Self, DecodeError> {
        r.typed("TicketsMark", |r| Ok(Self(decode_fixed_seq(r, params.epoch_length)?)))
    }
}

#[derive(Clone, PartialEq, Eq, derive_more::Debug)]
pub struct Preimage {
    pub requester: ServiceId,
    #[debug("{} bytes", blob.len())]
    pub blob: Vec<u8>,
}

impl Encode for Preimage {
    fn encode_to(&self, out: &mut Vec<u8>) {
        self.requester.encode_to(out);
        encode_blob(&self.blob, out);
    }
}

impl Decode for Preimage {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        r.typed("Preimage", |r| {
            Ok(Self { requester: r.field("requester")?, blob: r.field_with("blob", decode_blob)? })
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatorSignature {
    pub validator_index: ValidatorIndex,
    pub signature: Ed25519Signature,
}

impl Encode for ValidatorSignature {
    fn encode_to(&self, out: &mut Vec<u8>) {
        self.validator_index.encode_to(out);
        self.signature.encode_to(out);
    }
}

impl Decode for ValidatorSignature {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self { validator_index: r.field("validator_index")?, signature: r.field("signature")? })
    }
}

/// A work report plus the guarantor signatures admitting it onto its core.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReportGuarantee {
    pub report: WorkReport,
    pub slot: TimeSlot,
    pub signatures: Vec<ValidatorSignature>,
}

impl Encode for ReportGuarantee {
    fn encode_to(&self, out: &mut Vec<u8>) {
        self.report.encode_to(out);
        self.slot.encode_to(out);
        encode_seq(&self.signatures, out);
    }
}

impl Decode for ReportGuarantee {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        r.typed("ReportGuarantee", |r| {
            Ok(Self {
                report: r.field("report")?,
                slot: r.field("slot")?,
                signatures: r.field_with("signatures", decode_seq)?,
            })
        })
    }
}

/// Per-validator availability bitfield over cores, signed against the parent
/// header. The bitfield is exactly `avail_bitfield_bytes` long, no prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Assurance {
    pub anchor: Hash32,
    pub bitfield: Vec<u8>,
    pub validator_index: ValidatorIndex,
    pub signature: Ed25519Signature,
}

impl Assurance {
    pub fn core_bit(&self, core: usize) -> bool {
        self.bitfield
            .get(core / 8)
            .is_some_and(|byte| byte & (1 << (core % 8)) != 0)
    }

    pub fn encode_with(&self, params: &Params, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        self.anchor.encode_to(out);
        encode_fixed_blob("Assurance.bitfield", &self.bitfield, params.avail_bitfield_bytes, out)?;
        self.validator_index.encode_to(out);
        self.signature.encode_to(out);
        Ok(())
    }

    pub fn decode_with(r: &mut Reader<'_>, params: &Params) -> Result<Self, DecodeError> {
        r.typed("Assurance", |r| {
            Ok(Self {
                anchor: r.field("anchor")?,
                bitfield: r
                    .field_with("bitfield", |r| Ok(r.read_bytes(params.avail_bitfield_bytes)?.to_vec()))?,
                validator_index: r.field("validator_index")?,
                signature: r.field("signature")?,
            })
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Judgment {
    pub vote: bool,
    pub index: ValidatorIndex,
    pub signature: Ed25519Signature,
}

impl Encode for Judgment {
    fn encode_to(&self, out: &mut Vec<u8>) {
        self.vote.encode_to(out);
        self.index.encode_to(out);
        self.signature.encode_to(out);
    }
}

impl Decode for Judgment {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self { vote: r.field("vote")?, index: r.field("index")?, signature: r.field("signature")? })
    }
}

/// A supermajority of signed judgments over one work-report hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verdict {
    pub target: Hash32,
    pub age: Epoch,
    pub votes: Vec<Judgment>,
}

impl Encode for Verdict {
    fn encode_to(&self, out: &mut Vec<u8>) {
        self.target.encode_to(out);
        self.age.encode_to(out);
        encode_seq(&self.votes, out);
    }
}

impl Decode for Verdict {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        r.typed("Verdict", |r| {
            Ok(Self {
                target: r.field("target")?,
                age: r.field("age")?,
                votes: r.field_with("votes", decode_seq)?,
            })
        })
    }
}

/// A guarantor of a report later judged bad.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Culprit {
    pub target: Hash32,
    pub key: Hash32,
    pub signature: Ed25519Signature,
}

impl Encode for Culprit {
    fn encode_to(&self, out: &mut Vec<u8>) {
        self.target.encode_to(out);
        self.key.encode_to(out);
        self.signature.encode_to(out);
    }
}

impl Decode for Culprit {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        r.typed("Culprit", |r| {
            Ok(Self { target: r.field("target")?, key: r.field("key")?, signature: r.field("signature")? })
        })
    }
}

/// A validator whose judgment contradicted the final verdict.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fault {
    pub target: Hash32,
    pub vote: bool,
    pub key: Hash32,
    pub signature: Ed25519Signature,
}

impl Encode for Fault {
    fn encode_to(&self, out: &mut Vec<u8>) {
        self.target.encode_to(out);
        self.vote.encode_to(out);
        self.key.encode_to(out);
        self.signature.encode_to(out);
    }
}

impl Decode for Fault {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        r.typed("Fault", |r| {
            Ok(Self {
                target: r.field("target")?,
                vote: r.field("vote")?,
                key: r.field("key")?,
                signature: r.field("signature")?,
            })
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct DisputesExtrinsic {
    pub verdicts: Vec<Verdict>,
    pub culprits: Vec<Culprit>,
    pub faults: Vec<Fault>,
}

impl DisputesExtrinsic {
    pub fn is_empty(&self) -> bool {
        self.verdicts.is_empty() && self.culprits.is_empty() && self.faults.is_empty()
    }
}

impl Encode for DisputesExtrinsic {
    fn encode_to(&self, out: &mut Vec<u8>) {
        encode_seq(&self.verdicts, out);
        encode_seq(&self.culprits, out);
        encode_seq(&self.faults, out);
    }
}

impl Decode for DisputesExtrinsic {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        r.typed("DisputesExtrinsic", |r| {
            Ok(Self {
                verdicts: r.field_with("verdicts", decode_seq)?,
                culprits: r.field_with("culprits", decode_seq)?,
                faults: r.field_with("faults", decode_seq)?,
            })
        })
    }
}

/// The five ordered extrinsic sequences.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Extrinsic {
    pub tickets: Vec<TicketEnvelope>,
    pub preimages: Vec<Preimage>,
    pub guarantees: Vec<ReportGuarantee>,
    pub assurances: Vec<Assurance>,
    pub disputes: DisputesExtrinsic,
}

impl Extrinsic {
    pub fn encode_with(&self, params: &Params, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        encode_seq(&self.tickets, out);
        encode_seq(&self.preimages, out);
        encode_seq(&self.guarantees, out);
        crate::codec::encode_varint(self.assurances.len() as u64, out);
        for assurance in &self.assurances {
            assurance.encode_with(params, out)?;
        }
        self.disputes.encode_to(out);
        Ok(())
    }

    pub fn decode_with(r: &mut Reader<'_>, params: &Params) -> Result<Self, DecodeError> {
        r.typed("Extrinsic", |r| {
            Ok(Self {
                tickets: r.field_with("tickets", decode_seq)?,
                preimages: r.field_with("preimages", decode_seq)?,
                guarantees: r.field_with("guarantees", decode_seq)?,
                assurances: r.field_with("assurances", |r| {
                    let count = crate::codec::decode_varint(r)? as usize;
                    let mut items = Vec::with_capacity(count.min(r.remaining()));
                    for i in 0..count {
                        items.push(r.scoped(PathSeg::Index(i), |r| Assurance::decode_with(r, params))?);
                    }
                    Ok(items)
                })?,
                disputes: r.field("disputes")?,
            })
        })
    }

    /// The special guarantees encoding `g` folded into the extrinsic hash:
    /// a length-prefixed sequence of (report-hash, slot, signatures) tuples
    /// in extrinsic order.
    pub fn guarantees_commitment(&self) -> Vec<u8> {
        let mut out = Vec::new();
        crate::codec::encode_varint(self.guarantees.len() as u64, &mut out);
        for guarantee in &self.guarantees {
            guarantee.report.hash().encode_to(&mut out);
            guarantee.slot.encode_to(&mut out);
            encode_seq(&guarantee.signatures, &mut out);
        }
        out
    }

    /// `Hx = H(H(ET) ‖ H(EP) ‖ H(g) ‖ H(EA) ‖ H(ED))`.
    pub fn hash(&self, params: &Params) -> Result<Hash32, EncodeError> {
        let mut tickets = Vec::new();
        encode_seq(&self.tickets, &mut tickets);
        let mut preimages = Vec::new();
        encode_seq(&self.preimages, &mut preimages);
        let guarantees = self.guarantees_commitment();
        let mut assurances = Vec::new();
        crate::codec::encode_varint(self.assurances.len() as u64, &mut assurances);
        for assurance in &self.assurances {
            assurance.encode_with(params, &mut assurances)?;
        }
        let disputes = self.disputes.encoded();
        Ok(blake2b(
            &[
                blake2b(&tickets).0,
                blake2b(&preimages).0,
                blake2b(&guarantees).0,
                blake2b(&assurances).0,
                blake2b(&disputes).0,
            ]
            .concat(),
        ))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub parent: Hash32,
    pub parent_state_root: Hash32,
    pub extrinsic_hash: Hash32,
    pub slot: TimeSlot,
    pub epoch_mark: Option<EpochMark>,
    pub tickets_mark: Option<TicketsMark>,
    /// Ed25519 keys newly judged offenders, announced in this block.
    pub offenders_mark: Vec<Hash32>,
    pub author_index: ValidatorIndex,
    pub entropy_source: VrfSignature,
    pub seal: VrfSignature,
}

impl Header {
    fn encode_body(&self, params: &Params, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        self.parent.encode_to(out);
        self.parent_state_root.encode_to(out);
        self.extrinsic_hash.encode_to(out);
        self.slot.encode_to(out);
        match &self.epoch_mark {
            None => out.push(0),
            Some(mark) => {
                out.push(1);
                mark.encode_with(params, out)?;
            }
        }
        match &self.tickets_mark {
            None => out.push(0),
            Some(mark) => {
                out.push(1);
                mark.encode_with(params, out)?;
            }
        }
        encode_seq(&self.offenders_mark, out);
        self.author_index.encode_to(out);
        self.entropy_source.encode_to(out);
        Ok(())
    }

    pub fn encode_with(&self, params: &Params, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        self.encode_body(params, out)?;
        self.seal.encode_to(out);
        Ok(())
    }

    /// The bytes the seal VRF signs: everything up to but excluding the seal.
    pub fn unsealed_encoding(&self, params: &Params) -> Result<Vec<u8>, EncodeError> {
        let mut out = Vec::new();
        self.encode_body(params, &mut out)?;
        Ok(out)
    }

    pub fn hash(&self, params: &Params) -> Result<Hash32, EncodeError> {
        let mut out = Vec::new();
        self.encode_with(params, &mut out)?;
        Ok(blake2b(&out))
    }

    pub fn decode_with(r: &mut Reader<'_>, params: &Params) -> Result<Self, DecodeError> {
        r.typed("Header", |r| {
            Ok(Self {
                parent: r.field("parent")?,
                parent_state_root: r.field("parent_state_root")?,
                extrinsic_hash: r.field("extrinsic_hash")?,
                slot: r.field("slot")?,
                epoch_mark: r.field_with("epoch_mark", |r| match r.read_byte()? {
                    0 => Ok(None),
                    1 => Ok(Some(EpochMark::decode_with(r, params)?)),
                    _ => Err(r.error(DecodeErrorKind::InvalidOptionByte)),
                })?,
                tickets_mark: r.field_with("tickets_mark", |r| match r.read_byte()? {
                    0 => Ok(None),
                    1 => Ok(Some(TicketsMark::decode_with(r, params)?)),
                    _ => Err(r.error(DecodeErrorKind::InvalidOptionByte)),
                })?,
                offenders_mark: r.field_with("offenders_mark", decode_seq)?,
                author_index: r.field("author_index")?,
                entropy_source: r.field("entropy_source")?,
                seal: r.field("seal")?,
            })
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub header: Header,
    pub extrinsic: Extrinsic,
}

impl Block {
    pub fn encode_with(&self, params: &Params) -> Result<Vec<u8>, EncodeError> {
        let mut out = Vec::new();
        self.header.encode_with(params, &mut out)?;
        self.extrinsic.encode_with(params, &mut out)?;
        Ok(out)
    }

    pub fn decode_with(r: &mut Reader<'_>, params: &Params) -> Result<Self, DecodeError> {
        r.typed("Block", |r| {
            Ok(Self {
                header: r.field_with("header", |r| Header::decode_with(r, params))?,
                extrinsic: r.field_with("extrinsic", |r| Extrinsic::decode_with(r, params))?,
            })
        })
    }

    pub fn decode_bytes(data: &[u8], params: &Params) -> Result<Self, DecodeError> {
        let mut r = Reader::new(data);
        let block = Self::decode_with(&mut r, params)?;
        if !r.is_empty() {
            return Err(r.error(DecodeErrorKind::TrailingBytes));
        }
        Ok(block)
    }
}
