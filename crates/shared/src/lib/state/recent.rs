//! Recent-blocks history (β): a bounded FIFO of per-block records carrying
//! the BEEFY MMR peaks, the posterior state root and the packages reported
//! in that block.

use crate::codec::{
    decode_seq, encode_seq, Decode, DecodeError, DecodeErrorKind, Encode, Reader,
};
use crate::crypto::keccak256_parts;
use crate::primitives::Hash32;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReportedPackage {
    pub hash: Hash32,
    pub exports_root: Hash32,
}

impl Encode for ReportedPackage {
    fn encode_to(&self, out: &mut Vec<u8>) {
        self.hash.encode_to(out);
        self.exports_root.encode_to(out);
    }
}

impl Decode for ReportedPackage {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self { hash: r.field("hash")?, exports_root: r.field("exports_root")? })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockInfo {
    pub header_hash: Hash32,
    /// BEEFY MMR peaks after appending this block's accumulate root.
    pub mmr_peaks: Vec<Option<Hash32>>,
    pub state_root: Hash32,
    /// Packages reported in this block, sorted by package hash.
    pub reported: Vec<ReportedPackage>,
}

impl Encode for BlockInfo {
    fn encode_to(&self, out: &mut Vec<u8>) {
        self.header_hash.encode_to(out);
        encode_seq(&self.mmr_peaks, out);
        self.state_root.encode_to(out);
        encode_seq(&self.reported, out);
    }
}

impl Decode for BlockInfo {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        r.typed("BlockInfo", |r| {
            Ok(Self {
                header_hash: r.field("header_hash")?,
                mmr_peaks: r.field_with("mmr_peaks", decode_seq)?,
                state_root: r.field("state_root")?,
                reported: r.field_with("reported", decode_seq)?,
            })
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct RecentHistory {
    pub blocks: Vec<BlockInfo>,
}

impl RecentHistory {
    /// Append, dropping the oldest entry once `max_blocks` is exceeded.
    pub fn append(&mut self, info: BlockInfo, max_blocks: usize) {
        self.blocks.push(info);
        if self.blocks.len() > max_blocks {
            self.blocks.remove(0);
        }
    }

    pub fn latest(&self) -> Option<&BlockInfo> {
        self.blocks.last()
    }

    /// The importing header carries the true posterior state root of its
    /// parent; patch it into the most recent record before anything reads β.
    pub fn update_latest_state_root(&mut self, root: Hash32) {
        if let Some(last) = self.blocks.last_mut() {
            last.state_root = root;
        }
    }

    pub fn contains_package(&self, hash: &Hash32) -> bool {
        self.blocks
            .iter()
            .any(|block| block.reported.iter().any(|r| r.hash == *hash))
    }

    pub fn contains_header(&self, hash: &Hash32) -> bool {
        self.blocks.iter().any(|block| block.header_hash == *hash)
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        encode_seq(&self.blocks, out);
    }

    pub fn decode(r: &mut Reader<'_>, max_blocks: usize) -> Result<Self, DecodeError> {
        r.typed("RecentHistory", |r| {
            let blocks: Vec<BlockInfo> = decode_seq(r)?;
            if blocks.len() > max_blocks {
                return Err(r.error(DecodeErrorKind::LengthMismatch));
            }
            Ok(Self { blocks })
        })
    }
}

/// Append an item to a set of MMR peaks, carrying upward while slots are
/// occupied. Peak slot `i` holds the root of a complete subtree of 2^i items.
pub fn mmr_append(peaks: &mut Vec<Option<Hash32>>, item: Hash32) {
    let mut carry = item;
    for slot in peaks.iter_mut() {
        match slot.take() {
            None => {
                *slot = Some(carry);
                return;
            }
            Some(existing) => {
                carry = keccak256_parts(&[&existing.0, &carry.0]);
            }
        }
    }
    peaks.push(Some(carry));
}

/// Fold the peaks into a single commitment, newest-to-oldest.
pub fn mmr_super_peak(peaks: &[Option<Hash32>]) -> Hash32 {
    let mut acc: Option<Hash32> = None;
    for peak in peaks.iter().flatten() {
        acc = Some(match acc {
            None => *peak,
            Some(prev) => keccak256_parts(&[b"peak", &peak.0, &prev.0]),
        });
    }
    acc.unwrap_or(Hash32::ZERO)
}
