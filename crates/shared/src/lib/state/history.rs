//! The ξ history: a rolling window of per-block sets of already-accumulated
//! package hashes, newest bucket first.

use crate::codec::{decode_seq, encode_seq, DecodeError, DecodeErrorKind, EncodeError, PathSeg, Reader};
use crate::primitives::Hash32;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccumulatedHistory {
    pub buckets: Vec<Vec<Hash32>>,
}

impl AccumulatedHistory {
    pub fn new(epoch_length: usize) -> Self {
        Self { buckets: vec![Vec::new(); epoch_length] }
    }

    pub fn contains(&self, hash: &Hash32) -> bool {
        self.buckets.iter().any(|bucket| bucket.binary_search(hash).is_ok())
    }

    /// Record a freshly accumulated package in the newest bucket, keeping it
    /// sorted for lookup and canonical encoding.
    pub fn add(&mut self, hash: Hash32) {
        let bucket = &mut self.buckets[0];
        if let Err(pos) = bucket.binary_search(&hash) {
            bucket.insert(pos, hash);
        }
    }

    /// Drop the oldest bucket and open a fresh one at the front.
    pub fn shift_down(&mut self) {
        self.buckets.pop();
        self.buckets.insert(0, Vec::new());
    }

    pub fn encode_with(&self, epoch_length: usize, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        if self.buckets.len() != epoch_length {
            return Err(EncodeError {
                what: "AccumulatedHistory.buckets",
                expected: epoch_length,
                actual: self.buckets.len(),
            });
        }
        for bucket in &self.buckets {
            encode_seq(bucket, out);
        }
        Ok(())
    }

    pub fn decode_with(r: &mut Reader<'_>, epoch_length: usize) -> Result<Self, DecodeError> {
        r.typed("AccumulatedHistory", |r| {
            let mut buckets: Vec<Vec<Hash32>> = Vec::with_capacity(epoch_length);
            for i in 0..epoch_length {
                let bucket: Vec<Hash32> = r.scoped(PathSeg::Index(i), decode_seq)?;
                if !bucket.windows(2).all(|pair| pair[0] < pair[1]) {
                    return Err(r.error(DecodeErrorKind::LengthMismatch));
                }
                buckets.push(bucket);
            }
            Ok(Self { buckets })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::blake2b;

    #[test]
    fn window_expires_oldest() {
        let mut history = AccumulatedHistory::new(3);
        let first = blake2b(b"first");
        history.add(first);
        assert!(history.contains(&first));
        history.shift_down();
        history.add(blake2b(b"second"));
        assert!(history.contains(&first));
        history.shift_down();
        history.shift_down();
        // Three shifts since `first` was recorded: its bucket fell out.
        assert!(!history.contains(&first));
        assert_eq!(history.buckets.len(), 3);
    }

    #[test]
    fn add_is_idempotent_and_sorted() {
        let mut history = AccumulatedHistory::new(2);
        let b = blake2b(b"b");
        let a = blake2b(b"a");
        history.add(b);
        history.add(a);
        history.add(b);
        assert_eq!(history.buckets[0].len(), 2);
        assert!(history.buckets[0].windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn decode_rejects_unsorted_bucket() {
        let mut history = AccumulatedHistory::new(1);
        history.add(blake2b(b"a"));
        history.add(blake2b(b"b"));
        let mut bytes = Vec::new();
        history.encode_with(1, &mut bytes).unwrap();
        let mut r = Reader::new(&bytes);
        assert!(AccumulatedHistory::decode_with(&mut r, 1).is_ok());

        // Swap the two hashes in place to break the ordering.
        let mut tampered = bytes.clone();
        let (first, second) = (tampered[1..33].to_vec(), tampered[33..65].to_vec());
        tampered[1..33].copy_from_slice(&second);
        tampered[33..65].copy_from_slice(&first);
        let mut r = Reader::new(&tampered);
        assert!(AccumulatedHistory::decode_with(&mut r, 1).is_err());
    }
}
