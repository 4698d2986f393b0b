//! The θ queue: reports that are available but still waiting on
//! dependencies, bucketed by the slot-in-epoch at which they arrived.

use crate::codec::{decode_seq, encode_seq, DecodeError, EncodeError, PathSeg, Reader};
use crate::work::WorkReportAndDeps;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadyQueue {
    /// One bucket per slot-in-epoch.
    pub buckets: Vec<Vec<WorkReportAndDeps>>,
}

impl ReadyQueue {
    pub fn new(epoch_length: usize) -> Self {
        Self { buckets: vec![Vec::new(); epoch_length] }
    }

    pub fn bucket(&self, phase: usize) -> &[WorkReportAndDeps] {
        &self.buckets[phase]
    }

    pub fn bucket_mut(&mut self, phase: usize) -> &mut Vec<WorkReportAndDeps> {
        &mut self.buckets[phase]
    }

    /// Walk every bucket starting from `phase`, wrapping at the epoch
    /// length. This is the merge order of the accumulation pending queue.
    pub fn iter_from(&self, phase: usize) -> impl Iterator<Item = &WorkReportAndDeps> {
        let len = self.buckets.len();
        (0..len).flat_map(move |offset| self.buckets[(phase + offset) % len].iter())
    }

    pub fn total_len(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    pub fn encode_with(&self, epoch_length: usize, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        if self.buckets.len() != epoch_length {
            return Err(EncodeError {
                what: "ReadyQueue.buckets",
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
        r.typed("ReadyQueue", |r| {
            let mut buckets = Vec::with_capacity(epoch_length);
            for i in 0..epoch_length {
                buckets.push(r.scoped(PathSeg::Index(i), decode_seq)?);
            }
            Ok(Self { buckets })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Encode;
    use crate::work::{test_fixtures, WorkReportAndDeps};

    #[test]
    fn iteration_wraps_from_the_given_phase() {
        let mut queue = ReadyQueue::new(4);
        for phase in 0..4 {
            queue
                .bucket_mut(phase)
                .push(WorkReportAndDeps::new(test_fixtures::report(0, phase as u8)));
        }
        let seeds: Vec<u8> = queue
            .iter_from(2)
            .map(|item| item.report.results[0].result.encoded()[2])
            .collect();
        // Payload byte encodes the seed; order must be 2, 3, 0, 1.
        assert_eq!(seeds, vec![2, 3, 0, 1]);
    }

    #[test]
    fn encode_rejects_wrong_bucket_count() {
        let queue = ReadyQueue::new(3);
        assert!(queue.encode_with(4, &mut Vec::new()).is_err());
        let mut out = Vec::new();
        queue.encode_with(3, &mut out).unwrap();
        assert_eq!(out, vec![0, 0, 0]);
    }
}
