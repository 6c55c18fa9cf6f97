use std::collections::*;
use itertools::*;

use crate::probe::NUM_PARTITIONS;

/// Accumulated cache hits per probe partition for a single decoded byte.
#[derive(Clone, PartialEq, Eq)]
pub struct HitCounterTable([u32; NUM_PARTITIONS]);
impl HitCounterTable {
    pub fn new() -> Self { Self([0; NUM_PARTITIONS]) }

    pub fn from_counts(counts: [u32; NUM_PARTITIONS]) -> Self { Self(counts) }

    pub fn record_hit(&mut self, partition: u8) {
        self.0[partition as usize] += 1;
    }

    pub fn score(&self, partition: u8) -> u32 { self.0[partition as usize] }

    pub fn counts(&self) -> &[u32; NUM_PARTITIONS] { &self.0 }

    /// Total number of hits across all partitions.
    pub fn total(&self) -> u64 {
        self.0.iter().map(|c| *c as u64).sum()
    }

    /// Partitions with at least one hit, as `(partition, count)`.
    pub fn nonzero(&self) -> impl Iterator<Item=(u8, u32)> + '_ {
        self.0.iter().enumerate()
            .filter(|(_, c)| **c != 0)
            .map(|(p, c)| (p as u8, *c))
    }
}
impl Default for HitCounterTable {
    fn default() -> Self { Self::new() }
}
impl std::fmt::Debug for HitCounterTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.nonzero()).finish()
    }
}

/// A candidate byte value and the number of trials in which its partition
/// was observed in the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub value: u8,
    pub score: u32,
}

/// Pick the two highest-scoring partitions in one left-to-right scan.
///
/// A count that is greater than or equal to the current best displaces it,
/// so ties are won by the later index. When every count is zero, this
/// yields `255` as best and `254` as second.
pub fn best_results(table: &HitCounterTable) -> (Candidate, Candidate) {
    let counts = table.counts();
    let (mut best, mut second) = if counts[1] >= counts[0] {
        (1, 0)
    } else {
        (0, 1)
    };
    for idx in 2..NUM_PARTITIONS {
        if counts[idx] >= counts[best] {
            second = best;
            best = idx;
        } else if counts[idx] >= counts[second] {
            second = idx;
        }
    }
    (
        Candidate { value: best as u8, score: counts[best] },
        Candidate { value: second as u8, score: counts[second] },
    )
}

/// A list of observed values (usually elapsed cycles).
#[derive(Clone, Debug, Default)]
pub struct RawResults(pub Vec<u64>);

/// Implemented on types which contain a list of observed values.
pub trait ResultList<D: Copy + Ord> {
    /// Return a reference to the list of values.
    fn data(&self) -> &Vec<D>;

    /// Return the number of observed values.
    fn len(&self) -> usize { self.data().len() }

    fn is_empty(&self) -> bool { self.data().is_empty() }

    /// Return the minimum value in the list.
    fn get_min(&self) -> Option<D> { self.data().iter().min().copied() }

    /// Return the maximum value in the list.
    fn get_max(&self) -> Option<D> { self.data().iter().max().copied() }

    /// Return the median value in the list (the upper one for an even
    /// number of values).
    fn get_median(&self) -> Option<D> {
        let sorted = self.data().iter().copied().sorted_unstable().collect_vec();
        sorted.get(sorted.len() / 2).copied()
    }

    /// Return the most-frequent value in the list. Ties go to the smallest
    /// value.
    fn get_mode(&self) -> Option<D> {
        self.histogram().into_iter()
            .max_by(|x, y| x.1.cmp(&y.1).then(y.0.cmp(&x.0)))
            .map(|(val, _)| val)
    }

    /// Return a histogram counting the distribution of all values in the list.
    fn histogram(&self) -> BTreeMap<D, usize> {
        let mut dist = BTreeMap::new();
        for r in self.data().iter() {
            *dist.entry(*r).or_insert(0) += 1;
        }
        dist
    }
}

impl ResultList<u64> for RawResults {
    fn data(&self) -> &Vec<u64> { &self.0 }
}
impl RawResults {
    pub fn mean(&self) -> Option<f64> {
        if self.0.is_empty() {
            return None;
        }
        let sum: u128 = self.0.iter().map(|x| *x as u128).sum();
        Some(sum as f64 / self.0.len() as f64)
    }
}
