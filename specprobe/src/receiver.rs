//! The timing receiver.

use crate::machine::Machine;
use crate::probe::{ProbeArray, NUM_PARTITIONS};
use crate::stats::HitCounterTable;

/// The order in which probe partitions are timed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ProbeOrder {
    /// Partitions 0 through 255.
    #[default]
    Sequential,
    /// A fixed permutation, `(i * 167 + 13) & 0xff`, that never touches
    /// neighbouring partitions back to back.
    Mixed,
}
impl ProbeOrder {
    /// The partition timed at `step`.
    pub fn partition(&self, step: usize) -> u8 {
        match self {
            Self::Sequential => step as u8,
            Self::Mixed => (step.wrapping_mul(167).wrapping_add(13) & 0xff) as u8,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item=u8> {
        let order = *self;
        (0..NUM_PARTITIONS).map(move |step| order.partition(step))
    }
}

/// An access is a hit when it completes within `threshold` cycles.
#[inline]
pub fn is_hit(elapsed: u64, threshold: u64) -> bool {
    elapsed <= threshold
}

/// Time one read from every partition and count the hits into `table`.
/// Returns the number of hits observed.
pub fn receive<M: Machine>(
    machine: &mut M,
    probe: &ProbeArray,
    threshold: u64,
    order: ProbeOrder,
    table: &mut HitCounterTable,
) -> usize {
    let mut hits = 0;
    for partition in order.iter() {
        let elapsed = machine.timed_read(probe, partition);
        if is_hit(elapsed, threshold) {
            table.record_hit(partition);
            hits += 1;
        }
    }
    hits
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::probe::PartitionLayout;
    use crate::victim::VictimMemory;
    use itertools::Itertools;
    use rand::prelude::*;

    /// Reports a fixed latency per partition and remembers the read order.
    struct FixedLatency {
        latency: [u64; NUM_PARTITIONS],
        order: Vec<u8>,
    }
    impl Machine for FixedLatency {
        fn flush(&mut self, _: &ProbeArray, _: u8) {}
        fn fence(&mut self) {}
        fn leak(&mut self, _: &VictimMemory, _: &ProbeArray, _: usize) {}
        fn timed_read(&mut self, _: &ProbeArray, p: u8) -> u64 {
            self.order.push(p);
            self.latency[p as usize]
        }
    }

    #[test]
    fn mixed_order_is_a_permutation() {
        let seen = ProbeOrder::Mixed.iter().sorted().collect_vec();
        assert_eq!(seen, (0..=255u8).collect_vec());
        assert_eq!(ProbeOrder::Mixed.partition(0), 13);
        assert_eq!(ProbeOrder::Mixed.partition(1), 180);
        assert_eq!(ProbeOrder::Sequential.iter().collect_vec(), (0..=255u8).collect_vec());
    }

    #[test]
    fn threshold_is_inclusive() {
        assert!(is_hit(80, 80));
        assert!(!is_hit(81, 80));
        assert!(is_hit(0, 0));
    }

    #[test]
    fn threshold_monotonicity() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..1000 {
            let elapsed = rng.gen_range(0..400);
            let t = rng.gen_range(0..400);
            let t_hi = t + rng.gen_range(0..100);
            if is_hit(elapsed, t) {
                assert!(is_hit(elapsed, t_hi));
            }
            if !is_hit(elapsed, t_hi) {
                assert!(!is_hit(elapsed, t));
            }
        }
    }

    #[test]
    fn each_partition_read_once() {
        let probe = ProbeArray::new(PartitionLayout::new(64).unwrap()).unwrap();
        let mut latency = [300; NUM_PARTITIONS];
        latency[0x41] = 30;
        latency[0x42] = 80;
        latency[0x43] = 81;
        let mut m = FixedLatency { latency, order: Vec::new() };
        let mut table = HitCounterTable::new();

        let hits = receive(&mut m, &probe, 80, ProbeOrder::Mixed, &mut table);
        assert_eq!(hits, 2);
        assert_eq!(m.order, ProbeOrder::Mixed.iter().collect_vec());
        assert_eq!(table.nonzero().collect_vec(), vec![(0x41, 1), (0x42, 1)]);

        receive(&mut m, &probe, 81, ProbeOrder::Sequential, &mut table);
        assert_eq!(table.nonzero().collect_vec(), vec![(0x41, 2), (0x42, 2), (0x43, 1)]);
    }
}
