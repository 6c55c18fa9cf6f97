//! Hit/miss latency calibration.
//!
//! The receiver needs a threshold that separates cached from uncached reads
//! on the current machine. This measures both and suggests one.

use log::{info, warn};

use crate::machine::Machine;
use crate::probe::ProbeArray;
use crate::receiver::ProbeOrder;
use crate::stats::{RawResults, ResultList};

/// Summary of a set of latency samples.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LatencySummary {
    pub min: u64,
    pub median: u64,
    pub mode: u64,
    pub max: u64,
    pub mean: f64,
}
impl LatencySummary {
    pub fn from_results(res: &RawResults) -> Option<Self> {
        Some(Self {
            min: res.get_min()?,
            median: res.get_median()?,
            mode: res.get_mode()?,
            max: res.get_max()?,
            mean: res.mean()?,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CalibrationReport {
    pub hit: LatencySummary,
    pub miss: LatencySummary,
    pub suggested_threshold: u64,
}

pub struct Calibration;
impl Calibration {
    /// For each round, flush every partition and time two back-to-back reads:
    /// the first is a miss, the second a hit.
    pub fn collect<M: Machine>(machine: &mut M, probe: &ProbeArray, rounds: usize)
        -> (RawResults, RawResults)
    {
        let mut hits = RawResults::default();
        let mut misses = RawResults::default();
        for _ in 0..rounds {
            for partition in ProbeOrder::Mixed.iter() {
                machine.flush(probe, partition);
                machine.fence();
                misses.0.push(machine.timed_read(probe, partition));
                hits.0.push(machine.timed_read(probe, partition));
            }
        }
        (hits, misses)
    }

    /// Midway between the hit and miss medians.
    pub fn suggest_threshold(hit: &LatencySummary, miss: &LatencySummary) -> u64 {
        hit.median + miss.median.saturating_sub(hit.median) / 2
    }

    /// Returns `None` when `rounds` is zero.
    pub fn run<M: Machine>(machine: &mut M, probe: &ProbeArray, rounds: usize)
        -> Option<CalibrationReport>
    {
        let (hits, misses) = Self::collect(machine, probe, rounds);
        let hit = LatencySummary::from_results(&hits)?;
        let miss = LatencySummary::from_results(&misses)?;
        let suggested_threshold = Self::suggest_threshold(&hit, &miss);
        if hit.median >= miss.median {
            warn!("hit median ({}) is not below miss median ({})",
                hit.median, miss.median);
        }
        info!("calibrated over {} samples: threshold {}",
            hits.len(), suggested_threshold);
        Some(CalibrationReport { hit, miss, suggested_threshold })
    }
}
