//! A simulated machine.
//!
//! Models just enough of a core to exercise the whole pipeline without
//! relying on real cache timing:
//!
//! - a residency bit for each probe partition, cleared by [`Machine::flush`]
//!   and set by any access to the partition,
//! - a fixed latency for a resident (hit) and non-resident (miss) read,
//! - a single two-bit saturating counter standing in for the predictor
//!   state of the bounds check,
//! - optionally, random false hits on non-resident partitions.
//!
//! When the counter predicts "in bounds" for an out-of-bounds index, the
//! access runs anyway and the partition for the aliased byte becomes
//! resident, exactly like a squashed speculative load.

use bitvec::prelude::*;
use log::debug;
use rand::prelude::*;

use crate::error::{Error, Result};
use crate::machine::Machine;
use crate::probe::{ProbeArray, NUM_PARTITIONS};
use crate::victim::VictimMemory;

type Residency = BitArr!(for NUM_PARTITIONS, in u64, Lsb0);

/// Random false hits: each read of a non-resident partition is reported as
/// a hit with probability `probability`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NoiseModel {
    pub probability: f64,
    pub seed: u64,
}

/// Configuration passed to [SimConfig::emit].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimConfig {
    /// Latency of a read from a resident partition.
    pub hit_latency: u64,

    /// Latency of a read from a non-resident partition.
    pub miss_latency: u64,

    /// Whether in-bounds (architectural) accesses made during training
    /// leave a footprint in the probe array. Real hardware always does.
    pub visible_training_loads: bool,

    /// Optional false hits.
    pub noise: Option<NoiseModel>,
}

impl SimConfig {
    pub const DEFAULT_HIT_LATENCY: u64 = 40;
    pub const DEFAULT_MISS_LATENCY: u64 = 240;

    /// Only the speculatively touched partition is ever observed as a hit.
    pub fn deterministic() -> Self {
        Self {
            hit_latency: Self::DEFAULT_HIT_LATENCY,
            miss_latency: Self::DEFAULT_MISS_LATENCY,
            visible_training_loads: false,
            noise: None,
        }
    }

    /// Training loads also leave their partitions resident.
    pub fn realistic() -> Self {
        Self::deterministic().visible_training_loads(true)
    }
}

impl SimConfig {
    pub fn hit_latency(mut self, x: u64) -> Self {
        self.hit_latency = x;
        self
    }

    pub fn miss_latency(mut self, x: u64) -> Self {
        self.miss_latency = x;
        self
    }

    pub fn visible_training_loads(mut self, x: bool) -> Self {
        self.visible_training_loads = x;
        self
    }

    pub fn noise(mut self, probability: f64, seed: u64) -> Self {
        self.noise = Some(NoiseModel { probability, seed });
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.hit_latency >= self.miss_latency {
            return Err(Error::InvalidSimulation(format!(
                "hit latency ({}) must be below miss latency ({})",
                self.hit_latency, self.miss_latency
            )));
        }
        if let Some(noise) = self.noise {
            if !(0.0..=1.0).contains(&noise.probability) {
                return Err(Error::InvalidSimulation(format!(
                    "noise probability {} is outside [0, 1]",
                    noise.probability
                )));
            }
        }
        Ok(())
    }

    pub fn emit(self) -> Result<SimulatedMachine> {
        self.validate()?;
        debug!("simulated machine: {:?}", self);
        Ok(SimulatedMachine {
            rng: self.noise.map(|n| StdRng::seed_from_u64(n.seed)),
            cfg: self,
            resident: Residency::ZERO,
            predictor: SaturatingCounter::WEAKLY_NOT_TAKEN,
            counting: false,
            mispredicts: 0,
            transient_loads: 0,
        })
    }
}

/// A two-bit saturating branch predictor counter.
///
/// States 0 and 1 predict "not taken" (out of bounds), 2 and 3 predict
/// "taken" (in bounds).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SaturatingCounter(u8);
impl SaturatingCounter {
    pub const STRONGLY_NOT_TAKEN: Self = Self(0);
    pub const WEAKLY_NOT_TAKEN: Self = Self(1);
    pub const WEAKLY_TAKEN: Self = Self(2);
    pub const STRONGLY_TAKEN: Self = Self(3);

    pub fn predict_taken(&self) -> bool { self.0 >= 2 }

    pub fn update(&mut self, taken: bool) {
        self.0 = if taken { (self.0 + 1).min(3) } else { self.0.saturating_sub(1) };
    }
}

/// See the module documentation.
pub struct SimulatedMachine {
    cfg: SimConfig,
    resident: Residency,
    predictor: SaturatingCounter,
    rng: Option<StdRng>,
    counting: bool,
    mispredicts: u64,
    transient_loads: u64,
}

impl SimulatedMachine {
    pub fn config(&self) -> &SimConfig { &self.cfg }

    pub fn is_resident(&self, partition: u8) -> bool {
        self.resident[partition as usize]
    }

    pub fn resident_count(&self) -> usize { self.resident.count_ones() }

    pub fn predictor(&self) -> SaturatingCounter { self.predictor }

    /// Number of out-of-bounds accesses that ran on a mispredicted path.
    pub fn transient_loads(&self) -> u64 { self.transient_loads }

    fn touch(&mut self, value: u8) {
        self.resident.set(value as usize, true);
    }
}

impl Machine for SimulatedMachine {
    fn flush(&mut self, _probe: &ProbeArray, partition: u8) {
        self.resident.set(partition as usize, false);
    }

    fn fence(&mut self) {}

    fn leak(&mut self, victim: &VictimMemory, _probe: &ProbeArray, x: usize) {
        let in_bounds = x < victim.array_size();
        let predicted = self.predictor.predict_taken();
        if self.counting && predicted != in_bounds {
            self.mispredicts += 1;
        }

        if in_bounds {
            if self.cfg.visible_training_loads {
                if let Some(value) = victim.read(x) {
                    self.touch(value);
                }
            }
        } else if predicted {
            if let Some(value) = victim.transient_read(x) {
                self.touch(value);
                self.transient_loads += 1;
            }
        }

        self.predictor.update(in_bounds);
    }

    fn timed_read(&mut self, _probe: &ProbeArray, partition: u8) -> u64 {
        let resident = self.is_resident(partition);
        let false_hit = !resident && match (&mut self.rng, self.cfg.noise) {
            (Some(rng), Some(noise)) => rng.gen_bool(noise.probability),
            _ => false,
        };
        self.touch(partition);
        if resident || false_hit { self.cfg.hit_latency } else { self.cfg.miss_latency }
    }

    fn spin(&mut self, _spins: usize) {}

    fn start_mispredict_window(&mut self) { self.counting = true; }

    fn stop_mispredict_window(&mut self) { self.counting = false; }

    fn take_mispredicts(&mut self) -> Option<u64> {
        Some(std::mem::take(&mut self.mispredicts))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::probe::PartitionLayout;

    fn probe() -> ProbeArray {
        ProbeArray::new(PartitionLayout::new(64).unwrap()).unwrap()
    }

    #[test]
    fn saturating_counter() {
        let mut c = SaturatingCounter::WEAKLY_NOT_TAKEN;
        assert!(!c.predict_taken());
        c.update(true);
        assert_eq!(c, SaturatingCounter::WEAKLY_TAKEN);
        c.update(true);
        c.update(true);
        assert_eq!(c, SaturatingCounter::STRONGLY_TAKEN);
        c.update(false);
        assert!(c.predict_taken());
        c.update(false);
        c.update(false);
        c.update(false);
        assert_eq!(c, SaturatingCounter::STRONGLY_NOT_TAKEN);
    }

    #[test]
    fn invalid_configs() {
        let bad_latency = SimConfig::deterministic().hit_latency(300).emit();
        assert!(matches!(bad_latency, Err(Error::InvalidSimulation(_))));
        let bad_noise = SimConfig::deterministic().noise(1.5, 0).emit();
        assert!(matches!(bad_noise, Err(Error::InvalidSimulation(_))));
        let nan_noise = SimConfig::deterministic().noise(f64::NAN, 0).emit();
        assert!(matches!(nan_noise, Err(Error::InvalidSimulation(_))));
    }

    #[test]
    fn flush_and_reload() {
        let probe = probe();
        let mut m = SimConfig::deterministic().emit().unwrap();
        assert_eq!(m.timed_read(&probe, 7), SimConfig::DEFAULT_MISS_LATENCY);
        assert_eq!(m.timed_read(&probe, 7), SimConfig::DEFAULT_HIT_LATENCY);
        m.flush(&probe, 7);
        assert!(!m.is_resident(7));
        assert_eq!(m.timed_read(&probe, 7), SimConfig::DEFAULT_MISS_LATENCY);
    }

    #[test]
    fn trained_predictor_leaks() {
        let probe = probe();
        let victim = VictimMemory::new(&[1, 2, 3], b"Z");
        let mut m = SimConfig::deterministic().emit().unwrap();
        let malicious = victim.malicious_index(0);

        // Untrained: the out-of-bounds access is correctly predicted.
        m.leak(&victim, &probe, malicious);
        assert!(!m.is_resident(b'Z'));

        for x in [0, 1, 2] {
            m.leak(&victim, &probe, x);
        }
        assert!(m.predictor().predict_taken());
        assert_eq!(m.resident_count(), 0);

        m.leak(&victim, &probe, malicious);
        assert!(m.is_resident(b'Z'));
        assert_eq!(m.resident_count(), 1);
        assert_eq!(m.transient_loads(), 1);
    }

    #[test]
    fn visible_training_loads() {
        let probe = probe();
        let victim = VictimMemory::new(&[9, 8, 7], b"Z");
        let mut m = SimConfig::realistic().emit().unwrap();
        m.leak(&victim, &probe, 1);
        assert!(m.is_resident(8));
        m.leak(&victim, &probe, victim.malicious_index(0) + 100);
        assert_eq!(m.resident_count(), 1);
    }

    #[test]
    fn mispredicts_counted_in_window_only() {
        let probe = probe();
        let victim = VictimMemory::new(&[1, 2, 3], b"Z");
        let mut m = SimConfig::deterministic().emit().unwrap();
        // weakly not-taken -> in-bounds access mispredicts, outside the window
        m.leak(&victim, &probe, 0);
        assert_eq!(m.take_mispredicts(), Some(0));

        m.start_mispredict_window();
        m.leak(&victim, &probe, 0);
        m.leak(&victim, &probe, victim.malicious_index(0));
        m.stop_mispredict_window();
        m.leak(&victim, &probe, victim.malicious_index(0));
        assert_eq!(m.take_mispredicts(), Some(1));
        assert_eq!(m.take_mispredicts(), Some(0));
    }

    #[test]
    fn noise_is_reproducible() {
        let probe = probe();
        let run = || {
            let mut m = SimConfig::deterministic().noise(0.5, 1234).emit().unwrap();
            (0..=255u8).map(|p| {
                let lat = m.timed_read(&probe, p);
                m.flush(&probe, p);
                lat
            }).collect::<Vec<_>>()
        };
        let a = run();
        assert_eq!(a, run());
        assert!(a.contains(&SimConfig::DEFAULT_HIT_LATENCY));
        assert!(a.contains(&SimConfig::DEFAULT_MISS_LATENCY));
    }
}
