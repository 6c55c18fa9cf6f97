//! The boundary between the measurement pipeline and the machine it runs on.
//!
//! Everything above this trait (training, receiving, voting) is plain
//! deterministic code. Everything below it is either real hardware
//! ([`crate::x86::HardwareMachine`]) or a model of it
//! ([`crate::sim::SimulatedMachine`]).

use crate::probe::{PartitionLayout, ProbeArray};
use crate::victim::VictimMemory;

/// The cache, timer and branch predictor shared by the sender and receiver.
pub trait Machine {
    /// The partition layout this machine was built for, if it depends on one.
    fn layout(&self) -> Option<PartitionLayout> { None }

    /// Whether the leak primitive evicts the bound before every check, if
    /// this machine decides that for itself.
    fn evicts_bound(&self) -> Option<bool> { None }

    /// Evict one probe partition from every level of the cache hierarchy.
    fn flush(&mut self, probe: &ProbeArray, partition: u8);

    /// Wait until all outstanding evictions and loads have completed.
    fn fence(&mut self);

    /// Run the bounds-checked access `if x < bound { probe[data[x]] }`.
    ///
    /// Architecturally this never reads past the bound. A mispredicted
    /// bounds check may still leave the partition for an out-of-bounds byte
    /// in the cache.
    fn leak(&mut self, victim: &VictimMemory, probe: &ProbeArray, x: usize);

    /// Time a single one-byte read from `partition`, in cycles.
    ///
    /// The read itself brings the partition into the cache.
    fn timed_read(&mut self, probe: &ProbeArray, partition: u8) -> u64;

    /// Busy-wait for `spins` iterations.
    fn spin(&mut self, spins: usize) {
        for i in 0..spins {
            std::hint::black_box(i);
        }
    }

    /// Start counting mispredicted branches.
    fn start_mispredict_window(&mut self) {}

    /// Stop counting mispredicted branches.
    fn stop_mispredict_window(&mut self) {}

    /// Return (and reset) the number of mispredicted branches counted so
    /// far, or `None` if this machine cannot count them.
    fn take_mispredicts(&mut self) -> Option<u64> { None }
}
