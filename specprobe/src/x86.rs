//! The measurement pipeline on real x86_64 hardware.

pub mod gadget;

use core::arch::x86_64::{ __rdtscp, _mm_clflush, _mm_lfence, _mm_mfence };
use std::hint::black_box;

use log::warn;

use crate::error::Result;
use crate::events::MispredictCounter;
use crate::machine::Machine;
use crate::probe::{PartitionLayout, ProbeArray};
use crate::victim::VictimMemory;

pub use gadget::*;

/// A [`Machine`] backed by the cache hierarchy, timestamp counter and
/// branch predictor of the current core.
pub struct HardwareMachine {
    gadget: LeakGadget,
    counter: Option<MispredictCounter>,
}

impl HardwareMachine {
    /// Emit a leak gadget for `layout`. When `evict_bound` is set, the
    /// gadget flushes the bound before comparing against it.
    pub fn new(layout: PartitionLayout, evict_bound: bool) -> Result<Self> {
        Ok(Self {
            gadget: LeakGadget::emit(layout, evict_bound)?,
            counter: None,
        })
    }

    /// Count mispredicted branches during each training window.
    pub fn with_mispredict_counter(mut self, counter: MispredictCounter) -> Self {
        self.counter = Some(counter);
        self
    }

    pub fn gadget(&self) -> &LeakGadget { &self.gadget }
}

impl Machine for HardwareMachine {
    fn layout(&self) -> Option<PartitionLayout> { Some(self.gadget.layout()) }

    fn evicts_bound(&self) -> Option<bool> { Some(self.gadget.evicts_bound()) }

    fn flush(&mut self, probe: &ProbeArray, partition: u8) {
        unsafe { _mm_clflush(probe.partition_ptr(partition)) }
    }

    fn fence(&mut self) {
        unsafe { _mm_mfence() }
    }

    fn leak(&mut self, victim: &VictimMemory, probe: &ProbeArray, x: usize) {
        black_box(self.gadget.call(victim, probe, x));
    }

    fn timed_read(&mut self, probe: &ProbeArray, partition: u8) -> u64 {
        let ptr = probe.partition_ptr(partition);
        let mut aux = 0u32;
        unsafe {
            let start = __rdtscp(&mut aux);
            _mm_lfence();
            let val = std::ptr::read_volatile(ptr);
            let end = __rdtscp(&mut aux);
            _mm_lfence();
            black_box(val);
            end.wrapping_sub(start)
        }
    }

    fn start_mispredict_window(&mut self) {
        if let Some(ctr) = self.counter.as_mut() {
            if let Err(e) = ctr.enable() {
                warn!("couldn't enable {}: {}", ctr.event().name(), e);
            }
        }
    }

    fn stop_mispredict_window(&mut self) {
        if let Some(ctr) = self.counter.as_mut() {
            if let Err(e) = ctr.disable() {
                warn!("couldn't disable {}: {}", ctr.event().name(), e);
            }
        }
    }

    fn take_mispredicts(&mut self) -> Option<u64> {
        let ctr = self.counter.as_mut()?;
        match ctr.take() {
            Ok(count) => Some(count),
            Err(e) => {
                warn!("couldn't read {}: {}", ctr.event().name(), e);
                None
            },
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn timed_read_pulls_line_in() {
        let probe = ProbeArray::new(PartitionLayout::default()).unwrap();
        let mut m = HardwareMachine::new(probe.layout(), true).unwrap();
        m.flush(&probe, 0x33);
        m.fence();
        m.timed_read(&probe, 0x33);
        // Only the architectural effect is checked here; the latency itself
        // depends on the host.
        assert_eq!(probe.partition(0x33)[0], 1);
        assert_eq!(m.take_mispredicts(), None);
    }

    #[test]
    fn session_rejects_layout_mismatch() {
        use crate::session::SessionConfig;
        use crate::error::Error;

        let probe = ProbeArray::new(PartitionLayout::new(0x200).unwrap()).unwrap();
        let victim = VictimMemory::new(&[1, 2, 3], b"x");
        let m = HardwareMachine::new(PartitionLayout::default(), true).unwrap();
        assert!(matches!(
            SessionConfig::new().emit(m, &probe, &victim),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn session_rejects_bound_eviction_mismatch() {
        use crate::session::SessionConfig;
        use crate::error::Error;

        let probe = ProbeArray::new(PartitionLayout::default()).unwrap();
        let victim = VictimMemory::new(&[1, 2, 3], b"x");
        for evict in [true, false] {
            let m = HardwareMachine::new(probe.layout(), evict).unwrap();
            assert!(matches!(
                SessionConfig::new().evict_bound(!evict).emit(m, &probe, &victim),
                Err(Error::InvalidConfig(_))
            ));
            let m = HardwareMachine::new(probe.layout(), evict).unwrap();
            let s = SessionConfig::new().evict_bound(evict).emit(m, &probe, &victim).unwrap();
            assert_eq!(s.machine().gadget().evicts_bound(), s.config().evict_bound);
        }
    }
}
