//! Performance counter events used to watch the branch predictor.

use perf_event::{ Builder, Counter };
use perf_event::events::*;

use crate::error::{Error, Result};

/// The platform whose event encodings should be used.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum TargetPlatform {
    Zen2,
    Zen3,
    Tremont,
}

/// Representation of an event used for formatting output, and for passing
/// the actual values to `perf` APIs.
#[derive(Clone, Copy, Debug, PartialOrd, Ord, PartialEq, Eq)]
pub struct EventDesc {
    id: u16,
    mask: u8,
    name: &'static str,
}
impl EventDesc {
    pub const fn new(id: u16, mask: u8, name: &'static str) -> Self {
        Self { id, mask, name }
    }
    pub fn name(&self) -> &str { self.name }
    pub fn id(&self) -> u16 { self.id }
    pub fn mask(&self) -> u8 { self.mask }
}

impl TargetPlatform {
    /// The event counting retired mispredicted branches.
    pub fn mispredict_event(&self) -> EventDesc {
        match self {
            // PPR for 17h/19h: "Retired Branch Instructions Mispredicted"
            Self::Zen2 |
            Self::Zen3 => EventDesc::new(0x0c3, 0x00, "ExRetBrnMisp"),
            Self::Tremont => EventDesc::new(0x0c5, 0x00, "BR_MISP_RETIRED.ALL_BRANCHES"),
        }
    }

    /// Generate the config bits for a raw perf event on this platform.
    ///
    /// NOTE: The event select MSRs are different between Intel and AMD,
    /// so the bits passed through a raw 'perf' event will be different.
    pub fn perf_cfg(&self, event: &EventDesc) -> u64 {
        match self {
            Self::Zen2 |
            Self::Zen3 => make_perf_cfg_amd(event.id(), event.mask()),
            Self::Tremont => make_perf_cfg_intel(event.id() as u8, event.mask()),
        }
    }
}

/// Generate the config bits for the raw perf_event (Intel).
pub fn make_perf_cfg_intel(event: u8, mask: u8) -> u64 {
    let event_num = event as u64;
    let mask_num = mask as u64;
    (mask_num << 8) | event_num
}

/// Generate the config bits for the raw perf_event (AMD).
pub fn make_perf_cfg_amd(event: u16, mask: u8) -> u64 {
    let event_num = event as u64 & 0b1111_1111_1111;
    let event_lo  = event_num & 0b0000_1111_1111;
    let event_hi  = (event_num & 0b1111_0000_0000) >> 8;
    let mask_num  = mask as u64;
    (event_hi << 32) | (mask_num << 8) | event_lo
}

/// A counter for retired mispredicted branches on the current thread.
pub struct MispredictCounter {
    ctr: Counter,
    event: EventDesc,
}
impl MispredictCounter {
    pub fn new(platform: TargetPlatform) -> Result<Self> {
        let event = platform.mispredict_event();
        let cfg = platform.perf_cfg(&event);
        let mut ctr = Builder::new()
            .kind(Event::Raw(cfg))
            .build()
            .map_err(|e| Error::Counter(event.name().to_string(), e))?;
        ctr.reset().map_err(|e| Error::Counter(event.name().to_string(), e))?;
        Ok(Self { ctr, event })
    }

    pub fn event(&self) -> &EventDesc { &self.event }

    pub fn enable(&mut self) -> std::io::Result<()> { self.ctr.enable() }

    pub fn disable(&mut self) -> std::io::Result<()> { self.ctr.disable() }

    /// Read the accumulated count and reset it to zero.
    pub fn take(&mut self) -> std::io::Result<u64> {
        let count = self.ctr.read()?;
        self.ctr.reset()?;
        Ok(count)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn perf_cfg_encoding() {
        assert_eq!(make_perf_cfg_amd(0x0c3, 0x00), 0xc3);
        assert_eq!(make_perf_cfg_amd(0x1c3, 0x04), 0x1_0000_04c3);
        assert_eq!(make_perf_cfg_intel(0xc5, 0x01), 0x01c5);
    }

    #[test]
    fn mispredict_events() {
        let zen = TargetPlatform::Zen3.mispredict_event();
        assert_eq!((zen.id(), zen.mask()), (0xc3, 0x00));
        assert_eq!(TargetPlatform::Zen2.perf_cfg(&zen), 0xc3);
        let tremont = TargetPlatform::Tremont.mispredict_event();
        assert_eq!(TargetPlatform::Tremont.perf_cfg(&tremont), 0xc5);
    }
}
