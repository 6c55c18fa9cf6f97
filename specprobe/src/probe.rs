//! The probe array: 256 equally-spaced partitions, one per byte value.
//!
//! Nothing ever reads the *contents* of the probe array in a meaningful way.
//! It only exists so that the cache state of partition `n` can stand for the
//! byte value `n`.

use memmap2::MmapMut;

use crate::error::{Error, Result};
use crate::util::Align;

/// Number of partitions (one per possible byte value).
pub const NUM_PARTITIONS: usize = 256;

pub const CACHE_LINE_SIZE: usize = 64;

/// Default distance between partitions (one 4KiB page).
pub const DEFAULT_PARTITION_SIZE: usize = 0x1000;

/// Written over the whole array at construction so that every page is
/// backed by its own frame instead of the shared zero page.
const FILLER: u8 = 0x01;

/// Size and spacing of probe partitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartitionLayout {
    align: Align,
}
impl PartitionLayout {
    /// Partition sizes must be a power of two and no smaller than a cache
    /// line, so that two partitions never share a line. All 256 partitions
    /// together must still fit in the address space.
    pub fn new(size: usize) -> Result<Self> {
        match Align::new(size) {
            Some(align) if size >= CACHE_LINE_SIZE
                && size.checked_mul(NUM_PARTITIONS).is_some() => Ok(Self { align }),
            _ => Err(Error::InvalidPartitionSize(size)),
        }
    }

    pub fn size(&self) -> usize { self.align.value() }

    /// log2 of the partition size.
    pub fn shift(&self) -> u32 { self.align.shift() }

    /// Offset of a partition from the base of the array.
    pub fn offset(&self, partition: u8) -> usize {
        (partition as usize) << self.shift()
    }

    /// Total length of the array in bytes.
    pub fn len(&self) -> usize { NUM_PARTITIONS * self.size() }
}
impl Default for PartitionLayout {
    fn default() -> Self {
        Self { align: Align::from_value(DEFAULT_PARTITION_SIZE) }
    }
}

/// An anonymous mapping divided into [`NUM_PARTITIONS`] partitions.
///
/// The mapping is never moved or resized, so partition addresses are stable
/// for as long as the array lives.
#[derive(Debug)]
pub struct ProbeArray {
    map: MmapMut,
    layout: PartitionLayout,
}
impl ProbeArray {
    pub fn new(layout: PartitionLayout) -> Result<Self> {
        let mut map = MmapMut::map_anon(layout.len())?;
        map.fill(FILLER);
        Ok(Self { map, layout })
    }

    pub fn layout(&self) -> PartitionLayout { self.layout }

    pub fn base_ptr(&self) -> *const u8 { self.map.as_ptr() }

    /// Address of the first byte in a partition.
    pub fn partition_ptr(&self, partition: u8) -> *const u8 {
        &self.map[self.layout.offset(partition)] as *const u8
    }

    pub fn partition(&self, partition: u8) -> &[u8] {
        let start = self.layout.offset(partition);
        &self.map[start..start + self.layout.size()]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn layout_rejects_bad_sizes() {
        for size in [0, 1, 32, 48, 100, 0x1800, 1 << 56, 1 << 63] {
            assert!(matches!(
                PartitionLayout::new(size),
                Err(Error::InvalidPartitionSize(s)) if s == size
            ));
        }
        assert_eq!(PartitionLayout::new(64).unwrap().shift(), 6);
        assert_eq!(PartitionLayout::new(1 << 55).unwrap().len(), 1 << 63);
        assert_eq!(PartitionLayout::default().size(), DEFAULT_PARTITION_SIZE);
    }

    #[test]
    fn layout_offsets() {
        let layout = PartitionLayout::new(0x200).unwrap();
        assert_eq!(layout.offset(0), 0);
        assert_eq!(layout.offset(1), 0x200);
        assert_eq!(layout.offset(255), 255 * 0x200);
        assert_eq!(layout.len(), 256 * 0x200);
    }

    #[test]
    fn probe_array_is_filled_and_strided() {
        let probe = ProbeArray::new(PartitionLayout::default()).unwrap();
        let base = probe.base_ptr() as usize;
        assert_eq!(base % CACHE_LINE_SIZE, 0);
        for p in 0..=255u8 {
            let ptr = probe.partition_ptr(p) as usize;
            assert_eq!(ptr - base, p as usize * DEFAULT_PARTITION_SIZE);
            assert!(probe.partition(p).iter().all(|b| *b == FILLER));
        }
    }
}
