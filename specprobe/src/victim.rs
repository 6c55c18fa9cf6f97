//! Victim memory: a bounded public buffer with a secret placed after it.

/// The bound lives on its own cache line so it can be evicted without
/// disturbing the buffer it guards.
#[repr(C, align(64))]
#[derive(Debug)]
struct BoundCell {
    value: usize,
}

/// A contiguous arena laid out as `[ public | guard | secret ]`.
///
/// Only `public` is architecturally reachable through [`VictimMemory::read`].
/// The secret sits at a known distance from the start of the arena, so an
/// out-of-bounds index `secret_base() + k` aliases secret byte `k`.
#[derive(Debug)]
pub struct VictimMemory {
    bound: Box<BoundCell>,
    data: Box<[u8]>,
    secret_base: usize,
}

impl VictimMemory {
    /// Default length of the zero-filled gap between the public buffer and
    /// the secret.
    pub const DEFAULT_GUARD_LEN: usize = 64;

    pub fn new(public: &[u8], secret: &[u8]) -> Self {
        Self::with_guard(public, secret, Self::DEFAULT_GUARD_LEN)
    }

    pub fn with_guard(public: &[u8], secret: &[u8], guard_len: usize) -> Self {
        let secret_base = public.len() + guard_len;
        let mut data = Vec::with_capacity(secret_base + secret.len());
        data.extend_from_slice(public);
        data.resize(secret_base, 0);
        data.extend_from_slice(secret);
        Self {
            bound: Box::new(BoundCell { value: public.len() }),
            data: data.into_boxed_slice(),
            secret_base,
        }
    }

    /// The bound checked by the leak primitive.
    pub fn array_size(&self) -> usize { self.bound.value }

    pub fn bound_ptr(&self) -> *const usize { &self.bound.value }

    pub fn data_ptr(&self) -> *const u8 { self.data.as_ptr() }

    pub fn public(&self) -> &[u8] { &self.data[..self.array_size()] }

    pub fn secret(&self) -> &[u8] { &self.data[self.secret_base..] }

    pub fn secret_base(&self) -> usize { self.secret_base }

    /// The index that aliases secret byte `offset`.
    pub fn malicious_index(&self, offset: usize) -> usize {
        self.secret_base.wrapping_add(offset)
    }

    /// Bounds-checked read. Indices at or beyond the bound return `None`.
    pub fn read(&self, x: usize) -> Option<u8> {
        if x < self.array_size() { Some(self.data[x]) } else { None }
    }

    /// The byte a squashed access at `x` would have loaded, ignoring the
    /// bound. `None` when `x` falls outside the arena entirely.
    pub fn transient_read(&self, x: usize) -> Option<u8> {
        self.data.get(x).copied()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn layout() {
        let v = VictimMemory::with_guard(&[1, 2, 3], b"abc", 8);
        assert_eq!(v.array_size(), 3);
        assert_eq!(v.secret_base(), 11);
        assert_eq!(v.public(), &[1, 2, 3]);
        assert_eq!(v.secret(), b"abc");
        assert_eq!(v.malicious_index(2), 13);
        assert_eq!(v.transient_read(v.malicious_index(1)), Some(b'b'));
        assert_eq!(v.transient_read(3), Some(0));
        assert_eq!(v.transient_read(14), None);
    }

    #[test]
    fn read_stops_at_bound() {
        let v = VictimMemory::new(&[1, 2, 3, 4], b"secret");
        for x in 0..4 {
            assert_eq!(v.read(x), Some(x as u8 + 1));
        }
        for x in 4..v.secret_base() + 16 {
            assert_eq!(v.read(x), None);
        }
        assert_eq!(v.read(usize::MAX), None);
    }

    #[test]
    fn bound_is_line_aligned() {
        let v = VictimMemory::new(&[0; 16], b"x");
        assert_eq!(v.bound_ptr() as usize % 64, 0);
        assert_eq!(unsafe { *v.bound_ptr() }, 16);
    }
}
