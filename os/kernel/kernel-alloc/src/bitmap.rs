//! # Allocation bitmap
//!
//! One bit per allocation unit over caller-provided storage: bit `i` lives in
//! byte `i / 8` at position `i % 8` (least significant bit first). A set bit
//! means the unit is in use.
//!
//! The bitmap never allocates. Its storage is a borrowed byte slice, which
//! may be a static array, a slice of boot memory, or bytes inside a heap
//! region, so the same type serves both the frame allocator and the heap.
//!
//! ```rust
//! use kernel_alloc::Bitmap;
//!
//! let mut storage = [0xAA_u8; 4];
//! let mut map = Bitmap::new(&mut storage, 4).unwrap();
//! assert_eq!(map.count_ones(), 0);
//!
//! assert_eq!(map.alloc(3), Ok(0));
//! assert_eq!(map.alloc(2), Ok(3));
//! map.clear_range(0, 3).unwrap();
//! assert_eq!(map.alloc(1), Ok(0));
//! ```

use crate::AllocError;

pub struct Bitmap<'a> {
    storage: &'a mut [u8],
    /// Storage length in bytes, as handed to the constructor.
    length: isize,
    /// Number of tracked bits, at most `length * 8`.
    units: usize,
}

impl<'a> Bitmap<'a> {
    /// Binds `length` bytes of `storage` and clears them, tracking every bit.
    ///
    /// # Errors
    /// [`AllocError::InvalidArgument`] if `length` is not positive or exceeds
    /// the storage.
    pub fn new(storage: &'a mut [u8], length: isize) -> Result<Self, AllocError> {
        let bytes = Self::checked_length(storage, length)?;
        Self::with_units(storage, length, bytes * 8)
    }

    /// Like [`Bitmap::new`], but tracks only the first `units` bits.
    ///
    /// The frame allocator uses this when memory is not a multiple of eight
    /// frames: the padding bits in the last byte are never handed out.
    ///
    /// # Errors
    /// [`AllocError::InvalidArgument`] if `length` is not positive, exceeds the
    /// storage, or `units` is zero or needs more than `length` bytes.
    pub fn with_units(
        storage: &'a mut [u8],
        length: isize,
        units: usize,
    ) -> Result<Self, AllocError> {
        let bytes = Self::checked_length(storage, length)?;
        if units == 0 || units.div_ceil(8) > bytes {
            return Err(AllocError::InvalidArgument("bitmap units do not fit its storage"));
        }

        let storage = &mut storage[..bytes];
        storage.fill(0);
        Ok(Self {
            storage,
            length,
            units,
        })
    }

    /// Binds storage that already holds a bitmap, keeping its contents.
    ///
    /// # Errors
    /// [`AllocError::InvalidArgument`] if `units` is zero or does not fit.
    pub fn attach(storage: &'a mut [u8], units: usize) -> Result<Self, AllocError> {
        let bytes = units.div_ceil(8);
        if units == 0 || bytes > storage.len() {
            return Err(AllocError::InvalidArgument("bitmap units do not fit its storage"));
        }
        let length = isize::try_from(bytes)
            .map_err(|_| AllocError::InvalidArgument("bitmap length overflows isize"))?;
        Ok(Self {
            storage: &mut storage[..bytes],
            length,
            units,
        })
    }

    fn checked_length(storage: &[u8], length: isize) -> Result<usize, AllocError> {
        match usize::try_from(length) {
            Ok(0) | Err(_) => Err(AllocError::InvalidArgument("bitmap length must be positive")),
            Ok(bytes) if bytes > storage.len() => {
                Err(AllocError::InvalidArgument("bitmap length exceeds its storage"))
            }
            Ok(bytes) => Ok(bytes),
        }
    }

    #[must_use]
    pub const fn length(&self) -> isize {
        self.length
    }

    #[must_use]
    pub const fn units(&self) -> usize {
        self.units
    }

    /// # Errors
    /// [`AllocError::OutOfRange`] if `index` is not a tracked unit.
    pub fn test(&self, index: usize) -> Result<bool, AllocError> {
        self.check_index(index)?;
        Ok(self.bit(index))
    }

    /// # Errors
    /// [`AllocError::OutOfRange`] if `index` is not a tracked unit.
    pub fn set(&mut self, index: usize, value: bool) -> Result<(), AllocError> {
        self.check_index(index)?;
        self.put(index, value);
        Ok(())
    }

    /// Sets or clears `count` bits starting at `start`.
    ///
    /// # Errors
    /// [`AllocError::OutOfRange`] if the range leaves the bitmap; nothing is
    /// written in that case.
    pub fn set_range(&mut self, start: usize, count: usize, value: bool) -> Result<(), AllocError> {
        let end = self.check_range(start, count)?;
        let fill = if value { 0xFF } else { 0x00 };

        let mut i = start;
        while i < end {
            if i % 8 == 0 && end - i >= 8 {
                self.storage[i / 8] = fill;
                i += 8;
            } else {
                self.put(i, value);
                i += 1;
            }
        }
        Ok(())
    }

    /// Clears `count` bits starting at `start`.
    ///
    /// # Errors
    /// See [`Bitmap::set_range`].
    pub fn clear_range(&mut self, start: usize, count: usize) -> Result<(), AllocError> {
        self.set_range(start, count, false)
    }

    /// Whether every bit of the range is set.
    ///
    /// # Errors
    /// [`AllocError::OutOfRange`] if the range leaves the bitmap.
    pub fn is_range_set(&self, start: usize, count: usize) -> Result<bool, AllocError> {
        let end = self.check_range(start, count)?;
        Ok((start..end).all(|i| self.bit(i)))
    }

    /// Finds the lowest run of `count` clear bits, sets it and returns its
    /// first index.
    ///
    /// # Errors
    /// * [`AllocError::InvalidArgument`] for `count == 0`.
    /// * [`AllocError::OutOfMemory`] if no such run exists; the bitmap is
    ///   left untouched.
    pub fn alloc(&mut self, count: usize) -> Result<usize, AllocError> {
        self.alloc_aligned(count, 1)
    }

    /// Like [`Bitmap::alloc`], but the run must start at a multiple of `align`.
    ///
    /// # Errors
    /// As [`Bitmap::alloc`], plus [`AllocError::InvalidArgument`] if `align`
    /// is not a power of two.
    pub fn alloc_aligned(&mut self, count: usize, align: usize) -> Result<usize, AllocError> {
        if count == 0 {
            return Err(AllocError::InvalidArgument("zero-length allocation"));
        }
        if !align.is_power_of_two() {
            return Err(AllocError::InvalidArgument("alignment must be a power of two"));
        }
        if count > self.units {
            return Err(AllocError::OutOfMemory);
        }

        let mut start = self.first_clear_from(0);
        while let Some(candidate) = start {
            let candidate = candidate.next_multiple_of(align);
            if candidate > self.units - count {
                break;
            }
            match self.last_set_in(candidate, candidate + count) {
                None => {
                    self.set_range(candidate, count, true)?;
                    return Ok(candidate);
                }
                // No window starting at or before `busy` can be free.
                Some(busy) => start = self.first_clear_from(busy + 1),
            }
        }
        Err(AllocError::OutOfMemory)
    }

    #[must_use]
    pub fn count_ones(&self) -> usize {
        let full = self.units / 8;
        let mut ones: usize = self.storage[..full]
            .iter()
            .map(|b| b.count_ones() as usize)
            .sum();
        let tail = self.units % 8;
        if tail != 0 {
            let mask = (1_u8 << tail) - 1;
            ones += (self.storage[full] & mask).count_ones() as usize;
        }
        ones
    }

    #[must_use]
    pub fn count_zeros(&self) -> usize {
        self.units - self.count_ones()
    }

    fn check_index(&self, index: usize) -> Result<(), AllocError> {
        if index < self.units {
            Ok(())
        } else {
            Err(AllocError::OutOfRange {
                index,
                units: self.units,
            })
        }
    }

    fn check_range(&self, start: usize, count: usize) -> Result<usize, AllocError> {
        match start.checked_add(count) {
            Some(end) if end <= self.units => Ok(end),
            _ => Err(AllocError::OutOfRange {
                index: start.saturating_add(count).saturating_sub(1),
                units: self.units,
            }),
        }
    }

    #[inline]
    fn bit(&self, index: usize) -> bool {
        self.storage[index / 8] & (1 << (index % 8)) != 0
    }

    #[inline]
    fn put(&mut self, index: usize, value: bool) {
        let mask = 1_u8 << (index % 8);
        if value {
            self.storage[index / 8] |= mask;
        } else {
            self.storage[index / 8] &= !mask;
        }
    }

    /// Index of the first clear bit at or after `from`, skipping full bytes.
    fn first_clear_from(&self, from: usize) -> Option<usize> {
        let mut i = from;
        while i < self.units {
            if i % 8 == 0 && self.storage[i / 8] == 0xFF {
                i += 8;
                continue;
            }
            if !self.bit(i) {
                return Some(i);
            }
            i += 1;
        }
        None
    }

    /// Index of the last set bit in `start..end`, skipping empty bytes.
    fn last_set_in(&self, start: usize, end: usize) -> Option<usize> {
        let mut i = end;
        while i > start {
            if i % 8 == 0 && i - start >= 8 && self.storage[i / 8 - 1] == 0 {
                i -= 8;
                continue;
            }
            i -= 1;
            if self.bit(i) {
                return Some(i);
            }
        }
        None
    }
}

impl core::fmt::Debug for Bitmap<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Bitmap")
            .field("length", &self.length)
            .field("units", &self.units)
            .field("used", &self.count_ones())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_lengths() {
        let mut storage = [0_u8; 4];
        assert!(matches!(
            Bitmap::new(&mut storage, 0),
            Err(AllocError::InvalidArgument(_))
        ));
        assert!(matches!(
            Bitmap::new(&mut storage, -1),
            Err(AllocError::InvalidArgument(_))
        ));
        assert!(matches!(
            Bitmap::new(&mut storage, 5),
            Err(AllocError::InvalidArgument(_))
        ));
        assert!(matches!(
            Bitmap::with_units(&mut storage, 1, 9),
            Err(AllocError::InvalidArgument(_))
        ));
    }

    #[test]
    fn new_clears_and_attach_keeps() {
        let mut storage = [0xFF_u8; 2];
        {
            let map = Bitmap::new(&mut storage, 2).unwrap();
            assert_eq!(map.units(), 16);
            assert_eq!(map.count_zeros(), 16);
        }
        storage[1] = 0b0000_0101;
        let map = Bitmap::attach(&mut storage, 16).unwrap();
        assert_eq!(map.count_ones(), 2);
        assert_eq!(map.test(8), Ok(true));
        assert_eq!(map.test(9), Ok(false));
    }

    #[test]
    fn bit_order_is_lsb_first() {
        let mut storage = [0_u8; 2];
        let mut map = Bitmap::new(&mut storage, 2).unwrap();
        map.set(0, true).unwrap();
        map.set(9, true).unwrap();
        drop(map);
        assert_eq!(storage, [0b0000_0001, 0b0000_0010]);
    }

    #[test]
    fn out_of_range_access_is_reported() {
        let mut storage = [0_u8; 1];
        let mut map = Bitmap::with_units(&mut storage, 1, 5).unwrap();
        assert_eq!(map.test(5), Err(AllocError::OutOfRange { index: 5, units: 5 }));
        assert_eq!(
            map.set(7, true),
            Err(AllocError::OutOfRange { index: 7, units: 5 })
        );
        assert!(map.set_range(3, 3, true).is_err());
        assert_eq!(map.count_ones(), 0);
    }

    #[test]
    fn first_fit_takes_the_lowest_hole() {
        let mut storage = [0_u8; 4];
        let mut map = Bitmap::new(&mut storage, 4).unwrap();
        assert_eq!(map.alloc(4), Ok(0));
        assert_eq!(map.alloc(4), Ok(4));
        assert_eq!(map.alloc(4), Ok(8));
        map.clear_range(4, 4).unwrap();

        // Too big for the hole at 4, lands after the last run.
        assert_eq!(map.alloc(5), Ok(12));
        // Fits the hole exactly.
        assert_eq!(map.alloc(4), Ok(4));
    }

    #[test]
    fn runs_cross_byte_boundaries() {
        let mut storage = [0_u8; 3];
        let mut map = Bitmap::new(&mut storage, 3).unwrap();
        map.set(0, true).unwrap();
        assert_eq!(map.alloc(12), Ok(1));
        assert!(map.is_range_set(1, 12).unwrap());
        assert_eq!(map.test(13), Ok(false));
        assert_eq!(map.count_ones(), 13);
    }

    #[test]
    fn full_bytes_are_skipped() {
        let mut storage = [0xFF_u8, 0xFF, 0b1111_0111, 0];
        let mut map = Bitmap::attach(&mut storage, 32).unwrap();
        assert_eq!(map.alloc(1), Ok(19));
        assert_eq!(map.alloc(8), Ok(24));
        assert_eq!(map.alloc(1), Err(AllocError::OutOfMemory));
    }

    #[test]
    fn aligned_runs_start_on_multiples() {
        let mut storage = [0_u8; 4];
        let mut map = Bitmap::new(&mut storage, 4).unwrap();
        map.set(0, true).unwrap();
        assert_eq!(map.alloc_aligned(2, 8), Ok(8));
        assert_eq!(map.alloc_aligned(1, 4), Ok(4));
        assert_eq!(map.alloc_aligned(1, 1), Ok(1));
        assert!(matches!(
            map.alloc_aligned(1, 3),
            Err(AllocError::InvalidArgument(_))
        ));
    }

    #[test]
    fn failed_alloc_leaves_map_untouched() {
        let mut storage = [0_u8; 1];
        let mut map = Bitmap::with_units(&mut storage, 1, 6).unwrap();
        map.set(2, true).unwrap();
        assert_eq!(map.alloc(4), Err(AllocError::OutOfMemory));
        assert_eq!(map.alloc(7), Err(AllocError::OutOfMemory));
        assert!(matches!(map.alloc(0), Err(AllocError::InvalidArgument(_))));
        assert_eq!(map.count_ones(), 1);
        assert_eq!(map.alloc(3), Ok(3));
    }

    #[test]
    fn padding_bits_are_never_counted_or_handed_out() {
        let mut storage = [0_u8; 1];
        let mut map = Bitmap::with_units(&mut storage, 1, 3).unwrap();
        assert_eq!(map.alloc(3), Ok(0));
        assert_eq!(map.count_zeros(), 0);
        assert_eq!(map.alloc(1), Err(AllocError::OutOfMemory));
    }
}
