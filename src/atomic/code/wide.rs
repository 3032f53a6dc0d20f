//! 128-bit words: two adjacent 64-bit words updated as one unit by a
//! double-width compare-and-swap. Swap, read and add are retry loops
//! around that CAS.

use super::{FamWord, Width};
use std::cell::UnsafeCell;
use std::fmt;

#[cfg(target_arch = "x86_64")]
use super::x86_64_asm::cas128;

#[cfg(target_arch = "aarch64")]
use super::aarch64_asm::cas128;

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
use super::fallback::cas128;

/// 16-byte aligned storage for a 128-bit fam atomic.
#[repr(C, align(16))]
pub struct Atomic128 {
    value: UnsafeCell<u128>,
}

// SAFETY: every access after construction goes through `cas128`.
unsafe impl Sync for Atomic128 {}
unsafe impl Send for Atomic128 {}

impl Atomic128 {
    pub const fn new(value: u128) -> Self {
        Self {
            value: UnsafeCell::new(value),
        }
    }

    /// The two 64-bit halves, low word first, as they sit in memory on a
    /// little-endian machine.
    pub fn split(value: u128) -> [u64; 2] {
        [value as u64, (value >> 64) as u64]
    }

    pub fn join(words: [u64; 2]) -> u128 {
        (words[0] as u128) | ((words[1] as u128) << 64)
    }

    #[inline]
    fn cas(&self, expected: u128, new: u128) -> u128 {
        // SAFETY: `value` is 16-byte aligned and valid for the lifetime of
        // `self`; all concurrent accesses are double-width CAS as well.
        unsafe { cas128(self.value.get(), expected, new) }
    }
}

impl fmt::Debug for Atomic128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Atomic128").field(&u128::read(self)).finish()
    }
}

impl FamWord for u128 {
    type Storage = Atomic128;

    const WIDTH: Width = Width::W128;

    fn new_storage(value: Self) -> Self::Storage {
        Atomic128::new(value)
    }

    fn into_value(storage: Self::Storage) -> Self {
        storage.value.into_inner()
    }

    #[inline]
    fn wrapping_add(self, rhs: Self) -> Self {
        u128::wrapping_add(self, rhs)
    }

    fn fetch_add(cell: &Self::Storage, inc: Self) -> Self {
        cas_until_stored(cell, |prev| prev.wrapping_add(inc))
    }

    fn swap(cell: &Self::Storage, value: Self) -> Self {
        cas_until_stored(cell, |_| value)
    }

    #[inline]
    fn compare_store(cell: &Self::Storage, expected: Self, new: Self) -> Self {
        cell.cas(expected, new)
    }

    /// Writes back whatever it read; done once the write-back lands
    /// without a concurrent change in between.
    fn read(cell: &Self::Storage) -> Self {
        cas_until_stored(cell, |prev| prev)
    }
}

fn cas_until_stored(cell: &Atomic128, update: impl Fn(u128) -> u128) -> u128 {
    let mut prev = 0;
    loop {
        let actual = cell.cas(prev, update(prev));
        if actual == prev {
            return prev;
        }
        prev = actual;
    }
}
