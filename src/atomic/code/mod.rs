//! Hardware atomic primitives, one generic surface over 32, 64 and 128 bits.
//!
//! Nothing in here knows about latency. Every operation returns the value
//! observed before it took effect and loops until hardware arbitration lets
//! it through (lock-free, not wait-free).

mod native;
mod wide;

#[cfg(target_arch = "x86_64")]
mod x86_64_asm;

#[cfg(target_arch = "aarch64")]
mod aarch64_asm;

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
mod fallback;

pub use wide::Atomic128;

use std::fmt::Debug;
use std::ops::{BitAnd, BitOr, BitXor};

/// Operand width of an atomic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Width {
    W32,
    W64,
    W128,
}

impl Width {
    pub const fn bits(self) -> u32 {
        match self {
            Width::W32 => 32,
            Width::W64 => 64,
            Width::W128 => 128,
        }
    }

    pub const fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            32 => Some(Width::W32),
            64 => Some(Width::W64),
            128 => Some(Width::W128),
            _ => None,
        }
    }
}

/// A fixed-width value that can live in fam and be operated on atomically.
///
/// Implemented for `u32`, `u64` and `u128`.
pub trait FamWord:
    Copy
    + Eq
    + Default
    + Debug
    + Send
    + Sync
    + 'static
    + BitAnd<Output = Self>
    + BitOr<Output = Self>
    + BitXor<Output = Self>
{
    /// In-memory representation, layout-compatible with `Self`.
    type Storage: Send + Sync;

    const WIDTH: Width;

    fn new_storage(value: Self) -> Self::Storage;

    fn into_value(storage: Self::Storage) -> Self;

    fn wrapping_add(self, rhs: Self) -> Self;

    /// Atomic add, returning the previous value.
    fn fetch_add(cell: &Self::Storage, inc: Self) -> Self;

    /// Atomic exchange, returning the previous value.
    fn swap(cell: &Self::Storage, value: Self) -> Self;

    /// Compare-and-swap. Returns the value observed at `cell` whether or not
    /// the store happened; the store happened iff that equals `expected`.
    fn compare_store(cell: &Self::Storage, expected: Self, new: Self) -> Self;

    /// Atomic read. The medium has no plain atomic load, so this is a
    /// read-modify-write that leaves the value unchanged.
    fn read(cell: &Self::Storage) -> Self;

    fn write(cell: &Self::Storage, value: Self) {
        let _ = Self::swap(cell, value);
    }

    fn fetch_and(cell: &Self::Storage, arg: Self) -> Self {
        cas_retry(|expected, new| Self::compare_store(cell, expected, new), |prev| prev & arg)
    }

    fn fetch_or(cell: &Self::Storage, arg: Self) -> Self {
        cas_retry(|expected, new| Self::compare_store(cell, expected, new), |prev| prev | arg)
    }

    fn fetch_xor(cell: &Self::Storage, arg: Self) -> Self {
        cas_retry(|expected, new| Self::compare_store(cell, expected, new), |prev| prev ^ arg)
    }
}

/// Apply `update` through a compare-and-swap retry loop, returning the
/// previous value.
///
/// The first attempt guesses that the current value is zero instead of
/// reading it first, since a separate read costs a round trip of its own.
/// When the guess is wrong the failed CAS reports the real value and the
/// next attempt uses it, so nonzero memory costs one extra attempt.
#[inline]
pub fn cas_retry<T, C, F>(mut compare_store: C, update: F) -> T
where
    T: FamWord,
    C: FnMut(T, T) -> T,
    F: Fn(T) -> T,
{
    let mut prev = T::default();
    loop {
        let actual = compare_store(prev, update(prev));
        if actual == prev {
            return prev;
        }
        prev = actual;
    }
}
