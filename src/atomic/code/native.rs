//! 32 and 64-bit words on the platform's native atomics.
//!
//! `fetch_add`, `swap` and `compare_exchange` lower to `lock xadd`,
//! `xchg` and `lock cmpxchg` on x86_64. All orderings are `SeqCst`, the
//! same full barrier a locked instruction gives.

use super::{FamWord, Width};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering::SeqCst};

macro_rules! native_word {
    ($t:ty, $atomic:ty, $width:expr) => {
        impl FamWord for $t {
            type Storage = $atomic;

            const WIDTH: Width = $width;

            #[inline]
            fn new_storage(value: Self) -> Self::Storage {
                <$atomic>::new(value)
            }

            #[inline]
            fn into_value(storage: Self::Storage) -> Self {
                storage.into_inner()
            }

            #[inline]
            fn wrapping_add(self, rhs: Self) -> Self {
                <$t>::wrapping_add(self, rhs)
            }

            #[inline]
            fn fetch_add(cell: &Self::Storage, inc: Self) -> Self {
                cell.fetch_add(inc, SeqCst)
            }

            #[inline]
            fn swap(cell: &Self::Storage, value: Self) -> Self {
                cell.swap(value, SeqCst)
            }

            #[inline]
            fn compare_store(cell: &Self::Storage, expected: Self, new: Self) -> Self {
                match cell.compare_exchange(expected, new, SeqCst, SeqCst) {
                    Ok(prev) | Err(prev) => prev,
                }
            }

            #[inline]
            fn read(cell: &Self::Storage) -> Self {
                Self::fetch_add(cell, 0)
            }
        }
    };
}

native_word!(u32, AtomicU32, Width::W32);
native_word!(u64, AtomicU64, Width::W64);
