//! Double-width CAS for targets with neither `cmpxchg16b` nor an exclusive
//! pair load/store (anything but x86_64 and aarch64).
//!
//! A fixed table of cache-padded spinlocks, striped by address. Every
//! 128-bit access goes through `cas128`, so holding the stripe lock for the
//! compare and the store makes the pair atomic with respect to other fam
//! operations on the same address.
//!
//! Limitations on these targets: 128-bit operations are blocking rather
//! than lock-free, unrelated addresses that share a stripe serialize, and
//! the locks are local to the process, so 128-bit words in memory shared
//! with another process are not atomic. 32 and 64-bit words are unaffected.

use crossbeam_utils::CachePadded;
use std::hint::spin_loop;
use std::sync::atomic::{AtomicBool, Ordering};

const STRIPES: usize = 64;

static LOCKS: [CachePadded<AtomicBool>; STRIPES] =
    [const { CachePadded::new(AtomicBool::new(false)) }; STRIPES];

fn stripe(addr: *mut u128) -> &'static AtomicBool {
    &LOCKS[(addr as usize >> 4) % STRIPES]
}

/// # Safety
/// `dst` must be valid for reads and writes, 16-byte aligned, and only
/// accessed through this function while other threads can reach it.
pub unsafe fn cas128(dst: *mut u128, expected: u128, new: u128) -> u128 {
    let lock = stripe(dst);
    while lock
        .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
        .is_err()
    {
        spin_loop();
    }

    let prev = dst.read_volatile();
    if prev == expected {
        dst.write_volatile(new);
    }

    lock.store(false, Ordering::Release);
    prev
}
