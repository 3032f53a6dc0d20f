//! Fair ticket spinlock living in fam.
//!
//! Two 32-bit tickets share one 64-bit word: `head` (now serving) in the
//! low half, `tail` (next ticket to hand out) in the high half. Every
//! access is a 64-bit fetch-add or compare-and-store from the atomic
//! primitives. Lock traffic is assumed to hit the local fast path, so it
//! bypasses the latency emulator.


use crate::atomic::FamWord;
use std::hint::spin_loop;
use std::sync::atomic::{fence, AtomicU64, Ordering};

const TAIL_ONE: u64 = 1 << 32;

/// `head + 1` when `head` is `u32::MAX`: the carry out of the low half is
/// cancelled so `tail` is left untouched.
const HEAD_WRAP: u64 = 1u64.wrapping_sub(TAIL_ONE);

#[derive(Debug, Default)]
#[repr(transparent)]
pub struct FamSpinlock {
    head_tail: AtomicU64,
}

impl FamSpinlock {
    pub const fn new() -> Self {
        Self {
            head_tail: AtomicU64::new(0),
        }
    }

    /// Reset to unlocked. Must not race with any other use of the lock.
    pub fn init(&self) {
        u64::write(&self.head_tail, 0);
    }

    /// Current `(head, tail)`.
    pub fn tickets(&self) -> (u32, u32) {
        split(u64::read(&self.head_tail))
    }

    pub fn is_locked(&self) -> bool {
        let (head, tail) = self.tickets();
        head != tail
    }

    /// Take a ticket and spin until it is served.
    pub fn lock(&self) {
        let (mut head, ticket) = split(u64::fetch_add(&self.head_tail, TAIL_ONE));
        while head != ticket {
            spin_loop();
            head = split(u64::fetch_add(&self.head_tail, 0)).0;
        }
        fence(Ordering::SeqCst);
    }

    /// Take the lock only if nobody holds or waits for it.
    pub fn try_lock(&self) -> bool {
        let old = u64::read(&self.head_tail);
        let (head, tail) = split(old);
        if head != tail {
            return false;
        }
        let new = old.wrapping_add(TAIL_ONE);
        let acquired = u64::compare_store(&self.head_tail, old, new) == old;
        fence(Ordering::SeqCst);
        acquired
    }

    /// Serve the next ticket. Only the holder may call this.
    pub fn unlock(&self) {
        // Nobody but the holder moves `head`, so this read is stable.
        let (head, _) = self.tickets();
        let inc = if head == u32::MAX { HEAD_WRAP } else { 1 };
        u64::fetch_add(&self.head_tail, inc);
        fence(Ordering::SeqCst);
    }

    pub fn lock_guard(&self) -> FamSpinlockGuard<'_> {
        self.lock();
        FamSpinlockGuard { lock: self }
    }

    pub fn try_lock_guard(&self) -> Option<FamSpinlockGuard<'_>> {
        self.try_lock().then(|| FamSpinlockGuard { lock: self })
    }
}

/// Unlocks on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct FamSpinlockGuard<'a> {
    lock: &'a FamSpinlock,
}

impl Drop for FamSpinlockGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

#[inline]
fn split(word: u64) -> (u32, u32) {
    (word as u32, (word >> 32) as u32)
}
