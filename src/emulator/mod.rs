//! Latency emulation for fam operations.
//!
//! Two policies:
//!
//! - **Pipelined** (atomics): the request's completion deadline is queued
//!   and the real operation returns at once. The caller only pays when the
//!   queue overflows or on [`fence`], so up to `parallelism` requests
//!   overlap their round trips.
//! - **Synchronous** (invalidate, persist, flush): a plain busy-wait of the
//!   configured latency, in program order, with no queue involved.
//!
//! Every thread gets its own [`LatencyEmulator`] on its first pipelined
//! operation or fence. Nothing is shared between threads, and the only
//! waiting anywhere is spinning on the cycle counter.

pub mod queue;
#[cfg(test)]
pub mod test;

pub use queue::PendingRequestQueue;

use crate::model::{self, FamModel};
use crate::utils::cycles::{spin_for_cycles, CpuFrequency, CycleClock, Tsc};
use std::cell::RefCell;

/// Granularity of bulk fabric accesses.
pub const CACHE_LINE: usize = 64;

/// Counters of one emulator, for reporting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EmulatorStats {
    /// Pipelined requests issued.
    pub requests: u64,
    /// Requests that found the queue full.
    pub stalls: u64,
    /// Cycles spent waiting for a free slot.
    pub stall_cycles: u64,
    pub fences: u64,
    /// Cycles spent draining in fences.
    pub fence_cycles: u64,
}

/// Per-thread latency emulator.
pub struct LatencyEmulator<C: CycleClock = Tsc> {
    model: FamModel,
    clock: C,
    queue: PendingRequestQueue,
    atomic_latency_cycles: u64,
    stats: EmulatorStats,
}

impl<C: CycleClock> LatencyEmulator<C> {
    pub fn new(model: FamModel, clock: C) -> Self {
        Self {
            queue: PendingRequestQueue::with_capacity(model.parallelism),
            atomic_latency_cycles: model.atomic_latency_cycles(),
            model,
            clock,
            stats: EmulatorStats::default(),
        }
    }

    pub fn model(&self) -> &FamModel {
        &self.model
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn queue(&self) -> &PendingRequestQueue {
        &self.queue
    }

    pub fn stats(&self) -> EmulatorStats {
        self.stats
    }

    /// Issue one pipelined request and run `op` as its real effect.
    ///
    /// The deadline is computed from the time of issue, before any stall
    /// for a free slot.
    #[inline]
    pub fn pipelined<R>(&mut self, op: impl FnOnce() -> R) -> R {
        if !self.model.enabled {
            return op();
        }
        let now = self.clock.now();
        self.issue(now, now.saturating_add(self.atomic_latency_cycles));
        op()
    }

    fn issue(&mut self, now: u64, deadline: u64) {
        let stalled = self.queue.admit(now, &self.clock);
        if stalled > 0 {
            self.stats.stalls += 1;
            self.stats.stall_cycles += stalled;
            tracing::trace!(stalled, "fam request waited for a slot");
        }
        self.queue.enqueue(deadline);
        self.stats.requests += 1;
    }

    /// Wait until every request issued so far has completed. Returns the
    /// cycles spent waiting.
    pub fn fence(&mut self) -> u64 {
        let now = self.clock.now();
        let waited = self.queue.drain_all(now, &self.clock);
        self.stats.fences += 1;
        self.stats.fence_cycles += waited;
        waited
    }

    pub fn invalidate(&self, _addr: *const u8, _len: usize) {
        invalidate_delay(&self.model, &self.clock);
    }

    pub fn persist(&self, _addr: *const u8, _len: usize) {
        persist_delay(&self.model, &self.clock);
    }

    /// Flush every cache line of `value`, then wait out whatever part of
    /// the persist latency the real flush did not already take. Returns the
    /// cycles the flush itself took.
    pub fn flush_persist<T: ?Sized>(&self, value: &T) -> u64 {
        let flush_cycles = timed_flush(&self.clock, value);

        if self.model.persist_enabled {
            let budget = self.model.cpu.ns_to_cycles(self.model.persist_latency_ns);
            let remaining = budget.saturating_sub(flush_cycles);
            if remaining > 0 {
                spin_for_cycles(&self.clock, remaining);
            }
        }
        flush_cycles
    }

    /// Charge a bulk access of `len` bytes: one pipelined request per cache
    /// line, then a fence.
    ///
    /// `overlap_cycles` is time the real access already spent; each
    /// deadline is pulled earlier by it so it is not counted twice. Returns
    /// the cycles spent stalled and fencing.
    pub fn range_access(&mut self, len: usize, request_latency_ns: u64, overlap_cycles: u64) -> u64 {
        if !self.model.enabled {
            return 0;
        }
        let before = self.stats.stall_cycles;
        let latency = self.model.cpu.ns_to_cycles(request_latency_ns);
        for _ in (0..len).step_by(CACHE_LINE) {
            let now = self.clock.now();
            let deadline = now.saturating_sub(overlap_cycles).saturating_add(latency);
            self.issue(now, deadline);
        }
        (self.stats.stall_cycles - before) + self.fence()
    }

    /// Copy `src` into `dst` as a read from fam, charging the read latency
    /// per cache line with the copy's own duration as overlap.
    ///
    /// # Panics
    /// If the slices differ in length.
    pub fn copy(&mut self, dst: &mut [u8], src: &[u8]) -> u64 {
        let start = self.clock.now();
        dst.copy_from_slice(src);
        let elapsed = self.clock.now().saturating_sub(start);
        self.range_access(src.len(), self.model.read_latency_ns, elapsed)
    }
}

impl<C: CycleClock> Drop for LatencyEmulator<C> {
    fn drop(&mut self) {
        if !self.queue.is_empty() {
            let now = self.clock.now();
            self.queue.drain_all(now, &self.clock);
        }
    }
}

/// Busy-wait `ns` converted to cycles.
pub fn inject_latency_ns<C: CycleClock>(clock: &C, cpu: CpuFrequency, ns: u64) {
    let cycles = cpu.ns_to_cycles(ns);
    if cycles > 0 {
        spin_for_cycles(clock, cycles);
    }
}

/// The synchronous invalidate delay of `model`, if enabled.
pub fn invalidate_delay<C: CycleClock>(model: &FamModel, clock: &C) {
    if model.invalidate_enabled {
        inject_latency_ns(clock, model.cpu, model.invalidate_latency_ns);
    }
}

/// The synchronous persist delay of `model`, if enabled.
pub fn persist_delay<C: CycleClock>(model: &FamModel, clock: &C) {
    if model.persist_enabled {
        inject_latency_ns(clock, model.cpu, model.persist_latency_ns);
    }
}

/// Flush the lines of `value` and return how long that took, measured with
/// serialized reads so the flush has retired before the second one.
fn timed_flush<C: CycleClock, T: ?Sized>(clock: &C, value: &T) -> u64 {
    let start = clock.now_serialized();
    flush_lines(value as *const T as *const u8, std::mem::size_of_val(value));
    clock.now_serialized().saturating_sub(start)
}

#[cfg(target_arch = "x86_64")]
#[inline]
fn flush_lines(addr: *const u8, len: usize) {
    use core::arch::x86_64::{_mm_clflush, _mm_mfence};
    let first = addr.wrapping_sub(addr as usize % CACHE_LINE);
    let span = (addr as usize % CACHE_LINE) + len;
    // SAFETY: every flushed line overlaps the live value at `addr..addr+len`,
    // so each one is mapped.
    unsafe {
        for offset in (0..span).step_by(CACHE_LINE) {
            _mm_clflush(first.wrapping_add(offset));
        }
        _mm_mfence();
    }
}

#[cfg(not(target_arch = "x86_64"))]
#[inline]
fn flush_lines(_addr: *const u8, _len: usize) {
    std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
}

// ============================================================================
// Thread-local emulator
// ============================================================================

thread_local! {
    static FAM_THREAD: RefCell<Option<LatencyEmulator<Tsc>>> = const { RefCell::new(None) };
}

fn new_thread_emulator() -> LatencyEmulator<Tsc> {
    let model = model::get();
    tracing::debug!(capacity = model.parallelism, "created fam request queue for thread");
    LatencyEmulator::new(*model, Tsc)
}

/// Run `f` on the calling thread's emulator, creating it on first use with
/// the process-wide model.
///
/// Returns `None`, without calling `f`, once the thread's emulator has been
/// torn down, or when called from inside another closure given to this
/// function or to [`with_thread_emulator`] on the same thread.
pub fn try_with_thread_emulator<R>(f: impl FnOnce(&mut LatencyEmulator<Tsc>) -> R) -> Option<R> {
    FAM_THREAD
        .try_with(|cell| {
            let mut slot = cell.try_borrow_mut().ok()?;
            Some(f(slot.get_or_insert_with(new_thread_emulator)))
        })
        .ok()
        .flatten()
}

/// Run `f` on the calling thread's emulator, creating it on first use with
/// the process-wide model.
///
/// Fam operations issued inside `f` on the same thread run with no latency.
///
/// # Panics
/// During thread-local teardown, and when nested inside another call on the
/// same thread. Use [`try_with_thread_emulator`] where either can happen.
pub fn with_thread_emulator<R>(f: impl FnOnce(&mut LatencyEmulator<Tsc>) -> R) -> R {
    FAM_THREAD.with(|cell| f(cell.borrow_mut().get_or_insert_with(new_thread_emulator)))
}

/// Issue a pipelined request on the calling thread's emulator.
///
/// When the emulator is unavailable (thread teardown, or nested inside
/// [`with_thread_emulator`]) `op` runs with no latency.
#[inline]
pub fn pipelined<R>(op: impl FnOnce() -> R) -> R {
    try_with_thread_emulator(|emu| emu.pipelined(|| ()));
    op()
}

/// Wait for every request the calling thread has issued. Returns 0 once
/// the thread's emulator is gone.
pub fn fence() -> u64 {
    try_with_thread_emulator(|emu| emu.fence()).unwrap_or(0)
}

/// Drain and release the calling thread's emulator. The next operation on
/// this thread creates a fresh one.
pub fn shutdown_thread() -> u64 {
    FAM_THREAD
        .try_with(|cell| cell.try_borrow_mut().ok().and_then(|mut slot| slot.take()))
        .ok()
        .flatten()
        .map(|mut emu| emu.fence())
        .unwrap_or(0)
}

pub fn invalidate(_addr: *const u8, _len: usize) {
    invalidate_delay(model::get(), &Tsc);
}

pub fn persist(_addr: *const u8, _len: usize) {
    persist_delay(model::get(), &Tsc);
}

/// See [`LatencyEmulator::flush_persist`]. Without a thread emulator the
/// lines are flushed with no added latency.
pub fn flush_persist<T: ?Sized>(value: &T) -> u64 {
    try_with_thread_emulator(|emu| emu.flush_persist(value))
        .unwrap_or_else(|| timed_flush(&Tsc, value))
}

/// Copy `src` into `dst` as a read from fam. See [`LatencyEmulator::copy`].
/// Without a thread emulator the copy is charged nothing.
///
/// # Panics
/// If the slices differ in length.
pub fn memcpy(dst: &mut [u8], src: &[u8]) -> u64 {
    let start = Tsc.now();
    dst.copy_from_slice(src);
    let elapsed = Tsc.now().saturating_sub(start);
    try_with_thread_emulator(|emu| {
        let latency_ns = emu.model().read_latency_ns;
        emu.range_access(src.len(), latency_ns, elapsed)
    })
    .unwrap_or(0)
}
