//! Tests for the request queue and the latency emulator

use super::*;
use crate::atomic::{FamAtomic, FamOp};
use crate::utils::cycles::read_cycles;
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

/// Deterministic clock: every read returns the current value and advances
/// it by one cycle.
struct TestClock {
    t: Cell<u64>,
    serialized: Cell<u32>,
}

impl TestClock {
    fn starting_at(t: u64) -> Self {
        Self {
            t: Cell::new(t),
            serialized: Cell::new(0),
        }
    }

    /// Current value without advancing.
    fn peek(&self) -> u64 {
        self.t.get()
    }
}

impl CycleClock for TestClock {
    fn now(&self) -> u64 {
        let t = self.t.get();
        self.t.set(t + 1);
        t
    }

    fn now_serialized(&self) -> u64 {
        self.serialized.set(self.serialized.get() + 1);
        self.now()
    }
}

/// 1000 MHz so nanoseconds and cycles coincide.
fn model(parallelism: usize, atomic_latency_ns: u64) -> FamModel {
    FamModel {
        parallelism,
        atomic_latency_ns,
        cpu: CpuFrequency::from_mhz(1000),
        ..FamModel::default()
    }
}

// ============================================================================
// PendingRequestQueue
// ============================================================================

#[test]
fn test_queue_keeps_arrival_order() {
    let mut queue = PendingRequestQueue::with_capacity(4);
    for deadline in [300, 100, 200] {
        queue.enqueue(deadline);
    }
    assert_eq!(queue.iter().collect::<Vec<_>>(), vec![300, 100, 200]);
    assert_eq!(queue.front(), Some(300));

    // the oldest entry gates the drain even though later ones are smaller
    let clock = TestClock::starting_at(0);
    assert_eq!(queue.drain_all(0, &clock), 302);
    assert!(queue.is_empty());
}

#[test]
fn test_queue_zero_capacity_is_one() {
    let queue = PendingRequestQueue::with_capacity(0);
    assert_eq!(queue.capacity(), 1);
}

#[test]
fn test_queue_admit_only_stalls_when_full() {
    let clock = TestClock::starting_at(10);
    let mut queue = PendingRequestQueue::with_capacity(2);

    assert_eq!(queue.admit(10, &clock), 0);
    queue.enqueue(50);
    assert_eq!(queue.admit(10, &clock), 0);
    queue.enqueue(60);
    assert_eq!(clock.peek(), 10, "admission with room must not read the clock");

    assert!(queue.is_full());
    assert_eq!(queue.admit(10, &clock), 40);
    assert_eq!(queue.iter().collect::<Vec<_>>(), vec![60]);
}

#[test]
fn test_queue_burst_with_equal_deadlines_retires_in_order() {
    let clock = TestClock::starting_at(0);
    let mut queue = PendingRequestQueue::with_capacity(3);
    for _ in 0..3 {
        queue.admit(0, &clock);
        queue.enqueue(500);
    }

    // full: the fourth request waits for the first of the burst
    assert_eq!(queue.admit(0, &clock), 500);
    queue.enqueue(450);
    assert_eq!(queue.iter().collect::<Vec<_>>(), vec![500, 500, 450]);

    // the other two burst entries are already due and leave first, with no
    // wait, ahead of the smaller deadline that arrived later
    let now = clock.peek();
    assert_eq!(queue.admit(now, &clock), 0);
    queue.enqueue(now + 100);
    assert_eq!(queue.front(), Some(500));
    assert_eq!(queue.admit(now, &clock), 0);
    assert_eq!(queue.front(), Some(450));
}

#[test]
fn test_queue_wraps_around() {
    let clock = TestClock::starting_at(0);
    let mut queue = PendingRequestQueue::with_capacity(2);
    for deadline in 1..=5 {
        queue.admit(clock.peek(), &clock);
        queue.enqueue(deadline);
    }
    assert_eq!(queue.len(), 2);
    assert_eq!(queue.iter().collect::<Vec<_>>(), vec![4, 5]);
}

#[test]
#[should_panic(expected = "without admission")]
fn test_queue_enqueue_when_full_panics() {
    let mut queue = PendingRequestQueue::with_capacity(1);
    queue.enqueue(1);
    queue.enqueue(2);
}

// ============================================================================
// Pipelined requests
// ============================================================================

#[test]
fn test_three_fetch_adds_with_two_slots() {
    let clock = TestClock::starting_at(1000);
    let mut emu = LatencyEmulator::new(model(2, 100), &clock);
    let cell = FamAtomic::<u64>::new(0);

    assert_eq!(cell.execute_on(&mut emu, FamOp::FetchAdd(1)), 0);
    assert_eq!(cell.execute_on(&mut emu, FamOp::FetchAdd(1)), 1);
    assert_eq!(emu.stats().stalls, 0);
    assert_eq!(emu.queue().iter().collect::<Vec<_>>(), vec![1100, 1101]);

    // issued at 1002, waits for the first deadline at 1100
    assert_eq!(cell.execute_on(&mut emu, FamOp::FetchAdd(1)), 2);
    let stats = emu.stats();
    assert_eq!(stats.requests, 3);
    assert_eq!(stats.stalls, 1);
    assert_eq!(stats.stall_cycles, 98);
    assert_eq!(emu.queue().iter().collect::<Vec<_>>(), vec![1101, 1102]);

    emu.fence();
    assert!(emu.queue().is_empty());
    assert!(clock.peek() > 1102);
    assert_eq!(cell.into_inner(), 3);
}

#[test]
fn test_full_window_is_free_then_stalls() {
    let clock = TestClock::starting_at(0);
    let mut emu = LatencyEmulator::new(model(4, 1000), &clock);

    for _ in 0..4 {
        emu.pipelined(|| ());
    }
    assert_eq!(emu.stats().stalls, 0);
    assert_eq!(emu.queue().len(), 4);

    let first_deadline = emu.queue().front().unwrap_or_default();
    let issued_at = clock.peek();
    emu.pipelined(|| ());
    let stats = emu.stats();
    assert_eq!(stats.stalls, 1);
    assert!(stats.stall_cycles >= first_deadline - issued_at);
    assert_eq!(stats.stall_cycles, 996);
}

#[test]
fn test_single_slot_waits_for_previous() {
    let clock = TestClock::starting_at(0);
    let mut emu = LatencyEmulator::new(model(1, 1000), &clock);
    emu.pipelined(|| ());
    emu.pipelined(|| ());
    assert_eq!(emu.stats().stalls, 1);
    assert_eq!(emu.stats().stall_cycles, 999);
}

#[test]
fn test_fence_waits_for_every_deadline() {
    let clock = TestClock::starting_at(0);
    let mut emu = LatencyEmulator::new(model(8, 500), &clock);
    for _ in 0..6 {
        emu.pipelined(|| ());
    }
    let last = emu.queue().iter().max().unwrap_or_default();

    let waited = emu.fence();
    assert!(waited > 0);
    assert!(clock.peek() > last);
    assert!(emu.queue().is_empty());
    assert_eq!(emu.stats().fences, 1);
    assert_eq!(emu.stats().fence_cycles, waited);

    // nothing outstanding: a second fence is immediate
    assert_eq!(emu.fence(), 0);
}

#[test]
fn test_disabled_model_records_nothing() {
    let clock = TestClock::starting_at(0);
    let disabled = FamModel {
        enabled: false,
        ..model(1, 1000)
    };
    let mut emu = LatencyEmulator::new(disabled, &clock);
    let cell = FamAtomic::<u32>::new(5);

    for _ in 0..10 {
        cell.execute_on(&mut emu, FamOp::FetchAdd(1));
    }
    assert_eq!(cell.execute_on(&mut emu, FamOp::Read), 15);
    assert_eq!(emu.stats().requests, 0);
    assert!(emu.queue().is_empty());
    assert_eq!(emu.range_access(4096, 1000, 0), 0);
}

#[test]
fn test_zero_latency_never_stalls() {
    let clock = TestClock::starting_at(0);
    let mut emu = LatencyEmulator::new(model(1, 0), &clock);
    for _ in 0..10 {
        emu.pipelined(|| ());
    }
    // every earlier deadline is already in the past when the slot is needed
    assert_eq!(emu.stats().requests, 10);
    assert_eq!(emu.stats().stall_cycles, 0);
}

#[test]
fn test_drop_drains_outstanding_requests() {
    let clock = TestClock::starting_at(0);
    {
        let mut emu = LatencyEmulator::new(model(4, 300), &clock);
        emu.pipelined(|| ());
    }
    assert!(clock.peek() > 300);
}

#[test]
fn test_real_clock_fence_covers_latency() {
    let latency_ns = 5000;
    let mut emu = LatencyEmulator::new(model(4, latency_ns), Tsc);

    let start = read_cycles();
    emu.pipelined(|| ());
    emu.fence();
    let elapsed = read_cycles().saturating_sub(start);

    assert!(elapsed >= latency_ns);
}

// ============================================================================
// Synchronous delays
// ============================================================================

#[test]
fn test_persist_waits_in_program_order() {
    let clock = TestClock::starting_at(0);
    let emu = LatencyEmulator::new(
        FamModel {
            persist_enabled: true,
            persist_latency_ns: 50,
            ..model(4, 0)
        },
        &clock,
    );
    let data = [0u8; 16];

    emu.persist(data.as_ptr(), data.len());
    assert!(clock.peek() >= 50);
    assert!(emu.queue().is_empty(), "persist must not use the request queue");
}

#[test]
fn test_invalidate_waits_only_when_enabled() {
    let clock = TestClock::starting_at(0);
    let data = [0u8; 16];

    let emu = LatencyEmulator::new(
        FamModel {
            invalidate_latency_ns: 80,
            ..model(1, 0)
        },
        &clock,
    );
    emu.invalidate(data.as_ptr(), data.len());
    assert_eq!(clock.peek(), 0);
    drop(emu);

    let emu = LatencyEmulator::new(
        FamModel {
            invalidate_enabled: true,
            invalidate_latency_ns: 80,
            ..model(1, 0)
        },
        &clock,
    );
    emu.invalidate(data.as_ptr(), data.len());
    assert!(clock.peek() >= 80);
}

#[test]
fn test_flush_persist_subtracts_flush_time() {
    let clock = TestClock::starting_at(0);
    let emu = LatencyEmulator::new(
        FamModel {
            persist_enabled: true,
            persist_latency_ns: 40,
            ..model(1, 0)
        },
        &clock,
    );
    let value = 7u64;

    // the test clock sees the flush as exactly one cycle
    assert_eq!(emu.flush_persist(&value), 1);
    assert!(clock.peek() >= 40);
    assert_eq!(clock.serialized.get(), 2, "flush must be timed with serialized reads");
}

#[test]
fn test_flush_without_persist_only_flushes() {
    let clock = TestClock::starting_at(0);
    let emu = LatencyEmulator::new(model(1, 0), &clock);
    let buf = vec![1u8; 256];

    // a multi-line buffer is flushed line by line inside the timed region
    assert_eq!(emu.flush_persist(buf.as_slice()), 1);
    assert_eq!(clock.peek(), 2);
    assert_eq!(clock.serialized.get(), 2);
}

#[test]
fn test_delay_helpers_follow_model() {
    let clock = TestClock::starting_at(0);
    let quiet = model(1, 0);
    persist_delay(&quiet, &clock);
    invalidate_delay(&quiet, &clock);
    assert_eq!(clock.peek(), 0);

    let durable = FamModel {
        persist_enabled: true,
        persist_latency_ns: 30,
        invalidate_enabled: true,
        invalidate_latency_ns: 20,
        ..quiet
    };
    persist_delay(&durable, &clock);
    let after_persist = clock.peek();
    assert!(after_persist >= 30);
    invalidate_delay(&durable, &clock);
    assert!(clock.peek() >= after_persist + 20);
}

// ============================================================================
// Bulk access
// ============================================================================

#[test]
fn test_range_access_one_request_per_line() {
    let clock = TestClock::starting_at(0);
    let mut emu = LatencyEmulator::new(model(8, 0), &clock);

    emu.range_access(200, 100, 0);
    let stats = emu.stats();
    assert_eq!(stats.requests, 4);
    assert_eq!(stats.fences, 1);
    assert!(emu.queue().is_empty());

    emu.range_access(0, 100, 0);
    assert_eq!(emu.stats().requests, 4);
}

#[test]
fn test_range_access_respects_parallelism() {
    let clock = TestClock::starting_at(0);
    let mut emu = LatencyEmulator::new(model(2, 0), &clock);
    emu.range_access(4 * CACHE_LINE, 100, 0);
    // the third line finds both slots taken
    assert!(emu.stats().stalls >= 1);
    assert_eq!(emu.stats().requests, 4);
}

#[test]
fn test_range_access_overlap_reduces_cost() {
    let clock = TestClock::starting_at(0);
    let mut emu = LatencyEmulator::new(model(2, 0), &clock);

    let full = emu.range_access(8 * CACHE_LINE, 500, 0);
    let overlapped = emu.range_access(8 * CACHE_LINE, 500, 500);
    assert!(overlapped < full, "{overlapped} >= {full}");
    assert!(full >= 500);
}

#[test]
fn test_copy_moves_bytes_and_charges_lines() {
    let clock = TestClock::starting_at(0);
    let mut emu = LatencyEmulator::new(
        FamModel {
            read_latency_ns: 200,
            ..model(4, 0)
        },
        &clock,
    );
    let src: Vec<u8> = (0..=255).cycle().take(1000).collect();
    let mut dst = vec![0u8; 1000];

    let cost = emu.copy(&mut dst, &src);
    assert_eq!(dst, src);
    assert_eq!(emu.stats().requests, 16);
    assert!(cost > 0);
}

#[test]
#[should_panic]
fn test_copy_length_mismatch_panics() {
    let clock = TestClock::starting_at(0);
    let mut emu = LatencyEmulator::new(model(1, 0), &clock);
    let mut dst = [0u8; 4];
    emu.copy(&mut dst, &[1, 2, 3]);
}

// ============================================================================
// Thread-local emulator
// ============================================================================

#[test]
fn test_thread_emulator_is_per_thread() {
    let handle = thread::spawn(|| {
        let cell = FamAtomic::<u64>::new(0);
        for _ in 0..3 {
            cell.fetch_add(1);
        }
        let expected = if crate::model::get().enabled { 3 } else { 0 };
        let (requests, capacity) =
            with_thread_emulator(|emu| (emu.stats().requests, emu.queue().capacity()));
        assert_eq!(requests, expected);
        assert_eq!(capacity, crate::model::get().parallelism);

        fence();
        shutdown_thread();

        // a fresh emulator replaces the released one
        assert_eq!(with_thread_emulator(|emu| emu.stats()), EmulatorStats::default());
        cell.into_inner()
    });
    assert_eq!(handle.join().unwrap(), 3);

    // this thread never issued anything
    assert_eq!(shutdown_thread(), 0);
}

#[test]
fn test_thread_memcpy() {
    let src = [9u8; 130];
    let mut dst = [0u8; 130];
    memcpy(&mut dst, &src);
    assert_eq!(dst, src);
}

#[test]
fn test_nested_use_runs_without_latency() {
    let cell = FamAtomic::<u64>::new(0);
    let (before, prev, waited, after) = with_thread_emulator(|emu| {
        let before = emu.stats().requests;
        let prev = cell.fetch_add(1);
        let waited = fence();
        (before, prev, waited, emu.stats().requests)
    });
    assert_eq!(prev, 0);
    assert_eq!(waited, 0);
    assert_eq!(before, after);
    assert_eq!(cell.into_inner(), 1);

    // the inner call finds the emulator borrowed and declines
    let nested = try_with_thread_emulator(|_| try_with_thread_emulator(|_| ()));
    assert_eq!(nested, Some(None));
}

static TEARDOWN_DONE: AtomicBool = AtomicBool::new(false);

/// Uses the emulator from its destructor, which runs after the thread's
/// emulator has been destroyed.
struct FenceOnDrop;

impl Drop for FenceOnDrop {
    fn drop(&mut self) {
        fence();
        let mut dst = [0u8; 80];
        memcpy(&mut dst, &[3u8; 80]);
        flush_persist(&dst);
        persist(dst.as_ptr(), dst.len());
        if dst == [3u8; 80] && shutdown_thread() == 0 {
            TEARDOWN_DONE.store(true, Ordering::SeqCst);
        }
    }
}

thread_local! {
    static FENCE_ON_DROP: FenceOnDrop = const { FenceOnDrop };
}

#[test]
fn test_fence_during_thread_teardown() {
    let handle = thread::spawn(|| {
        // registered first, so destroyed after the emulator
        FENCE_ON_DROP.with(|_| ());
        FamAtomic::<u64>::new(0).fetch_add(1);
    });
    assert!(handle.join().is_ok());
    assert!(TEARDOWN_DONE.load(Ordering::SeqCst));
}
