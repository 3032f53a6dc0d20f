//! Cycle clock: the timebase of the latency emulation.
//!
//! This module provides architecture-specific cycle counter implementations
//! for x86_64 and aarch64, the cycle <-> nanosecond conversion driven by a
//! calibrated frequency, and the busy-wait loops every emulated delay is
//! built from. Nothing here ever sleeps or blocks in the kernel.

use std::hint::spin_loop;
use std::time::{Duration, Instant};

/// A monotonic source of cycles.
///
/// The emulator is generic over this so tests can drive it with an
/// instrumented counter instead of the hardware one.
pub trait CycleClock {
    /// Current counter value.
    fn now(&self) -> u64;

    /// Counter value read only after every earlier instruction has
    /// completed. Used to bracket a measured region.
    fn now_serialized(&self) -> u64 {
        self.now()
    }
}

/// The hardware cycle counter.
#[derive(Clone, Copy, Debug, Default)]
pub struct Tsc;

impl CycleClock for Tsc {
    #[inline(always)]
    fn now(&self) -> u64 {
        read_cycles()
    }

    #[inline(always)]
    fn now_serialized(&self) -> u64 {
        read_cycles_serialized()
    }
}

impl<C: CycleClock + ?Sized> CycleClock for &C {
    #[inline(always)]
    fn now(&self) -> u64 {
        (**self).now()
    }

    #[inline(always)]
    fn now_serialized(&self) -> u64 {
        (**self).now_serialized()
    }
}

/// Read the current CPU cycle counter / timer.
///
/// Not serialized: an emulated delay is allowed to overlap with the real
/// latency of the instruction that precedes it.
///
/// On x86_64: RDTSC.
/// On aarch64: CNTVCT_EL0 (virtual timer, accessible from userspace).
#[cfg(all(feature = "cpu_cycles", not(feature = "use_time")))]
#[inline(always)]
pub fn read_cycles() -> u64 {
    #[cfg(target_arch = "x86_64")]
    {
        // SAFETY: RDTSC is available on every x86_64 CPU.
        unsafe { core::arch::x86_64::_rdtsc() }
    }

    #[cfg(target_arch = "x86")]
    {
        // SAFETY: RDTSC is available on every CPU this target supports.
        unsafe { core::arch::x86::_rdtsc() }
    }

    #[cfg(target_arch = "aarch64")]
    {
        read_cycles_aarch64()
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "x86", target_arch = "aarch64")))]
    {
        compile_error!("cpu_cycles feature requires x86, x86_64, or aarch64 architecture");
    }
}

/// Nanoseconds since the first read, from the monotonic OS clock.
#[cfg(any(not(feature = "cpu_cycles"), feature = "use_time"))]
#[inline(always)]
pub fn read_cycles() -> u64 {
    use std::sync::OnceLock;
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

/// Read the cycle counter with LFENCE on both sides, so that all prior
/// instructions have retired before the read. Used to bracket a measured
/// region such as a cache-line flush.
#[inline(always)]
pub fn read_cycles_serialized() -> u64 {
    #[cfg(all(target_arch = "x86_64", feature = "cpu_cycles", not(feature = "use_time")))]
    {
        use core::arch::x86_64::_mm_lfence;
        // SAFETY: LFENCE is part of SSE2, baseline on x86_64.
        unsafe {
            _mm_lfence();
            let cycles = read_cycles();
            _mm_lfence();
            cycles
        }
    }

    #[cfg(not(all(target_arch = "x86_64", feature = "cpu_cycles", not(feature = "use_time"))))]
    {
        std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
        let cycles = read_cycles();
        std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
        cycles
    }
}

#[cfg(all(target_arch = "aarch64", feature = "cpu_cycles", not(feature = "use_time")))]
#[inline(always)]
fn read_cycles_aarch64() -> u64 {
    // CNTVCT_EL0 is a fixed-frequency timer rather than core cycles;
    // frequency discovery calibrates against it, so conversions stay right.
    let val: u64;
    unsafe {
        core::arch::asm!("mrs {}, cntvct_el0", out(reg) val, options(nomem, nostack));
    }
    val
}

/// Measure cycles for a closure
#[inline(always)]
pub fn measure_cycles<F, R>(mut f: F) -> (u64, R)
where
    F: FnMut() -> R,
{
    let start = read_cycles_serialized();
    let result = f();
    let end = read_cycles_serialized();
    (end.saturating_sub(start), result)
}

/// Busy-wait until `clock.now() >= deadline`.
///
/// Returns the clock reading that satisfied the wait, which is the first
/// reading if the deadline had already passed.
#[inline]
pub fn spin_until<C: CycleClock>(clock: &C, deadline: u64) -> u64 {
    loop {
        let now = clock.now();
        if now >= deadline {
            return now;
        }
        spin_loop();
    }
}

/// Busy-wait for at least `cycles` cycles measured from the first read.
#[inline]
pub fn spin_for_cycles<C: CycleClock>(clock: &C, cycles: u64) {
    let start = clock.now();
    while clock.now().wrapping_sub(start) < cycles {
        spin_loop();
    }
}

// ============================================================================
// Frequency
// ============================================================================

/// Calibrated clock frequency, used for every cycle <-> ns conversion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CpuFrequency {
    mhz: u64,
}

impl CpuFrequency {
    /// Frequency of `mhz` megahertz. Zero is treated as 1 MHz.
    pub const fn from_mhz(mhz: u64) -> Self {
        Self {
            mhz: if mhz == 0 { 1 } else { mhz },
        }
    }

    pub const fn mhz(&self) -> u64 {
        self.mhz
    }

    #[inline]
    pub const fn ns_to_cycles(&self, ns: u64) -> u64 {
        ns.saturating_mul(self.mhz) / 1000
    }

    #[inline]
    pub const fn cycles_to_ns(&self, cycles: u64) -> u64 {
        cycles.saturating_mul(1000) / self.mhz
    }

    /// Discover the frequency of the counter behind [`read_cycles`].
    ///
    /// With `use_time` the counter already ticks in nanoseconds. Otherwise
    /// `/proc/cpuinfo` is consulted first and the counter is calibrated
    /// against the OS clock if that fails.
    pub fn detect() -> Self {
        #[cfg(any(not(feature = "cpu_cycles"), feature = "use_time"))]
        {
            Self::from_mhz(1000)
        }

        #[cfg(all(feature = "cpu_cycles", not(feature = "use_time")))]
        {
            if let Some(freq) = Self::from_cpuinfo() {
                return freq;
            }
            tracing::warn!("cpu MHz not found in /proc/cpuinfo, calibrating cycle counter");
            Self::calibrate(Duration::from_millis(20))
        }
    }

    /// Parse the first "cpu MHz" line of `/proc/cpuinfo`.
    pub fn from_cpuinfo() -> Option<Self> {
        let text = std::fs::read_to_string("/proc/cpuinfo").ok()?;
        Self::parse_cpuinfo(&text)
    }

    fn parse_cpuinfo(text: &str) -> Option<Self> {
        text.lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(key, _)| key.trim() == "cpu MHz")
            .and_then(|(_, value)| value.trim().parse::<f64>().ok())
            .filter(|mhz| *mhz >= 1.0)
            .map(|mhz| Self::from_mhz(mhz.round() as u64))
    }

    /// Count counter ticks over `window` of wall-clock time.
    pub fn calibrate(window: Duration) -> Self {
        let start = Instant::now();
        let c0 = read_cycles_serialized();
        while start.elapsed() < window {
            spin_loop();
        }
        let c1 = read_cycles_serialized();
        let micros = start.elapsed().as_micros().max(1) as u64;
        Self::from_mhz(c1.saturating_sub(c0) / micros)
    }
}
