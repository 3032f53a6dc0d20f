//! Thread pinning for busy-waiting workloads.
//!
//! Emulated delays spin on a per-core counter, so a thread that migrates in
//! the middle of a wait can observe a skewed clock. The bench CLI and the
//! multi-threaded tests pin every worker to one core for the duration of a
//! run and restore the original mask afterwards.

// ============================================================================
// Linux implementation using libc
// ============================================================================

#[cfg(target_os = "linux")]
mod platform {
    use std::cell::RefCell;

    thread_local! {
        static ORIGINAL_AFFINITY: RefCell<Option<libc::cpu_set_t>> = const { RefCell::new(None) };
    }

    pub fn online_cpus() -> usize {
        // SAFETY: sysconf has no memory-safety preconditions.
        let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
        if n <= 0 {
            1
        } else {
            n as usize
        }
    }

    pub fn current_cpu() -> Option<usize> {
        // SAFETY: sched_getcpu has no preconditions.
        let cpu = unsafe { libc::sched_getcpu() };
        (cpu >= 0).then_some(cpu as usize)
    }

    pub fn save_affinity() -> bool {
        unsafe {
            let mut set: libc::cpu_set_t = std::mem::zeroed();
            if libc::sched_getaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &mut set) != 0 {
                return false;
            }
            ORIGINAL_AFFINITY.with(|cell| {
                cell.borrow_mut().get_or_insert(set);
            });
            true
        }
    }

    pub fn set_affinity(cpu: usize) -> bool {
        unsafe {
            let mut set: libc::cpu_set_t = std::mem::zeroed();
            libc::CPU_ZERO(&mut set);
            libc::CPU_SET(cpu, &mut set);
            libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) == 0
        }
    }

    pub fn restore_affinity() -> bool {
        ORIGINAL_AFFINITY.with(|cell| match cell.borrow_mut().take() {
            // SAFETY: `set` was filled in by sched_getaffinity.
            Some(set) => unsafe {
                libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) == 0
            },
            None => false,
        })
    }
}

// ============================================================================
// Fallback: no pinning, the OS scheduler decides
// ============================================================================

#[cfg(not(target_os = "linux"))]
mod platform {
    pub fn online_cpus() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
    pub fn current_cpu() -> Option<usize> {
        None
    }
    pub fn save_affinity() -> bool {
        true
    }
    pub fn set_affinity(_cpu: usize) -> bool {
        false
    }
    pub fn restore_affinity() -> bool {
        true
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Number of online CPUs (at least 1).
pub fn online_cpus() -> usize {
    platform::online_cpus()
}

/// The CPU the calling thread is running on, if the platform can tell.
pub fn current_cpu() -> Option<usize> {
    platform::current_cpu()
}

/// RAII guard for CPU pinning - pins on creation, restores the original
/// mask on drop.
///
/// # Example
/// ```ignore
/// let _pin = CpuPinGuard::for_worker(worker_index);
/// // ... busy-wait on the cycle counter ...
/// ```
pub struct CpuPinGuard {
    pinned_cpu: Option<usize>,
}

impl CpuPinGuard {
    /// Pin to `cpu`.
    pub fn with_cpu(cpu: usize) -> Self {
        platform::save_affinity();
        let pinned = platform::set_affinity(cpu);
        if !pinned {
            tracing::debug!(cpu, "thread pinning unavailable");
        }
        Self {
            pinned_cpu: pinned.then_some(cpu),
        }
    }

    /// Pin to wherever the thread is running now, so it stops migrating
    /// without being moved.
    pub fn current() -> Self {
        Self::with_cpu(current_cpu().unwrap_or(0))
    }

    /// Pin worker `index` of a group, spreading workers round-robin over
    /// the online CPUs.
    pub fn for_worker(index: usize) -> Self {
        Self::with_cpu(index % online_cpus())
    }

    pub fn cpu(&self) -> Option<usize> {
        self.pinned_cpu
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned_cpu.is_some()
    }
}

impl Drop for CpuPinGuard {
    fn drop(&mut self) {
        if self.pinned_cpu.is_some() {
            platform::restore_affinity();
        }
    }
}
