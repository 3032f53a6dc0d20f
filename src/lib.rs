//! # fam-emu
//!
//! Emulation of fabric-attached memory (fam) atomics on commodity hardware.
//!
//! Atomic operations run on ordinary memory with full hardware semantics,
//! while a per-thread latency emulator charges each one the round trip of
//! the emulated fabric. Up to `parallelism` requests overlap; a fence waits
//! for all of them. Persist and invalidate delays are synchronous.
//!
//! ```no_run
//! use fam_emu::prelude::*;
//!
//! fam_emu::model::init_from_env()?;
//!
//! let counter = FamAtomic64::new(0);
//! counter.fetch_add(1);
//! counter.fetch_add(1);
//! fence();
//! assert_eq!(counter.read(), 2);
//! # Ok::<(), fam_emu::error::FamError>(())
//! ```

pub mod atomic;
pub mod config;
pub mod emulator;
pub mod error;
pub mod model;
pub mod spinlock;
pub mod utils;

/// Re-export commonly used items
pub mod prelude {
    pub use crate::atomic::{FamAtomic, FamAtomic128, FamAtomic32, FamAtomic64, FamOp};
    pub use crate::config::FamConfig;
    pub use crate::emulator::{fence, flush_persist, invalidate, memcpy, persist, LatencyEmulator};
    pub use crate::error::FamError;
    pub use crate::model::FamModel;
    pub use crate::spinlock::{FamSpinlock, FamSpinlockGuard};
}
