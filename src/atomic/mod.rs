//! Emulated fam atomics.
//!
//! [`FamAtomic`] is the caller-facing cell. Every operation on it is a typed
//! [`FamOp`] that goes through the calling thread's latency emulator before
//! the real hardware operation runs, so the operation has full hardware
//! semantics while its simulated round trip is accounted for in the
//! background.
//!
//! Keep each `FamAtomic` on a cache line of its own (e.g. inside a
//! `crossbeam_utils::CachePadded`); the emulated medium has no notion of
//! false sharing.

pub mod code;

pub use code::{Atomic128, FamWord, Width};

use crate::emulator::{self, LatencyEmulator};
use crate::utils::cycles::CycleClock;
use std::fmt;

pub type FamAtomic32 = FamAtomic<u32>;
pub type FamAtomic64 = FamAtomic<u64>;
pub type FamAtomic128 = FamAtomic<u128>;

/// One request to the fabric, for a word of type `T`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FamOp<T> {
    FetchAdd(T),
    Swap(T),
    CompareStore { expected: T, new: T },
    Read,
}

impl<T: FamWord> FamOp<T> {
    /// Perform the operation on `cell` with no latency accounting.
    #[inline]
    pub fn apply(self, cell: &T::Storage) -> T {
        match self {
            FamOp::FetchAdd(inc) => T::fetch_add(cell, inc),
            FamOp::Swap(value) => T::swap(cell, value),
            FamOp::CompareStore { expected, new } => T::compare_store(cell, expected, new),
            FamOp::Read => T::read(cell),
        }
    }

    pub fn opcode(&self) -> Opcode {
        let kind = match self {
            FamOp::FetchAdd(_) => OpKind::FetchAdd,
            FamOp::Swap(_) => OpKind::Swap,
            FamOp::CompareStore { .. } => OpKind::CompareStore,
            FamOp::Read => OpKind::Read,
        };
        Opcode {
            width: T::WIDTH,
            kind,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum OpKind {
    FetchAdd = 1,
    Swap = 2,
    CompareStore = 3,
    Read = 4,
}

/// Width and operation of a request, with a stable integer encoding
/// (`bits << 8 | kind`) for callers that pass requests around as numbers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Opcode {
    pub width: Width,
    pub kind: OpKind,
}

impl Opcode {
    pub const fn raw(self) -> u32 {
        (self.width.bits() << 8) | self.kind as u32
    }

    pub fn from_raw(raw: u32) -> Option<Self> {
        let width = Width::from_bits(raw >> 8)?;
        let kind = match raw & 0xff {
            1 => OpKind::FetchAdd,
            2 => OpKind::Swap,
            3 => OpKind::CompareStore,
            4 => OpKind::Read,
            _ => return None,
        };
        Some(Self { width, kind })
    }
}

/// Execute an integer-coded request against `cell`.
///
/// `arg0` is the increment, the swapped-in value or the expected value;
/// `arg1` is the new value of a compare-and-store and ignored otherwise.
///
/// An unknown code, or one whose width does not match `T`, aborts the
/// process: carrying on would hand the caller a value with the wrong
/// memory-ordering guarantees.
pub fn dispatch_raw<T: FamWord>(cell: &FamAtomic<T>, raw: u32, arg0: T, arg1: T) -> T {
    let opcode = match Opcode::from_raw(raw) {
        Some(opcode) if opcode.width == T::WIDTH => opcode,
        _ => {
            tracing::error!(raw, width = T::WIDTH.bits(), "invalid fam atomic opcode");
            std::process::abort();
        }
    };
    let op = match opcode.kind {
        OpKind::FetchAdd => FamOp::FetchAdd(arg0),
        OpKind::Swap => FamOp::Swap(arg0),
        OpKind::CompareStore => FamOp::CompareStore {
            expected: arg0,
            new: arg1,
        },
        OpKind::Read => FamOp::Read,
    };
    cell.execute(op)
}

/// A word of emulated fabric-attached memory.
#[repr(transparent)]
pub struct FamAtomic<T: FamWord> {
    storage: T::Storage,
}

impl<T: FamWord> FamAtomic<T> {
    pub fn new(value: T) -> Self {
        Self {
            storage: T::new_storage(value),
        }
    }

    /// View existing memory as a fam atomic.
    ///
    /// # Safety
    /// `ptr` must be aligned for `T::Storage` (16 bytes for `u128`), valid
    /// for reads and writes for `'a`, and only accessed atomically while the
    /// returned reference is alive.
    pub unsafe fn from_ptr<'a>(ptr: *mut T) -> &'a Self {
        debug_assert_eq!(ptr as usize % std::mem::align_of::<T::Storage>(), 0);
        &*(ptr as *const Self)
    }

    pub fn into_inner(self) -> T {
        T::into_value(self.storage)
    }

    /// The underlying storage, for hardware access with no latency.
    pub fn raw(&self) -> &T::Storage {
        &self.storage
    }

    /// Issue `op` through the calling thread's emulator.
    #[inline]
    pub fn execute(&self, op: FamOp<T>) -> T {
        emulator::pipelined(|| op.apply(&self.storage))
    }

    /// Issue `op` through an explicit emulator.
    #[inline]
    pub fn execute_on<C: CycleClock>(&self, emu: &mut LatencyEmulator<C>, op: FamOp<T>) -> T {
        emu.pipelined(|| op.apply(&self.storage))
    }

    pub fn fetch_add(&self, inc: T) -> T {
        self.execute(FamOp::FetchAdd(inc))
    }

    pub fn swap(&self, value: T) -> T {
        self.execute(FamOp::Swap(value))
    }

    /// Returns the value observed at the moment of the attempt; the store
    /// happened iff it equals `expected`.
    pub fn compare_store(&self, expected: T, new: T) -> T {
        self.execute(FamOp::CompareStore { expected, new })
    }

    pub fn read(&self) -> T {
        match T::WIDTH {
            // A zero add is the read primitive of the narrow widths.
            Width::W32 | Width::W64 => self.fetch_add(T::default()),
            Width::W128 => self.execute(FamOp::Read),
        }
    }

    pub fn write(&self, value: T) {
        let _ = self.swap(value);
    }

    /// Each CAS attempt is a separate round trip.
    pub fn fetch_and(&self, arg: T) -> T {
        code::cas_retry(|expected, new| self.compare_store(expected, new), |prev| prev & arg)
    }

    pub fn fetch_or(&self, arg: T) -> T {
        code::cas_retry(|expected, new| self.compare_store(expected, new), |prev| prev | arg)
    }

    pub fn fetch_xor(&self, arg: T) -> T {
        code::cas_retry(|expected, new| self.compare_store(expected, new), |prev| prev ^ arg)
    }
}

impl FamAtomic<u128> {
    /// The two 64-bit words, low word first.
    pub fn read_words(&self) -> [u64; 2] {
        Atomic128::split(self.read())
    }

    pub fn write_words(&self, words: [u64; 2]) {
        self.write(Atomic128::join(words))
    }
}

impl<T: FamWord> Default for FamAtomic<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: FamWord> fmt::Debug for FamAtomic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FamAtomic").field(&T::read(&self.storage)).finish()
    }
}
