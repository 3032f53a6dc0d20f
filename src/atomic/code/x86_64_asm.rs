//! x86_64 double-width compare-and-swap.
//!
//! # CMPXCHG16B
//! ```asm
//! ; rdx:rax = expected, rcx:rbx = new
//! lock cmpxchg16b [dst]
//! ; ZF=1: [dst] was rdx:rax and now holds rcx:rbx
//! ; ZF=0: rdx:rax now holds the current [dst]
//! ```
//!
//! Either way rdx:rax ends up holding the value that was in memory at the
//! moment of the instruction, which is exactly the CAS contract the fam
//! surface exposes, so the flag does not need to be read.
//!
//! `rbx` is reserved by LLVM and cannot be named as an operand. The low
//! word of `new` travels in a scratch register and is swapped into `rbx`
//! around the instruction.

use std::arch::asm;

/// Atomically compare the 16 bytes at `dst` with `expected` and replace
/// them with `new` if equal. Returns the value observed at `dst`.
///
/// # Safety
/// `dst` must be valid for reads and writes, 16-byte aligned, and only
/// accessed atomically for as long as other threads can reach it. The CPU
/// must support CMPXCHG16B (every x86_64 CPU since the first generation of
/// Core 2 and K8 rev. F).
#[inline]
pub unsafe fn cas128(dst: *mut u128, expected: u128, new: u128) -> u128 {
    debug_assert_eq!(dst as usize % 16, 0, "cmpxchg16b needs 16-byte alignment");

    let prev_lo: u64;
    let prev_hi: u64;

    asm!(
        "xchg {new_lo}, rbx",
        "lock cmpxchg16b xmmword ptr [{dst}]",
        "mov rbx, {new_lo}",
        dst = in(reg) dst,
        new_lo = inout(reg) (new as u64) => _,
        in("rcx") (new >> 64) as u64,
        inout("rax") (expected as u64) => prev_lo,
        inout("rdx") (expected >> 64) as u64 => prev_hi,
        options(nostack),
    );

    (prev_lo as u128) | ((prev_hi as u128) << 64)
}
