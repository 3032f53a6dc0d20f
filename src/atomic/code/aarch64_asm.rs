//! aarch64 double-width compare-and-swap.
//!
//! # LDAXP / STLXP
//! ```asm
//! retry:
//!   ldaxp  lo, hi, [dst]        ; exclusive load-acquire of both words
//!   cmp    lo, exp_lo
//!   ccmp   hi, exp_hi, #0, eq   ; Z=1 iff both words match
//!   b.ne   mismatch
//!   stlxp  st, new_lo, new_hi, [dst]
//!   cbnz   st, retry
//! mismatch:
//!   stlxp  st, lo, hi, [dst]    ; write back what was read
//!   cbnz   st, retry
//! ```
//!
//! A pair load is only single-copy atomic once a store-exclusive to the same
//! address succeeds, so the mismatch path stores the observed value back
//! and retries until that store lands. Either way the pair returned is one
//! the memory actually held. This works on every ARMv8.0 core; `casp`
//! would need LSE.

use std::arch::asm;

/// Atomically compare the 16 bytes at `dst` with `expected` and replace
/// them with `new` if equal. Returns the value observed at `dst`.
///
/// # Safety
/// `dst` must be valid for reads and writes, 16-byte aligned, and only
/// accessed atomically for as long as other threads can reach it.
#[inline]
pub unsafe fn cas128(dst: *mut u128, expected: u128, new: u128) -> u128 {
    debug_assert_eq!(dst as usize % 16, 0, "ldaxp/stlxp need 16-byte alignment");

    let prev_lo: u64;
    let prev_hi: u64;

    asm!(
        "2:",
        "ldaxp {prev_lo}, {prev_hi}, [{dst}]",
        "cmp {prev_lo}, {exp_lo}",
        "ccmp {prev_hi}, {exp_hi}, #0, eq",
        "b.ne 3f",
        "stlxp {status:w}, {new_lo}, {new_hi}, [{dst}]",
        "cbnz {status:w}, 2b",
        "b 4f",
        "3:",
        "stlxp {status:w}, {prev_lo}, {prev_hi}, [{dst}]",
        "cbnz {status:w}, 2b",
        "4:",
        dst = in(reg) dst,
        exp_lo = in(reg) (expected as u64),
        exp_hi = in(reg) ((expected >> 64) as u64),
        new_lo = in(reg) (new as u64),
        new_hi = in(reg) ((new >> 64) as u64),
        prev_lo = out(reg) prev_lo,
        prev_hi = out(reg) prev_hi,
        status = out(reg) _,
        options(nostack),
    );

    (prev_lo as u128) | ((prev_hi as u128) << 64)
}
