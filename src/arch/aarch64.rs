//! Low-level AArch64 support.
//!
//! This file is heavily based on the x86_64 implementation.
//! Relevant differences are highlighted in comments, but otherwise most
//! comments have been removed to avoid duplication. Refer to x86_64.rs for
//! detailed comments about what is happening in this file.
//!
//! ## Continuation layout
//!
//! ```text
//! +--------------+  <- offset 0
//! | Saved SP     |
//! +--------------+  <- offset 8
//! | Saved X29    |  <- Frame pointer
//! +--------------+  <- offset 16
//! | Saved X19    |  <- LLVM uses this as the base pointer.
//! +--------------+  <- offset 24
//! | Resume PC    |
//! +--------------+  <- offset 32
//! | Identity     |
//! +--------------+
//! ```
//!
//! Unlike x86_64, no fake return address is needed on a freshly carved stack:
//! the link register is not part of the stack on AArch64.

use core::arch::asm;

use super::{align_down, Continuation, EntryFunc};

pub const STACK_ALIGNMENT: usize = 16;
pub const CONTINUATION_WORDS: usize = 4;
pub const SP_SLOT: usize = 0;
pub const FP_SLOT: usize = 1;
pub const PC_SLOT: usize = 3;

#[inline]
pub unsafe fn init_continuation(cont: &mut Continuation, sp: usize, entry: EntryFunc) {
    cont.set_sp(align_down(sp));
    cont.set_pc(entry as usize);
}

#[inline(always)]
pub unsafe fn switch(save: *mut Continuation, restore: *const Continuation, tag: usize) -> usize {
    let received: usize;

    asm!(
        "adr x9, 2f",

        // SP can't be stored with STP directly, go through a scratch
        // register.
        "mov x10, sp",
        "stp x10, x29, [x0]",
        "stp x19, x9, [x0, #16]",

        "ldp x10, x29, [x1]",
        "ldp x19, x9, [x1, #16]",
        "mov sp, x10",
        "br x9",

        "2:",

        // X0-X2 are the first three argument registers, see x86_64.rs.
        inout("x0") save => _,
        inout("x1") restore => _,
        inout("x2") tag => received,

        // X18 is the platform register and is never touched. X19 and X29 are
        // saved above, the rest of the callee-saved registers are clobbers.
        // clobber_abi covers X30 and all of V0-V31.
        lateout("x20") _, lateout("x21") _, lateout("x22") _, lateout("x23") _,
        lateout("x24") _, lateout("x25") _, lateout("x26") _, lateout("x27") _,
        lateout("x28") _,
        clobber_abi("C"),
    );

    received
}

/// Trampoline instruction sequence:
///
/// ```text
/// adr x0, .          ; address of the thunk itself
/// ldr x16, #12       ; entry pointer at offset 16
/// br x16
/// nop
/// ```
pub const THUNK_CODE: [u8; 16] = words_le([0x1000_0000, 0x5800_0070, 0xd61f_0200, 0xd503_201f]);

pub const THUNK_FN_BIT: usize = 0;

const fn words_le(words: [u32; 4]) -> [u8; 16] {
    let mut out = [0; 16];
    let mut i = 0;
    while i < 4 {
        let bytes = words[i].to_le_bytes();
        out[i * 4] = bytes[0];
        out[i * 4 + 1] = bytes[1];
        out[i * 4 + 2] = bytes[2];
        out[i * 4 + 3] = bytes[3];
        i += 1;
    }
    out
}

/// Cleans the data cache and invalidates the instruction cache to the point
/// of unification for the given range.
pub unsafe fn flush_icache(start: *const u8, len: usize) {
    let ctr: u64;
    asm!("mrs {}, ctr_el0", out(reg) ctr, options(nomem, nostack, preserves_flags));

    // Line sizes are encoded as log2 of the number of 4-byte words.
    let dline = 4usize << ((ctr >> 16) & 0xf);
    let iline = 4usize << (ctr & 0xf);

    let start = start as usize;
    let end = start + len;

    let mut addr = start & !(dline - 1);
    while addr < end {
        asm!("dc cvau, {}", in(reg) addr, options(nostack, preserves_flags));
        addr += dline;
    }
    asm!("dsb ish", options(nostack, preserves_flags));

    let mut addr = start & !(iline - 1);
    while addr < end {
        asm!("ic ivau, {}", in(reg) addr, options(nostack, preserves_flags));
        addr += iline;
    }
    asm!("dsb ish", "isb", options(nostack, preserves_flags));
}
