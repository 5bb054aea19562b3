//! Low-level ARM support.
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
//! +--------------+  <- offset 4
//! | Saved R7     |
//! +--------------+  <- offset 8
//! | Saved R11    |
//! +--------------+  <- offset 12
//! | Saved R6     |
//! +--------------+  <- offset 16
//! | Saved R9     |
//! +--------------+  <- offset 20
//! | Resume PC    |  <- Has the low bit set when resuming into Thumb code.
//! +--------------+  <- offset 24
//! | Identity     |
//! +--------------+
//! ```
//!
//! The frame pointer is either R7 or R11 depending on the target and R9 may
//! or may not be reserved. Rather than probing every combination, all four
//! are saved in the continuation. The code only uses instructions that are
//! available in Thumb-1 so that it also works on Cortex-M0.

use core::arch::asm;

use super::{align_down, Continuation, EntryFunc};

// Thumb symbols have their lowest bit set, which requires some special
// handling. When computing the address of a Thumb label using ADR, we need to
// manually set the low bit of the address to ensure we get the correct
// address.
cfg_if::cfg_if! {
    if #[cfg(all(is_thumb, has_thumb2))] {
        macro_rules! thumb_symbol_adr {
            ($reg:expr, $sym:expr) => {
                concat!("adr ", $reg, ", ", $sym, " + 1")
            };
        }
    } else if #[cfg(is_thumb)] {
        // Thumb1 ADR can only represent addresses that are a multiple of 4.
        macro_rules! thumb_symbol_adr {
            ($reg:expr, $sym:expr) => {
                concat!("adr ", $reg, ", ", $sym, "\n", "adds ", $reg, ", ", $reg, ", #1")
            };
        }
    } else {
        macro_rules! thumb_symbol_adr {
            ($reg:expr, $sym:expr) => {
                concat!("adr ", $reg, ", ", $sym)
            };
        }
    }
}

pub const STACK_ALIGNMENT: usize = 8;
pub const CONTINUATION_WORDS: usize = 6;
pub const SP_SLOT: usize = 0;
#[cfg(fp_is_r7)]
pub const FP_SLOT: usize = 1;
#[cfg(not(fp_is_r7))]
pub const FP_SLOT: usize = 2;
pub const PC_SLOT: usize = 5;

#[inline]
pub unsafe fn init_continuation(cont: &mut Continuation, sp: usize, entry: EntryFunc) {
    cont.set_sp(align_down(sp));
    // Function pointers to Thumb code already carry the low bit, which BX
    // uses to select the instruction set.
    cont.set_pc(entry as usize);
}

#[inline(always)]
pub unsafe fn switch(save: *mut Continuation, restore: *const Continuation, tag: usize) -> usize {
    let received: usize;

    asm!(
        // R3 is the only scratch register: Thumb-1 can't store SP or the high
        // registers directly.
        thumb_symbol_adr!("r3", "2f"),
        "str r3, [r0, #20]",
        "mov r3, sp",
        "str r3, [r0, #0]",
        "str r7, [r0, #4]",
        "mov r3, r11",
        "str r3, [r0, #8]",
        "str r6, [r0, #12]",
        "mov r3, r9",
        "str r3, [r0, #16]",

        "ldr r3, [r1, #0]",
        "mov sp, r3",
        "ldr r7, [r1, #4]",
        "ldr r3, [r1, #8]",
        "mov r11, r3",
        "ldr r6, [r1, #12]",
        "ldr r3, [r1, #16]",
        "mov r9, r3",
        "ldr r3, [r1, #20]",
        "bx r3",

        // Thumb-1 ADR needs a word-aligned target.
        ".balign 4",
        "2:",

        inout("r0") save => _,
        inout("r1") restore => _,
        inout("r2") tag => received,

        lateout("r4") _, lateout("r5") _, lateout("r8") _, lateout("r10") _,
        lateout("q4") _, lateout("q5") _, lateout("q6") _, lateout("q7") _,
        clobber_abi("C"),
    );

    received
}

cfg_if::cfg_if! {
    if #[cfg(is_thumb)] {
        /// Trampoline instruction sequence (Thumb):
        ///
        /// ```text
        /// mov r0, pc        ; PC reads as this instruction + 4
        /// subs r0, #4       ; address of the thunk itself
        /// ldr r1, [r0, #8]  ; entry pointer at offset 8
        /// bx r1
        /// ```
        pub const THUNK_CODE: [u8; 8] = halfwords_le([0x4678, 0x3804, 0x6881, 0x4708]);

        /// The thunk is Thumb code, so pointers to it need the low bit set.
        pub const THUNK_FN_BIT: usize = 1;

        const fn halfwords_le(halfwords: [u16; 4]) -> [u8; 8] {
            let mut out = [0; 8];
            let mut i = 0;
            while i < 4 {
                let bytes = halfwords[i].to_le_bytes();
                out[i * 2] = bytes[0];
                out[i * 2 + 1] = bytes[1];
                i += 1;
            }
            out
        }
    } else {
        /// Trampoline instruction sequence (A32):
        ///
        /// ```text
        /// sub r0, pc, #8    ; PC reads as this instruction + 8
        /// ldr r1, [r0, #16] ; entry pointer at offset 16
        /// bx r1
        /// nop
        /// ```
        pub const THUNK_CODE: [u8; 16] =
            words_le([0xe24f_0008, 0xe590_1010, 0xe12f_ff11, 0xe1a0_0000]);

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
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "none")] {
        /// Cortex-M cores have no coherent instruction cache to clean, but
        /// the write buffer must drain and the pipeline must be refetched.
        #[inline]
        pub unsafe fn flush_icache(_start: *const u8, _len: usize) {
            cortex_m::asm::dsb();
            cortex_m::asm::isb();
        }
    }
}
