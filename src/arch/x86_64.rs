//! This file contains the low level operations that deal with switching between
//! continuations on x86_64 (System V).
//!
//! ## Continuation layout
//!
//! ```text
//! +--------------+  <- offset 0
//! | Saved RSP    |
//! +--------------+  <- offset 8
//! | Saved RBP    |  <- Frame pointer
//! +--------------+  <- offset 16
//! | Saved RBX    |
//! +--------------+  <- offset 24
//! | Resume RIP   |
//! +--------------+  <- offset 32
//! | Identity     |
//! +--------------+
//! ```
//!
//! RBX and RBP are LLVM reserved registers and cannot be handed to the
//! compiler as clobbers, so they are stored in the continuation along with the
//! stack pointer and the address to resume at. R12-R15 are declared as
//! clobbers instead: the compiler spills them in the frame around the switch
//! if it needs them, which is cheaper when several switches are made from the
//! same function.
//!
//! ## Stack layout
//!
//! This is the stack layout of a coroutine that has just been carved:
//!
//! ```text
//! +--------------+  <- Stack base
//! | Frame record |  <- Zeroed (previous RBP, return address) pair. RBP
//! +--------------+     points here so that frame pointer walks stop.
//! |              |
//! ~  Body obj    ~  <- Moved here from the constructing frame.
//! |              |
//! +--------------+
//! | Padding      |
//! +--------------+
//! | Return addr  |  <- Null. The entry function never returns.
//! +--------------+  <- Initial stack pointer
//! ```

use core::arch::asm;
use core::sync::atomic::{compiler_fence, Ordering};

use super::{align_down, Continuation, EntryFunc};

pub const STACK_ALIGNMENT: usize = 16;
pub const CONTINUATION_WORDS: usize = 4;
pub const SP_SLOT: usize = 0;
pub const FP_SLOT: usize = 1;
pub const PC_SLOT: usize = 3;

/// Points `cont` at `entry` running on a stack whose usable top is `sp`.
///
/// `entry` is jumped to rather than called, so a null return address is
/// pushed to give it the stack alignment it expects on function entry
/// (RSP + 8 is a multiple of 16).
#[inline]
pub unsafe fn init_continuation(cont: &mut Continuation, sp: usize, entry: EntryFunc) {
    let mut sp = align_down(sp);
    sp -= 8;
    *(sp as *mut u64) = 0;

    cont.set_sp(sp);
    cont.set_pc(entry as usize);
}

/// Saves the current execution state into `save`, restores `restore` and
/// delivers `tag` to it.
///
/// Returns the tag delivered by whichever switch eventually restores `save`.
///
/// If `restore` has never been captured and was instead set up by
/// `init_continuation`, the entry function receives `save`, `restore` and
/// `tag` as its arguments.
// This must be inlined so that the resume address stays in the function that
// performs the switch, next to the registers spilled for it.
#[inline(always)]
pub unsafe fn switch(save: *mut Continuation, restore: *const Continuation, tag: usize) -> usize {
    let received: usize;

    asm!(
        // Compute the address execution continues at when `save` is
        // restored: the 2: label at the end of this block.
        "lea rax, [rip + 2f]",

        // Capture. RBP and RBX are LLVM reserved registers so they are saved
        // here rather than being marked as clobbers.
        "mov [rdi], rsp",
        "mov [rdi + 8], rbp",
        "mov [rdi + 16], rbx",
        "mov [rdi + 24], rax",

        // Restore. After this point we are running on the target stack.
        "mov rsp, [rsi]",
        "mov rbp, [rsi + 8]",
        "mov rbx, [rsi + 16]",

        // Either the 2: label of a suspended switch or the entry function of
        // a freshly carved coroutine. In both cases RDX holds the tag.
        "jmp qword ptr [rsi + 24]",

        "2:",

        // RDI, RSI and RDX are the first three argument registers of the
        // System V ABI so that the entry function receives (caller, callee,
        // tag) without any shuffling.
        //
        // When we are switched back to, these hold whatever the other side
        // passed, which is why RDI and RSI are marked as clobbered.
        inout("rdi") save => _,
        inout("rsi") restore => _,
        inout("rdx") tag => received,

        // Mark all registers as clobbered. Most of the work is done by
        // clobber_abi, we just add the remaining callee-saved registers here.
        lateout("r12") _, lateout("r13") _, lateout("r14") _, lateout("r15") _,
        clobber_abi("sysv64"),
    );

    received
}

/// Trampoline instruction sequence, entered with no arguments:
///
/// ```text
/// lea rdi, [rip - 7]      ; address of the thunk itself
/// jmp qword ptr [rip + 3] ; tail-call the entry pointer at offset 16
/// int3
/// int3
/// int3
/// ```
pub const THUNK_CODE: [u8; 16] = [
    0x48, 0x8d, 0x3d, 0xf9, 0xff, 0xff, 0xff, // lea rdi, [rip - 7]
    0xff, 0x25, 0x03, 0x00, 0x00, 0x00, // jmp qword ptr [rip + 3]
    0xcc, 0xcc, 0xcc, // int3 padding up to the entry pointer
];

/// Bit to set in the thunk address to form a callable function pointer.
pub const THUNK_FN_BIT: usize = 0;

/// x86 keeps instruction fetch coherent with data writes, only the compiler
/// must not move the stores past the first call into the buffer.
#[inline]
pub unsafe fn flush_icache(_start: *const u8, _len: usize) {
    compiler_fence(Ordering::SeqCst);
}
