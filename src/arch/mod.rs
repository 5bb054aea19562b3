//! ABI adapter.
//!
//! Everything that depends on the register file and calling convention of
//! the target lives below this module: the layout of a [`Continuation`], the
//! inline assembly which captures one continuation while restoring another,
//! the initial register state of a freshly carved coroutine stack and the
//! instruction encodings used by the trampoline generator.
//!
//! Each architecture module provides:
//! - `STACK_ALIGNMENT`, the required stack alignment at a call boundary.
//! - `CONTINUATION_WORDS` and the `SP_SLOT`/`FP_SLOT`/`PC_SLOT` indices into
//!   the register snapshot.
//! - `switch`, which saves the current registers into one continuation,
//!   restores another and delivers a dispatch tag to it.
//! - `init_continuation`, which points a continuation at the entry function
//!   on a new stack.
//! - `THUNK_CODE`, `THUNK_FN_BIT` and `flush_icache` for the trampoline.

use core::mem;
use core::ptr;

use crate::coroutine::Coroutine;

// Calling convention of functions that are entered by a context switch or by
// a trampoline rather than by a normal call. On x86_64 this is forced to
// SysV64 so that the register assignments in the assembly code are fixed.
cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        macro_rules! entry_abi {
            (unsafe fn $($tt:tt)*) => {
                unsafe extern "sysv64" fn $($tt)*
            };
        }

        /// Function entered by the first switch into a coroutine.
        pub type EntryFunc = unsafe extern "sysv64" fn(
            caller: *mut Continuation,
            callee: *mut Continuation,
            tag: usize,
        ) -> !;

        /// Function tail-called by a trampoline with the thunk's address.
        #[allow(dead_code)]
        pub type ThunkFunc = unsafe extern "sysv64" fn(thunk: *const u8);
    } else {
        macro_rules! entry_abi {
            (unsafe fn $($tt:tt)*) => {
                unsafe extern "C" fn $($tt)*
            };
        }

        /// Function entered by the first switch into a coroutine.
        pub type EntryFunc = unsafe extern "C" fn(
            caller: *mut Continuation,
            callee: *mut Continuation,
            tag: usize,
        ) -> !;

        /// Function tail-called by a trampoline with the thunk's address.
        #[allow(dead_code)]
        pub type ThunkFunc = unsafe extern "C" fn(thunk: *const u8);
    }
}
pub(crate) use entry_abi;

cfg_if::cfg_if! {
    if #[cfg(all(target_arch = "x86_64", not(windows)))] {
        mod x86_64;
        pub use self::x86_64::*;
    } else if #[cfg(all(target_arch = "aarch64", not(windows)))] {
        mod aarch64;
        pub use self::aarch64::*;
    } else if #[cfg(all(target_arch = "arm", not(any(windows, target_vendor = "apple"))))] {
        mod arm;
        pub use self::arm::*;
    } else {
        compile_error!("Unsupported target");
    }
}

/// Register snapshot sufficient to resume execution where it was captured.
///
/// Only registers which cannot be handed to the compiler as clobbers are
/// stored here (stack pointer, frame pointer, LLVM-reserved registers and the
/// resume address); everything else callee-saved is spilled by the compiler
/// around the switch. The identity field is the current-coroutine slot value
/// belonging to this continuation: restoring the continuation restores it.
#[repr(C)]
pub struct Continuation {
    regs: [usize; CONTINUATION_WORDS],
    identity: *const Coroutine,
}

// The assembly code addresses the register slots by fixed offsets from the
// start of the structure.
const _: () = assert!(mem::offset_of!(Continuation, regs) == 0);
const _: () = assert!(
    mem::size_of::<Continuation>() == (CONTINUATION_WORDS + 1) * mem::size_of::<usize>()
);
const _: () = assert!(SP_SLOT < CONTINUATION_WORDS);
const _: () = assert!(FP_SLOT < CONTINUATION_WORDS);
const _: () = assert!(PC_SLOT < CONTINUATION_WORDS);

impl Continuation {
    /// A continuation that has never been captured.
    pub const fn new() -> Self {
        Self {
            regs: [0; CONTINUATION_WORDS],
            identity: ptr::null(),
        }
    }

    #[inline]
    pub fn set_sp(&mut self, sp: usize) {
        self.regs[SP_SLOT] = sp;
    }

    #[inline]
    pub fn set_fp(&mut self, fp: usize) {
        self.regs[FP_SLOT] = fp;
    }

    #[inline]
    pub fn set_pc(&mut self, pc: usize) {
        self.regs[PC_SLOT] = pc;
    }

    #[inline]
    pub fn identity(&self) -> *const Coroutine {
        self.identity
    }

    #[inline]
    pub fn set_identity(&mut self, identity: *const Coroutine) {
        self.identity = identity;
    }
}

/// Rounds `sp` down to `STACK_ALIGNMENT`.
#[inline]
pub fn align_down(sp: usize) -> usize {
    sp & !(STACK_ALIGNMENT - 1)
}
