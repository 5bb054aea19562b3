//! Capture/restore of continuations and construction-time stack carving.
//!
//! This is the only place outside of `arch` that touches raw register state.

use core::mem;
use core::ptr;

use crate::arch::{self, Continuation, EntryFunc, STACK_ALIGNMENT};
use crate::coroutine::Coroutine;
use crate::diag::{fatal, Fault};
use crate::identity;
use crate::stack::Stack;

/// Space that must remain below a carved start frame for the entry function
/// and the first few calls of the body.
const ENTRY_RESERVE: usize = 256;

/// Dispatch tag delivered to a continuation when it is restored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(usize)]
pub(crate) enum Tag {
    /// Zero. A capture point that was never restored; never delivered by a
    /// well-formed switch.
    Immediate = 0,
    /// The callee continuation is entered for the first time.
    Start = 1,
    /// The callee continuation is re-entered after a yield.
    Resume = 2,
    /// The caller continuation is re-entered after the callee yielded or
    /// completed.
    Returned = 3,
}

impl Tag {
    #[inline]
    fn from_raw(raw: usize) -> Option<Self> {
        match raw {
            0 => Some(Tag::Immediate),
            1 => Some(Tag::Start),
            2 => Some(Tag::Resume),
            3 => Some(Tag::Returned),
            _ => None,
        }
    }

    /// Checks that this is the tag `site` expects to be re-entered with.
    #[inline]
    #[track_caller]
    pub(crate) fn require(self, expected: Tag, site: &'static str) {
        ensure!(
            self == expected,
            Fault::UnexpectedTag {
                site,
                tag: self as usize
            }
        );
    }
}

cfg_if::cfg_if! {
    if #[cfg(all(target_arch = "arm", target_os = "none"))] {
        use core::sync::atomic::{AtomicBool, Ordering};

        // Interrupt enable state of the side that started the transfer in
        // flight. Only touched with interrupts masked.
        static HANDOFF_ENABLED: AtomicBool = AtomicBool::new(false);

        #[inline(always)]
        fn mask_transfer() {
            let enabled = cortex_m::register::primask::read().is_active();
            cortex_m::interrupt::disable();
            HANDOFF_ENABLED.store(enabled, Ordering::Relaxed);
        }

        /// Ends the masked window opened by the transfer that just arrived
        /// here, restoring the interrupt state its sender had.
        #[inline(always)]
        pub(crate) fn finish_transfer() {
            if HANDOFF_ENABLED.load(Ordering::Relaxed) {
                unsafe { cortex_m::interrupt::enable() }
            }
        }
    } else {
        // Hosted targets have no interrupts that drive coroutines.
        #[inline(always)]
        fn mask_transfer() {}

        #[inline(always)]
        pub(crate) fn finish_transfer() {}
    }
}

/// Captures the current execution state into `save` and restores `restore`,
/// delivering `tag`.
///
/// The identity slot travels with the continuations: its current value is
/// recorded in `save` and the value recorded in `restore` is installed, so
/// whichever switch later restores `save` also puts our identity back.
///
/// On bare metal, interrupts are masked from the identity update until the
/// other side is running, so no handler ever observes an identity that
/// doesn't match the stack it runs on. The receiving side unmasks through
/// [`finish_transfer`].
///
/// Returns the tag delivered when `save` is eventually restored.
///
/// # Safety
///
/// `restore` must have been captured by a previous switch or prepared by
/// [`carve`], and must not be restored more than once per capture.
#[inline(always)]
pub(crate) unsafe fn switch(save: *mut Continuation, restore: *const Continuation, tag: Tag) -> Tag {
    mask_transfer();
    (*save).set_identity(identity::get());
    identity::set((*restore).identity());

    let raw = arch::switch(save, restore, tag as usize);
    finish_transfer();
    match Tag::from_raw(raw) {
        Some(tag) => tag,
        None => fatal(Fault::UnexpectedTag {
            site: "switch",
            tag: raw,
        }),
    }
}

/// Prepares `callee` so that the first switch into it enters `entry` on
/// `stack`, with `obj` moved to the top of that stack.
///
/// The stack gets a zeroed frame record at its base which the frame pointer of
/// the new continuation points to, so frame pointer walks terminate there.
/// `identity` is burned into the continuation: entering it makes that
/// coroutine current.
///
/// Returns the address `obj` was moved to.
///
/// # Safety
///
/// The stack must outlive every use of `callee`. The returned object must be
/// read or dropped exactly once.
pub(crate) unsafe fn carve<T>(
    stack: &dyn Stack,
    callee: &mut Continuation,
    identity: *const Coroutine,
    entry: EntryFunc,
    obj: T,
) -> *mut T {
    let base = stack.base().get();
    let limit = stack.limit().get();
    let available = base - limit;

    // Terminal frame record: (previous frame, return address), both null.
    let mut sp = base - 2 * mem::size_of::<usize>();
    ptr::write_bytes(sp as *mut usize, 0, 2);
    let frame_record = sp;

    // Move the object below it with at least stack alignment, so the
    // initial stack pointer is already aligned.
    let align = mem::align_of::<T>().max(STACK_ALIGNMENT);
    sp = sp.wrapping_sub(mem::size_of::<T>()) & !(align - 1);

    let needed = base.wrapping_sub(sp) + ENTRY_RESERVE;
    if sp < limit || needed > available {
        // The object is still owned here; it is leaked along with the
        // process.
        mem::forget(obj);
        fatal(Fault::FrameTooLarge { needed, available });
    }

    let obj_ptr = sp as *mut T;
    obj_ptr.write(obj);

    arch::init_continuation(callee, sp, entry);
    callee.set_fp(frame_record);
    callee.set_identity(identity);

    log::trace!(
        "carved {} byte start frame for coroutine {:p} (stack {:#x}..{:#x})",
        base - sp,
        identity,
        limit,
        base
    );

    obj_ptr
}
