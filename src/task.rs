//! Invokable units of work driven from a main loop or an interrupt handler.

use alloc::boxed::Box;
use alloc::rc::Rc;
use core::cell::Cell;
use core::ops::Deref;
use core::pin::Pin;
use core::sync::atomic::{fence, Ordering};

use crate::diag::Fault;

/// Identity marker stored in every live task: `"GCo1"` read as a
/// little-endian word.
const MAGIC: u32 = u32::from_le_bytes(*b"GCo1");

/// Deferred action recorded by [`Coroutine::set_hop`](crate::Coroutine::set_hop).
pub(crate) type HopAction = Rc<dyn Fn()>;

/// State shared by every [`Task`] implementation: the identity marker and the
/// pending hop action.
pub struct TaskCore {
    magic: Cell<u32>,
    hop: Cell<Option<HopAction>>,
}

impl TaskCore {
    /// Creates the core of a new, valid task with no pending hop action.
    pub const fn new() -> Self {
        Self {
            magic: Cell::new(MAGIC),
            hop: Cell::new(None),
        }
    }

    /// Terminates the process unless the identity marker is intact.
    #[inline]
    #[track_caller]
    pub(crate) fn verify(&self) {
        ensure!(
            self.magic.get() == MAGIC,
            Fault::Corrupted {
                object: self as *const Self as usize
            }
        );
    }

    /// Overwrites the identity marker, as a stray write would.
    #[cfg(test)]
    pub(crate) fn corrupt(&self) {
        self.magic.set(!MAGIC);
    }

    /// Records `action` to be run at the end of the next [`Task::invoke`],
    /// replacing any action recorded before.
    pub fn set_hop(&self, action: impl Fn() + 'static) {
        self.set_hop_action(Rc::new(action));
    }

    pub(crate) fn set_hop_action(&self, action: HopAction) {
        self.hop.set(Some(action));
    }

    pub(crate) fn take_hop(&self) -> Option<HopAction> {
        self.hop.take()
    }
}

impl Default for TaskCore {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TaskCore {
    fn drop(&mut self) {
        // Any later use of this memory as a task is detected as corruption.
        self.magic.set(0);
    }
}

/// A unit of work that can be invoked repeatedly, by a driver loop or through
/// an interrupt vector.
pub trait Task {
    /// Returns the shared task state.
    fn core(&self) -> &TaskCore;

    /// Runs one unit of work.
    fn run_iteration(&self);

    /// Runs one unit of work, then applies the pending hop action, if any.
    ///
    /// The hop action may enable an interrupt whose handler invokes this very
    /// task again, so it is the last thing done here, after a release fence
    /// that publishes everything `run_iteration` wrote.
    fn invoke(&self) {
        let core = self.core();
        core.verify();
        self.run_iteration();
        if let Some(hop) = core.take_hop() {
            fence(Ordering::Release);
            hop();
        }
    }
}

/// A task whose unit of work is a plain closure, typically a per-tick state
/// machine.
pub struct FnTask<F> {
    core: TaskCore,
    f: F,
}

impl<F: Fn()> FnTask<F> {
    /// Wraps `f` as a task.
    pub const fn new(f: F) -> Self {
        Self {
            core: TaskCore::new(),
            f,
        }
    }
}

impl<F: Fn()> Task for FnTask<F> {
    #[inline]
    fn core(&self) -> &TaskCore {
        &self.core
    }

    #[inline]
    fn run_iteration(&self) {
        (self.f)()
    }
}

// Invoking a boxed trait object dispatches through its vtable.
impl<T: Task + ?Sized> Task for Box<T> {
    #[inline]
    fn core(&self) -> &TaskCore {
        (**self).core()
    }

    #[inline]
    fn run_iteration(&self) {
        (**self).run_iteration()
    }

    #[inline]
    fn invoke(&self) {
        (**self).invoke()
    }
}

// Lets a pinned coroutine be driven or vectored as a task.
impl<P> Task for Pin<P>
where
    P: Deref,
    P::Target: Task,
{
    #[inline]
    fn core(&self) -> &TaskCore {
        (**self).core()
    }

    #[inline]
    fn run_iteration(&self) {
        (**self).run_iteration()
    }

    #[inline]
    fn invoke(&self) {
        (**self).invoke()
    }
}
