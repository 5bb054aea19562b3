//! Redirecting which driver resumes a coroutine.
//!
//! A coroutine which is about to wait for an event can hand its pending
//! continuation to whichever context delivers that event. For example a
//! coroutine reading a UART normally runs from the main loop; while it is
//! blocked on a byte it attaches to the UART interrupt (enables it), so that
//! the interrupt handler resumes it directly, and detaches again afterwards.
//!
//! Attaching is deferred: it is recorded as the coroutine's pending hop action
//! and only applied by [`Task::invoke`](crate::Task::invoke) once the
//! iteration has returned to the driver that is giving the coroutine up.
//! Detaching happens synchronously.

use alloc::rc::Rc;
use core::cell::RefCell;
use core::ptr::NonNull;

use crate::coroutine::Coroutine;
use crate::diag::{fatal, Fault};
use crate::task::Task;

type Action = Rc<dyn Fn()>;

crate::coroutine_local! {
    // Innermost live descriptor of the running coroutine.
    static CURRENT_HOP: Option<NonNull<Hop>> = None;
}

/// An active attach/detach pair of a coroutine.
///
/// Descriptors only exist inside [`Hop::scope`], so they nest like the
/// scopes that create them. Entering a scope detaches the enclosing
/// descriptor and arms the new attach action. Leaving it detaches and
/// re-arms the enclosing attach action.
pub struct Hop {
    owner: NonNull<Coroutine>,
    attach: RefCell<Action>,
    detach: RefCell<Action>,
    previous: Option<NonNull<Hop>>,
}

impl Hop {
    /// Runs `f` with the current coroutine attached through `attach` and
    /// `detach`.
    ///
    /// Terminates the process if called outside of a coroutine.
    pub fn scope<A, D, F, R>(attach: A, detach: D, f: F) -> R
    where
        A: Fn() + 'static,
        D: Fn() + 'static,
        F: FnOnce(&Hop) -> R,
    {
        let owner = match Coroutine::current() {
            Some(owner) => owner,
            None => fatal(Fault::HopAtBaseline),
        };

        let previous = CURRENT_HOP.get();
        if let Some(previous) = previous {
            unsafe { previous.as_ref() }.run_detach();
        }

        let hop = scopeguard::guard(
            Hop {
                owner,
                attach: RefCell::new(Rc::new(attach)),
                detach: RefCell::new(Rc::new(detach)),
                previous,
            },
            Hop::exit,
        );
        hop.arm();
        CURRENT_HOP.set(Some(NonNull::from(&*hop)));
        log::debug!(
            "coroutine {:p} entered hop {:p} (previous {:?})",
            owner,
            &*hop,
            previous
        );

        f(&*hop)
    }

    /// Replaces the attach/detach pair without changing the nesting depth.
    ///
    /// The current detach action runs immediately and `attach` is armed in
    /// place of the current attach action.
    pub fn hop<A, D>(&self, attach: A, detach: D)
    where
        A: Fn() + 'static,
        D: Fn() + 'static,
    {
        self.run_detach();
        *self.attach.borrow_mut() = Rc::new(attach);
        *self.detach.borrow_mut() = Rc::new(detach);
        self.arm();
        log::debug!("coroutine {:p} hopped in {:p}", self.owner, self);
    }

    fn arm(&self) {
        let attach = self.attach.borrow().clone();
        unsafe { self.owner.as_ref() }.set_hop(move || attach());
    }

    fn run_detach(&self) {
        // The action may call back into this descriptor.
        let detach = self.detach.borrow().clone();
        detach();
    }

    fn exit(self) {
        CURRENT_HOP.set(self.previous);
        self.run_detach();
        match self.previous {
            Some(previous) => unsafe { previous.as_ref() }.arm(),
            // Outermost scope: whatever attach is still pending belongs to a
            // descriptor that no longer exists.
            None => drop(unsafe { self.owner.as_ref() }.core().take_hop()),
        }
        log::debug!(
            "coroutine {:p} left hop, back to {:?}",
            self.owner,
            self.previous
        );
    }
}
