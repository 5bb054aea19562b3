use alloc::boxed::Box;
use alloc::rc::Rc;
use core::cell::{Cell, UnsafeCell};
use core::marker::PhantomPinned;
use core::ops::{ControlFlow, Range};
use core::pin::Pin;
use core::ptr::{self, NonNull};
use core::slice;

use crate::arch::{entry_abi, Continuation};
use crate::continuation::{self, Tag};
use crate::diag::{fatal, Fault};
use crate::error::Error;
use crate::identity::{self, IdentityGuard};
use crate::local;
use crate::stack::{DefaultStack, Stack, DEFAULT_STACK_SIZE};
use crate::task::{Task, TaskCore};

/// Lifecycle state of a [`Coroutine`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum State {
    /// Constructed, never resumed.
    Ready,
    /// Resumed at least once, body has not returned yet.
    Running,
    /// The body has returned. Resuming is a no-op.
    Complete,
}

/// A stackful coroutine executing a closure on its own fixed stack.
///
/// The closure runs when the coroutine is first [resumed](Coroutine::resume)
/// and can suspend itself from any call depth with
/// [`Coroutine::yield_now`]. Control then returns to whoever resumed it,
/// which may be the main loop one time and an interrupt handler the next.
///
/// Coroutines are always pinned: their address is their identity, and it is
/// burned into the suspended register state.
///
/// # Dropping a coroutine
///
/// A coroutine must have completed before it is dropped. Dropping it in any
/// other state abandons a continuation whose stack frames can't be unwound,
/// and terminates the process. Use [`Coroutine::check_destroy`] to test for
/// this first.
pub struct Coroutine {
    core: TaskCore,
    state: Cell<State>,

    // Whether a resume() call into this coroutine is outstanding.
    active: Cell<bool>,

    // Where resume() was called from. Only valid while active.
    caller: UnsafeCell<Continuation>,

    // Where the coroutine continues: its start frame until the first resume,
    // then its last yield point. Valid until the coroutine completes.
    callee: UnsafeCell<Continuation>,

    // The body closure, moved to the top of the stack by carving. Consumed on
    // the first resume.
    body: Cell<*mut u8>,

    stack: Box<dyn Stack>,

    _pinned: PhantomPinned,
}

impl Coroutine {
    /// Creates a new coroutine which will execute `body` on a new stack of
    /// [`DEFAULT_STACK_SIZE`] bytes.
    ///
    /// # Panics
    ///
    /// Panics if the stack can't be allocated. Use [`Builder`](crate::Builder)
    /// to handle that case.
    pub fn new<F>(body: F) -> Pin<Box<Self>>
    where
        F: FnOnce() + 'static,
    {
        match DefaultStack::new(DEFAULT_STACK_SIZE) {
            Ok(stack) => Self::with_stack(stack, body),
            Err(e) => panic!("failed to allocate coroutine stack: {}", e),
        }
    }

    /// Creates a new coroutine which will execute `body` on the given stack.
    pub fn with_stack<S, F>(stack: S, body: F) -> Pin<Box<Self>>
    where
        S: Stack + 'static,
        F: FnOnce() + 'static,
    {
        let coroutine = Box::pin(Self {
            core: TaskCore::new(),
            state: Cell::new(State::Ready),
            active: Cell::new(false),
            caller: UnsafeCell::new(Continuation::new()),
            callee: UnsafeCell::new(Continuation::new()),
            body: Cell::new(ptr::null_mut()),
            stack: Box::new(stack),
            _pinned: PhantomPinned,
        });

        // The heap allocation is pinned, so this address stays valid for the
        // lifetime of the coroutine.
        let this: *const Self = &*coroutine;
        unsafe {
            let body = continuation::carve(
                &*coroutine.stack,
                &mut *coroutine.callee.get(),
                this,
                coroutine_main::<F>,
                body,
            );
            coroutine.body.set(body.cast());
        }

        coroutine
    }

    /// Runs a whole sketch, a `setup`/`loop` pair, inside a new coroutine.
    ///
    /// `setup` runs once on the first resume. After that `loop_body` runs
    /// once per resume, with a yield after every iteration, until it returns
    /// [`ControlFlow::Break`]. A sketch that never breaks never completes and
    /// so can never be dropped.
    pub fn sketch<S, L>(setup: S, mut loop_body: L) -> Pin<Box<Self>>
    where
        S: FnOnce() + 'static,
        L: FnMut() -> ControlFlow<()> + 'static,
    {
        Self::new(move || {
            setup();
            while loop_body().is_continue() {
                Self::yield_now();
            }
        })
    }

    /// Runs the coroutine until it yields or its body returns.
    ///
    /// This is a no-op if the coroutine has already completed.
    pub fn resume(&self) {
        self.core.verify();

        let tag = match self.state.get() {
            State::Complete => return,
            State::Ready => Tag::Start,
            State::Running => Tag::Resume,
        };
        ensure!(!self.active.get(), Fault::Reentered);

        self.active.set(true);
        let received = unsafe { continuation::switch(self.caller.get(), self.callee.get(), tag) };
        self.active.set(false);

        received.require(Tag::Returned, "resume");
    }

    /// Suspends the current coroutine, returning control to the code that
    /// resumed it. The call returns when the coroutine is next resumed.
    ///
    /// Outside of any coroutine this does nothing, so blocking helpers built
    /// on it degrade into busy loops when called from the main loop.
    pub fn yield_now() {
        let current = identity::get();
        if current.is_null() {
            return;
        }
        unsafe { (*current).suspend() }
    }

    fn suspend(&self) {
        self.core.verify();
        let state = self.state.get();
        ensure!(state == State::Running, Fault::NotRunning { state });

        let received = unsafe { continuation::switch(self.callee.get(), self.caller.get(), Tag::Returned) };
        received.require(Tag::Resume, "yield");
    }

    /// Yields until `test` returns `true`. The condition is checked after
    /// each yield, never before the first one.
    pub fn wait(mut test: impl FnMut() -> bool) {
        loop {
            Self::yield_now();
            if test() {
                break;
            }
        }
    }

    /// Returns the coroutine which is executing right now, or `None` when
    /// called outside of any coroutine.
    #[inline]
    pub fn current() -> Option<NonNull<Coroutine>> {
        NonNull::new(identity::get() as *mut Coroutine)
    }

    /// Returns the lifecycle state of the coroutine.
    #[inline]
    pub fn state(&self) -> State {
        self.core.verify();
        self.state.get()
    }

    /// Returns whether a call to [`resume`](Coroutine::resume) is currently
    /// executing this coroutine.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.core.verify();
        self.active.get()
    }

    /// Returns the address range of the stack buffer.
    pub fn stack_bounds(&self) -> Range<*const u8> {
        self.core.verify();
        self.stack.limit().get() as *const u8..self.stack.base().get() as *const u8
    }

    /// Estimates the largest number of stack bytes used so far.
    ///
    /// Stacks start out zero-filled, so this is the distance from the stack
    /// base to the lowest non-zero byte above the coroutine-local heap. Frames
    /// which happened to write only zeroes are missed.
    pub fn estimate_stack_peak_usage(&self) -> usize {
        self.core.verify();
        let limit = self.stack.limit().get();
        let base = self.stack.base().get();
        let start = limit + local::heap_top().min(base - limit);

        let bytes = unsafe { slice::from_raw_parts(start as *const u8, base - start) };
        match bytes.iter().position(|&b| b != 0) {
            Some(offset) => base - (start + offset),
            None => 0,
        }
    }

    /// Returns the number of bytes reserved at the bottom of every stack for
    /// coroutine-local variables.
    pub fn local_usage() -> usize {
        local::heap_top()
    }

    /// Records an action to run at the end of the next
    /// [`Task::invoke`] of this coroutine, after the iteration has returned
    /// to the driver. The action runs as if from inside this coroutine.
    ///
    /// This is how a [`Hop`](crate::Hop) hands the suspended coroutine to a
    /// different driver: the attach action typically enables the interrupt
    /// which will resume it next.
    pub fn set_hop(&self, action: impl Fn() + 'static) {
        self.core.verify();
        let this: *const Self = self;
        self.core.set_hop_action(Rc::new(move || {
            let _identity = IdentityGuard::enter(this);
            action();
        }));
    }

    /// Checks whether the coroutine may be dropped.
    ///
    /// Returns [`Error::Incomplete`] unless the body has returned.
    pub fn check_destroy(&self) -> Result<(), Error> {
        self.core.verify();
        match self.state.get() {
            State::Complete => Ok(()),
            state => Err(Error::Incomplete(state)),
        }
    }
}

impl Task for Coroutine {
    #[inline]
    fn core(&self) -> &TaskCore {
        &self.core
    }

    #[inline]
    fn run_iteration(&self) {
        self.resume();
    }
}

impl Drop for Coroutine {
    fn drop(&mut self) {
        self.core.verify();
        let state = self.state.get();
        ensure!(state == State::Complete, Fault::Abandoned { state });
    }
}

// A panic must not unwind past the entry frame: there is nothing above it on
// the coroutine stack.
cfg_if::cfg_if! {
    if #[cfg(feature = "std")] {
        fn run_body<F: FnOnce()>(body: F) {
            extern crate std;
            use std::panic::{self, AssertUnwindSafe};

            if panic::catch_unwind(AssertUnwindSafe(body)).is_err() {
                fatal(Fault::BodyPanicked);
            }
        }
    } else {
        fn run_body<F: FnOnce()>(body: F) {
            let guard = scopeguard::guard((), |()| fatal(Fault::BodyPanicked));
            body();
            scopeguard::ScopeGuard::into_inner(guard);
        }
    }
}

// Entered by the first switch into a coroutine, on the coroutine's own stack,
// with the coroutine's identity already installed.
entry_abi! {
    unsafe fn coroutine_main<F>(caller: *mut Continuation, callee: *mut Continuation, tag: usize) -> !
    where
        F: FnOnce(),
    {
        // Arrived here by a switch rather than by returning from one.
        continuation::finish_transfer();

        let coroutine = identity::get();
        ensure!(!coroutine.is_null(), Fault::NoIdentity);
        let coroutine = &*coroutine;
        ensure!(
            tag == Tag::Start as usize,
            Fault::UnexpectedTag {
                site: "coroutine start",
                tag
            }
        );
        debug_assert_eq!(caller, coroutine.caller.get());
        debug_assert_eq!(callee, coroutine.callee.get());

        coroutine.state.set(State::Running);

        let body = coroutine.body.replace(ptr::null_mut()).cast::<F>().read();

        run_body(body);

        coroutine.state.set(State::Complete);
        log::trace!("coroutine {:p} complete", coroutine);

        let tag = continuation::switch(coroutine.callee.get(), coroutine.caller.get(), Tag::Returned);

        // A completed coroutine is never resumed.
        fatal(Fault::UnexpectedTag {
            site: "completed coroutine",
            tag: tag as usize,
        })
    }
}
