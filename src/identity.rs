//! The current-coroutine slot.
//!
//! Holds the address of the coroutine that is executing right now, or null at
//! baseline. It is only ever changed at transfer boundaries, and every change
//! is undone on the way out: a switch records the slot in the continuation it
//! saves and installs the value recorded in the continuation it restores, and
//! everything else goes through [`IdentityGuard`].

use core::ptr;

use crate::coroutine::Coroutine;

cfg_if::cfg_if! {
    if #[cfg(feature = "std")] {
        extern crate std;

        use core::cell::Cell;

        // Hosted builds run unrelated coroutine worlds on different OS threads
        // (the test harness does), so each thread gets its own slot.
        std::thread_local! {
            static CURRENT: Cell<*const Coroutine> = const { Cell::new(ptr::null()) };
        }

        #[inline]
        pub(crate) fn get() -> *const Coroutine {
            CURRENT.with(|current| current.get())
        }

        #[inline]
        pub(crate) fn set(coroutine: *const Coroutine) {
            CURRENT.with(|current| current.set(coroutine));
        }
    } else {
        use core::sync::atomic::{AtomicPtr, Ordering};

        // Null from process start: baseline code is outside any coroutine.
        static CURRENT: AtomicPtr<Coroutine> = AtomicPtr::new(ptr::null_mut());

        #[inline]
        pub(crate) fn get() -> *const Coroutine {
            CURRENT.load(Ordering::Relaxed)
        }

        #[inline]
        pub(crate) fn set(coroutine: *const Coroutine) {
            CURRENT.store(coroutine as *mut Coroutine, Ordering::Relaxed);
        }
    }
}

/// Installs an identity and puts the previous one back when dropped.
pub(crate) struct IdentityGuard {
    previous: *const Coroutine,
}

impl IdentityGuard {
    #[inline]
    pub(crate) fn enter(coroutine: *const Coroutine) -> Self {
        let previous = get();
        set(coroutine);
        Self { previous }
    }
}

impl Drop for IdentityGuard {
    #[inline]
    fn drop(&mut self) {
        set(self.previous);
    }
}
