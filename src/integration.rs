//! Hooks for code that doesn't know about coroutines.

use crate::coroutine::Coroutine;

/// Yields the current coroutine, or does nothing outside of one.
///
/// Meant to be called from the idle or polling hook of blocking routines so
/// that they give up the processor while waiting.
#[inline]
pub fn idle() {
    Coroutine::yield_now();
}

/// The environment's idle hook. Blocking library routines that call `yield()`
/// while they poll become coroutine-aware.
#[cfg(feature = "idle-hook")]
#[export_name = "yield"]
pub extern "C" fn idle_hook() {
    idle();
}
