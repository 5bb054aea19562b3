//! ## Overview
//!
//! This crate provides cooperative, stackful coroutines for microcontroller firmware: long, logically sequential control flow (e.g. "wait for a byte") written as ordinary blocking code that still hands control back to a polling loop or interrupt handler between steps. Every coroutine owns a fixed stack buffer decided at construction time; nothing is allocated while it runs.
//!
//! A coroutine can suspend itself from any point in its call stack with [`Coroutine::yield_now`]. The driver that resumed it, whether the main loop or an interrupt handler, gets control back and resumes it again later.
//!
//! ## Example
//!
//! ```rust
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! use hopping::{Coroutine, State};
//!
//! let x = Rc::new(Cell::new(0));
//! let probe = x.clone();
//! let coroutine = Coroutine::new(move || {
//!     probe.set(1);
//!     Coroutine::yield_now();
//!     probe.set(2);
//!     Coroutine::yield_now();
//!     probe.set(3);
//! });
//!
//! coroutine.resume();
//! assert_eq!((x.get(), coroutine.state()), (1, State::Running));
//! coroutine.resume();
//! assert_eq!((x.get(), coroutine.state()), (2, State::Running));
//! coroutine.resume();
//! assert_eq!((x.get(), coroutine.state()), (3, State::Complete));
//!
//! // Resuming a completed coroutine does nothing.
//! coroutine.resume();
//! assert_eq!(x.get(), 3);
//! ```
//!
//! ## Hopping
//!
//! A coroutine's pending continuation can be handed from one driver to another, for example from the main loop to a UART interrupt while waiting for a byte. See [`Hop`] for the attach/detach protocol and [`Task`] for the point at which a deferred attach action is applied.
//!
//! ## Interrupt vectors
//!
//! Hardware vector tables only accept plain function pointers. [`Vectored`] synthesizes a small position-independent trampoline so that a bare `extern "C" fn()` invokes a specific [`Task`] object.
//!
//! ## Fatal errors
//!
//! Object corruption, unexpected dispatch tags and lifecycle violations (such as dropping a coroutine which has not completed) are not recoverable: the message is handed to the diagnostic sink (see [`set_diagnostic_sink`]) and the process is terminated.
//!
//! ## Cargo features
//!
//! This crate is compatible with `#![no_std]` (it requires `alloc`) when all Cargo features are disabled.
//!
//! #### `std` (Enabled by default)
//!
//! The current-coroutine slot and the baseline coroutine-local heap become per-thread, stacks are allocated with `mmap` and a guard page on unix, and fatal errors call `std::process::abort`.
//!
//! #### `idle-hook`
//!
//! Exports an `extern "C" fn yield()` which yields the running coroutine. Legacy blocking routines that call the environment's idle hook become coroutine-aware.

#![no_std]
#![warn(missing_docs)]

extern crate alloc;

// Must come first because it defines macros used by other modules.
#[macro_use]
mod diag;

mod arch;
mod config;
mod continuation;
mod coroutine;
mod error;
mod hop;
mod identity;
mod integration;
mod local;
pub mod stack;
mod task;
#[cfg(any(
    target_arch = "x86_64",
    target_arch = "aarch64",
    all(target_arch = "arm", target_os = "none")
))]
pub mod trampoline;

pub use config::Builder;
pub use coroutine::*;
pub use diag::set_diagnostic_sink;
pub use error::Error;
pub use hop::Hop;
pub use integration::idle;
pub use local::CoroutineLocal;
pub use task::{FnTask, Task, TaskCore};
#[cfg(any(
    target_arch = "x86_64",
    target_arch = "aarch64",
    all(target_arch = "arm", target_os = "none")
))]
pub use trampoline::{RamVector, Vectored};

// The tests rely on per-thread identity slots.
#[cfg(all(test, feature = "std"))]
mod tests;
