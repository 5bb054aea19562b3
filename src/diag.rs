//! The single recovery-less error channel.
//!
//! Anything that implies undefined memory or register state (a corrupted
//! object, a continuation restored with the wrong dispatch tag, dropping a
//! coroutine that still has an outstanding continuation) ends up in [`fatal`]:
//! the reason is formatted together with the source location, handed to the
//! diagnostic sink, and the process is terminated. Nothing is unwound.

use core::fmt::{self, Write};
use core::mem;
use core::panic::Location;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use crate::coroutine::State;
use crate::identity::IdentityGuard;

/// Size of the buffer used to format a fatal message. Longer messages are
/// truncated.
const MESSAGE_CAPACITY: usize = 256;

/// Calls [`fatal`] with the given fault unless the condition holds.
macro_rules! ensure {
    ($cond:expr, $fault:expr) => {
        if !$cond {
            $crate::diag::fatal($fault)
        }
    };
}

/// Reasons for terminating the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Fault {
    /// The identity marker of an object did not match.
    Corrupted { object: usize },
    /// A continuation was re-entered with a dispatch tag that makes no sense
    /// at that point.
    UnexpectedTag { site: &'static str, tag: usize },
    /// `yield` on a coroutine which is not running.
    NotRunning { state: State },
    /// `resume` on a coroutine which is currently executing.
    Reentered,
    /// A coroutine was destroyed with an outstanding continuation.
    Abandoned { state: State },
    /// A coroutine was entered without its identity installed.
    NoIdentity,
    /// A hop descriptor was created outside of any coroutine.
    HopAtBaseline,
    /// A panic tried to unwind out of a coroutine body.
    BodyPanicked,
    /// A coroutine-local variable does not fit in the context's heap.
    LocalOverflow { end: usize, capacity: usize },
    /// The carved start frame does not fit in the coroutine stack.
    FrameTooLarge { needed: usize, available: usize },
    /// No executable page could be mapped for a trampoline.
    #[allow(dead_code)]
    ExecutableMemory { errno: i32 },
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Fault::Corrupted { object } => {
                write!(f, "bad this pointer or object corrupted: {:#x}", object)
            }
            Fault::UnexpectedTag { site, tag } => {
                write!(f, "unexpected dispatch tag {} in {}", tag, site)
            }
            Fault::NotRunning { state } => {
                write!(f, "yield when coroutine was not running, state {:?}", state)
            }
            Fault::Reentered => f.write_str("resume of a coroutine which is already executing"),
            Fault::Abandoned { state } => {
                write!(f, "destruct when coroutine was not complete, state {:?}", state)
            }
            Fault::NoIdentity => f.write_str("coroutine entered with no identity installed"),
            Fault::HopAtBaseline => f.write_str("hop descriptor created outside of a coroutine"),
            Fault::BodyPanicked => f.write_str("panic unwound out of a coroutine body"),
            Fault::LocalOverflow { end, capacity } => write!(
                f,
                "coroutine-local heap exhausted: need {} bytes, have {}",
                end, capacity
            ),
            Fault::FrameTooLarge { needed, available } => write!(
                f,
                "start frame of {} bytes does not fit in a {} byte stack",
                needed, available
            ),
            Fault::ExecutableMemory { errno } => {
                write!(f, "failed to map executable memory, errno {}", errno)
            }
        }
    }
}

static SINK: AtomicPtr<()> = AtomicPtr::new(ptr::null_mut());

fn log_sink(message: &str) {
    log::error!("{}", message);
}

/// Replaces the global diagnostic sink.
///
/// The sink receives the fully formatted message of a fatal error (source
/// location followed by the reason) immediately before the process is
/// terminated. It runs with the current-coroutine identity cleared. The
/// default sink forwards the message to `log::error!`.
pub fn set_diagnostic_sink(sink: fn(&str)) {
    SINK.store(sink as *mut (), Ordering::Release);
}

fn sink() -> fn(&str) {
    let sink = SINK.load(Ordering::Acquire);
    if sink.is_null() {
        log_sink
    } else {
        unsafe { mem::transmute::<*mut (), fn(&str)>(sink) }
    }
}

/// Formats the fault, passes it to the diagnostic sink and terminates.
#[cold]
#[inline(never)]
#[track_caller]
pub(crate) fn fatal(fault: Fault) -> ! {
    let location = Location::caller();

    // Whatever runs in the sink must not believe it is inside a coroutine.
    let _baseline = IdentityGuard::enter(ptr::null());

    let mut message = heapless::String::<MESSAGE_CAPACITY>::new();
    let file = location.file();
    let file = file.rsplit('/').next().unwrap_or(file);
    let _ = write!(message, "fatal {}:{}: {}", file, location.line(), fault);
    sink()(&message);

    terminate()
}

cfg_if::cfg_if! {
    if #[cfg(feature = "std")] {
        fn terminate() -> ! {
            extern crate std;
            std::process::abort()
        }
    } else {
        fn terminate() -> ! {
            // We can't abort in #![no_std], force one using a double-panic:
            // with panic=abort the first panic ends it, otherwise the guard
            // panics again while unwinding.
            let _guard = scopeguard::guard((), |()| {
                panic!("aborting after fatal coroutine error");
            });
            panic!("fatal coroutine error");
        }
    }
}
