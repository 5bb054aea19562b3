use core::fmt;

use crate::coroutine::State;

/// Errors which can be recovered from.
///
/// Contract violations that leave memory or register state undefined are not
/// reported through this type: they terminate the process.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// The requested stack size is below [`MIN_STACK_SIZE`](crate::stack::MIN_STACK_SIZE).
    StackTooSmall {
        /// Requested size in bytes.
        requested: usize,
        /// Smallest accepted size in bytes.
        minimum: usize,
    },
    /// The allocator could not provide a stack of the given size.
    StackAllocation {
        /// Requested size in bytes.
        size: usize,
    },
    /// The operating system refused to map or protect memory.
    #[cfg(feature = "std")]
    Io(std::io::Error),
    /// The coroutine has not completed and can't be destroyed.
    Incomplete(State),
}

#[cfg(feature = "std")]
extern crate std;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::StackTooSmall { requested, minimum } => write!(
                f,
                "stack of {} bytes requested, at least {} are required",
                requested, minimum
            ),
            Error::StackAllocation { size } => {
                write!(f, "failed to allocate a {} byte stack", size)
            }
            #[cfg(feature = "std")]
            Error::Io(e) => write!(f, "failed to map stack memory: {}", e),
            Error::Incomplete(state) => {
                write!(f, "coroutine is not complete (state {:?})", state)
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(feature = "std")]
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}
