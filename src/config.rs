use alloc::boxed::Box;
use core::pin::Pin;

use crate::coroutine::Coroutine;
use crate::error::Error;
use crate::stack::{DefaultStack, DEFAULT_STACK_SIZE};

/// Coroutine factory, which can be used in order to configure the properties
/// of a new coroutine.
///
/// ```rust
/// use hopping::{Builder, Coroutine};
///
/// let coroutine = Builder::new()
///     .stack_size(64 * 1024)
///     .spawn(|| Coroutine::yield_now())
///     .unwrap();
/// coroutine.resume();
/// coroutine.resume();
/// assert!(coroutine.check_destroy().is_ok());
/// ```
#[derive(Clone, Copy, Debug)]
pub struct Builder {
    stack_size: usize,
}

impl Builder {
    /// Generates the base configuration for spawning a coroutine, from which
    /// configuration methods can be chained.
    pub const fn new() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
        }
    }

    /// Sets the size of the stack (in bytes) for the new coroutine.
    ///
    /// The coroutine-local heap is carved out of the same buffer.
    pub const fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = size;
        self
    }

    /// Allocates a stack and constructs a coroutine which will execute `body`
    /// on it.
    pub fn spawn<F>(self, body: F) -> Result<Pin<Box<Coroutine>>, Error>
    where
        F: FnOnce() + 'static,
    {
        let stack = DefaultStack::new(self.stack_size)?;
        Ok(Coroutine::with_stack(stack, body))
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}
