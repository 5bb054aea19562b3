//! Details about stacks used by coroutines.
//!
//! In most cases, just using the default stack implementation is sufficient.
//! However it is possible to use a custom `Stack` implementation if more
//! control is desired, e.g. a buffer in a dedicated RAM region.
//!
//! The lowest part of every coroutine stack doubles as the coroutine-local
//! heap: variables declared with [`coroutine_local!`](crate::coroutine_local)
//! are stored at the stack's [`limit`](Stack::limit), and the stack grows down
//! towards them from its [`base`](Stack::base).

use core::num::NonZeroUsize;

mod heap;
pub use self::heap::HeapStack;

cfg_if::cfg_if! {
    if #[cfg(all(feature = "std", unix))] {
        mod unix;
        pub use self::unix::DefaultStack;
    } else {
        /// Default stack implementation: a zero-filled heap allocation.
        pub type DefaultStack = HeapStack;
    }
}

/// Type to represent a stack address.
pub type StackPointer = NonZeroUsize;

/// Required stack alignment at function call boundaries.
pub const STACK_ALIGNMENT: usize = crate::arch::STACK_ALIGNMENT;

cfg_if::cfg_if! {
    if #[cfg(all(target_arch = "arm", target_os = "none"))] {
        /// Stack size used by [`Coroutine::new`](crate::Coroutine::new).
        pub const DEFAULT_STACK_SIZE: usize = 2048;

        /// Minimum size of a stack, excluding guard pages.
        pub const MIN_STACK_SIZE: usize = 512;
    } else {
        /// Stack size used by [`Coroutine::new`](crate::Coroutine::new).
        pub const DEFAULT_STACK_SIZE: usize = 256 * 1024;

        /// Minimum size of a stack, excluding guard pages.
        pub const MIN_STACK_SIZE: usize = 16 * 1024;
    }
}

/// A trait for objects that hold ownership of a stack.
///
/// # Safety
///
/// The memory between [`limit`](Stack::limit) and [`base`](Stack::base) must
/// be owned exclusively by this object, writable, and zero-filled when the
/// stack is handed to a coroutine (peak usage estimation and coroutine-local
/// storage rely on that). It must contain at least [`MIN_STACK_SIZE`] bytes.
pub unsafe trait Stack {
    /// Returns the base address of the stack. This is the highest address since
    /// stacks grow downwards on most modern architectures.
    ///
    /// Must be aligned to [`STACK_ALIGNMENT`].
    fn base(&self) -> StackPointer;

    /// Returns the lowest usable address of the stack. Guard pages, if any,
    /// lie below this address.
    ///
    /// Must be aligned to [`STACK_ALIGNMENT`].
    fn limit(&self) -> StackPointer;

    /// Returns the number of usable bytes in the stack.
    #[inline]
    fn size(&self) -> usize {
        self.base().get() - self.limit().get()
    }
}

#[test]
fn assert_send_sync() {
    fn send<T: Send>() {}
    fn sync<T: Sync>() {}
    send::<DefaultStack>();
    sync::<DefaultStack>();
    send::<HeapStack>();
    sync::<HeapStack>();
}
