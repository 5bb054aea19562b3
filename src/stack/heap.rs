use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use core::ptr::NonNull;

use super::{Stack, StackPointer, MIN_STACK_SIZE};
use crate::error::Error;

/// Alignment of the allocation. At least `STACK_ALIGNMENT` on every
/// supported target.
const ALIGN: usize = 16;

/// A stack carved out of the global allocator.
///
/// This is the only stack available without an operating system. There is no
/// guard page: overflowing it corrupts the coroutine-local heap at its bottom
/// first.
pub struct HeapStack {
    ptr: NonNull<u8>,
    layout: Layout,
}

// The stack memory is exclusively owned.
unsafe impl Send for HeapStack {}
unsafe impl Sync for HeapStack {}

impl HeapStack {
    /// Allocates a zero-filled stack of `size` bytes, rounded up to the
    /// stack alignment.
    pub fn new(size: usize) -> Result<Self, Error> {
        if size < MIN_STACK_SIZE {
            return Err(Error::StackTooSmall {
                requested: size,
                minimum: MIN_STACK_SIZE,
            });
        }

        let size = size
            .checked_add(ALIGN - 1)
            .ok_or(Error::StackAllocation { size })?
            & !(ALIGN - 1);
        let layout = Layout::from_size_align(size, ALIGN).map_err(|_| Error::StackAllocation { size })?;

        let ptr = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or(Error::StackAllocation { size })?;

        Ok(Self { ptr, layout })
    }
}

impl Drop for HeapStack {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

unsafe impl Stack for HeapStack {
    #[inline]
    fn base(&self) -> StackPointer {
        // Non-null: it is one past the end of a live allocation.
        unsafe { StackPointer::new_unchecked(self.ptr.as_ptr() as usize + self.layout.size()) }
    }

    #[inline]
    fn limit(&self) -> StackPointer {
        unsafe { StackPointer::new_unchecked(self.ptr.as_ptr() as usize) }
    }

    #[inline]
    fn size(&self) -> usize {
        self.layout.size()
    }
}
