extern crate std;

use std::io::Error as IoError;
use std::ptr;

use super::{Stack, StackPointer, DEFAULT_STACK_SIZE, MIN_STACK_SIZE};
use crate::error::Error;

pub(crate) fn page_size() -> usize {
    let pagesize = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
    debug_assert!(pagesize.is_power_of_two());
    pagesize
}

/// Default stack implementation which uses `mmap`.
///
/// The mapping has an inaccessible guard page below the usable region, so a
/// stack overflow faults instead of silently running into other memory.
/// Fresh anonymous mappings are zero-filled.
pub struct DefaultStack {
    base: StackPointer,
    mmap_len: usize,
    page_size: usize,
}

impl DefaultStack {
    /// Creates a new stack which has at least the given capacity.
    pub fn new(size: usize) -> Result<Self, Error> {
        if size < MIN_STACK_SIZE {
            return Err(Error::StackTooSmall {
                requested: size,
                minimum: MIN_STACK_SIZE,
            });
        }

        // Add a guard page to the requested size and round the size up to
        // a page boundary.
        let page_size = page_size();
        let mmap_len = size
            .checked_add(page_size + page_size - 1)
            .ok_or(Error::StackAllocation { size })?
            & !(page_size - 1);

        // OpenBSD requires MAP_STACK on anything that is used as a stack.
        cfg_if::cfg_if! {
            if #[cfg(target_os = "openbsd")] {
                let map_flags = libc::MAP_ANONYMOUS | libc::MAP_PRIVATE | libc::MAP_STACK;
            } else {
                let map_flags = libc::MAP_ANONYMOUS | libc::MAP_PRIVATE;
            }
        }

        unsafe {
            // Reserve some address space for the stack.
            let mmap = libc::mmap(ptr::null_mut(), mmap_len, libc::PROT_NONE, map_flags, -1, 0);
            if mmap == libc::MAP_FAILED {
                return Err(Error::Io(IoError::last_os_error()));
            }

            // Create the result here. If the mprotect call fails then this will
            // be dropped and the memory will be unmapped.
            let out = Self {
                base: StackPointer::new_unchecked(mmap as usize + mmap_len),
                mmap_len,
                page_size,
            };

            // Make everything except the guard page writable.
            if libc::mprotect(
                mmap.cast::<u8>().add(page_size).cast(),
                mmap_len - page_size,
                libc::PROT_READ | libc::PROT_WRITE,
            ) != 0
            {
                return Err(Error::Io(IoError::last_os_error()));
            }

            Ok(out)
        }
    }
}

impl Default for DefaultStack {
    fn default() -> Self {
        match Self::new(DEFAULT_STACK_SIZE) {
            Ok(stack) => stack,
            Err(e) => panic!("failed to allocate stack: {}", e),
        }
    }
}

impl Drop for DefaultStack {
    fn drop(&mut self) {
        unsafe {
            let mmap = self.base.get() - self.mmap_len;
            let ret = libc::munmap(mmap as _, self.mmap_len);
            debug_assert_eq!(ret, 0);
        }
    }
}

unsafe impl Stack for DefaultStack {
    #[inline]
    fn base(&self) -> StackPointer {
        self.base
    }

    #[inline]
    fn limit(&self) -> StackPointer {
        // Skip the guard page.
        unsafe { StackPointer::new_unchecked(self.base.get() - self.mmap_len + self.page_size) }
    }
}
