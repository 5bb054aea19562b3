//! Coroutine-local storage.
//!
//! Every coroutine-local variable is assigned a byte offset the first time it
//! is touched, once for the whole program, by bumping a global top pointer.
//! The offset is then applied to the heap of whichever context is running:
//! the bottom of the current coroutine's stack, or a shared buffer allocated
//! on first use at baseline.
//!
//! The cost is that every coroutine stack loses as many bytes as all the
//! coroutine-local variables ever registered occupy, whether that coroutine
//! uses them or not.

use alloc::alloc::{alloc_zeroed, handle_alloc_error, Layout};
use core::mem::{self, MaybeUninit};
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::coroutine::Coroutine;
use crate::diag::Fault;

/// Largest alignment a coroutine-local value may have. Every heap starts at
/// an address aligned to this.
const MAX_ALIGN: usize = 16;

cfg_if::cfg_if! {
    if #[cfg(all(target_arch = "arm", target_os = "none"))] {
        const BASELINE_HEAP_SIZE: usize = 512;
    } else {
        const BASELINE_HEAP_SIZE: usize = 4096;
    }
}

const BASELINE_LAYOUT: Layout = match Layout::from_size_align(BASELINE_HEAP_SIZE, MAX_ALIGN) {
    Ok(layout) => layout,
    Err(_) => panic!("invalid baseline heap layout"),
};

/// Next free byte in every heap. Offset 0 is never handed out so that it can
/// mean "not assigned yet".
static HEAP_TOP: AtomicUsize = AtomicUsize::new(1);

/// Returns the number of bytes registered in every heap so far.
pub(crate) fn heap_top() -> usize {
    HEAP_TOP.load(Ordering::Relaxed)
}

#[inline]
const fn align_up(offset: usize, align: usize) -> usize {
    (offset + align - 1) & !(align - 1)
}

cfg_if::cfg_if! {
    if #[cfg(target_has_atomic = "ptr")] {
        /// Assigns `key` an offset for a slot of the given layout, unless it
        /// already has one.
        fn register(key: &AtomicUsize, size: usize, align: usize) -> usize {
            let mut top = HEAP_TOP.load(Ordering::Relaxed);
            let offset = loop {
                let offset = align_up(top, align);
                match HEAP_TOP.compare_exchange_weak(
                    top,
                    offset + size,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => break offset,
                    Err(current) => top = current,
                }
            };

            // Losing this race (an interrupt registered the same key in
            // between) wastes the space reserved above.
            match key.compare_exchange(0, offset, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => offset,
                Err(existing) => existing,
            }
        }
    } else {
        // No compare-and-swap on this core (Cortex-M0), fall back to masking
        // interrupts.
        fn register(key: &AtomicUsize, size: usize, align: usize) -> usize {
            cortex_m::interrupt::free(|_| {
                let existing = key.load(Ordering::Acquire);
                if existing != 0 {
                    return existing;
                }
                let offset = align_up(HEAP_TOP.load(Ordering::Relaxed), align);
                HEAP_TOP.store(offset + size, Ordering::Relaxed);
                key.store(offset, Ordering::Release);
                offset
            })
        }
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "std")] {
        extern crate std;

        use alloc::alloc::dealloc;

        struct BaselineHeap {
            ptr: *mut u8,
        }

        impl BaselineHeap {
            fn new() -> Self {
                let ptr = unsafe { alloc_zeroed(BASELINE_LAYOUT) };
                if ptr.is_null() {
                    handle_alloc_error(BASELINE_LAYOUT);
                }
                Self { ptr }
            }
        }

        impl Drop for BaselineHeap {
            fn drop(&mut self) {
                unsafe { dealloc(self.ptr, BASELINE_LAYOUT) }
            }
        }

        // Every thread is its own cooperative world with its own baseline.
        std::thread_local! {
            static BASELINE: BaselineHeap = BaselineHeap::new();
        }

        fn baseline_heap() -> *mut u8 {
            BASELINE.with(|heap| heap.ptr)
        }
    } else {
        use alloc::alloc::dealloc;
        use core::ptr;
        use core::sync::atomic::AtomicPtr;

        // Allocated on first use and never freed.
        static BASELINE: AtomicPtr<u8> = AtomicPtr::new(ptr::null_mut());

        fn baseline_heap() -> *mut u8 {
            let heap = BASELINE.load(Ordering::Acquire);
            if !heap.is_null() {
                return heap;
            }

            let fresh = unsafe { alloc_zeroed(BASELINE_LAYOUT) };
            if fresh.is_null() {
                handle_alloc_error(BASELINE_LAYOUT);
            }
            install_baseline(fresh)
        }

        #[cfg(target_has_atomic = "ptr")]
        fn install_baseline(fresh: *mut u8) -> *mut u8 {
            match BASELINE.compare_exchange(ptr::null_mut(), fresh, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => fresh,
                Err(existing) => {
                    unsafe { dealloc(fresh, BASELINE_LAYOUT) };
                    existing
                }
            }
        }

        #[cfg(not(target_has_atomic = "ptr"))]
        fn install_baseline(fresh: *mut u8) -> *mut u8 {
            cortex_m::interrupt::free(|_| {
                let existing = BASELINE.load(Ordering::Acquire);
                if existing.is_null() {
                    BASELINE.store(fresh, Ordering::Release);
                    fresh
                } else {
                    unsafe { dealloc(fresh, BASELINE_LAYOUT) };
                    existing
                }
            })
        }
    }
}

/// Returns the heap of the running context and its capacity.
fn current_heap() -> (*mut u8, usize) {
    match Coroutine::current() {
        Some(coroutine) => {
            let bounds = unsafe { coroutine.as_ref() }.stack_bounds();
            (
                bounds.start as *mut u8,
                bounds.end as usize - bounds.start as usize,
            )
        }
        None => (baseline_heap(), BASELINE_HEAP_SIZE),
    }
}

#[repr(C)]
struct Slot<T> {
    // Not a bool: the heap is plain zero-filled memory.
    initialized: u8,
    value: MaybeUninit<T>,
}

/// A variable with a separate value in every coroutine, and one more shared
/// by all code running outside of coroutines.
///
/// Each context sees `init` until it sets its own value. Values must be
/// `Copy` since they are never dropped: they live in stack memory that is
/// reclaimed wholesale.
///
/// Usually declared with [`coroutine_local!`](crate::coroutine_local).
///
/// ```rust
/// use hopping::{coroutine_local, Coroutine};
///
/// coroutine_local! {
///     static DEPTH: u32 = 0;
/// }
///
/// DEPTH.set(7);
/// let coroutine = Coroutine::new(|| {
///     assert_eq!(DEPTH.get(), 0);
///     DEPTH.set(1);
/// });
/// coroutine.resume();
/// assert_eq!(DEPTH.get(), 7);
/// ```
pub struct CoroutineLocal<T: 'static> {
    offset: AtomicUsize,
    init: T,
}

// Each context only ever touches its own slot, and contexts never run in
// parallel.
unsafe impl<T: Copy + 'static> Sync for CoroutineLocal<T> {}

impl<T: Copy + 'static> CoroutineLocal<T> {
    /// Creates a variable whose value in every context starts as `init`.
    pub const fn new(init: T) -> Self {
        assert!(
            mem::align_of::<T>() <= MAX_ALIGN,
            "coroutine-local values can't be aligned to more than 16 bytes"
        );
        Self {
            offset: AtomicUsize::new(0),
            init,
        }
    }

    fn slot(&self) -> *mut Slot<T> {
        let mut offset = self.offset.load(Ordering::Acquire);
        if offset == 0 {
            offset = register(
                &self.offset,
                mem::size_of::<Slot<T>>(),
                mem::align_of::<Slot<T>>(),
            );
        }

        let (heap, capacity) = current_heap();
        let end = offset + mem::size_of::<Slot<T>>();
        ensure!(end <= capacity, Fault::LocalOverflow { end, capacity });

        unsafe {
            let slot = heap.add(offset).cast::<Slot<T>>();
            if (*slot).initialized == 0 {
                (*slot).value = MaybeUninit::new(self.init);
                (*slot).initialized = 1;
            }
            slot
        }
    }

    /// Returns the value for the running context.
    #[inline]
    pub fn get(&self) -> T {
        unsafe { (*self.slot()).value.assume_init() }
    }

    /// Sets the value for the running context.
    #[inline]
    pub fn set(&self, value: T) {
        unsafe { (*self.slot()).value = MaybeUninit::new(value) }
    }

    /// Sets the value for the running context, returning the previous one.
    #[inline]
    pub fn replace(&self, value: T) -> T {
        let slot = self.slot();
        unsafe {
            let previous = (*slot).value.assume_init();
            (*slot).value = MaybeUninit::new(value);
            previous
        }
    }
}

/// Declares one or more [`CoroutineLocal`] statics.
///
/// The syntax mirrors `thread_local!`.
#[macro_export]
macro_rules! coroutine_local {
    () => {};

    ($(#[$attr:meta])* $vis:vis static $name:ident: $t:ty = $init:expr; $($rest:tt)*) => {
        $(#[$attr])* $vis static $name: $crate::CoroutineLocal<$t> = $crate::CoroutineLocal::new($init);
        $crate::coroutine_local!($($rest)*);
    };

    ($(#[$attr:meta])* $vis:vis static $name:ident: $t:ty = $init:expr) => {
        $(#[$attr])* $vis static $name: $crate::CoroutineLocal<$t> = $crate::CoroutineLocal::new($init);
    };
}
