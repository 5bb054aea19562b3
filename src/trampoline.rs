//! Bare function pointers that invoke a specific task.
//!
//! Interrupt vector tables (and C callback registries) only accept plain
//! `extern "C" fn()` pointers with no context argument. [`Vectored`] pairs a
//! [`Task`] with a few bytes of synthesized machine code, a thunk, which
//! recovers its own address from its program counter, loads a context pointer
//! stored right behind the code and tail-calls a typed shim with it. The code
//! is position independent, so the same bytes work wherever the thunk ends up.
//!
//! ```text
//! +---------------+  <- Thunk address (| 1 for Thumb code)
//! | Code          |
//! +---------------+  <- Code length
//! | Entry         |  <- shim::<T>
//! +---------------+
//! | Context       |  <- &Vectored::task
//! +---------------+
//! ```
//!
//! The shim is monomorphized for the concrete task type, so a concrete task
//! is called directly and a `Box<dyn Task>` through its vtable.
//!
//! [`RamVector`] is the other half: a redirectable vector in RAM whose
//! handler, declared with [`interrupt_handler!`](crate::interrupt_handler),
//! calls whatever function pointer was last installed.

use core::marker::PhantomPinned;
use core::mem;
use core::pin::Pin;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::arch::{self, entry_abi, ThunkFunc};
use crate::task::Task;

const CODE_LEN: usize = arch::THUNK_CODE.len();

#[repr(C)]
#[derive(Clone, Copy)]
struct Thunk {
    code: [u8; CODE_LEN],
    entry: usize,
    context: usize,
}

// The instruction sequences load the entry pointer from right behind the code
// and pass the thunk's own address along.
const _: () = assert!(mem::offset_of!(Thunk, code) == 0);
const _: () = assert!(mem::offset_of!(Thunk, entry) == CODE_LEN);
const _: () = assert!(mem::offset_of!(Thunk, context) == CODE_LEN + mem::size_of::<usize>());
const _: () = assert!(mem::size_of::<ThunkFunc>() == mem::size_of::<usize>());
const _: () = assert!(mem::size_of::<extern "C" fn()>() == mem::size_of::<usize>());

entry_abi! {
    unsafe fn shim<T: Task>(thunk: *const u8) {
        let thunk = &*(thunk as *const Thunk);
        let task = &*(thunk.context as *const T);
        task.invoke();
    }
}

cfg_if::cfg_if! {
    if #[cfg(all(unix, feature = "std"))] {
        extern crate std;

        use core::cell::Cell;
        use core::ptr;

        use crate::diag::{fatal, Fault};

        /// Thunk placement on hosted targets: data memory is not executable,
        /// so each thunk gets its own page, written while it is read-write
        /// and then flipped to read-execute.
        struct ThunkStorage {
            page: Cell<*mut u8>,
        }

        fn page_size() -> usize {
            unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
        }

        impl ThunkStorage {
            const fn new() -> Self {
                Self {
                    page: Cell::new(ptr::null_mut()),
                }
            }

            unsafe fn install(&self, thunk: Thunk) -> *const u8 {
                let len = page_size();
                let page = libc::mmap(
                    ptr::null_mut(),
                    len,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_ANONYMOUS | libc::MAP_PRIVATE,
                    -1,
                    0,
                );
                if page == libc::MAP_FAILED {
                    fatal(Fault::ExecutableMemory {
                        errno: std::io::Error::last_os_error().raw_os_error().unwrap_or(0),
                    });
                }
                let page = page.cast::<u8>();

                page.cast::<Thunk>().write(thunk);
                arch::flush_icache(page, mem::size_of::<Thunk>());

                if libc::mprotect(page.cast(), len, libc::PROT_READ | libc::PROT_EXEC) != 0 {
                    let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
                    libc::munmap(page.cast(), len);
                    fatal(Fault::ExecutableMemory { errno });
                }

                self.page.set(page);
                page
            }
        }

        impl Drop for ThunkStorage {
            fn drop(&mut self) {
                let page = self.page.get();
                if !page.is_null() {
                    unsafe {
                        let ret = libc::munmap(page.cast(), page_size());
                        debug_assert_eq!(ret, 0);
                    }
                }
            }
        }
    } else {
        use core::cell::UnsafeCell;
        use core::mem::MaybeUninit;

        /// Thunk placement on bare metal: RAM is executable, the thunk lives
        /// inline in its owner.
        struct ThunkStorage {
            thunk: UnsafeCell<MaybeUninit<Thunk>>,
        }

        impl ThunkStorage {
            const fn new() -> Self {
                Self {
                    thunk: UnsafeCell::new(MaybeUninit::uninit()),
                }
            }

            unsafe fn install(&self, thunk: Thunk) -> *const u8 {
                let slot = self.thunk.get().cast::<Thunk>();
                slot.write(thunk);
                arch::flush_icache(slot.cast(), mem::size_of::<Thunk>());
                slot.cast()
            }
        }
    }
}

cfg_if::cfg_if! {
    if #[cfg(all(target_arch = "arm", target_os = "none"))] {
        // An interrupt handler may ask for the vector while the main loop is
        // resolving it.
        #[inline]
        fn critical<R>(f: impl FnOnce() -> R) -> R {
            cortex_m::interrupt::free(|_| f())
        }
    } else {
        #[inline]
        fn critical<R>(f: impl FnOnce() -> R) -> R {
            f()
        }
    }
}

/// A task which can be invoked through a bare `extern "C" fn()`.
///
/// ```rust
/// # #[cfg(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64")))]
/// # {
/// use std::pin::Pin;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// use hopping::{FnTask, Vectored};
///
/// static TICKS: AtomicUsize = AtomicUsize::new(0);
///
/// let vectored = Box::leak(Box::new(Vectored::new(FnTask::new(|| {
///     TICKS.fetch_add(1, Ordering::Relaxed);
/// }))));
/// let handler: extern "C" fn() = Pin::static_ref(vectored).vector();
///
/// handler();
/// handler();
/// assert_eq!(TICKS.load(Ordering::Relaxed), 2);
/// # }
/// ```
pub struct Vectored<T> {
    // Callable address of the thunk, 0 until it has been synthesized.
    vector: AtomicUsize,
    storage: ThunkStorage,
    task: T,
    _pinned: PhantomPinned,
}

// Interrupts preempt the main loop, they never run alongside it.
#[cfg(target_os = "none")]
unsafe impl<T: Task> Sync for Vectored<T> {}

impl<T: Task> Vectored<T> {
    /// Wraps `task`. No code is synthesized until the vector is requested.
    pub const fn new(task: T) -> Self {
        Self {
            vector: AtomicUsize::new(0),
            storage: ThunkStorage::new(),
            task,
            _pinned: PhantomPinned,
        }
    }

    /// Returns the wrapped task.
    #[inline]
    pub fn task(&self) -> &T {
        &self.task
    }

    /// Returns a function pointer which invokes the task when called.
    ///
    /// The thunk is synthesized on the first call, later calls return the
    /// same pointer.
    pub fn vector(self: Pin<&'static Self>) -> extern "C" fn() {
        unsafe { self.vector_unchecked() }
    }

    /// Like [`vector`](Vectored::vector), for owners that are not `'static`.
    ///
    /// # Safety
    ///
    /// The returned pointer must not be called after `self` is dropped.
    pub unsafe fn vector_unchecked(self: Pin<&Self>) -> extern "C" fn() {
        let this = self.get_ref();
        let mut vector = this.vector.load(Ordering::Acquire);
        if vector == 0 {
            vector = critical(|| this.resolve());
        }
        mem::transmute::<usize, extern "C" fn()>(vector)
    }

    #[cold]
    unsafe fn resolve(&self) -> usize {
        let vector = self.vector.load(Ordering::Acquire);
        if vector != 0 {
            return vector;
        }

        let entry: ThunkFunc = shim::<T>;
        let thunk = Thunk {
            code: arch::THUNK_CODE,
            entry: entry as usize,
            context: &self.task as *const T as usize,
        };
        let code = self.storage.install(thunk);
        let vector = code as usize | arch::THUNK_FN_BIT;

        log::trace!("synthesized thunk at {:p} for task {:p}", code, &self.task);

        self.vector.store(vector, Ordering::Release);
        vector
    }
}

/// A redirectable interrupt vector in RAM.
///
/// The hardware vector points at a fixed handler declared with
/// [`interrupt_handler!`](crate::interrupt_handler), which calls whatever
/// function is currently installed here, typically the
/// [`vector`](Vectored::vector) of a task.
pub struct RamVector {
    handler: AtomicUsize,
}

impl RamVector {
    /// Creates an empty vector. Firing it does nothing.
    pub const fn new() -> Self {
        Self {
            handler: AtomicUsize::new(0),
        }
    }

    /// Installs `handler`, replacing the previous one.
    #[inline]
    pub fn set(&self, handler: extern "C" fn()) {
        self.handler.store(handler as usize, Ordering::Release);
    }

    /// Removes the installed handler.
    #[inline]
    pub fn clear(&self) {
        self.handler.store(0, Ordering::Release);
    }

    /// Returns the installed handler.
    #[inline]
    pub fn get(&self) -> Option<extern "C" fn()> {
        match self.handler.load(Ordering::Acquire) {
            0 => None,
            raw => Some(unsafe { mem::transmute::<usize, extern "C" fn()>(raw) }),
        }
    }

    /// Calls the installed handler, if any.
    #[inline]
    pub fn fire(&self) {
        if let Some(handler) = self.get() {
            handler();
        }
    }
}

impl Default for RamVector {
    fn default() -> Self {
        Self::new()
    }
}

/// Declares an interrupt handler that dispatches through a [`RamVector`].
///
/// ```rust
/// use hopping::{interrupt_handler, RamVector};
///
/// static UART0_VECTOR: RamVector = RamVector::new();
/// interrupt_handler!(UART0, UART0_VECTOR);
///
/// extern "C" fn on_byte() {}
///
/// UART0_VECTOR.set(on_byte);
/// UART0();
/// ```
#[macro_export]
macro_rules! interrupt_handler {
    ($name:ident, $vector:expr) => {
        #[no_mangle]
        #[allow(non_snake_case)]
        pub extern "C" fn $name() {
            $vector.fire()
        }
    };
}
