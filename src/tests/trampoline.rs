extern crate std;

use std::boxed::Box;
use std::cell::Cell;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::init_logging;
use crate::coroutine::{Coroutine, State};
use crate::hop::Hop;
use crate::task::{FnTask, Task};
use crate::trampoline::{RamVector, Vectored};

fn leak<T: Task>(task: T) -> Pin<&'static Vectored<T>> {
    Pin::static_ref(Box::leak(Box::new(Vectored::new(task))))
}

#[test]
fn vector_matches_direct_invoke() {
    init_logging();
    let counter = Rc::new(Cell::new(0));
    let counter2 = counter.clone();
    let vectored = leak(FnTask::new(move || counter2.set(counter2.get() + 1)));

    vectored.task().invoke();
    assert_eq!(counter.get(), 1);

    let handler = vectored.vector();
    handler();
    assert_eq!(counter.get(), 2);
    handler();
    assert_eq!(counter.get(), 3);
}

#[test]
fn vector_is_resolved_once() {
    init_logging();
    let vectored = leak(FnTask::new(|| {}));
    let first = vectored.vector();
    let second = vectored.vector();
    assert_eq!(first as usize, second as usize);
}

#[test]
fn distinct_objects_get_distinct_vectors() {
    init_logging();
    static A: AtomicUsize = AtomicUsize::new(0);
    static B: AtomicUsize = AtomicUsize::new(0);

    let a = leak(FnTask::new(|| {
        A.fetch_add(1, Ordering::Relaxed);
    }));
    let b = leak(FnTask::new(|| {
        B.fetch_add(10, Ordering::Relaxed);
    }));
    let (va, vb) = (a.vector(), b.vector());
    assert_ne!(va as usize, vb as usize);

    vb();
    va();
    vb();
    assert_eq!(A.load(Ordering::Relaxed), 1);
    assert_eq!(B.load(Ordering::Relaxed), 20);
}

#[test]
fn boxed_task_through_vector() {
    init_logging();
    let counter = Rc::new(Cell::new(0));
    let counter2 = counter.clone();
    let task: Box<dyn Task> = Box::new(FnTask::new(move || counter2.set(counter2.get() + 5)));
    let vectored = leak(task);
    vectored.vector()();
    assert_eq!(counter.get(), 5);
}

#[test]
fn non_static_owner() {
    init_logging();
    let counter = Rc::new(Cell::new(0));
    let counter2 = counter.clone();
    let vectored = Box::pin(Vectored::new(FnTask::new(move || {
        counter2.set(counter2.get() + 1)
    })));
    let handler = unsafe { vectored.as_ref().vector_unchecked() };
    handler();
    handler();
    drop(vectored);
    assert_eq!(counter.get(), 2);
}

#[test]
fn ram_vector_redirects() {
    init_logging();
    static VECTOR: RamVector = RamVector::new();
    static FIRED: AtomicUsize = AtomicUsize::new(0);
    crate::interrupt_handler!(TEST_RAM_VECTOR_IRQ, VECTOR);

    extern "C" fn first() {
        FIRED.fetch_add(1, Ordering::Relaxed);
    }
    extern "C" fn second() {
        FIRED.fetch_add(100, Ordering::Relaxed);
    }

    // Empty vector: nothing happens.
    TEST_RAM_VECTOR_IRQ();
    assert!(VECTOR.get().is_none());

    VECTOR.set(first);
    TEST_RAM_VECTOR_IRQ();
    VECTOR.set(second);
    TEST_RAM_VECTOR_IRQ();
    VECTOR.clear();
    TEST_RAM_VECTOR_IRQ();

    assert_eq!(FIRED.load(Ordering::Relaxed), 101);
}

#[test]
fn coroutine_hops_to_an_interrupt_vector() {
    init_logging();
    // A "UART" interrupt whose handler is redirected at runtime.
    static UART: RamVector = RamVector::new();
    crate::interrupt_handler!(TEST_UART_IRQ, UART);

    // Outer `Some` once the coroutine has read, inner one is the byte.
    let received = Rc::new(Cell::new(None::<Option<u8>>));
    let rx = Rc::new(Cell::new(None::<u8>));
    let own_vector = Rc::new(Cell::new(None::<extern "C" fn()>));

    let (received2, rx2, own_vector2) = (received.clone(), rx.clone(), own_vector.clone());
    let coroutine = Coroutine::new(move || {
        let vector = own_vector2.get();
        let byte = Hop::scope(
            move || {
                if let Some(vector) = vector {
                    UART.set(vector)
                }
            },
            || UART.clear(),
            |_| {
                Coroutine::wait(|| rx2.get().is_some());
                rx2.take()
            },
        );
        received2.set(Some(byte));
    });
    let vectored = leak(coroutine);
    own_vector.set(Some(vectored.vector()));

    // The main loop runs the coroutine until it blocks on the UART, at which
    // point it hands itself over to the interrupt.
    vectored.task().invoke();
    assert!(UART.get().is_some());
    assert_eq!(vectored.task().state(), State::Running);

    // Spurious interrupt: no byte yet, the coroutine keeps waiting.
    TEST_UART_IRQ();
    assert_eq!(received.get(), None);

    rx.set(Some(b'x'));
    TEST_UART_IRQ();
    assert_eq!(received.get(), Some(Some(b'x')));
    assert_eq!(vectored.task().state(), State::Complete);
    assert!(UART.get().is_none());
}
