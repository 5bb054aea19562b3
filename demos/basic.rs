//! A "firmware" main loop with one coroutine reading from a simulated UART.
//!
//! The coroutine is written as straight-line blocking code. While it waits
//! for a byte it hops onto the UART interrupt, so the interrupt handler
//! resumes it directly and the main loop is free to do other work.

use std::cell::Cell;
use std::pin::Pin;
use std::rc::Rc;

use hopping::{Coroutine, FnTask, Hop, RamVector, State, Task, Vectored};

static UART_VECTOR: RamVector = RamVector::new();
hopping::interrupt_handler!(UART0_IRQ, UART_VECTOR);

fn main() {
    println!("[main] creating coroutine");

    let rx: Rc<Cell<Option<u8>>> = Rc::default();
    let own_vector: Rc<Cell<Option<extern "C" fn()>>> = Rc::default();

    let (rx2, own_vector2) = (rx.clone(), own_vector.clone());
    let reader = Coroutine::new(move || {
        let mut line = Vec::new();
        while line.last() != Some(&b'\n') {
            // Blocking read: attach to the UART interrupt while waiting.
            let vector = own_vector2.get();
            let byte = Hop::scope(
                move || {
                    println!("[coroutine] attaching to UART0");
                    if let Some(vector) = vector {
                        UART_VECTOR.set(vector);
                    }
                },
                || {
                    println!("[coroutine] detaching from UART0");
                    UART_VECTOR.clear();
                },
                |_| {
                    Coroutine::wait(|| rx2.get().is_some());
                    rx2.take()
                },
            );
            if let Some(byte) = byte {
                println!("[coroutine] got {:?}", byte as char);
                line.push(byte);
            }
        }
        println!("[coroutine] read line {:?}", String::from_utf8_lossy(&line));
    });

    let reader: &'static Vectored<Pin<Box<Coroutine>>> = Box::leak(Box::new(Vectored::new(reader)));
    own_vector.set(Some(Pin::static_ref(reader).vector()));

    let ticks = Rc::new(Cell::new(0));
    let ticks2 = ticks.clone();
    let heartbeat = FnTask::new(move || ticks2.set(ticks2.get() + 1));

    // First run from the main loop, until the coroutine blocks.
    reader.task().invoke();

    for &byte in b"hop\n" {
        heartbeat.invoke();

        // The "hardware" receives a byte and raises the interrupt.
        rx.set(Some(byte));
        UART0_IRQ();
    }

    println!(
        "[main] heartbeat ran {} times, coroutine {:?}, peak stack usage {} bytes",
        ticks.get(),
        reader.task().state(),
        reader.task().estimate_stack_peak_usage()
    );
    assert_eq!(reader.task().state(), State::Complete);
    println!("[main] exiting");
}

#[test]
fn basic() {
    main()
}
