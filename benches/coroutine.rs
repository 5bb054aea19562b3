use std::cell::Cell;
use std::hint::black_box;
use std::pin::Pin;
use std::rc::Rc;

use criterion::measurement::Measurement;
use criterion::{criterion_group, criterion_main, Criterion};
use hopping::stack::{DefaultStack, MIN_STACK_SIZE};
use hopping::{Coroutine, FnTask, Task};

fn coroutine_switch<M: Measurement + 'static>(name: &str, c: &mut Criterion<M>) {
    let stop = Rc::new(Cell::new(false));
    let stop2 = stop.clone();
    let looping = Coroutine::new(move || {
        while !stop2.get() {
            Coroutine::yield_now();
        }
    });

    c.bench_function(name, |b| b.iter(|| looping.resume()));

    // Let the body return so that the coroutine can be dropped.
    stop.set(true);
    looping.resume();
}

fn coroutine_create<M: Measurement + 'static>(name: &str, c: &mut Criterion<M>) {
    c.bench_function(name, |b| {
        b.iter(|| {
            let stack = DefaultStack::new(MIN_STACK_SIZE).unwrap();
            let coroutine = Coroutine::with_stack(stack, || {
                black_box(0usize);
            });
            coroutine.resume();
            coroutine
        })
    });
}

#[cfg(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64")))]
fn trampoline_call<M: Measurement + 'static>(name: &str, c: &mut Criterion<M>) {
    use hopping::Vectored;

    let counter = Rc::new(Cell::new(0u64));
    let counter2 = counter.clone();
    let vectored = Box::leak(Box::new(Vectored::new(FnTask::new(move || {
        counter2.set(counter2.get() + 1)
    }))));
    let handler = Pin::static_ref(vectored).vector();

    c.bench_function(name, |b| b.iter(|| handler()));
    black_box(counter.get());
}

fn direct_invoke<M: Measurement + 'static>(name: &str, c: &mut Criterion<M>) {
    let counter = Cell::new(0u64);
    let task = FnTask::new(|| counter.set(counter.get() + 1));
    let task: &dyn Task = black_box(&task);

    c.bench_function(name, |b| b.iter(|| task.invoke()));
}

fn coroutine_switch_time(c: &mut Criterion) {
    coroutine_switch("coroutine_switch_time", c);
}
fn coroutine_create_time(c: &mut Criterion) {
    coroutine_create("coroutine_create_time", c);
}
fn direct_invoke_time(c: &mut Criterion) {
    direct_invoke("direct_invoke_time", c);
}

cfg_if::cfg_if! {
    if #[cfg(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64")))] {
        fn trampoline_call_time(c: &mut Criterion) {
            trampoline_call("trampoline_call_time", c);
        }

        criterion_group!(
            name = time;
            config = Criterion::default();
            targets = coroutine_switch_time, coroutine_create_time, direct_invoke_time, trampoline_call_time
        );
    } else {
        criterion_group!(
            name = time;
            config = Criterion::default();
            targets = coroutine_switch_time, coroutine_create_time, direct_invoke_time
        );
    }
}

criterion_main!(time);
