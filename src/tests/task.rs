extern crate std;

use std::boxed::Box;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::vec::Vec;

use super::init_logging;
use crate::coroutine::{Coroutine, State};
use crate::task::{FnTask, Task};

#[test]
fn fn_task_runs_each_invoke() {
    init_logging();
    let ticks = Cell::new(0);
    let task = FnTask::new(|| ticks.set(ticks.get() + 1));
    task.invoke();
    task.invoke();
    task.run_iteration();
    assert_eq!(ticks.get(), 3);
}

#[test]
fn hop_action_runs_once_after_the_iteration() {
    init_logging();
    let log = Rc::new(RefCell::new(Vec::new()));
    let work_log = log.clone();
    let task = FnTask::new(move || work_log.borrow_mut().push("work"));

    let hop_log = log.clone();
    task.core().set_hop(move || hop_log.borrow_mut().push("hop"));
    task.invoke();
    task.invoke();

    assert_eq!(*log.borrow(), ["work", "hop", "work"]);
}

#[test]
fn later_hop_replaces_earlier() {
    init_logging();
    let log = Rc::new(RefCell::new(Vec::new()));
    let task = FnTask::new(|| {});

    let (first, second) = (log.clone(), log.clone());
    task.core().set_hop(move || first.borrow_mut().push(1));
    task.core().set_hop(move || second.borrow_mut().push(2));
    task.invoke();

    assert_eq!(*log.borrow(), [2]);
}

#[test]
fn hop_action_may_reenter_the_task() {
    init_logging();
    // An attach action that enables an interrupt can invoke the task again
    // right away.
    let depth = Rc::new(Cell::new(0));
    let runs = Rc::new(Cell::new(0));
    let runs2 = runs.clone();
    let task = Rc::new(FnTask::new(move || runs2.set(runs2.get() + 1)));

    let (task2, depth2) = (task.clone(), depth.clone());
    task.core().set_hop(move || {
        depth2.set(depth2.get() + 1);
        task2.invoke();
    });
    task.invoke();

    assert_eq!(runs.get(), 2);
    assert_eq!(depth.get(), 1);
}

#[test]
fn boxed_tasks_dispatch_dynamically() {
    init_logging();
    let hits = Rc::new(Cell::new(0));
    let hits2 = hits.clone();
    let coroutine = Coroutine::new(|| Coroutine::yield_now());
    let tasks: Vec<Box<dyn Task>> = std::vec![
        Box::new(FnTask::new(move || hits2.set(hits2.get() + 1))),
        Box::new(coroutine),
    ];

    for _ in 0..2 {
        for task in &tasks {
            task.invoke();
        }
    }
    assert_eq!(hits.get(), 2);
}

#[test]
fn coroutine_set_hop_applies_on_invoke() {
    init_logging();
    let applied = Rc::new(Cell::new(false));
    let applied2 = applied.clone();
    let coroutine = Coroutine::new(|| Coroutine::yield_now());

    coroutine.set_hop(move || applied2.set(true));
    coroutine.resume();
    assert!(!applied.get());
    coroutine.invoke();
    assert!(applied.get());
    assert_eq!(coroutine.state(), State::Complete);
}
