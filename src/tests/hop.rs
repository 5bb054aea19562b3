extern crate std;

use std::cell::{Cell, RefCell};
use std::ptr::NonNull;
use std::rc::Rc;
use std::vec::Vec;

use super::init_logging;
use crate::coroutine::{Coroutine, State};
use crate::hop::Hop;
use crate::task::Task;

type Log = Rc<RefCell<Vec<&'static str>>>;

fn record(log: &Log, event: &'static str) -> impl Fn() + 'static {
    let log = log.clone();
    move || log.borrow_mut().push(event)
}

fn take(log: &Log) -> Vec<&'static str> {
    log.borrow_mut().drain(..).collect()
}

#[test]
fn nested_hops_run_in_scope_order() {
    init_logging();
    let log: Log = Rc::default();
    let events = log.clone();
    let coroutine = Coroutine::new(move || {
        let log = &events;
        Hop::scope(record(log, "A.attach"), record(log, "A.detach"), |_| {
            Coroutine::yield_now();
            Hop::scope(record(log, "B.attach"), record(log, "B.detach"), |_| {
                Coroutine::yield_now();
            });
            Coroutine::yield_now();
        });
    });

    // Attach actions are deferred to the end of the iteration.
    coroutine.invoke();
    assert_eq!(take(&log), ["A.attach"]);

    coroutine.invoke();
    assert_eq!(take(&log), ["A.detach", "B.attach"]);

    coroutine.invoke();
    assert_eq!(take(&log), ["B.detach", "A.attach"]);

    coroutine.invoke();
    assert_eq!(take(&log), ["A.detach"]);
    assert_eq!(coroutine.state(), State::Complete);
}

#[test]
fn attach_is_never_synchronous() {
    init_logging();
    let log: Log = Rc::default();
    let events = log.clone();
    let coroutine = Coroutine::new(move || {
        let log = &events;
        Hop::scope(record(log, "attach"), record(log, "detach"), |_| {
            log.borrow_mut().push("inside");
            Coroutine::yield_now();
        });
    });

    // A bare resume does not apply the pending action.
    coroutine.resume();
    assert_eq!(take(&log), ["inside"]);

    let pending = coroutine.core().take_hop().unwrap();
    pending();
    assert_eq!(take(&log), ["attach"]);

    coroutine.invoke();
    assert_eq!(take(&log), ["detach"]);
    assert!(coroutine.core().take_hop().is_none());
}

#[test]
fn hop_swaps_the_pair_in_place() {
    init_logging();
    let log: Log = Rc::default();
    let events = log.clone();
    let coroutine = Coroutine::new(move || {
        let log = &events;
        Hop::scope(record(log, "A.attach"), record(log, "A.detach"), |_| {
            Hop::scope(record(log, "B.attach"), record(log, "B.detach"), |hop| {
                Coroutine::yield_now();
                hop.hop(record(log, "C.attach"), record(log, "C.detach"));
                Coroutine::yield_now();
            });
        });
    });

    coroutine.invoke();
    assert_eq!(take(&log), ["A.detach", "B.attach"]);

    coroutine.invoke();
    assert_eq!(take(&log), ["B.detach", "C.attach"]);

    // Leaving the swapped scope runs the new detach and re-arms the outer
    // attach, which the outer scope then disarms again as it detaches.
    coroutine.invoke();
    assert_eq!(take(&log), ["C.detach", "A.detach"]);
    assert_eq!(coroutine.state(), State::Complete);
}

#[test]
fn completed_coroutine_is_left_detached() {
    init_logging();
    let log: Log = Rc::default();
    let events = log.clone();
    let coroutine = Coroutine::new(move || {
        let log = &events;
        Hop::scope(record(log, "A.attach"), record(log, "A.detach"), |_| {
            Hop::scope(record(log, "B.attach"), record(log, "B.detach"), |_| {
                Coroutine::yield_now();
            });
        });
    });

    coroutine.invoke();
    assert_eq!(take(&log), ["A.detach", "B.attach"]);

    // Both scopes close in the same iteration: the last event must be the
    // outer detach, with no attach left over for a finished coroutine.
    coroutine.invoke();
    assert_eq!(take(&log), ["B.detach", "A.detach"]);
    assert_eq!(coroutine.state(), State::Complete);
    assert!(coroutine.core().take_hop().is_none());

    coroutine.invoke();
    assert!(take(&log).is_empty());
}

#[test]
fn attach_runs_as_the_owner() {
    init_logging();
    let seen = Rc::new(Cell::new(None));
    let seen2 = seen.clone();
    let coroutine = Coroutine::new(move || {
        let seen = seen2.clone();
        Hop::scope(
            move || seen.set(Some(Coroutine::current())),
            || {},
            |_| Coroutine::yield_now(),
        );
    });
    let address = NonNull::from(&*coroutine);

    coroutine.invoke();
    assert_eq!(seen.get(), Some(Some(address)));
    assert_eq!(Coroutine::current(), None);

    coroutine.invoke();
    assert_eq!(coroutine.state(), State::Complete);
}

#[test]
fn hops_of_different_coroutines_are_independent() {
    init_logging();
    let log: Log = Rc::default();
    let make = |name: &'static str, detach: &'static str| {
        let events = log.clone();
        Coroutine::new(move || {
            Hop::scope(record(&events, name), record(&events, detach), |_| {
                Coroutine::yield_now();
            });
        })
    };
    let first = make("first.attach", "first.detach");
    let second = make("second.attach", "second.detach");

    first.invoke();
    second.invoke();
    assert_eq!(take(&log), ["first.attach", "second.attach"]);

    second.invoke();
    first.invoke();
    assert_eq!(take(&log), ["second.detach", "first.detach"]);
}
