//! Every fatal fault terminates the process, so each of these tests re-runs
//! itself in a child copy of the test binary and checks how the child died.

extern crate std;

use std::cell::Cell;
use std::env;
use std::mem::ManuallyDrop;
use std::process::Command;
use std::ptr;
use std::rc::Rc;
use std::string::String;

use crate::coroutine::Coroutine;
use crate::hop::Hop;
use crate::stack::{HeapStack, MIN_STACK_SIZE};
use crate::task::{Task, TaskCore};

const CHILD_ENV: &str = "HOPPING_FATAL_CHILD";

fn stderr_sink(message: &str) {
    std::eprintln!("{}", message);
}

/// Runs `trigger` in a child process executing only `test`, and returns the
/// line the child's diagnostic sink wrote. The child must not survive.
fn fatal_message(test: &str, trigger: impl FnOnce()) -> String {
    if env::var_os(CHILD_ENV).is_some() {
        crate::set_diagnostic_sink(stderr_sink);
        trigger();
        // Only reached if no fault fired.
        std::process::exit(0);
    }

    let name = std::format!("tests::fatal::{}", test);
    let output = Command::new(env::current_exe().unwrap())
        .args([name.as_str(), "--exact", "--nocapture", "--test-threads", "1"])
        .env(CHILD_ENV, "1")
        .output()
        .unwrap();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    assert!(!output.status.success(), "{} survived:\n{}", test, stderr);
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(output.status.signal(), Some(libc::SIGABRT), "{}", stderr);
    }

    match stderr.lines().find(|line| line.starts_with("fatal ")) {
        Some(line) => line.into(),
        None => panic!("no diagnostic from {}:\n{}", test, stderr),
    }
}

/// Checks `message` reads `fatal <file>:<line>: <reason>`.
fn assert_reported(message: &str, file: &str, reason: &str) {
    let rest = message.strip_prefix("fatal ").unwrap();
    let (location, actual) = rest.split_once(": ").unwrap();
    let (actual_file, line) = location.split_once(':').unwrap();
    assert_eq!(actual_file, file, "{}", message);
    assert!(line.parse::<u32>().unwrap() > 0, "{}", message);
    assert_eq!(actual, reason, "{}", message);
}

#[test]
fn dropping_ready_coroutine() {
    let message = fatal_message("dropping_ready_coroutine", || {
        drop(Coroutine::new(|| {}));
    });
    assert_reported(
        &message,
        "coroutine.rs",
        "destruct when coroutine was not complete, state Ready",
    );
}

#[test]
fn dropping_running_coroutine() {
    let message = fatal_message("dropping_running_coroutine", || {
        let coroutine = Coroutine::new(|| Coroutine::yield_now());
        coroutine.resume();
        drop(coroutine);
    });
    assert_reported(
        &message,
        "coroutine.rs",
        "destruct when coroutine was not complete, state Running",
    );
}

#[test]
fn invoking_a_destroyed_task() {
    struct Stale {
        core: ManuallyDrop<TaskCore>,
    }

    impl Task for Stale {
        fn core(&self) -> &TaskCore {
            &self.core
        }

        fn run_iteration(&self) {}
    }

    let message = fatal_message("invoking_a_destroyed_task", || {
        let mut task = Stale {
            core: ManuallyDrop::new(TaskCore::new()),
        };
        unsafe { ManuallyDrop::drop(&mut task.core) };
        task.invoke();
    });
    assert!(message.contains("task.rs:"), "{}", message);
    assert!(
        message.contains(": bad this pointer or object corrupted: 0x"),
        "{}",
        message
    );
}

#[test]
fn accessor_checks_the_marker() {
    let message = fatal_message("accessor_checks_the_marker", || {
        let coroutine = Coroutine::new(|| {});
        coroutine.core().corrupt();
        coroutine.state();
    });
    assert!(message.starts_with("fatal coroutine.rs:"), "{}", message);
    assert!(message.contains(": bad this pointer or object corrupted: 0x"), "{}", message);
}

#[test]
fn resuming_itself() {
    let message = fatal_message("resuming_itself", || {
        let this = Rc::new(Cell::new(ptr::null::<Coroutine>()));
        let this2 = this.clone();
        let coroutine = Coroutine::new(move || unsafe { (*this2.get()).resume() });
        this.set(&*coroutine);
        coroutine.resume();
    });
    assert_reported(
        &message,
        "coroutine.rs",
        "resume of a coroutine which is already executing",
    );
}

#[test]
fn coroutine_local_overflow() {
    let message = fatal_message("coroutine_local_overflow", || {
        crate::coroutine_local! {
            static HUGE: [u8; 8192] = [0; 8192];
        }
        HUGE.get();
    });
    assert!(message.starts_with("fatal local.rs:"), "{}", message);
    assert!(
        message.contains(": coroutine-local heap exhausted: need "),
        "{}",
        message
    );
    assert!(message.ends_with(", have 4096"), "{}", message);
}

#[test]
fn body_larger_than_stack() {
    let message = fatal_message("body_larger_than_stack", || {
        let payload = [1u8; 2 * MIN_STACK_SIZE];
        let stack = HeapStack::new(MIN_STACK_SIZE).unwrap();
        drop(Coroutine::with_stack(stack, move || {
            std::hint::black_box(&payload);
        }));
    });
    assert!(message.starts_with("fatal continuation.rs:"), "{}", message);
    assert!(
        message.ends_with(&std::format!("does not fit in a {} byte stack", MIN_STACK_SIZE)),
        "{}",
        message
    );
}

#[test]
fn hop_at_baseline() {
    let message = fatal_message("hop_at_baseline", || {
        Hop::scope(|| {}, || {}, |_| ());
    });
    assert_reported(
        &message,
        "hop.rs",
        "hop descriptor created outside of a coroutine",
    );
}

#[test]
fn panic_in_body() {
    let message = fatal_message("panic_in_body", || {
        Coroutine::new(|| panic!("body gave up")).resume();
    });
    assert_reported(&message, "coroutine.rs", "panic unwound out of a coroutine body");
}
