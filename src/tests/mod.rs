extern crate std;

use std::sync::Once;

mod fatal;
mod hop;
mod task;
#[cfg(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64")))]
mod trampoline;

/// Routes `log` output of the crate to stderr, once per test binary.
fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = simple_logger::SimpleLogger::new()
            .with_level(log::LevelFilter::Trace)
            .init();
    });
}
