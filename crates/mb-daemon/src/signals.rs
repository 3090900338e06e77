//! Signal handling for graceful daemon shutdown.
//!
//! Registers SIGINT and SIGTERM handlers that raise an atomic flag; a
//! small poll thread propagates the flag to the server's stop flag so the
//! event loop winds down on its next pass. Handlers touch nothing but
//! atomics (async-signal-safe).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Raised by the signal handlers themselves.
static SHUTDOWN_FLAG: AtomicBool = AtomicBool::new(false);

/// Register Unix signal handlers that raise `stop`.
///
/// On non-Unix platforms only manual stops work.
pub fn install(stop: Arc<AtomicBool>) -> std::io::Result<()> {
    std::thread::spawn(move || loop {
        if SHUTDOWN_FLAG.swap(false, Ordering::Relaxed) {
            info!("Shutdown signal received");
            stop.store(true, Ordering::Relaxed);
        }
        if stop.load(Ordering::Relaxed) {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    });

    #[cfg(unix)]
    register_unix_handlers();

    Ok(())
}

#[cfg(unix)]
fn register_unix_handlers() {
    use std::os::raw::c_int;

    extern "C" fn shutdown_handler(_: c_int) {
        SHUTDOWN_FLAG.store(true, Ordering::Relaxed);
    }

    #[allow(unsafe_code)]
    unsafe {
        libc::signal(libc::SIGTERM, shutdown_handler as libc::sighandler_t);
        libc::signal(libc::SIGINT, shutdown_handler as libc::sighandler_t);
    }

    debug!("Unix signal handlers registered");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_propagates_to_stop() {
        let stop = Arc::new(AtomicBool::new(false));
        install(Arc::clone(&stop)).unwrap();

        SHUTDOWN_FLAG.store(true, Ordering::Relaxed);

        let deadline = std::time::Instant::now() + Duration::from_secs(1);
        while !stop.load(Ordering::Relaxed) {
            assert!(std::time::Instant::now() < deadline, "stop flag never rose");
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}
