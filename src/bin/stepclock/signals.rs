//! Bridge termination signals to a [`StopSignal`].
//!
//! The handlers only set an atomic flag; a watcher thread turns the flag
//! into a stop request, since a condvar cannot be notified from a handler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use stepclock::StopSignal;
use tracing::info;

static SIGNALLED: AtomicBool = AtomicBool::new(false);

const POLL_INTERVAL: Duration = Duration::from_millis(20);

extern "C" fn on_signal(_signal: libc::c_int) {
    SIGNALLED.store(true, Ordering::SeqCst);
}

/// Install handlers and forward the first signal to `stop`
pub fn forward_to(stop: StopSignal) -> std::io::Result<()> {
    let handler = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;

    #[cfg(unix)]
    let signals = [libc::SIGINT, libc::SIGTERM, libc::SIGHUP, libc::SIGQUIT];
    #[cfg(not(unix))]
    let signals = [libc::SIGINT, libc::SIGTERM];

    for signal in signals {
        // SAFETY: the handler only touches an atomic
        if unsafe { libc::signal(signal, handler) } == libc::SIG_ERR {
            return Err(std::io::Error::last_os_error());
        }
    }

    thread::Builder::new()
        .name("stepclock-signals".into())
        .spawn(move || loop {
            if SIGNALLED.load(Ordering::SeqCst) {
                info!("termination signal received");
                stop.request_stop();
                break;
            }
            if stop.wait_timeout(POLL_INTERVAL) {
                break;
            }
        })?;
    Ok(())
}
