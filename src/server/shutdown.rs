use log::debug;
use std::io;
use std::sync::atomic::{AtomicI32, Ordering};

/// Number of the signal that asked the server to stop, 0 while running.
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    signo: AtomicI32,
}

/// The instance reachable from the C signal handler.
static PROCESS_SHUTDOWN: ShutdownSignal = ShutdownSignal::new();

impl ShutdownSignal {
    pub const fn new() -> Self {
        Self {
            signo: AtomicI32::new(0),
        }
    }

    /// Installs SIGINT/SIGTERM handlers that trip the process-wide signal.
    ///
    /// SIGPIPE is ignored so writes to a vanished peer fail with EPIPE instead
    /// of killing the process.
    pub fn install() -> io::Result<&'static ShutdownSignal> {
        let handler = handle_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;

        for (signo, action) in [
            (libc::SIGINT, handler),
            (libc::SIGTERM, handler),
            (libc::SIGPIPE, libc::SIG_IGN),
        ] {
            if unsafe { libc::signal(signo, action) } == libc::SIG_ERR {
                return Err(io::Error::last_os_error());
            }
            debug!("Installed handler for signal {}", signo);
        }

        Ok(&PROCESS_SHUTDOWN)
    }

    /// Records `signo` unless another signal got there first.
    pub fn trigger(&self, signo: i32) {
        let _ = self
            .signo
            .compare_exchange(0, signo, Ordering::SeqCst, Ordering::SeqCst);
    }

    pub fn signal(&self) -> Option<i32> {
        match self.signo.load(Ordering::SeqCst) {
            0 => None,
            signo => Some(signo),
        }
    }
}

extern "C" fn handle_signal(signo: libc::c_int) {
    PROCESS_SHUTDOWN.trigger(signo);
}
