use libc::{FD_ISSET, FD_SET, FD_ZERO, fd_set, pselect, timespec};
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Descriptors that pselect reported ready in one cycle.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReadyConnections {
    pub listener: bool,
    pub readable: Vec<RawFd>,
    pub writable: Vec<RawFd>,
}

impl ReadyConnections {
    pub fn count(&self) -> usize {
        self.readable.len() + self.writable.len() + usize::from(self.listener)
    }
}

pub struct SelectHandler {
    timeout: Duration,
}

impl SelectHandler {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Waits at most the configured timeout. An interrupting signal counts as
    /// an empty cycle so the caller can look at its shutdown flag.
    pub fn wait_for_events(
        &self,
        listener_fd: Option<RawFd>,
        read_fds: &[RawFd],
        write_fds: &[RawFd],
    ) -> io::Result<ReadyConnections> {
        self.wait_with_timeout(listener_fd, read_fds, write_fds, self.timeout)
    }

    pub fn wait_with_timeout(
        &self,
        listener_fd: Option<RawFd>,
        read_fds: &[RawFd],
        write_fds: &[RawFd],
        timeout: Duration,
    ) -> io::Result<ReadyConnections> {
        let mut read_set: fd_set = unsafe { std::mem::zeroed() };
        let mut write_set: fd_set = unsafe { std::mem::zeroed() };

        unsafe { FD_ZERO(&mut read_set) };
        unsafe { FD_ZERO(&mut write_set) };

        let mut max_fd = -1;

        for &fd in listener_fd.iter().chain(read_fds) {
            unsafe { FD_SET(fd, &mut read_set) };
            max_fd = max_fd.max(fd);
        }

        for &fd in write_fds {
            unsafe { FD_SET(fd, &mut write_set) };
            max_fd = max_fd.max(fd);
        }

        let timeout = timespec {
            tv_sec: timeout.as_secs() as _,
            tv_nsec: timeout.subsec_nanos() as _,
        };

        let ready_count = unsafe {
            pselect(
                max_fd + 1,
                &mut read_set,
                &mut write_set,
                std::ptr::null_mut(),
                &timeout,
                std::ptr::null(),
            )
        };

        if ready_count < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(ReadyConnections::default());
            }
            return Err(err);
        }

        let mut ready = ReadyConnections::default();
        if ready_count == 0 {
            return Ok(ready);
        }

        if let Some(fd) = listener_fd {
            ready.listener = unsafe { FD_ISSET(fd, &read_set) };
        }
        ready.readable = read_fds
            .iter()
            .copied()
            .filter(|&fd| unsafe { FD_ISSET(fd, &read_set) })
            .collect();
        ready.writable = write_fds
            .iter()
            .copied()
            .filter(|&fd| unsafe { FD_ISSET(fd, &write_set) })
            .collect();

        Ok(ready)
    }
}
