// src/os/epoll.rs

//! Wrapper around `epoll` using raw `libc` calls, used to wait on a backend's
//! connection file descriptor with a timeout.

use anyhow::{Context, Result};
use bitflags::bitflags;
use log::{debug, trace, warn};
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EpollFlags: u32 {
        const EPOLLIN = libc::EPOLLIN as u32;
        const EPOLLPRI = libc::EPOLLPRI as u32;
        const EPOLLERR = libc::EPOLLERR as u32;
        const EPOLLHUP = libc::EPOLLHUP as u32;
    }
}

const MAX_EVENTS_BUFFER_SIZE: usize = 8;

/// A readiness event: the token the fd was registered with and what happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub token: u64,
    pub flags: EpollFlags,
}

pub struct EventMonitor {
    epoll_fd: RawFd,
    event_buffer: [libc::epoll_event; MAX_EVENTS_BUFFER_SIZE],
}

impl EventMonitor {
    pub fn new() -> Result<Self> {
        let epoll_fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epoll_fd == -1 {
            return Err(io::Error::last_os_error())
                .context("Failed to create epoll instance (epoll_create1)");
        }
        debug!("EventMonitor created with epoll_fd: {}", epoll_fd);
        Ok(Self {
            epoll_fd,
            event_buffer: [libc::epoll_event { events: 0, u64: 0 }; MAX_EVENTS_BUFFER_SIZE],
        })
    }

    pub fn add(&self, fd: RawFd, token: u64, flags: EpollFlags) -> Result<()> {
        let mut event = libc::epoll_event {
            events: flags.bits(),
            u64: token,
        };
        if unsafe { libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_ADD, fd, &mut event) } == -1 {
            return Err(io::Error::last_os_error())
                .with_context(|| format!("Failed to add fd {} to epoll (token: {})", fd, token));
        }
        trace!(
            "Added fd {} to epoll_fd {} with token {} and flags {:?}",
            fd,
            self.epoll_fd,
            token,
            flags
        );
        Ok(())
    }

    /// Wait up to `timeout` for registered fds to become ready.
    ///
    /// An interrupted wait (EINTR) reports no readiness rather than an error.
    pub fn wait(&mut self, timeout: Duration) -> Result<Vec<Readiness>> {
        let timeout_ms = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);
        let num_events = unsafe {
            libc::epoll_wait(
                self.epoll_fd,
                self.event_buffer.as_mut_ptr(),
                MAX_EVENTS_BUFFER_SIZE as libc::c_int,
                timeout_ms,
            )
        };

        if num_events == -1 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                trace!("EventMonitor: epoll_wait interrupted (EINTR)");
                return Ok(Vec::new());
            }
            return Err(err).context("epoll_wait failed in EventMonitor");
        }

        Ok(self.event_buffer[..num_events as usize]
            .iter()
            .map(|event| Readiness {
                token: event.u64,
                flags: EpollFlags::from_bits_truncate(event.events),
            })
            .collect())
    }
}

impl Drop for EventMonitor {
    fn drop(&mut self) {
        if unsafe { libc::close(self.epoll_fd) } == -1 {
            warn!(
                "Failed to close epoll_fd {} in EventMonitor::drop: {}",
                self.epoll_fd,
                io::Error::last_os_error()
            );
        } else {
            debug!("Closed epoll_fd {} in EventMonitor::drop", self.epoll_fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use test_log::test;

    struct Pipe {
        read: RawFd,
        write: RawFd,
    }

    impl Pipe {
        fn new() -> Self {
            let mut fds = [0 as libc::c_int; 2];
            assert_eq!(unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) }, 0);
            Self {
                read: fds[0],
                write: fds[1],
            }
        }
    }

    impl Drop for Pipe {
        fn drop(&mut self) {
            unsafe {
                libc::close(self.read);
                libc::close(self.write);
            }
        }
    }

    #[test]
    fn wait_times_out_when_nothing_is_ready() -> Result<()> {
        let pipe = Pipe::new();
        let mut monitor = EventMonitor::new()?;
        monitor.add(pipe.read, 7, EpollFlags::EPOLLIN)?;

        let start = Instant::now();
        let ready = monitor.wait(Duration::from_millis(20))?;
        assert!(ready.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(15));
        Ok(())
    }

    #[test]
    fn wait_reports_the_token_of_a_readable_fd() -> Result<()> {
        let pipe = Pipe::new();
        let mut monitor = EventMonitor::new()?;
        monitor.add(pipe.read, 42, EpollFlags::EPOLLIN)?;

        let byte = [1u8];
        assert_eq!(unsafe { libc::write(pipe.write, byte.as_ptr().cast(), 1) }, 1);

        let ready = monitor.wait(Duration::from_secs(1))?;
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].token, 42);
        assert!(ready[0].flags.contains(EpollFlags::EPOLLIN));
        Ok(())
    }

    #[test]
    fn adding_an_invalid_fd_fails() -> Result<()> {
        let monitor = EventMonitor::new()?;
        assert!(monitor.add(-1, 0, EpollFlags::EPOLLIN).is_err());
        Ok(())
    }
}
