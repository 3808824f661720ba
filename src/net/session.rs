//! Session operations abstraction
//!
//! A small trait over readable/writable transports so that plain TCP and TLS
//! connections can be driven by the same code, plus a wrapper that applies a
//! timeout to every read and write via poll(2).

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

use super::{Error, Result};

/// Poll events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvents {
    Read,
    Write,
    Both,
}

/// Operations available on an established session
pub trait SessionOps {
    /// Wait for the session to become ready for the requested operation
    ///
    /// Returns true if the session is ready, false if the wait timed out.
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool>;

    /// Read data from the session
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write data to the session
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Close the session
    fn close(&mut self) -> Result<()>;
}

/// Wait on a single file descriptor with poll(2)
///
/// `timeout` of None waits indefinitely. Returns true if the descriptor
/// became ready.
pub fn poll_fd(fd: RawFd, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
    use libc::{poll, pollfd, POLLIN, POLLOUT};

    let mut pfd = pollfd {
        fd,
        events: match events {
            PollEvents::Read => POLLIN,
            PollEvents::Write => POLLOUT,
            PollEvents::Both => POLLIN | POLLOUT,
        },
        revents: 0,
    };

    let timeout_ms = timeout.map(|d| d.as_millis() as i32).unwrap_or(-1);

    let result = unsafe { poll(&mut pfd as *mut pollfd, 1, timeout_ms) };

    if result < 0 {
        return Err(Error::Io(io::Error::last_os_error()));
    }

    Ok(result > 0)
}

/// Session wrapping a transport with a per-operation timeout
pub struct Session<S: SessionOps> {
    session: S,
    timeout: Option<Duration>,
}

impl<S: SessionOps> Session<S> {
    pub fn new(session: S) -> Self {
        Session {
            session,
            timeout: Some(Duration::from_secs(10)),
        }
    }

    /// Set the timeout for operations
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Get the timeout
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Read data, waiting at most the configured timeout for readiness
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.session.poll(PollEvents::Read, self.timeout)? {
            return Err(Error::TimedOut);
        }
        self.session.read(buf)
    }

    /// Write data, waiting at most the configured timeout for readiness
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if !self.session.poll(PollEvents::Write, self.timeout)? {
            return Err(Error::TimedOut);
        }
        self.session.write(buf)
    }

    /// Close the session
    pub fn close(&mut self) -> Result<()> {
        self.session.close()
    }

    /// Get a reference to the underlying session
    pub fn get_ref(&self) -> &S {
        &self.session
    }

    /// Get a mutable reference to the underlying session
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.session
    }
}
