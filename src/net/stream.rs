//! Established connection stream

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

use openssl::ssl::SslStream;

use super::session::{poll_fd, PollEvents, SessionOps};
use super::Result;

/// A ready client connection, plain or TLS
///
/// Implements [`Read`] and [`Write`] so protocol code does not care which
/// variant it holds, and [`SessionOps`] for poll-based timeouts.
#[derive(Debug)]
pub enum ClientStream {
    Plain(TcpStream),
    Tls(SslStream<TcpStream>),
}

impl ClientStream {
    /// The underlying TCP stream
    pub fn tcp(&self) -> &TcpStream {
        match self {
            ClientStream::Plain(stream) => stream,
            ClientStream::Tls(stream) => stream.get_ref(),
        }
    }

    /// True if the connection is TLS-wrapped
    pub fn is_tls(&self) -> bool {
        matches!(self, ClientStream::Tls(_))
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.tcp().peer_addr()
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        self.tcp().set_nonblocking(nonblocking)
    }

    pub fn shutdown(&self) -> io::Result<()> {
        self.tcp().shutdown(Shutdown::Both)
    }
}

impl AsRawFd for ClientStream {
    fn as_raw_fd(&self) -> RawFd {
        self.tcp().as_raw_fd()
    }
}

impl Read for ClientStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ClientStream::Plain(stream) => stream.read(buf),
            ClientStream::Tls(stream) => stream.read(buf),
        }
    }
}

impl Write for ClientStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            ClientStream::Plain(stream) => stream.write(buf),
            ClientStream::Tls(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            ClientStream::Plain(stream) => stream.flush(),
            ClientStream::Tls(stream) => stream.flush(),
        }
    }
}

impl SessionOps for ClientStream {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
        // TLS may hold already-decrypted bytes that the socket will not
        // signal for
        if let ClientStream::Tls(stream) = self {
            if matches!(events, PollEvents::Read | PollEvents::Both) && stream.ssl().pending() > 0
            {
                return Ok(true);
            }
        }
        poll_fd(self.as_raw_fd(), events, timeout)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Read::read(self, buf).map_err(Into::into)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        Write::write(self, buf).map_err(Into::into)
    }

    fn close(&mut self) -> Result<()> {
        self.shutdown().map_err(Into::into)
    }
}
