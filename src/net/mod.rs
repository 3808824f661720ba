//! Client-side connection establishment
//!
//! This module turns a (host, port) pair into a ready [`ClientStream`]: name
//! resolution, candidate iteration with per-attempt deadlines, optional
//! SOCKS4 / SOCKS5 / HTTP CONNECT proxy negotiation, and optional TLS. The
//! same machinery is exposed two ways: a blocking [`Client::connect`] and a
//! non-blocking [`PendingConnect`] that the caller drives from its own event
//! loop. Both paths run the same handshake code and reach the same outcomes.

pub mod client;
pub mod connect;
pub mod proxy;
pub mod resolver;
pub mod session;
pub mod stream;
pub mod tls;

pub use client::{Client, ClientBuilder};
pub use connect::{ConnectConfig, Connector, Interest, PendingConnect, Progress};
pub use proxy::{ProxyConfig, ProxyProtocol};
pub use resolver::{Resolver, StaticResolver, SystemResolver};
pub use session::{poll_fd, PollEvents, Session, SessionOps};
pub use stream::ClientStream;
pub use tls::{TlsConfig, TlsConfigBuilder, TlsVersion};

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced while establishing a connection
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not resolve {0}")]
    ResolutionFailed(String),

    #[error("operation timed out")]
    TimedOut,

    #[error("connection refused")]
    ConnectionRefused,

    #[error("network unreachable")]
    NetworkUnreachable,

    #[error("host unreachable")]
    HostUnreachable,

    #[error("access denied by proxy")]
    AccessDenied,

    #[error("address family not supported")]
    AddressFamilyNotSupported,

    #[error("TTL expired")]
    TtlExpired,

    #[error("command not supported by proxy")]
    CommandNotSupported,

    #[error("service not found")]
    ServiceNotFound,

    #[error("proxy protocol violation: {0}")]
    ProxyViolation(String),

    #[error("proxy rejected tunnel with status {0}")]
    ProxyRejected(u16),

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("operation aborted")]
    Aborted,

    #[error("TLS error: {0}")]
    Tls(#[from] tls::TlsError),

    #[error("HTTP error: {0}")]
    Http(#[from] crate::http::Error),
}
