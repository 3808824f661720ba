//! Client facade
//!
//! [`Client`] bundles a [`Connector`] behind a builder and offers the two
//! entry points: blocking [`Client::connect`] and non-blocking
//! [`Client::start_connect`]. The blocking path drives the same
//! [`PendingConnect`] machine, waiting with poll(2) between steps.

use std::sync::Arc;
use std::time::Instant;

use super::connect::{ConnectConfig, Connector, PendingConnect, Progress};
use super::proxy::ProxyConfig;
use super::resolver::{Resolver, SystemResolver};
use super::session::poll_fd;
use super::stream::ClientStream;
use super::tls::TlsConfig;
use super::{Error, Result};

/// Connection-establishing client
pub struct Client {
    connector: Connector,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Client with default settings: system resolver, 30 second timeout,
    /// no proxy, no TLS
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Connect, blocking until ready or failed
    ///
    /// The returned stream is in blocking mode.
    pub fn connect(&self, host: &str, port: u16) -> Result<ClientStream> {
        let mut pending = self.connector.start(host, port);
        loop {
            match pending.drive() {
                Progress::Complete => {
                    let stream = pending.take_result().ok_or(Error::Aborted)??;
                    stream.set_nonblocking(false)?;
                    return Ok(stream);
                }
                Progress::Pending(interest) => {
                    let Some(fd) = pending.as_raw_fd() else {
                        return Err(Error::Aborted);
                    };
                    let wait = pending
                        .deadline()
                        .map(|d| d.saturating_duration_since(Instant::now()));
                    poll_fd(fd, interest.into(), wait)?;
                }
            }
        }
    }

    /// Begin a non-blocking connect, to be driven by the caller
    pub fn start_connect(&self, host: &str, port: u16) -> PendingConnect {
        self.connector.start(host, port)
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`Client`]
pub struct ClientBuilder {
    config: ConnectConfig,
    resolver: Arc<dyn Resolver>,
}

impl ClientBuilder {
    fn new() -> Self {
        ClientBuilder {
            config: ConnectConfig::default(),
            resolver: Arc::new(SystemResolver),
        }
    }

    /// Per-attempt connect timeout; `Duration::ZERO` disables it
    pub fn timeout(mut self, timeout: std::time::Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Route connections through a proxy
    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.config.proxy = Some(proxy);
        self
    }

    /// Wrap established connections in TLS
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.config.tls = Some(tls);
        self
    }

    /// Substitute the name resolver
    pub fn resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn build(self) -> Client {
        Client {
            connector: Connector::new(self.config, self.resolver),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::resolver::StaticResolver;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_blocking_connect_and_echo() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).unwrap();
            stream.write_all(&buf).unwrap();
        });

        let client = Client::builder()
            .resolver(Arc::new(StaticResolver::new(vec![addr])))
            .timeout(Duration::from_secs(5))
            .build();

        let mut stream = client.connect("localhost", addr.port()).unwrap();
        stream.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        handle.join().unwrap();
    }

    #[test]
    fn test_blocking_connect_resolution_failure() {
        let client = Client::builder()
            .resolver(Arc::new(StaticResolver::new(Vec::new())))
            .build();
        assert!(matches!(
            client.connect("nowhere", 80),
            Err(Error::ResolutionFailed(_))
        ));
    }

    #[test]
    fn test_start_connect_is_nonblocking() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let client = Client::builder()
            .resolver(Arc::new(StaticResolver::new(vec![addr])))
            .build();
        let mut pending = client.start_connect("localhost", addr.port());
        while let Progress::Pending(interest) = pending.drive() {
            let fd = pending.as_raw_fd().unwrap();
            poll_fd(fd, interest.into(), Some(Duration::from_secs(5))).unwrap();
        }
        assert!(pending.take_result().unwrap().is_ok());
    }
}
