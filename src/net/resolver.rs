//! Name resolution

use std::net::{SocketAddr, ToSocketAddrs};

use super::{Error, Result};

/// Resolves a host name and port to candidate socket addresses
///
/// The returned order is the order connection attempts are made in.
pub trait Resolver: Send + Sync {
    fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>>;
}

/// Resolver backed by the operating system
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

impl Resolver for SystemResolver {
    fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|_| Error::ResolutionFailed(format!("{}:{}", host, port)))?
            .collect();
        if addrs.is_empty() {
            return Err(Error::ResolutionFailed(format!("{}:{}", host, port)));
        }
        Ok(addrs)
    }
}

/// Resolver with a fixed answer, mainly for tests
#[derive(Debug, Clone)]
pub struct StaticResolver {
    addrs: Vec<SocketAddr>,
}

impl StaticResolver {
    pub fn new(addrs: Vec<SocketAddr>) -> Self {
        StaticResolver { addrs }
    }
}

impl Resolver for StaticResolver {
    fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>> {
        if self.addrs.is_empty() {
            return Err(Error::ResolutionFailed(format!("{}:{}", host, port)));
        }
        Ok(self.addrs.clone())
    }
}
