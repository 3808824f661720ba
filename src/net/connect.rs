//! Connection engine
//!
//! One connect operation walks
//! `resolve -> tcp connect -> [proxy handshake] -> [tls handshake] -> ready`
//! as a non-blocking state machine, [`PendingConnect`]. Candidates are tried
//! left to right with a fresh socket and a per-attempt deadline; a deadline
//! expiry is recorded as [`Error::TimedOut`] and the next candidate is tried,
//! while proxy and TLS failures end the whole operation. The blocking client
//! drives the same machine with poll(2) waits, so both paths reach the same
//! outcome for the same peer behavior.

use std::io::{self, Read, Write};
use std::mem;
use std::net::{SocketAddr, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::debug;
use openssl::ssl::{ErrorCode, HandshakeError, MidHandshakeSslStream};
use socket2::{Domain, Socket, Type};

use super::proxy::{Action, ProxyConfig, ProxyHandshake, ProxyProtocol};
use super::resolver::Resolver;
use super::session::{poll_fd, PollEvents};
use super::stream::ClientStream;
use super::tls::{TlsConfig, TlsError};
use super::{Error, Result};

/// Default per-attempt deadline
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings for one connector
#[derive(Clone)]
pub struct ConnectConfig {
    /// Per-attempt deadline; `Duration::ZERO` disables it
    pub timeout: Duration,
    pub proxy: Option<ProxyConfig>,
    pub tls: Option<TlsConfig>,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        ConnectConfig {
            timeout: DEFAULT_TIMEOUT,
            proxy: None,
            tls: None,
        }
    }
}

/// What the caller should poll the connect fd for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Read,
    Write,
}

impl From<Interest> for PollEvents {
    fn from(interest: Interest) -> Self {
        match interest {
            Interest::Read => PollEvents::Read,
            Interest::Write => PollEvents::Write,
        }
    }
}

/// Result of driving a pending connect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Waiting for the fd to become ready for `Interest`
    Pending(Interest),
    /// The operation finished; the result is available
    Complete,
}

type Callback = Box<dyn FnOnce(Result<ClientStream>) + Send>;

/// Starts connect operations
pub struct Connector {
    config: ConnectConfig,
    resolver: Arc<dyn Resolver>,
}

impl Connector {
    pub fn new(config: ConnectConfig, resolver: Arc<dyn Resolver>) -> Self {
        Connector { config, resolver }
    }

    /// Begin connecting to `host:port`
    ///
    /// Resolution happens up front; on failure the returned operation is
    /// already complete with [`Error::ResolutionFailed`].
    pub fn start(&self, host: &str, port: u16) -> PendingConnect {
        let mut pending = PendingConnect {
            endpoints: Vec::new(),
            index: 0,
            handshake_target: None,
            server_host: host.to_string(),
            proxy_protocol: self.config.proxy.as_ref().map(|p| p.protocol),
            tls: self.config.tls.clone(),
            timeout: self.config.timeout,
            deadline: None,
            state: ConnState::Done,
            interest: Interest::Write,
            last_error: None,
            result: None,
            callback: None,
        };
        match self.plan(host, port) {
            Ok((endpoints, _)) if endpoints.is_empty() => {
                pending.finish(Err(Error::ResolutionFailed(format!("{}:{}", host, port))));
            }
            Ok((endpoints, handshake_target)) => {
                pending.endpoints = endpoints;
                pending.handshake_target = handshake_target;
                pending.start_attempt();
            }
            Err(err) => pending.finish(Err(err)),
        }
        pending
    }

    /// Resolve the endpoints to dial and, when proxied, the tunnel target
    ///
    /// With a proxy the TCP connects go to the proxy's endpoints and the
    /// handshake asks for the first resolved endpoint of the server name.
    fn plan(&self, host: &str, port: u16) -> Result<(Vec<SocketAddr>, Option<SocketAddr>)> {
        match &self.config.proxy {
            Some(proxy) => {
                let targets = self.resolver.resolve(host, port)?;
                let target = *targets
                    .first()
                    .ok_or_else(|| Error::ResolutionFailed(format!("{}:{}", host, port)))?;
                let proxies = self.resolver.resolve(&proxy.host, proxy.port)?;
                Ok((proxies, Some(target)))
            }
            None => Ok((self.resolver.resolve(host, port)?, None)),
        }
    }
}

enum ConnState {
    /// TCP connect in flight on a non-blocking socket
    TcpConnecting { socket: Socket },
    Proxying {
        stream: TcpStream,
        handshake: ProxyHandshake,
    },
    TlsHandshake { mid: MidHandshakeSslStream<TcpStream> },
    Done,
}

/// A connect operation in flight
///
/// Drive it from an event loop: poll [`PendingConnect::as_raw_fd`] for
/// [`PendingConnect::interest`], call [`PendingConnect::drive`] when ready
/// (or on a timer tick), and collect the outcome with
/// [`PendingConnect::take_result`] or a callback registered with
/// [`PendingConnect::on_ready`]. The produced stream is in non-blocking mode.
pub struct PendingConnect {
    endpoints: Vec<SocketAddr>,
    index: usize,
    handshake_target: Option<SocketAddr>,
    server_host: String,
    proxy_protocol: Option<ProxyProtocol>,
    tls: Option<TlsConfig>,
    timeout: Duration,
    deadline: Option<Instant>,
    state: ConnState,
    interest: Interest,
    last_error: Option<Error>,
    result: Option<Result<ClientStream>>,
    callback: Option<Callback>,
}

impl PendingConnect {
    /// True once the operation has finished, successfully or not
    pub fn is_complete(&self) -> bool {
        matches!(self.state, ConnState::Done)
    }

    /// The fd to poll while the operation is pending
    pub fn as_raw_fd(&self) -> Option<RawFd> {
        match &self.state {
            ConnState::TcpConnecting { socket } => Some(socket.as_raw_fd()),
            ConnState::Proxying { stream, .. } => Some(stream.as_raw_fd()),
            ConnState::TlsHandshake { mid } => Some(mid.get_ref().as_raw_fd()),
            ConnState::Done => None,
        }
    }

    /// What the fd should be polled for, as of the last [`drive`] call
    ///
    /// [`drive`]: PendingConnect::drive
    pub fn interest(&self) -> Interest {
        self.interest
    }

    /// The current attempt's deadline, if one is armed
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Collect the outcome once complete
    ///
    /// Returns None while pending, and None after the result has already
    /// been taken or delivered to a callback.
    pub fn take_result(&mut self) -> Option<Result<ClientStream>> {
        self.result.take()
    }

    /// Register a completion callback, fired exactly once
    ///
    /// If the operation already finished, the callback fires immediately
    /// with the stored result.
    pub fn on_ready(&mut self, callback: impl FnOnce(Result<ClientStream>) + Send + 'static) {
        if let Some(result) = self.result.take() {
            callback(result);
        } else {
            self.callback = Some(Box::new(callback));
        }
    }

    /// Abort a pending operation
    ///
    /// The transport is closed and the outcome becomes [`Error::Aborted`];
    /// a registered callback still fires, exactly once.
    pub fn abort(&mut self) {
        if !self.is_complete() {
            self.state = ConnState::Done;
            self.finish(Err(Error::Aborted));
        }
    }

    /// Advance as far as the sockets allow
    pub fn drive(&mut self) -> Progress {
        loop {
            if self.is_complete() {
                return Progress::Complete;
            }
            if let Some(deadline) = self.deadline {
                if Instant::now() >= deadline {
                    debug!("attempt to {} timed out", self.endpoints[self.index]);
                    self.next_candidate(Error::TimedOut);
                    continue;
                }
            }
            match mem::replace(&mut self.state, ConnState::Done) {
                ConnState::Done => unreachable!(),
                ConnState::TcpConnecting { socket } => {
                    match self.step_tcp(socket) {
                        Some(progress) => return progress,
                        None => continue,
                    }
                }
                ConnState::Proxying { stream, handshake } => {
                    match self.step_proxy(stream, handshake) {
                        Some(progress) => return progress,
                        None => continue,
                    }
                }
                ConnState::TlsHandshake { mid } => match self.step_tls(mid) {
                    Some(progress) => return progress,
                    None => continue,
                },
            }
        }
    }

    /// Returning Some means yield to the caller; None means keep driving
    fn step_tcp(&mut self, socket: Socket) -> Option<Progress> {
        match poll_fd(socket.as_raw_fd(), PollEvents::Write, Some(Duration::ZERO)) {
            Err(err) => {
                self.finish(Err(err));
                None
            }
            Ok(false) => {
                self.state = ConnState::TcpConnecting { socket };
                Some(self.pending(Interest::Write))
            }
            Ok(true) => match socket.take_error() {
                Ok(Some(err)) => {
                    self.next_candidate(err.into());
                    None
                }
                Err(err) => {
                    self.next_candidate(err.into());
                    None
                }
                Ok(None) => {
                    debug!("connected to {}", self.endpoints[self.index]);
                    self.after_connected(socket.into());
                    None
                }
            },
        }
    }

    fn step_proxy(&mut self, mut stream: TcpStream, mut handshake: ProxyHandshake) -> Option<Progress> {
        match handshake.action() {
            Action::Complete => {
                self.layer_tls(stream);
                None
            }
            Action::Send(bytes) => match stream.write(bytes) {
                Ok(0) => {
                    self.finish(Err(Error::ConnectionClosed));
                    None
                }
                Ok(n) => {
                    handshake.advance_sent(n);
                    self.state = ConnState::Proxying { stream, handshake };
                    None
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    self.state = ConnState::Proxying { stream, handshake };
                    Some(self.pending(Interest::Write))
                }
                Err(err) => {
                    self.finish(Err(err.into()));
                    None
                }
            },
            Action::Recv => {
                let mut buf = [0u8; 512];
                match stream.read(&mut buf) {
                    Ok(0) => {
                        self.finish(Err(Error::ConnectionClosed));
                        None
                    }
                    Ok(n) => {
                        let mut fed = 0;
                        while fed < n && !handshake.is_complete() {
                            match handshake.advance_received(&buf[fed..n]) {
                                Ok(consumed) => fed += consumed,
                                Err(err) => {
                                    self.finish(Err(err));
                                    return None;
                                }
                            }
                        }
                        self.state = ConnState::Proxying { stream, handshake };
                        None
                    }
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                        self.state = ConnState::Proxying { stream, handshake };
                        Some(self.pending(Interest::Read))
                    }
                    Err(err) => {
                        self.finish(Err(err.into()));
                        None
                    }
                }
            }
        }
    }

    fn step_tls(&mut self, mid: MidHandshakeSslStream<TcpStream>) -> Option<Progress> {
        match mid.handshake() {
            Ok(stream) => {
                self.finish(Ok(ClientStream::Tls(stream)));
                None
            }
            Err(HandshakeError::WouldBlock(mid)) => {
                let interest = if mid.error().code() == ErrorCode::WANT_WRITE {
                    Interest::Write
                } else {
                    Interest::Read
                };
                self.state = ConnState::TlsHandshake { mid };
                Some(self.pending(interest))
            }
            Err(HandshakeError::Failure(mid)) => {
                self.finish(Err(Error::Tls(TlsError::HandshakeFailed(
                    mid.error().to_string(),
                ))));
                None
            }
            Err(HandshakeError::SetupFailure(stack)) => {
                self.finish(Err(Error::Tls(TlsError::OpenSsl(stack))));
                None
            }
        }
    }

    fn pending(&mut self, interest: Interest) -> Progress {
        self.interest = interest;
        Progress::Pending(interest)
    }

    fn start_attempt(&mut self) {
        let addr = self.endpoints[self.index];
        self.deadline = (self.timeout != Duration::ZERO).then(|| Instant::now() + self.timeout);
        debug!("connecting to {}", addr);

        let dial = || -> io::Result<(Socket, bool)> {
            let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None)?;
            socket.set_nonblocking(true)?;
            match socket.connect(&addr.into()) {
                Ok(()) => Ok((socket, true)),
                Err(err)
                    if err.raw_os_error() == Some(libc::EINPROGRESS)
                        || err.kind() == io::ErrorKind::WouldBlock =>
                {
                    Ok((socket, false))
                }
                Err(err) => Err(err),
            }
        };
        match dial() {
            Ok((socket, true)) => self.after_connected(socket.into()),
            Ok((socket, false)) => self.state = ConnState::TcpConnecting { socket },
            Err(err) => self.next_candidate(err.into()),
        }
    }

    fn after_connected(&mut self, stream: TcpStream) {
        match self.proxy_protocol {
            Some(protocol) => {
                // handshake_target is always present when a proxy is configured
                let Some(target) = self.handshake_target else {
                    self.finish(Err(Error::Aborted));
                    return;
                };
                match ProxyHandshake::new(protocol, target) {
                    Ok(handshake) => self.state = ConnState::Proxying { stream, handshake },
                    Err(err) => self.finish(Err(err)),
                }
            }
            None => self.layer_tls(stream),
        }
    }

    fn layer_tls(&mut self, stream: TcpStream) {
        let Some(config) = &self.tls else {
            self.finish(Ok(ClientStream::Plain(stream)));
            return;
        };
        let ssl = match config.new_ssl(&self.server_host) {
            Ok(ssl) => ssl,
            Err(err) => {
                self.finish(Err(err.into()));
                return;
            }
        };
        match ssl.connect(stream) {
            Ok(stream) => self.finish(Ok(ClientStream::Tls(stream))),
            Err(HandshakeError::WouldBlock(mid)) => self.state = ConnState::TlsHandshake { mid },
            Err(HandshakeError::Failure(mid)) => self.finish(Err(Error::Tls(
                TlsError::HandshakeFailed(mid.error().to_string()),
            ))),
            Err(HandshakeError::SetupFailure(stack)) => {
                self.finish(Err(Error::Tls(TlsError::OpenSsl(stack))))
            }
        }
    }

    /// Abandon the current attempt and move on, finishing with the last
    /// recorded error once the candidate list is exhausted
    fn next_candidate(&mut self, err: Error) {
        debug!("attempt to {} failed: {}", self.endpoints[self.index], err);
        self.state = ConnState::Done;
        self.last_error = Some(err);
        self.index += 1;
        if self.index < self.endpoints.len() {
            self.start_attempt();
        } else {
            let err = self
                .last_error
                .take()
                .unwrap_or(Error::ResolutionFailed("no endpoints".to_string()));
            self.finish(Err(err));
        }
    }

    fn finish(&mut self, result: Result<ClientStream>) {
        self.state = ConnState::Done;
        self.deadline = None;
        match &result {
            Ok(_) => debug!("connection ready"),
            Err(err) => debug!("connect failed: {}", err),
        }
        if let Some(callback) = self.callback.take() {
            callback(result);
        } else {
            self.result = Some(result);
        }
    }
}
