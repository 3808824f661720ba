//! Proxy tunnel negotiation
//!
//! SOCKS4, SOCKS5 and HTTP CONNECT handshakes expressed as one suspendable
//! machine: [`ProxyHandshake`] says what it needs next ([`Action`]), the
//! caller performs the I/O and feeds the results back. [`negotiate`] is the
//! blocking driver; the connect engine drives the same machine from its
//! non-blocking loop, so both paths share the protocol logic byte for byte.

pub mod http;
pub mod socks4;
pub mod socks5;

use std::io::{Read, Write};
use std::net::SocketAddr;

use log::{debug, trace};

use crate::http::{ParseStatus, ResponseParser};

use super::{Error, Result};

/// Proxy protocol selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyProtocol {
    Socks4,
    Socks5,
    HttpConnect,
}

/// Where and how to reach the proxy
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    pub protocol: ProxyProtocol,
}

impl ProxyConfig {
    pub fn new(protocol: ProxyProtocol, host: impl Into<String>, port: u16) -> Self {
        ProxyConfig {
            host: host.into(),
            port,
            protocol,
        }
    }
}

/// What the handshake needs from its driver next
#[derive(Debug)]
pub enum Action<'a> {
    /// Write these bytes to the proxy
    Send(&'a [u8]),
    /// Read more bytes from the proxy
    Recv,
    /// The tunnel is established
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Socks4Request,
    Socks4Reply,
    Socks5Auth,
    Socks5AuthReply,
    Socks5Connect,
    Socks5ConnectReply,
    HttpRequest,
    HttpReply,
    Complete,
}

/// Suspendable proxy negotiation machine
///
/// Received bytes may arrive in any fragmentation; the machine buffers until
/// it has a full reply. Once [`Action::Complete`] is reported the transport
/// carries tunnel payload.
#[derive(Debug)]
pub struct ProxyHandshake {
    target: SocketAddr,
    phase: Phase,
    outbox: Vec<u8>,
    sent: usize,
    inbox: Vec<u8>,
    need: usize,
    parser: ResponseParser,
}

impl ProxyHandshake {
    /// Start a handshake that will ask the proxy for a tunnel to `target`
    ///
    /// SOCKS4 cannot carry an IPv6 target; that combination fails here,
    /// before any byte is written.
    pub fn new(protocol: ProxyProtocol, target: SocketAddr) -> Result<Self> {
        let (phase, outbox) = match protocol {
            ProxyProtocol::Socks4 => match target {
                SocketAddr::V4(v4) => (Phase::Socks4Request, socks4::connect_request(&v4)),
                SocketAddr::V6(_) => return Err(Error::AddressFamilyNotSupported),
            },
            ProxyProtocol::Socks5 => (Phase::Socks5Auth, socks5::auth_request()),
            ProxyProtocol::HttpConnect => (Phase::HttpRequest, http::connect_request(&target)),
        };
        debug!("starting {:?} handshake for {}", protocol, target);
        Ok(ProxyHandshake {
            target,
            phase,
            outbox,
            sent: 0,
            inbox: Vec::new(),
            need: 0,
            parser: ResponseParser::new(),
        })
    }

    /// The driver's next step
    pub fn action(&self) -> Action<'_> {
        match self.phase {
            Phase::Socks4Request | Phase::Socks5Auth | Phase::Socks5Connect | Phase::HttpRequest => {
                Action::Send(&self.outbox[self.sent..])
            }
            Phase::Socks4Reply
            | Phase::Socks5AuthReply
            | Phase::Socks5ConnectReply
            | Phase::HttpReply => Action::Recv,
            Phase::Complete => Action::Complete,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Complete
    }

    /// Record that `n` bytes of the pending send were written
    pub fn advance_sent(&mut self, n: usize) {
        self.sent += n;
        trace!("handshake sent {} bytes ({}/{})", n, self.sent, self.outbox.len());
        if self.sent < self.outbox.len() {
            return;
        }
        self.inbox.clear();
        self.phase = match self.phase {
            Phase::Socks4Request => {
                self.need = socks4::REPLY_LEN;
                Phase::Socks4Reply
            }
            Phase::Socks5Auth => {
                self.need = socks5::AUTH_REPLY_LEN;
                Phase::Socks5AuthReply
            }
            Phase::Socks5Connect => {
                self.need = socks5::reply_len(&self.target);
                Phase::Socks5ConnectReply
            }
            Phase::HttpRequest => Phase::HttpReply,
            phase => phase,
        };
    }

    /// Feed bytes read from the proxy; returns how many were consumed
    ///
    /// Bytes past the end of the handshake belong to the tunnel and are left
    /// for the caller.
    pub fn advance_received(&mut self, data: &[u8]) -> Result<usize> {
        match self.phase {
            Phase::Socks4Reply | Phase::Socks5AuthReply | Phase::Socks5ConnectReply => {
                let take = (self.need - self.inbox.len()).min(data.len());
                self.inbox.extend_from_slice(&data[..take]);
                trace!("handshake received {} bytes ({}/{})", take, self.inbox.len(), self.need);
                if self.inbox.len() == self.need {
                    self.process_reply()?;
                }
                Ok(take)
            }
            Phase::HttpReply => {
                match self.parser.parse(data).map_err(Error::Http)? {
                    ParseStatus::Complete(response, consumed) => {
                        http::check_status(&response)?;
                        debug!("HTTP CONNECT tunnel to {} established", self.target);
                        self.phase = Phase::Complete;
                        Ok(consumed)
                    }
                    ParseStatus::Partial => Ok(data.len()),
                }
            }
            _ => Err(Error::ProxyViolation(
                "unexpected data from proxy".to_string(),
            )),
        }
    }

    fn process_reply(&mut self) -> Result<()> {
        match self.phase {
            Phase::Socks4Reply => {
                socks4::check_reply(&self.inbox)?;
                debug!("SOCKS4 tunnel to {} established", self.target);
                self.phase = Phase::Complete;
            }
            Phase::Socks5AuthReply => {
                socks5::check_auth_reply(&self.inbox)?;
                self.outbox = socks5::connect_request(&self.target);
                self.sent = 0;
                self.phase = Phase::Socks5Connect;
            }
            Phase::Socks5ConnectReply => {
                socks5::check_connect_reply(&self.inbox)?;
                debug!("SOCKS5 tunnel to {} established", self.target);
                self.phase = Phase::Complete;
            }
            _ => unreachable!(),
        }
        Ok(())
    }
}

/// Run a handshake to completion on a blocking transport
pub fn negotiate<S: Read + Write>(handshake: &mut ProxyHandshake, stream: &mut S) -> Result<()> {
    let mut buf = [0u8; 512];
    loop {
        match handshake.action() {
            Action::Complete => return Ok(()),
            Action::Send(bytes) => {
                let n = stream.write(bytes)?;
                if n == 0 {
                    return Err(Error::ConnectionClosed);
                }
                handshake.advance_sent(n);
            }
            Action::Recv => {
                let n = stream.read(&mut buf)?;
                if n == 0 {
                    return Err(Error::ConnectionClosed);
                }
                let mut fed = 0;
                while fed < n && !handshake.is_complete() {
                    fed += handshake.advance_received(&buf[fed..n])?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr, SocketAddrV4, SocketAddrV6};

    fn v4_target() -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 8080))
    }

    fn drive_send(handshake: &mut ProxyHandshake) -> Vec<u8> {
        let mut wire = Vec::new();
        while let Action::Send(bytes) = handshake.action() {
            wire.extend_from_slice(bytes);
            let n = bytes.len();
            handshake.advance_sent(n);
        }
        wire
    }

    #[test]
    fn test_socks4_exchange() {
        let mut hs = ProxyHandshake::new(ProxyProtocol::Socks4, v4_target()).unwrap();
        let wire = drive_send(&mut hs);
        assert_eq!(wire, vec![4, 1, 0x1f, 0x90, 10, 0, 0, 1, 0]);
        assert!(matches!(hs.action(), Action::Recv));

        let consumed = hs
            .advance_received(&[0, 0x5a, 0, 0, 0, 0, 0, 0])
            .unwrap();
        assert_eq!(consumed, 8);
        assert!(hs.is_complete());
    }

    #[test]
    fn test_socks4_rejection() {
        let mut hs = ProxyHandshake::new(ProxyProtocol::Socks4, v4_target()).unwrap();
        drive_send(&mut hs);
        let err = hs
            .advance_received(&[0, 0x5b, 0, 0, 0, 0, 0, 0])
            .unwrap_err();
        assert!(matches!(err, Error::ConnectionRefused));
    }

    #[test]
    fn test_socks4_ipv6_target_rejected_up_front() {
        let target = SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::LOCALHOST, 443, 0, 0));
        let err = ProxyHandshake::new(ProxyProtocol::Socks4, target).unwrap_err();
        assert!(matches!(err, Error::AddressFamilyNotSupported));
    }

    #[test]
    fn test_socks5_exchange() {
        let mut hs = ProxyHandshake::new(ProxyProtocol::Socks5, v4_target()).unwrap();
        assert_eq!(drive_send(&mut hs), vec![5, 1, 0]);

        // no-auth accepted
        assert_eq!(hs.advance_received(&[5, 0]).unwrap(), 2);
        let connect = drive_send(&mut hs);
        assert_eq!(connect, vec![5, 1, 0, 1, 10, 0, 0, 1, 0x1f, 0x90]);

        let reply = [5u8, 0, 0, 1, 10, 0, 0, 1, 0x1f, 0x90];
        assert_eq!(hs.advance_received(&reply).unwrap(), 10);
        assert!(hs.is_complete());
    }

    #[test]
    fn test_socks5_fragmented_reply() {
        let mut hs = ProxyHandshake::new(ProxyProtocol::Socks5, v4_target()).unwrap();
        drive_send(&mut hs);
        assert_eq!(hs.advance_received(&[5]).unwrap(), 1);
        assert!(matches!(hs.action(), Action::Recv));
        assert_eq!(hs.advance_received(&[0]).unwrap(), 1);
        drive_send(&mut hs);

        let reply = [5u8, 0, 0, 1, 10, 0, 0, 1, 0x1f, 0x90];
        for byte in reply {
            hs.advance_received(&[byte]).unwrap();
        }
        assert!(hs.is_complete());
    }

    #[test]
    fn test_socks5_host_unreachable() {
        let mut hs = ProxyHandshake::new(ProxyProtocol::Socks5, v4_target()).unwrap();
        drive_send(&mut hs);
        hs.advance_received(&[5, 0]).unwrap();
        drive_send(&mut hs);

        let reply = [5u8, 4, 0, 1, 0, 0, 0, 0, 0, 0];
        let err = hs.advance_received(&reply).unwrap_err();
        assert!(matches!(err, Error::HostUnreachable));
    }

    #[test]
    fn test_socks5_auth_denied() {
        let mut hs = ProxyHandshake::new(ProxyProtocol::Socks5, v4_target()).unwrap();
        drive_send(&mut hs);
        let err = hs.advance_received(&[5, 0xff]).unwrap_err();
        assert!(matches!(err, Error::AccessDenied));
    }

    #[test]
    fn test_socks5_bad_version() {
        let mut hs = ProxyHandshake::new(ProxyProtocol::Socks5, v4_target()).unwrap();
        drive_send(&mut hs);
        let err = hs.advance_received(&[4, 0]).unwrap_err();
        assert!(matches!(err, Error::ProxyViolation(_)));
    }

    #[test]
    fn test_socks5_ipv6_lengths() {
        let target = SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::LOCALHOST, 443, 0, 0));
        let mut hs = ProxyHandshake::new(ProxyProtocol::Socks5, target).unwrap();
        drive_send(&mut hs);
        hs.advance_received(&[5, 0]).unwrap();
        let connect = drive_send(&mut hs);
        assert_eq!(connect.len(), 22);
        assert_eq!(connect[3], 4); // ATYP = IPv6

        let mut reply = vec![5u8, 0, 0, 4];
        reply.extend_from_slice(&Ipv6Addr::LOCALHOST.octets());
        reply.extend_from_slice(&443u16.to_be_bytes());
        assert_eq!(reply.len(), 22);
        assert_eq!(hs.advance_received(&reply).unwrap(), 22);
        assert!(hs.is_complete());
    }

    #[test]
    fn test_http_connect_exchange() {
        let mut hs = ProxyHandshake::new(ProxyProtocol::HttpConnect, v4_target()).unwrap();
        let wire = drive_send(&mut hs);
        assert_eq!(
            wire,
            b"CONNECT 10.0.0.1:8080 HTTP/1.0\r\nProxy-Connection: Close\r\n\r\n"
        );

        let consumed = hs
            .advance_received(b"HTTP/1.0 200 Connection established\r\n\r\n")
            .unwrap();
        assert_eq!(consumed, 39);
        assert!(hs.is_complete());
    }

    #[test]
    fn test_http_connect_rejected() {
        let mut hs = ProxyHandshake::new(ProxyProtocol::HttpConnect, v4_target()).unwrap();
        drive_send(&mut hs);
        let err = hs
            .advance_received(b"HTTP/1.0 407 Proxy Authentication Required\r\n\r\n")
            .unwrap_err();
        assert!(matches!(err, Error::ProxyRejected(407)));
    }

    #[test]
    fn test_http_connect_leaves_tunnel_bytes() {
        let mut hs = ProxyHandshake::new(ProxyProtocol::HttpConnect, v4_target()).unwrap();
        drive_send(&mut hs);
        let data = b"HTTP/1.0 200 OK\r\n\r\ntunnel-payload";
        let consumed = hs.advance_received(data).unwrap();
        assert!(hs.is_complete());
        assert_eq!(&data[consumed..], b"tunnel-payload");
    }

    #[test]
    fn test_negotiate_blocking_driver() {
        // a transport canned with the full SOCKS5 server side
        struct Canned {
            replies: Vec<Vec<u8>>,
            written: Vec<u8>,
        }
        impl std::io::Read for Canned {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                let reply = self.replies.remove(0);
                buf[..reply.len()].copy_from_slice(&reply);
                Ok(reply.len())
            }
        }
        impl std::io::Write for Canned {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.written.extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let mut transport = Canned {
            replies: vec![vec![5, 0], vec![5, 0, 0, 1, 10, 0, 0, 1, 0x1f, 0x90]],
            written: Vec::new(),
        };
        let mut hs = ProxyHandshake::new(ProxyProtocol::Socks5, v4_target()).unwrap();
        negotiate(&mut hs, &mut transport).unwrap();
        assert!(hs.is_complete());
        assert_eq!(
            transport.written,
            vec![5, 1, 0, 5, 1, 0, 1, 10, 0, 0, 1, 0x1f, 0x90]
        );
    }
}
