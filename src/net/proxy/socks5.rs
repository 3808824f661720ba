//! SOCKS5 wire format (RFC 1928)
//!
//! Only the no-authentication method and the CONNECT command are spoken,
//! with literal IPv4/IPv6 addresses (no domain ATYP).

use std::net::SocketAddr;

use bytes::BufMut;

use crate::net::{Error, Result};

const VERSION: u8 = 5;
const METHOD_NO_AUTH: u8 = 0;
const CMD_CONNECT: u8 = 1;
const ATYP_IPV4: u8 = 1;
const ATYP_IPV6: u8 = 4;

/// Auth method reply size in bytes
pub const AUTH_REPLY_LEN: usize = 2;

/// Offer the no-authentication method
pub fn auth_request() -> Vec<u8> {
    vec![VERSION, 1, METHOD_NO_AUTH]
}

/// Validate the method selection reply
pub fn check_auth_reply(reply: &[u8]) -> Result<()> {
    if reply.len() != AUTH_REPLY_LEN || reply[0] != VERSION {
        return Err(Error::ProxyViolation(
            "bad SOCKS5 method selection reply".to_string(),
        ));
    }
    if reply[1] != METHOD_NO_AUTH {
        return Err(Error::AccessDenied);
    }
    Ok(())
}

/// Build the CONNECT request for a literal address
pub fn connect_request(target: &SocketAddr) -> Vec<u8> {
    let mut out = Vec::with_capacity(reply_len(target));
    out.put_u8(VERSION);
    out.put_u8(CMD_CONNECT);
    out.put_u8(0); // reserved
    match target {
        SocketAddr::V4(v4) => {
            out.put_u8(ATYP_IPV4);
            out.put_slice(&v4.ip().octets());
        }
        SocketAddr::V6(v6) => {
            out.put_u8(ATYP_IPV6);
            out.put_slice(&v6.ip().octets());
        }
    }
    out.put_u16(target.port());
    out
}

/// Size of the CONNECT reply, which mirrors the request's address family
pub fn reply_len(target: &SocketAddr) -> usize {
    match target {
        SocketAddr::V4(_) => 10,
        SocketAddr::V6(_) => 22,
    }
}

/// Validate the CONNECT reply and translate its status byte
pub fn check_connect_reply(reply: &[u8]) -> Result<()> {
    if reply.len() < 2 || reply[0] != VERSION {
        return Err(Error::ProxyViolation(
            "bad SOCKS5 connect reply".to_string(),
        ));
    }
    match reply[1] {
        0 => Ok(()),
        1 => Err(Error::Io(std::io::Error::other(
            "SOCKS5 general server failure",
        ))),
        2 => Err(Error::AccessDenied),
        3 => Err(Error::NetworkUnreachable),
        4 => Err(Error::HostUnreachable),
        5 => Err(Error::ConnectionRefused),
        6 => Err(Error::TtlExpired),
        7 => Err(Error::CommandNotSupported),
        8 => Err(Error::AddressFamilyNotSupported),
        _ => Err(Error::ServiceNotFound),
    }
}
