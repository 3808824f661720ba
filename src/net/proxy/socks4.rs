//! SOCKS4 wire format
//!
//! Only the CONNECT command with an empty user ID is spoken, and only IPv4
//! targets; there is no SOCKS4a hostname extension.

use std::net::SocketAddrV4;

use bytes::BufMut;

use crate::net::{Error, Result};

const VERSION: u8 = 4;
const CMD_CONNECT: u8 = 1;
const REQUEST_GRANTED: u8 = 0x5a;

/// Reply size in bytes
pub const REPLY_LEN: usize = 8;

/// Build the 9-byte CONNECT request
pub fn connect_request(target: &SocketAddrV4) -> Vec<u8> {
    let mut out = Vec::with_capacity(9);
    out.put_u8(VERSION);
    out.put_u8(CMD_CONNECT);
    out.put_u16(target.port());
    out.put_slice(&target.ip().octets());
    out.put_u8(0); // empty user ID, NUL-terminated
    out
}

/// Validate the server's reply
pub fn check_reply(reply: &[u8]) -> Result<()> {
    if reply.len() != REPLY_LEN {
        return Err(Error::ProxyViolation(format!(
            "SOCKS4 reply of {} bytes, expected {}",
            reply.len(),
            REPLY_LEN
        )));
    }
    if reply[1] == REQUEST_GRANTED {
        Ok(())
    } else {
        Err(Error::ConnectionRefused)
    }
}
