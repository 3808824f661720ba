//! HTTP CONNECT tunneling

use std::net::SocketAddr;

use crate::http::{Response, CRLF};
use crate::net::{Error, Result};

/// Build the CONNECT request for `target`
pub fn connect_request(target: &SocketAddr) -> Vec<u8> {
    format!(
        "CONNECT {target} HTTP/1.0{crlf}Proxy-Connection: Close{crlf}{crlf}",
        crlf = CRLF
    )
    .into_bytes()
}

/// A tunnel is only granted by a 200 response
pub fn check_status(response: &Response) -> Result<()> {
    if response.status_code() == 200 {
        Ok(())
    } else {
        Err(Error::ProxyRejected(response.status_code()))
    }
}
