//! netclient - HTTP/1.x parsing and proxy-aware connection establishment
//!
//! This crate provides the client-side plumbing that sits below an HTTP
//! client proper: an incremental HTTP/1.x message parser (request/status
//! line, headers, chunked bodies) and a connection engine that resolves a
//! server name, walks the candidate endpoints under a deadline, optionally
//! tunnels through a SOCKS4, SOCKS5 or HTTP CONNECT proxy, and optionally
//! layers TLS on top before handing the raw byte stream back to the caller.

pub mod http;
pub mod net;
