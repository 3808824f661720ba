//! HTTP message types
//!
//! This module defines the value objects produced by the incremental parsers:
//! requests (method, resource, query), responses (status code, status
//! message), a shared version pair and the body bytes.

use super::{Headers, CRLF};
use std::fmt;

/// HTTP protocol version as a (major, minor) pair
///
/// Kept as raw numbers rather than an enum: the parser accumulates whatever
/// digits are on the wire and callers decide what they accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
}

impl Version {
    pub const HTTP_10: Version = Version { major: 1, minor: 0 };
    pub const HTTP_11: Version = Version { major: 1, minor: 1 };

    pub fn new(major: u16, minor: u16) -> Self {
        Version { major, minor }
    }
}

impl Default for Version {
    fn default() -> Self {
        Version::HTTP_11
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP/{}.{}", self.major, self.minor)
    }
}

/// HTTP request
///
/// Built incrementally by [`super::RequestParser`]; ownership passes to the
/// caller when parsing completes.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub(crate) method: String,
    pub(crate) resource: String,
    pub(crate) query: String,
    pub(crate) version: Version,
    pub(crate) headers: Headers,
    pub(crate) body: Vec<u8>,
}

impl Request {
    /// Create a new request with the given method and resource path
    pub fn new(method: impl Into<String>, resource: impl Into<String>) -> Self {
        Request {
            method: method.into(),
            resource: resource.into(),
            query: String::new(),
            version: Version::default(),
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    /// Request method (e.g. `GET`)
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Resource path, without the query string
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Query string (empty if the request line carried none)
    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn set_body(&mut self, body: Vec<u8>) {
        self.body = body;
    }

    /// Serialize the start line and headers to wire format
    pub fn to_wire(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(self.method.as_bytes());
        buf.push(b' ');
        buf.extend_from_slice(self.resource.as_bytes());
        if !self.query.is_empty() {
            buf.push(b'?');
            buf.extend_from_slice(self.query.as_bytes());
        }
        buf.push(b' ');
        buf.extend_from_slice(self.version.to_string().as_bytes());
        buf.extend_from_slice(CRLF.as_bytes());

        for (name, value) in self.headers.iter() {
            buf.extend_from_slice(name.as_bytes());
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(value.as_bytes());
            buf.extend_from_slice(CRLF.as_bytes());
        }

        buf.extend_from_slice(CRLF.as_bytes());
        buf.extend_from_slice(&self.body);
        buf
    }
}

/// HTTP response
///
/// Built incrementally by [`super::ResponseParser`].
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub(crate) version: Version,
    pub(crate) status_code: u16,
    pub(crate) status_message: String,
    pub(crate) headers: Headers,
    pub(crate) body: Vec<u8>,
}

impl Response {
    /// Create a new response with the given status code and message
    pub fn new(status_code: u16, status_message: impl Into<String>) -> Self {
        Response {
            version: Version::default(),
            status_code,
            status_message: status_message.into(),
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn set_body(&mut self, body: Vec<u8>) {
        self.body = body;
    }

    /// Serialize the status line and headers to wire format
    pub fn to_wire(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(self.version.to_string().as_bytes());
        buf.push(b' ');
        buf.extend_from_slice(self.status_code.to_string().as_bytes());
        buf.push(b' ');
        buf.extend_from_slice(self.status_message.as_bytes());
        buf.extend_from_slice(CRLF.as_bytes());

        for (name, value) in self.headers.iter() {
            buf.extend_from_slice(name.as_bytes());
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(value.as_bytes());
            buf.extend_from_slice(CRLF.as_bytes());
        }

        buf.extend_from_slice(CRLF.as_bytes());
        buf.extend_from_slice(&self.body);
        buf
    }
}
