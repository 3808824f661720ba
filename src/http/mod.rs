//! HTTP/1.x message handling
//!
//! This module provides incremental parsers for HTTP requests, responses and
//! chunked transfer-encoded bodies, together with the value objects they
//! produce.
//!
//! # Architecture
//!
//! The parsers are byte-at-a-time state machines with a persisted state
//! register, so input may be fed in arbitrarily small fragments - down to a
//! single byte - and the final result is identical to parsing the whole
//! buffer at once:
//!
//! - `RequestParser` / `ResponseParser` parse the start line and headers
//! - `ChunkedParser` decodes a chunked body into contiguous bytes
//!
//! Each `parse` call reports a tri-state outcome: `Ok(Complete(..))` with the
//! parsed message and the number of input bytes consumed (bytes past the
//! message boundary stay with the caller, which supports pipelined streams),
//! `Ok(Partial)` when all input was consumed and more is needed, or `Err`
//! when the input is malformed. A failed parser stays failed until `clear()`.
//!
//! # Examples
//!
//! ```
//! use netclient::http::{ResponseParser, ParseStatus};
//!
//! let mut parser = ResponseParser::new();
//! let bytes = b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n";
//! match parser.parse(bytes).unwrap() {
//!     ParseStatus::Complete(response, consumed) => {
//!         assert_eq!(response.status_code(), 200);
//!         assert_eq!(consumed, bytes.len());
//!     }
//!     ParseStatus::Partial => unreachable!(),
//! }
//! ```

pub mod chunked;
pub mod headers;
pub mod message;
pub mod parser;

pub use chunked::{ChunkedEncoder, ChunkedParser};
pub use headers::Headers;
pub use message::{Request, Response, Version};
pub use parser::{RequestParser, ResponseParser};

/// Result type for HTTP parsing operations
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP parsing errors
///
/// "More data needed" is not an error; it is [`ParseStatus::Partial`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("invalid chunk size: {0}")]
    InvalidChunkSize(String),
}

/// Outcome of feeding bytes to an incremental parser
#[derive(Debug)]
pub enum ParseStatus<T> {
    /// A full message was parsed; the second field is the number of input
    /// bytes consumed by this call. Remaining bytes belong to the caller.
    Complete(T, usize),
    /// All input was consumed; more bytes are required.
    Partial,
}

impl<T> ParseStatus<T> {
    /// Unwrap the completed message, panicking on `Partial` (test helper)
    pub fn expect_complete(self) -> (T, usize) {
        match self {
            ParseStatus::Complete(value, consumed) => (value, consumed),
            ParseStatus::Partial => panic!("parse incomplete"),
        }
    }

    /// True if this is `Partial`
    pub fn is_partial(&self) -> bool {
        matches!(self, ParseStatus::Partial)
    }
}

/// CRLF line ending
pub const CRLF: &str = "\r\n";
