//! Incremental HTTP message parsing
//!
//! This module provides byte-at-a-time parsers for HTTP request and response
//! start lines and headers. The parser keeps its state register across calls,
//! so input may arrive in arbitrary fragments; feeding one byte at a time
//! produces the same result as feeding the whole message.
//!
//! Line termination is tolerant: CRLF is canonical, but two consecutive bare
//! LF or bare CR also end the header section, to accommodate non-conforming
//! senders.

use super::{Error, Headers, ParseStatus, Request, Response, Result};

/// Maximum accumulated length of a request method
pub const METHOD_MAX: usize = 1024;
/// Maximum accumulated length of a resource path
pub const RESOURCE_MAX: usize = 1024;
/// Maximum accumulated length of a query string
pub const QUERY_STRING_MAX: usize = 1024;
/// Maximum accumulated length of a status message
pub const STATUS_MESSAGE_MAX: usize = 1024;
/// Maximum accumulated length of a header name
pub const HEADER_NAME_MAX: usize = 1024;
/// Maximum accumulated length of a header value
pub const HEADER_VALUE_MAX: usize = 1024;

/// True for bytes in the US-ASCII range
fn is_char(c: u8) -> bool {
    c <= 127
}

/// True for ASCII control characters
fn is_control(c: u8) -> bool {
    c <= 31 || c == 127
}

/// True for the HTTP separator characters
fn is_special(c: u8) -> bool {
    matches!(
        c,
        b'(' | b')'
            | b'<'
            | b'>'
            | b'@'
            | b','
            | b';'
            | b':'
            | b'\\'
            | b'"'
            | b'/'
            | b'['
            | b']'
            | b'?'
            | b'='
            | b'{'
            | b'}'
            | b' '
            | b'\t'
    )
}

/// True for bytes valid in a method, header name or leading value position
fn is_token_char(c: u8) -> bool {
    is_char(c) && !is_control(c) && !is_special(c)
}

fn is_digit(c: u8) -> bool {
    c.is_ascii_digit()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Fail,

    MethodStart,
    Method,
    UriStem,
    UriQuery,

    VersionH,
    VersionT1,
    VersionT2,
    VersionP,
    VersionSlash,
    VersionMajorStart,
    VersionMajor,
    VersionMinorStart,
    VersionMinor,

    StatusCodeStart,
    StatusCode,
    StatusMessage,

    /// Saw CR at a line end, expecting LF
    ExpectingNewline,
    /// Saw a bare LF at a line end, expecting CR (tolerant variant)
    ExpectingCr,

    HeaderWhitespace,
    HeaderStart,
    HeaderName,
    SpaceBeforeHeaderValue,
    HeaderValue,

    ExpectingFinalNewline,
    ExpectingFinalCr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Request,
    Response,
}

enum Step {
    More,
    /// Message complete; the current byte was consumed
    Done,
    /// Message complete; the current byte belongs to the next message
    DoneRewind,
}

/// The shared request/response state machine
#[derive(Debug)]
struct Machine {
    mode: Mode,
    state: State,

    method: String,
    resource: String,
    query: String,
    version_major: u16,
    version_minor: u16,
    status_code: u16,
    status_message: String,

    headers: Headers,
    // Header line under accumulation. A finished line is held back
    // (have_pending) until the next line is known not to be a folded
    // continuation; only then is it committed to the multimap.
    name: String,
    value: String,
    have_pending: bool,
}

impl Machine {
    fn new(mode: Mode) -> Self {
        Machine {
            mode,
            state: Self::initial_state(mode),
            method: String::new(),
            resource: String::new(),
            query: String::new(),
            version_major: 0,
            version_minor: 0,
            status_code: 0,
            status_message: String::new(),
            headers: Headers::new(),
            name: String::new(),
            value: String::new(),
            have_pending: false,
        }
    }

    fn initial_state(mode: Mode) -> State {
        match mode {
            Mode::Request => State::MethodStart,
            Mode::Response => State::VersionH,
        }
    }

    fn valid(&self) -> bool {
        self.state != State::Fail
    }

    fn clear(&mut self) {
        *self = Machine::new(self.mode);
    }

    fn fail(&mut self, what: &str, c: u8) -> Error {
        self.state = State::Fail;
        Error::Malformed(format!("unexpected byte 0x{:02x} in {}", c, what))
    }

    /// Commit the held-back header line, if any
    fn commit_pending(&mut self) {
        if self.have_pending {
            let name = std::mem::take(&mut self.name);
            let value = std::mem::take(&mut self.value);
            self.headers.insert(name, value);
            self.have_pending = false;
        }
    }

    /// A header line just terminated; hold it back pending a possible
    /// folded continuation on the next line
    fn end_header_line(&mut self) {
        self.have_pending = true;
    }

    /// Start accumulating a new header name with `c`
    fn start_header(&mut self, c: u8) -> Result<()> {
        if !is_token_char(c) {
            return Err(self.fail("header start", c));
        }
        self.commit_pending();
        self.name.clear();
        self.value.clear();
        self.name.push(c as char);
        self.state = State::HeaderName;
        Ok(())
    }

    /// Advance the machine by one byte
    fn step(&mut self, c: u8) -> Result<Step> {
        match self.state {
            State::Fail => unreachable!("stepped a failed parser"),

            // --- request line -------------------------------------------
            State::MethodStart => {
                // leading whitespace and stray newlines before the method
                // are skipped (persistent-connection tolerance)
                if c != b' ' && c != b'\r' && c != b'\n' {
                    if !is_token_char(c) {
                        return Err(self.fail("method", c));
                    }
                    self.method.clear();
                    self.method.push(c as char);
                    self.state = State::Method;
                }
            }
            State::Method => {
                if c == b' ' {
                    self.resource.clear();
                    self.state = State::UriStem;
                } else if is_token_char(c) && self.method.len() < METHOD_MAX {
                    self.method.push(c as char);
                } else {
                    return Err(self.fail("method", c));
                }
            }
            State::UriStem => {
                if c == b' ' {
                    self.state = State::VersionH;
                } else if c == b'?' {
                    self.query.clear();
                    self.state = State::UriQuery;
                } else if !is_control(c) && self.resource.len() < RESOURCE_MAX {
                    self.resource.push(c as char);
                } else {
                    return Err(self.fail("resource path", c));
                }
            }
            State::UriQuery => {
                if c == b' ' {
                    self.state = State::VersionH;
                } else if !is_control(c) && self.query.len() < QUERY_STRING_MAX {
                    self.query.push(c as char);
                } else {
                    return Err(self.fail("query string", c));
                }
            }

            // --- version ------------------------------------------------
            State::VersionH => {
                if c != b'H' {
                    return Err(self.fail("version", c));
                }
                self.state = State::VersionT1;
            }
            State::VersionT1 => {
                if c != b'T' {
                    return Err(self.fail("version", c));
                }
                self.state = State::VersionT2;
            }
            State::VersionT2 => {
                if c != b'T' {
                    return Err(self.fail("version", c));
                }
                self.state = State::VersionP;
            }
            State::VersionP => {
                if c != b'P' {
                    return Err(self.fail("version", c));
                }
                self.state = State::VersionSlash;
            }
            State::VersionSlash => {
                if c != b'/' {
                    return Err(self.fail("version", c));
                }
                self.state = State::VersionMajorStart;
            }
            State::VersionMajorStart => {
                if !is_digit(c) {
                    return Err(self.fail("version major", c));
                }
                self.version_major = (c - b'0') as u16;
                self.state = State::VersionMajor;
            }
            State::VersionMajor => {
                if is_digit(c) {
                    self.version_major = self
                        .version_major
                        .wrapping_mul(10)
                        .wrapping_add((c - b'0') as u16);
                } else if c == b'.' {
                    self.state = State::VersionMinorStart;
                } else {
                    return Err(self.fail("version major", c));
                }
            }
            State::VersionMinorStart => {
                if !is_digit(c) {
                    return Err(self.fail("version minor", c));
                }
                self.version_minor = (c - b'0') as u16;
                self.state = State::VersionMinor;
            }
            State::VersionMinor => {
                if is_digit(c) {
                    self.version_minor = self
                        .version_minor
                        .wrapping_mul(10)
                        .wrapping_add((c - b'0') as u16);
                } else {
                    match self.mode {
                        Mode::Request => {
                            if c == b'\r' {
                                self.state = State::ExpectingNewline;
                            } else if c == b'\n' {
                                self.state = State::ExpectingCr;
                            } else {
                                return Err(self.fail("version minor", c));
                            }
                        }
                        Mode::Response => {
                            if c == b' ' {
                                self.state = State::StatusCodeStart;
                            } else {
                                return Err(self.fail("version minor", c));
                            }
                        }
                    }
                }
            }

            // --- status line tail (response mode) -----------------------
            State::StatusCodeStart => {
                if !is_digit(c) {
                    return Err(self.fail("status code", c));
                }
                self.status_code = (c - b'0') as u16;
                self.state = State::StatusCode;
            }
            State::StatusCode => {
                if is_digit(c) {
                    self.status_code = self
                        .status_code
                        .wrapping_mul(10)
                        .wrapping_add((c - b'0') as u16);
                } else if c == b' ' {
                    self.status_message.clear();
                    self.state = State::StatusMessage;
                } else {
                    return Err(self.fail("status code", c));
                }
            }
            State::StatusMessage => {
                if c == b'\r' {
                    self.state = State::ExpectingNewline;
                } else if c == b'\n' {
                    self.state = State::ExpectingCr;
                } else if !is_control(c) && self.status_message.len() < STATUS_MESSAGE_MAX {
                    self.status_message.push(c as char);
                } else {
                    return Err(self.fail("status message", c));
                }
            }

            // --- line ends and header section ---------------------------
            State::ExpectingNewline => {
                if c == b'\n' {
                    self.state = State::HeaderStart;
                } else if c == b'\r' {
                    // two CRs in a row: the sender terminates lines with a
                    // lone CR, so an empty line just went by
                    self.commit_pending();
                    return Ok(Step::Done);
                } else {
                    // lone-CR line termination; this byte opens a header
                    self.start_header(c)?;
                }
            }
            State::ExpectingCr => {
                if c == b'\r' {
                    self.state = State::HeaderStart;
                } else if c == b'\n' {
                    // two LFs in a row, same reasoning as above
                    self.commit_pending();
                    return Ok(Step::Done);
                } else if c == b'\t' || c == b' ' {
                    self.state = State::HeaderWhitespace;
                } else {
                    self.start_header(c)?;
                }
            }
            State::HeaderWhitespace => {
                if c == b'\r' {
                    self.state = State::ExpectingNewline;
                } else if c == b'\n' {
                    self.state = State::ExpectingCr;
                } else if c == b'\t' || c == b' ' {
                    // keep skipping
                } else if self.have_pending {
                    // folded continuation line: append to the previous
                    // header's value, joined by a single space
                    if is_control(c) || self.value.len() >= HEADER_VALUE_MAX {
                        return Err(self.fail("header continuation", c));
                    }
                    self.value.push(' ');
                    self.value.push(c as char);
                    self.state = State::HeaderValue;
                } else {
                    self.start_header(c)?;
                }
            }
            State::HeaderStart => {
                if c == b'\r' {
                    self.state = State::ExpectingFinalNewline;
                } else if c == b'\n' {
                    self.state = State::ExpectingFinalCr;
                } else if c == b'\t' || c == b' ' {
                    self.state = State::HeaderWhitespace;
                } else {
                    self.start_header(c)?;
                }
            }
            State::HeaderName => {
                if c == b':' {
                    self.value.clear();
                    self.state = State::SpaceBeforeHeaderValue;
                } else if is_token_char(c) && self.name.len() < HEADER_NAME_MAX {
                    self.name.push(c as char);
                } else {
                    return Err(self.fail("header name", c));
                }
            }
            State::SpaceBeforeHeaderValue => {
                if c == b' ' {
                    self.state = State::HeaderValue;
                } else if c == b'\r' {
                    self.end_header_line();
                    self.state = State::ExpectingNewline;
                } else if c == b'\n' {
                    self.end_header_line();
                    self.state = State::ExpectingCr;
                } else if is_token_char(c) {
                    self.value.push(c as char);
                    self.state = State::HeaderValue;
                } else {
                    return Err(self.fail("header value", c));
                }
            }
            State::HeaderValue => {
                if c == b'\r' {
                    self.end_header_line();
                    self.state = State::ExpectingNewline;
                } else if c == b'\n' {
                    self.end_header_line();
                    self.state = State::ExpectingCr;
                } else if !is_control(c) && self.value.len() < HEADER_VALUE_MAX {
                    self.value.push(c as char);
                } else {
                    return Err(self.fail("header value", c));
                }
            }

            State::ExpectingFinalNewline => {
                self.commit_pending();
                if c == b'\n' {
                    return Ok(Step::Done);
                }
                return Ok(Step::DoneRewind);
            }
            State::ExpectingFinalCr => {
                self.commit_pending();
                if c == b'\r' {
                    return Ok(Step::Done);
                }
                return Ok(Step::DoneRewind);
            }
        }
        Ok(Step::More)
    }

    /// Run the machine over `input`, returning how many bytes were consumed
    /// when the message completes
    fn advance(&mut self, input: &[u8]) -> Result<Option<usize>> {
        if self.state == State::Fail {
            return Err(Error::Malformed("parser is in the failed state".into()));
        }
        for (i, &c) in input.iter().enumerate() {
            match self.step(c)? {
                Step::More => {}
                Step::Done => return Ok(Some(i + 1)),
                Step::DoneRewind => return Ok(Some(i)),
            }
        }
        Ok(None)
    }

    fn take_request(&mut self) -> Request {
        Request {
            method: std::mem::take(&mut self.method),
            resource: std::mem::take(&mut self.resource),
            query: std::mem::take(&mut self.query),
            version: super::Version::new(self.version_major, self.version_minor),
            headers: std::mem::take(&mut self.headers),
            body: Vec::new(),
        }
    }

    fn take_response(&mut self) -> Response {
        Response {
            version: super::Version::new(self.version_major, self.version_minor),
            status_code: self.status_code,
            status_message: std::mem::take(&mut self.status_message),
            headers: std::mem::take(&mut self.headers),
            body: Vec::new(),
        }
    }
}

/// Incremental HTTP request parser (start line + headers)
///
/// On completion the parser resets itself, ready for the next message on the
/// same stream.
#[derive(Debug)]
pub struct RequestParser {
    machine: Machine,
}

impl RequestParser {
    pub fn new() -> Self {
        RequestParser {
            machine: Machine::new(Mode::Request),
        }
    }

    /// Feed bytes to the parser
    pub fn parse(&mut self, input: &[u8]) -> Result<ParseStatus<Request>> {
        match self.machine.advance(input)? {
            Some(consumed) => {
                let request = self.machine.take_request();
                self.machine.clear();
                Ok(ParseStatus::Complete(request, consumed))
            }
            None => Ok(ParseStatus::Partial),
        }
    }

    /// False once the parser has entered the terminal failure state
    pub fn valid(&self) -> bool {
        self.machine.valid()
    }

    /// Reset the parser, discarding any partial message and clearing failure
    pub fn clear(&mut self) {
        self.machine.clear();
    }
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Incremental HTTP response parser (status line + headers)
#[derive(Debug)]
pub struct ResponseParser {
    machine: Machine,
}

impl ResponseParser {
    pub fn new() -> Self {
        ResponseParser {
            machine: Machine::new(Mode::Response),
        }
    }

    /// Feed bytes to the parser
    pub fn parse(&mut self, input: &[u8]) -> Result<ParseStatus<Response>> {
        match self.machine.advance(input)? {
            Some(consumed) => {
                let response = self.machine.take_response();
                self.machine.clear();
                Ok(ParseStatus::Complete(response, consumed))
            }
            None => Ok(ParseStatus::Partial),
        }
    }

    /// False once the parser has entered the terminal failure state
    pub fn valid(&self) -> bool {
        self.machine.valid()
    }

    /// Reset the parser, discarding any partial message and clearing failure
    pub fn clear(&mut self) {
        self.machine.clear();
    }
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_request(bytes: &[u8]) -> (Request, usize) {
        RequestParser::new()
            .parse(bytes)
            .unwrap()
            .expect_complete()
    }

    fn parse_response(bytes: &[u8]) -> (Response, usize) {
        ResponseParser::new()
            .parse(bytes)
            .unwrap()
            .expect_complete()
    }

    #[test]
    fn test_simple_request() {
        let (req, consumed) = parse_request(b"GET /index.html HTTP/1.1\r\nHost: localhost\r\n\r\n");
        assert_eq!(req.method(), "GET");
        assert_eq!(req.resource(), "/index.html");
        assert_eq!(req.query(), "");
        assert_eq!(req.version(), crate::http::Version::HTTP_11);
        assert_eq!(req.headers().get("Host"), Some("localhost"));
        assert_eq!(consumed, 45);
    }

    #[test]
    fn test_request_with_query() {
        let (req, _) = parse_request(b"GET /search?q=rust&x=1 HTTP/1.0\r\n\r\n");
        assert_eq!(req.resource(), "/search");
        assert_eq!(req.query(), "q=rust&x=1");
        assert_eq!(req.version(), crate::http::Version::HTTP_10);
    }

    #[test]
    fn test_simple_response() {
        let (resp, _) =
            parse_response(b"HTTP/1.1 404 Not Found\r\nContent-Type: text/html\r\n\r\n");
        assert_eq!(resp.status_code(), 404);
        assert_eq!(resp.status_message(), "Not Found");
        assert_eq!(resp.headers().get("content-type"), Some("text/html"));
    }

    #[test]
    fn test_one_byte_at_a_time_equals_whole_buffer() {
        let raw: &[u8] =
            b"HTTP/1.1 200 OK\r\nServer: test\r\nSet-Cookie: a=1\r\nSet-Cookie: b=2\r\n\r\n";
        let (whole, _) = parse_response(raw);

        let mut parser = ResponseParser::new();
        let mut result = None;
        for (i, byte) in raw.iter().enumerate() {
            match parser.parse(std::slice::from_ref(byte)).unwrap() {
                ParseStatus::Complete(resp, consumed) => {
                    assert_eq!(consumed, 1);
                    assert_eq!(i, raw.len() - 1);
                    result = Some(resp);
                }
                ParseStatus::Partial => {}
            }
        }
        let fragmented = result.expect("message never completed");
        assert_eq!(fragmented.status_code(), whole.status_code());
        assert_eq!(fragmented.status_message(), whole.status_message());
        assert_eq!(fragmented.headers(), whole.headers());
    }

    #[test]
    fn test_arbitrary_fragmentation() {
        let raw: &[u8] = b"GET /a?b=c HTTP/1.1\r\nHost: h\r\nX-Y: z\r\n\r\n";
        let (whole, _) = parse_request(raw);
        for split in 1..raw.len() {
            let mut parser = RequestParser::new();
            assert!(parser.parse(&raw[..split]).unwrap().is_partial());
            match parser.parse(&raw[split..]).unwrap() {
                ParseStatus::Complete(req, _) => {
                    assert_eq!(req.method(), whole.method());
                    assert_eq!(req.resource(), whole.resource());
                    assert_eq!(req.query(), whole.query());
                    assert_eq!(req.headers(), whole.headers());
                }
                ParseStatus::Partial => panic!("message never completed at split {}", split),
            }
        }
    }

    #[test]
    fn test_duplicate_headers_preserved() {
        let (resp, _) = parse_response(
            b"HTTP/1.1 200 OK\r\nSet-Cookie: a=1\r\nSet-Cookie: b=2\r\nSet-Cookie: c=3\r\n\r\n",
        );
        assert_eq!(resp.headers().get_all("Set-Cookie"), vec!["a=1", "b=2", "c=3"]);
    }

    #[test]
    fn test_header_folding() {
        let (resp, _) = parse_response(b"HTTP/1.1 200 OK\r\nX-A: 1\r\n X-A-continued\r\n\r\n");
        assert_eq!(resp.headers().count("X-A"), 1);
        assert_eq!(resp.headers().get("X-A"), Some("1 X-A-continued"));
    }

    #[test]
    fn test_header_folding_with_tab() {
        let (resp, _) = parse_response(b"HTTP/1.1 200 OK\r\nX-A: one\r\n\ttwo\r\nX-B: 3\r\n\r\n");
        assert_eq!(resp.headers().get("X-A"), Some("one two"));
        assert_eq!(resp.headers().get("X-B"), Some("3"));
    }

    #[test]
    fn test_bare_lf_termination() {
        let (resp, consumed) = parse_response(b"HTTP/1.1 200 OK\nServer: test\n\n");
        assert_eq!(resp.status_code(), 200);
        assert_eq!(resp.headers().get("Server"), Some("test"));
        assert_eq!(consumed, 30);
    }

    #[test]
    fn test_bare_cr_termination() {
        let (resp, _) = parse_response(b"HTTP/1.1 200 OK\rServer: test\r\r");
        assert_eq!(resp.headers().get("Server"), Some("test"));
    }

    #[test]
    fn test_pipelined_messages() {
        let raw: &[u8] = b"HTTP/1.1 200 OK\r\nA: 1\r\n\r\nHTTP/1.1 204 No Content\r\n\r\n";
        let mut parser = ResponseParser::new();

        let (first, consumed) = parser.parse(raw).unwrap().expect_complete();
        assert_eq!(first.status_code(), 200);

        let (second, rest) = parser.parse(&raw[consumed..]).unwrap().expect_complete();
        assert_eq!(second.status_code(), 204);
        assert_eq!(consumed + rest, raw.len());
    }

    #[test]
    fn test_malformed_method_fails() {
        let mut parser = RequestParser::new();
        assert!(parser.parse(b"GE(T / HTTP/1.1\r\n\r\n").is_err());
        assert!(!parser.valid());
        // terminal until cleared
        assert!(parser.parse(b"GET / HTTP/1.1\r\n\r\n").is_err());
        parser.clear();
        assert!(parser.valid());
        assert!(parser.parse(b"GET / HTTP/1.1\r\n\r\n").is_ok());
    }

    #[test]
    fn test_malformed_version_fails() {
        let mut parser = ResponseParser::new();
        assert!(parser.parse(b"HTXP/1.1 200 OK\r\n\r\n").is_err());
    }

    #[test]
    fn test_control_byte_in_header_value_fails() {
        let mut parser = ResponseParser::new();
        assert!(parser.parse(b"HTTP/1.1 200 OK\r\nX: a\x01b\r\n\r\n").is_err());
    }

    #[test]
    fn test_special_char_in_header_name_fails() {
        let mut parser = ResponseParser::new();
        assert!(parser.parse(b"HTTP/1.1 200 OK\r\nBad[Name]: x\r\n\r\n").is_err());
    }

    #[test]
    fn test_header_name_length_bound() {
        let mut raw = b"HTTP/1.1 200 OK\r\n".to_vec();
        raw.extend(std::iter::repeat(b'X').take(HEADER_NAME_MAX + 1));
        raw.extend_from_slice(b": v\r\n\r\n");
        assert!(ResponseParser::new().parse(&raw).is_err());
    }

    #[test]
    fn test_resource_length_bound() {
        let mut raw = b"GET /".to_vec();
        raw.extend(std::iter::repeat(b'a').take(RESOURCE_MAX + 1));
        raw.extend_from_slice(b" HTTP/1.1\r\n\r\n");
        assert!(RequestParser::new().parse(&raw).is_err());
    }

    #[test]
    fn test_empty_header_value() {
        let (resp, _) = parse_response(b"HTTP/1.1 200 OK\r\nX-Empty:\r\nX-Also: v\r\n\r\n");
        assert_eq!(resp.headers().get("X-Empty"), Some(""));
        assert_eq!(resp.headers().get("X-Also"), Some("v"));
    }

    #[test]
    fn test_multi_digit_version_and_status() {
        let (resp, _) = parse_response(b"HTTP/12.34 599 Some Status\r\n\r\n");
        assert_eq!(resp.version(), crate::http::Version::new(12, 34));
        assert_eq!(resp.status_code(), 599);
        assert_eq!(resp.status_message(), "Some Status");
    }

    #[test]
    fn test_leading_newlines_before_request_skipped() {
        let (req, _) = parse_request(b"\r\nGET / HTTP/1.1\r\n\r\n");
        assert_eq!(req.method(), "GET");
    }
}
