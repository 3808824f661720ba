//! Chunked transfer coding
//!
//! Incremental decoder and a small encoder for the HTTP/1.1 chunked body
//! format: each chunk is `<hex-size>[;extension]\r\n<data>\r\n`, and a
//! zero-size chunk followed by a final CRLF ends the body. Chunk extensions
//! are accepted and discarded.

use bytes::{BufMut, BytesMut};

use super::{Error, ParseStatus, Result, CRLF};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Fail,
    /// Accumulating hex size digits
    Size,
    /// Discarding a chunk extension up to the line end
    Extension,
    /// Saw trailing SP/HT after the size digits, expecting CR
    SizeCr,
    /// Saw CR after the size line, expecting LF
    SizeLf,
    /// Copying chunk payload bytes
    Data,
    /// Expecting the CR that trails a chunk's payload
    DataCr,
    /// Expecting the LF that trails a chunk's payload
    DataLf,
    /// Saw the zero-size chunk, expecting the final CR
    FinalCr,
    /// Expecting the final LF
    FinalLf,
}

/// Incremental decoder for chunked-encoded bodies
///
/// Feed fragments as they arrive; the decoded body is returned once the
/// terminating zero-size chunk and its trailing CRLF have been seen, along
/// with the number of input bytes it took. On completion the parser resets,
/// ready for the next body.
pub struct ChunkedParser {
    state: State,
    size_buf: String,
    remaining: usize,
    body: Vec<u8>,
}

impl ChunkedParser {
    pub fn new() -> Self {
        ChunkedParser {
            state: State::Size,
            size_buf: String::new(),
            remaining: 0,
            body: Vec::new(),
        }
    }

    /// False once the parser has entered the terminal failure state
    pub fn valid(&self) -> bool {
        self.state != State::Fail
    }

    /// Reset the parser, discarding any partial body and clearing failure
    pub fn clear(&mut self) {
        self.state = State::Size;
        self.size_buf.clear();
        self.remaining = 0;
        self.body.clear();
    }

    fn fail(&mut self, msg: String) -> Error {
        self.state = State::Fail;
        Error::InvalidChunkSize(msg)
    }

    fn fail_byte(&mut self, what: &str, c: u8) -> Error {
        self.state = State::Fail;
        Error::Malformed(format!("unexpected byte 0x{:02x} in {}", c, what))
    }

    /// Feed bytes to the decoder
    pub fn parse(&mut self, input: &[u8]) -> Result<ParseStatus<Vec<u8>>> {
        if self.state == State::Fail {
            return Err(Error::Malformed("parser is in the failed state".into()));
        }
        let mut i = 0;
        while i < input.len() {
            // copy payload in runs rather than byte by byte
            if self.state == State::Data {
                let take = self.remaining.min(input.len() - i);
                self.body.extend_from_slice(&input[i..i + take]);
                self.remaining -= take;
                i += take;
                if self.remaining == 0 {
                    self.state = State::DataCr;
                }
                continue;
            }

            let c = input[i];
            i += 1;
            match self.state {
                State::Fail | State::Data => unreachable!(),
                State::Size => {
                    if c.is_ascii_hexdigit() {
                        self.size_buf.push(c as char);
                    } else if self.size_buf.is_empty() && matches!(c, b' ' | b'\t' | b'\r' | b'\n')
                    {
                        // stray whitespace before the size line is skipped
                    } else if c == b';' {
                        self.state = State::Extension;
                    } else if c == b'\r' {
                        self.state = State::SizeLf;
                    } else if matches!(c, b' ' | b'\t') {
                        self.state = State::SizeCr;
                    } else {
                        return Err(self.fail_byte("chunk size", c));
                    }
                }
                State::SizeCr => {
                    if c == b'\r' {
                        self.state = State::SizeLf;
                    } else if !matches!(c, b' ' | b'\t') {
                        return Err(self.fail_byte("chunk size line end", c));
                    }
                }
                State::Extension => {
                    if c == b'\r' {
                        self.state = State::SizeLf;
                    }
                    // extension contents are discarded
                }
                State::SizeLf => {
                    if c != b'\n' {
                        return Err(self.fail_byte("chunk size line end", c));
                    }
                    let size = usize::from_str_radix(&self.size_buf, 16)
                        .map_err(|_| self.fail(format!("bad chunk size {:?}", self.size_buf)))?;
                    self.size_buf.clear();
                    if size == 0 {
                        self.state = State::FinalCr;
                    } else {
                        self.remaining = size;
                        self.state = State::Data;
                    }
                }
                State::DataCr => {
                    if c != b'\r' {
                        return Err(self.fail_byte("chunk data trailer", c));
                    }
                    self.state = State::DataLf;
                }
                State::DataLf => {
                    if c != b'\n' {
                        return Err(self.fail_byte("chunk data trailer", c));
                    }
                    self.state = State::Size;
                }
                State::FinalCr => {
                    if c != b'\r' {
                        return Err(self.fail_byte("final chunk trailer", c));
                    }
                    self.state = State::FinalLf;
                }
                State::FinalLf => {
                    if c != b'\n' {
                        return Err(self.fail_byte("final chunk trailer", c));
                    }
                    let body = std::mem::take(&mut self.body);
                    self.clear();
                    return Ok(ParseStatus::Complete(body, i));
                }
            }
        }
        Ok(ParseStatus::Partial)
    }
}

impl Default for ChunkedParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Encoder for the chunked transfer coding
pub struct ChunkedEncoder;

impl ChunkedEncoder {
    /// Encode one chunk of payload. Empty input yields no output, since a
    /// zero-size chunk would terminate the body.
    pub fn chunk(data: &[u8]) -> Vec<u8> {
        if data.is_empty() {
            return Vec::new();
        }
        let mut out = BytesMut::with_capacity(data.len() + 16);
        out.put_slice(format!("{:x}{}", data.len(), CRLF).as_bytes());
        out.put_slice(data);
        out.put_slice(CRLF.as_bytes());
        out.to_vec()
    }

    /// The terminating zero-size chunk
    pub fn terminator() -> Vec<u8> {
        format!("0{crlf}{crlf}", crlf = CRLF).into_bytes()
    }

    /// Encode a complete body as a single chunk plus terminator
    pub fn encode_all(data: &[u8]) -> Vec<u8> {
        let mut out = Self::chunk(data);
        out.extend_from_slice(&Self::terminator());
        out
    }
}
