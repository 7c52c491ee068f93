use crate::http::request::{Headers, Method, Request, Version, is_token_byte};
use bytes::Bytes;

/// Largest request head (request line plus headers) the parser will buffer.
pub const MAX_HEAD_BYTES: usize = 16_000;

/// Largest request body the parser will accept.
pub const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid request line")]
    InvalidRequestLine,
    #[error("invalid method token")]
    InvalidMethod,
    #[error("unsupported protocol version")]
    InvalidVersion,
    #[error("invalid header line")]
    InvalidHeader,
    #[error("invalid Content-Length")]
    InvalidContentLength,
    #[error("POST request without Content-Length")]
    MissingContentLength,
    #[error("transfer codings are not supported")]
    UnsupportedTransferEncoding,
    #[error("request head exceeds {MAX_HEAD_BYTES} bytes")]
    HeadTooLarge,
    #[error("declared body of {0} bytes exceeds the upload limit")]
    BodyTooLarge(usize),
}

/// Outcome of feeding the buffer to the parser.
#[derive(Debug)]
pub enum Status {
    /// A full request was parsed; the second field is how many bytes of the
    /// buffer it occupied.
    Complete(Request, usize),
    /// The buffer does not hold a full request yet.
    Partial,
}

/// Where a resumable parse currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    RequestLine,
    Headers,
    Body { expected: usize },
}

struct RequestLine {
    method: Method,
    path: String,
    version: Version,
}

enum State {
    RequestLine,
    Headers {
        line: RequestLine,
        start: usize,
    },
    Body {
        line: RequestLine,
        headers: Headers,
        start: usize,
        len: usize,
    },
}

/// Incremental HTTP/1.x request parser.
///
/// The parser is handed the whole (growing) connection buffer on each call
/// and remembers how far it got, so bytes that were already scanned are not
/// searched again. After a `Complete` result it resets itself for the next
/// request; the caller drains the consumed bytes from its buffer.
pub struct RequestParser {
    state: State,
    scanned: usize,
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestParser {
    pub fn new() -> Self {
        Self {
            state: State::RequestLine,
            scanned: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        match &self.state {
            State::RequestLine => Phase::RequestLine,
            State::Headers { .. } => Phase::Headers,
            State::Body { len, .. } => Phase::Body { expected: *len },
        }
    }

    pub fn reset(&mut self) {
        self.state = State::RequestLine;
        self.scanned = 0;
    }

    /// Tries to extract one request from the start of `buf`.
    pub fn poll(&mut self, buf: &[u8]) -> Result<Status, ParseError> {
        loop {
            match std::mem::replace(&mut self.state, State::RequestLine) {
                State::RequestLine => {
                    let Some(end) = find(buf, self.scanned, b"\r\n") else {
                        return self.wait(buf);
                    };
                    let line = parse_request_line(&buf[..end])?;
                    self.scanned = end + 2;
                    self.state = State::Headers {
                        line,
                        start: end + 2,
                    };
                }

                State::Headers { line, start } => {
                    // Header block ends at the first empty line. With no
                    // headers at all the block itself starts with CRLF.
                    let blank = if buf[start..].starts_with(b"\r\n") {
                        Some(start)
                    } else {
                        let from = self.scanned.saturating_sub(3).max(start);
                        find(buf, from, b"\r\n\r\n").map(|p| p + 2)
                    };

                    let Some(blank) = blank else {
                        self.state = State::Headers { line, start };
                        return self.wait(buf);
                    };

                    if blank + 2 > MAX_HEAD_BYTES {
                        return Err(ParseError::HeadTooLarge);
                    }

                    let headers = parse_headers(&buf[start..blank])?;
                    let len = body_length(&line.method, &headers)?;

                    self.scanned = blank + 2;
                    self.state = State::Body {
                        line,
                        headers,
                        start: blank + 2,
                        len,
                    };
                }

                State::Body {
                    line,
                    headers,
                    start,
                    len,
                } => {
                    if buf.len() < start + len {
                        self.state = State::Body {
                            line,
                            headers,
                            start,
                            len,
                        };
                        return Ok(Status::Partial);
                    }

                    let request = Request {
                        method: line.method,
                        path: line.path,
                        version: line.version,
                        headers,
                        body: Bytes::copy_from_slice(&buf[start..start + len]),
                    };

                    self.reset();
                    return Ok(Status::Complete(request, start + len));
                }
            }
        }
    }

    fn wait(&mut self, buf: &[u8]) -> Result<Status, ParseError> {
        if buf.len() > MAX_HEAD_BYTES {
            return Err(ParseError::HeadTooLarge);
        }
        // Keep one byte back so a CR at the end can pair with the next LF.
        self.scanned = buf.len().saturating_sub(1).max(self.scanned);
        Ok(Status::Partial)
    }
}

/// Parses a single request from `buf` in one shot.
///
/// Returns `Ok(None)` when the buffer holds only part of a request.
pub fn parse_http_request(buf: &[u8]) -> Result<Option<(Request, usize)>, ParseError> {
    match RequestParser::new().poll(buf)? {
        Status::Complete(request, consumed) => Ok(Some((request, consumed))),
        Status::Partial => Ok(None),
    }
}

fn parse_request_line(line: &[u8]) -> Result<RequestLine, ParseError> {
    let line = std::str::from_utf8(line).map_err(|_| ParseError::InvalidRequestLine)?;

    let mut parts = line.split(' ');
    let (Some(method), Some(path), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ParseError::InvalidRequestLine);
    };

    let method = Method::from_token(method).ok_or(ParseError::InvalidMethod)?;

    if !path.starts_with('/') || path.bytes().any(|b| b.is_ascii_control()) {
        return Err(ParseError::InvalidRequestLine);
    }

    let version = Version::parse(version).ok_or(ParseError::InvalidVersion)?;

    Ok(RequestLine {
        method,
        path: path.to_string(),
        version,
    })
}

fn parse_headers(block: &[u8]) -> Result<Headers, ParseError> {
    let block = std::str::from_utf8(block).map_err(|_| ParseError::InvalidHeader)?;
    let mut headers = Headers::new();

    for line in block.split("\r\n") {
        if line.is_empty() {
            continue;
        }

        let (name, value) = line.split_once(':').ok_or(ParseError::InvalidHeader)?;

        if name.is_empty() || !name.bytes().all(is_token_byte) {
            return Err(ParseError::InvalidHeader);
        }

        headers.append(name, value.trim());
    }

    Ok(headers)
}

fn body_length(method: &Method, headers: &Headers) -> Result<usize, ParseError> {
    if headers.contains("Transfer-Encoding") {
        return Err(ParseError::UnsupportedTransferEncoding);
    }

    let len = match headers.get("Content-Length") {
        Some(v) if !v.is_empty() && v.bytes().all(|b| b.is_ascii_digit()) => v
            .parse::<usize>()
            .map_err(|_| ParseError::InvalidContentLength)?,
        Some(_) => return Err(ParseError::InvalidContentLength),
        None if *method == Method::POST => return Err(ParseError::MissingContentLength),
        None => 0,
    };

    if len > MAX_BODY_BYTES {
        return Err(ParseError::BodyTooLarge(len));
    }

    Ok(len)
}

fn find(buf: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    buf.get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}
