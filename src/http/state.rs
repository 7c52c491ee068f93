//! Per-connection state machine.
//!
//! [`transition`] is a pure function: it never touches a socket or the
//! filesystem. The async driver in [`crate::http::connection`] performs the
//! I/O a state asks for and reports back with an [`Event`].

use bytes::{Buf, BytesMut};

use crate::http::parser::{ParseError, Phase, RequestParser, Status};
use crate::http::request::Request;
use crate::http::response::Response;
use crate::http::writer::ResponseWriter;

#[derive(Debug)]
pub enum ConnectionState {
    /// Waiting for the first byte of the next request.
    Idle,
    ParsingRequestLine,
    ParsingHeaders,
    ReadingBody { expected: usize },
    /// A full request is ready for the router.
    Dispatching(Request),
    /// The bytes received could not be parsed; an error response is due.
    Rejected(ParseError),
    WritingResponse {
        writer: ResponseWriter,
        keep_alive: bool,
    },
    Closed,
}

impl ConnectionState {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::ParsingRequestLine => "parsing-request-line",
            ConnectionState::ParsingHeaders => "parsing-headers",
            ConnectionState::ReadingBody { .. } => "reading-body",
            ConnectionState::Dispatching(_) => "dispatching",
            ConnectionState::Rejected(_) => "rejected",
            ConnectionState::WritingResponse { .. } => "writing-response",
            ConnectionState::Closed => "closed",
        }
    }

    /// True in the states that wait for more bytes from the peer.
    pub fn is_reading(&self) -> bool {
        matches!(
            self,
            ConnectionState::Idle
                | ConnectionState::ParsingRequestLine
                | ConnectionState::ParsingHeaders
                | ConnectionState::ReadingBody { .. }
        )
    }
}

#[derive(Debug)]
pub enum Event {
    /// New bytes were appended to the input buffer.
    Received,
    /// The peer closed its side (read returned 0).
    PeerClosed,
    /// The router produced a response for the current request.
    Dispatched { response: Response, keep_alive: bool },
    /// The pending response has been fully written.
    Flushed,
    /// No progress within the idle timeout.
    TimedOut,
    /// A socket read or write failed.
    Failed,
}

/// Computes the next state.
///
/// `input` is the connection's receive buffer; bytes belonging to a
/// completed request are drained from it here. Bytes after that request stay
/// buffered and are parsed as soon as the response has been flushed.
pub fn transition(
    state: ConnectionState,
    event: Event,
    input: &mut BytesMut,
    parser: &mut RequestParser,
) -> ConnectionState {
    use ConnectionState::*;

    match (state, event) {
        (_, Event::PeerClosed | Event::TimedOut | Event::Failed) => Closed,

        (state, Event::Received) if state.is_reading() => parse_buffered(input, parser),

        (Dispatching(_), Event::Dispatched { response, keep_alive }) => {
            writing(response, keep_alive)
        }

        // A connection whose framing is lost cannot carry another request.
        (Rejected(_), Event::Dispatched { response, .. }) => writing(response, false),

        (WritingResponse { keep_alive: true, .. }, Event::Flushed) => {
            parse_buffered(input, parser)
        }

        (WritingResponse { keep_alive: false, .. }, Event::Flushed) => Closed,

        (state, _) => state,
    }
}

fn writing(response: Response, keep_alive: bool) -> ConnectionState {
    let connection = if keep_alive { "keep-alive" } else { "close" };
    let response = response.with_header("Connection", connection);

    ConnectionState::WritingResponse {
        writer: ResponseWriter::new(response),
        keep_alive,
    }
}

fn parse_buffered(input: &mut BytesMut, parser: &mut RequestParser) -> ConnectionState {
    match parser.poll(input) {
        Ok(Status::Complete(request, consumed)) => {
            input.advance(consumed);
            ConnectionState::Dispatching(request)
        }
        Ok(Status::Partial) => match parser.phase() {
            Phase::RequestLine if input.is_empty() => ConnectionState::Idle,
            Phase::RequestLine => ConnectionState::ParsingRequestLine,
            Phase::Headers => ConnectionState::ParsingHeaders,
            Phase::Body { expected } => ConnectionState::ReadingBody { expected },
        },
        Err(err) => ConnectionState::Rejected(err),
    }
}
