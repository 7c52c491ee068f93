//! Request-scoped errors and their HTTP status mapping.

use crate::http::parser::ParseError;
use crate::http::response::{Response, StatusCode};

/// Everything that can go wrong while turning one request into a response.
///
/// None of these are fatal to the server; each becomes an error response on
/// the connection that caused it.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("missing Content-Length")]
    MissingContentLength,

    #[error("cannot delete root")]
    RootDeletion,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found")]
    NotFound,

    #[error("payload too large")]
    PayloadTooLarge,

    #[error("{0} is not implemented")]
    NotImplemented(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl HttpError {
    pub fn status(&self) -> StatusCode {
        match self {
            HttpError::BadRequest(_)
            | HttpError::MissingContentLength
            | HttpError::RootDeletion => StatusCode::BadRequest,
            HttpError::Forbidden(_) => StatusCode::Forbidden,
            HttpError::NotFound => StatusCode::NotFound,
            HttpError::PayloadTooLarge => StatusCode::PayloadTooLarge,
            HttpError::NotImplemented(_) => StatusCode::NotImplemented,
            HttpError::Io(_) => StatusCode::InternalServerError,
        }
    }

    /// Builds the `text/plain` error response sent to the client.
    ///
    /// Server-side I/O details stay in the log, not in the body.
    pub fn into_response(self) -> Response {
        match self {
            HttpError::Io(_) => Response::internal_error(),
            other => Response::text(other.status(), other.to_string()),
        }
    }
}

impl From<ParseError> for HttpError {
    fn from(err: ParseError) -> Self {
        match err {
            ParseError::MissingContentLength => HttpError::MissingContentLength,
            ParseError::BodyTooLarge(_) => HttpError::PayloadTooLarge,
            ParseError::UnsupportedTransferEncoding => {
                HttpError::NotImplemented("Transfer-Encoding".to_string())
            }
            other => HttpError::BadRequest(other.to_string()),
        }
    }
}
