//! Error types for the `harness` crate.
//!
//! Follows the same pattern as the other layers: a root `Error` struct holding an
//! error kind tree and an optional source for error chaining.

use std::error::Error as StdError;
use std::fmt;

use tokio_tungstenite::tungstenite;

/// Top-level error type for the harness crate.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

/// Major categories of errors raised while talking to the API under test.
#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    Payload(PayloadErrorKind),
    Auth(AuthErrorKind),
    Transport(TransportErrorKind),
    Protocol(ProtocolErrorKind),
    Server(ServerErrorKind),
    /// The operation references root fields the introspected schema lacks.
    Validation,
    /// A subscription and its trigger did not both complete in time.
    DeadlineExceeded,
}

/// Errors loading an operation payload.
#[derive(Debug, PartialEq)]
pub enum PayloadErrorKind {
    NotFound,
    Unreadable,
    Malformed,
}

/// Errors minting tokens for synthetic users.
#[derive(Debug, PartialEq)]
pub enum AuthErrorKind {
    MissingSigningKey,
    Encoding,
}

/// Errors in the network layer. These are the only retryable errors.
#[derive(Debug, PartialEq)]
pub enum TransportErrorKind {
    Connect,
    Closed,
    Io,
    Http,
}

/// Errors in the GraphQL over WebSocket conversation.
#[derive(Debug, PartialEq)]
pub enum ProtocolErrorKind {
    InvalidHeader,
    /// The WebSocket endpoint is not a usable `ws://` or `wss://` URL.
    InvalidEndpoint,
    ConnectionRejected,
    UnexpectedMessage,
    Malformed,
}

/// Errors reported by the server under test.
#[derive(Debug, PartialEq)]
pub enum ServerErrorKind {
    GraphQl,
    Status(u16),
    MissingData,
}

impl Error {
    pub fn new(error_kind: ErrorKind, message: impl Into<String>) -> Self {
        let message: String = message.into();
        Error {
            source: Some(message.into()),
            error_kind,
        }
    }

    /// Whether retrying the whole operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self.error_kind, ErrorKind::Transport(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            ErrorKind::Payload(kind) => write!(f, "Payload error: {:?}", kind)?,
            ErrorKind::Auth(kind) => write!(f, "Auth error: {:?}", kind)?,
            ErrorKind::Transport(kind) => write!(f, "Transport error: {:?}", kind)?,
            ErrorKind::Protocol(kind) => write!(f, "Protocol error: {:?}", kind)?,
            ErrorKind::Server(kind) => write!(f, "Server error: {:?}", kind)?,
            ErrorKind::Validation => write!(f, "Validation error")?,
            ErrorKind::DeadlineExceeded => write!(f, "Deadline exceeded")?,
        }
        match &self.source {
            Some(source) => write!(f, ": {source}"),
            None => Ok(()),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let error_kind = if let Some(status) = err.status() {
            ErrorKind::Server(ServerErrorKind::Status(status.as_u16()))
        } else if err.is_connect() || err.is_timeout() {
            ErrorKind::Transport(TransportErrorKind::Connect)
        } else if err.is_decode() {
            ErrorKind::Protocol(ProtocolErrorKind::Malformed)
        } else {
            ErrorKind::Transport(TransportErrorKind::Http)
        };

        Error {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}

impl From<tungstenite::Error> for Error {
    fn from(err: tungstenite::Error) -> Self {
        let error_kind = match &err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                ErrorKind::Transport(TransportErrorKind::Closed)
            }
            tungstenite::Error::Io(_) => ErrorKind::Transport(TransportErrorKind::Io),
            tungstenite::Error::Capacity(_) => ErrorKind::Protocol(ProtocolErrorKind::Malformed),
            tungstenite::Error::Http(response) if response.status().is_client_error() => {
                ErrorKind::Protocol(ProtocolErrorKind::ConnectionRejected)
            }
            tungstenite::Error::Url(_) | tungstenite::Error::HttpFormat(_) => {
                ErrorKind::Protocol(ProtocolErrorKind::InvalidEndpoint)
            }
            // Server-side upgrade failures and TLS errors
            _ => ErrorKind::Transport(TransportErrorKind::Connect),
        };

        Error {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: ErrorKind::Protocol(ProtocolErrorKind::Malformed),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for Error {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: ErrorKind::Auth(AuthErrorKind::Encoding),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: ErrorKind::Transport(TransportErrorKind::Io),
        }
    }
}

/// Helper function to create payload errors.
pub fn payload_error(kind: PayloadErrorKind, message: &str) -> Error {
    Error::new(ErrorKind::Payload(kind), message)
}

/// Helper function to create protocol errors.
pub fn protocol_error(kind: ProtocolErrorKind, message: &str) -> Error {
    Error::new(ErrorKind::Protocol(kind), message)
}

/// Helper function to create server errors.
pub fn server_error(kind: ServerErrorKind, message: &str) -> Error {
    Error::new(ErrorKind::Server(kind), message)
}
