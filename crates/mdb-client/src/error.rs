// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

use crate::protocol::StatusCode;

/// Client error type.
///
/// Transport failures (`Connect`, `ConnectionClosed`, `Io`, `Timeout`) are fatal to the
/// connection they happened on. `Server` leaves the connection usable. `MalformedPayload`
/// fails the current request. `InvalidArgument`, `HandleClosed` and `StaleHandle` are raised
/// before anything is written to the socket.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("mdb: client is not connected")]
    NotConnected,

    #[error("mdb: could not connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("mdb: server closed the connection")]
    ConnectionClosed,

    #[error("mdb io: {0}")]
    Io(#[from] std::io::Error),

    #[error("mdb: deadline exceeded")]
    Timeout,

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error("mdb: malformed payload: {0}")]
    MalformedPayload(String),

    #[error("mdb: invalid argument: {0}")]
    InvalidArgument(String),

    #[error("mdb: {resource} is closed")]
    HandleClosed { resource: &'static str },

    #[error("mdb: {resource} was opened on a previous connection")]
    StaleHandle { resource: &'static str },
}

/// Error reported by the server through an error status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("mdb server error ({status:?}): {message}")]
pub struct ServerError {
    pub status: StatusCode,
    pub message: String,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Checks whether an error is a server error with the specified status.
pub fn is_server_error(err: &Error, status: StatusCode) -> bool {
    matches!(err, Error::Server(ServerError { status: s, .. }) if *s == status)
}

/// Returns `true` for errors after which the connection can no longer be used.
pub fn is_connection_error(err: &Error) -> bool {
    matches!(
        err,
        Error::NotConnected
            | Error::Connect { .. }
            | Error::ConnectionClosed
            | Error::Io(_)
            | Error::Timeout
    )
}

impl Error {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Error::MalformedPayload(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub fn server(status: StatusCode, message: impl Into<String>) -> Self {
        Error::Server(ServerError {
            status,
            message: message.into(),
        })
    }

    /// Maps a socket error, folding read/write deadline expiry into `Timeout` and an early
    /// EOF into `ConnectionClosed`.
    pub(crate) fn from_socket(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => Error::Timeout,
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe => Error::ConnectionClosed,
            _ => Error::Io(err),
        }
    }
}
